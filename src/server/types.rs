use std::collections::BTreeSet;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ErrorKind;
use crate::http::request_buffer::types::BufferLimits;

pub const DEFAULT_PORT: u16 = 8080;
pub const MAX_FILE_SIZE: usize = 100 * 1024 * 1024;
/// Room for multipart delimiters and part headers on top of the file itself.
pub const MULTIPART_OVERHEAD: usize = 16 * 1024;
pub const MAX_ACTIVE_CONNECTIONS: usize = 5;
pub const MAX_HEADER_BYTES: usize = 1024 * 1024;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
pub const SERVICE_TYPE: &str = "_audiolooper._tcp.local.";
pub const DEFAULT_SERVICE_NAME: &str = "AudioLooper";

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_host: Ipv4Addr,
    pub preferred_port: u16,
    pub storage_dir: PathBuf,
    pub max_file_size: usize,
    pub max_connections: usize,
    pub max_header_bytes: usize,
    pub idle_timeout: Duration,
    pub service_name: String,
    /// Publish an mDNS record while running.
    pub advertise: bool,
    /// Refuse (400) and delete uploads without an audio track.
    pub reject_non_audio: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_host: Ipv4Addr::UNSPECIFIED,
            preferred_port: DEFAULT_PORT,
            storage_dir: std::env::temp_dir().join("loopshare"),
            max_file_size: MAX_FILE_SIZE,
            max_connections: MAX_ACTIVE_CONNECTIONS,
            max_header_bytes: MAX_HEADER_BYTES,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            advertise: true,
            reject_non_audio: false,
        }
    }
}

impl ServerConfig {
    pub fn buffer_limits(&self) -> BufferLimits {
        BufferLimits {
            max_header_bytes: self.max_header_bytes,
            max_body_bytes: self.max_body_bytes(),
        }
    }

    /// Largest request body accepted for an upload of `max_file_size`.
    pub fn max_body_bytes(&self) -> usize {
        self.max_file_size.saturating_add(MULTIPART_OVERHEAD)
    }
}

/// Identifies a connection by its peer endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub SocketAddr);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServerState {
    pub running: bool,
    pub port: u16,
    pub local_address: String,
    pub active_connections: BTreeSet<ConnectionId>,
    pub received_file_path: Option<PathBuf>,
    pub transfer_progress: f32,
    pub last_error: Option<ErrorKind>,
    pub rejected_connections: u64,
    pub service_name: Option<String>,
}

impl Default for ServerState {
    fn default() -> Self {
        ServerState {
            running: false,
            port: 0,
            local_address: String::new(),
            active_connections: BTreeSet::new(),
            received_file_path: None,
            transfer_progress: 0.0,
            last_error: None,
            rejected_connections: 0,
            service_name: None,
        }
    }
}

impl ServerState {
    /// `http://address:port/` while running.
    pub fn url(&self) -> Option<String> {
        if self.running {
            Some(format!("http://{}:{}/", self.local_address, self.port))
        } else {
            None
        }
    }
}

/// A file that finished uploading and is visible in the storage directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedFile {
    pub path: PathBuf,
    pub size_bytes: usize,
    pub has_audio_track: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ServerEvent {
    State(ServerState),
    FileReceived(ReceivedFile),
    /// One line per finished request: `peer status method path`.
    Request(String),
}
