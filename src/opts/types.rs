use clap::Parser;

/// Receive audio files from a browser on the local network.
#[derive(Parser, Clone, Debug)]
#[clap(version, author = "James Houghton <jamesthoughton@gmail.com>")]
pub struct Opts {
    /// Directory uploaded files are saved into
    #[clap(short, long)]
    pub directory: Option<String>,
    /// Preferred port; any free port is used if it is taken
    #[clap(short, long, default_value = "8080")]
    pub port: u16,
    /// IPv4 address to listen on
    #[clap(short = 'm', long, default_value = "0.0.0.0")]
    pub hostmask: String,
    /// Maximum simultaneous connections; further ones are closed immediately
    #[clap(long = "max-connections", default_value = "5")]
    pub max_connections: usize,
    /// Uploaded file size limit in bytes
    #[clap(long = "upload-size-limit", default_value = "104857600")]
    pub size_limit: usize,
    /// Request header size limit in bytes
    #[clap(long = "max-header-size", default_value = "1048576")]
    pub max_header_size: usize,
    /// Seconds a connection may sit without progress before it is dropped
    #[clap(long = "idle-timeout", default_value = "60")]
    pub idle_timeout: u64,
    /// Name advertised over mDNS
    #[clap(long = "service-name", default_value = "AudioLooper")]
    pub service_name: String,
    /// Do not advertise the server over mDNS
    #[clap(long = "no-advertise")]
    pub no_advertise: bool,
    /// Refuse and delete uploads that contain no audio track
    #[clap(long = "audio-only")]
    pub audio_only: bool,
    /// Do not start the interface (useful for testing)
    #[clap(long)]
    pub headless: bool,
    /// In milliseconds, how often the UI will be updated
    #[clap(short = 'r', long = "ui-refresh-rate", default_value = "100")]
    pub ui_refresh_rate: u64,
    /// Write logs to this file (the interface otherwise hides them)
    #[clap(long = "log-file")]
    pub log_file: Option<String>,
}
