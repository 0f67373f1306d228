use std::io;

use thiserror::Error;

/// Coarse error classification published through `ServerState::last_error`
/// and used to pick the HTTP status of a failed request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ServerStartFailed,
    ConnectionRejected,
    HeaderTooLarge,
    BodyTooLarge,
    MissingBoundary,
    InvalidContentLength,
    ParseFailure,
    StorageWriteFailed,
    MediaValidationFailed,
}

impl ErrorKind {
    pub fn describe(&self) -> &'static str {
        match self {
            ErrorKind::ServerStartFailed => "server could not start",
            ErrorKind::ConnectionRejected => "connection rejected",
            ErrorKind::HeaderTooLarge => "request headers too large",
            ErrorKind::BodyTooLarge => "request body too large",
            ErrorKind::MissingBoundary => "missing multipart boundary",
            ErrorKind::InvalidContentLength => "invalid Content-Length",
            ErrorKind::ParseFailure => "malformed request",
            ErrorKind::StorageWriteFailed => "could not save the file",
            ErrorKind::MediaValidationFailed => "file has no audio track",
        }
    }
}

/// Errors surfaced to the caller of `TransferServer::start`.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {host}:{port} (and ephemeral fallback): {source}")]
    StartFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("server is already running on port {0}")]
    AlreadyRunning(u16),
    #[error("failed to prepare the storage directory {path}: {source}")]
    StorageDir {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to start a server thread: {0}")]
    Thread(#[source] io::Error),
}

impl ServerError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ServerStartFailed
    }
}
