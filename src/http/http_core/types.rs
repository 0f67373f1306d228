use std::io::{self, Write};

use thiserror::Error;

use super::HttpStatus;
use crate::error::ErrorKind;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpHeader {
    pub key: String,
    pub value: String,
}

// Ordered; repeated headers are kept as separate entries.
pub type HttpHeaderSet = Vec<HttpHeader>;

/// Everything that can go wrong while reading a request off a connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("request headers exceed {limit} bytes")]
    HeaderTooLarge { limit: usize },
    #[error("request body of {declared} bytes exceeds the {limit} byte limit")]
    BodyTooLarge { declared: usize, limit: usize },
    #[error("invalid Content-Length: {0}")]
    InvalidContentLength(String),
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("unsupported HTTP version: {0}")]
    UnsupportedVersion(String),
    #[error("connection closed after {received} of {expected} body bytes")]
    Incomplete { received: usize, expected: usize },
    #[error("request timed out")]
    Timeout,
}

impl RequestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RequestError::HeaderTooLarge { .. } => ErrorKind::HeaderTooLarge,
            RequestError::BodyTooLarge { .. } => ErrorKind::BodyTooLarge,
            RequestError::InvalidContentLength(_) => ErrorKind::InvalidContentLength,
            RequestError::Malformed(_)
            | RequestError::UnsupportedVersion(_)
            | RequestError::Incomplete { .. }
            | RequestError::Timeout => ErrorKind::ParseFailure,
        }
    }

    pub fn status(&self) -> HttpStatus {
        match self {
            RequestError::Timeout => HttpStatus::RequestTimeout,
            _ => HttpStatus::BadRequest,
        }
    }
}

/// A serialized response and how much of it has reached the socket.
pub struct ResponseBytes {
    data: Vec<u8>,
    written: usize,
}

impl ResponseBytes {
    pub fn new(data: Vec<u8>) -> ResponseBytes {
        ResponseBytes { data, written: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.written
    }

    pub fn is_done(&self) -> bool {
        self.remaining() == 0
    }

    pub fn bytes_written(&self) -> usize {
        self.written
    }

    /// Write as much as the stream accepts without blocking. `WouldBlock` is
    /// not an error: the caller retries once the socket is writable again.
    pub fn partial_write_to_stream<W: Write>(&mut self, stream: &mut W) -> io::Result<usize> {
        let mut total = 0;
        while !self.is_done() {
            match stream.write(&self.data[self.written..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "peer stopped accepting response bytes",
                    ))
                }
                Ok(n) => {
                    self.written += n;
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Trickle {
        out: Vec<u8>,
        budget: usize,
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "full"));
            }
            let n = buf.len().min(self.budget).min(3);
            self.out.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn partial_writes_resume_where_they_stopped() {
        let mut resp = ResponseBytes::new(b"HTTP/1.1 200 OK\r\n\r\n".to_vec());
        let mut sink = Trickle { out: Vec::new(), budget: 7 };

        assert_eq!(resp.partial_write_to_stream(&mut sink).unwrap(), 7);
        assert!(!resp.is_done());

        sink.budget = 100;
        resp.partial_write_to_stream(&mut sink).unwrap();
        assert!(resp.is_done());
        assert_eq!(sink.out, b"HTTP/1.1 200 OK\r\n\r\n".to_vec());
    }

    #[test]
    fn client_errors_map_to_bad_request() {
        let err = RequestError::BodyTooLarge { declared: 10, limit: 5 };
        assert_eq!(err.status(), HttpStatus::BadRequest);
        assert_eq!(err.kind(), ErrorKind::BodyTooLarge);
        assert_eq!(RequestError::Timeout.status(), HttpStatus::RequestTimeout);
    }
}
