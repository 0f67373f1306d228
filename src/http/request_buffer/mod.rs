pub mod types;

use std::cmp::min;

use crate::http::boyer_moore::find_body_start_from;
use crate::http::http_core::types::RequestError;
use crate::http::http_core::HttpRequest;

use types::{BufferLimits, ReadStatus};

// Upper bound on the up-front body allocation; larger bodies grow as they arrive.
const INITIAL_BODY_CAPACITY: usize = 4 * 1024 * 1024;

/// Accumulates one request from however the socket chooses to deliver it.
///
/// Bytes are appended with [`RequestBuffer::feed`]. While the head is
/// incomplete, the search for the blank line resumes a few bytes before the
/// end of what was already scanned, so a terminator split across reads is
/// still found without rescanning the whole buffer. Once the head parses, the
/// body is collected up to `Content-Length`; anything after it is ignored
/// because connections carry a single request.
pub struct RequestBuffer {
    limits: BufferLimits,
    head: Vec<u8>,
    scanned: usize,
    request: Option<HttpRequest>,
    body: Vec<u8>,
    expected_body: usize,
    status: ReadStatus,
}

impl RequestBuffer {
    pub fn new(limits: BufferLimits) -> RequestBuffer {
        RequestBuffer {
            limits,
            head: Vec::new(),
            scanned: 0,
            request: None,
            body: Vec::new(),
            expected_body: 0,
            status: ReadStatus::AwaitingHeaders,
        }
    }

    pub fn status(&self) -> ReadStatus {
        self.status
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Result<ReadStatus, RequestError> {
        match self.status {
            ReadStatus::AwaitingHeaders => self.feed_head(chunk),
            ReadStatus::AwaitingBody => {
                self.take_body(chunk);
                Ok(self.status)
            }
            ReadStatus::Complete => Ok(ReadStatus::Complete),
        }
    }

    fn feed_head(&mut self, chunk: &[u8]) -> Result<ReadStatus, RequestError> {
        self.head.extend_from_slice(chunk);

        // A terminator may straddle the previous read: back up three bytes.
        let resume = self.scanned.saturating_sub(3);
        let body_start = match find_body_start_from(&self.head, resume) {
            Some(idx) => idx,
            None => {
                self.scanned = self.head.len();
                if self.head.len() > self.limits.max_header_bytes {
                    return Err(RequestError::HeaderTooLarge {
                        limit: self.limits.max_header_bytes,
                    });
                }
                return Ok(ReadStatus::AwaitingHeaders);
            }
        };

        if body_start > self.limits.max_header_bytes {
            return Err(RequestError::HeaderTooLarge {
                limit: self.limits.max_header_bytes,
            });
        }

        let req = HttpRequest::parse_head(&self.head[..body_start])?;
        let expected = req.content_length.unwrap_or(0);
        if expected > self.limits.max_body_bytes {
            return Err(RequestError::BodyTooLarge {
                declared: expected,
                limit: self.limits.max_body_bytes,
            });
        }

        let head = std::mem::take(&mut self.head);
        self.expected_body = expected;
        self.body = Vec::with_capacity(min(expected, INITIAL_BODY_CAPACITY));
        self.request = Some(req);
        self.status = ReadStatus::AwaitingBody;
        self.take_body(&head[body_start..]);

        Ok(self.status)
    }

    fn take_body(&mut self, chunk: &[u8]) {
        let wanted = self.expected_body - self.body.len();
        let take = min(wanted, chunk.len());
        self.body.extend_from_slice(&chunk[..take]);
        if self.body.len() == self.expected_body {
            self.status = ReadStatus::Complete;
        }
    }

    /// The parsed head, available as soon as the header block is complete.
    pub fn request_head(&self) -> Option<&HttpRequest> {
        self.request.as_ref()
    }

    pub fn body_received(&self) -> usize {
        self.body.len()
    }

    pub fn expected_body_len(&self) -> Option<usize> {
        self.request.as_ref().map(|_| self.expected_body)
    }

    /// The error to report when the peer closes before the request is whole.
    pub fn eof_error(&self) -> RequestError {
        match self.status {
            ReadStatus::AwaitingHeaders => {
                RequestError::Malformed("connection closed before the headers ended".to_string())
            }
            _ => RequestError::Incomplete {
                received: self.body.len(),
                expected: self.expected_body,
            },
        }
    }

    /// Hand over the finished request; `None` until it is complete.
    pub fn into_request(self) -> Option<HttpRequest> {
        if self.status != ReadStatus::Complete {
            return None;
        }
        let mut req = self.request?;
        req.set_body(self.body);
        Some(req)
    }
}
