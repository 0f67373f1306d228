use regex::{Captures, Regex};

use std::str::from_utf8;

pub mod types;
use types::{HttpHeader, HttpHeaderSet, RequestError};

#[derive(PartialEq, Eq, Clone, Debug)]
pub enum HttpMethod {
    GET,
    HEAD,
    POST,
    Other(String),
}

impl HttpMethod {
    pub fn as_str(&self) -> &str {
        match self {
            HttpMethod::GET => "GET",
            HttpMethod::HEAD => "HEAD",
            HttpMethod::POST => "POST",
            HttpMethod::Other(verb) => verb,
        }
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum HttpVersion {
    Http1_0,
    Http1_1,
}

pub fn version_to_str(v: &HttpVersion) -> &'static str {
    match v {
        HttpVersion::Http1_0 => "HTTP/1.0",
        HttpVersion::Http1_1 => "HTTP/1.1",
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum HttpStatus {
    OK,                  // 200
    BadRequest,          // 400
    NotFound,            // 404
    RequestTimeout,      // 408
    ServerError,         // 500
    ServiceUnavailable,  // 503
}

pub fn status_to_code(status: &HttpStatus) -> u16 {
    match status {
        HttpStatus::OK => 200,
        HttpStatus::BadRequest => 400,
        HttpStatus::NotFound => 404,
        HttpStatus::RequestTimeout => 408,
        HttpStatus::ServerError => 500,
        HttpStatus::ServiceUnavailable => 503,
    }
}

pub fn status_to_message(status: &HttpStatus) -> &'static str {
    match status {
        HttpStatus::OK => "OK",
        HttpStatus::BadRequest => "Bad Request",
        HttpStatus::NotFound => "Not Found",
        HttpStatus::RequestTimeout => "Request Timeout",
        HttpStatus::ServerError => "Internal Server Error",
        HttpStatus::ServiceUnavailable => "Service Unavailable",
    }
}

/// A fully read request. Built once from the header block, then given its
/// body by the request buffer; never mutated after that.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub path: String,
    pub version: HttpVersion,
    headers: HttpHeaderSet,
    pub content_length: Option<usize>,
    pub boundary: Option<String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Parse a header block, including its terminating blank line.
    pub fn parse_head(head: &[u8]) -> Result<HttpRequest, RequestError> {
        /* POST /upload HTTP/1.1
         * Header: value
         *
         */
        let request_str = from_utf8(head)
            .map_err(|_| RequestError::Malformed("request head is not valid UTF-8".to_string()))?;

        let mut lines = request_str.split("\r\n");
        let request_line = lines.next().unwrap_or("");
        let first: Vec<&str> = request_line.split(' ').collect();
        if first.len() != 3 || first.iter().any(|part| part.is_empty()) {
            return Err(RequestError::Malformed(format!(
                "bad request line: {:?}",
                request_line
            )));
        }
        let verb = first[0];
        let target = first[1];
        let version_str = first[2];

        let version = match version_str {
            "HTTP/1.0" => HttpVersion::Http1_0,
            "HTTP/1.1" => HttpVersion::Http1_1,
            other => return Err(RequestError::UnsupportedVersion(other.to_string())),
        };

        let method = match verb {
            "GET" => HttpMethod::GET,
            "HEAD" => HttpMethod::HEAD,
            "POST" => HttpMethod::POST,
            other => HttpMethod::Other(other.to_string()),
        };

        let mut headers = HttpHeaderSet::new();
        for header_line in lines {
            if header_line.is_empty() {
                continue;
            }
            let (key, value) = match header_line.split_once(':') {
                Some(kv) => kv,
                None => {
                    return Err(RequestError::Malformed(format!(
                        "header line without a colon: {:?}",
                        header_line
                    )))
                }
            };
            headers.push(HttpHeader {
                key: key.trim().to_lowercase(),
                value: value.trim().to_string(),
            });
        }

        let mut req = HttpRequest {
            method,
            path: undo_percent_encoding(strip_query(target)),
            version,
            headers,
            content_length: None,
            boundary: None,
            body: Vec::new(),
        };

        if let Some(te) = req.get_header("transfer-encoding") {
            if !te.eq_ignore_ascii_case("identity") {
                return Err(RequestError::Malformed(format!(
                    "unsupported Transfer-Encoding: {}",
                    te
                )));
            }
        }

        req.content_length = parse_content_length(&req)?;
        req.boundary = req
            .get_header("content-type")
            .and_then(|ct| get_post_boundary(ct));

        Ok(req)
    }

    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|header| header.key.eq_ignore_ascii_case(key))
            .map(|header| header.value.as_str())
    }

    pub(crate) fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }
}

fn strip_query(target: &str) -> &str {
    match target.find(|c| c == '?' || c == '#') {
        Some(idx) => &target[..idx],
        None => target,
    }
}

fn parse_content_length(req: &HttpRequest) -> Result<Option<usize>, RequestError> {
    let mut found: Option<usize> = None;
    for header in req.headers.iter().filter(|h| h.key == "content-length") {
        let invalid = || RequestError::InvalidContentLength(header.value.clone());
        if header.value.is_empty() || !header.value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let len: usize = header.value.parse().map_err(|_| invalid())?;
        if let Some(prev) = found {
            if prev != len {
                return Err(RequestError::InvalidContentLength(format!(
                    "conflicting values {} and {}",
                    prev, len
                )));
            }
        }
        found = Some(len);
    }
    Ok(found)
}

/// Boundary token of a `multipart/form-data` content type, without quotes.
pub fn get_post_boundary(content_type: &str) -> Option<String> {
    lazy_static! {
        static ref RE: Regex =
            Regex::new(r#"(?i)(?:^|;)\s*boundary\s*=\s*(?:"([^"]*)"|([^;\s]+))"#).unwrap();
    }
    let mut segments = content_type.split(';');
    let mime = segments.next()?.trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    let caps = RE.captures(content_type)?;
    let boundary = caps.get(1).or_else(|| caps.get(2))?.as_str().trim();
    if boundary.is_empty() {
        None
    } else {
        Some(boundary.to_string())
    }
}

fn undo_percent_encoding(path: &str) -> String {
    lazy_static! {
        static ref RE: Regex = Regex::new("%([0-9a-fA-F]{2})").unwrap();
    }
    if !path.contains('%') {
        return path.to_string();
    }
    // Decode to raw bytes first so multi-byte UTF-8 sequences survive.
    let mut bytes = Vec::with_capacity(path.len());
    let mut last = 0;
    for caps in RE.captures_iter(path) {
        let whole = caps.get(0).map(|m| (m.start(), m.end()));
        if let Some((start, end)) = whole {
            bytes.extend_from_slice(path[last..start].as_bytes());
            bytes.push(hex_pair(&caps));
            last = end;
        }
    }
    bytes.extend_from_slice(path[last..].as_bytes());
    String::from_utf8_lossy(&bytes).into_owned()
}

fn hex_pair(caps: &Captures) -> u8 {
    u8::from_str_radix(&caps[1], 16).unwrap_or(b'?')
}

pub struct HttpResponse {
    status: HttpStatus,
    headers: HttpHeaderSet,
    body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: HttpStatus) -> HttpResponse {
        let mut resp = HttpResponse {
            status,
            headers: HttpHeaderSet::new(),
            body: Vec::new(),
        };
        resp.add_header("Server", "loopshare");
        resp
    }

    pub fn add_header(&mut self, key: &str, value: &str) {
        self.headers.push(HttpHeader {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    /// Attach a body along with its `Content-Type` and `Content-Length`.
    pub fn set_body(&mut self, content_type: &str, body: Vec<u8>) {
        self.add_header("Content-Type", content_type);
        self.add_header("Content-Length", &body.len().to_string());
        self.body = body;
    }

    /// Drop the body but keep the headers describing it (HEAD requests).
    pub fn clear_body(&mut self) {
        self.body.clear();
    }

    pub fn status(&self) -> HttpStatus {
        self.status
    }

    pub fn get_code(&self) -> String {
        status_to_code(&self.status).to_string()
    }

    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|header| header.key.eq_ignore_ascii_case(key))
            .map(|header| header.value.as_str())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let leader = format!(
            "{version} {code} {message}\r\n",
            version = version_to_str(&HttpVersion::Http1_1),
            code = status_to_code(&self.status),
            message = status_to_message(&self.status)
        );
        let mut out = Vec::with_capacity(leader.len() + 256 + self.body.len());
        out.extend_from_slice(leader.as_bytes());
        for header in &self.headers {
            out.extend_from_slice(format!("{}: {}\r\n", header.key, header.value).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_line_and_headers() {
        let head = b"POST /upload?x=1 HTTP/1.1\r\nHost: 10.0.0.2:8080\r\nContent-Length: 42\r\nContent-Type: multipart/form-data; boundary=----abc\r\n\r\n";
        let req = HttpRequest::parse_head(head).unwrap();
        assert_eq!(req.method, HttpMethod::POST);
        assert_eq!(req.path, "/upload");
        assert_eq!(req.version, HttpVersion::Http1_1);
        assert_eq!(req.get_header("HOST"), Some("10.0.0.2:8080"));
        assert_eq!(req.content_length, Some(42));
        assert_eq!(req.boundary.as_deref(), Some("----abc"));
    }

    #[test]
    fn unknown_methods_are_kept() {
        let req = HttpRequest::parse_head(b"DELETE / HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(req.method, HttpMethod::Other("DELETE".to_string()));
        assert_eq!(req.version, HttpVersion::Http1_0);
    }

    #[test]
    fn rejects_bad_heads() {
        assert!(matches!(
            HttpRequest::parse_head(b"GET /\r\n\r\n"),
            Err(RequestError::Malformed(_))
        ));
        assert!(matches!(
            HttpRequest::parse_head(b"GET / HTTP/2\r\n\r\n"),
            Err(RequestError::UnsupportedVersion(_))
        ));
        assert!(matches!(
            HttpRequest::parse_head(b"POST / HTTP/1.1\r\nContent-Length: ten\r\n\r\n"),
            Err(RequestError::InvalidContentLength(_))
        ));
        assert!(matches!(
            HttpRequest::parse_head(b"POST / HTTP/1.1\r\nContent-Length: 1\r\nContent-Length: 2\r\n\r\n"),
            Err(RequestError::InvalidContentLength(_))
        ));
        assert!(matches!(
            HttpRequest::parse_head(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n"),
            Err(RequestError::Malformed(_))
        ));
    }

    #[test]
    fn content_length_must_be_plain_digits() {
        for value in ["+5", "-5", "5 5", "0x10", "99999999999999999999999"] {
            let head = format!("POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n", value);
            assert!(
                matches!(
                    HttpRequest::parse_head(head.as_bytes()),
                    Err(RequestError::InvalidContentLength(_))
                ),
                "{:?} was accepted",
                value
            );
        }
        let req = HttpRequest::parse_head(b"POST / HTTP/1.1\r\nContent-Length: 007\r\n\r\n").unwrap();
        assert_eq!(req.content_length, Some(7));
    }

    #[test]
    fn boundary_is_unquoted_and_trimmed() {
        assert_eq!(
            get_post_boundary("multipart/form-data; boundary=\"a b\"").as_deref(),
            Some("a b")
        );
        assert_eq!(
            get_post_boundary("Multipart/Form-Data;boundary=XyZ ; charset=utf-8").as_deref(),
            Some("XyZ")
        );
        assert_eq!(get_post_boundary("multipart/form-data"), None);
        assert_eq!(get_post_boundary("text/plain; boundary=x"), None);
    }

    #[test]
    fn percent_decoding_handles_utf8() {
        assert_eq!(undo_percent_encoding("/caf%C3%A9%20x"), "/café x");
        assert_eq!(undo_percent_encoding("/plain"), "/plain");
    }

    #[test]
    fn response_serialization() {
        let mut resp = HttpResponse::new(HttpStatus::NotFound);
        resp.add_header("Connection", "close");
        resp.set_body("text/plain; charset=utf-8", b"Not Found".to_vec());
        let text = String::from_utf8(resp.to_bytes()).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Content-Length: 9\r\n"));
        assert!(text.ends_with("\r\n\r\nNot Found"));

        resp.clear_body();
        let text = String::from_utf8(resp.to_bytes()).unwrap();
        assert!(text.contains("Content-Length: 9\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }
}
