//! `multipart/form-data` extraction over a fully buffered body.
//!
//! Boundaries are matched as raw bytes, since file payloads are binary. Every
//! part must be closed by `\r\n--{boundary}` and the body must end with the
//! terminal `--{boundary}--`; anything short of that is a truncated upload and
//! is never returned as file content.

pub mod types;

use regex::Regex;

use crate::http::boyer_moore::find_body_start_from;
use crate::http::boyer_moore::types::Delimiter;

pub use types::{MultipartError, UploadedFile};
use types::Part;

const MAX_FILENAME_BYTES: usize = 255;

/// Extract the first part that carries a `filename`.
pub fn extract_file(body: &[u8], boundary: &str) -> Result<UploadedFile, MultipartError> {
    let parts = parse_parts(body, boundary)?;
    let part = parts
        .iter()
        .find(|p| p.filename.is_some())
        .ok_or(MultipartError::MissingFilename)?;
    let raw_name = part.filename.as_deref().unwrap_or_default();
    let filename = sanitize_filename(raw_name)?;
    Ok(UploadedFile::new(filename, body[part.data.clone()].to_vec()))
}

/// Like [`extract_file`], but when no part names a file, fall back to the
/// `file` field (or the first part) stored under `fallback_name`.
pub fn extract_file_or(
    body: &[u8],
    boundary: &str,
    fallback_name: &str,
) -> Result<UploadedFile, MultipartError> {
    let parts = parse_parts(body, boundary)?;
    if let Some(part) = parts.iter().find(|p| p.filename.is_some()) {
        let raw_name = part.filename.as_deref().unwrap_or_default();
        let filename = sanitize_filename(raw_name)?;
        return Ok(UploadedFile::new(filename, body[part.data.clone()].to_vec()));
    }
    let part = parts
        .iter()
        .find(|p| p.name.as_deref() == Some("file"))
        .or_else(|| parts.first())
        .ok_or(MultipartError::NoParts)?;
    let filename = sanitize_filename(fallback_name)?;
    Ok(UploadedFile::new(filename, body[part.data.clone()].to_vec()))
}

pub(crate) fn parse_parts(body: &[u8], boundary: &str) -> Result<Vec<Part>, MultipartError> {
    if boundary.is_empty() {
        return Err(MultipartError::InvalidBoundary);
    }
    let opening = format!("--{}", boundary);
    let opening_delim =
        Delimiter::new(opening.as_bytes()).ok_or(MultipartError::InvalidBoundary)?;
    let closing_delim = Delimiter::new(format!("\r\n--{}", boundary).as_bytes())
        .ok_or(MultipartError::InvalidBoundary)?;

    let first = opening_delim
        .find_from(body, 0)
        .ok_or(MultipartError::BoundaryNotFound)?;
    let mut pos = first + opening_delim.len();
    let mut parts = Vec::new();

    loop {
        // Right after a delimiter: `--` ends the body, CRLF starts a part.
        let rest = &body[pos..];
        if rest.len() < 2 {
            return Err(MultipartError::TruncatedBody);
        }
        if rest.starts_with(b"--") {
            break;
        }
        if !rest.starts_with(b"\r\n") {
            return Err(MultipartError::MalformedPart(
                "boundary is not followed by CRLF".to_string(),
            ));
        }
        let headers_start = pos + 2;

        // Back up over the CRLF so a part with no headers still matches.
        let payload_start =
            find_body_start_from(body, pos).ok_or(MultipartError::TruncatedBody)?;
        let headers_end = payload_start - 4;
        let headers = if headers_end > headers_start {
            String::from_utf8_lossy(&body[headers_start..headers_end]).into_owned()
        } else {
            String::new()
        };

        let payload_end = closing_delim
            .find_from(body, payload_start)
            .ok_or(MultipartError::TruncatedBody)?;

        let (name, filename) = parse_part_headers(&headers)?;
        parts.push(Part {
            name,
            filename,
            data: payload_start..payload_end,
        });

        pos = payload_end + closing_delim.len();
    }

    if parts.is_empty() {
        return Err(MultipartError::NoParts);
    }
    Ok(parts)
}

fn parse_part_headers(headers: &str) -> Result<(Option<String>, Option<String>), MultipartError> {
    lazy_static! {
        static ref NAME_RE: Regex =
            Regex::new(r#"(?i)(?:^|;)\s*name\s*=\s*(?:"((?:[^"\\]|\\.)*)"|([^;]*))"#).unwrap();
        static ref FILENAME_RE: Regex =
            Regex::new(r#"(?i)(?:^|;)\s*filename\s*=\s*(?:"((?:[^"\\]|\\.)*)"|([^;]*))"#)
                .unwrap();
    }

    let mut disposition: Option<&str> = None;
    for line in headers.split("\r\n") {
        if let Some((head, val)) = line.split_once(':') {
            if head.trim().eq_ignore_ascii_case("content-disposition") {
                disposition = Some(val.trim());
                break;
            }
        }
    }
    let info = match disposition {
        Some(info) => info,
        None => {
            return Err(MultipartError::MalformedPart(
                "part has no Content-Disposition header".to_string(),
            ))
        }
    };

    let param = |re: &Regex| -> Option<String> {
        let caps = re.captures(info)?;
        let value = match caps.get(1) {
            Some(quoted) => quoted.as_str().replace("\\\"", "\"").replace("\\\\", "\\"),
            None => caps.get(2)?.as_str().trim().to_string(),
        };
        Some(value)
    };

    let name = param(&*NAME_RE);
    // An empty filename is what browsers send for an unused file input.
    let filename = param(&*FILENAME_RE).filter(|f| !f.is_empty());
    Ok((name, filename))
}

/// Reduce a client-supplied name to a bare, printable file name.
pub fn sanitize_filename(raw: &str) -> Result<String, MultipartError> {
    let last = raw.rsplit(|c| c == '/' || c == '\\').next().unwrap_or("");
    let cleaned: String = last.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return Err(MultipartError::InvalidFilename(raw.to_string()));
    }
    if cleaned.len() <= MAX_FILENAME_BYTES {
        return Ok(cleaned.to_string());
    }
    let mut end = MAX_FILENAME_BYTES;
    while !cleaned.is_char_boundary(end) {
        end -= 1;
    }
    Ok(cleaned[..end].to_string())
}
