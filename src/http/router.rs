use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::ErrorKind;
use crate::http::http_core::types::RequestError;
use crate::http::http_core::{HttpMethod, HttpRequest, HttpResponse, HttpStatus};
use crate::http::multipart::{extract_file_or, UploadedFile};
use crate::http::rendering::{format_size, render_status_json, render_upload_page, Language};
use crate::server::types::{ReceivedFile, MULTIPART_OVERHEAD};
use crate::storage::StorageError;

const HTML_TYPE: &str = "text/html; charset=utf-8";
const JSON_TYPE: &str = "application/json";
const TEXT_TYPE: &str = "text/plain; charset=utf-8";

pub const UPLOAD_SUCCESS_MESSAGE: &str = "File uploaded successfully";
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

pub struct RouteContext {
    pub max_file_size: usize,
}

/// What the connection should do next with a complete request.
pub enum RouteOutcome {
    Respond(HttpResponse),
    /// A parsed upload waiting to be persisted; answered by [`upload_response`].
    Store(UploadedFile),
}

pub fn route(req: &HttpRequest, ctx: &RouteContext) -> RouteOutcome {
    match (&req.method, req.path.as_str()) {
        (HttpMethod::GET, "/") | (HttpMethod::GET, "/index.html") => {
            RouteOutcome::Respond(upload_page(req, ctx))
        }
        (HttpMethod::HEAD, "/") | (HttpMethod::HEAD, "/index.html") => {
            let mut resp = upload_page(req, ctx);
            resp.clear_body();
            RouteOutcome::Respond(resp)
        }
        (HttpMethod::POST, "/upload") => match accept_upload(req, ctx) {
            Ok(file) => RouteOutcome::Store(file),
            Err((kind, message)) => {
                tracing::info!(kind = ?kind, reason = %message, "router: upload refused");
                RouteOutcome::Respond(json_response(HttpStatus::BadRequest, false, &message))
            }
        },
        _ => RouteOutcome::Respond(not_found()),
    }
}

fn base_response(status: HttpStatus) -> HttpResponse {
    let mut resp = HttpResponse::new(status);
    resp.add_header("Connection", "close");
    resp
}

fn upload_page(req: &HttpRequest, ctx: &RouteContext) -> HttpResponse {
    let language = Language::from_accept_language(req.get_header("Accept-Language"));
    let mut resp = base_response(HttpStatus::OK);
    resp.add_header("Cache-Control", "no-store");
    resp.set_body(
        HTML_TYPE,
        render_upload_page(language, ctx.max_file_size).into_bytes(),
    );
    resp
}

pub fn not_found() -> HttpResponse {
    let mut resp = base_response(HttpStatus::NotFound);
    resp.set_body(TEXT_TYPE, b"Not Found".to_vec());
    resp
}

pub fn json_response(status: HttpStatus, success: bool, message: &str) -> HttpResponse {
    let mut resp = base_response(status);
    resp.set_body(JSON_TYPE, render_status_json(success, message));
    resp
}

fn accept_upload(
    req: &HttpRequest,
    ctx: &RouteContext,
) -> Result<UploadedFile, (ErrorKind, String)> {
    let boundary = req.boundary.as_deref().ok_or_else(|| {
        (
            ErrorKind::MissingBoundary,
            "Missing multipart boundary".to_string(),
        )
    })?;
    let declared = req.content_length.ok_or_else(|| {
        (
            ErrorKind::InvalidContentLength,
            "Missing Content-Length".to_string(),
        )
    })?;
    if declared == 0 {
        return Err((ErrorKind::InvalidContentLength, "Empty request body".to_string()));
    }
    if declared > ctx.max_file_size.saturating_add(MULTIPART_OVERHEAD) {
        return Err((ErrorKind::BodyTooLarge, too_large_message(ctx.max_file_size)));
    }

    let file = extract_file_or(&req.body, boundary, &generated_filename())
        .map_err(|e| (e.kind(), capitalize(&e.to_string())))?;
    if file.size_bytes > ctx.max_file_size {
        return Err((ErrorKind::BodyTooLarge, too_large_message(ctx.max_file_size)));
    }
    Ok(file)
}

fn too_large_message(limit: usize) -> String {
    format!("File exceeds the {} limit", format_size(limit))
}

/// Name for a file part that arrived without one.
fn generated_filename() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("upload-{}.bin", secs)
}

fn capitalize(message: &str) -> String {
    let mut chars = message.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// The answer to an upload once storage has finished with it.
pub fn upload_response(result: &Result<ReceivedFile, StorageError>) -> HttpResponse {
    match result {
        Ok(_) => json_response(HttpStatus::OK, true, UPLOAD_SUCCESS_MESSAGE),
        Err(StorageError::NotAudio(_)) => json_response(
            HttpStatus::BadRequest,
            false,
            "The uploaded file does not contain an audio track",
        ),
        Err(StorageError::WriteFailed { .. }) => {
            json_response(HttpStatus::ServerError, false, INTERNAL_ERROR_MESSAGE)
        }
        Err(StorageError::Cancelled) => json_response(
            HttpStatus::ServiceUnavailable,
            false,
            "Server is shutting down",
        ),
    }
}

/// The answer to a request that could not be read.
pub fn request_error_response(err: &RequestError) -> HttpResponse {
    json_response(err.status(), false, &capitalize(&err.to_string()))
}

/// The answer when the storage worker is gone.
pub fn internal_error() -> HttpResponse {
    json_response(HttpStatus::ServerError, false, INTERNAL_ERROR_MESSAGE)
}
