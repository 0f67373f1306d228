use std::ops::Range;

use thiserror::Error;

use crate::error::ErrorKind;

/// A file pulled out of a multipart body, ready to be persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub size_bytes: usize,
}

impl UploadedFile {
    pub fn new(filename: String, bytes: Vec<u8>) -> UploadedFile {
        let size_bytes = bytes.len();
        UploadedFile {
            filename,
            bytes,
            size_bytes,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Part {
    pub name: Option<String>,
    pub filename: Option<String>,
    pub data: Range<usize>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MultipartError {
    #[error("multipart boundary is empty or unusable")]
    InvalidBoundary,
    #[error("body does not contain the multipart boundary")]
    BoundaryNotFound,
    #[error("multipart body contains no parts")]
    NoParts,
    #[error("malformed multipart part: {0}")]
    MalformedPart(String),
    #[error("no part carries a filename")]
    MissingFilename,
    #[error("invalid filename: {0:?}")]
    InvalidFilename(String),
    #[error("multipart body ends before its closing boundary")]
    TruncatedBody,
}

impl MultipartError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ParseFailure
    }
}
