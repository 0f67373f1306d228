/// Caps applied while a request is accumulated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferLimits {
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadStatus {
    AwaitingHeaders,
    AwaitingBody,
    Complete,
}
