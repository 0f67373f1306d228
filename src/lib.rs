//! loopshare: a small local-network upload server.
//!
//! A desktop browser opens the served page, picks an audio (or video) file and
//! posts it to `/upload`. The server is written directly against TCP sockets:
//! requests and `multipart/form-data` bodies are parsed byte-by-byte inside a
//! `select(2)` event loop, and received files are persisted by a sequential
//! storage worker before the embedding application is notified through
//! [`server::StateStore`] events.

#[macro_use]
extern crate lazy_static;

pub mod discovery;
pub mod error;
pub mod http;
pub mod media;
pub mod server;
pub mod storage;

pub use error::ErrorKind;
pub use server::types::{ConnectionId, ReceivedFile, ServerConfig, ServerEvent, ServerState};
pub use server::{StateStore, TransferServer};
