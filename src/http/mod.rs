pub mod boyer_moore;
pub mod http_core;
pub mod multipart;
pub mod rendering;
pub mod request_buffer;
pub mod router;

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::{mpsc, Arc};
use std::time::Instant;

use nix::errno::Errno;
use nix::sys::select::{select, FdSet};
use nix::sys::time::{TimeVal, TimeValLike};

use crate::server::types::{ConnectionId, ServerConfig, ServerEvent};
use crate::server::StateStore;
use crate::storage::{StorageError, StorageJob, StorageOutcome};

use http_core::types::{RequestError, ResponseBytes};
use http_core::{HttpMethod, HttpResponse};
use request_buffer::types::ReadStatus;
use request_buffer::RequestBuffer;
use router::{RouteContext, RouteOutcome};

const READ_CHUNK: usize = 64 * 1024;
// Reads per readiness event, so one fast uploader cannot starve the rest.
const READS_PER_TURN: usize = 16;
const TICK_MS: i64 = 250;
// Publish progress in steps of at least this much.
const PROGRESS_STEP: f32 = 0.01;

const WAKE_POKE: u8 = b'p';
const WAKE_QUIT: u8 = b'q';

/// Write side of the event loop's wake-up socket.
#[derive(Clone)]
pub(crate) struct Waker(Arc<UnixStream>);

impl Waker {
    pub(crate) fn new(stream: UnixStream) -> Waker {
        Waker(Arc::new(stream))
    }

    fn send(&self, byte: u8) {
        match (&*self.0).write(&[byte]) {
            Ok(_) => {}
            // A full socket already holds a pending wake-up.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => tracing::debug!(error = %e, "http: wake-up not delivered"),
        }
    }

    /// Make the loop run another iteration.
    pub(crate) fn poke(&self) {
        self.send(WAKE_POKE);
    }

    /// Make the loop close everything and return.
    pub(crate) fn quit(&self) {
        self.send(WAKE_QUIT);
    }
}

/// Lifecycle of one connection; only ever moves forward.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum ConnectionState {
    Accepted,
    AwaitingHeaders,
    AwaitingBody,
    Processing,
    WritingResponse,
    Closed,
}

pub struct HttpConnection {
    pub id: ConnectionId,
    stream: TcpStream,
    state: ConnectionState,
    // Taken once the request is complete.
    buffer: Option<RequestBuffer>,
    response: Option<ResponseBytes>,
    // Set while an upload from this connection sits with the storage worker.
    token: Option<u64>,
    last_activity: Instant,

    method: Option<HttpMethod>,
    path: Option<String>,
    code: Option<String>,
}

impl HttpConnection {
    fn new(stream: TcpStream, id: ConnectionId, buffer: RequestBuffer) -> HttpConnection {
        HttpConnection {
            id,
            stream,
            state: ConnectionState::Accepted,
            buffer: Some(buffer),
            response: None,
            token: None,
            last_activity: Instant::now(),
            method: None,
            path: None,
            code: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Move to `next`. Backward moves, and anything after `Closed`, are refused.
    pub fn advance(&mut self, next: ConnectionState) -> bool {
        if next <= self.state {
            tracing::warn!(
                peer = %self.id,
                from = ?self.state,
                to = ?next,
                "http: refused connection state transition"
            );
            return false;
        }
        self.state = next;
        true
    }

    fn close(&mut self) {
        if self.state != ConnectionState::Closed {
            let _ = self.stream.shutdown(Shutdown::Both);
            self.state = ConnectionState::Closed;
        }
    }

    fn is_reading(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::AwaitingHeaders | ConnectionState::AwaitingBody
        )
    }

    /// Queue `resp` and try to push it out right away.
    fn respond(&mut self, resp: HttpResponse) {
        self.code = Some(resp.get_code());
        self.response = Some(ResponseBytes::new(resp.to_bytes()));
        self.buffer = None;
        if self.state < ConnectionState::Processing {
            self.advance(ConnectionState::Processing);
        }
        self.advance(ConnectionState::WritingResponse);
        self.write_partial_response();
    }

    fn write_partial_response(&mut self) {
        let response = match self.response.as_mut() {
            Some(r) => r,
            None => {
                self.close();
                return;
            }
        };
        match response.partial_write_to_stream(&mut self.stream) {
            Ok(n) => {
                if n > 0 {
                    self.last_activity = Instant::now();
                }
                if response.is_done() {
                    let _ = self.stream.flush();
                    self.close();
                }
            }
            Err(e) => {
                tracing::debug!(peer = %self.id, error = %e, "http: write failed");
                self.close();
            }
        }
    }

    /// Upload progress as (received, expected) body bytes, if an upload is in flight.
    fn upload_progress(&self) -> Option<(usize, usize)> {
        if self.state != ConnectionState::AwaitingBody {
            return None;
        }
        let buffer = self.buffer.as_ref()?;
        let head = buffer.request_head()?;
        if head.method != HttpMethod::POST {
            return None;
        }
        Some((buffer.body_received(), buffer.expected_body_len()?))
    }

    fn history_line(&self) -> String {
        let peer = match self.id.0 {
            SocketAddr::V4(addr) => format!("{}:{}", addr.ip(), addr.port()),
            SocketAddr::V6(addr) => format!("[{}]:{}", addr.ip(), addr.port()),
        };
        format!(
            "{:<22} {} {:<4} {}",
            peer,
            self.code.as_deref().unwrap_or("   "),
            self.method.as_ref().map(|m| m.as_str()).unwrap_or("???"),
            self.path.as_deref().unwrap_or("[No path...]")
        )
    }
}

enum Wakeup {
    Continue,
    Quit,
}

/// The connection manager: one thread, one `select(2)`, every socket.
pub(crate) struct EventLoop {
    listener: TcpListener,
    wake: UnixStream,
    config: ServerConfig,
    store: Arc<StateStore>,
    jobs: mpsc::Sender<StorageJob>,
    outcomes: mpsc::Receiver<StorageOutcome>,
    connections: HashMap<RawFd, HttpConnection>,
    scratch: Box<[u8]>,
    next_token: u64,
    last_progress: f32,
}

impl EventLoop {
    pub(crate) fn new(
        listener: TcpListener,
        wake: UnixStream,
        config: ServerConfig,
        store: Arc<StateStore>,
        jobs: mpsc::Sender<StorageJob>,
        outcomes: mpsc::Receiver<StorageOutcome>,
    ) -> EventLoop {
        EventLoop {
            listener,
            wake,
            config,
            store,
            jobs,
            outcomes,
            connections: HashMap::new(),
            scratch: vec![0u8; READ_CHUNK].into_boxed_slice(),
            next_token: 1,
            last_progress: 0.0,
        }
    }

    pub(crate) fn run(&mut self) {
        let l_raw_fd = self.listener.as_raw_fd();
        let wake_fd = self.wake.as_raw_fd();

        'main: loop {
            let mut r_fds = FdSet::new();
            let mut w_fds = FdSet::new();
            let mut e_fds = FdSet::new();

            r_fds.insert(l_raw_fd);
            e_fds.insert(l_raw_fd);
            r_fds.insert(wake_fd);

            for (fd, conn) in &self.connections {
                match conn.state {
                    ConnectionState::AwaitingHeaders | ConnectionState::AwaitingBody => {
                        r_fds.insert(*fd);
                    }
                    ConnectionState::WritingResponse => {
                        w_fds.insert(*fd);
                    }
                    _ => {}
                }
                e_fds.insert(*fd);
            }

            let mut timeout = TimeVal::milliseconds(TICK_MS);
            match select(
                None,
                Some(&mut r_fds),
                Some(&mut w_fds),
                Some(&mut e_fds),
                Some(&mut timeout),
            ) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    tracing::error!(error = %e, "http: select failed");
                    break 'main;
                }
            }

            if r_fds.contains(wake_fd) {
                if let Wakeup::Quit = self.drain_wakeups() {
                    break 'main;
                }
            }
            if e_fds.contains(l_raw_fd) {
                tracing::error!("http: listener socket has errored");
                break 'main;
            }

            self.collect_storage_outcomes();

            let ready: Vec<(RawFd, bool, bool, bool)> = self
                .connections
                .keys()
                .map(|fd| (*fd, r_fds.contains(*fd), w_fds.contains(*fd), e_fds.contains(*fd)))
                .filter(|&(_, r, w, e)| r || w || e)
                .collect();
            for (fd, readable, writable, errored) in ready {
                self.service(fd, readable, writable, errored);
            }

            if r_fds.contains(l_raw_fd) {
                self.accept_connections();
            }

            self.expire_idle();
            self.reap_closed();
            self.publish_progress();
        }

        self.close_all();
    }

    fn drain_wakeups(&mut self) -> Wakeup {
        let mut buf = [0u8; 64];
        loop {
            match self.wake.read(&mut buf) {
                // Every write end is gone: nobody can stop us any more.
                Ok(0) => return Wakeup::Quit,
                Ok(n) => {
                    if buf[..n].contains(&WAKE_QUIT) {
                        return Wakeup::Quit;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Wakeup::Continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::error!(error = %e, "http: wake-up socket failed");
                    return Wakeup::Quit;
                }
            }
        }
    }

    fn accept_connections(&mut self) {
        loop {
            let (stream, addr) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "http: accept failed");
                    return;
                }
            };
            let id = ConnectionId(addr);

            if self.connections.len() >= self.config.max_connections {
                drop(stream);
                let rejected = self.store.update(|s| s.rejected_connections += 1);
                tracing::info!(
                    peer = %id,
                    limit = self.config.max_connections,
                    total_rejected = rejected.rejected_connections,
                    "http: connection rejected"
                );
                continue;
            }
            if let Err(e) = stream.set_nonblocking(true) {
                tracing::warn!(peer = %id, error = %e, "http: could not configure socket");
                continue;
            }

            let mut conn =
                HttpConnection::new(stream, id, RequestBuffer::new(self.config.buffer_limits()));
            conn.advance(ConnectionState::AwaitingHeaders);
            let fd = conn.stream.as_raw_fd();
            self.connections.insert(fd, conn);
            self.store.update(|s| {
                s.active_connections.insert(id);
            });
            tracing::debug!(peer = %id, "http: connection accepted");
        }
    }

    fn service(&mut self, fd: RawFd, readable: bool, writable: bool, errored: bool) {
        let conn = match self.connections.get_mut(&fd) {
            Some(c) => c,
            None => return,
        };
        if errored {
            tracing::debug!(peer = %conn.id, "http: bad state on client socket");
            conn.close();
            return;
        }
        if readable && conn.is_reading() {
            self.read_partial_request(fd);
        } else if writable && conn.state == ConnectionState::WritingResponse {
            conn.write_partial_response();
        }
    }

    fn read_partial_request(&mut self, fd: RawFd) {
        let conn = match self.connections.get_mut(&fd) {
            Some(c) => c,
            None => return,
        };

        for _ in 0..READS_PER_TURN {
            let n = match conn.stream.read(&mut self.scratch) {
                Ok(0) => {
                    let err = match conn.buffer.as_ref() {
                        Some(buffer) => buffer.eof_error(),
                        None => RequestError::Malformed("connection closed".to_string()),
                    };
                    fail_request(conn, err);
                    return;
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!(peer = %conn.id, error = %e, "http: read failed");
                    conn.close();
                    return;
                }
            };
            conn.last_activity = Instant::now();

            let status = match conn.buffer.as_mut() {
                Some(buffer) => buffer.feed(&self.scratch[..n]),
                None => return,
            };
            match status {
                Ok(ReadStatus::AwaitingHeaders) => {}
                Ok(ReadStatus::AwaitingBody) => {
                    if conn.state == ConnectionState::AwaitingHeaders {
                        note_request_line(conn);
                        conn.advance(ConnectionState::AwaitingBody);
                    }
                }
                Ok(ReadStatus::Complete) => {
                    self.dispatch(fd);
                    return;
                }
                Err(e) => {
                    fail_request(conn, e);
                    return;
                }
            }
        }
    }

    fn dispatch(&mut self, fd: RawFd) {
        let conn = match self.connections.get_mut(&fd) {
            Some(c) => c,
            None => return,
        };
        let req = match conn.buffer.take().and_then(RequestBuffer::into_request) {
            Some(req) => req,
            None => {
                conn.respond(router::internal_error());
                return;
            }
        };
        conn.method = Some(req.method.clone());
        conn.path = Some(req.path.clone());
        if conn.state < ConnectionState::Processing {
            conn.advance(ConnectionState::Processing);
        }

        let ctx = RouteContext {
            max_file_size: self.config.max_file_size,
        };
        match router::route(&req, &ctx) {
            RouteOutcome::Respond(resp) => conn.respond(resp),
            RouteOutcome::Store(file) => {
                let token = self.next_token;
                self.next_token += 1;
                tracing::info!(
                    peer = %conn.id,
                    filename = %file.filename,
                    bytes = file.size_bytes,
                    "http: upload parsed, queued for storage"
                );
                if self.jobs.send(StorageJob { token, file }).is_err() {
                    tracing::error!("http: storage worker is gone");
                    self.store
                        .update(|s| s.last_error = Some(crate::ErrorKind::StorageWriteFailed));
                    conn.respond(router::internal_error());
                    return;
                }
                conn.token = Some(token);
            }
        }
    }

    fn collect_storage_outcomes(&mut self) {
        while let Ok(outcome) = self.outcomes.try_recv() {
            match &outcome.result {
                Ok(received) => {
                    self.store.update(|s| {
                        s.received_file_path = Some(received.path.clone());
                        s.transfer_progress = 1.0;
                        s.last_error = None;
                    });
                    self.last_progress = 1.0;
                    self.store.emit(ServerEvent::FileReceived(received.clone()));
                }
                Err(StorageError::Cancelled) => {}
                Err(e) => {
                    let kind = e.kind();
                    self.store.update(|s| s.last_error = Some(kind));
                }
            }

            let conn = self
                .connections
                .values_mut()
                .find(|c| c.token == Some(outcome.token));
            match conn {
                Some(conn) => {
                    conn.token = None;
                    conn.respond(router::upload_response(&outcome.result));
                }
                None => tracing::debug!(
                    token = outcome.token,
                    "http: storage finished for a connection that is gone"
                ),
            }
        }
    }

    fn expire_idle(&mut self) {
        let idle_timeout = self.config.idle_timeout;
        for conn in self.connections.values_mut() {
            if conn.last_activity.elapsed() < idle_timeout {
                continue;
            }
            match conn.state {
                ConnectionState::AwaitingHeaders | ConnectionState::AwaitingBody => {
                    tracing::info!(peer = %conn.id, "http: idle timeout");
                    fail_request(conn, RequestError::Timeout);
                }
                ConnectionState::WritingResponse => {
                    tracing::info!(peer = %conn.id, "http: peer stopped reading, closing");
                    conn.close();
                }
                _ => {}
            }
        }
    }

    fn reap_closed(&mut self) {
        let closed: Vec<RawFd> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.state == ConnectionState::Closed)
            .map(|(fd, _)| *fd)
            .collect();
        for fd in closed {
            if let Some(conn) = self.connections.remove(&fd) {
                self.release(conn);
            }
        }
    }

    /// Forget a connection. Called once per connection, after it left the map.
    fn release(&self, conn: HttpConnection) {
        if conn.method.is_some() || conn.code.is_some() {
            let line = conn.history_line();
            tracing::info!(peer = %conn.id, "{}", line.trim_end());
            self.store.emit(ServerEvent::Request(line));
        }
        let id = conn.id;
        self.store.update(|s| {
            if !s.active_connections.remove(&id) {
                tracing::warn!(peer = %id, "http: connection was already released");
            }
        });
    }

    fn publish_progress(&mut self) {
        let (received, expected) = self
            .connections
            .values()
            .filter_map(HttpConnection::upload_progress)
            .fold((0usize, 0usize), |(r, e), (cr, ce)| (r + cr, e + ce));
        if expected == 0 {
            return;
        }
        let progress = (received as f64 / expected as f64).min(1.0) as f32;
        if (progress - self.last_progress).abs() < PROGRESS_STEP {
            return;
        }
        self.last_progress = progress;
        self.store.update(|s| s.transfer_progress = progress);
    }

    fn close_all(&mut self) {
        let fds: Vec<RawFd> = self.connections.keys().copied().collect();
        for fd in fds {
            if let Some(mut conn) = self.connections.remove(&fd) {
                conn.close();
                self.release(conn);
            }
        }
        tracing::debug!("http: event loop stopped");
    }
}

/// Remember what was asked for, for the history line.
fn note_request_line(conn: &mut HttpConnection) {
    if let Some(head) = conn.buffer.as_ref().and_then(RequestBuffer::request_head) {
        conn.method = Some(head.method.clone());
        conn.path = Some(head.path.clone());
    }
}

fn fail_request(conn: &mut HttpConnection, err: RequestError) {
    note_request_line(conn);
    tracing::info!(peer = %conn.id, kind = ?err.kind(), error = %err, "http: request failed");
    conn.respond(router::request_error_response(&err));
}
