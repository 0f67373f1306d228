//! The transfer server: listener, event-loop thread, storage worker and
//! discovery record behind a start/stop API.

pub mod state;
pub mod types;

pub use state::StateStore;

use std::fs;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use crate::discovery;
use crate::error::ServerError;
use crate::http::{EventLoop, Waker};
use crate::media::{MediaInspector, SymphoniaInspector};
use crate::storage::{self, Storage};

use types::{ServerConfig, ServerEvent, ServerState};

struct Running {
    port: u16,
    waker: Waker,
    cancel: Arc<AtomicBool>,
    event_loop: thread::JoinHandle<()>,
}

/// Owns everything a running upload server needs.
///
/// `start` binds synchronously and returns the port; all network work then
/// happens on a background thread. `stop` is idempotent and returns once the
/// listening socket has been released.
pub struct TransferServer {
    config: ServerConfig,
    inspector: Arc<dyn MediaInspector>,
    store: Arc<StateStore>,
    running: Option<Running>,
}

impl TransferServer {
    pub fn new(config: ServerConfig, inspector: Arc<dyn MediaInspector>) -> TransferServer {
        TransferServer {
            config,
            inspector,
            store: Arc::new(StateStore::new()),
            running: None,
        }
    }

    /// A server that checks uploads with [`SymphoniaInspector`].
    pub fn with_default_inspector(config: ServerConfig) -> TransferServer {
        TransferServer::new(config, Arc::new(SymphoniaInspector))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn start(&mut self) -> Result<u16, ServerError> {
        if let Some(running) = &self.running {
            return Err(ServerError::AlreadyRunning(running.port));
        }
        match self.spawn() {
            Ok(running) => {
                let port = running.port;
                self.running = Some(running);
                Ok(port)
            }
            Err(e) => {
                tracing::error!(error = %e, "server: start failed");
                self.store.update(|s| {
                    s.running = false;
                    s.last_error = Some(e.kind());
                });
                Err(e)
            }
        }
    }

    fn spawn(&self) -> Result<Running, ServerError> {
        let config = &self.config;

        fs::create_dir_all(&config.storage_dir).map_err(|source| ServerError::StorageDir {
            path: config.storage_dir.display().to_string(),
            source,
        })?;
        match storage::cleanup_temp_files(&config.storage_dir) {
            Ok(0) => {}
            Ok(n) => tracing::info!(removed = n, "server: removed stale partial uploads"),
            Err(e) => tracing::warn!(error = %e, "server: could not scan storage directory"),
        }

        let listener = bind_listener(config.bind_host, config.preferred_port)?;
        listener.set_nonblocking(true).map_err(ServerError::Thread)?;
        let port = listener
            .local_addr()
            .map_err(ServerError::Thread)?
            .port();

        let (wake_rx, wake_tx) = UnixStream::pair().map_err(ServerError::Thread)?;
        wake_rx.set_nonblocking(true).map_err(ServerError::Thread)?;
        wake_tx.set_nonblocking(true).map_err(ServerError::Thread)?;
        let waker = Waker::new(wake_tx);

        let cancel = Arc::new(AtomicBool::new(false));
        let worker = Storage::new(
            config.storage_dir.clone(),
            Arc::clone(&self.inspector),
            config.reject_non_audio,
            Arc::clone(&cancel),
        );
        let (outcome_tx, outcome_rx) = mpsc::channel();
        let notify = waker.clone();
        // The worker exits on its own once the event loop drops the job sender.
        let (jobs, _storage_thread) =
            storage::spawn_worker(worker, outcome_tx, move || notify.poke())
                .map_err(ServerError::Thread)?;

        let local_address = discovery::display_address(config.bind_host);
        self.store.update(|s| {
            *s = ServerState {
                running: true,
                port,
                local_address: local_address.clone(),
                ..ServerState::default()
            };
        });

        let mut event_loop = EventLoop::new(
            listener,
            wake_rx,
            config.clone(),
            Arc::clone(&self.store),
            jobs,
            outcome_rx,
        );
        let advertise = config.advertise;
        let service_name = config.service_name.clone();
        let bind = SocketAddr::new(config.bind_host.into(), port);
        let store = Arc::clone(&self.store);
        let event_loop = thread::Builder::new()
            .name("loopshare-http".to_string())
            .spawn(move || {
                let advertiser = if advertise {
                    discovery::spawn_mdns_advertiser(&service_name, bind)
                } else {
                    None
                };
                if let Some(adv) = &advertiser {
                    let name = adv.instance_name().to_string();
                    store.update(|s| s.service_name = Some(name));
                }

                event_loop.run();
                drop(event_loop);

                if let Some(adv) = advertiser {
                    // Withdrawing the record can take a while; stop() must not wait on it.
                    let _ = thread::Builder::new()
                        .name("loopshare-mdns".to_string())
                        .spawn(move || adv.shutdown());
                }
            })
            .map_err(ServerError::Thread)?;

        tracing::info!(
            addr = %local_address,
            port,
            dir = %config.storage_dir.display(),
            "server: listening"
        );
        Ok(Running {
            port,
            waker,
            cancel,
            event_loop,
        })
    }

    /// Stop serving. Pending uploads are cancelled and never become visible.
    pub fn stop(&mut self) {
        let running = match self.running.take() {
            Some(r) => r,
            None => return,
        };
        running.cancel.store(true, Ordering::SeqCst);
        running.waker.quit();
        if running.event_loop.join().is_err() {
            tracing::error!("server: event loop panicked");
        }
        self.store.update(|s| *s = ServerState::default());
        tracing::info!(port = running.port, "server: stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn state(&self) -> ServerState {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> mpsc::Receiver<ServerEvent> {
        self.store.subscribe()
    }

    pub fn url(&self) -> Option<String> {
        self.store.snapshot().url()
    }
}

impl Drop for TransferServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Bind the preferred port, falling back to one the OS picks.
fn bind_listener(host: Ipv4Addr, preferred: u16) -> Result<TcpListener, ServerError> {
    let start_failed = |port: u16, source: io::Error| ServerError::StartFailed {
        host: host.to_string(),
        port,
        source,
    };
    match TcpListener::bind((host, preferred)) {
        Ok(listener) => Ok(listener),
        Err(e) if preferred != 0 => {
            tracing::warn!(port = preferred, error = %e, "server: port unavailable, using any free port");
            TcpListener::bind((host, 0)).map_err(|source| start_failed(preferred, source))
        }
        Err(source) => Err(start_failed(preferred, source)),
    }
}
