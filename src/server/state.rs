use std::sync::mpsc;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::types::{ServerEvent, ServerState};

struct Inner {
    state: ServerState,
    subscribers: Vec<mpsc::Sender<ServerEvent>>,
}

/// Owner of the published [`ServerState`].
///
/// Readers take snapshots or subscribe to a channel of [`ServerEvent`]s; only
/// the event loop and `TransferServer::start`/`stop` mutate it, always through
/// [`StateStore::update`], which broadcasts the new state when it changed.
pub struct StateStore {
    inner: Mutex<Inner>,
}

impl StateStore {
    pub fn new() -> StateStore {
        StateStore {
            inner: Mutex::new(Inner {
                state: ServerState::default(),
                subscribers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> ServerState {
        self.lock().state.clone()
    }

    /// New subscribers immediately receive the current state.
    pub fn subscribe(&self) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel();
        let mut inner = self.lock();
        let _ = tx.send(ServerEvent::State(inner.state.clone()));
        inner.subscribers.push(tx);
        rx
    }

    pub(crate) fn update<F>(&self, f: F) -> ServerState
    where
        F: FnOnce(&mut ServerState),
    {
        let mut inner = self.lock();
        let before = inner.state.clone();
        f(&mut inner.state);
        let after = inner.state.clone();
        if after != before {
            broadcast(&mut inner.subscribers, ServerEvent::State(after.clone()));
        }
        after
    }

    pub(crate) fn emit(&self, event: ServerEvent) {
        let mut inner = self.lock();
        broadcast(&mut inner.subscribers, event);
    }
}

impl Default for StateStore {
    fn default() -> Self {
        StateStore::new()
    }
}

fn broadcast(subscribers: &mut Vec<mpsc::Sender<ServerEvent>>, event: ServerEvent) {
    // Dropped receivers are pruned on the way.
    subscribers.retain(|tx| tx.send(event.clone()).is_ok());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::types::ConnectionId;

    #[test]
    fn subscribers_see_current_then_changes() {
        let store = StateStore::new();
        let rx = store.subscribe();
        assert_eq!(rx.try_recv().unwrap(), ServerEvent::State(ServerState::default()));

        store.update(|s| s.running = true);
        match rx.try_recv().unwrap() {
            ServerEvent::State(s) => assert!(s.running),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn unchanged_updates_are_not_broadcast() {
        let store = StateStore::new();
        let rx = store.subscribe();
        let _ = rx.try_recv();
        store.update(|s| s.running = false);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let store = StateStore::new();
        drop(store.subscribe());
        let rx = store.subscribe();
        store.update(|s| {
            s.active_connections
                .insert(ConnectionId("127.0.0.1:4000".parse().unwrap()));
        });
        assert_eq!(store.lock().subscribers.len(), 1);
        assert_eq!(rx.iter().take(2).count(), 2);
    }
}
