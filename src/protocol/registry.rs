//! Process-wide set of live connections.
//!
//! Every connection's worker reads and mutates the registry (CONNECTIONS, KILL,
//! SESSIONID), so it is guarded internally. Session-held resources never live here;
//! only the small [`ConnectionInfo`] that other connections are allowed to see.
use std::{
    collections::BTreeMap,
    net::{Shutdown, TcpStream},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use log::{debug, info};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The publicly visible part of a connection.
#[derive(Debug)]
pub struct ConnectionInfo {
    id: u64,
    session_id: Mutex<String>,
    killed: AtomicBool,
    stream: Option<TcpStream>,
}

impl ConnectionInfo {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn session_id(&self) -> String {
        lock(&self.session_id).clone()
    }

    pub fn set_session_id(&self, session_id: String) {
        *lock(&self.session_id) = session_id;
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Marks the connection for teardown and unblocks any pending read on it.
    pub fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
        if let Some(stream) = &self.stream {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                debug!("shutdown of connection {} failed: {e}", self.id);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    next_id: AtomicU64,
    connections: Mutex<BTreeMap<u64, Arc<ConnectionInfo>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection. The session id starts out as the peer address.
    /// `stream` is a handle used to force the connection closed on KILL.
    pub fn register(&self, peer: String, stream: Option<TcpStream>) -> Arc<ConnectionInfo> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let info = Arc::new(ConnectionInfo {
            id,
            session_id: Mutex::new(peer),
            killed: AtomicBool::new(false),
            stream,
        });
        lock(&self.connections).insert(id, Arc::clone(&info));
        info
    }

    pub fn remove(&self, id: u64) {
        lock(&self.connections).remove(&id);
    }

    pub fn len(&self) -> usize {
        lock(&self.connections).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn session_ids(&self) -> Vec<String> {
        lock(&self.connections)
            .values()
            .map(|info| info.session_id())
            .collect()
    }

    /// Kills every connection whose session id is `session_id`, returning how many
    /// were killed.
    pub fn kill(&self, session_id: &str) -> usize {
        let matching: Vec<Arc<ConnectionInfo>> = lock(&self.connections)
            .values()
            .filter(|info| info.session_id() == session_id)
            .cloned()
            .collect();
        for info in &matching {
            info!("killing connection {} ({session_id})", info.id);
            info.kill();
        }
        matching.len()
    }

    pub fn kill_all(&self) -> usize {
        let all: Vec<Arc<ConnectionInfo>> = lock(&self.connections).values().cloned().collect();
        for info in &all {
            info.kill();
        }
        all.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_defaults_to_peer() {
        let registry = Registry::new();
        let info = registry.register("127.0.0.1:4000".into(), None);

        assert_eq!(info.session_id(), "127.0.0.1:4000");
        info.set_session_id("worker".into());
        assert_eq!(registry.session_ids(), vec!["worker"]);
    }

    #[test]
    fn ids_are_unique() {
        let registry = Registry::new();
        let a = registry.register("a".into(), None);
        let b = registry.register("b".into(), None);
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.len(), 2);

        registry.remove(a.id());
        assert_eq!(registry.session_ids(), vec!["b"]);
    }

    #[test]
    fn kill_matches_session_id() {
        let registry = Registry::new();
        let a = registry.register("same".into(), None);
        let b = registry.register("same".into(), None);
        let c = registry.register("other".into(), None);

        assert_eq!(registry.kill("same"), 2);
        assert!(a.is_killed());
        assert!(b.is_killed());
        assert!(!c.is_killed());
        assert_eq!(registry.kill("nobody"), 0);
    }
}
