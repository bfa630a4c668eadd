//! Index from session id to its open proxy connections.
//!
//! This is the only state shared between connections. Revocation goes
//! through it to force-close every tunnel bound to a session.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::state::CloseReason;

/// Handle used to stop one connection from anywhere.
///
/// The first reason recorded wins; later calls only re-cancel.
#[derive(Clone, Default)]
pub struct ConnectionControl {
    token: CancellationToken,
    reason: Arc<OnceLock<CloseReason>>,
}

impl ConnectionControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&self, reason: CloseReason) {
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    pub fn reason(&self) -> Option<CloseReason> {
        self.reason.get().copied()
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn closed(&self) {
        self.token.cancelled().await
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Session → connections index.
#[derive(Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    sessions: DashMap<String, HashMap<u64, ConnectionControl>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_connection_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Add a connection under `session_id`. It stays indexed until the
    /// returned guard is dropped.
    pub fn register(self: &Arc<Self>, session_id: &str, connection_id: u64) -> Registration {
        let control = ConnectionControl::new();
        self.sessions
            .entry(session_id.to_string())
            .or_default()
            .insert(connection_id, control.clone());
        Registration {
            registry: Arc::clone(self),
            session_id: session_id.to_string(),
            connection_id,
            control,
        }
    }

    /// Close every connection bound to `session_id`. Returns how many.
    pub fn close_session(&self, session_id: &str, reason: CloseReason) -> usize {
        match self.sessions.get(session_id) {
            Some(conns) => {
                for control in conns.values() {
                    control.close(reason);
                }
                conns.len()
            }
            None => 0,
        }
    }

    /// Close every open connection.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        let mut closed = 0;
        for entry in self.sessions.iter() {
            for control in entry.value().values() {
                control.close(reason);
                closed += 1;
            }
        }
        closed
    }

    pub fn connection_count(&self, session_id: &str) -> usize {
        self.sessions.get(session_id).map_or(0, |c| c.len())
    }

    pub fn total_connections(&self) -> usize {
        self.sessions.iter().map(|e| e.value().len()).sum()
    }

    /// Wait for every registered connection to finish, up to `timeout`.
    /// Returns whether the registry emptied in time.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            while self.total_connections() > 0 {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await
        .is_ok()
    }

    fn remove(&self, session_id: &str, connection_id: u64) {
        if let Some(mut conns) = self.sessions.get_mut(session_id) {
            conns.remove(&connection_id);
        }
        self.sessions
            .remove_if(session_id, |_, conns| conns.is_empty());
    }
}

/// Keeps a connection in the registry for as long as it lives.
pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    session_id: String,
    connection_id: u64,
    control: ConnectionControl,
}

impl Registration {
    pub fn control(&self) -> &ConnectionControl {
        &self.control
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(&self.session_id, self.connection_id);
    }
}
