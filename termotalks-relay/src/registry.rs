//! The authoritative set of connections eligible to receive broadcasts.
//!
//! Every mutation happens under one [`parking_lot::Mutex`] that is never held
//! across an `.await`. State transitions happen under the same lock, so a
//! connection is `Active` exactly while it is a member.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::connection::{Connection, ConnectionId};

/// Set of registered connections keyed by identity.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection and marks it active.
    ///
    /// Returns `false` and leaves the registry untouched if the connection is
    /// not in the `Connecting` state.
    #[must_use]
    pub fn register(&self, conn: Arc<Connection>) -> bool {
        let mut conns = self.connections.lock();
        if !conn.activate() {
            return false;
        }
        conns.insert(conn.id(), conn);
        true
    }

    /// Removes a connection and marks it closed.
    ///
    /// A no-op returning `None` when the connection is already gone, so the
    /// reader task and the fan-out loop may both call it for the same id.
    pub fn unregister(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let mut conns = self.connections.lock();
        let removed = conns.remove(&id);
        if let Some(conn) = &removed {
            conn.mark_closed();
        }
        drop(conns);
        removed
    }

    /// Point-in-time copy of the current members.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().values().cloned().collect()
    }

    /// Returns `true` if the connection is currently registered.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.lock().contains_key(&id)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    /// Returns `true` if no connections are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }
}
