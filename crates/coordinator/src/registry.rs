//! Connections with a remote transaction in progress
//!
//! Protocol phases iterate the registry in insertion order, so commands go
//! out to nodes in the order the transactions were started.

use crate::connection::ConnectionId;

#[derive(Debug, Default)]
pub struct InProgressRegistry {
    connections: Vec<ConnectionId>,
}

impl InProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the connection was already registered
    pub fn insert(&mut self, id: ConnectionId) -> bool {
        if self.contains(id) {
            return false;
        }
        self.connections.push(id);
        true
    }

    /// Returns false if the connection was not registered
    pub fn remove(&mut self, id: ConnectionId) -> bool {
        match self.connections.iter().position(|&c| c == id) {
            Some(position) => {
                self.connections.remove(position);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains(&id)
    }

    /// Snapshot of the registered connections, in insertion order
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.clone()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
