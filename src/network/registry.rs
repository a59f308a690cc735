//! Connection Registry
//!
//! Index from a live connection to the player it speaks for and the
//! waiting key or session it is bound to. Disconnect cleanup starts here.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use serde::{Serialize, Deserialize};

use crate::game::state::PlayerId;
use crate::network::session::SessionId;

/// Unique id of one transport connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    /// Mint a fresh random id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 8 hex digits are plenty for logs
        let simple = self.0.simple().to_string();
        f.write_str(&simple[..8])
    }
}

/// What a connection is currently bound to.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Binding {
    /// Waiting for an opponent under a key.
    Waiting(SessionId),
    /// Attached to a paired session.
    Session(SessionId),
}

impl Binding {
    /// The key or session id.
    pub fn key(&self) -> &SessionId {
        match self {
            Binding::Waiting(key) | Binding::Session(key) => key,
        }
    }
}

/// A registry entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionEntry {
    /// Player the connection announced.
    pub player: PlayerId,
    /// Current binding.
    pub binding: Binding,
}

/// Bidirectional connection index.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// Connection to entry.
    entries: BTreeMap<ConnectionId, ConnectionEntry>,
    /// Binding to connections (reverse index).
    bound: BTreeMap<Binding, BTreeSet<ConnectionId>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a connection, returning the entry it replaced.
    pub fn bind(
        &mut self,
        connection: ConnectionId,
        player: PlayerId,
        binding: Binding,
    ) -> Option<ConnectionEntry> {
        let previous = self.remove(connection);
        self.bound.entry(binding.clone()).or_default().insert(connection);
        self.entries.insert(connection, ConnectionEntry { player, binding });
        previous
    }

    /// Look up a connection.
    pub fn get(&self, connection: ConnectionId) -> Option<&ConnectionEntry> {
        self.entries.get(&connection)
    }

    /// Whether the connection is known and bound.
    pub fn is_bound(&self, connection: ConnectionId) -> bool {
        self.entries.contains_key(&connection)
    }

    /// Forget a connection.
    pub fn remove(&mut self, connection: ConnectionId) -> Option<ConnectionEntry> {
        let entry = self.entries.remove(&connection)?;
        if let Some(set) = self.bound.get_mut(&entry.binding) {
            set.remove(&connection);
            if set.is_empty() {
                self.bound.remove(&entry.binding);
            }
        }
        Some(entry)
    }

    /// Connections bound to `binding`.
    pub fn connections_for(&self, binding: &Binding) -> Vec<ConnectionId> {
        self.bound
            .get(binding)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Unbind every connection attached to a session, returning them.
    pub fn release_session(&mut self, id: &SessionId) -> Vec<ConnectionId> {
        let connections = self.connections_for(&Binding::Session(id.clone()));
        for connection in &connections {
            self.remove(*connection);
        }
        connections
    }

    /// Number of bound connections.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Unbind every waiting connection, returning them.
    pub fn release_waiting(&mut self) -> Vec<ConnectionId> {
        let waiting: Vec<ConnectionId> = self.entries
            .iter()
            .filter(|(_, entry)| matches!(entry.binding, Binding::Waiting(_)))
            .map(|(connection, _)| *connection)
            .collect();
        for connection in &waiting {
            self.remove(*connection);
        }
        waiting
    }
}
