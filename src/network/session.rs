//! Match Session Management
//!
//! Owns every active session and the canonical game state inside it.
//! Sessions reference connections by id only; the transport owns the sockets.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Instant;
use serde::{Serialize, Deserialize};

use crate::game::rules::{self, MoveError};
use crate::game::state::{GameState, PlayerId};
use crate::network::registry::ConnectionId;

/// Session identifier (an externally minted game id or a derived key).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap a raw key.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Raw key.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for an empty key.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No session under this id.
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// Key already resolved to a session between other players.
    #[error("session {0} is already paired")]
    DuplicatePairing(SessionId),

    /// Move or termination rejected by the rules.
    #[error(transparent)]
    Move(#[from] MoveError),
}

/// One match between two players.
#[derive(Debug)]
pub struct Session {
    /// Unique session identifier.
    pub id: SessionId,
    /// Canonical game state.
    game: GameState,
    /// Attached connections.
    connections: BTreeSet<ConnectionId>,
    /// When the session was paired.
    created_at: Instant,
}

impl Session {
    fn new(id: SessionId, game: GameState, created_at: Instant) -> Self {
        Self {
            id,
            game,
            connections: BTreeSet::new(),
            created_at,
        }
    }

    /// Current game state.
    pub fn game(&self) -> &GameState {
        &self.game
    }

    /// Whether `player` is one of the two participants.
    pub fn has_player(&self, player: &PlayerId) -> bool {
        self.game.is_player(player)
    }

    /// Attached connection ids.
    pub fn connections(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.connections.iter().copied()
    }

    /// Number of attached connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// When the session was created.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Validate and apply a move, keeping the new state on success.
    pub fn apply_move(
        &mut self,
        player: &PlayerId,
        pile: usize,
        stones: u32,
    ) -> Result<&GameState, MoveError> {
        self.game = rules::apply_move(&self.game, player, pile, stones)?;
        Ok(&self.game)
    }

    /// Force the game into Finished with `winner`.
    pub fn finish(&mut self, winner: &PlayerId) -> Result<&GameState, MoveError> {
        self.game = rules::force_finish(&self.game, winner)?;
        Ok(&self.game)
    }
}

/// Result of [`SessionStore::create`].
#[derive(Debug)]
pub enum Creation<'a> {
    /// A new session was stored.
    Created(&'a mut Session),
    /// A session already existed under that id and was left untouched.
    Existing(&'a mut Session),
}

// =============================================================================
// SESSION STORE
// =============================================================================

/// Owns all active sessions.
#[derive(Debug, Default)]
pub struct SessionStore {
    /// Active sessions.
    sessions: BTreeMap<SessionId, Session>,
    /// Connection to session mapping.
    connection_sessions: BTreeMap<ConnectionId, SessionId>,
}

impl SessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session, or return the existing one under `id` unchanged.
    pub fn create(
        &mut self,
        id: SessionId,
        player1: PlayerId,
        player2: PlayerId,
        piles: Vec<u32>,
        now: Instant,
    ) -> Creation<'_> {
        use std::collections::btree_map::Entry;

        match self.sessions.entry(id) {
            Entry::Occupied(entry) => Creation::Existing(entry.into_mut()),
            Entry::Vacant(entry) => {
                let game = GameState::new(piles, player1, player2);
                let id = entry.key().clone();
                Creation::Created(entry.insert(Session::new(id, game, now)))
            }
        }
    }

    /// Look up a session.
    pub fn get(&self, id: &SessionId) -> Result<&Session, SessionError> {
        self.sessions.get(id).ok_or_else(|| SessionError::NotFound(id.clone()))
    }

    /// Look up a session mutably.
    pub fn get_mut(&mut self, id: &SessionId) -> Result<&mut Session, SessionError> {
        self.sessions.get_mut(id).ok_or_else(|| SessionError::NotFound(id.clone()))
    }

    /// Whether a session exists under `id`.
    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Attach a connection. No-op if already attached.
    ///
    /// A connection belongs to at most one session; attaching elsewhere
    /// detaches it from the previous one first.
    pub fn attach(&mut self, id: &SessionId, connection: ConnectionId) -> Result<(), SessionError> {
        if !self.sessions.contains_key(id) {
            return Err(SessionError::NotFound(id.clone()));
        }
        if let Some(previous) = self.connection_sessions.get(&connection) {
            if previous != id {
                self.detach(connection);
            }
        }
        if let Some(session) = self.sessions.get_mut(id) {
            session.connections.insert(connection);
        }
        self.connection_sessions.insert(connection, id.clone());
        Ok(())
    }

    /// Detach a connection from whichever session holds it.
    pub fn detach(&mut self, connection: ConnectionId) -> Option<&Session> {
        let id = self.connection_sessions.remove(&connection)?;
        let session = self.sessions.get_mut(&id)?;
        session.connections.remove(&connection);
        Some(session)
    }

    /// Session a connection is attached to.
    pub fn session_of(&self, connection: ConnectionId) -> Option<&SessionId> {
        self.connection_sessions.get(&connection)
    }

    /// Delete a session and forget its connections.
    pub fn remove(&mut self, id: &SessionId) -> Option<Session> {
        let session = self.sessions.remove(id)?;
        for connection in &session.connections {
            self.connection_sessions.remove(connection);
        }
        Some(session)
    }

    /// Get active session count.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True when no sessions are active.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Iterate sessions in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Active session `player` takes part in, if any.
    pub fn active_session_of(&self, player: &PlayerId) -> Option<&SessionId> {
        self.sessions
            .values()
            .find(|s| s.game.is_active() && s.has_player(player))
            .map(|s| &s.id)
    }
}
