//! Session Coordinator
//!
//! Single owner of the matchmaking queue, session store, connection registry
//! and eviction schedule. Every inbound event goes through [`Coordinator::intake`]
//! and is handled to completion; the returned [`Outbox`] says who must be told
//! what. Delivery is the caller's job.

use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CoordinatorConfig;
use crate::game::state::PlayerId;
use crate::network::broadcast::Outbox;
use crate::network::diagnostics::DiagnosticsSnapshot;
use crate::network::matchmaking::{Announcement, MatchmakingQueue, Pairing, PairingStrategy};
use crate::network::protocol::{
    ClientMessage, ServerMessage, ErrorCode, Rejection, SessionView,
    PairingRequest, MoveRequest, EndRequest,
};
use crate::network::reaper::{EvictionReason, SessionReaper};
use crate::network::registry::{Binding, ConnectionEntry, ConnectionId, ConnectionRegistry};
use crate::network::session::{Creation, Session, SessionError, SessionId, SessionStore};

/// Inbound events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    /// A decoded client message.
    Message {
        /// Originating connection.
        connection: ConnectionId,
        /// Decoded message.
        message: ClientMessage,
    },
    /// Transport closed.
    Disconnected {
        /// Connection that went away.
        connection: ConnectionId,
    },
}

/// Matchmaking and session-state coordinator.
pub struct Coordinator {
    config: CoordinatorConfig,
    sessions: SessionStore,
    queue: MatchmakingQueue,
    registry: ConnectionRegistry,
    reaper: SessionReaper,
}

impl Coordinator {
    /// Create an empty coordinator.
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            queue: MatchmakingQueue::new(config.pairing),
            reaper: SessionReaper::new(config.reaper),
            sessions: SessionStore::new(),
            registry: ConnectionRegistry::new(),
            config,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Handle one event to completion.
    pub fn intake(&mut self, event: CoordinatorEvent, now: Instant) -> Outbox {
        match event {
            CoordinatorEvent::Message { connection, message } => {
                self.handle_message(connection, message, now)
            }
            CoordinatorEvent::Disconnected { connection } => {
                self.handle_disconnect(connection, now)
            }
        }
    }

    fn handle_message(&mut self, connection: ConnectionId, message: ClientMessage, now: Instant) -> Outbox {
        match message {
            ClientMessage::JoinWaiting(req) | ClientMessage::Ready(req) => {
                self.handle_announce(connection, req, now)
            }
            ClientMessage::Move(req) => self.handle_move(connection, req, now),
            ClientMessage::End(req) => self.handle_end(connection, req, now),
            ClientMessage::QueryState { session_id } => self.handle_query(connection, session_id),
            ClientMessage::Diagnostics => {
                let mut outbox = Outbox::new();
                outbox.send(connection, ServerMessage::Diagnostics(self.snapshot()));
                outbox
            }
            ClientMessage::Ping { timestamp } => {
                let mut outbox = Outbox::new();
                outbox.send(connection, ServerMessage::Pong {
                    timestamp,
                    server_time: chrono::Utc::now().timestamp_millis().max(0) as u64,
                });
                outbox
            }
        }
    }

    // =========================================================================
    // PAIRING
    // =========================================================================

    fn handle_announce(&mut self, connection: ConnectionId, req: PairingRequest, now: Instant) -> Outbox {
        let PairingRequest { player, key } = req;
        let mut outbox = Outbox::new();

        if player.is_empty() || key.is_empty() {
            outbox.send(connection, ServerMessage::invalid(
                ErrorCode::InvalidInput,
                "player and key are required",
            ));
            return outbox;
        }

        if self.sessions.contains(&key) {
            return self.rejoin(connection, player, key, now);
        }

        // Derived session ids differ from the announced key, so a seated
        // player is found by identity instead
        if self.queue.strategy() == PairingStrategy::AnyWaiting {
            if let Some(id) = self.sessions.active_session_of(&player).cloned() {
                return self.rejoin(connection, player, id, now);
            }
        }

        self.rebind(connection, player.clone(), Binding::Waiting(key.clone()), now);

        match self.queue.announce(key.clone(), player.clone(), connection, now) {
            Announcement::Waiting { replaced } => {
                if let Some(old) = replaced.filter(|old| old.connection != connection) {
                    debug!("Player {} replaced waiting slot {} (connection {})", player, old.key, old.connection);
                }
                debug!("Player {} waiting under {}", player, key);
                outbox.send(connection, ServerMessage::Waiting { key });
            }
            Announcement::Paired(pairing) => {
                outbox.extend(self.open_session(pairing, now));
            }
        }

        outbox
    }

    /// Re-announce under a key that already has a session.
    fn rejoin(&mut self, connection: ConnectionId, player: PlayerId, id: SessionId, now: Instant) -> Outbox {
        let mut outbox = Outbox::new();

        let is_member = self.sessions.get(&id).is_ok_and(|s| s.has_player(&player));
        if !is_member {
            let err = SessionError::DuplicatePairing(id);
            debug!("Rejected pairing by {}: {}", player, err);
            outbox.send(connection, ServerMessage::Invalid(Rejection::from(&err)));
            return outbox;
        }

        // A member rejoining is no longer looking for a different match
        self.queue.remove_player(&player);
        self.attach(connection, player.clone(), &id, now);

        if let Ok(session) = self.sessions.get(&id) {
            debug!("Player {} rejoined session {}", player, id);
            outbox.send(connection, ServerMessage::Ready(view(session)));
        }
        outbox
    }

    fn open_session(&mut self, pairing: Pairing, now: Instant) -> Outbox {
        let Pairing { session_id, first, second } = pairing;
        let mut outbox = Outbox::new();

        let creation = self.sessions.create(
            session_id.clone(),
            first.player.clone(),
            second.player.clone(),
            self.config.initial_piles.clone(),
            now,
        );
        match creation {
            Creation::Created(_) => {
                info!("Session {} paired: {} vs {}", session_id, first.player, second.player);
            }
            Creation::Existing(session) => {
                let same_players = session.has_player(&first.player) && session.has_player(&second.player);
                if !same_players {
                    warn!("Derived session id {} already in use by other players", session_id);
                    let err = SessionError::DuplicatePairing(session_id);
                    for entry in [&first, &second] {
                        self.registry.remove(entry.connection);
                        outbox.send(entry.connection, ServerMessage::Invalid(Rejection::from(&err)));
                    }
                    return outbox;
                }
            }
        }

        self.attach(first.connection, first.player, &session_id, now);
        self.attach(second.connection, second.player, &session_id, now);

        if let Ok(session) = self.sessions.get(&session_id) {
            outbox.broadcast([first.connection, second.connection], ServerMessage::Ready(view(session)));
        }
        outbox
    }

    // =========================================================================
    // GAMEPLAY
    // =========================================================================

    fn handle_move(&mut self, connection: ConnectionId, req: MoveRequest, now: Instant) -> Outbox {
        let MoveRequest { session_id, player, pile, stones } = req;
        let mut outbox = Outbox::new();

        let is_member = match self.sessions.get(&session_id) {
            Ok(session) => session.has_player(&player),
            Err(_) => {
                outbox.send(connection, ServerMessage::NotFound { session_id });
                return outbox;
            }
        };
        if is_member && self.sessions.session_of(connection) != Some(&session_id) {
            self.attach(connection, player.clone(), &session_id, now);
        }

        let Ok(session) = self.sessions.get_mut(&session_id) else {
            return outbox;
        };
        let game = match session.apply_move(&player, pile, stones) {
            Ok(game) => game.clone(),
            Err(err) => {
                debug!("Rejected move by {} in {}: {}", player, session_id, err);
                outbox.send(connection, ServerMessage::Invalid(Rejection::from(err)));
                return outbox;
            }
        };

        debug!(
            "Session {}: {} took {} from pile {} -> {:?}",
            session_id, player, stones, pile, game.piles
        );

        let members = self.live_members(&session_id);
        outbox.broadcast(members.iter().copied(), ServerMessage::Update(SessionView {
            session_id: session_id.clone(),
            game_state: game.clone(),
        }));

        if let Some(winner) = game.winner.clone() {
            info!("Session {} finished after {} moves, winner {}", session_id, game.total_moves, winner);
            self.reaper.schedule(session_id.clone(), EvictionReason::Finished, now);
            outbox.broadcast(members, ServerMessage::Finished {
                session_id,
                winner,
                game_state: game,
            });
        }

        outbox
    }

    fn handle_end(&mut self, connection: ConnectionId, req: EndRequest, now: Instant) -> Outbox {
        let EndRequest { session_id, winner } = req;
        let mut outbox = Outbox::new();

        let result = self.sessions
            .get_mut(&session_id)
            .and_then(|s| s.finish(&winner).cloned().map_err(SessionError::from));

        match result {
            Ok(game) => {
                info!("Session {} ended externally, winner {}", session_id, winner);
                self.reaper.schedule(session_id.clone(), EvictionReason::Finished, now);
                let members = self.live_members(&session_id);
                outbox.broadcast(members, ServerMessage::Finished {
                    session_id,
                    winner,
                    game_state: game,
                });
            }
            Err(SessionError::NotFound(_)) => {
                outbox.send(connection, ServerMessage::NotFound { session_id });
            }
            Err(err) => {
                debug!("Rejected end of {}: {}", session_id, err);
                outbox.send(connection, ServerMessage::Invalid(Rejection::from(&err)));
            }
        }

        outbox
    }

    fn handle_query(&self, connection: ConnectionId, session_id: SessionId) -> Outbox {
        let mut outbox = Outbox::new();
        let message = match self.sessions.get(&session_id) {
            Ok(session) => ServerMessage::State(view(session)),
            Err(_) => ServerMessage::NotFound { session_id },
        };
        outbox.send(connection, message);
        outbox
    }

    // =========================================================================
    // CONNECTION LIFECYCLE
    // =========================================================================

    fn handle_disconnect(&mut self, connection: ConnectionId, now: Instant) -> Outbox {
        let mut outbox = Outbox::new();

        let Some(entry) = self.release(connection, now) else {
            debug!("Unbound connection {} closed", connection);
            return outbox;
        };

        match entry.binding {
            Binding::Waiting(key) => {
                debug!("Player {} stopped waiting under {}", entry.player, key);
            }
            Binding::Session(session_id) => {
                let remaining = self.live_members(&session_id);
                let still_present = remaining.iter().any(|c| {
                    self.registry.get(*c).is_some_and(|other| other.player == entry.player)
                });
                if still_present {
                    debug!(
                        "Stale connection {} of {} closed, still attached to {}",
                        connection, entry.player, session_id
                    );
                    return outbox;
                }

                info!("Player {} disconnected from session {}", entry.player, session_id);
                outbox.broadcast(remaining, ServerMessage::PeerDisconnected {
                    session_id,
                    player: entry.player,
                });
            }
        }

        outbox
    }

    /// Bind a connection to a session, cancelling a pending abandonment.
    fn attach(&mut self, connection: ConnectionId, player: PlayerId, id: &SessionId, now: Instant) {
        self.rebind(connection, player, Binding::Session(id.clone()), now);
        if let Err(err) = self.sessions.attach(id, connection) {
            warn!("Attach of {} failed: {}", connection, err);
            return;
        }
        if self.reaper.cancel_abandonment(id) {
            info!("Session {} reclaimed before eviction", id);
        }
    }

    /// Point a connection at `binding`, releasing whatever it held before.
    fn rebind(&mut self, connection: ConnectionId, player: PlayerId, binding: Binding, now: Instant) {
        let unchanged = self.registry
            .get(connection)
            .is_some_and(|entry| entry.binding == binding);
        if !unchanged {
            self.release(connection, now);
        }
        self.registry.bind(connection, player, binding);
    }

    /// Drop a connection's binding and clean up what it pointed at.
    fn release(&mut self, connection: ConnectionId, now: Instant) -> Option<ConnectionEntry> {
        let entry = self.registry.remove(connection)?;
        match &entry.binding {
            Binding::Waiting(key) => {
                self.queue.remove_connection(key, connection);
            }
            Binding::Session(id) => {
                self.sessions.detach(connection);
                self.schedule_if_abandoned(id, now);
            }
        }
        Some(entry)
    }

    fn schedule_if_abandoned(&mut self, id: &SessionId, now: Instant) {
        let Ok(session) = self.sessions.get(id) else {
            return;
        };
        if !live_members(session, &self.registry).is_empty() {
            return;
        }
        let reason = if session.game().is_active() {
            EvictionReason::Abandoned
        } else {
            EvictionReason::Finished
        };
        let due = self.reaper.schedule(id.clone(), reason, now);
        info!(
            "Session {} has no connections, eviction ({:?}) in {:?}",
            id, reason, due.saturating_duration_since(now)
        );
    }

    fn live_members(&self, id: &SessionId) -> Vec<ConnectionId> {
        self.sessions
            .get(id)
            .map(|s| live_members(s, &self.registry))
            .unwrap_or_default()
    }

    // =========================================================================
    // REAPING
    // =========================================================================

    /// Evict every session whose grace window has elapsed.
    pub fn reap(&mut self, now: Instant) -> Vec<SessionId> {
        let mut evicted = Vec::new();

        for (id, reason) in self.reaper.take_due(now) {
            if reason == EvictionReason::Abandoned && !self.live_members(&id).is_empty() {
                debug!("Session {} regained connections, skipping eviction", id);
                continue;
            }
            let released = self.registry.release_session(&id);
            if let Some(session) = self.sessions.remove(&id) {
                info!(
                    "Evicted session {} ({:?}) after {:?}, released {} connection(s)",
                    id,
                    reason,
                    now.saturating_duration_since(session.created_at()),
                    released.len()
                );
                evicted.push(id);
            }
        }

        evicted
    }

    /// Schedule any connectionless session that slipped through, then reap.
    pub fn sweep(&mut self, now: Instant) -> Vec<SessionId> {
        let orphaned: Vec<SessionId> = self.sessions
            .iter()
            .filter(|s| !self.reaper.is_pending(&s.id))
            .filter(|s| live_members(s, &self.registry).is_empty())
            .map(|s| s.id.clone())
            .collect();

        for id in &orphaned {
            self.schedule_if_abandoned(id, now);
        }

        let evicted = self.reap(now);
        let snapshot = self.snapshot();
        info!(
            "Sweep: {} session(s) ({} active), {} waiting, {} pending eviction(s), {} evicted",
            snapshot.active_sessions,
            snapshot.active_games(),
            snapshot.waiting_count,
            snapshot.pending_evictions,
            evicted.len()
        );
        evicted
    }

    /// Read-only snapshot.
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot::capture(&self.sessions, &self.queue, &self.registry, &self.reaper)
    }

    /// Cancel pending evictions and drop waiting players.
    pub fn shutdown(&mut self) -> usize {
        let cancelled = self.reaper.clear();
        let waiting = self.queue.clear();
        self.registry.release_waiting();
        info!(
            "Coordinator shutdown: cancelled {} eviction(s), dropped {} waiting player(s)",
            cancelled, waiting
        );
        cancelled
    }

    /// Look up a session.
    pub fn session(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id).ok()
    }

    /// Number of waiting players.
    pub fn waiting_count(&self) -> usize {
        self.queue.len()
    }

    /// Whether an eviction is scheduled for `id`.
    pub fn eviction_pending(&self, id: &SessionId) -> bool {
        self.reaper.is_pending(id)
    }
}

/// Attached connections that are still registered to this session.
fn live_members(session: &Session, registry: &ConnectionRegistry) -> Vec<ConnectionId> {
    session.connections()
        .filter(|c| {
            registry
                .get(*c)
                .is_some_and(|entry| entry.binding == Binding::Session(session.id.clone()))
        })
        .collect()
}

fn view(session: &Session) -> SessionView {
    SessionView {
        session_id: session.id.clone(),
        game_state: session.game().clone(),
    }
}
