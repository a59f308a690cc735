//! Diagnostics
//!
//! Read-only snapshot of queue and session counts.

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::game::state::{GameStatus, PlayerId};
use crate::network::matchmaking::MatchmakingQueue;
use crate::network::reaper::SessionReaper;
use crate::network::registry::ConnectionRegistry;
use crate::network::session::{SessionId, SessionStore};

/// Per-session summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Session identifier.
    pub session_id: SessionId,
    /// Participants (player1, player2).
    pub players: [PlayerId; 2],
    /// Remaining stones per pile.
    pub piles: Vec<u32>,
    /// Game status.
    pub status: GameStatus,
    /// Player to move.
    pub current_player: PlayerId,
    /// Accepted moves so far.
    pub total_moves: u32,
    /// Attached connections still registered.
    pub live_connections: usize,
    /// Scheduled for eviction.
    pub eviction_pending: bool,
}

/// Coordinator snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsSnapshot {
    /// When the snapshot was taken.
    pub generated_at: DateTime<Utc>,
    /// Number of active sessions.
    pub active_sessions: usize,
    /// Session details, ordered by id.
    pub sessions: Vec<SessionSummary>,
    /// Number of waiting players.
    pub waiting_count: usize,
    /// Keys players are waiting under.
    pub waiting_keys: Vec<SessionId>,
    /// Bound connections.
    pub connections: usize,
    /// Scheduled evictions.
    pub pending_evictions: usize,
}

impl DiagnosticsSnapshot {
    /// Capture the current state.
    pub fn capture(
        sessions: &SessionStore,
        queue: &MatchmakingQueue,
        registry: &ConnectionRegistry,
        reaper: &SessionReaper,
    ) -> Self {
        let summaries = sessions.iter()
            .map(|session| {
                let game = session.game();
                SessionSummary {
                    session_id: session.id.clone(),
                    players: [game.player1.clone(), game.player2.clone()],
                    piles: game.piles.clone(),
                    status: game.status,
                    current_player: game.current_player.clone(),
                    total_moves: game.total_moves,
                    live_connections: session.connections()
                        .filter(|c| registry.is_bound(*c))
                        .count(),
                    eviction_pending: reaper.is_pending(&session.id),
                }
            })
            .collect();

        Self {
            generated_at: Utc::now(),
            active_sessions: sessions.len(),
            sessions: summaries,
            waiting_count: queue.len(),
            waiting_keys: queue.keys().cloned().collect(),
            connections: registry.len(),
            pending_evictions: reaper.pending_count(),
        }
    }

    /// Sessions currently in play.
    pub fn active_games(&self) -> usize {
        self.sessions.iter().filter(|s| s.status == GameStatus::Active).count()
    }
}
