//! Game State Definitions
//!
//! Pile-based Nim state shared by both players of a session.
//! Plain data: every transition goes through `game::rules`.

use std::fmt;
use serde::{Serialize, Deserialize};

// =============================================================================
// PLAYER ID
// =============================================================================

/// Opaque player identity (a wallet address in practice).
///
/// Normalized to ASCII lowercase on construction and deserialization, so
/// `0xABC` and `0xabc` are the same player.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct PlayerId(String);

impl PlayerId {
    /// Create from any string, normalizing case.
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_lowercase())
    }

    /// Normalized identity.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for an empty (or whitespace-only) identity.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for PlayerId {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&str> for PlayerId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<PlayerId> for String {
    fn from(id: PlayerId) -> Self {
        id.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// GAME STATUS
// =============================================================================

/// Lifecycle of a single game.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    /// Moves are being accepted.
    Active,
    /// Terminal; never reverts.
    Finished,
}

/// The most recent accepted move.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMove {
    /// Who moved.
    pub player: PlayerId,
    /// Pile the stones came from.
    pub pile: usize,
    /// Stones removed.
    pub stones: u32,
}

// =============================================================================
// GAME STATE
// =============================================================================

/// Authoritative state of one Nim game.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    /// Stones remaining per pile. Length fixed at creation.
    pub piles: Vec<u32>,
    /// First player (moves first).
    pub player1: PlayerId,
    /// Second player.
    pub player2: PlayerId,
    /// Player whose turn it is.
    pub current_player: PlayerId,
    /// Most recent accepted move.
    pub last_move: Option<LastMove>,
    /// Active or Finished.
    pub status: GameStatus,
    /// Set if and only if `status == Finished`.
    pub winner: Option<PlayerId>,
    /// Count of accepted moves.
    pub total_moves: u32,
}

impl GameState {
    /// Create a fresh game; `player1` moves first.
    pub fn new(piles: Vec<u32>, player1: PlayerId, player2: PlayerId) -> Self {
        Self {
            piles,
            current_player: player1.clone(),
            player1,
            player2,
            last_move: None,
            status: GameStatus::Active,
            winner: None,
            total_moves: 0,
        }
    }

    /// Whether `player` is one of the two participants.
    pub fn is_player(&self, player: &PlayerId) -> bool {
        *player == self.player1 || *player == self.player2
    }

    /// The other participant. Returns `None` for a non-participant.
    pub fn opponent(&self, player: &PlayerId) -> Option<&PlayerId> {
        if *player == self.player1 {
            Some(&self.player2)
        } else if *player == self.player2 {
            Some(&self.player1)
        } else {
            None
        }
    }

    /// Stones left across every pile.
    pub fn total_stones(&self) -> u64 {
        self.piles.iter().map(|&p| u64::from(p)).sum()
    }

    /// True once every pile is empty.
    pub fn all_piles_empty(&self) -> bool {
        self.piles.iter().all(|&p| p == 0)
    }

    /// True while moves are accepted.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.status == GameStatus::Active
    }
}
