//! Game Logic Module
//!
//! Misère Nim state and rules. Pure functions, no I/O.
//!
//! ## Module Structure
//!
//! - `state`: Game state, player identity
//! - `rules`: Move validation and application

pub mod state;
pub mod rules;

// Re-export key types
pub use state::{GameState, GameStatus, LastMove, PlayerId};
pub use rules::{apply_move, force_finish, MoveError};
