//! # Nim Coordinator
//!
//! Real-time matchmaking and session-state coordinator for two-player
//! misère Nim over WebSocket.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     NIM COORDINATOR                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  game/             - Pure game logic                         │
//! │  ├── state.rs      - Game state and player identity          │
//! │  └── rules.rs      - Move validation, misère terminal rule   │
//! │                                                              │
//! │  network/          - Coordination and transport              │
//! │  ├── matchmaking.rs- Waiting queue and pairing               │
//! │  ├── session.rs    - Session store                           │
//! │  ├── registry.rs   - Connection index                        │
//! │  ├── reaper.rs     - Grace-period eviction schedule          │
//! │  ├── coordinator.rs- Single-writer event intake              │
//! │  ├── broadcast.rs  - Outbound fan-out                        │
//! │  ├── diagnostics.rs- Read-only snapshots                     │
//! │  ├── protocol.rs   - Message types                           │
//! │  └── server.rs     - WebSocket server                        │
//! │                                                              │
//! │  config.rs         - Defaults and environment overrides      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ordering Guarantee
//!
//! All coordination state is owned by one task. Events are handled one at
//! a time, so two moves racing for the same turn are strictly ordered and
//! the second sees the first one's result. Per-connection outbound
//! channels preserve the order in which a connection's messages were
//! produced.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use config::{ConfigError, CoordinatorConfig, ServerConfig};
pub use game::rules::{apply_move, MoveError};
pub use game::state::{GameState, GameStatus, PlayerId};
pub use network::coordinator::{Coordinator, CoordinatorEvent};
pub use network::server::GameServer;
pub use network::session::SessionId;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
