//! Network Layer
//!
//! Matchmaking, session ownership and the WebSocket front end.
//! Game rules live in `game/`; this layer decides who plays whom and
//! who hears about it.

pub mod broadcast;
pub mod coordinator;
pub mod diagnostics;
pub mod matchmaking;
pub mod protocol;
pub mod reaper;
pub mod registry;
pub mod server;
pub mod session;

pub use broadcast::{Broadcaster, Outbox};
pub use coordinator::{Coordinator, CoordinatorEvent};
pub use diagnostics::{DiagnosticsSnapshot, SessionSummary};
pub use matchmaking::{MatchmakingQueue, PairingStrategy};
pub use protocol::{ClientMessage, ServerMessage, ErrorCode, Rejection, SessionView};
pub use reaper::{EvictionReason, ReaperConfig, SessionReaper};
pub use registry::{ConnectionId, ConnectionRegistry};
pub use server::{CoordinatorHandle, GameServer, ServerError};
pub use session::{Session, SessionError, SessionId, SessionStore};
