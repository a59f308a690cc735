//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Messages are JSON objects tagged by `"type"`.

use serde::{Serialize, Deserialize};

use crate::game::rules::MoveError;
use crate::game::state::{GameState, PlayerId};
use crate::network::diagnostics::DiagnosticsSnapshot;
use crate::network::session::{SessionError, SessionId};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Wait for an opponent under a key.
    JoinWaiting(PairingRequest),

    /// Announce intent to pair under a key.
    Ready(PairingRequest),

    /// Take stones from a pile.
    Move(MoveRequest),

    /// External termination with a declared winner.
    End(EndRequest),

    /// Fetch the current state of a session.
    QueryState {
        /// Session to look up.
        session_id: SessionId,
    },

    /// Request a coordinator snapshot.
    Diagnostics,

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },
}

/// Pairing announcement (`join-waiting` / `ready`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingRequest {
    /// Announcing player.
    pub player: PlayerId,
    /// Session candidate key (externally minted game id).
    pub key: SessionId,
}

/// A move submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    /// Target session.
    pub session_id: SessionId,
    /// Acting player.
    pub player: PlayerId,
    /// Pile index.
    #[serde(default)]
    pub pile: usize,
    /// Stones to remove.
    pub stones: u32,
}

/// Forced termination notice from the settlement side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndRequest {
    /// Target session.
    pub session_id: SessionId,
    /// Declared winner.
    pub winner: PlayerId,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// No opponent yet.
    Waiting {
        /// Key the caller is waiting under.
        key: SessionId,
    },

    /// Session paired (or re-joined).
    Ready(SessionView),

    /// State after an accepted move.
    Update(SessionView),

    /// Rejected request, sent only to the offender.
    Invalid(Rejection),

    /// Game reached a terminal state.
    Finished {
        /// Session that ended.
        session_id: SessionId,
        /// Winning player.
        winner: PlayerId,
        /// Final state.
        game_state: GameState,
    },

    /// Another member of the session went away.
    PeerDisconnected {
        /// Session affected.
        session_id: SessionId,
        /// Player whose connection closed.
        player: PlayerId,
    },

    /// No such session.
    NotFound {
        /// Requested session.
        session_id: SessionId,
    },

    /// Answer to `query-state`.
    State(SessionView),

    /// Coordinator snapshot.
    Diagnostics(DiagnosticsSnapshot),

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server wall clock (ms since epoch).
        server_time: u64,
    },

    /// Server is shutting down.
    Shutdown {
        /// Human-readable reason.
        reason: String,
    },
}

/// A session id together with its game state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    /// Session identifier.
    pub session_id: SessionId,
    /// Authoritative state.
    pub game_state: GameState,
}

/// Rejection payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl Rejection {
    /// Build from a code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

impl From<MoveError> for Rejection {
    fn from(err: MoveError) -> Self {
        Self::new(ErrorCode::from(err), err.to_string())
    }
}

impl From<&SessionError> for Rejection {
    fn from(err: &SessionError) -> Self {
        let code = match err {
            SessionError::NotFound(_) => ErrorCode::SessionNotFound,
            SessionError::DuplicatePairing(_) => ErrorCode::DuplicatePairing,
            SessionError::Move(e) => ErrorCode::from(*e),
        };
        Self::new(code, err.to_string())
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Move out of turn.
    NotYourTurn,
    /// Pile index out of range.
    InvalidPile,
    /// Stone count out of range.
    InvalidStoneCount,
    /// Game already over.
    SessionFinished,
    /// Session does not exist.
    SessionNotFound,
    /// Key already resolved to a session of other players.
    DuplicatePairing,
    /// Named player is not part of the session.
    NotAPlayer,
    /// Malformed or unusable request.
    InvalidInput,
}

impl From<MoveError> for ErrorCode {
    fn from(err: MoveError) -> Self {
        match err {
            MoveError::SessionFinished => ErrorCode::SessionFinished,
            MoveError::NotYourTurn => ErrorCode::NotYourTurn,
            MoveError::InvalidPile => ErrorCode::InvalidPile,
            MoveError::InvalidStoneCount => ErrorCode::InvalidStoneCount,
            MoveError::NotAPlayer => ErrorCode::NotAPlayer,
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Shorthand for an `invalid` reply.
    pub fn invalid(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Invalid(Rejection::new(code, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_move() {
        let json = r#"{"type":"move","session_id":"42","player":"0xABC","pile":1,"stones":2}"#;
        let msg = ClientMessage::from_json(json).unwrap();

        match msg {
            ClientMessage::Move(req) => {
                assert_eq!(req.session_id, SessionId::new("42"));
                assert_eq!(req.player, PlayerId::new("0xabc"));
                assert_eq!(req.pile, 1);
                assert_eq!(req.stones, 2);
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_single_pile_move_defaults_to_pile_zero() {
        let json = r#"{"type":"move","session_id":"7","player":"p","stones":3}"#;
        let ClientMessage::Move(req) = ClientMessage::from_json(json).unwrap() else {
            panic!("Wrong message type");
        };
        assert_eq!(req.pile, 0);
    }

    #[test]
    fn test_parse_pairing_messages() {
        let join = r#"{"type":"join-waiting","player":"alice","key":"9"}"#;
        let ready = r#"{"type":"ready","key":"9","player":"bob"}"#;

        assert!(matches!(ClientMessage::from_json(join).unwrap(), ClientMessage::JoinWaiting(_)));
        assert!(matches!(ClientMessage::from_json(ready).unwrap(), ClientMessage::Ready(_)));
    }

    #[test]
    fn test_negative_stones_is_malformed() {
        let json = r#"{"type":"move","session_id":"1","player":"p","pile":0,"stones":-1}"#;
        assert!(ClientMessage::from_json(json).is_err());
    }

    #[test]
    fn test_unknown_type_is_malformed() {
        assert!(ClientMessage::from_json(r#"{"type":"teleport"}"#).is_err());
    }

    #[test]
    fn test_server_message_tags() {
        let msg = ServerMessage::PeerDisconnected {
            session_id: SessionId::new("1"),
            player: PlayerId::new("alice"),
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"peer-disconnected\""));

        let msg = ServerMessage::invalid(ErrorCode::NotYourTurn, "not your turn");
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"invalid\""));
        assert!(json.contains("not_your_turn"));
    }

    #[test]
    fn test_move_error_maps_to_code() {
        let rejection = Rejection::from(MoveError::InvalidStoneCount);
        assert_eq!(rejection.code, ErrorCode::InvalidStoneCount);
        assert_eq!(rejection.message, "invalid stone count");
    }

    #[test]
    fn test_session_error_maps_to_code() {
        let err = SessionError::NotFound(SessionId::new("5"));
        assert_eq!(Rejection::from(&err).code, ErrorCode::SessionNotFound);

        let err = SessionError::Move(MoveError::NotYourTurn);
        assert_eq!(Rejection::from(&err).code, ErrorCode::NotYourTurn);
    }
}
