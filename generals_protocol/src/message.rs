// Protocol messages between game clients and the server.
//
// Two enums define the full vocabulary:
// - `ClientMessage`: sent by a client to the server.
// - `ServerMessage`: sent by the server, either as the direct reply to a
//   client message or, wrapped in `ServerMessage::Event`, as an unsolicited
//   session event.
//
// A connection acts for at most one seat. `CreateGame` and `JoinGame` bind
// the seat; the later messages carry no session or player IDs because the
// server uses the bound ones. This is what stops a client from moving the
// opponent's pieces by guessing IDs.
//
// Payload types (`TurnResult`, `BoardView`, `SessionEvent`, ...) come from
// `generals_engine` unchanged.

use serde::{Deserialize, Serialize};

use generals_engine::{
    BoardView, CellIndex, ErrorKind, GameError, GameResult, PlayerId, PlayerSlot, Placement,
    SessionEvent, SessionId, StatsSnapshot, TurnResult,
};

/// Bumped whenever either enum changes shape.
pub const PROTOCOL_VERSION: u32 = 2;

/// Messages sent by a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// First message on every connection.
    Hello { protocol_version: u32 },
    /// Open a new session as Player-A.
    CreateGame { player_name: String },
    /// Take the second seat of an existing session.
    JoinGame {
        session_id: SessionId,
        player_name: String,
    },
    SubmitPlacement { pieces: Vec<Placement> },
    TakeTurn {
        sequence: u64,
        from: CellIndex,
        to: CellIndex,
    },
    /// Highlight one of our pieces for the opponent before moving it.
    SelectPiece { cell: CellIndex },
    /// Ask for this seat's current `BoardView`.
    RequestView,
    /// Ask for the server-wide session listing.
    RequestStats,
    /// Leaving gracefully. Same effect as disconnecting.
    Goodbye,
}

/// Why the server refused a client message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectKind {
    /// Bad handshake, wrong protocol version, or a message out of place.
    Protocol,
    /// `CreateGame`/`JoinGame` on a connection that already has a seat.
    AlreadySeated,
    /// A game action on a connection without a seat.
    NotSeated,
    /// The engine refused the operation.
    Game(ErrorKind),
}

/// Messages sent by the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Handshake accepted.
    Welcome { protocol_version: u32 },
    Rejected { kind: RejectKind, reason: String },
    GameCreated {
        session_id: SessionId,
        player_id: PlayerId,
        slot: PlayerSlot,
    },
    GameJoined {
        session_id: SessionId,
        player_id: PlayerId,
        slot: PlayerSlot,
        opponent_name: String,
    },
    /// `result` is set when the game ended as soon as it started.
    PlacementAccepted {
        started: bool,
        result: Option<GameResult>,
    },
    TurnAccepted { result: TurnResult },
    SelectionAccepted { cell: CellIndex },
    View { view: BoardView },
    Stats { snapshot: StatsSnapshot },
    /// Something happened in the seat's session.
    Event { event: SessionEvent },
}

impl ServerMessage {
    pub fn rejected(kind: RejectKind, reason: impl Into<String>) -> Self {
        ServerMessage::Rejected {
            kind,
            reason: reason.into(),
        }
    }
}

impl From<&GameError> for ServerMessage {
    fn from(err: &GameError) -> Self {
        ServerMessage::rejected(RejectKind::Game(err.kind()), err.to_string())
    }
}
