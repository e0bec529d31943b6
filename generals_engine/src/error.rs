// Error taxonomy for session and registry operations.
//
// Every rejected operation leaves the session exactly as it was, so these
// errors are safe to report straight back to the client that caused them.
// `ErrorKind` is the coarse classification that travels on the wire; the
// variant payloads carry the detail for logs and for the human-readable
// reason string.
//
// `Internal` is reserved for invariant violations inside the engine (e.g. a
// board cell pointing at a piece that is not there). It fails the request,
// is logged at error level by the session, and never takes down the process.

use serde::{Deserialize, Serialize};

use crate::rank::Rank;
use crate::types::{CellIndex, Phase, PlayerId, SessionId};

/// Wire-level classification of a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Unknown session or player. The client is out of sync; terminal.
    NotFound,
    SessionFull,
    InvalidPlacement,
    NotYourTurn,
    IllegalMove,
    Internal,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    #[error("player {0} is not seated in this session")]
    PlayerNotFound(PlayerId),
    #[error("session already has two players")]
    SessionFull,
    #[error("invalid placement: {0}")]
    InvalidPlacement(#[from] PlacementError),
    #[error("it is not your turn")]
    NotYourTurn,
    #[error("illegal move: {0}")]
    IllegalMove(#[from] MoveError),
    #[error("move {sequence} was already applied")]
    DuplicateMove { sequence: u64 },
    #[error("move sequence {got} does not match the next expected move {expected}")]
    OutOfSequence { expected: u64, got: u64 },
    #[error("internal error: {0}")]
    Internal(String),
}

impl GameError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GameError::SessionNotFound(_) | GameError::PlayerNotFound(_) => ErrorKind::NotFound,
            GameError::SessionFull => ErrorKind::SessionFull,
            GameError::InvalidPlacement(_) => ErrorKind::InvalidPlacement,
            GameError::NotYourTurn => ErrorKind::NotYourTurn,
            GameError::IllegalMove(_)
            | GameError::DuplicateMove { .. }
            | GameError::OutOfSequence { .. } => ErrorKind::IllegalMove,
            GameError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Why a submitted army arrangement was refused.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PlacementError {
    #[error("pieces can only be placed while the session is joined (it is {0})")]
    WrongPhase(Phase),
    #[error("pieces were already submitted")]
    AlreadySubmitted,
    #[error("expected {expected} pieces, got {got}")]
    WrongCount { expected: usize, got: usize },
    #[error("expected {expected} of {rank}, got {got}")]
    RankMismatch {
        rank: Rank,
        expected: usize,
        got: usize,
    },
    #[error("cell {0} is not on the board")]
    OutOfBounds(CellIndex),
    #[error("cell {0} is outside your territory")]
    OutsideTerritory(CellIndex),
    #[error("more than one piece on cell {0}")]
    DuplicateCell(CellIndex),
}

/// Why a move was refused.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MoveError {
    #[error("cell {0} is not on the board")]
    OutOfBounds(CellIndex),
    #[error("you have no piece on {0}")]
    NoPieceAtOrigin(CellIndex),
    #[error("a {0} cannot move")]
    Immobile(Rank),
    #[error("{0} is an obstacle")]
    Obstacle(CellIndex),
    #[error("{0} is occupied by your own piece")]
    OwnPieceAtTarget(CellIndex),
    #[error("{to} is not reachable from {from} in one move")]
    NotAdjacent { from: CellIndex, to: CellIndex },
    #[error("the path is blocked at {0}")]
    PathBlocked(CellIndex),
}
