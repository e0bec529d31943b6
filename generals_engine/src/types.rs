// Core types shared across the engine.
//
// Identifiers (`SessionId`, `PlayerId`), board addressing (`CellIndex`), the
// two seats of a match (`PlayerSlot`), the session lifecycle (`Phase`), and
// the small value types that cross the engine boundary (`Piece`, `Placement`,
// `MoveRequest`). All types derive `Serialize`/`Deserialize` so the protocol
// crate can put them on the wire unchanged.
//
// Session and player IDs are random UUID v4 values. They are handed to
// clients, so they must not be guessable from one another: a client that
// knows its own player ID learns nothing about the opponent's.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::rank::Rank;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Identifies one match in the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one participant within a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Board addressing
// ---------------------------------------------------------------------------

/// A board cell, numbered `row * width + col` with row 0 on Player-A's side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellIndex(pub u16);

impl fmt::Display for CellIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The two seats of a match. Player-A creates the session, Player-B joins it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PlayerSlot {
    A,
    B,
}

impl PlayerSlot {
    pub fn opponent(self) -> Self {
        match self {
            PlayerSlot::A => PlayerSlot::B,
            PlayerSlot::B => PlayerSlot::A,
        }
    }

    /// Array index for per-slot storage.
    pub fn index(self) -> usize {
        match self {
            PlayerSlot::A => 0,
            PlayerSlot::B => 1,
        }
    }
}

impl fmt::Display for PlayerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerSlot::A => f.write_str("player A"),
            PlayerSlot::B => f.write_str("player B"),
        }
    }
}

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

/// Session phase. Piece placement happens during `Joined`; there is no
/// separate placing phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Player-A is waiting for an opponent.
    Created,
    /// Both seats are filled; players are arranging their armies.
    Joined,
    /// Both armies are on the board and turns alternate.
    Active,
    /// The match has a result. The board stays around for the reveal.
    Over,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Created => "created",
            Phase::Joined => "joined",
            Phase::Active => "active",
            Phase::Over => "over",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Pieces, placements, moves
// ---------------------------------------------------------------------------

/// A piece on (or off) the board. `position == None` means captured; the rank
/// is kept for the post-game reveal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Piece {
    pub rank: Rank,
    pub owner: PlayerSlot,
    pub position: Option<CellIndex>,
}

impl Piece {
    pub fn is_captured(&self) -> bool {
        self.position.is_none()
    }
}

/// One entry of a submitted army arrangement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub rank: Rank,
    pub cell: CellIndex,
}

/// A move as submitted by a client or an automated mover.
///
/// `sequence` is the number of moves the session had accepted when the
/// mover decided on this move (see `GameSession::move_count`). A
/// retransmitted request carries the same sequence and is rejected instead
/// of being applied twice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub sequence: u64,
    pub from: CellIndex,
    pub to: CellIndex,
}
