// Session events and the per-player sinks that receive them.
//
// A `GameSession` notifies its participants of every state change through an
// `EventSink` registered for each seat when the seat is taken. Events are
// produced per recipient while the session lock is held, which gives each
// player a gap-free, correctly ordered stream without any global event bus.
//
// Events never carry the opponent's ranks while the game is running:
// `PlacementSubmitted` lists cells only and `TurnTaken` reports the combat
// outcome without naming the pieces. `OpponentSelected` names a cell only.
// `GameOver` carries the full reveal.
//
// Sinks must not block. The transport adapter's sink pushes into an
// unbounded channel drained by a writer thread; tests use a plain
// `mpsc::Sender<SessionEvent>`.

use serde::{Deserialize, Serialize};
use std::sync::mpsc::Sender;

use crate::rank::CombatOutcome;
use crate::types::{CellIndex, Piece, PlayerSlot};

/// What happened on the board during a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveOutcome {
    /// The piece moved to an empty cell.
    Moved,
    /// The piece challenged an opponent piece.
    Challenge(CombatOutcome),
}

impl MoveOutcome {
    pub fn is_challenge(self) -> bool {
        matches!(self, MoveOutcome::Challenge(_))
    }
}

/// Why a match ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameOverReason {
    FlagCaptured,
    FlagReachedBackRank,
    /// The side to move had no legal move and loses.
    NoLegalMoves,
    /// Too many consecutive moves without a challenge. Always a draw.
    Inactivity,
    /// The other player left.
    Forfeit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameResult {
    /// `None` for a draw.
    pub winner: Option<PlayerSlot>,
    pub reason: GameOverReason,
}

impl GameResult {
    pub fn win(winner: PlayerSlot, reason: GameOverReason) -> Self {
        Self {
            winner: Some(winner),
            reason,
        }
    }

    pub fn draw(reason: GameOverReason) -> Self {
        Self {
            winner: None,
            reason,
        }
    }

    pub fn is_draw(&self) -> bool {
        self.winner.is_none()
    }
}

/// A state change as seen by one participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// Sent to Player-A when Player-B takes the second seat.
    OpponentJoined { opponent_name: String },
    /// Someone's army is on the board. `started` is set once both are.
    PlacementSubmitted {
        slot: PlayerSlot,
        cells: Vec<CellIndex>,
        started: bool,
    },
    TurnTaken {
        sequence: u64,
        mover: PlayerSlot,
        from: CellIndex,
        to: CellIndex,
        outcome: MoveOutcome,
        /// `None` once the game is over.
        next_turn: Option<PlayerSlot>,
    },
    /// The player to move picked up the piece on `cell`.
    OpponentSelected { cell: CellIndex },
    /// Final result, with every piece (captured or not) revealed.
    GameOver {
        result: GameResult,
        pieces: Vec<Piece>,
    },
    OpponentLeft,
    /// The session was reclaimed after a period of inactivity.
    Expired,
}

/// Receiver of one participant's events.
pub trait EventSink: Send {
    fn deliver(&self, event: SessionEvent);
}

impl EventSink for Sender<SessionEvent> {
    fn deliver(&self, event: SessionEvent) {
        // A closed receiver means the participant is gone; `leave` follows.
        let _ = self.send(event);
    }
}
