// generals_engine: authoritative rules and session state for Generals.
//
// This crate holds everything that decides what is legal and what happened:
// the piece and board model, the per-match state machine, and the registry
// that keeps many matches isolated from each other. It performs no I/O and
// spawns no threads; the transport (`generals_server`) calls into the
// registry from its connection threads and receives session events through
// the `EventSink` it registers for each seat.
//
// Module overview:
// - `types.rs`:    IDs, cell addressing, player slots, phases, pieces, moves.
// - `rank.rs`:     The closed `Rank` enum and the `CombatTable` that resolves
//                  challenges (special rules first, then strength order).
// - `board.rs`:    Grid geometry, territories, obstacles, adjacency, paths.
// - `config.rs`:   `GameRules`: board, army, combat table, movement classes,
//                  inactivity draw threshold, flag home run. JSON loadable.
// - `error.rs`:    `GameError` and its wire classification `ErrorKind`.
// - `event.rs`:    `SessionEvent`, `EventSink`, game results.
// - `session.rs`:  `GameSession`, the Created → Joined → Active → Over
//                  state machine.
// - `registry.rs`: `SessionRegistry`: concurrent session store, expiry sweep,
//                  stats snapshots.
//
// Design decisions:
// - **Hidden information is enforced here, not in the transport.** Events and
//   views are built per recipient, so nothing downstream can leak an
//   opponent's ranks by accident.
// - **One lock per session.** Different matches never contend; see the
//   header of `registry.rs` for the lock ordering rules.
// - **Rules are data.** The default is the Game of the Generals; other
//   Stratego-family variants are a JSON file away.

pub mod board;
pub mod config;
pub mod error;
pub mod event;
pub mod rank;
pub mod registry;
pub mod session;
pub mod types;

pub use board::{Board, Territory};
pub use config::{ArmyEntry, ConfigError, GameRules, MovementRules};
pub use error::{ErrorKind, GameError, MoveError, PlacementError};
pub use event::{EventSink, GameOverReason, GameResult, MoveOutcome, SessionEvent};
pub use rank::{CombatOutcome, CombatRule, CombatTable, Rank, RankMatch, resolve_combat};
pub use registry::{Seat, SessionHandle, SessionRegistry, StatsSnapshot, sanitize_name};
pub use session::{
    BoardView, GameSession, HiddenPiece, JoinInfo, LeaveOutcome, PlacementAccepted,
    SessionSummary, TurnResult,
};
pub use types::{CellIndex, MoveRequest, Phase, Piece, Placement, PlayerId, PlayerSlot, SessionId};
