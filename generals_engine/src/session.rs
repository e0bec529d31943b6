// Per-match state machine.
//
// `GameSession` is the authoritative record of one match: both seats, both
// armies, whose turn it is, and the counters that drive the draw and replay
// rules. The registry (`registry.rs`) wraps each session in its own mutex,
// so every method here runs with exclusive access and never needs to think
// about concurrency.
//
// Lifecycle: `Created` (Player-A alone) → `Joined` (both seated, armies being
// placed) → `Active` (turns alternate, Player-A first) → `Over`. The
// registry destroys sessions on expiry, on a leave before anyone joined, or
// once both players have left a finished game.
//
// Every mutating method validates completely before it changes anything, so
// a rejected call leaves the session exactly as it was. Validation of moves
// produces a `MovePlan`; applying a plan cannot fail.
//
// Board storage: each player owns a `Vec<Piece>`; `grid` maps every cell to
// the piece standing on it (`PieceKey` = owner + index). Captured pieces stay
// in their owner's vector with `position == None` so they can be revealed
// when the game ends, but they are absent from `grid` and therefore from
// every legality check.
//
// End-of-turn checks, in order: a flag was captured; a pending flag run
// survived the reply; the mover's flag just reached the far rank; the
// inactivity limit was reached (draw); the side to move has no legal move
// (it loses). The last check also runs once when the game starts.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::board::Territory;
use crate::config::GameRules;
use crate::error::{GameError, MoveError, PlacementError};
use crate::event::{EventSink, GameOverReason, GameResult, MoveOutcome, SessionEvent};
use crate::rank::{CombatOutcome, Rank};
use crate::types::{CellIndex, MoveRequest, Phase, Piece, Placement, PlayerId, PlayerSlot, SessionId};

// ---------------------------------------------------------------------------
// Results handed back to callers
// ---------------------------------------------------------------------------

/// Returned to Player-B on a successful join.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinInfo {
    pub player_id: PlayerId,
    pub slot: PlayerSlot,
    pub opponent_name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementAccepted {
    /// Both armies are placed and the first turn belongs to Player-A.
    pub started: bool,
    /// Set when the game ended on the spot because Player-A had no move.
    pub result: Option<GameResult>,
}

/// An accepted move.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnResult {
    pub sequence: u64,
    pub mover: PlayerSlot,
    pub from: CellIndex,
    pub to: CellIndex,
    pub outcome: MoveOutcome,
    /// `None` when this move ended the game.
    pub next_turn_owner: Option<PlayerSlot>,
    pub result: Option<GameResult>,
}

impl TurnResult {
    pub fn is_game_over(&self) -> bool {
        self.result.is_some()
    }

    pub fn winner(&self) -> Option<PlayerSlot> {
        self.result.and_then(|r| r.winner)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// Set when the departure ended a running game by forfeit.
    pub result: Option<GameResult>,
    /// Nobody is left who cares about this session; the registry drops it.
    pub discard: bool,
}

/// An opponent piece as the other player is allowed to see it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HiddenPiece {
    pub position: Option<CellIndex>,
    /// Only filled in once the game is over.
    pub rank: Option<Rank>,
}

/// One player's view of the session, safe to send to that player.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardView {
    pub session_id: SessionId,
    pub phase: Phase,
    pub you: PlayerSlot,
    pub opponent_name: Option<String>,
    pub turn_owner: Option<PlayerSlot>,
    pub move_count: u64,
    pub no_challenge_count: u32,
    pub own_pieces: Vec<Piece>,
    pub opponent_pieces: Vec<HiddenPiece>,
    pub result: Option<GameResult>,
}

/// Read-only facts about a session for monitoring.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub phase: Phase,
    pub player_a_name: String,
    pub player_b_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub no_challenge_count: u32,
    pub move_count: u64,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PieceKey {
    owner: PlayerSlot,
    index: usize,
}

struct Player {
    id: PlayerId,
    name: String,
    pieces: Vec<Piece>,
    placed: bool,
    departed: bool,
    joined_at: DateTime<Utc>,
    sink: Option<Box<dyn EventSink>>,
}

impl Player {
    fn new(name: String, sink: Option<Box<dyn EventSink>>, now: DateTime<Utc>) -> Self {
        Self {
            id: PlayerId::new_random(),
            name,
            pieces: Vec::new(),
            placed: false,
            departed: false,
            joined_at: now,
            sink,
        }
    }
}

/// A validated move, ready to apply.
struct MovePlan {
    mover: PieceKey,
    defender: Option<PieceKey>,
    outcome: MoveOutcome,
}

/// State of a single match.
pub struct GameSession {
    id: SessionId,
    rules: Arc<GameRules>,
    phase: Phase,
    players: [Option<Player>; 2],
    turn_owner: PlayerSlot,
    no_challenge_count: u32,
    move_count: u64,
    last_move: Option<(PlayerSlot, MoveRequest)>,
    /// A flag that reached the far rank next to an enemy piece; it wins if
    /// it survives the opponent's reply.
    pending_flag_run: Option<PlayerSlot>,
    result: Option<GameResult>,
    grid: Vec<Option<PieceKey>>,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    destroyed: bool,
}

impl GameSession {
    /// Open a session with the creator in seat A. Returns the creator's ID.
    pub fn new(
        id: SessionId,
        rules: Arc<GameRules>,
        creator_name: String,
        sink: Option<Box<dyn EventSink>>,
        now: DateTime<Utc>,
    ) -> (Self, PlayerId) {
        let creator = Player::new(creator_name, sink, now);
        let creator_id = creator.id;
        let cells = rules.board.cell_count();
        let session = Self {
            id,
            rules,
            phase: Phase::Created,
            players: [Some(creator), None],
            turn_owner: PlayerSlot::A,
            no_challenge_count: 0,
            move_count: 0,
            last_move: None,
            pending_flag_run: None,
            result: None,
            grid: vec![None; cells],
            created_at: now,
            last_activity_at: now,
            destroyed: false,
        };
        (session, creator_id)
    }

    // -- accessors ----------------------------------------------------------

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn rules(&self) -> &GameRules {
        &self.rules
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn turn_owner(&self) -> PlayerSlot {
        self.turn_owner
    }

    pub fn no_challenge_count(&self) -> u32 {
        self.no_challenge_count
    }

    /// Moves accepted so far; the `sequence` the next move must carry.
    pub fn move_count(&self) -> u64 {
        self.move_count
    }

    pub fn result(&self) -> Option<GameResult> {
        self.result
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }

    pub fn player_id(&self, slot: PlayerSlot) -> Option<PlayerId> {
        self.players[slot.index()].as_ref().map(|p| p.id)
    }

    pub fn player_name(&self, slot: PlayerSlot) -> Option<&str> {
        self.players[slot.index()].as_ref().map(|p| p.name.as_str())
    }

    pub fn joined_at(&self, slot: PlayerSlot) -> Option<DateTime<Utc>> {
        self.players[slot.index()].as_ref().map(|p| p.joined_at)
    }

    pub fn pieces(&self, slot: PlayerSlot) -> &[Piece] {
        self.players[slot.index()]
            .as_ref()
            .map(|p| p.pieces.as_slice())
            .unwrap_or_default()
    }

    /// Non-captured pieces of both sides.
    pub fn live_piece_count(&self) -> usize {
        self.grid.iter().filter(|cell| cell.is_some()).count()
    }

    pub fn piece_at(&self, cell: CellIndex) -> Option<&Piece> {
        let key = (*self.grid.get(usize::from(cell.0))?)?;
        self.piece(key)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Called by the registry under the session lock as it drops the entry.
    /// Operations that were waiting on the lock then see `SessionNotFound`.
    pub(crate) fn mark_destroyed(&mut self) {
        self.destroyed = true;
    }

    pub(crate) fn notify_expired(&self) {
        self.broadcast(&SessionEvent::Expired);
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            phase: self.phase,
            player_a_name: self.player_name(PlayerSlot::A).unwrap_or_default().to_owned(),
            player_b_name: self.player_name(PlayerSlot::B).map(str::to_owned),
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
            no_challenge_count: self.no_challenge_count,
            move_count: self.move_count,
        }
    }

    // -- operations ---------------------------------------------------------

    /// Seat Player-B. Only valid while Player-A is waiting alone.
    pub fn join(
        &mut self,
        name: String,
        sink: Option<Box<dyn EventSink>>,
        now: DateTime<Utc>,
    ) -> Result<JoinInfo, GameError> {
        if self.phase != Phase::Created {
            return Err(GameError::SessionFull);
        }
        let opponent_name = self
            .player_name(PlayerSlot::A)
            .unwrap_or_default()
            .to_owned();
        let joiner = Player::new(name.clone(), sink, now);
        let player_id = joiner.id;
        self.players[PlayerSlot::B.index()] = Some(joiner);
        self.phase = Phase::Joined;
        self.touch(now);

        info!(session = %self.id, "player B joined");
        self.emit(
            PlayerSlot::A,
            SessionEvent::OpponentJoined {
                opponent_name: name,
            },
        );
        Ok(JoinInfo {
            player_id,
            slot: PlayerSlot::B,
            opponent_name,
        })
    }

    /// Put a player's army on the board.
    pub fn submit_placement(
        &mut self,
        player: PlayerId,
        placements: &[Placement],
        now: DateTime<Utc>,
    ) -> Result<PlacementAccepted, GameError> {
        let slot = self.seated(player)?;
        if self.phase != Phase::Joined {
            return Err(PlacementError::WrongPhase(self.phase).into());
        }
        if self.players[slot.index()].as_ref().is_some_and(|p| p.placed) {
            return Err(PlacementError::AlreadySubmitted.into());
        }
        self.validate_placement(slot, placements)?;
        if let Some(taken) = placements
            .iter()
            .find(|p| self.grid[usize::from(p.cell.0)].is_some())
        {
            return Err(self.internal(format!(
                "cell {} already occupied while placing {slot}'s army",
                taken.cell
            )));
        }

        let pieces: Vec<Piece> = placements
            .iter()
            .map(|p| Piece {
                rank: p.rank,
                owner: slot,
                position: Some(p.cell),
            })
            .collect();
        for (index, piece) in pieces.iter().enumerate() {
            if let Some(cell) = piece.position {
                self.grid[usize::from(cell.0)] = Some(PieceKey { owner: slot, index });
            }
        }
        if let Some(p) = self.players[slot.index()].as_mut() {
            p.pieces = pieces;
            p.placed = true;
        }
        self.touch(now);

        let started = self.players.iter().flatten().filter(|p| p.placed).count() == 2;
        if started {
            self.phase = Phase::Active;
            self.turn_owner = PlayerSlot::A;
            info!(session = %self.id, "both armies placed, game started");
        }

        let mut cells: Vec<CellIndex> = placements.iter().map(|p| p.cell).collect();
        cells.sort();
        self.broadcast(&SessionEvent::PlacementSubmitted {
            slot,
            cells,
            started,
        });

        // Player-A moves first; a side that is stuck from the outset loses
        // straight away rather than leaving the session waiting on it.
        let mut result = None;
        if started && self.legal_moves(PlayerSlot::A).is_empty() {
            let stuck = GameResult::win(PlayerSlot::B, GameOverReason::NoLegalMoves);
            self.finish(stuck);
            result = Some(stuck);
        }
        Ok(PlacementAccepted { started, result })
    }

    /// Show the opponent which piece the caller is about to move. The rank
    /// is never sent.
    pub fn select_piece(
        &mut self,
        player: PlayerId,
        cell: CellIndex,
        now: DateTime<Utc>,
    ) -> Result<(), GameError> {
        let slot = self.seated(player)?;
        if self.phase != Phase::Active || slot != self.turn_owner {
            return Err(GameError::NotYourTurn);
        }
        if !self.rules.board.contains(cell) {
            return Err(MoveError::OutOfBounds(cell).into());
        }
        if !self.grid[usize::from(cell.0)].is_some_and(|key| key.owner == slot) {
            return Err(MoveError::NoPieceAtOrigin(cell).into());
        }
        self.touch(now);
        debug!(session = %self.id, player = %slot, cell = %cell, "piece selected");
        self.emit(slot.opponent(), SessionEvent::OpponentSelected { cell });
        Ok(())
    }

    /// Apply one move for the player whose turn it is.
    pub fn take_turn(
        &mut self,
        player: PlayerId,
        request: MoveRequest,
        now: DateTime<Utc>,
    ) -> Result<TurnResult, GameError> {
        let slot = self.seated(player)?;
        if self.last_move == Some((slot, request)) {
            return Err(GameError::DuplicateMove {
                sequence: request.sequence,
            });
        }
        if self.phase != Phase::Active || slot != self.turn_owner {
            return Err(GameError::NotYourTurn);
        }
        if request.sequence != self.move_count {
            return Err(GameError::OutOfSequence {
                expected: self.move_count,
                got: request.sequence,
            });
        }
        let plan = self.plan_move(slot, request.from, request.to)?;

        let captured = self.apply(&plan, request.from, request.to);
        self.move_count += 1;
        self.last_move = Some((slot, request));
        self.touch(now);

        let result = self.evaluate_end(slot, &plan, request.to, &captured);
        self.turn_owner = slot.opponent();
        let next_turn_owner = match result {
            Some(_) => None,
            None => Some(self.turn_owner),
        };
        debug!(
            session = %self.id,
            sequence = request.sequence,
            mover = %slot,
            from = %request.from,
            to = %request.to,
            outcome = ?plan.outcome,
            "turn taken"
        );

        self.broadcast(&SessionEvent::TurnTaken {
            sequence: request.sequence,
            mover: slot,
            from: request.from,
            to: request.to,
            outcome: plan.outcome,
            next_turn: next_turn_owner,
        });
        if let Some(result) = result {
            self.finish(result);
        }

        Ok(TurnResult {
            sequence: request.sequence,
            mover: slot,
            from: request.from,
            to: request.to,
            outcome: plan.outcome,
            next_turn_owner,
            result,
        })
    }

    /// A player disconnected or quit.
    pub fn leave(&mut self, player: PlayerId, now: DateTime<Utc>) -> Result<LeaveOutcome, GameError> {
        // Departed players are accepted here so a repeated leave is a no-op.
        let slot = [PlayerSlot::A, PlayerSlot::B]
            .into_iter()
            .find(|&slot| {
                self.players[slot.index()]
                    .as_ref()
                    .is_some_and(|p| p.id == player)
            })
            .ok_or(GameError::PlayerNotFound(player))?;

        let already_departed = self.players[slot.index()]
            .as_ref()
            .is_some_and(|p| p.departed);
        if already_departed {
            return Ok(LeaveOutcome {
                result: None,
                discard: self.everyone_departed(),
            });
        }
        if let Some(p) = self.players[slot.index()].as_mut() {
            p.departed = true;
            p.sink = None;
        }
        self.touch(now);
        info!(session = %self.id, player = %slot, phase = %self.phase, "player left");

        match self.phase {
            Phase::Created => Ok(LeaveOutcome {
                result: None,
                discard: true,
            }),
            Phase::Joined | Phase::Active => {
                let result = GameResult::win(slot.opponent(), GameOverReason::Forfeit);
                self.emit(slot.opponent(), SessionEvent::OpponentLeft);
                self.finish(result);
                Ok(LeaveOutcome {
                    result: Some(result),
                    discard: false,
                })
            }
            Phase::Over => {
                self.emit(slot.opponent(), SessionEvent::OpponentLeft);
                Ok(LeaveOutcome {
                    result: None,
                    discard: self.everyone_departed(),
                })
            }
        }
    }

    /// What `player` is allowed to see.
    pub fn view_for(&self, player: PlayerId) -> Result<BoardView, GameError> {
        let you = self.seated(player)?;
        let reveal = self.phase == Phase::Over;
        let opponent_pieces = self
            .pieces(you.opponent())
            .iter()
            .map(|p| HiddenPiece {
                position: p.position,
                rank: reveal.then_some(p.rank),
            })
            .collect();
        Ok(BoardView {
            session_id: self.id,
            phase: self.phase,
            you,
            opponent_name: self.player_name(you.opponent()).map(str::to_owned),
            turn_owner: (self.phase == Phase::Active).then_some(self.turn_owner),
            move_count: self.move_count,
            no_challenge_count: self.no_challenge_count,
            own_pieces: self.pieces(you).to_vec(),
            opponent_pieces,
            result: self.result,
        })
    }

    /// Every legal `(from, to)` for `slot` on the current board, regardless
    /// of whose turn it is.
    pub fn legal_moves(&self, slot: PlayerSlot) -> Vec<(CellIndex, CellIndex)> {
        let board = &self.rules.board;
        let mut moves = Vec::new();
        for piece in self.pieces(slot) {
            let Some(from) = piece.position else {
                continue;
            };
            if self.rules.is_immobile(piece.rank) {
                continue;
            }
            for first in board.neighbors(from) {
                if !self.can_enter(slot, first) {
                    continue;
                }
                moves.push((from, first));
                if !self.rules.is_long_range(piece.rank) || self.grid[usize::from(first.0)].is_some() {
                    continue;
                }
                // Keep sliding in the same direction through empty cells.
                let (mut prev, mut cur) = (from, first);
                while let Some(next) = self.continue_line(prev, cur) {
                    if !self.can_enter(slot, next) {
                        break;
                    }
                    moves.push((from, next));
                    if self.grid[usize::from(next.0)].is_some() {
                        break;
                    }
                    (prev, cur) = (cur, next);
                }
            }
        }
        moves
    }

    // -- validation ---------------------------------------------------------

    fn validate_placement(&self, slot: PlayerSlot, placements: &[Placement]) -> Result<(), PlacementError> {
        let expected = self.rules.army_size();
        if placements.len() != expected {
            return Err(PlacementError::WrongCount {
                expected,
                got: placements.len(),
            });
        }

        let board = &self.rules.board;
        let mut seen = BTreeSet::new();
        let mut submitted: BTreeMap<Rank, usize> = BTreeMap::new();
        for p in placements {
            if !board.contains(p.cell) {
                return Err(PlacementError::OutOfBounds(p.cell));
            }
            if board.territory_of(p.cell) != Territory::Home(slot) {
                return Err(PlacementError::OutsideTerritory(p.cell));
            }
            if !seen.insert(p.cell) {
                return Err(PlacementError::DuplicateCell(p.cell));
            }
            *submitted.entry(p.rank).or_insert(0) += 1;
        }

        let army = self.rules.army_counts();
        for rank in Rank::ALL {
            let want = army.get(&rank).copied().unwrap_or(0);
            let got = submitted.get(&rank).copied().unwrap_or(0);
            if want != got {
                return Err(PlacementError::RankMismatch {
                    rank,
                    expected: want,
                    got,
                });
            }
        }
        Ok(())
    }

    fn plan_move(&self, slot: PlayerSlot, from: CellIndex, to: CellIndex) -> Result<MovePlan, GameError> {
        let board = &self.rules.board;
        for cell in [from, to] {
            if !board.contains(cell) {
                return Err(MoveError::OutOfBounds(cell).into());
            }
        }
        let mover = match self.grid[usize::from(from.0)] {
            Some(key) if key.owner == slot => key,
            _ => return Err(MoveError::NoPieceAtOrigin(from).into()),
        };
        let rank = self.checked_piece(mover, from)?.rank;
        if self.rules.is_immobile(rank) {
            return Err(MoveError::Immobile(rank).into());
        }
        if board.is_obstacle(to) {
            return Err(MoveError::Obstacle(to).into());
        }
        let defender = self.grid[usize::from(to.0)];
        if defender.is_some_and(|key| key.owner == slot) {
            return Err(MoveError::OwnPieceAtTarget(to).into());
        }
        if !board.is_adjacent(from, to) {
            let path = if self.rules.is_long_range(rank) {
                board.straight_path(from, to)
            } else {
                None
            };
            let Some(path) = path else {
                return Err(MoveError::NotAdjacent { from, to }.into());
            };
            if let Some(&blocked) = path
                .iter()
                .find(|&&c| board.is_obstacle(c) || self.grid[usize::from(c.0)].is_some())
            {
                return Err(MoveError::PathBlocked(blocked).into());
            }
        }

        let outcome = match defender {
            None => MoveOutcome::Moved,
            Some(key) => {
                let defending = self.checked_piece(key, to)?.rank;
                MoveOutcome::Challenge(self.rules.combat.resolve(rank, defending))
            }
        };
        Ok(MovePlan {
            mover,
            defender,
            outcome,
        })
    }

    // -- mutation -----------------------------------------------------------

    /// Carry out a validated plan. Returns the pieces captured.
    fn apply(&mut self, plan: &MovePlan, from: CellIndex, to: CellIndex) -> Vec<PieceKey> {
        let mut captured = Vec::new();
        match plan.outcome {
            MoveOutcome::Moved => {
                self.relocate(plan.mover, from, to);
                self.no_challenge_count += 1;
            }
            MoveOutcome::Challenge(combat) => {
                let defender = plan.defender;
                match combat {
                    CombatOutcome::AttackerWins => {
                        captured.extend(defender);
                        if let Some(key) = defender {
                            self.capture(key);
                        }
                        self.relocate(plan.mover, from, to);
                    }
                    CombatOutcome::DefenderWins => {
                        captured.push(plan.mover);
                        self.capture(plan.mover);
                    }
                    CombatOutcome::Draw => {
                        captured.push(plan.mover);
                        captured.extend(defender);
                        self.capture(plan.mover);
                        if let Some(key) = defender {
                            self.capture(key);
                        }
                    }
                }
                self.no_challenge_count = 0;
            }
        }
        captured
    }

    fn relocate(&mut self, key: PieceKey, from: CellIndex, to: CellIndex) {
        self.grid[usize::from(from.0)] = None;
        self.grid[usize::from(to.0)] = Some(key);
        if let Some(piece) = self.piece_mut(key) {
            piece.position = Some(to);
        }
    }

    fn capture(&mut self, key: PieceKey) {
        let Some(piece) = self.piece_mut(key) else {
            return;
        };
        let old = piece.position.take();
        if let Some(cell) = old {
            self.grid[usize::from(cell.0)] = None;
        }
    }

    fn evaluate_end(
        &mut self,
        mover: PlayerSlot,
        plan: &MovePlan,
        to: CellIndex,
        captured: &[PieceKey],
    ) -> Option<GameResult> {
        let lost_flag = |slot: PlayerSlot| {
            captured
                .iter()
                .filter(|k| k.owner == slot)
                .filter_map(|&k| self.piece(k))
                .any(|p| p.rank.is_terminal())
        };
        match (lost_flag(mover), lost_flag(mover.opponent())) {
            (false, true) => return Some(GameResult::win(mover, GameOverReason::FlagCaptured)),
            (true, false) => {
                return Some(GameResult::win(mover.opponent(), GameOverReason::FlagCaptured));
            }
            (true, true) => return Some(GameResult::draw(GameOverReason::FlagCaptured)),
            (false, false) => {}
        }

        if let Some(runner) = self.pending_flag_run.take() {
            if runner != mover && self.flag_on_far_rank(runner) {
                return Some(GameResult::win(runner, GameOverReason::FlagReachedBackRank));
            }
        }

        if self.rules.flag_home_run {
            let arrived = matches!(
                plan.outcome,
                MoveOutcome::Moved | MoveOutcome::Challenge(CombatOutcome::AttackerWins)
            );
            let is_flag = self.piece(plan.mover).is_some_and(|p| p.rank.is_terminal());
            if arrived && is_flag && self.rules.board.is_on_opponent_back_rank(mover, to) {
                let threatened = self
                    .rules
                    .board
                    .neighbors(to)
                    .into_iter()
                    .any(|c| self.grid[usize::from(c.0)].is_some_and(|k| k.owner != mover));
                if !threatened {
                    return Some(GameResult::win(mover, GameOverReason::FlagReachedBackRank));
                }
                self.pending_flag_run = Some(mover);
            }
        }

        if self.no_challenge_count >= self.rules.inactivity_draw_limit {
            return Some(GameResult::draw(GameOverReason::Inactivity));
        }

        if self.legal_moves(mover.opponent()).is_empty() {
            return Some(GameResult::win(mover, GameOverReason::NoLegalMoves));
        }
        None
    }

    fn finish(&mut self, result: GameResult) {
        self.phase = Phase::Over;
        self.result = Some(result);
        self.pending_flag_run = None;
        info!(session = %self.id, winner = ?result.winner, reason = ?result.reason, "game over");
        let pieces: Vec<Piece> = self
            .players
            .iter()
            .flatten()
            .flat_map(|p| p.pieces.iter().copied())
            .collect();
        self.broadcast(&SessionEvent::GameOver { result, pieces });
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_activity_at {
            self.last_activity_at = now;
        }
    }

    // -- helpers ------------------------------------------------------------

    /// Slot of a seated, still-present player.
    fn seated(&self, player: PlayerId) -> Result<PlayerSlot, GameError> {
        [PlayerSlot::A, PlayerSlot::B]
            .into_iter()
            .find(|&slot| {
                self.players[slot.index()]
                    .as_ref()
                    .is_some_and(|p| p.id == player && !p.departed)
            })
            .ok_or(GameError::PlayerNotFound(player))
    }

    fn everyone_departed(&self) -> bool {
        self.players.iter().flatten().all(|p| p.departed)
    }

    fn piece(&self, key: PieceKey) -> Option<&Piece> {
        self.players[key.owner.index()].as_ref()?.pieces.get(key.index)
    }

    fn piece_mut(&mut self, key: PieceKey) -> Option<&mut Piece> {
        self.players[key.owner.index()]
            .as_mut()?
            .pieces
            .get_mut(key.index)
    }

    /// The piece `grid` says is on `cell`, cross-checked against its own
    /// recorded position.
    fn checked_piece(&self, key: PieceKey, cell: CellIndex) -> Result<&Piece, GameError> {
        match self.piece(key) {
            Some(piece) if piece.position == Some(cell) => Ok(piece),
            _ => Err(self.internal(format!("grid and pieces disagree about {cell}"))),
        }
    }

    fn can_enter(&self, slot: PlayerSlot, cell: CellIndex) -> bool {
        !self.rules.board.is_obstacle(cell)
            && !self.grid[usize::from(cell.0)].is_some_and(|k| k.owner == slot)
    }

    /// Next cell past `cur` on the line from `prev` through `cur`.
    fn continue_line(&self, prev: CellIndex, cur: CellIndex) -> Option<CellIndex> {
        let board = &self.rules.board;
        let (pr, pc) = board.row_col(prev)?;
        let (cr, cc) = board.row_col(cur)?;
        let row = (i32::from(cr) + i32::from(cr) - i32::from(pr)).try_into().ok()?;
        let col = (i32::from(cc) + i32::from(cc) - i32::from(pc)).try_into().ok()?;
        board.cell_at(row, col)
    }

    fn flag_on_far_rank(&self, slot: PlayerSlot) -> bool {
        self.pieces(slot).iter().any(|p| {
            p.rank.is_terminal()
                && p.position
                    .is_some_and(|c| self.rules.board.is_on_opponent_back_rank(slot, c))
        })
    }

    fn internal(&self, message: String) -> GameError {
        error!(session = %self.id, "{message}");
        GameError::Internal(message)
    }

    fn emit(&self, slot: PlayerSlot, event: SessionEvent) {
        if let Some(player) = self.players[slot.index()].as_ref() {
            if player.departed {
                return;
            }
            if let Some(sink) = player.sink.as_ref() {
                sink.deliver(event);
            }
        }
    }

    fn broadcast(&self, event: &SessionEvent) {
        self.emit(PlayerSlot::A, event.clone());
        self.emit(PlayerSlot::B, event.clone());
    }
}
