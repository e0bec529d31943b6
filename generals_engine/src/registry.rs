// Process-wide store of live game sessions.
//
// `SessionRegistry` is created once at startup and shared by `Arc` with every
// connection handler. It is the single entry point for session operations:
// callers pass a `SessionId` and the registry locks exactly that session.
//
// Locking layout: the map is a `DashMap<SessionId, Arc<SessionEntry>>`. Map
// guards are held only long enough to insert, remove, or clone an entry
// out; no code path waits on a session mutex while holding a map guard.
// Each entry pairs the session's `parking_lot::Mutex` with a small
// `RwLock<SessionSummary>` that is refreshed at the end of every locked
// operation, so `stats()` never touches a session lock.
//
// Destruction (expiry sweep, discard, `destroy`) always goes through the
// session lock and sets the session's `destroyed` flag before the entry
// leaves the map. A caller that cloned the entry just before removal and was
// waiting on the lock then sees `SessionNotFound`, exactly as if it had
// arrived a moment later.
//
// See also: `session.rs` for the per-match state machine, and
// `generals_server::server` for the connection handling that drives this.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{ConfigError, GameRules};
use crate::error::GameError;
use crate::event::EventSink;
use crate::session::{
    BoardView, GameSession, LeaveOutcome, PlacementAccepted, SessionSummary, TurnResult,
};
use crate::types::{CellIndex, MoveRequest, Placement, PlayerId, PlayerSlot, SessionId};

/// Longest player name kept, in characters.
pub const MAX_NAME_CHARS: usize = 32;

/// Name given to players who did not supply a usable one.
pub const DEFAULT_PLAYER_NAME: &str = "Anonymous";

/// A taken seat: what a client needs to act in a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    pub session_id: SessionId,
    pub player_id: PlayerId,
    pub slot: PlayerSlot,
    /// The other player's name, if one is already seated.
    pub opponent_name: Option<String>,
}

/// Point-in-time listing of every live session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub count: usize,
    pub server_time: DateTime<Utc>,
    /// Oldest session first.
    pub online: Vec<SessionSummary>,
}

struct SessionEntry {
    session: Mutex<GameSession>,
    summary: RwLock<SessionSummary>,
}

/// Read-only access to one session, obtained from `SessionRegistry::get`.
#[derive(Clone)]
pub struct SessionHandle {
    entry: Arc<SessionEntry>,
}

impl SessionHandle {
    /// Run `f` against the session under its lock.
    pub fn read<T>(&self, f: impl FnOnce(&GameSession) -> T) -> T {
        f(&self.entry.session.lock())
    }

    /// Latest summary, without taking the session lock.
    pub fn summary(&self) -> SessionSummary {
        self.entry.summary.read().clone()
    }
}

pub struct SessionRegistry {
    rules: Arc<GameRules>,
    sessions: DashMap<SessionId, Arc<SessionEntry>>,
}

impl SessionRegistry {
    /// Create an empty registry. The rules are validated once here and
    /// shared by every session it creates.
    pub fn new(rules: GameRules) -> Result<Self, ConfigError> {
        rules.validate()?;
        Ok(Self {
            rules: Arc::new(rules),
            sessions: DashMap::new(),
        })
    }

    pub fn rules(&self) -> &GameRules {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Open a new session with the caller as Player-A.
    pub fn create_game(&self, player_name: &str, sink: Option<Box<dyn EventSink>>) -> Seat {
        let now = Utc::now();
        let name = sanitize_name(player_name);
        loop {
            let session_id = SessionId::new_random();
            match self.sessions.entry(session_id) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(vacant) => {
                    let (session, player_id) =
                        GameSession::new(session_id, Arc::clone(&self.rules), name, sink, now);
                    let summary = session.summary();
                    vacant.insert(Arc::new(SessionEntry {
                        session: Mutex::new(session),
                        summary: RwLock::new(summary),
                    }));
                    info!(session = %session_id, "session created");
                    return Seat {
                        session_id,
                        player_id,
                        slot: PlayerSlot::A,
                        opponent_name: None,
                    };
                }
            }
        }
    }

    /// Take the second seat of a waiting session.
    pub fn join_game(
        &self,
        session_id: SessionId,
        player_name: &str,
        sink: Option<Box<dyn EventSink>>,
    ) -> Result<Seat, GameError> {
        let name = sanitize_name(player_name);
        let info = self.with_session(session_id, |session| session.join(name, sink, Utc::now()))?;
        Ok(Seat {
            session_id,
            player_id: info.player_id,
            slot: info.slot,
            opponent_name: Some(info.opponent_name),
        })
    }

    pub fn submit_placement(
        &self,
        session_id: SessionId,
        player: PlayerId,
        placements: &[Placement],
    ) -> Result<PlacementAccepted, GameError> {
        self.with_session(session_id, |session| {
            session.submit_placement(player, placements, Utc::now())
        })
    }

    pub fn take_turn(
        &self,
        session_id: SessionId,
        player: PlayerId,
        request: MoveRequest,
    ) -> Result<TurnResult, GameError> {
        self.with_session(session_id, |session| {
            session.take_turn(player, request, Utc::now())
        })
    }

    pub fn select_piece(
        &self,
        session_id: SessionId,
        player: PlayerId,
        cell: CellIndex,
    ) -> Result<(), GameError> {
        self.with_session(session_id, |session| {
            session.select_piece(player, cell, Utc::now())
        })
    }

    pub fn view(&self, session_id: SessionId, player: PlayerId) -> Result<BoardView, GameError> {
        self.with_session(session_id, |session| session.view_for(player))
    }

    /// A player is gone. Drops the session when nobody is left to care.
    pub fn leave(&self, session_id: SessionId, player: PlayerId) -> Result<LeaveOutcome, GameError> {
        let entry = self.entry(session_id)?;
        let mut session = entry.session.lock();
        if session.is_destroyed() {
            return Err(GameError::SessionNotFound(session_id));
        }
        let outcome = session.leave(player, Utc::now())?;
        if outcome.discard {
            session.mark_destroyed();
            self.sessions.remove(&session_id);
            info!(session = %session_id, "session discarded");
        } else {
            *entry.summary.write() = session.summary();
        }
        Ok(outcome)
    }

    pub fn get(&self, session_id: SessionId) -> Result<SessionHandle, GameError> {
        Ok(SessionHandle {
            entry: self.entry(session_id)?,
        })
    }

    /// Remove a session outright. Returns whether it was present.
    pub fn destroy(&self, session_id: SessionId) -> bool {
        let Ok(entry) = self.entry(session_id) else {
            return false;
        };
        let mut session = entry.session.lock();
        if session.is_destroyed() {
            return false;
        }
        session.mark_destroyed();
        self.sessions.remove(&session_id);
        info!(session = %session_id, "session destroyed");
        true
    }

    /// Destroy every session idle for longer than `timeout` as of `now`,
    /// whatever its phase. Returns the IDs removed.
    pub fn sweep_expired(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<SessionId> {
        let is_expired = |last_activity: DateTime<Utc>| {
            (now - last_activity)
                .to_std()
                .is_ok_and(|idle| idle > timeout)
        };

        // Summaries may lag an in-flight operation, so they only nominate
        // candidates; the decision is made under the session lock.
        let candidates: Vec<(SessionId, Arc<SessionEntry>)> = self
            .sessions
            .iter()
            .filter(|item| is_expired(item.value().summary.read().last_activity_at))
            .map(|item| (*item.key(), Arc::clone(item.value())))
            .collect();

        let mut removed = Vec::new();
        for (session_id, entry) in candidates {
            let mut session = entry.session.lock();
            if session.is_destroyed() || !is_expired(session.last_activity_at()) {
                continue;
            }
            session.notify_expired();
            session.mark_destroyed();
            self.sessions.remove(&session_id);
            info!(session = %session_id, phase = %session.phase(), "session expired");
            removed.push(session_id);
        }
        if !removed.is_empty() {
            debug!(count = removed.len(), remaining = self.sessions.len(), "sweep finished");
        }
        removed
    }

    /// Summaries of all live sessions. Never blocks on a session.
    pub fn stats(&self) -> StatsSnapshot {
        let mut online: Vec<SessionSummary> = self
            .sessions
            .iter()
            .map(|item| item.value().summary.read().clone())
            .collect();
        online.sort_by_key(|s| s.created_at);
        StatsSnapshot {
            count: online.len(),
            server_time: Utc::now(),
            online,
        }
    }

    fn entry(&self, session_id: SessionId) -> Result<Arc<SessionEntry>, GameError> {
        self.sessions
            .get(&session_id)
            .map(|item| Arc::clone(item.value()))
            .ok_or(GameError::SessionNotFound(session_id))
    }

    /// Lock one session, run `f`, refresh its summary.
    fn with_session<T>(
        &self,
        session_id: SessionId,
        f: impl FnOnce(&mut GameSession) -> Result<T, GameError>,
    ) -> Result<T, GameError> {
        let entry = self.entry(session_id)?;
        let mut session = entry.session.lock();
        if session.is_destroyed() {
            return Err(GameError::SessionNotFound(session_id));
        }
        let out = f(&mut session);
        *entry.summary.write() = session.summary();
        out
    }
}

/// Trim, drop control characters, cap the length. Never fails.
pub fn sanitize_name(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_NAME_CHARS)
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        DEFAULT_PLAYER_NAME.to_owned()
    } else {
        cleaned.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;

    use super::*;
    use crate::event::{GameOverReason, SessionEvent};
    use crate::types::Phase;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(GameRules::default()).unwrap()
    }

    /// Create, join, and place both armies. Returns (session, A, B).
    fn started(reg: &SessionRegistry) -> (SessionId, PlayerId, PlayerId) {
        let a = reg.create_game("Alice", None);
        let b = reg.join_game(a.session_id, "Bob", None).unwrap();
        let rules = reg.rules().clone();
        reg.submit_placement(a.session_id, a.player_id, &rules.sequential_placement(PlayerSlot::A))
            .unwrap();
        let accepted = reg
            .submit_placement(a.session_id, b.player_id, &rules.sequential_placement(PlayerSlot::B))
            .unwrap();
        assert!(accepted.started);
        (a.session_id, a.player_id, b.player_id)
    }

    fn mv(sequence: u64, from: u16, to: u16) -> MoveRequest {
        MoveRequest {
            sequence,
            from: CellIndex(from),
            to: CellIndex(to),
        }
    }

    #[test]
    fn invalid_rules_are_refused() {
        let mut rules = GameRules::default();
        rules.inactivity_draw_limit = 0;
        assert!(matches!(
            SessionRegistry::new(rules),
            Err(ConfigError::ZeroInactivityLimit)
        ));
    }

    #[test]
    fn create_and_join() {
        let reg = registry();
        let a = reg.create_game("  Alice  ", None);
        assert_eq!(a.slot, PlayerSlot::A);
        assert_eq!(reg.len(), 1);

        let b = reg.join_game(a.session_id, "Bob", None).unwrap();
        assert_eq!(b.slot, PlayerSlot::B);
        assert_eq!(b.opponent_name.as_deref(), Some("Alice"));
        assert_ne!(a.player_id, b.player_id);

        assert_eq!(
            reg.join_game(a.session_id, "Carol", None).unwrap_err(),
            GameError::SessionFull
        );
    }

    #[test]
    fn unknown_session_is_not_found() {
        let reg = registry();
        let missing = SessionId::new_random();
        assert_eq!(
            reg.join_game(missing, "Bob", None).unwrap_err(),
            GameError::SessionNotFound(missing)
        );
        assert!(reg.get(missing).is_err());
    }

    #[test]
    fn sessions_get_distinct_ids() {
        let reg = registry();
        let a = reg.create_game("one", None);
        let b = reg.create_game("two", None);
        assert_ne!(a.session_id, b.session_id);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn turns_go_through_the_registry() {
        let reg = registry();
        let (id, a, b) = started(&reg);
        let r = reg.take_turn(id, a, mv(0, 18, 27)).unwrap();
        assert_eq!(r.next_turn_owner, Some(PlayerSlot::B));
        assert_eq!(
            reg.take_turn(id, a, mv(1, 27, 28)).unwrap_err(),
            GameError::NotYourTurn
        );
        reg.take_turn(id, b, mv(1, 45, 36)).unwrap();

        let view = reg.view(id, b).unwrap();
        assert_eq!(view.move_count, 2);
        let summary = reg.get(id).unwrap().summary();
        assert_eq!(summary.move_count, 2);
        assert_eq!(summary.no_challenge_count, 2);
    }

    #[test]
    fn selection_reaches_only_the_opponent() {
        let reg = registry();
        let (a_tx, a_rx) = mpsc::channel::<SessionEvent>();
        let (b_tx, b_rx) = mpsc::channel::<SessionEvent>();
        let a = reg.create_game("Alice", Some(Box::new(a_tx)));
        let b = reg.join_game(a.session_id, "Bob", Some(Box::new(b_tx))).unwrap();
        let rules = reg.rules().clone();
        reg.submit_placement(a.session_id, a.player_id, &rules.sequential_placement(PlayerSlot::A))
            .unwrap();
        reg.submit_placement(a.session_id, b.player_id, &rules.sequential_placement(PlayerSlot::B))
            .unwrap();
        while a_rx.try_recv().is_ok() {}
        while b_rx.try_recv().is_ok() {}

        reg.select_piece(a.session_id, a.player_id, CellIndex(18)).unwrap();
        assert_eq!(
            b_rx.try_recv().unwrap(),
            SessionEvent::OpponentSelected {
                cell: CellIndex(18)
            }
        );
        assert!(a_rx.try_recv().is_err());
        assert_eq!(
            reg.select_piece(a.session_id, b.player_id, CellIndex(45)).unwrap_err(),
            GameError::NotYourTurn
        );
    }

    #[test]
    fn leaving_before_join_discards() {
        let reg = registry();
        let a = reg.create_game("Alice", None);
        let out = reg.leave(a.session_id, a.player_id).unwrap();
        assert!(out.discard);
        assert!(reg.is_empty());
        assert_eq!(
            reg.join_game(a.session_id, "Bob", None).unwrap_err(),
            GameError::SessionNotFound(a.session_id)
        );
    }

    #[test]
    fn forfeit_then_both_leave() {
        let reg = registry();
        let (id, a, b) = started(&reg);
        let out = reg.leave(id, b).unwrap();
        assert_eq!(out.result.unwrap().winner, Some(PlayerSlot::A));
        assert_eq!(out.result.unwrap().reason, GameOverReason::Forfeit);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(id).unwrap().read(|s| s.phase()), Phase::Over);

        assert!(reg.leave(id, a).unwrap().discard);
        assert!(reg.is_empty());
    }

    #[test]
    fn destroy_is_idempotent() {
        let reg = registry();
        let a = reg.create_game("Alice", None);
        let handle = reg.get(a.session_id).unwrap();
        assert!(reg.destroy(a.session_id));
        assert!(!reg.destroy(a.session_id));
        assert!(handle.read(|s| s.is_destroyed()));
        assert_eq!(
            reg.view(a.session_id, a.player_id).unwrap_err(),
            GameError::SessionNotFound(a.session_id)
        );
    }

    #[test]
    fn sweep_removes_idle_sessions_in_any_phase() {
        let reg = registry();
        let (tx, rx) = mpsc::channel();
        let waiting = reg.create_game("Alice", Some(Box::new(tx)));
        let (playing, _, _) = started(&reg);

        let timeout = Duration::from_secs(60);
        assert!(reg.sweep_expired(Utc::now(), timeout).is_empty());
        assert_eq!(reg.len(), 2);

        let later = Utc::now() + chrono::Duration::seconds(61);
        let mut removed = reg.sweep_expired(later, timeout);
        removed.sort();
        let mut expected = vec![waiting.session_id, playing];
        expected.sort();
        assert_eq!(removed, expected);
        assert!(reg.is_empty());
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Expired);
    }

    #[test]
    fn sweep_needs_idle_time_strictly_beyond_the_timeout() {
        let reg = registry();
        let a = reg.create_game("Alice", None);
        let last = reg.get(a.session_id).unwrap().summary().last_activity_at;
        let timeout = Duration::from_secs(30);

        assert!(reg.sweep_expired(last + chrono::Duration::seconds(30), timeout).is_empty());
        assert_eq!(reg.len(), 1);
        assert_eq!(
            reg.sweep_expired(last + chrono::Duration::milliseconds(30_001), timeout),
            vec![a.session_id]
        );
        assert!(reg.is_empty());
    }

    #[test]
    fn stats_list_sessions_without_changing_them() {
        let reg = registry();
        let (id, a, _) = started(&reg);
        reg.take_turn(id, a, mv(0, 18, 27)).unwrap();
        let lone = reg.create_game("Carol", None);

        let before = reg.stats();
        let after = reg.stats();
        assert_eq!(before.count, 2);
        assert_eq!(before.online, after.online);
        assert_eq!(before.online[0].id, id);
        assert_eq!(before.online[0].phase, Phase::Active);
        assert_eq!(before.online[0].player_b_name.as_deref(), Some("Bob"));
        assert_eq!(before.online[1].id, lone.session_id);
        assert_eq!(before.online[1].phase, Phase::Created);
    }

    #[test]
    fn independent_sessions_run_in_parallel() {
        let reg = Arc::new(registry());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&reg);
                thread::spawn(move || {
                    let (id, a, b) = started(&reg);
                    // Shuffle one piece per side until the move counter is 20.
                    for seq in 0..20u64 {
                        let (player, from, to) = match seq % 4 {
                            0 => (a, 18, 27),
                            1 => (b, 45, 36),
                            2 => (a, 27, 18),
                            _ => (b, 36, 45),
                        };
                        reg.take_turn(id, player, mv(seq, from, to)).unwrap();
                    }
                    id
                })
            })
            .collect();
        let ids: Vec<SessionId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(reg.len(), 8);
        for id in ids {
            let handle = reg.get(id).unwrap();
            assert_eq!(handle.read(|s| s.move_count()), 20);
            assert_eq!(handle.read(|s| s.live_piece_count()), 42);
        }
    }

    #[test]
    fn racing_turns_apply_exactly_once() {
        let reg = Arc::new(registry());
        let (id, a, _) = started(&reg);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let reg = Arc::clone(&reg);
                thread::spawn(move || reg.take_turn(id, a, mv(0, 18, 27)).is_ok())
            })
            .collect();
        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(accepted, 1);
        assert_eq!(reg.get(id).unwrap().read(|s| s.move_count()), 1);
    }

    #[test]
    fn names_are_sanitized() {
        assert_eq!(sanitize_name("  Alice \n"), "Alice");
        assert_eq!(sanitize_name("Bo\u{7}b"), "Bob");
        assert_eq!(sanitize_name("   "), DEFAULT_PLAYER_NAME);
        assert_eq!(sanitize_name(""), DEFAULT_PLAYER_NAME);
        let long = "x".repeat(100);
        assert_eq!(sanitize_name(&long).chars().count(), MAX_NAME_CHARS);
    }
}
