// Test-only player for end-to-end server tests.
//
// Wraps the real `NetClient` (from `generals_server::client`) to provide a
// synchronous, test-friendly API for exercising the full pipeline:
// connect → create/join → place → move → events → game over.
//
// The only test-specific code here is the blocking wait around
// `NetClient::recv_timeout()`. Messages that arrive while waiting for
// something else are kept in a backlog, so a test can ask for a reply first
// and the session events that preceded it afterwards (or the other way
// round) without losing either.
//
// See also: `tests/full_pipeline.rs` for the scenarios.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use generals_engine::{
    BoardView, CellIndex, GameRules, PlayerId, PlayerSlot, SessionEvent, SessionId,
    StatsSnapshot, TurnResult,
};
use generals_protocol::message::{RejectKind, ServerMessage};
use generals_server::client::NetClient;

/// Default timeout for blocking waits.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// A rejection as the client sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejection {
    pub kind: RejectKind,
    pub reason: String,
}

/// A connected test player.
pub struct TestPlayer {
    client: NetClient,
    backlog: Vec<ServerMessage>,
    pub session_id: Option<SessionId>,
    pub player_id: Option<PlayerId>,
    pub slot: Option<PlayerSlot>,
}

impl TestPlayer {
    /// Connect and complete the Hello handshake.
    pub fn connect(addr: SocketAddr) -> Self {
        let client = NetClient::connect(addr).expect("TestPlayer::connect failed");
        Self {
            client,
            backlog: Vec::new(),
            session_id: None,
            player_id: None,
            slot: None,
        }
    }

    /// Create a session and wait for `GameCreated`.
    pub fn create(&mut self, name: &str) -> SessionId {
        self.client.create_game(name).expect("send CreateGame failed");
        let (session_id, player_id, slot) = self
            .reply("GameCreated", |msg| match msg {
                ServerMessage::GameCreated {
                    session_id,
                    player_id,
                    slot,
                } => Some((*session_id, *player_id, *slot)),
                _ => None,
            })
            .expect("CreateGame rejected");
        self.session_id = Some(session_id);
        self.player_id = Some(player_id);
        self.slot = Some(slot);
        session_id
    }

    /// Join a session. Returns the opponent's name.
    pub fn join(&mut self, session_id: SessionId, name: &str) -> Result<String, Rejection> {
        self.client
            .join_game(session_id, name)
            .expect("send JoinGame failed");
        let (player_id, slot, opponent_name) = self.reply("GameJoined", |msg| match msg {
            ServerMessage::GameJoined {
                player_id,
                slot,
                opponent_name,
                ..
            } => Some((*player_id, *slot, opponent_name.clone())),
            _ => None,
        })?;
        self.session_id = Some(session_id);
        self.player_id = Some(player_id);
        self.slot = Some(slot);
        Ok(opponent_name)
    }

    /// Place this seat's army front to back, strongest first. Returns
    /// whether the game started.
    pub fn place_sequential(&mut self, rules: &GameRules) -> Result<bool, Rejection> {
        let slot = self.slot.expect("place before taking a seat");
        self.client
            .submit_placement(rules.sequential_placement(slot))
            .expect("send SubmitPlacement failed");
        self.reply("PlacementAccepted", |msg| match msg {
            ServerMessage::PlacementAccepted { started, .. } => Some(*started),
            _ => None,
        })
    }

    pub fn play(&mut self, sequence: u64, from: u16, to: u16) -> Result<TurnResult, Rejection> {
        self.client
            .take_turn(sequence, CellIndex(from), CellIndex(to))
            .expect("send TakeTurn failed");
        self.reply("TurnAccepted", |msg| match msg {
            ServerMessage::TurnAccepted { result } => Some(*result),
            _ => None,
        })
    }

    /// Highlight one of this seat's pieces for the opponent.
    pub fn select(&mut self, cell: u16) -> Result<CellIndex, Rejection> {
        self.client
            .select_piece(CellIndex(cell))
            .expect("send SelectPiece failed");
        self.reply("SelectionAccepted", |msg| match msg {
            ServerMessage::SelectionAccepted { cell } => Some(*cell),
            _ => None,
        })
    }

    pub fn view(&mut self) -> Result<BoardView, Rejection> {
        self.client.request_view().expect("send RequestView failed");
        self.reply("View", |msg| match msg {
            ServerMessage::View { view } => Some(view.clone()),
            _ => None,
        })
    }

    pub fn stats(&mut self) -> StatsSnapshot {
        self.client.request_stats().expect("send RequestStats failed");
        self.reply("Stats", |msg| match msg {
            ServerMessage::Stats { snapshot } => Some(snapshot.clone()),
            _ => None,
        })
        .expect("RequestStats rejected")
    }

    /// Wait for a session event matching `pick`.
    pub fn wait_event<T>(&mut self, what: &str, mut pick: impl FnMut(&SessionEvent) -> Option<T>) -> T {
        self.wait_for(what, |msg| match msg {
            ServerMessage::Event { event } => pick(event),
            _ => None,
        })
    }

    /// Every session event received so far that no wait has consumed.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.backlog.extend(self.client.poll());
        let mut events = Vec::new();
        self.backlog.retain(|msg| match msg {
            ServerMessage::Event { event } => {
                events.push(event.clone());
                false
            }
            _ => true,
        });
        events
    }

    /// Send Goodbye.
    pub fn disconnect(&mut self) {
        self.client.disconnect();
    }

    /// Wait for the reply to the last request: either the message `pick`
    /// accepts or a `Rejected`.
    fn reply<T>(
        &mut self,
        what: &str,
        mut pick: impl FnMut(&ServerMessage) -> Option<T>,
    ) -> Result<T, Rejection> {
        self.wait_for(what, |msg| match msg {
            ServerMessage::Rejected { kind, reason } => Some(Err(Rejection {
                kind: *kind,
                reason: reason.clone(),
            })),
            other => pick(other).map(Ok),
        })
    }

    fn wait_for<T>(&mut self, what: &str, mut pick: impl FnMut(&ServerMessage) -> Option<T>) -> T {
        if let Some((index, value)) = self
            .backlog
            .iter()
            .enumerate()
            .find_map(|(i, msg)| pick(msg).map(|v| (i, v)))
        {
            self.backlog.remove(index);
            return value;
        }

        let deadline = Instant::now() + WAIT_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let msg = self
                .client
                .recv_timeout(remaining)
                .unwrap_or_else(|| panic!("timed out waiting for {what}"));
            if let Some(value) = pick(&msg) {
                return value;
            }
            self.backlog.push(msg);
        }
    }
}
