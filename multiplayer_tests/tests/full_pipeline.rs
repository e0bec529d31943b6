// End-to-end integration tests for the game server.
//
// Each test starts a real server on an ephemeral port, connects real
// NetClient instances (via TestPlayer), and verifies the full path:
// connect → create → join → place → move → events → game over.
//
// These tests exercise the same code paths as a live match (NetClient and
// the connection threads from the server crate, SessionRegistry from the
// engine). The only test-specific code is the blocking waits in TestPlayer.

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use generals_engine::{
    ArmyEntry, Board, CellIndex, CombatOutcome, CombatTable, ErrorKind, GameOverReason,
    GameResult, GameRules, MoveOutcome, MovementRules, Phase, PlayerSlot, Rank, SessionEvent,
    SessionId,
};
use generals_protocol::framing;
use generals_protocol::message::{ClientMessage, PROTOCOL_VERSION, RejectKind, ServerMessage};
use generals_server::server::{ServerConfig, ServerHandle, start_server};
use multiplayer_tests::TestPlayer;

fn start(config: ServerConfig) -> (ServerHandle, SocketAddr) {
    start_server(ServerConfig { port: 0, ..config }).unwrap()
}

/// A 3×4 board with a flag and a private per side.
///
/// Sequential placement puts Player-A's private on 2 and flag on 1, and
/// Player-B's private on 9 and flag on 10:
///
/// ```text
///   row 3:  9 10 11      B: P  F  .
///   row 2:  6  7  8
///   row 1:  3  4  5
///   row 0:  0  1  2      A: .  F  P
/// ```
fn skirmish_rules() -> GameRules {
    GameRules {
        board: Board {
            width: 3,
            height: 4,
            territory_rows: 1,
            obstacles: Default::default(),
        },
        army: vec![
            ArmyEntry {
                rank: Rank::Flag,
                count: 1,
            },
            ArmyEntry {
                rank: Rank::Private,
                count: 1,
            },
        ],
        combat: CombatTable::generals(),
        movement: MovementRules::default(),
        inactivity_draw_limit: 50,
        flag_home_run: true,
    }
}

/// Start a server with `rules`, seat two players and place both armies.
fn start_match(rules: &GameRules) -> (ServerHandle, TestPlayer, TestPlayer) {
    let (handle, addr) = start(ServerConfig {
        rules: rules.clone(),
        ..ServerConfig::default()
    });
    let mut alice = TestPlayer::connect(addr);
    let mut bob = TestPlayer::connect(addr);

    let session_id = alice.create("Alice");
    assert_eq!(bob.join(session_id, "Bob").unwrap(), "Alice");
    assert!(!alice.place_sequential(rules).unwrap());
    assert!(bob.place_sequential(rules).unwrap());
    (handle, alice, bob)
}

/// Poll `done` until it holds, failing the test after a few seconds.
fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(10));
    }
}

fn game_over(event: &SessionEvent) -> Option<GameResult> {
    match event {
        SessionEvent::GameOver { result, .. } => Some(*result),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Test scenarios
// ---------------------------------------------------------------------------

#[test]
fn create_join_and_place_notify_both_players() {
    let rules = GameRules::default();
    let (handle, addr) = start(ServerConfig::default());
    let mut alice = TestPlayer::connect(addr);
    let mut bob = TestPlayer::connect(addr);

    let session_id = alice.create("Alice");
    assert_eq!(alice.slot, Some(PlayerSlot::A));
    assert_eq!(bob.join(session_id, "Bob").unwrap(), "Alice");
    assert_eq!(bob.slot, Some(PlayerSlot::B));
    assert_ne!(alice.player_id, bob.player_id);

    let name = alice.wait_event("OpponentJoined", |e| match e {
        SessionEvent::OpponentJoined { opponent_name } => Some(opponent_name.clone()),
        _ => None,
    });
    assert_eq!(name, "Bob");

    assert!(!alice.place_sequential(&rules).unwrap());
    let cells = bob.wait_event("PlacementSubmitted", |e| match e {
        SessionEvent::PlacementSubmitted {
            slot: PlayerSlot::A,
            cells,
            started,
        } => Some((cells.clone(), *started)),
        _ => None,
    });
    assert_eq!(cells.0.len(), rules.army_size());
    assert!(!cells.1);

    assert!(bob.place_sequential(&rules).unwrap());
    let started = alice.wait_event("PlacementSubmitted", |e| match e {
        SessionEvent::PlacementSubmitted {
            slot: PlayerSlot::B,
            started,
            ..
        } => Some(*started),
        _ => None,
    });
    assert!(started);

    let view = bob.view().unwrap();
    assert_eq!(view.phase, Phase::Active);
    assert_eq!(view.you, PlayerSlot::B);
    assert_eq!(view.turn_owner, Some(PlayerSlot::A));
    assert_eq!(view.opponent_name.as_deref(), Some("Alice"));
    assert_eq!(view.own_pieces.len(), rules.army_size());
    assert_eq!(view.opponent_pieces.len(), rules.army_size());
    assert!(view.opponent_pieces.iter().all(|p| p.rank.is_none()));

    alice.disconnect();
    bob.disconnect();
    handle.stop();
}

#[test]
fn full_match_ends_with_flag_capture() {
    let rules = skirmish_rules();
    let (handle, mut alice, mut bob) = start_match(&rules);

    let script = [
        (PlayerSlot::A, 2, 5),
        (PlayerSlot::B, 9, 6),
        (PlayerSlot::A, 5, 8),
        (PlayerSlot::B, 6, 3),
        (PlayerSlot::A, 8, 11),
        (PlayerSlot::B, 3, 0),
    ];
    for (sequence, &(slot, from, to)) in script.iter().enumerate() {
        let player = match slot {
            PlayerSlot::A => &mut alice,
            PlayerSlot::B => &mut bob,
        };
        let result = player.play(sequence as u64, from, to).unwrap();
        assert_eq!(result.outcome, MoveOutcome::Moved);
        assert_eq!(result.next_turn_owner, Some(slot.opponent()));
    }

    // Bob sees every one of Alice's moves, positions only.
    let (from, to) = bob.wait_event("TurnTaken 4", |e| match e {
        SessionEvent::TurnTaken {
            sequence: 4,
            from,
            to,
            ..
        } => Some((*from, *to)),
        _ => None,
    });
    assert_eq!((from, to), (CellIndex(8), CellIndex(11)));

    let last = alice.play(6, 11, 10).unwrap();
    assert_eq!(
        last.outcome,
        MoveOutcome::Challenge(CombatOutcome::AttackerWins)
    );
    assert_eq!(
        last.result,
        Some(GameResult::win(PlayerSlot::A, GameOverReason::FlagCaptured))
    );
    assert_eq!(last.next_turn_owner, None);

    // Both sides get the final result with the full reveal.
    for player in [&mut alice, &mut bob] {
        let (result, pieces) = player.wait_event("GameOver", |e| match e {
            SessionEvent::GameOver { result, pieces } => Some((*result, pieces.clone())),
            _ => None,
        });
        assert_eq!(result.winner, Some(PlayerSlot::A));
        assert_eq!(pieces.len(), 4);
        let bob_flag = pieces
            .iter()
            .find(|p| p.owner == PlayerSlot::B && p.rank == Rank::Flag)
            .unwrap();
        assert!(bob_flag.is_captured());
    }

    let view = bob.view().unwrap();
    assert_eq!(view.phase, Phase::Over);
    assert!(view.opponent_pieces.iter().all(|p| p.rank.is_some()));

    // No more moves once the game is over.
    let err = bob.play(7, 0, 1).unwrap_err();
    assert_eq!(err.kind, RejectKind::Game(ErrorKind::NotYourTurn));

    alice.disconnect();
    bob.disconnect();
    handle.stop();
}

#[test]
fn finished_game_frees_the_seat_for_a_rematch() {
    let rules = skirmish_rules();
    let (handle, mut alice, mut bob) = start_match(&rules);

    // Still playing: the seat is kept.
    let err = alice.join(SessionId::new_random(), "Alice").unwrap_err();
    assert_eq!(err.kind, RejectKind::AlreadySeated);

    let script = [(2, 5), (9, 6), (5, 8), (6, 3), (8, 11), (3, 0), (11, 10)];
    for (sequence, &(from, to)) in script.iter().enumerate() {
        let player = if sequence % 2 == 0 { &mut alice } else { &mut bob };
        player.play(sequence as u64, from, to).unwrap();
    }
    let first = alice.session_id.unwrap();
    alice.wait_event("GameOver", game_over);
    bob.wait_event("GameOver", game_over);

    // Both players start over on the same connections.
    let rematch = alice.create("Alice");
    assert_ne!(rematch, first);
    bob.wait_event("OpponentLeft", |e| {
        matches!(e, SessionEvent::OpponentLeft).then_some(())
    });
    assert_eq!(bob.join(rematch, "Bob").unwrap(), "Alice");
    wait_until("old session discarded", || handle.registry().len() == 1);
    assert!(handle.registry().get(first).is_err());

    assert!(!alice.place_sequential(&rules).unwrap());
    assert!(bob.place_sequential(&rules).unwrap());
    alice.play(0, 2, 5).unwrap();

    alice.disconnect();
    bob.disconnect();
    handle.stop();
}

#[test]
fn side_without_a_first_move_loses_at_once() {
    let mut rules = skirmish_rules();
    rules.army.retain(|e| e.rank == Rank::Flag);
    rules.movement.immobile = vec![Rank::Flag];
    let (handle, mut alice, mut bob) = start_match(&rules);

    let expected = GameResult::win(PlayerSlot::B, GameOverReason::NoLegalMoves);
    assert_eq!(alice.wait_event("GameOver", game_over), expected);
    assert_eq!(bob.wait_event("GameOver", game_over), expected);

    let view = alice.view().unwrap();
    assert_eq!(view.phase, Phase::Over);
    assert_eq!(view.result, Some(expected));
    let err = alice.play(0, 1, 4).unwrap_err();
    assert_eq!(err.kind, RejectKind::Game(ErrorKind::NotYourTurn));

    alice.disconnect();
    bob.disconnect();
    handle.stop();
}

#[test]
fn selection_is_shown_to_the_opponent() {
    let rules = GameRules::default();
    let (handle, mut alice, mut bob) = start_match(&rules);
    alice.drain_events();

    assert_eq!(alice.select(26).unwrap(), CellIndex(26));
    let cell = bob.wait_event("OpponentSelected", |e| match e {
        SessionEvent::OpponentSelected { cell } => Some(*cell),
        _ => None,
    });
    assert_eq!(cell, CellIndex(26));

    // Only the player to move may select, and only its own pieces.
    let err = bob.select(45).unwrap_err();
    assert_eq!(err.kind, RejectKind::Game(ErrorKind::NotYourTurn));
    let err = alice.select(45).unwrap_err();
    assert_eq!(err.kind, RejectKind::Game(ErrorKind::IllegalMove));
    let err = alice.select(30).unwrap_err();
    assert_eq!(err.kind, RejectKind::Game(ErrorKind::IllegalMove));

    // Selecting is not a move.
    alice.play(0, 26, 35).unwrap();
    assert_eq!(bob.select(45).unwrap(), CellIndex(45));
    let cell = alice.wait_event("OpponentSelected", |e| match e {
        SessionEvent::OpponentSelected { cell } => Some(*cell),
        _ => None,
    });
    assert_eq!(cell, CellIndex(45));
    assert!(
        !alice
            .drain_events()
            .iter()
            .any(|e| matches!(e, SessionEvent::OpponentSelected { .. }))
    );

    alice.disconnect();
    bob.disconnect();
    handle.stop();
}

#[test]
fn challenges_resolve_over_the_wire() {
    // Default sequential placement: Alice's five-star general on 26, Bob's
    // captain on 53.
    let rules = GameRules::default();
    let (handle, mut alice, mut bob) = start_match(&rules);

    alice.play(0, 26, 35).unwrap();
    bob.play(1, 53, 44).unwrap();
    let result = alice.play(2, 35, 44).unwrap();
    assert_eq!(
        result.outcome,
        MoveOutcome::Challenge(CombatOutcome::AttackerWins)
    );
    assert!(!result.is_game_over());

    let outcome = bob.wait_event("TurnTaken 2", |e| match e {
        SessionEvent::TurnTaken {
            sequence: 2,
            outcome,
            ..
        } => Some(*outcome),
        _ => None,
    });
    assert!(outcome.is_challenge());

    let view = bob.view().unwrap();
    let captured = view.own_pieces.iter().filter(|p| p.is_captured()).count();
    assert_eq!(captured, 1);
    assert_eq!(view.no_challenge_count, 0);
    assert_eq!(view.move_count, 3);
    let alice_on_44 = view
        .opponent_pieces
        .iter()
        .find(|p| p.position == Some(CellIndex(44)))
        .unwrap();
    assert_eq!(alice_on_44.rank, None);

    alice.disconnect();
    bob.disconnect();
    handle.stop();
}

#[test]
fn out_of_turn_and_illegal_moves_are_rejected() {
    let rules = GameRules::default();
    let (handle, mut alice, mut bob) = start_match(&rules);

    let err = bob.play(0, 45, 36).unwrap_err();
    assert_eq!(err.kind, RejectKind::Game(ErrorKind::NotYourTurn));

    // Diagonal.
    let err = alice.play(0, 26, 34).unwrap_err();
    assert_eq!(err.kind, RejectKind::Game(ErrorKind::IllegalMove));
    // Onto its own piece.
    let err = alice.play(0, 26, 25).unwrap_err();
    assert_eq!(err.kind, RejectKind::Game(ErrorKind::IllegalMove));
    // Stale sequence number.
    let err = alice.play(5, 26, 35).unwrap_err();
    assert_eq!(err.kind, RejectKind::Game(ErrorKind::IllegalMove));

    alice.play(0, 26, 35).unwrap();
    // A resent move is refused rather than applied twice.
    let err = alice.play(0, 26, 35).unwrap_err();
    assert_eq!(err.kind, RejectKind::Game(ErrorKind::IllegalMove));

    let view = alice.view().unwrap();
    assert_eq!(view.move_count, 1);
    assert_eq!(view.turn_owner, Some(PlayerSlot::B));

    alice.disconnect();
    bob.disconnect();
    handle.stop();
}

#[test]
fn invalid_placement_is_rejected() {
    let rules = GameRules::default();
    let (handle, addr) = start(ServerConfig::default());
    let mut alice = TestPlayer::connect(addr);
    let mut bob = TestPlayer::connect(addr);
    let session_id = alice.create("Alice");
    bob.join(session_id, "Bob").unwrap();

    // Player-A's arrangement lies outside Player-B's territory.
    bob.slot = Some(PlayerSlot::A);
    let err = bob.place_sequential(&rules).unwrap_err();
    assert_eq!(err.kind, RejectKind::Game(ErrorKind::InvalidPlacement));
    bob.slot = Some(PlayerSlot::B);

    // Nothing to place against until someone joins.
    let mut carol = TestPlayer::connect(addr);
    carol.create("Carol");
    let err = carol.place_sequential(&rules).unwrap_err();
    assert_eq!(err.kind, RejectKind::Game(ErrorKind::InvalidPlacement));

    alice.place_sequential(&rules).unwrap();
    let err = alice.place_sequential(&rules).unwrap_err();
    assert_eq!(err.kind, RejectKind::Game(ErrorKind::InvalidPlacement));

    alice.disconnect();
    bob.disconnect();
    carol.disconnect();
    handle.stop();
}

#[test]
fn disconnect_forfeits_a_running_game() {
    let rules = GameRules::default();
    let (handle, mut alice, mut bob) = start_match(&rules);
    alice.play(0, 26, 35).unwrap();

    bob.disconnect();

    alice.wait_event("OpponentLeft", |e| {
        matches!(e, SessionEvent::OpponentLeft).then_some(())
    });
    let result = alice.wait_event("GameOver", game_over);
    assert_eq!(
        result,
        GameResult::win(PlayerSlot::A, GameOverReason::Forfeit)
    );

    let view = alice.view().unwrap();
    assert_eq!(view.phase, Phase::Over);

    alice.disconnect();
    handle.stop();
}

#[test]
fn last_player_leaving_discards_the_session() {
    let (handle, addr) = start(ServerConfig::default());
    let mut alice = TestPlayer::connect(addr);
    alice.create("Alice");
    assert_eq!(handle.registry().len(), 1);

    alice.disconnect();
    wait_until("session discarded", || handle.registry().is_empty());

    handle.stop();
}

#[test]
fn joining_full_or_unknown_sessions_fails() {
    let (handle, addr) = start(ServerConfig::default());
    let mut alice = TestPlayer::connect(addr);
    let mut bob = TestPlayer::connect(addr);
    let mut carol = TestPlayer::connect(addr);

    let session_id = alice.create("Alice");
    bob.join(session_id, "Bob").unwrap();

    let err = carol.join(session_id, "Carol").unwrap_err();
    assert_eq!(err.kind, RejectKind::Game(ErrorKind::SessionFull));

    let err = carol.join(SessionId::new_random(), "Carol").unwrap_err();
    assert_eq!(err.kind, RejectKind::Game(ErrorKind::NotFound));

    // Carol is still free to start her own game.
    let other = carol.create("Carol");
    assert_ne!(other, session_id);

    alice.disconnect();
    bob.disconnect();
    carol.disconnect();
    handle.stop();
}

#[test]
fn a_connection_holds_at_most_one_seat() {
    let (handle, addr) = start(ServerConfig::default());
    let mut alice = TestPlayer::connect(addr);

    let err = alice.view().unwrap_err();
    assert_eq!(err.kind, RejectKind::NotSeated);
    let err = alice.play(0, 26, 35).unwrap_err();
    assert_eq!(err.kind, RejectKind::NotSeated);

    let session_id = alice.create("Alice");
    let err = alice.join(session_id, "Alice again").unwrap_err();
    assert_eq!(err.kind, RejectKind::AlreadySeated);

    alice.disconnect();
    handle.stop();
}

#[test]
fn stats_list_live_sessions() {
    let (handle, addr) = start(ServerConfig::default());
    let mut alice = TestPlayer::connect(addr);
    let mut bob = TestPlayer::connect(addr);
    let mut observer = TestPlayer::connect(addr);

    let first = alice.create("Alice");
    let second = bob.create("Bob");

    let stats = observer.stats();
    assert_eq!(stats.count, 2);
    let ids: Vec<SessionId> = stats.online.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![first, second]);
    assert!(stats.online.iter().all(|s| s.phase == Phase::Created));
    assert_eq!(stats.online[0].player_a_name, "Alice");

    alice.disconnect();
    bob.disconnect();
    observer.disconnect();
    handle.stop();
}

#[test]
fn idle_sessions_expire() {
    let (handle, addr) = start(ServerConfig {
        session_timeout: Duration::from_millis(200),
        sweep_interval: Duration::from_millis(50),
        ..ServerConfig::default()
    });
    let mut alice = TestPlayer::connect(addr);
    alice.create("Alice");

    alice.wait_event("Expired", |e| matches!(e, SessionEvent::Expired).then_some(()));
    wait_until("session removed", || handle.registry().is_empty());

    let err = alice.view().unwrap_err();
    assert_eq!(err.kind, RejectKind::Game(ErrorKind::NotFound));
    // The seat was released along with the session.
    alice.create("Alice");

    alice.disconnect();
    handle.stop();
}

#[test]
fn wrong_protocol_version_is_refused() {
    let (handle, addr) = start(ServerConfig::default());
    let stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut writer = BufWriter::new(stream);

    framing::send(
        &mut writer,
        &ClientMessage::Hello {
            protocol_version: PROTOCOL_VERSION + 1,
        },
    )
    .unwrap();
    match framing::recv::<_, ServerMessage>(&mut reader).unwrap() {
        ServerMessage::Rejected { kind, .. } => assert_eq!(kind, RejectKind::Protocol),
        other => panic!("expected Rejected, got {other:?}"),
    }

    handle.stop();
}
