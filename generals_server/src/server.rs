// TCP server: listener, per-connection threads, and the expiry sweeper.
//
// Architecture: thread-per-connection around a shared `SessionRegistry`.
//
// - **Listener thread** (`TcpListener::accept()` loop, non-blocking so it can
//   notice `keep_running`): spawns one connection thread per client.
// - **Connection threads**: read the `Hello` handshake, then loop on
//   `framing::recv()` and dispatch each `ClientMessage` straight into the
//   registry. There is no central event loop; the per-session mutex inside
//   the registry serializes everything that touches one match, and unrelated
//   matches proceed in parallel.
// - **Writer threads** (one per connection): the only writer to a client's
//   `TcpStream`. They drain an `mpsc` outbox fed by two producers: the
//   connection thread (direct replies) and the `ConnectionSink` registered
//   with the session (events, pushed while the session lock is held, so both
//   players see events in the same order the session produced them).
// - **Sweeper thread**: calls `SessionRegistry::sweep_expired` every
//   `sweep_interval`.
//
// Seat binding: a connection acts for at most one `(session, player)` seat,
// set by `CreateGame`/`JoinGame`. Disconnect or `Goodbye` turns into
// `SessionRegistry::leave` for that seat, which forfeits a running game.
// Once the seat's game is over, a new `CreateGame`/`JoinGame` releases it
// and binds the new one.
//
// Shutdown: `ServerHandle::stop` clears `keep_running` and joins the listener
// and sweeper. Connection threads end when their client goes away.

use std::io::{BufReader, BufWriter};
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use generals_engine::{
    ConfigError, EventSink, GameError, GameRules, MoveRequest, Phase, Seat, SessionEvent,
    SessionRegistry,
};
use generals_protocol::framing::{self, FrameError};
use generals_protocol::message::{ClientMessage, PROTOCOL_VERSION, RejectKind, ServerMessage};
use tracing::{debug, info, warn};

/// How often blocked loops wake up to check `keep_running`.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Configuration for starting a game server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind: IpAddr,
    /// 0 lets the OS pick a free port; `start_server` reports the real one.
    pub port: u16,
    pub rules: GameRules,
    /// Sessions idle for longer than this are destroyed.
    pub session_timeout: Duration,
    pub sweep_interval: Duration,
    /// How long a new connection has to send `Hello`.
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 7979,
            rules: GameRules::default(),
            session_timeout: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid rules: {0}")]
    Rules(#[from] ConfigError),
    #[error("could not open listener: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle returned by `start_server` to inspect and stop the running server.
pub struct ServerHandle {
    keep_running: Arc<AtomicBool>,
    registry: Arc<SessionRegistry>,
    threads: Vec<thread::JoinHandle<()>>,
}

impl ServerHandle {
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Signal the server to stop and wait for the listener and sweeper.
    pub fn stop(self) {
        self.keep_running.store(false, Ordering::SeqCst);
        for handle in self.threads {
            let _ = handle.join();
        }
        info!("server stopped");
    }
}

/// Bind, then run the server on background threads. Returns a handle for
/// stopping it and the actual bound address.
pub fn start_server(config: ServerConfig) -> Result<(ServerHandle, SocketAddr), ServerError> {
    let registry = Arc::new(SessionRegistry::new(config.rules)?);
    let listener = TcpListener::bind((config.bind, config.port))?;
    let addr = listener.local_addr()?;
    // Non-blocking so the accept loop can check keep_running periodically.
    listener.set_nonblocking(true)?;
    let keep_running = Arc::new(AtomicBool::new(true));

    let listener_thread = {
        let registry = Arc::clone(&registry);
        let keep_running = Arc::clone(&keep_running);
        let handshake_timeout = config.handshake_timeout;
        thread::spawn(move || accept_loop(listener, registry, keep_running, handshake_timeout))
    };
    let sweeper_thread = {
        let registry = Arc::clone(&registry);
        let keep_running = Arc::clone(&keep_running);
        let (interval, timeout) = (config.sweep_interval, config.session_timeout);
        thread::spawn(move || sweep_loop(&registry, &keep_running, interval, timeout))
    };

    info!(%addr, "server listening");
    Ok((
        ServerHandle {
            keep_running,
            registry,
            threads: vec![listener_thread, sweeper_thread],
        },
        addr,
    ))
}

fn accept_loop(
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
    keep_running: Arc<AtomicBool>,
    handshake_timeout: Duration,
) {
    while keep_running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false).ok();
                stream.set_nodelay(true).ok();
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    debug!(%peer, "connection opened");
                    serve_connection(stream, &registry, handshake_timeout);
                    debug!(%peer, "connection closed");
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                warn!(error = %e, "accept failed, listener exiting");
                break;
            }
        }
    }
}

fn sweep_loop(
    registry: &SessionRegistry,
    keep_running: &AtomicBool,
    interval: Duration,
    timeout: Duration,
) {
    let mut last_sweep = Instant::now();
    while keep_running.load(Ordering::SeqCst) {
        thread::sleep(POLL_INTERVAL.min(interval));
        if last_sweep.elapsed() < interval {
            continue;
        }
        last_sweep = Instant::now();
        let removed = registry.sweep_expired(Utc::now(), timeout);
        if !removed.is_empty() {
            info!(count = removed.len(), "expired sessions removed");
        }
    }
}

// ---------------------------------------------------------------------------
// Per-connection handling
// ---------------------------------------------------------------------------

/// Items on a connection's outbox.
enum Outgoing {
    Message(ServerMessage),
    /// The connection is done; the writer thread exits.
    Close,
}

/// Delivers session events into a connection's outbox.
struct ConnectionSink(Sender<Outgoing>);

impl EventSink for ConnectionSink {
    fn deliver(&self, event: SessionEvent) {
        let _ = self.0.send(Outgoing::Message(ServerMessage::Event { event }));
    }
}

/// State of one client connection after the handshake.
struct Connection<'a> {
    registry: &'a SessionRegistry,
    outbox: Sender<Outgoing>,
    seat: Option<Seat>,
}

/// What the read loop should do after a message.
enum Flow {
    Continue,
    Close,
}

fn serve_connection(stream: TcpStream, registry: &SessionRegistry, handshake_timeout: Duration) {
    let Ok(read_half) = stream.try_clone() else {
        return;
    };
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(match stream.try_clone() {
        Ok(s) => s,
        Err(_) => return,
    });

    stream.set_read_timeout(Some(handshake_timeout)).ok();
    match framing::recv::<_, ClientMessage>(&mut reader) {
        Ok(ClientMessage::Hello { protocol_version }) if protocol_version == PROTOCOL_VERSION => {
            if framing::send(
                &mut writer,
                &ServerMessage::Welcome {
                    protocol_version: PROTOCOL_VERSION,
                },
            )
            .is_err()
            {
                return;
            }
        }
        Ok(ClientMessage::Hello { protocol_version }) => {
            let reason = format!(
                "protocol version {protocol_version} is not supported (server speaks {PROTOCOL_VERSION})"
            );
            let _ = framing::send(&mut writer, &ServerMessage::rejected(RejectKind::Protocol, reason));
            return;
        }
        Ok(other) => {
            warn!(message = ?other, "expected Hello as the first message");
            let _ = framing::send(
                &mut writer,
                &ServerMessage::rejected(RejectKind::Protocol, "expected Hello"),
            );
            return;
        }
        Err(e) => {
            debug!(error = %e, "handshake failed");
            return;
        }
    }
    // Clear the handshake timeout for the long-lived read loop.
    stream.set_read_timeout(None).ok();

    let (outbox, inbox) = mpsc::channel();
    let writer_thread = thread::spawn(move || writer_loop(writer, inbox));

    let mut conn = Connection {
        registry,
        outbox,
        seat: None,
    };
    loop {
        match framing::recv::<_, ClientMessage>(&mut reader) {
            Ok(message) => {
                if let Flow::Close = conn.handle(message) {
                    break;
                }
            }
            Err(e) => {
                if !e.is_disconnect() {
                    warn!(error = %e, "dropping connection after unreadable message");
                    if let FrameError::Json(_) | FrameError::TooLarge { .. } = e {
                        conn.reply(ServerMessage::rejected(RejectKind::Protocol, e.to_string()));
                    }
                }
                break;
            }
        }
    }

    conn.leave_seat();
    let _ = conn.outbox.send(Outgoing::Close);
    let _ = writer_thread.join();
    let _ = stream.shutdown(Shutdown::Both);
}

/// Writer thread: the only writer to the client's stream.
fn writer_loop(mut writer: BufWriter<TcpStream>, inbox: Receiver<Outgoing>) {
    for item in inbox {
        match item {
            Outgoing::Message(msg) => {
                if let Err(e) = framing::send(&mut writer, &msg) {
                    debug!(error = %e, "write failed, writer exiting");
                    break;
                }
            }
            Outgoing::Close => break,
        }
    }
}

impl Connection<'_> {
    fn reply(&self, msg: ServerMessage) {
        let _ = self.outbox.send(Outgoing::Message(msg));
    }

    fn sink(&self) -> Option<Box<dyn EventSink>> {
        Some(Box::new(ConnectionSink(self.outbox.clone())))
    }

    fn reject(&mut self, err: &GameError) {
        warn!(error = %err, kind = ?err.kind(), "request rejected");
        // The bound session is gone (expired or discarded); free the seat.
        if let (GameError::SessionNotFound(id), Some(seat)) = (err, &self.seat) {
            if *id == seat.session_id {
                self.seat = None;
            }
        }
        self.reply(ServerMessage::from(err));
    }

    fn handle(&mut self, message: ClientMessage) -> Flow {
        match message {
            ClientMessage::Hello { .. } => {
                self.reply(ServerMessage::rejected(RejectKind::Protocol, "already greeted"));
            }
            ClientMessage::CreateGame { player_name } => {
                if !self.vacate_finished_seat() {
                    return Flow::Continue;
                }
                let seat = self.registry.create_game(&player_name, self.sink());
                self.reply(ServerMessage::GameCreated {
                    session_id: seat.session_id,
                    player_id: seat.player_id,
                    slot: seat.slot,
                });
                self.seat = Some(seat);
            }
            ClientMessage::JoinGame {
                session_id,
                player_name,
            } => {
                if !self.vacate_finished_seat() {
                    return Flow::Continue;
                }
                match self.registry.join_game(session_id, &player_name, self.sink()) {
                    Ok(seat) => {
                        self.reply(ServerMessage::GameJoined {
                            session_id: seat.session_id,
                            player_id: seat.player_id,
                            slot: seat.slot,
                            opponent_name: seat.opponent_name.clone().unwrap_or_default(),
                        });
                        self.seat = Some(seat);
                    }
                    Err(e) => self.reject(&e),
                }
            }
            ClientMessage::SubmitPlacement { pieces } => {
                let Some(seat) = self.seated() else {
                    return Flow::Continue;
                };
                match self
                    .registry
                    .submit_placement(seat.session_id, seat.player_id, &pieces)
                {
                    Ok(accepted) => self.reply(ServerMessage::PlacementAccepted {
                        started: accepted.started,
                        result: accepted.result,
                    }),
                    Err(e) => self.reject(&e),
                }
            }
            ClientMessage::TakeTurn { sequence, from, to } => {
                let Some(seat) = self.seated() else {
                    return Flow::Continue;
                };
                let request = MoveRequest { sequence, from, to };
                match self
                    .registry
                    .take_turn(seat.session_id, seat.player_id, request)
                {
                    Ok(result) => self.reply(ServerMessage::TurnAccepted { result }),
                    Err(e) => self.reject(&e),
                }
            }
            ClientMessage::SelectPiece { cell } => {
                let Some(seat) = self.seated() else {
                    return Flow::Continue;
                };
                match self.registry.select_piece(seat.session_id, seat.player_id, cell) {
                    Ok(()) => self.reply(ServerMessage::SelectionAccepted { cell }),
                    Err(e) => self.reject(&e),
                }
            }
            ClientMessage::RequestView => {
                let Some(seat) = self.seated() else {
                    return Flow::Continue;
                };
                match self.registry.view(seat.session_id, seat.player_id) {
                    Ok(view) => self.reply(ServerMessage::View { view }),
                    Err(e) => self.reject(&e),
                }
            }
            ClientMessage::RequestStats => {
                self.reply(ServerMessage::Stats {
                    snapshot: self.registry.stats(),
                });
            }
            ClientMessage::Goodbye => return Flow::Close,
        }
        Flow::Continue
    }

    /// The bound seat, or a `NotSeated` rejection.
    fn seated(&self) -> Option<Seat> {
        if self.seat.is_none() {
            self.reply(ServerMessage::rejected(
                RejectKind::NotSeated,
                "create or join a game first",
            ));
        }
        self.seat.clone()
    }

    /// Whether the connection is free to take a new seat. A seat in a
    /// finished or vanished session is released first; a seat in a game
    /// still being played is kept and the request is refused.
    fn vacate_finished_seat(&mut self) -> bool {
        let Some(seat) = &self.seat else {
            return true;
        };
        let finished = match self.registry.get(seat.session_id) {
            Ok(handle) => handle.read(|session| session.phase()) == Phase::Over,
            Err(_) => true,
        };
        if !finished {
            self.reply(ServerMessage::rejected(
                RejectKind::AlreadySeated,
                "this connection already has a seat in a running game",
            ));
            return false;
        }
        self.leave_seat();
        true
    }

    fn leave_seat(&mut self) {
        let Some(seat) = self.seat.take() else {
            return;
        };
        match self.registry.leave(seat.session_id, seat.player_id) {
            Ok(outcome) => {
                debug!(session = %seat.session_id, ?outcome, "seat released");
            }
            // Already expired or discarded.
            Err(GameError::SessionNotFound(_)) => {}
            Err(e) => warn!(session = %seat.session_id, error = %e, "leave failed"),
        }
    }
}
