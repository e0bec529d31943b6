// TCP client for talking to a Generals server.
//
// Provides a non-blocking interface for a game front end, a bot, or a test
// harness. Architecture:
// - `connect()` performs TCP connect + Hello handshake on the calling thread,
//   then spawns a background reader thread.
// - The reader thread calls `framing::recv()` in a loop and pushes every
//   `ServerMessage` into an `mpsc` channel.
// - The caller holds a `BufWriter<TcpStream>` for sending; each request
//   method writes one frame and returns without waiting for the reply.
// - `poll()` drains the inbox non-blocking; `recv_timeout()` waits for the
//   next message.
//
// Replies and session events arrive on the same stream. For a move, the
// mover sees the `Event { TurnTaken }` before its own `TurnAccepted`,
// because the session emits the event while the move is being applied.
//
// See also: `server.rs` for the other end of the connection.

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use generals_engine::{CellIndex, Placement, SessionId};
use generals_protocol::framing::{self, FrameError};
use generals_protocol::message::{ClientMessage, PROTOCOL_VERSION, RejectKind, ServerMessage};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("rejected ({kind:?}): {reason}")]
    Rejected { kind: RejectKind, reason: String },
    #[error("unexpected response: {0}")]
    Unexpected(String),
}

/// TCP client for one connection (and therefore at most one seat).
pub struct NetClient {
    writer: BufWriter<TcpStream>,
    inbox: Receiver<ServerMessage>,
    _reader_thread: Option<JoinHandle<()>>,
}

impl NetClient {
    /// Connect, perform the Hello handshake, and spawn the reader thread.
    pub fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).map_err(ClientError::Connect)?;
        stream.set_nodelay(true).ok();
        stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT)).ok();

        let reader_stream = stream.try_clone().map_err(ClientError::Connect)?;
        let mut writer = BufWriter::new(stream);
        framing::send(
            &mut writer,
            &ClientMessage::Hello {
                protocol_version: PROTOCOL_VERSION,
            },
        )?;

        let mut reader = BufReader::new(reader_stream);
        match framing::recv::<_, ServerMessage>(&mut reader)? {
            ServerMessage::Welcome { .. } => {}
            ServerMessage::Rejected { kind, reason } => {
                return Err(ClientError::Rejected { kind, reason });
            }
            other => return Err(ClientError::Unexpected(format!("{other:?}"))),
        }

        // Clear the read timeout for the long-lived reader loop.
        reader.get_ref().set_read_timeout(None).ok();

        let (tx, rx) = mpsc::channel();
        let reader_thread = thread::spawn(move || reader_loop(reader, tx));
        Ok(Self {
            writer,
            inbox: rx,
            _reader_thread: Some(reader_thread),
        })
    }

    pub fn create_game(&mut self, player_name: &str) -> Result<(), ClientError> {
        self.send(&ClientMessage::CreateGame {
            player_name: player_name.into(),
        })
    }

    pub fn join_game(&mut self, session_id: SessionId, player_name: &str) -> Result<(), ClientError> {
        self.send(&ClientMessage::JoinGame {
            session_id,
            player_name: player_name.into(),
        })
    }

    pub fn submit_placement(&mut self, pieces: Vec<Placement>) -> Result<(), ClientError> {
        self.send(&ClientMessage::SubmitPlacement { pieces })
    }

    pub fn take_turn(&mut self, sequence: u64, from: CellIndex, to: CellIndex) -> Result<(), ClientError> {
        self.send(&ClientMessage::TakeTurn { sequence, from, to })
    }

    pub fn select_piece(&mut self, cell: CellIndex) -> Result<(), ClientError> {
        self.send(&ClientMessage::SelectPiece { cell })
    }

    pub fn request_view(&mut self) -> Result<(), ClientError> {
        self.send(&ClientMessage::RequestView)
    }

    pub fn request_stats(&mut self) -> Result<(), ClientError> {
        self.send(&ClientMessage::RequestStats)
    }

    /// Send Goodbye. The server releases the seat (forfeiting a running game).
    pub fn disconnect(&mut self) {
        let _ = self.send(&ClientMessage::Goodbye);
    }

    /// Drain all queued server messages (non-blocking).
    pub fn poll(&self) -> Vec<ServerMessage> {
        self.inbox.try_iter().collect()
    }

    /// Wait up to `timeout` for the next server message. `None` on timeout
    /// or once the connection is gone and the inbox is empty.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ServerMessage> {
        match self.inbox.recv_timeout(timeout) {
            Ok(msg) => Some(msg),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    fn send(&mut self, msg: &ClientMessage) -> Result<(), ClientError> {
        framing::send(&mut self.writer, msg)?;
        Ok(())
    }
}

/// Reader thread: read framed messages in a loop, push to channel.
fn reader_loop(mut reader: BufReader<TcpStream>, tx: mpsc::Sender<ServerMessage>) {
    while let Ok(msg) = framing::recv::<_, ServerMessage>(&mut reader) {
        if tx.send(msg).is_err() {
            break; // Caller dropped the client.
        }
    }
}
