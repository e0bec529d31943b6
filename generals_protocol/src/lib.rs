// generals_protocol: wire protocol between Generals clients and the server.
//
// This crate defines the message types and framing used by the game server
// (`generals_server`) and its clients over TCP. It depends on
// `generals_engine` only for the shared value types (IDs, cells, placements,
// turn results, views, events) so those cross the wire unchanged.
//
// Module overview:
// - `message.rs`:  `ClientMessage` / `ServerMessage` enums, `RejectKind`,
//                  `PROTOCOL_VERSION`.
// - `framing.rs`:  Length-delimited framing over any `Read`/`Write` stream:
//                  4-byte big-endian length prefix, then JSON payload, with a
//                  64 KiB cap per frame.
//
// Design decisions:
// - **JSON serialization.** Messages are small and human-readable logs of a
//   session are worth more than the bytes saved.
// - **No async runtime.** Framing works on `std::io::Read`/`Write`, so it
//   fits blocking TCP streams and in-memory cursors alike.

pub mod framing;
pub mod message;

pub use framing::{FrameError, MAX_FRAME_SIZE, read_frame, recv, send, write_frame};
pub use message::{ClientMessage, PROTOCOL_VERSION, RejectKind, ServerMessage};
