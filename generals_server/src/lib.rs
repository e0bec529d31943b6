// generals_server: TCP game server for Generals.
//
// This crate is the transport adapter in front of `generals_engine`. It
// accepts TCP connections, speaks the `generals_protocol` wire format, binds
// each connection to one seat, and forwards requests to the shared
// `SessionRegistry`. All rules and session state live in the engine; nothing
// here decides whether a move is legal.
//
// Module overview:
// - `server.rs`:  Listener, per-connection reader/writer threads, expiry
//                 sweeper, `ServerConfig`, `start_server`.
// - `client.rs`:  `NetClient`, a blocking-connect / non-blocking-poll client
//                 used by bots and the integration tests.
//
// The server can run as a standalone binary (`main.rs`) or be embedded in
// another process via the library API (`start_server`).

pub mod client;
pub mod server;

pub use client::{ClientError, NetClient};
pub use server::{ServerConfig, ServerError, ServerHandle, start_server};
