// chess_relay_protocol — wire protocol for the two-player chess relay.
//
// This crate defines the message types and line framing used by the relay
// server (`chess_relay`) and game clients to talk over TCP. It is shared by
// both sides and knows nothing about chess rules.
//
// Module overview:
// - `types.rs`:    `PlayerColor`, including the plain-text color line sent
//                  right after connecting.
// - `message.rs`:  `Envelope` and `MessageKind` (JOIN / MOVE / LEAVE).
// - `framing.rs`:  Newline-delimited framing over any `BufRead`/`Write`
//                  stream, plus `encode` / `decode` for envelopes.
//
// Design decisions:
// - **JSON, one object per line.** `{"Type": ..., "Payload": ...}`. The
//   field names are fixed by existing clients.
// - **Opaque payloads.** The codec never looks inside a payload. MOVE
//   coordinates are parsed by the relay's history module.
// - **No async runtime.** Plain `std::io` traits, usable with blocking TCP
//   streams and buffered wrappers alike.

pub mod framing;
pub mod message;
pub mod types;

pub use framing::{MAX_LINE_SIZE, ParseError, decode, encode, read_line, write_line};
pub use message::{Envelope, HANDSHAKE_FAILED_LINE, MessageKind};
pub use types::PlayerColor;
