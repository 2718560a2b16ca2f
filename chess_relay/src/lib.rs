// chess_relay — session relay server for two-player networked chess.
//
// The relay pairs clients in arrival order and forwards their moves to each
// other. It never runs chess rules: MOVE payloads are coordinate pairs it
// records for the game history and passes on untouched.
//
// Module overview:
// - `pool.rs`:     FIFO waiting pool with atomic pairing and a background
//                  liveness sweep for clients that vanish while waiting.
// - `session.rs`:  One paired game: color/JOIN handshake, two relay threads,
//                  first-to-finish shutdown, history persistence.
// - `history.rs`:  Move and game-history records, MOVE payload parsing, and
//                  the `GameHistory` directory writer.
// - `logger.rs`:   Leveled file logger (with console mirror) installed as
//                  the `log` backend.
// - `server.rs`:   TCP listener and accept loop; starts the sweeper and a
//                  session thread per pair.
// - `client.rs`:   Blocking client that turns relay traffic into a channel
//                  of events, for game front ends and integration tests.
// - `error.rs`:    `RelayError`.
//
// Dependencies: `chess_relay_protocol` (envelopes and line framing).
// No dependency on a chess engine or UI.
//
// The relay runs as a standalone binary (`main.rs`) or embedded through
// `start_server`. Default output directories (`GameHistory/`, `Logs/`) are
// resolved next to the executable, not against the working directory, so a
// relay started from anywhere writes to the same place.

pub mod client;
pub mod error;
pub mod history;
pub mod logger;
pub mod pool;
pub mod server;
pub mod session;

pub use error::{RelayError, RelayResult};
pub use server::{ServerConfig, ServerHandle, start_server};

use std::path::{Path, PathBuf};

/// Directory holding the running executable. Falls back to the working
/// directory if it cannot be determined.
pub fn base_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}
