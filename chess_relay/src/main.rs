// CLI entry point for the chess relay server.
//
// Installs the session logger, binds the listener, and serves until the
// process is killed. See `server.rs` for the threading layout and
// `session.rs` for the per-game protocol.
//
// Usage:
//   chess-relay [OPTIONS]
//     --host <HOST>                    Bind address (default: 0.0.0.0)
//     --port <PORT>                    Listen port (default: 5000)
//     --history-dir <DIR>              Game history directory (default: GameHistory
//                                      next to the executable)
//     --log-file <PATH>                Log file (default: Logs/log_<date>.txt next
//                                      to the executable)
//     --no-console                     Do not mirror log entries to stdout
//     --log-level <LEVEL>              info | warning | error (default: info)
//     --sweep-interval-secs <N>        Waiting-pool sweep interval, >= 1 (default: 5)
//     --handshake-timeout-secs <N>     JOIN wait per client, >= 1 (default: 10)

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use chess_relay::history::DEFAULT_HISTORY_DIR;
use chess_relay::logger::{LogLevel, SessionLogger};
use chess_relay::server::{DEFAULT_PORT, ServerConfig, start_server};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about = "Two-player chess session relay server")]
struct Args {
    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Directory for finished-game JSON files. Defaults to `GameHistory/`
    /// next to the executable.
    #[arg(long)]
    history_dir: Option<PathBuf>,

    /// Log file path. Defaults to a date-stamped file under `Logs/` next to
    /// the executable.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Do not mirror log entries to stdout.
    #[arg(long)]
    no_console: bool,

    /// Minimum level written to the log.
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// Seconds between sweeps of the waiting pool.
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    sweep_interval_secs: u64,

    /// Seconds to wait for each client's JOIN line.
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    handshake_timeout_secs: u64,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let mut builder = SessionLogger::builder()
        .with_console(!args.no_console)
        .minimum_level(args.log_level);
    if let Some(path) = &args.log_file {
        builder = builder.with_log_file(path);
    }
    let logger = match builder.build() {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to open log file: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = logger.install() {
        eprintln!("Failed to install logger: {e}");
        return ExitCode::FAILURE;
    }

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        history_dir: args
            .history_dir
            .unwrap_or_else(|| chess_relay::base_dir().join(DEFAULT_HISTORY_DIR)),
        sweep_interval: Duration::from_secs(args.sweep_interval_secs),
        handshake_timeout: Duration::from_secs(args.handshake_timeout_secs),
    };

    let (handle, addr) = match start_server(config) {
        Ok(result) => result,
        Err(e) => {
            log::error!("Failed to start server: {e}");
            eprintln!("Failed to start server: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("Relay listening on {addr}");
    handle.wait();
    ExitCode::SUCCESS
}
