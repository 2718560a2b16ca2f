// TCP listener and session launcher for the relay.
//
// Architecture: thread-per-session, with a shared waiting pool.
//
// - **Accept thread** (`TcpListener::accept()` loop): every new connection
//   goes to the back of the `ConnectionPool`; then every available pair is
//   taken out and handed to a new session thread. The loop never waits on a
//   session.
// - **Sweeper thread** (`pool::spawn_sweeper`): started once, drops clients
//   that disconnected while waiting.
// - **Session threads** (one per pair, plus the two relay threads each
//   session spawns): fully independent. Nothing is shared between sessions
//   except the history directory, where each writes its own file.
//
// The listener is non-blocking so the accept thread can notice
// `ServerHandle::stop`, which tests use. The binary simply runs until the
// process is killed.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info, warn};

use crate::history::{DEFAULT_HISTORY_DIR, HistoryStore};
use crate::pool::{ConnectionPool, DEFAULT_SWEEP_INTERVAL, spawn_sweeper};
use crate::session::{DEFAULT_HANDSHAKE_TIMEOUT, GameSession};

/// Port used when none is configured.
pub const DEFAULT_PORT: u16 = 5000;

/// Back-off between accept attempts when nothing is pending.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Configuration for starting a relay server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub history_dir: PathBuf,
    pub sweep_interval: Duration,
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            history_dir: crate::base_dir().join(DEFAULT_HISTORY_DIR),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

/// Handle returned by `start_server` to control the running server.
pub struct ServerHandle {
    keep_running: Arc<AtomicBool>,
    pool: Arc<ConnectionPool>,
    accept_thread: Option<JoinHandle<()>>,
    sweeper_thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Number of clients currently waiting for an opponent.
    pub fn waiting_clients(&self) -> usize {
        self.pool.len()
    }

    /// Block until the accept loop exits, which in practice means for the
    /// lifetime of the process.
    pub fn wait(mut self) {
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }

    /// Stop accepting and sweeping, then wait for both threads. Sessions
    /// already running are left to finish on their own.
    pub fn stop(mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        for handle in [self.accept_thread.take(), self.sweeper_thread.take()]
            .into_iter()
            .flatten()
        {
            let _ = handle.join();
        }
    }
}

/// Settings every session is started with.
#[derive(Clone)]
struct SessionSettings {
    history: HistoryStore,
    handshake_timeout: Duration,
}

/// Bind the listener and start the accept and sweeper threads. Returns a
/// handle and the bound address (useful when port 0 lets the OS pick).
pub fn start_server(config: ServerConfig) -> io::Result<(ServerHandle, SocketAddr)> {
    let listener = TcpListener::bind((config.host.as_str(), config.port))?;
    let addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;
    info!("Server started on {addr}");

    let pool = Arc::new(ConnectionPool::new());
    let keep_running = Arc::new(AtomicBool::new(true));

    let sweeper_thread = spawn_sweeper(
        Arc::clone(&pool),
        config.sweep_interval,
        Arc::clone(&keep_running),
    );

    let settings = SessionSettings {
        history: HistoryStore::new(config.history_dir),
        handshake_timeout: config.handshake_timeout,
    };
    let accept_pool = Arc::clone(&pool);
    let accept_running = Arc::clone(&keep_running);
    let accept_thread = thread::spawn(move || {
        accept_loop(listener, &accept_pool, &settings, &accept_running);
    });

    Ok((
        ServerHandle {
            keep_running,
            pool,
            accept_thread: Some(accept_thread),
            sweeper_thread: Some(sweeper_thread),
        },
        addr,
    ))
}

fn accept_loop(
    listener: TcpListener,
    pool: &ConnectionPool,
    settings: &SessionSettings,
    keep_running: &AtomicBool,
) {
    while keep_running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nonblocking(false) {
                    warn!("Dropping client {peer}: {e}");
                    continue;
                }
                info!("New client connected: {peer}");
                pool.enqueue(stream);
                start_ready_sessions(pool, settings);
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                error!("Accept failed: {e}");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
    info!("Accept loop stopped");
}

/// Hand every complete pair in the pool to its own session thread.
fn start_ready_sessions(pool: &ConnectionPool, settings: &SessionSettings) {
    while let Some((white, black)) = pool.try_pair_next() {
        start_session(white, black, settings.clone());
    }
}

fn start_session(white: TcpStream, black: TcpStream, settings: SessionSettings) {
    info!("Starting new game session");
    let spawned = thread::Builder::new()
        .name("game-session".into())
        .spawn(move || match GameSession::new(white, black, settings.history) {
            Ok(session) => {
                let report = session
                    .with_handshake_timeout(settings.handshake_timeout)
                    .run();
                info!(
                    "Session {} vs {} finished with {} recorded moves",
                    report.player_white,
                    report.player_black,
                    report.moves.len()
                );
            }
            Err(e) => error!("Could not set up session: {e}"),
        });
    if let Err(e) = spawned {
        error!("Could not spawn session thread: {e}");
    }
}
