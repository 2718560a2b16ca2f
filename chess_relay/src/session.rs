// One paired match between two connections.
//
// `GameSession` owns both TCP streams from the moment the pool pairs them.
// `run()` drives a single-use state machine on the calling thread:
//
//   Handshaking ──ok──▶ Relaying ──first direction ends──▶ Closed
//        └──────────────── failure ───────────────────────────▲
//
// Handshaking: write the color line (`white` / `black`) to each side, then
// read exactly one line from each under a read timeout. Anything other than
// a JOIN envelope aborts: both sides get `HANDSHAKE_FAILED_LINE`, both are
// closed, and no history is written. An empty JOIN name is not fatal; it
// becomes `UNKNOWN_PLAYER_NAME`. Each side then receives the other's name as
// a JOIN envelope.
//
// Relaying: one thread per direction (white→black, black→white). Each loop
// reads a line, drops it if it does not decode, records MOVE payloads into
// the shared history, and forwards the original line verbatim. The session
// ends when the *first* direction ends.
//
// Closed: set the stop flag, send one LEAVE to the side still connected
// (skipped if the finishing side already sent its own LEAVE, which was
// forwarded), shut down both read halves so the surviving loop wakes from its
// blocking read, join both loops, persist the history, and close both
// sockets. Every step tolerates sockets that are already gone.
//
// Writes to each socket go through a `Mutex`, so the relay thread and the
// closing path never interleave bytes on the wire.

use std::io::{self, BufReader, BufWriter};
use std::net::{Shutdown, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use chess_relay_protocol::framing::{decode, encode, read_line, write_line};
use chess_relay_protocol::message::{Envelope, HANDSHAKE_FAILED_LINE, MessageKind};
use chess_relay_protocol::types::PlayerColor;
use log::{error, info, warn};

use crate::error::{RelayError, RelayResult};
use crate::history::{GameHistoryRecord, HistoryStore, MoveRecord};

/// How long the handshake waits for each side's JOIN line.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Display name used when a JOIN carries no usable name.
pub const UNKNOWN_PLAYER_NAME: &str = "Unknown";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Handshaking,
    Relaying,
    Closed,
}

/// Why one relay direction stopped.
#[derive(Debug)]
pub enum RelayEnd {
    /// The source closed its stream.
    Eof,
    /// The source sent LEAVE, which was forwarded.
    Left,
    /// Reading from the source failed.
    ReadFailed(io::Error),
    /// Writing to the destination failed.
    WriteFailed(io::Error),
    /// The session told the loop to stop.
    Stopped,
}

/// Summary returned by `GameSession::run`.
#[derive(Debug)]
pub struct SessionReport {
    pub player_white: String,
    pub player_black: String,
    pub state: SessionState,
    pub handshake_completed: bool,
    /// The color whose relay direction ended first, if relaying started.
    pub first_finished: Option<PlayerColor>,
    pub moves: Vec<MoveRecord>,
    pub history_path: Option<PathBuf>,
}

type SharedWriter = Arc<Mutex<BufWriter<TcpStream>>>;

/// One side of the session.
struct PlayerLink {
    color: PlayerColor,
    peer: String,
    stream: TcpStream,
    writer: SharedWriter,
    /// Created once so bytes buffered during the handshake carry over into
    /// the relay loop. Moved into that loop when relaying starts.
    reader: Option<BufReader<TcpStream>>,
}

impl PlayerLink {
    fn new(color: PlayerColor, stream: TcpStream) -> io::Result<Self> {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown peer".into());
        let writer = Arc::new(Mutex::new(BufWriter::new(stream.try_clone()?)));
        let reader = Some(BufReader::new(stream.try_clone()?));
        Ok(Self {
            color,
            peer,
            stream,
            writer,
            reader,
        })
    }

    fn send_line(&self, line: &str) -> io::Result<()> {
        write_line(&mut *lock_writer(&self.writer), line)
    }

    fn send(&self, envelope: &Envelope) -> io::Result<()> {
        self.send_line(&encode(envelope))
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        match self.reader.as_mut() {
            Some(reader) => read_line(reader),
            None => Ok(None),
        }
    }

    fn stop_reading(&self) {
        let _ = self.stream.shutdown(Shutdown::Read);
    }

    fn close(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

fn lock_writer(writer: &SharedWriter) -> MutexGuard<'_, BufWriter<TcpStream>> {
    writer.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct GameSession {
    white: PlayerLink,
    black: PlayerLink,
    store: HistoryStore,
    handshake_timeout: Duration,
    state: SessionState,
    player_white: String,
    player_black: String,
    moves: Arc<Mutex<Vec<MoveRecord>>>,
    stop: Arc<AtomicBool>,
}

impl GameSession {
    /// Take ownership of a freshly paired couple. The first stream plays
    /// white.
    pub fn new(white: TcpStream, black: TcpStream, store: HistoryStore) -> io::Result<Self> {
        Ok(Self {
            white: PlayerLink::new(PlayerColor::White, white)?,
            black: PlayerLink::new(PlayerColor::Black, black)?,
            store,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            state: SessionState::Handshaking,
            player_white: UNKNOWN_PLAYER_NAME.into(),
            player_black: UNKNOWN_PLAYER_NAME.into(),
            moves: Arc::new(Mutex::new(Vec::new())),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// How long to wait for each JOIN line. `Duration::ZERO` waits
    /// indefinitely.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the session to completion on the calling thread.
    pub fn run(mut self) -> SessionReport {
        info!(
            "Session {} (white) vs {} (black): handshaking",
            self.white.peer, self.black.peer
        );

        if let Err(e) = self.handshake() {
            warn!(
                "Session {} vs {}: {e}; aborting",
                self.white.peer, self.black.peer
            );
            self.abort_handshake();
            return self.report(false, None, Vec::new(), None);
        }

        self.state = SessionState::Relaying;
        info!(
            "Session {} vs {}: relaying",
            self.player_white, self.player_black
        );

        let first_finished = self.relay();
        let (moves, history_path) = self.close();
        self.report(true, Some(first_finished), moves, history_path)
    }

    fn handshake(&mut self) -> RelayResult<()> {
        self.white.send_line(PlayerColor::White.as_line())?;
        self.black.send_line(PlayerColor::Black.as_line())?;

        let timeout = Some(self.handshake_timeout).filter(|t| !t.is_zero());
        for link in [&self.white, &self.black] {
            link.stream.set_read_timeout(timeout)?;
        }
        let white_name = read_join(&mut self.white)?;
        let black_name = read_join(&mut self.black)?;
        for link in [&self.white, &self.black] {
            link.stream.set_read_timeout(None)?;
        }

        info!(
            "{} joined as white, {} joined as black",
            white_name, black_name
        );
        self.player_white = white_name;
        self.player_black = black_name;

        self.white.send(&Envelope::join(self.player_black.as_str()))?;
        self.black.send(&Envelope::join(self.player_white.as_str()))?;
        Ok(())
    }

    fn abort_handshake(&mut self) {
        for link in [&self.white, &self.black] {
            let _ = link.send_line(HANDSHAKE_FAILED_LINE);
            link.close();
        }
        self.state = SessionState::Closed;
    }

    /// Start both relay loops and wait for the first to finish. Returns the
    /// color of the side whose direction ended first.
    fn relay(&mut self) -> PlayerColor {
        let (tx, rx) = mpsc::channel();
        let mut handles = Vec::with_capacity(2);
        let to_white = Arc::clone(&self.white.writer);
        let to_black = Arc::clone(&self.black.writer);

        for (source, dest) in [(&mut self.white, to_black), (&mut self.black, to_white)] {
            let Some(reader) = source.reader.take() else {
                continue;
            };
            let color = source.color;
            let moves = Arc::clone(&self.moves);
            let stop = Arc::clone(&self.stop);
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                let end = relay_loop(reader, &dest, color, &moves, &stop);
                let _ = tx.send((color, end));
            }));
        }
        drop(tx);

        let (first, end) = rx
            .recv()
            .unwrap_or((PlayerColor::White, RelayEnd::Stopped));
        self.stop.store(true, Ordering::SeqCst);

        let name = self.name_of(first).to_string();
        let leave_target = match &end {
            RelayEnd::Left => {
                info!("{first} ({name}) left the game");
                None
            }
            RelayEnd::Eof => {
                warn!("{first} ({name}) disconnected");
                Some(first.opponent())
            }
            RelayEnd::ReadFailed(e) => {
                warn!("{first} ({name}) connection error: {e}");
                Some(first.opponent())
            }
            RelayEnd::WriteFailed(e) => {
                warn!(
                    "Could not forward to {} ({}): {e}",
                    first.opponent(),
                    self.name_of(first.opponent())
                );
                Some(first)
            }
            RelayEnd::Stopped => Some(first.opponent()),
        };
        if let Some(target) = leave_target {
            let _ = self.link(target).send(&Envelope::leave());
        }

        self.white.stop_reading();
        self.black.stop_reading();
        for handle in handles {
            let _ = handle.join();
        }
        first
    }

    /// Persist the history and close both sockets.
    fn close(&mut self) -> (Vec<MoveRecord>, Option<PathBuf>) {
        let moves = std::mem::take(&mut *self.moves.lock().unwrap_or_else(|e| e.into_inner()));
        let record = GameHistoryRecord {
            player_white: self.player_white.clone(),
            player_black: self.player_black.clone(),
            moves,
        };
        let history_path = match self.store.save(&record) {
            Ok(path) => {
                info!("Game saved to: {}", path.display());
                Some(path)
            }
            Err(e) => {
                error!(
                    "Lost history of {} vs {} ({} moves): {e}",
                    record.player_white,
                    record.player_black,
                    record.moves.len()
                );
                None
            }
        };

        self.white.close();
        self.black.close();
        self.state = SessionState::Closed;
        info!(
            "Session {} vs {} closed",
            self.player_white, self.player_black
        );
        (record.moves, history_path)
    }

    fn link(&self, color: PlayerColor) -> &PlayerLink {
        match color {
            PlayerColor::White => &self.white,
            PlayerColor::Black => &self.black,
        }
    }

    fn name_of(&self, color: PlayerColor) -> &str {
        match color {
            PlayerColor::White => &self.player_white,
            PlayerColor::Black => &self.player_black,
        }
    }

    fn report(
        &self,
        handshake_completed: bool,
        first_finished: Option<PlayerColor>,
        moves: Vec<MoveRecord>,
        history_path: Option<PathBuf>,
    ) -> SessionReport {
        SessionReport {
            player_white: self.player_white.clone(),
            player_black: self.player_black.clone(),
            state: self.state,
            handshake_completed,
            first_finished,
            moves,
            history_path,
        }
    }
}

/// Read the single JOIN line expected from `link` during the handshake.
fn read_join(link: &mut PlayerLink) -> RelayResult<String> {
    let color = link.color;
    let line = link
        .read_line()?
        .ok_or_else(|| RelayError::Handshake(format!("{color} closed before sending JOIN")))?;
    let envelope = decode(&line)
        .map_err(|e| RelayError::Handshake(format!("{color} sent an invalid JOIN: {e}")))?;
    if envelope.kind != MessageKind::Join {
        return Err(RelayError::Handshake(format!(
            "{color} sent {:?} instead of JOIN",
            envelope.kind
        )));
    }
    Ok(display_name(&envelope.payload))
}

fn display_name(payload: &str) -> String {
    let name = payload.trim();
    if name.is_empty() {
        UNKNOWN_PLAYER_NAME.to_string()
    } else {
        name.to_string()
    }
}

/// Forward lines from one player to the other until the source ends, the
/// destination breaks, or the session stops.
fn relay_loop(
    mut reader: BufReader<TcpStream>,
    dest: &SharedWriter,
    color: PlayerColor,
    moves: &Mutex<Vec<MoveRecord>>,
    stop: &AtomicBool,
) -> RelayEnd {
    loop {
        if stop.load(Ordering::SeqCst) {
            return RelayEnd::Stopped;
        }
        let line = match read_line(&mut reader) {
            Ok(Some(line)) => line,
            Ok(None) => return RelayEnd::Eof,
            Err(e) => return RelayEnd::ReadFailed(e),
        };
        if stop.load(Ordering::SeqCst) {
            return RelayEnd::Stopped;
        }

        let envelope = match decode(&line) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping line from {color}: {e}");
                continue;
            }
        };
        if envelope.kind == MessageKind::Move {
            match MoveRecord::from_payload(&envelope.payload, color) {
                Ok(record) => moves
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(record),
                Err(e) => warn!("Could not record move from {color}: {e}"),
            }
        }

        if let Err(e) = write_line(&mut *lock_writer(dest), &line) {
            return RelayEnd::WriteFailed(e);
        }
        if envelope.kind == MessageKind::Leave {
            return RelayEnd::Left;
        }
    }
}
