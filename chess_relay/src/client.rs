// Blocking TCP client for the relay, the network half of a game client.
//
// `connect()` follows the client side of the handshake: TCP connect, wait
// for the color line (which only arrives once an opponent has been paired),
// send JOIN with the display name, then spawn a reader thread. The reader
// thread decodes everything the relay sends and pushes `ClientEvent`s into
// an `mpsc` channel, so a UI or test drains events with `poll()` /
// `recv_timeout()` on its own schedule instead of reacting to callbacks on
// a network thread.
//
// Sending happens on the caller's thread through a `BufWriter<TcpStream>`;
// messages are small and flushed immediately.

use std::io::{BufReader, BufWriter};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chess_relay_protocol::framing::{decode, encode, read_line, write_line};
use chess_relay_protocol::message::{Envelope, HANDSHAKE_FAILED_LINE, MessageKind};
use chess_relay_protocol::types::PlayerColor;
use log::warn;

use crate::error::{RelayError, RelayResult};
use crate::history::{Position, format_move_payload, parse_move_payload};

/// Something the relay told this client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    /// The opponent's display name.
    OpponentJoined(String),
    /// The opponent moved.
    Move { from: Position, to: Position },
    /// The opponent left or disconnected; the session is over.
    OpponentLeft,
    /// The opponent never completed the handshake.
    HandshakeFailed,
    /// The connection to the relay closed.
    Disconnected,
}

pub struct RelayClient {
    color: PlayerColor,
    name: String,
    stream: TcpStream,
    writer: BufWriter<TcpStream>,
    inbox: Receiver<ClientEvent>,
    _reader_thread: JoinHandle<()>,
}

impl RelayClient {
    /// Connect, wait to be paired, and announce `name`. Blocks until the
    /// relay assigns a color.
    pub fn connect(addr: impl ToSocketAddrs, name: &str) -> RelayResult<Self> {
        let stream = TcpStream::connect(addr)?;
        let mut reader = BufReader::new(stream.try_clone()?);

        let line = read_line(&mut reader)?.ok_or_else(|| {
            RelayError::Handshake("relay closed before assigning a color".into())
        })?;
        let color = PlayerColor::from_line(&line)
            .ok_or_else(|| RelayError::Handshake(format!("unexpected first line {line:?}")))?;

        let mut writer = BufWriter::new(stream.try_clone()?);
        write_line(&mut writer, &encode(&Envelope::join(name)))?;

        let (tx, rx) = mpsc::channel();
        let reader_thread = thread::spawn(move || reader_loop(reader, tx));

        Ok(Self {
            color,
            name: name.to_string(),
            stream,
            writer,
            inbox: rx,
            _reader_thread: reader_thread,
        })
    }

    pub fn color(&self) -> PlayerColor {
        self.color
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn send_move(&mut self, from: Position, to: Position) -> RelayResult<()> {
        let envelope = Envelope::movement(format_move_payload(from, to));
        write_line(&mut self.writer, &encode(&envelope))?;
        Ok(())
    }

    pub fn send_leave(&mut self) -> RelayResult<()> {
        write_line(&mut self.writer, &encode(&Envelope::leave()))?;
        Ok(())
    }

    /// Send LEAVE (best effort) and close the connection.
    pub fn disconnect(mut self) {
        let _ = self.send_leave();
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    /// Drain all queued events without blocking.
    pub fn poll(&self) -> Vec<ClientEvent> {
        self.inbox.try_iter().collect()
    }

    /// Wait up to `timeout` for the next event. After the connection has
    /// closed and every event was consumed, returns `Some(Disconnected)`
    /// once and `None` afterwards.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ClientEvent> {
        match self.inbox.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }
}

/// Reader thread: decode lines from the relay into events.
fn reader_loop(mut reader: BufReader<TcpStream>, tx: Sender<ClientEvent>) {
    loop {
        let line = match read_line(&mut reader) {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => {
                let _ = tx.send(ClientEvent::Disconnected);
                return;
            }
        };

        let event = if line == HANDSHAKE_FAILED_LINE {
            ClientEvent::HandshakeFailed
        } else {
            match decode(&line) {
                Ok(envelope) => match to_event(envelope) {
                    Some(event) => event,
                    None => continue,
                },
                Err(e) => {
                    warn!("Ignoring line from relay: {e}");
                    continue;
                }
            }
        };

        if tx.send(event).is_err() {
            return; // Client dropped the receiver
        }
    }
}

fn to_event(envelope: Envelope) -> Option<ClientEvent> {
    match envelope.kind {
        MessageKind::Join => Some(ClientEvent::OpponentJoined(envelope.payload)),
        MessageKind::Leave => Some(ClientEvent::OpponentLeft),
        MessageKind::Move => match parse_move_payload(&envelope.payload) {
            Ok((from, to)) => Some(ClientEvent::Move { from, to }),
            Err(e) => {
                warn!("Ignoring unreadable move from opponent: {e}");
                None
            }
        },
    }
}
