// Move history for a single session and its on-disk record.
//
// The relay treats MOVE payloads as coordinate pairs only. It never checks
// legality. `parse_move_payload` turns `"x1,y1:x2,y2"` into two `Position`s,
// and each relay loop appends a `MoveRecord` tagged with the mover's color.
//
// When a session ends, the collected moves become one `GameHistoryRecord`
// that `HistoryStore` writes as pretty-printed JSON:
//
//   GameHistory/2024-05-01_18-30-00_Alice_vs_Bob.json
//
// Field names are PascalCase (`PlayerWhite`, `Moves`, `From`, `X`, ...)
// to stay readable by the existing client tooling.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chess_relay_protocol::PlayerColor;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, RelayResult};

/// Default directory name for history files, created next to the
/// executable (see `crate::base_dir`).
pub const DEFAULT_HISTORY_DIR: &str = "GameHistory";

/// Longest name fragment used in a history file name.
const MAX_NAME_IN_FILE_NAME: usize = 32;

/// A board square. Both coordinates are in `0..=7`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Position {
    pub x: u8,
    pub y: u8,
}

impl Position {
    pub const MAX_COORD: u8 = 7;

    /// Returns `None` if either coordinate is off the board.
    pub fn new(x: u8, y: u8) -> Option<Self> {
        (x <= Self::MAX_COORD && y <= Self::MAX_COORD).then_some(Self { x, y })
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum MoveParseError {
    #[error("expected \"x1,y1:x2,y2\", got {0:?}")]
    Shape(String),
    #[error("invalid coordinate {0:?}")]
    Coordinate(String),
    #[error("square ({x}, {y}) is off the board")]
    OffBoard { x: i64, y: i64 },
}

/// Parse a MOVE payload of the form `"x1,y1:x2,y2"`.
pub fn parse_move_payload(payload: &str) -> Result<(Position, Position), MoveParseError> {
    let (from, to) = payload
        .split_once(':')
        .ok_or_else(|| MoveParseError::Shape(payload.to_string()))?;
    Ok((parse_position(from)?, parse_position(to)?))
}

/// Inverse of `parse_move_payload`.
pub fn format_move_payload(from: Position, to: Position) -> String {
    format!("{},{}:{},{}", from.x, from.y, to.x, to.y)
}

fn parse_position(text: &str) -> Result<Position, MoveParseError> {
    let (x, y) = text
        .split_once(',')
        .ok_or_else(|| MoveParseError::Shape(text.to_string()))?;
    let x = parse_coord(x)?;
    let y = parse_coord(y)?;
    u8::try_from(x)
        .ok()
        .zip(u8::try_from(y).ok())
        .and_then(|(px, py)| Position::new(px, py))
        .ok_or(MoveParseError::OffBoard { x, y })
}

fn parse_coord(text: &str) -> Result<i64, MoveParseError> {
    text.trim()
        .parse()
        .map_err(|_| MoveParseError::Coordinate(text.to_string()))
}

/// One relayed move. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MoveRecord {
    pub from: Position,
    pub to: Position,
    pub timestamp: DateTime<Utc>,
    pub player_color: PlayerColor,
}

impl MoveRecord {
    /// Parse a MOVE payload sent by `player_color`, stamped with the current
    /// UTC time.
    pub fn from_payload(payload: &str, player_color: PlayerColor) -> Result<Self, MoveParseError> {
        let (from, to) = parse_move_payload(payload)?;
        Ok(Self {
            from,
            to,
            timestamp: Utc::now(),
            player_color,
        })
    }
}

/// Everything persisted about a finished session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GameHistoryRecord {
    pub player_white: String,
    pub player_black: String,
    pub moves: Vec<MoveRecord>,
}

/// Writes one JSON file per finished session into a directory.
#[derive(Clone, Debug)]
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `record`, named after the current local time. Returns the path
    /// of the new file.
    pub fn save(&self, record: &GameHistoryRecord) -> RelayResult<PathBuf> {
        self.save_at(record, Local::now())
    }

    /// Write `record` as if the session ended at `ended_at`. An existing file
    /// with the same name is never overwritten; a numeric suffix is added
    /// instead.
    pub fn save_at(
        &self,
        record: &GameHistoryRecord,
        ended_at: DateTime<Local>,
    ) -> RelayResult<PathBuf> {
        fs::create_dir_all(&self.dir).map_err(|source| RelayError::Persist {
            path: self.dir.clone(),
            source,
        })?;
        let json = serde_json::to_string_pretty(record)?;
        let stem = file_stem(record, ended_at);

        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                format!("{stem}.json")
            } else {
                format!("{stem}_{attempt}.json")
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(json.as_bytes())
                        .map_err(|source| RelayError::Persist {
                            path: path.clone(),
                            source,
                        })?;
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempt < 1000 => {
                    attempt += 1;
                }
                Err(source) => return Err(RelayError::Persist { path, source }),
            }
        }
    }
}

fn file_stem(record: &GameHistoryRecord, ended_at: DateTime<Local>) -> String {
    format!(
        "{}_{}_vs_{}",
        ended_at.format("%Y-%m-%d_%H-%M-%S"),
        file_safe_name(&record.player_white),
        file_safe_name(&record.player_black),
    )
}

/// Display names are user input; keep only characters that are safe in a
/// file name on every platform.
fn file_safe_name(name: &str) -> String {
    name.chars()
        .take(MAX_NAME_IN_FILE_NAME)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
