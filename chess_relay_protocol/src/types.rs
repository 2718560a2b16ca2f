// Player color shared by the handshake and the move history.
//
// The relay tells each client its color with a plain-text first line
// (`white` / `black`) before any JSON traffic. The same enum is stored in
// move records, where it serializes as `"White"` / `"Black"`.

use serde::{Deserialize, Serialize};

/// Side a player controls for the whole session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerColor {
    White,
    Black,
}

impl PlayerColor {
    /// The color-assignment line sent right after connecting (no newline).
    pub fn as_line(self) -> &'static str {
        match self {
            PlayerColor::White => "white",
            PlayerColor::Black => "black",
        }
    }

    /// Parse a color-assignment line. Returns `None` for anything else,
    /// including the handshake failure notice.
    pub fn from_line(line: &str) -> Option<Self> {
        match line.trim() {
            "white" => Some(PlayerColor::White),
            "black" => Some(PlayerColor::Black),
            _ => None,
        }
    }

    pub fn opponent(self) -> Self {
        match self {
            PlayerColor::White => PlayerColor::Black,
            PlayerColor::Black => PlayerColor::White,
        }
    }
}

impl std::fmt::Display for PlayerColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_line())
    }
}
