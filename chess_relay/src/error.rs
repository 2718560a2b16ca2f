// Error type for the relay crate.
//
// Nothing in a running session propagates these to the server: sessions log
// and close. They surface from the fallible building blocks (history
// persistence, the client, the handshake) so callers can decide.

use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("failed to write game history to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize game history: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type RelayResult<T> = Result<T, RelayError>;
