use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by [`ThreadStore`](super::ThreadStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing file exists but is not a JSON object of string → string.
    #[error("thread store {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// `put` was called for a user that already owns a thread.
    #[error("user {user_id} is already mapped to thread {existing}")]
    AlreadyMapped { user_id: String, existing: String },

    #[error("thread store I/O on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode thread store: {0}")]
    Encode(#[from] serde_json::Error),
}
