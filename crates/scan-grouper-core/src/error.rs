use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Custom error types for the scan-grouper library
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unreadable or corrupt image; candidates failing this way are
    /// skipped, not finalized
    #[error("Failed to decode image {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },

    /// File or directory not found error
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Invalid configuration error
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Filename carries no digit run and cannot be ordered naturally
    #[error("Filename has no numeric sequence: {0}")]
    MalformedName(String),

    /// Ledger read/write failure; fatal for the current candidate,
    /// retryable on the next run
    #[error(transparent)]
    Ledger(#[from] crate::persistence::LedgerError),

    /// A file was relocated but the ledger does not reflect it (or vice
    /// versa). Requires operator reconciliation; never retried silently.
    #[error("Inconsistent state for ledger record {record_id}: {detail}")]
    InconsistentState { record_id: i64, detail: String },
}
