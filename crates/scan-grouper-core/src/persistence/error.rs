use thiserror::Error;

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger-specific errors
#[derive(Error, Debug)]
pub enum LedgerError {
    /// SQLite errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Errors during database initialization
    #[error("Ledger initialization error: {0}")]
    Initialization(String),
}
