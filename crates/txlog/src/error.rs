//! Error types for the transaction log.

use thiserror::Error;

/// Errors that can occur during log operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Transaction does not exist
    #[error("transaction not found: {0}")]
    NotFound(i64),

    /// A stored value is not part of the state machine
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Result type for log operations
pub type Result<T> = std::result::Result<T, Error>;
