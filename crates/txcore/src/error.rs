//! Error types for the transaction engine.
//!
//! Two layers: [`HandlerError`] is what a step handler reports from its
//! four operations; [`Error`] is what the engine surfaces to callers, with
//! the handler cause attached where one exists. Inside a rollback walk,
//! per-step compensate failures are recorded in step status and logged,
//! never used to abort the walk.

use thiserror::Error;

/// Errors reported by step handlers.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// A host command exited non-zero
    #[error("command failed: {message}")]
    Command {
        /// What was being attempted
        message: String,
        /// Standard error output from the failed command
        stderr: String,
    },

    /// A host command exceeded its configured timeout
    #[error("timed out after {seconds}s: {command}")]
    Timeout { command: String, seconds: u64 },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while encoding or decoding a blob
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Step payload does not satisfy this handler's shape
    #[error("invalid step: {0}")]
    InvalidStep(String),

    /// Snapshot blob does not belong to this handler or is unusable
    #[error("snapshot mismatch: {0}")]
    SnapshotMismatch(String),

    /// The step declares no usable compensation path
    #[error("rollback unsupported: {0}")]
    Unsupported(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Errors surfaced by the transaction engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Input failed shape validation; no side effects were performed
    #[error("validation failed: {0}")]
    Validation(String),

    /// Another transaction holds the single-writer slot
    #[error("transaction {0} is already in progress")]
    Busy(i64),

    /// An operation that needs a current transaction was called without one
    #[error("no active transaction")]
    NoActiveTransaction,

    /// Unknown transaction id
    #[error("transaction not found: {0}")]
    NotFound(i64),

    /// The transaction is in a state that does not permit the operation
    #[error("transaction {id} is {status}; cannot {action}")]
    InvalidState {
        id: i64,
        status: &'static str,
        action: &'static str,
    },

    /// Durable log failure
    #[error("storage error: {0}")]
    Storage(#[from] txlog::Error),

    /// A step declared rollback strategy `none` and irreversible steps are
    /// not allowed
    #[error("step {index} ({kind}) is irreversible (rollback: none); pass --allow-irreversible to run it anyway")]
    Irreversible { index: usize, kind: String },

    /// A handler failed to capture a pre-image
    #[error("snapshot failed for step {index} ({kind}): {source}")]
    Snapshot {
        index: usize,
        kind: String,
        #[source]
        source: HandlerError,
    },

    /// A handler's apply failed
    #[error("step {index} ({kind}) failed: {source}")]
    Apply {
        index: usize,
        kind: String,
        #[source]
        source: HandlerError,
    },

    /// Rollback finished but left steps uncompensated
    #[error("rollback of transaction {id} left {failed} step(s) uncompensated; operator intervention required")]
    Compensate { id: i64, failed: usize },

    /// Cancellation was requested; treated as a step failure
    #[error("cancelled while executing step {index}")]
    Cancelled { index: usize },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
