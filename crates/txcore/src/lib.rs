//! # txcore
//!
//! The transactional execution engine behind aptomic.
//!
//! An installation is one transaction: an ordered sequence of
//! side-effect-producing steps driven against the live host. Before each
//! step runs, its handler captures a pre-image snapshot that is durable in
//! the log; on any failure the rollback engine walks the executed steps in
//! reverse and compensates each from its snapshot. Crash recovery replays
//! the same rollback from the durable log at startup.
//!
//! Module map:
//! - [`manager`] - lifecycle driver (`begin → execute → commit`, rollback,
//!   recovery, read-side views, retention)
//! - [`handler`] - the validate/snapshot/apply/compensate contract, the
//!   dispatch registry, and the six host handlers
//! - [`rollback`] - reverse-order, best-effort, idempotent compensation
//! - [`tracker`] - snapshot capture and persistence
//! - [`snapshot`] - pre-image blob types and the content-addressed file
//!   backup store
//! - [`requirements`] - host requirements gate
//! - [`hooks`] - pre/post-install hooks, outside the envelope
//! - [`runner`] - subprocess helpers shared by handlers

pub mod error;
pub mod handler;
pub mod hooks;
pub mod manager;
pub mod requirements;
pub mod rollback;
pub mod runner;
pub mod snapshot;
pub mod tracker;
pub mod types;

pub use error::{Error, HandlerError, Result};
pub use handler::{HandlerRegistry, StepHandler};
pub use manager::{fingerprint, CancelToken, TransactionManager};
pub use rollback::RollbackOutcome;
pub use snapshot::{BackupStore, Snapshot};
pub use types::{RecoveryAction, StepView, TransactionView};
