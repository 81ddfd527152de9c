//! State tracker: captures and persists pre-step snapshots.
//!
//! Thin coordinator over the handler registry and the durable log. The
//! snapshot row is durable before [`capture`] returns, which is what lets
//! the manager issue the step's side effect afterwards.

use crate::error::{Error, Result};
use crate::handler::HandlerRegistry;
use crate::snapshot::Snapshot;
use metadata::Step;
use txlog::TransactionLog;

/// Ask the step's handler for a pre-image and persist it.
pub fn capture(
    log: &TransactionLog,
    registry: &HandlerRegistry,
    transaction_id: i64,
    index: usize,
    step: &Step,
) -> Result<Snapshot> {
    let handler = registry.get(step.kind()).ok_or_else(|| {
        Error::Validation(format!(
            "no handler registered for step type '{}'",
            step.kind()
        ))
    })?;

    let wrap = |source| Error::Snapshot {
        index,
        kind: step.kind().to_string(),
        source,
    };

    let snapshot = handler.snapshot(step).map_err(wrap)?;
    let blob = snapshot.to_blob().map_err(wrap)?;
    log.save_snapshot(transaction_id, index as i64, &blob)?;

    log::debug!("captured {} snapshot for step {index}", step.kind());
    Ok(snapshot)
}
