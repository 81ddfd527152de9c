//! Rollback engine: reverse-order compensation of executed steps.
//!
//! Given a transaction, loads its steps and paired snapshots and walks them
//! strictly in reverse. Compensation is best-effort: a failing step is
//! recorded as `compensation_failed` and the walk continues, so one stuck
//! resource cannot leave everything after it un-restored. The engine is
//! idempotent - re-running it skips steps already `compensated` and retries
//! the rest.
//!
//! Which steps get compensated:
//! - `succeeded` - applied fully, must be undone
//! - `running` / `compensating` - interrupted mid-way, undone tolerantly
//! - `compensation_failed` - retried
//! - `pending` / `failed` / `compensated` - skipped (`failed` means the
//!   apply itself did not go through; there is nothing to undo)

use crate::error::{HandlerError, Result};
use crate::handler::{ansible, HandlerRegistry};
use crate::runner;
use crate::snapshot::Snapshot;
use metadata::{RollbackKind, Step, StepSpec};
use std::collections::BTreeMap;
use txlog::{StepRow, StepStatus, TransactionLog};

/// Tally of one rollback walk.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RollbackOutcome {
    pub compensated: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RollbackOutcome {
    /// True when every step that needed compensation got it.
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Walk a transaction's steps in reverse order, compensating each.
pub fn rollback_transaction(
    log: &TransactionLog,
    registry: &HandlerRegistry,
    transaction_id: i64,
) -> Result<RollbackOutcome> {
    let steps = log.get_steps(transaction_id)?;
    log::info!(
        "rolling back transaction {transaction_id} ({} recorded steps)",
        steps.len()
    );

    let mut outcome = RollbackOutcome::default();

    for row in steps.iter().rev() {
        match row.status {
            StepStatus::Pending | StepStatus::Failed | StepStatus::Compensated => {
                outcome.skipped += 1;
                continue;
            }
            StepStatus::Running
            | StepStatus::Succeeded
            | StepStatus::Compensating
            | StepStatus::CompensationFailed => {}
        }

        log.update_step_status(transaction_id, row.step_order, StepStatus::Compensating)?;

        match compensate_step(log, registry, row) {
            Ok(()) => {
                log.update_step_status(transaction_id, row.step_order, StepStatus::Compensated)?;
                log::info!("compensated step {} ({})", row.step_order, row.step_type);
                outcome.compensated += 1;
            }
            Err(e) => {
                log.update_step_status(
                    transaction_id,
                    row.step_order,
                    StepStatus::CompensationFailed,
                )?;
                log::error!(
                    "compensation failed for step {} ({}): {e}",
                    row.step_order,
                    row.step_type
                );
                outcome.failed += 1;
            }
        }
    }

    Ok(outcome)
}

/// Undo one step via the compensator selected by its rollback strategy.
fn compensate_step(
    log: &TransactionLog,
    registry: &HandlerRegistry,
    row: &StepRow,
) -> std::result::Result<(), HandlerError> {
    let step: Step = serde_json::from_str(&row.step_data)?;

    let snapshot_row = log
        .get_snapshot(row.transaction_id, row.step_order)
        .map_err(|e| HandlerError::Other(e.to_string()))?
        .ok_or_else(|| {
            HandlerError::SnapshotMismatch(format!(
                "no snapshot recorded for step {}",
                row.step_order
            ))
        })?;
    let snapshot = Snapshot::from_blob(&snapshot_row.snapshot_data)?;

    match step.rollback {
        RollbackKind::Auto => {
            let handler = registry.get(step.kind()).ok_or_else(|| {
                HandlerError::Unsupported(format!(
                    "no handler registered for step type '{}'",
                    step.kind()
                ))
            })?;
            handler.compensate(&step, &snapshot)
        }
        RollbackKind::Manual => match &step.rollback_script {
            Some(script) => {
                log::info!("running rollback script for step {}", row.step_order);
                runner::run_shell(script, None)
            }
            None => Err(HandlerError::Unsupported(
                "rollback: manual but no rollback_script supplied".into(),
            )),
        },
        RollbackKind::Ansible => match &step.rollback_playbook {
            Some(playbook) => {
                let (vars, inventory, timeout) = playbook_context(&step);
                ansible::run_playbook(playbook, vars, inventory, timeout)
            }
            None => Err(HandlerError::Unsupported(
                "rollback: ansible but no rollback_playbook supplied".into(),
            )),
        },
        RollbackKind::None => Err(HandlerError::Unsupported(
            "step declares rollback: none".into(),
        )),
    }
}

/// Variables, inventory, and timeout for a rollback playbook: reuse the
/// step's own when it is an ansible step, otherwise defaults.
fn playbook_context(step: &Step) -> (&BTreeMap<String, serde_json::Value>, Option<&str>, Option<u64>) {
    static EMPTY: std::sync::OnceLock<BTreeMap<String, serde_json::Value>> =
        std::sync::OnceLock::new();
    match &step.spec {
        StepSpec::AnsiblePlaybook(playbook) => (
            &playbook.vars,
            playbook.inventory.as_deref(),
            playbook.timeout_secs,
        ),
        _ => (EMPTY.get_or_init(BTreeMap::new), None, None),
    }
}

// The engine is exercised end-to-end (ordering, best-effort policy,
// idempotence) through the manager tests with injected fake handlers.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_clean() {
        assert!(RollbackOutcome::default().is_clean());
        assert!(!RollbackOutcome {
            compensated: 2,
            failed: 1,
            skipped: 0
        }
        .is_clean());
    }

    #[test]
    fn test_rollback_unknown_transaction_is_empty_walk() {
        let tmp = tempfile::TempDir::new().unwrap();
        let log = TransactionLog::open(&tmp.path().join("log.db")).unwrap();
        let registry = HandlerRegistry::new();

        let outcome = rollback_transaction(&log, &registry, 42).unwrap();
        assert_eq!(outcome, RollbackOutcome::default());
    }
}
