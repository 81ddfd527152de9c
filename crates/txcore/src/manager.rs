//! Transaction manager: the end-to-end installation lifecycle.
//!
//! One manager instance drives at most one transaction at a time
//! (`begin → execute → commit`, or rollback on any failure), holds the
//! current transaction id as instance state, and enforces the single-writer
//! interlock against the shared log. Handlers are injected at construction,
//! so the whole lifecycle is testable against in-memory fakes.
//!
//! Durability ordering inside `execute`, per step: the step row and its
//! snapshot are committed to the log before the handler's apply runs, and
//! the step's final status is committed before the next step begins.

use crate::error::{Error, HandlerError, Result};
use crate::handler::HandlerRegistry;
use crate::rollback;
use crate::tracker;
use crate::types::{RecoveryAction, StepView, TransactionView};
use metadata::{PackageMetadata, RollbackKind, Step};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use txlog::{StepStatus, TransactionLog, TransactionRow, TxnStatus};

/// Cooperative cancellation flag, checked between steps.
///
/// Cancellation never interrupts a running subprocess; it takes effect at
/// the next step boundary and is treated as a step failure, triggering
/// rollback of everything already applied.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Manages transaction lifecycle for package installations.
pub struct TransactionManager {
    log: TransactionLog,
    registry: HandlerRegistry,
    allow_irreversible: bool,
    cancel: CancelToken,
    current: Option<i64>,
}

impl TransactionManager {
    pub fn new(log: TransactionLog, registry: HandlerRegistry) -> Self {
        Self {
            log,
            registry,
            allow_irreversible: false,
            cancel: CancelToken::new(),
            current: None,
        }
    }

    /// Treat steps declaring `rollback: none` as advisory instead of
    /// refusing to run them.
    pub fn allow_irreversible(mut self, allow: bool) -> Self {
        self.allow_irreversible = allow;
        self
    }

    /// Token that cancels the in-flight transaction at the next step
    /// boundary.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Begin a new transaction for a package and claim the writer slot.
    pub fn begin(&mut self, metadata: &PackageMetadata) -> Result<i64> {
        if let Some(id) = self.current {
            return Err(Error::Busy(id));
        }

        let blob = serde_json::to_string(metadata)
            .map_err(|e| Error::Validation(format!("metadata not serializable: {e}")))?;
        let hash = fingerprint(metadata);

        let id = self
            .log
            .create_transaction(&metadata.package.name, &hash, &blob)?;

        match self.log.activate(id)? {
            None => {
                log::info!(
                    "started transaction {id} for package {}",
                    metadata.package.name
                );
                self.current = Some(id);
                Ok(id)
            }
            Some(other) => {
                // Lost the slot; drop the row we just created.
                self.log.delete_transaction(id)?;
                Err(Error::Busy(other))
            }
        }
    }

    /// Execute the ordered steps of the current transaction.
    ///
    /// Every step's shape is re-validated against its handler before any
    /// side effect runs. On success the transaction is committed; on any
    /// failure everything already applied is rolled back in reverse order
    /// and the first cause is returned.
    pub fn execute(&mut self, steps: &[Step]) -> Result<()> {
        let id = self.current.ok_or(Error::NoActiveTransaction)?;

        if let Err(e) = self.prevalidate(steps) {
            // Nothing has touched the host; fail without rollback.
            log::error!("transaction {id} rejected: {e}");
            let _ = self.log.update_transaction_status(id, TxnStatus::Failed);
            self.current = None;
            return Err(e);
        }

        for (index, step) in steps.iter().enumerate() {
            if self.cancel.is_cancelled() {
                log::warn!("cancellation requested; rolling back transaction {id}");
                return Err(self.abort(id, Error::Cancelled { index }));
            }

            log::info!("executing step {index}: {}", step.kind());

            let data = match serde_json::to_string(step) {
                Ok(data) => data,
                Err(e) => {
                    return Err(self.abort(
                        id,
                        Error::Validation(format!("step {index} not serializable: {e}")),
                    ))
                }
            };
            if let Err(e) = self.log.record_step(id, index as i64, step.kind(), &data) {
                return Err(self.abort(id, e.into()));
            }

            // Snapshot, durable before the side effect.
            if let Err(e) = tracker::capture(&self.log, &self.registry, id, index, step) {
                return Err(self.abort(id, e));
            }

            if let Err(e) = self.log.update_step_status(id, index as i64, StepStatus::Running) {
                return Err(self.abort(id, e.into()));
            }

            let apply_result = match self.registry.get(step.kind()) {
                Some(handler) => handler.apply(step),
                None => Err(HandlerError::Unsupported(format!(
                    "no handler registered for step type '{}'",
                    step.kind()
                ))),
            };

            if let Err(cause) = apply_result {
                let _ = self
                    .log
                    .update_step_status(id, index as i64, StepStatus::Failed);
                let err = Error::Apply {
                    index,
                    kind: step.kind().to_string(),
                    source: cause,
                };
                return Err(self.abort(id, err));
            }

            if let Err(e) = self
                .log
                .update_step_status(id, index as i64, StepStatus::Succeeded)
            {
                return Err(self.abort(id, e.into()));
            }

            log::info!("step {index} succeeded");
        }

        self.commit()
    }

    /// Commit the current transaction and drop its snapshots.
    pub fn commit(&mut self) -> Result<()> {
        let id = self.current.ok_or(Error::NoActiveTransaction)?;

        self.log.update_transaction_status(id, TxnStatus::Committed)?;
        self.log.delete_snapshots(id)?;
        self.current = None;

        log::info!("transaction {id} committed");
        Ok(())
    }

    /// Roll back a transaction by id.
    ///
    /// Valid for any non-terminal transaction and for `failed` ones (the
    /// operator retry path). Idempotent: already-compensated steps are
    /// skipped, an already rolled-back transaction is a no-op.
    pub fn rollback(&mut self, id: i64) -> Result<()> {
        let row = self.log.get_transaction(id)?.ok_or(Error::NotFound(id))?;

        match row.status {
            TxnStatus::Committed => {
                return Err(Error::InvalidState {
                    id,
                    status: "committed",
                    action: "roll back",
                })
            }
            TxnStatus::RolledBack => return Ok(()),
            TxnStatus::Pending
            | TxnStatus::InProgress
            | TxnStatus::RollingBack
            | TxnStatus::Failed => {}
        }

        self.log
            .update_transaction_status(id, TxnStatus::RollingBack)?;
        let outcome = rollback::rollback_transaction(&self.log, &self.registry, id)?;

        if self.current == Some(id) {
            self.current = None;
        }

        if outcome.is_clean() {
            self.log
                .update_transaction_status(id, TxnStatus::RolledBack)?;
            log::info!("transaction {id} rolled back");
            Ok(())
        } else {
            self.log.update_transaction_status(id, TxnStatus::Failed)?;
            Err(Error::Compensate {
                id,
                failed: outcome.failed,
            })
        }
    }

    /// Resolve transactions left non-terminal by a crash.
    ///
    /// `pending` with no recorded steps is deleted (nothing happened);
    /// anything `in_progress` or `rolling_back` is rolled back, treating
    /// `running` steps as potentially partially applied.
    pub fn recover(&mut self) -> Result<Vec<RecoveryAction>> {
        let orphans = self.log.non_terminal_transactions()?;
        let mut actions = Vec::new();

        for row in orphans {
            if self.current == Some(row.id) {
                continue;
            }

            if row.status == TxnStatus::Pending && self.log.get_steps(row.id)?.is_empty() {
                log::info!("recovery: deleting empty pending transaction {}", row.id);
                self.log.delete_transaction(row.id)?;
                actions.push(RecoveryAction::DeletedEmpty { id: row.id });
                continue;
            }

            log::warn!(
                "recovery: transaction {} found {}; rolling back",
                row.id,
                row.status
            );
            self.log
                .update_transaction_status(row.id, TxnStatus::RollingBack)?;
            let outcome = rollback::rollback_transaction(&self.log, &self.registry, row.id)?;

            if outcome.is_clean() {
                self.log
                    .update_transaction_status(row.id, TxnStatus::RolledBack)?;
                actions.push(RecoveryAction::RolledBack { id: row.id });
            } else {
                self.log
                    .update_transaction_status(row.id, TxnStatus::Failed)?;
                actions.push(RecoveryAction::Failed {
                    id: row.id,
                    uncompensated: outcome.failed,
                });
            }
        }

        Ok(actions)
    }

    /// Detailed view of one transaction.
    pub fn status(&self, id: i64) -> Result<TransactionView> {
        let row = self.log.get_transaction(id)?.ok_or(Error::NotFound(id))?;
        self.view(row)
    }

    /// Recent transactions, newest first.
    pub fn list(&self, limit: usize, status: Option<TxnStatus>) -> Result<Vec<TransactionView>> {
        self.log
            .list_transactions(limit, status)?
            .into_iter()
            .map(|row| self.view(row))
            .collect()
    }

    /// Delete terminal transactions older than the cutoff.
    pub fn gc(&mut self, older_than_days: u32) -> Result<usize> {
        let removed = self.log.cleanup_older_than(older_than_days)?;
        log::info!("retention sweep removed {removed} transaction(s)");
        Ok(removed)
    }

    /// Transactions the next `gc` call would delete.
    pub fn expired(&self, older_than_days: u32) -> Result<Vec<TransactionView>> {
        self.log
            .expired_transactions(older_than_days)?
            .into_iter()
            .map(|row| self.view(row))
            .collect()
    }

    // ------------------------------------------------------------------

    /// Shape-check every step against its handler before any side effect.
    fn prevalidate(&self, steps: &[Step]) -> Result<()> {
        for (index, step) in steps.iter().enumerate() {
            let handler = self.registry.get(step.kind()).ok_or_else(|| {
                Error::Validation(format!(
                    "step {index}: no handler registered for step type '{}'",
                    step.kind()
                ))
            })?;

            handler.validate(step).map_err(|e| {
                Error::Validation(format!("step {index} ({}): {e}", step.kind()))
            })?;

            if step.rollback == RollbackKind::None && !self.allow_irreversible {
                return Err(Error::Irreversible {
                    index,
                    kind: step.kind().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Roll back after a mid-execution failure and return the original
    /// cause. Rollback problems are recorded in the log and logged, never
    /// allowed to mask the first error.
    fn abort(&mut self, id: i64, cause: Error) -> Error {
        log::error!("transaction {id} failed: {cause}");
        self.current = None;

        if let Err(e) = self.log.update_transaction_status(id, TxnStatus::RollingBack) {
            log::error!("could not record rolling_back for transaction {id}: {e}");
            return cause;
        }

        match rollback::rollback_transaction(&self.log, &self.registry, id) {
            Ok(outcome) if outcome.is_clean() => {
                let _ = self
                    .log
                    .update_transaction_status(id, TxnStatus::RolledBack);
                log::info!("transaction {id} rolled back");
            }
            Ok(outcome) => {
                let _ = self.log.update_transaction_status(id, TxnStatus::Failed);
                log::error!(
                    "rollback of transaction {id} left {} step(s) uncompensated",
                    outcome.failed
                );
            }
            Err(e) => {
                let _ = self.log.update_transaction_status(id, TxnStatus::Failed);
                log::error!("rollback of transaction {id} errored: {e}");
            }
        }

        cause
    }

    fn view(&self, row: TransactionRow) -> Result<TransactionView> {
        let steps = self
            .log
            .get_steps(row.id)?
            .into_iter()
            .map(|step| StepView {
                order: step.step_order,
                kind: step.step_type.clone(),
                status: step.status,
                description: serde_json::from_str::<Step>(&step.step_data)
                    .ok()
                    .and_then(|s| s.description),
            })
            .collect();

        Ok(TransactionView {
            id: row.id,
            package_name: row.package_name,
            metadata_hash: row.metadata_hash,
            status: row.status,
            created_at: row.created_at,
            completed_at: row.completed_at,
            steps,
        })
    }
}

/// Stable fingerprint of a metadata document: BLAKE3 over its canonical
/// (key-sorted) JSON form.
pub fn fingerprint(metadata: &PackageMetadata) -> String {
    let canonical = serde_json::to_value(metadata)
        .map(|v| v.to_string())
        .unwrap_or_default();
    blake3::hash(canonical.as_bytes()).to_hex().to_string()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::handler::StepHandler;
    use crate::snapshot::Snapshot;
    use metadata::{CustomScriptStep, PackageInfo, StepSpec};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Fake custom_script handler that records every call and fails on
    /// demand, keyed by the step's script name.
    struct FakeHandler {
        calls: Arc<Mutex<Vec<String>>>,
        fail_snapshot: HashSet<String>,
        fail_apply: HashSet<String>,
        fail_compensate: HashSet<String>,
    }

    impl FakeHandler {
        fn new(calls: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                calls,
                fail_snapshot: HashSet::new(),
                fail_apply: HashSet::new(),
                fail_compensate: HashSet::new(),
            }
        }

        fn record(&self, op: &str, step: &Step) {
            let name = match &step.spec {
                StepSpec::CustomScript(s) => s.script.clone(),
                other => other.kind().to_string(),
            };
            self.calls.lock().unwrap().push(format!("{op}:{name}"));
        }

        fn name_of(step: &Step) -> String {
            match &step.spec {
                StepSpec::CustomScript(s) => s.script.clone(),
                other => other.kind().to_string(),
            }
        }
    }

    impl StepHandler for FakeHandler {
        fn kind(&self) -> &'static str {
            "custom_script"
        }

        fn validate(&self, step: &Step) -> std::result::Result<(), HandlerError> {
            if Self::name_of(step) == "invalid" {
                return Err(HandlerError::InvalidStep("bad shape".into()));
            }
            Ok(())
        }

        fn snapshot(&self, step: &Step) -> std::result::Result<Snapshot, HandlerError> {
            self.record("snapshot", step);
            if self.fail_snapshot.contains(&Self::name_of(step)) {
                return Err(HandlerError::Other("snapshot exploded".into()));
            }
            Ok(Snapshot::Script {
                rollback_script: step.rollback_script.clone(),
            })
        }

        fn apply(&self, step: &Step) -> std::result::Result<(), HandlerError> {
            self.record("apply", step);
            if self.fail_apply.contains(&Self::name_of(step)) {
                return Err(HandlerError::Other("apply exploded".into()));
            }
            Ok(())
        }

        fn compensate(&self, step: &Step, _snapshot: &Snapshot) -> std::result::Result<(), HandlerError> {
            self.record("compensate", step);
            if self.fail_compensate.contains(&Self::name_of(step)) {
                return Err(HandlerError::Other("compensate exploded".into()));
            }
            Ok(())
        }
    }

    fn step(name: &str) -> Step {
        Step {
            rollback: RollbackKind::Auto,
            description: None,
            rollback_script: None,
            rollback_playbook: None,
            spec: StepSpec::CustomScript(CustomScriptStep {
                script: name.to_string(),
                timeout_secs: None,
            }),
        }
    }

    fn sample_metadata(name: &str) -> PackageMetadata {
        PackageMetadata {
            package: PackageInfo {
                name: name.to_string(),
                version: "1.0.0".into(),
                description: None,
                author: None,
                license: None,
            },
            install_steps: vec![step("a")],
            pre_install: Vec::new(),
            post_install: Vec::new(),
            dependencies: Vec::new(),
            conflicts: Vec::new(),
            requirements: None,
        }
    }

    struct Fixture {
        _tmp: TempDir,
        calls: Arc<Mutex<Vec<String>>>,
        manager: TransactionManager,
    }

    impl Fixture {
        fn new(configure: impl FnOnce(&mut FakeHandler)) -> Self {
            Self::with_options(configure, false)
        }

        fn with_options(configure: impl FnOnce(&mut FakeHandler), allow_irreversible: bool) -> Self {
            let tmp = TempDir::new().unwrap();
            let log = TransactionLog::open(&tmp.path().join("log.db")).unwrap();
            let calls = Arc::new(Mutex::new(Vec::new()));

            let mut handler = FakeHandler::new(calls.clone());
            configure(&mut handler);

            let mut registry = HandlerRegistry::new();
            registry.register(Box::new(handler));

            Self {
                _tmp: tmp,
                calls,
                manager: TransactionManager::new(log, registry)
                    .allow_irreversible(allow_irreversible),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn log(&self) -> &TransactionLog {
            &self.manager.log
        }
    }

    #[test]
    fn test_happy_path_commits_and_drops_snapshots() {
        let mut fx = Fixture::new(|_| {});
        let id = fx.manager.begin(&sample_metadata("pkg")).unwrap();
        fx.manager.execute(&[step("a"), step("b")]).unwrap();

        let row = fx.log().get_transaction(id).unwrap().unwrap();
        assert_eq!(row.status, TxnStatus::Committed);
        assert!(row.completed_at.is_some());

        let steps = fx.log().get_steps(id).unwrap();
        assert_eq!(steps.len(), 2);
        assert!(steps.iter().all(|s| s.status == StepStatus::Succeeded));

        // Committed transactions keep no snapshots.
        assert!(fx.log().get_snapshots(id).unwrap().is_empty());

        // Snapshot-before-apply, per step, in declared order.
        assert_eq!(
            fx.calls(),
            vec!["snapshot:a", "apply:a", "snapshot:b", "apply:b"]
        );
    }

    #[test]
    fn test_apply_failure_rolls_back_in_reverse() {
        let mut fx = Fixture::new(|h| {
            h.fail_apply.insert("c".into());
        });
        let id = fx.manager.begin(&sample_metadata("pkg")).unwrap();

        let err = fx
            .manager
            .execute(&[step("a"), step("b"), step("c")])
            .unwrap_err();
        assert!(matches!(err, Error::Apply { index: 2, .. }));

        let row = fx.log().get_transaction(id).unwrap().unwrap();
        assert_eq!(row.status, TxnStatus::RolledBack);

        let steps = fx.log().get_steps(id).unwrap();
        assert_eq!(steps[0].status, StepStatus::Compensated);
        assert_eq!(steps[1].status, StepStatus::Compensated);
        // The failed step itself is not compensated; its apply never
        // completed.
        assert_eq!(steps[2].status, StepStatus::Failed);

        assert_eq!(
            fx.calls(),
            vec![
                "snapshot:a",
                "apply:a",
                "snapshot:b",
                "apply:b",
                "snapshot:c",
                "apply:c",
                "compensate:b",
                "compensate:a",
            ]
        );
    }

    #[test]
    fn test_snapshot_failure_rolls_back_prior_steps() {
        let mut fx = Fixture::new(|h| {
            h.fail_snapshot.insert("b".into());
        });
        let id = fx.manager.begin(&sample_metadata("pkg")).unwrap();

        let err = fx.manager.execute(&[step("a"), step("b")]).unwrap_err();
        assert!(matches!(err, Error::Snapshot { index: 1, .. }));

        let row = fx.log().get_transaction(id).unwrap().unwrap();
        assert_eq!(row.status, TxnStatus::RolledBack);

        let steps = fx.log().get_steps(id).unwrap();
        assert_eq!(steps[0].status, StepStatus::Compensated);
        // The step whose snapshot failed never ran and keeps no snapshot.
        assert_eq!(steps[1].status, StepStatus::Pending);
        assert!(fx.log().get_snapshot(id, 1).unwrap().is_none());
    }

    #[test]
    fn test_validation_failure_means_no_side_effects() {
        let mut fx = Fixture::new(|_| {});
        let id = fx.manager.begin(&sample_metadata("pkg")).unwrap();

        let err = fx.manager.execute(&[step("a"), step("invalid")]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        // Failed without rollback: nothing ran, nothing recorded.
        let row = fx.log().get_transaction(id).unwrap().unwrap();
        assert_eq!(row.status, TxnStatus::Failed);
        assert!(fx.log().get_steps(id).unwrap().is_empty());
        assert!(fx.calls().is_empty());
    }

    #[test]
    fn test_irreversible_step_refused_by_default() {
        let mut fx = Fixture::new(|_| {});
        fx.manager.begin(&sample_metadata("pkg")).unwrap();

        let mut irreversible = step("a");
        irreversible.rollback = RollbackKind::None;

        let err = fx.manager.execute(&[irreversible]).unwrap_err();
        assert!(matches!(err, Error::Irreversible { index: 0, .. }));
        assert!(fx.calls().is_empty());
    }

    #[test]
    fn test_irreversible_step_runs_when_allowed() {
        let mut fx = Fixture::with_options(|_| {}, true);
        fx.manager.begin(&sample_metadata("pkg")).unwrap();
        let mut irreversible = step("a");
        irreversible.rollback = RollbackKind::None;
        fx.manager.execute(&[irreversible]).unwrap();

        assert_eq!(fx.calls(), vec!["snapshot:a", "apply:a"]);
    }

    #[test]
    fn test_begin_twice_is_busy() {
        let mut fx = Fixture::new(|_| {});
        let a = fx.manager.begin(&sample_metadata("a")).unwrap();

        let err = fx.manager.begin(&sample_metadata("b")).unwrap_err();
        assert!(matches!(err, Error::Busy(id) if id == a));

        // Transaction a is unaffected and still executable.
        fx.manager.execute(&[step("a")]).unwrap();
        assert_eq!(
            fx.log().get_transaction(a).unwrap().unwrap().status,
            TxnStatus::Committed
        );
    }

    #[test]
    fn test_busy_across_managers_sharing_a_log() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("log.db");

        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry_a = HandlerRegistry::new();
        registry_a.register(Box::new(FakeHandler::new(calls.clone())));
        let mut registry_b = HandlerRegistry::new();
        registry_b.register(Box::new(FakeHandler::new(calls)));

        let mut manager_a =
            TransactionManager::new(TransactionLog::open(&db).unwrap(), registry_a);
        let mut manager_b =
            TransactionManager::new(TransactionLog::open(&db).unwrap(), registry_b);

        let a = manager_a.begin(&sample_metadata("a")).unwrap();
        let err = manager_b.begin(&sample_metadata("b")).unwrap_err();
        assert!(matches!(err, Error::Busy(id) if id == a));

        // The loser's pending row is cleaned up.
        assert_eq!(manager_b.list(10, None).unwrap().len(), 1);
    }

    #[test]
    fn test_manager_reusable_after_commit() {
        let mut fx = Fixture::new(|_| {});
        fx.manager.begin(&sample_metadata("first")).unwrap();
        fx.manager.execute(&[step("a")]).unwrap();

        let second = fx.manager.begin(&sample_metadata("second")).unwrap();
        fx.manager.execute(&[step("b")]).unwrap();
        assert_eq!(
            fx.log().get_transaction(second).unwrap().unwrap().status,
            TxnStatus::Committed
        );
    }

    #[test]
    fn test_best_effort_rollback_and_retry() {
        let mut fx = Fixture::new(|h| {
            h.fail_apply.insert("c".into());
            h.fail_compensate.insert("b".into());
        });
        let id = fx.manager.begin(&sample_metadata("pkg")).unwrap();

        let err = fx
            .manager
            .execute(&[step("a"), step("b"), step("c")])
            .unwrap_err();
        assert!(matches!(err, Error::Apply { index: 2, .. }));

        // Best effort: b's failure did not stop a from being compensated.
        let steps = fx.log().get_steps(id).unwrap();
        assert_eq!(steps[0].status, StepStatus::Compensated);
        assert_eq!(steps[1].status, StepStatus::CompensationFailed);
        assert_eq!(steps[2].status, StepStatus::Failed);
        assert_eq!(
            fx.log().get_transaction(id).unwrap().unwrap().status,
            TxnStatus::Failed
        );

        // Operator retry: only the failed compensation is retried.
        fx.calls.lock().unwrap().clear();
        let mut registry = HandlerRegistry::new();
        registry.register(Box::new(FakeHandler::new(fx.calls.clone())));
        fx.manager.registry = registry;

        fx.manager.rollback(id).unwrap();
        assert_eq!(fx.calls(), vec!["compensate:b"]);

        let steps = fx.log().get_steps(id).unwrap();
        assert_eq!(steps[1].status, StepStatus::Compensated);
        assert_eq!(
            fx.log().get_transaction(id).unwrap().unwrap().status,
            TxnStatus::RolledBack
        );

        // And rolling back again is a no-op.
        fx.calls.lock().unwrap().clear();
        fx.manager.rollback(id).unwrap();
        assert!(fx.calls().is_empty());
    }

    #[test]
    fn test_rollback_refuses_committed() {
        let mut fx = Fixture::new(|_| {});
        let id = fx.manager.begin(&sample_metadata("pkg")).unwrap();
        fx.manager.execute(&[step("a")]).unwrap();

        let err = fx.manager.rollback(id).unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[test]
    fn test_rollback_unknown_id() {
        let mut fx = Fixture::new(|_| {});
        assert!(matches!(
            fx.manager.rollback(404),
            Err(Error::NotFound(404))
        ));
    }

    #[test]
    fn test_crash_recovery_rolls_back_running_step() {
        let mut fx = Fixture::new(|_| {});

        // Simulate a crash mid-apply of step 1: step 0 succeeded, step 1
        // running, both snapshots durable, transaction still in_progress.
        let id = {
            let log = fx.log();
            let id = log.create_transaction("pkg", "h", "{}").unwrap();
            for (order, name) in [(0, "a"), (1, "b")] {
                let data = serde_json::to_string(&step(name)).unwrap();
                log.record_step(id, order, "custom_script", &data).unwrap();
                log.save_snapshot(
                    id,
                    order,
                    &Snapshot::Script {
                        rollback_script: None,
                    }
                    .to_blob()
                    .unwrap(),
                )
                .unwrap();
            }
            log.update_step_status(id, 0, StepStatus::Succeeded).unwrap();
            log.update_step_status(id, 1, StepStatus::Running).unwrap();
            id
        };
        fx.manager.log.activate(id).unwrap();

        let actions = fx.manager.recover().unwrap();
        assert_eq!(actions, vec![RecoveryAction::RolledBack { id }]);

        // The interrupted step is compensated tolerantly, then the
        // succeeded one, in reverse order.
        assert_eq!(fx.calls(), vec!["compensate:b", "compensate:a"]);

        let steps = fx.log().get_steps(id).unwrap();
        assert!(steps.iter().all(|s| s.status == StepStatus::Compensated));
        assert_eq!(
            fx.log().get_transaction(id).unwrap().unwrap().status,
            TxnStatus::RolledBack
        );
    }

    #[test]
    fn test_crash_recovery_deletes_empty_pending() {
        let mut fx = Fixture::new(|_| {});
        let id = fx.log().create_transaction("pkg", "h", "{}").unwrap();

        let actions = fx.manager.recover().unwrap();
        assert_eq!(actions, vec![RecoveryAction::DeletedEmpty { id }]);
        assert!(fx.log().get_transaction(id).unwrap().is_none());
    }

    #[test]
    fn test_crash_recovery_is_idempotent() {
        let mut fx = Fixture::new(|_| {});

        let id = fx.log().create_transaction("pkg", "h", "{}").unwrap();
        let data = serde_json::to_string(&step("a")).unwrap();
        fx.log().record_step(id, 0, "custom_script", &data).unwrap();
        fx.log()
            .save_snapshot(
                id,
                0,
                &Snapshot::Script {
                    rollback_script: None,
                }
                .to_blob()
                .unwrap(),
            )
            .unwrap();
        fx.log().update_step_status(id, 0, StepStatus::Running).unwrap();
        fx.manager.log.activate(id).unwrap();

        let first = fx.manager.recover().unwrap();
        assert_eq!(first, vec![RecoveryAction::RolledBack { id }]);

        // A second recovery pass finds nothing left to do.
        let second = fx.manager.recover().unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn test_cancellation_triggers_rollback() {
        let mut fx = Fixture::new(|_| {});
        let id = fx.manager.begin(&sample_metadata("pkg")).unwrap();

        // Cancel before execution starts: the first boundary check fires.
        fx.manager.cancel_token().cancel();
        let err = fx.manager.execute(&[step("a")]).unwrap_err();
        assert!(matches!(err, Error::Cancelled { index: 0 }));
        assert_eq!(
            fx.log().get_transaction(id).unwrap().unwrap().status,
            TxnStatus::RolledBack
        );
    }

    #[test]
    fn test_status_and_list_views() {
        let mut fx = Fixture::new(|_| {});
        let id = fx.manager.begin(&sample_metadata("pkg")).unwrap();
        let mut described = step("a");
        described.description = Some("first step".into());
        fx.manager.execute(&[described, step("b")]).unwrap();

        let view = fx.manager.status(id).unwrap();
        assert_eq!(view.package_name, "pkg");
        assert_eq!(view.status, TxnStatus::Committed);
        assert_eq!(view.steps.len(), 2);
        assert_eq!(view.steps[0].description.as_deref(), Some("first step"));
        assert_eq!(view.steps[1].kind, "custom_script");

        let listed = fx.manager.list(10, Some(TxnStatus::Committed)).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);

        assert!(matches!(fx.manager.status(999), Err(Error::NotFound(999))));
    }

    #[test]
    fn test_execute_without_begin() {
        let mut fx = Fixture::new(|_| {});
        assert!(matches!(
            fx.manager.execute(&[step("a")]),
            Err(Error::NoActiveTransaction)
        ));
    }

    #[test]
    fn test_fingerprint_stability() {
        let a = sample_metadata("pkg");
        let b = sample_metadata("pkg");
        assert_eq!(fingerprint(&a), fingerprint(&b));

        let mut c = sample_metadata("pkg");
        c.package.version = "2.0.0".into();
        assert_ne!(fingerprint(&a), fingerprint(&c));
    }
}
