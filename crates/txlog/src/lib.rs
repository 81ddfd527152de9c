//! # txlog
//!
//! Crash-durable persistence for aptomic transactions.
//!
//! The log is a single SQLite file with write-ahead logging enabled. It
//! holds three relations: `transactions`, `steps` (keyed by transaction id
//! and 0-based order index), and `snapshots` (paired 1:1 with steps). Every
//! write commits in its own durable unit, so any state observed after a
//! crash corresponds to a prefix of completed writes.
//!
//! The log is also the single-writer interlock for the whole installer: at
//! most one transaction may be `in_progress`, claimed atomically via
//! [`TransactionLog::activate`].
//!
//! ## Example
//!
//! ```no_run
//! use txlog::{TransactionLog, TxnStatus};
//! use std::path::Path;
//!
//! let mut log = TransactionLog::open(Path::new("/var/lib/aptomic/transactions.db"))?;
//! let id = log.create_transaction("nginx", "deadbeef", "{}")?;
//! assert!(log.activate(id)?.is_none());
//! log.update_transaction_status(id, TxnStatus::Committed)?;
//! # Ok::<(), txlog::Error>(())
//! ```

mod error;
mod types;

pub use error::{Error, Result};
pub use types::{SnapshotRow, StepRow, StepStatus, TransactionRow, TxnStatus};

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;

/// Handle to the durable transaction log.
pub struct TransactionLog {
    conn: Connection,
}

impl TransactionLog {
    /// Open or create the log at the given path.
    ///
    /// Creates parent directories and the schema if needed, and switches
    /// the database to WAL with full synchronous commits so that a row is
    /// on disk before the call returns. Readers (`list`, `status`) are not
    /// blocked by an in-flight writer under WAL.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        Self::init(Connection::open(db_path)?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                package_name TEXT NOT NULL,
                metadata_hash TEXT NOT NULL,
                metadata TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at INTEGER NOT NULL,
                completed_at INTEGER
            );

            CREATE TABLE IF NOT EXISTS steps (
                transaction_id INTEGER NOT NULL
                    REFERENCES transactions(id) ON DELETE CASCADE,
                step_order INTEGER NOT NULL,
                step_type TEXT NOT NULL,
                step_data TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                executed_at INTEGER,
                PRIMARY KEY (transaction_id, step_order)
            );

            CREATE TABLE IF NOT EXISTS snapshots (
                transaction_id INTEGER NOT NULL
                    REFERENCES transactions(id) ON DELETE CASCADE,
                step_order INTEGER NOT NULL,
                snapshot_data TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (transaction_id, step_order)
            );

            CREATE INDEX IF NOT EXISTS idx_transactions_status
                ON transactions(status);
            ",
        )?;

        Ok(Self { conn })
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Create a new `pending` transaction and return its id.
    pub fn create_transaction(
        &self,
        package_name: &str,
        metadata_hash: &str,
        metadata: &str,
    ) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        self.conn.execute(
            "INSERT INTO transactions (package_name, metadata_hash, metadata, status, created_at)
             VALUES (?1, ?2, ?3, 'pending', ?4)",
            params![package_name, metadata_hash, metadata, now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Claim the single-writer slot for a transaction.
    ///
    /// Under an immediate (write-locked) SQL transaction: if another
    /// transaction is already `in_progress`, returns its id and changes
    /// nothing; otherwise moves `id` to `in_progress` and returns `None`.
    pub fn activate(&mut self, id: i64) -> Result<Option<i64>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let competing: Option<i64> = tx
            .query_row(
                "SELECT id FROM transactions WHERE status = 'in_progress' LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(other) = competing {
            return Ok(Some(other));
        }

        let updated = tx.execute(
            "UPDATE transactions SET status = 'in_progress' WHERE id = ?1",
            [id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(id));
        }

        tx.commit()?;
        Ok(None)
    }

    /// Update a transaction's status. Terminal states stamp `completed_at`.
    pub fn update_transaction_status(&self, id: i64, status: TxnStatus) -> Result<()> {
        let updated = if status.is_terminal() {
            let now = chrono::Utc::now().timestamp();
            self.conn.execute(
                "UPDATE transactions SET status = ?1, completed_at = ?2 WHERE id = ?3",
                params![status.as_str(), now, id],
            )?
        } else {
            self.conn.execute(
                "UPDATE transactions SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id],
            )?
        };

        if updated == 0 {
            return Err(Error::NotFound(id));
        }
        Ok(())
    }

    /// Fetch a transaction by id.
    pub fn get_transaction(&self, id: i64) -> Result<Option<TransactionRow>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, package_name, metadata_hash, metadata, status, created_at, completed_at
                 FROM transactions WHERE id = ?1",
                [id],
                read_transaction_row,
            )
            .optional()?)
    }

    /// List recent transactions, newest first, optionally filtered by status.
    pub fn list_transactions(
        &self,
        limit: usize,
        status: Option<TxnStatus>,
    ) -> Result<Vec<TransactionRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, package_name, metadata_hash, metadata, status, created_at, completed_at
             FROM transactions
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY id DESC LIMIT ?2",
        )?;

        let rows = stmt.query_map(
            params![status.map(|s| s.as_str()), limit as i64],
            read_transaction_row,
        )?;
        collect(rows)
    }

    /// All transactions in non-terminal states, oldest first.
    ///
    /// These are the orphans crash recovery has to resolve.
    pub fn non_terminal_transactions(&self) -> Result<Vec<TransactionRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, package_name, metadata_hash, metadata, status, created_at, completed_at
             FROM transactions
             WHERE status IN ('pending', 'in_progress', 'rolling_back')
             ORDER BY id",
        )?;
        let rows = stmt.query_map([], read_transaction_row)?;
        collect(rows)
    }

    /// Delete a transaction and, via cascade, its steps and snapshots.
    pub fn delete_transaction(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM transactions WHERE id = ?1", [id])?;
        Ok(())
    }

    // ========================================================================
    // Steps
    // ========================================================================

    /// Record a step row with status `pending`.
    pub fn record_step(
        &self,
        transaction_id: i64,
        step_order: i64,
        step_type: &str,
        step_data: &str,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO steps (transaction_id, step_order, step_type, step_data, status)
             VALUES (?1, ?2, ?3, ?4, 'pending')",
            params![transaction_id, step_order, step_type, step_data],
        )?;
        Ok(())
    }

    /// Update a step's status. Moving to `running` stamps `executed_at`.
    pub fn update_step_status(
        &self,
        transaction_id: i64,
        step_order: i64,
        status: StepStatus,
    ) -> Result<()> {
        let updated = if status == StepStatus::Running {
            let now = chrono::Utc::now().timestamp();
            self.conn.execute(
                "UPDATE steps SET status = ?1, executed_at = ?2
                 WHERE transaction_id = ?3 AND step_order = ?4",
                params![status.as_str(), now, transaction_id, step_order],
            )?
        } else {
            self.conn.execute(
                "UPDATE steps SET status = ?1
                 WHERE transaction_id = ?2 AND step_order = ?3",
                params![status.as_str(), transaction_id, step_order],
            )?
        };

        if updated == 0 {
            return Err(Error::Corrupt(format!(
                "no step row for transaction {transaction_id} order {step_order}"
            )));
        }
        Ok(())
    }

    /// All steps of a transaction in order-index order.
    pub fn get_steps(&self, transaction_id: i64) -> Result<Vec<StepRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT transaction_id, step_order, step_type, step_data, status, executed_at
             FROM steps WHERE transaction_id = ?1 ORDER BY step_order",
        )?;
        let rows = stmt.query_map([transaction_id], |row| {
            let status: String = row.get(4)?;
            Ok(StepRow {
                transaction_id: row.get(0)?,
                step_order: row.get(1)?,
                step_type: row.get(2)?,
                step_data: row.get(3)?,
                status: StepStatus::parse(&status).map_err(into_sql_error)?,
                executed_at: row.get(5)?,
            })
        })?;
        collect(rows)
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Persist the pre-image for a step. Durable once this returns.
    pub fn save_snapshot(
        &self,
        transaction_id: i64,
        step_order: i64,
        snapshot_data: &str,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        self.conn.execute(
            "INSERT INTO snapshots (transaction_id, step_order, snapshot_data, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![transaction_id, step_order, snapshot_data, now],
        )?;
        Ok(())
    }

    /// The snapshot paired with one step, if recorded.
    pub fn get_snapshot(
        &self,
        transaction_id: i64,
        step_order: i64,
    ) -> Result<Option<SnapshotRow>> {
        Ok(self
            .conn
            .query_row(
                "SELECT transaction_id, step_order, snapshot_data, created_at
                 FROM snapshots WHERE transaction_id = ?1 AND step_order = ?2",
                params![transaction_id, step_order],
                read_snapshot_row,
            )
            .optional()?)
    }

    /// All snapshots of a transaction in order-index order.
    pub fn get_snapshots(&self, transaction_id: i64) -> Result<Vec<SnapshotRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT transaction_id, step_order, snapshot_data, created_at
             FROM snapshots WHERE transaction_id = ?1 ORDER BY step_order",
        )?;
        let rows = stmt.query_map([transaction_id], read_snapshot_row)?;
        collect(rows)
    }

    /// Drop all snapshots of a transaction. Done at commit, when the
    /// transaction can no longer roll back.
    pub fn delete_snapshots(&self, transaction_id: i64) -> Result<()> {
        self.conn.execute(
            "DELETE FROM snapshots WHERE transaction_id = ?1",
            [transaction_id],
        )?;
        Ok(())
    }

    // ========================================================================
    // Retention
    // ========================================================================

    /// Terminal transactions older than the cutoff, oldest first.
    pub fn expired_transactions(&self, older_than_days: u32) -> Result<Vec<TransactionRow>> {
        let cutoff = cutoff_epoch(older_than_days);
        let mut stmt = self.conn.prepare(
            "SELECT id, package_name, metadata_hash, metadata, status, created_at, completed_at
             FROM transactions
             WHERE status IN ('committed', 'rolled_back', 'failed') AND created_at < ?1
             ORDER BY id",
        )?;
        let rows = stmt.query_map([cutoff], read_transaction_row)?;
        collect(rows)
    }

    /// Delete terminal transactions older than the cutoff.
    ///
    /// Each (transaction, steps, snapshots) triple is removed as one unit;
    /// non-terminal rows are never touched. Returns the number of
    /// transactions removed.
    pub fn cleanup_older_than(&mut self, older_than_days: u32) -> Result<usize> {
        let cutoff = cutoff_epoch(older_than_days);
        let tx = self.conn.transaction()?;
        let deleted = tx.execute(
            "DELETE FROM transactions
             WHERE status IN ('committed', 'rolled_back', 'failed') AND created_at < ?1",
            [cutoff],
        )?;
        tx.commit()?;
        Ok(deleted)
    }

    /// Backdate a transaction's creation time. Retention tests only.
    #[cfg(test)]
    fn set_created_at(&self, id: i64, epoch: i64) {
        self.conn
            .execute(
                "UPDATE transactions SET created_at = ?1 WHERE id = ?2",
                params![epoch, id],
            )
            .unwrap();
    }
}

fn read_transaction_row(row: &rusqlite::Row) -> rusqlite::Result<TransactionRow> {
    let status: String = row.get(4)?;
    Ok(TransactionRow {
        id: row.get(0)?,
        package_name: row.get(1)?,
        metadata_hash: row.get(2)?,
        metadata: row.get(3)?,
        status: TxnStatus::parse(&status).map_err(into_sql_error)?,
        created_at: row.get(5)?,
        completed_at: row.get(6)?,
    })
}

fn read_snapshot_row(row: &rusqlite::Row) -> rusqlite::Result<SnapshotRow> {
    Ok(SnapshotRow {
        transaction_id: row.get(0)?,
        step_order: row.get(1)?,
        snapshot_data: row.get(2)?,
        created_at: row.get(3)?,
    })
}

/// Surface a corrupt stored status through the rusqlite error channel so
/// row mappers stay single-layered.
fn into_sql_error(e: Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
}

fn collect<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Epoch cutoff for the retention sweep.
fn cutoff_epoch(older_than_days: u32) -> i64 {
    chrono::Utc::now().timestamp() - i64::from(older_than_days) * 86_400
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_log(tmp: &TempDir) -> TransactionLog {
        TransactionLog::open(&tmp.path().join("transactions.db")).unwrap()
    }

    #[test]
    fn test_open_creates_db() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("nested").join("transactions.db");

        let log = TransactionLog::open(&db_path).unwrap();
        assert!(db_path.exists());
        assert!(log.list_transactions(10, None).unwrap().is_empty());
    }

    #[test]
    fn test_create_and_get_transaction() {
        let tmp = TempDir::new().unwrap();
        let log = open_log(&tmp);

        let id = log
            .create_transaction("nginx", "abc123", r#"{"package":"nginx"}"#)
            .unwrap();
        let row = log.get_transaction(id).unwrap().unwrap();

        assert_eq!(row.package_name, "nginx");
        assert_eq!(row.metadata_hash, "abc123");
        assert_eq!(row.status, TxnStatus::Pending);
        assert!(row.completed_at.is_none());
        assert!(log.get_transaction(id + 1).unwrap().is_none());
    }

    #[test]
    fn test_activate_single_writer() {
        let tmp = TempDir::new().unwrap();
        let mut log = open_log(&tmp);

        let a = log.create_transaction("a", "h", "{}").unwrap();
        let b = log.create_transaction("b", "h", "{}").unwrap();

        assert!(log.activate(a).unwrap().is_none());
        // Second claim reports the competing id and leaves b pending.
        assert_eq!(log.activate(b).unwrap(), Some(a));
        assert_eq!(
            log.get_transaction(b).unwrap().unwrap().status,
            TxnStatus::Pending
        );

        // Once a reaches a terminal state, b can be claimed.
        log.update_transaction_status(a, TxnStatus::Committed)
            .unwrap();
        assert!(log.activate(b).unwrap().is_none());
    }

    #[test]
    fn test_activate_unknown_id() {
        let tmp = TempDir::new().unwrap();
        let mut log = open_log(&tmp);
        assert!(matches!(log.activate(99), Err(Error::NotFound(99))));
    }

    #[test]
    fn test_terminal_status_stamps_completed_at() {
        let tmp = TempDir::new().unwrap();
        let log = open_log(&tmp);

        let id = log.create_transaction("pkg", "h", "{}").unwrap();
        log.update_transaction_status(id, TxnStatus::InProgress)
            .unwrap();
        assert!(log
            .get_transaction(id)
            .unwrap()
            .unwrap()
            .completed_at
            .is_none());

        log.update_transaction_status(id, TxnStatus::RolledBack)
            .unwrap();
        assert!(log
            .get_transaction(id)
            .unwrap()
            .unwrap()
            .completed_at
            .is_some());
    }

    #[test]
    fn test_steps_ordered_and_dense() {
        let tmp = TempDir::new().unwrap();
        let log = open_log(&tmp);

        let id = log.create_transaction("pkg", "h", "{}").unwrap();
        log.record_step(id, 0, "apt_package", "{}").unwrap();
        log.record_step(id, 1, "file_copy", "{}").unwrap();
        log.record_step(id, 2, "custom_script", "{}").unwrap();

        let steps = log.get_steps(id).unwrap();
        assert_eq!(steps.len(), 3);
        let orders: Vec<i64> = steps.iter().map(|s| s.step_order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
        assert!(steps.iter().all(|s| s.status == StepStatus::Pending));

        // Duplicate order index violates the composite primary key.
        assert!(log.record_step(id, 1, "file_copy", "{}").is_err());
    }

    #[test]
    fn test_step_status_updates() {
        let tmp = TempDir::new().unwrap();
        let log = open_log(&tmp);

        let id = log.create_transaction("pkg", "h", "{}").unwrap();
        log.record_step(id, 0, "file_copy", "{}").unwrap();

        log.update_step_status(id, 0, StepStatus::Running).unwrap();
        let step = &log.get_steps(id).unwrap()[0];
        assert_eq!(step.status, StepStatus::Running);
        assert!(step.executed_at.is_some());

        log.update_step_status(id, 0, StepStatus::Succeeded).unwrap();
        assert_eq!(log.get_steps(id).unwrap()[0].status, StepStatus::Succeeded);

        // Unknown (transaction, order) pair is an error, not a silent no-op.
        assert!(log.update_step_status(id, 7, StepStatus::Failed).is_err());
    }

    #[test]
    fn test_snapshot_roundtrip_and_delete() {
        let tmp = TempDir::new().unwrap();
        let log = open_log(&tmp);

        let id = log.create_transaction("pkg", "h", "{}").unwrap();
        log.record_step(id, 0, "file_copy", "{}").unwrap();
        log.save_snapshot(id, 0, r#"{"kind":"file"}"#).unwrap();

        let snap = log.get_snapshot(id, 0).unwrap().unwrap();
        assert_eq!(snap.snapshot_data, r#"{"kind":"file"}"#);
        assert!(log.get_snapshot(id, 1).unwrap().is_none());

        log.delete_snapshots(id).unwrap();
        assert!(log.get_snapshots(id).unwrap().is_empty());
    }

    #[test]
    fn test_list_limit_and_filter() {
        let tmp = TempDir::new().unwrap();
        let log = open_log(&tmp);

        for i in 0..5 {
            let id = log
                .create_transaction(&format!("pkg{i}"), "h", "{}")
                .unwrap();
            if i % 2 == 0 {
                log.update_transaction_status(id, TxnStatus::Committed)
                    .unwrap();
            }
        }

        let recent = log.list_transactions(3, None).unwrap();
        assert_eq!(recent.len(), 3);
        // Newest first.
        assert_eq!(recent[0].package_name, "pkg4");

        let committed = log
            .list_transactions(10, Some(TxnStatus::Committed))
            .unwrap();
        assert_eq!(committed.len(), 3);
        assert!(committed.iter().all(|t| t.status == TxnStatus::Committed));
    }

    #[test]
    fn test_non_terminal_transactions() {
        let tmp = TempDir::new().unwrap();
        let mut log = open_log(&tmp);

        let pending = log.create_transaction("a", "h", "{}").unwrap();
        let active = log.create_transaction("b", "h", "{}").unwrap();
        let done = log.create_transaction("c", "h", "{}").unwrap();

        log.activate(active).unwrap();
        log.update_transaction_status(done, TxnStatus::Committed)
            .unwrap();

        let orphans = log.non_terminal_transactions().unwrap();
        let ids: Vec<i64> = orphans.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![pending, active]);
    }

    #[test]
    fn test_delete_transaction_cascades() {
        let tmp = TempDir::new().unwrap();
        let log = open_log(&tmp);

        let id = log.create_transaction("pkg", "h", "{}").unwrap();
        log.record_step(id, 0, "file_copy", "{}").unwrap();
        log.save_snapshot(id, 0, "{}").unwrap();

        log.delete_transaction(id).unwrap();
        assert!(log.get_transaction(id).unwrap().is_none());
        assert!(log.get_steps(id).unwrap().is_empty());
        assert!(log.get_snapshots(id).unwrap().is_empty());
    }

    #[test]
    fn test_cleanup_retention() {
        let tmp = TempDir::new().unwrap();
        let mut log = open_log(&tmp);

        let old_committed = log.create_transaction("old", "h", "{}").unwrap();
        log.record_step(old_committed, 0, "file_copy", "{}").unwrap();
        log.save_snapshot(old_committed, 0, "{}").unwrap();
        log.update_transaction_status(old_committed, TxnStatus::Committed)
            .unwrap();

        let old_active = log.create_transaction("stuck", "h", "{}").unwrap();
        log.activate(old_active).unwrap();

        let recent = log.create_transaction("new", "h", "{}").unwrap();
        log.update_transaction_status(recent, TxnStatus::Committed)
            .unwrap();

        // Both "old" transactions date back 45 days.
        let backdated = chrono::Utc::now().timestamp() - 45 * 86_400;
        log.set_created_at(old_committed, backdated);
        log.set_created_at(old_active, backdated);

        let expired = log.expired_transactions(30).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, old_committed);

        let deleted = log.cleanup_older_than(30).unwrap();
        assert_eq!(deleted, 1);

        // The committed triple is gone; the in-progress one is untouched.
        assert!(log.get_transaction(old_committed).unwrap().is_none());
        assert!(log.get_steps(old_committed).unwrap().is_empty());
        assert!(log.get_snapshots(old_committed).unwrap().is_empty());
        assert_eq!(
            log.get_transaction(old_active).unwrap().unwrap().status,
            TxnStatus::InProgress
        );
        assert!(log.get_transaction(recent).unwrap().is_some());
    }
}
