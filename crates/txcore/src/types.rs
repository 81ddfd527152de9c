//! Read-side views over logged transactions.

use txlog::{StepStatus, TxnStatus};

/// What `status` and `list` return: one transaction with its step rows.
#[derive(Debug, Clone)]
pub struct TransactionView {
    pub id: i64,
    pub package_name: String,
    pub metadata_hash: String,
    pub status: TxnStatus,
    /// Unix epoch seconds.
    pub created_at: i64,
    pub completed_at: Option<i64>,
    pub steps: Vec<StepView>,
}

/// One step of a transaction, as shown to the operator.
#[derive(Debug, Clone)]
pub struct StepView {
    pub order: i64,
    pub kind: String,
    pub status: StepStatus,
    pub description: Option<String>,
}

/// What startup recovery did with one orphaned transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// A `pending` transaction with no recorded steps was deleted.
    DeletedEmpty { id: i64 },
    /// Rollback ran cleanly; the transaction is `rolled_back`.
    RolledBack { id: i64 },
    /// Rollback left steps uncompensated; the transaction is `failed`.
    Failed { id: i64, uncompensated: usize },
}
