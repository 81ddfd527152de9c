//! Row types and status enums stored in the log.

use crate::error::{Error, Result};

/// Lifecycle status of a transaction.
///
/// Transitions only along the edges of the installer state machine:
/// `pending → in_progress → committed`, or
/// `in_progress → rolling_back → rolled_back | failed`, with
/// `failed → rolling_back` as the operator retry path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    Pending,
    InProgress,
    Committed,
    RollingBack,
    RolledBack,
    Failed,
}

impl TxnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Committed => "committed",
            Self::RollingBack => "rolling_back",
            Self::RolledBack => "rolled_back",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "committed" => Ok(Self::Committed),
            "rolling_back" => Ok(Self::RollingBack),
            "rolled_back" => Ok(Self::RolledBack),
            "failed" => Ok(Self::Failed),
            other => Err(Error::Corrupt(format!("unknown transaction status: {other}"))),
        }
    }

    /// Terminal states are immutable except for the retention sweep.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Failed)
    }
}

impl std::fmt::Display for TxnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single step within a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Compensating,
    Compensated,
    CompensationFailed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Compensating => "compensating",
            Self::Compensated => "compensated",
            Self::CompensationFailed => "compensation_failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "compensating" => Ok(Self::Compensating),
            "compensated" => Ok(Self::Compensated),
            "compensation_failed" => Ok(Self::CompensationFailed),
            other => Err(Error::Corrupt(format!("unknown step status: {other}"))),
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the `transactions` relation.
#[derive(Debug, Clone)]
pub struct TransactionRow {
    pub id: i64,
    pub package_name: String,
    pub metadata_hash: String,
    /// Full metadata document, stored as an opaque JSON blob.
    pub metadata: String,
    pub status: TxnStatus,
    /// Unix epoch seconds.
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

/// One row of the `steps` relation, keyed by (transaction, order).
#[derive(Debug, Clone)]
pub struct StepRow {
    pub transaction_id: i64,
    /// 0-based dense order index within the transaction.
    pub step_order: i64,
    pub step_type: String,
    /// Handler-specific input, stored as an opaque JSON blob.
    pub step_data: String,
    pub status: StepStatus,
    pub executed_at: Option<i64>,
}

/// One row of the `snapshots` relation, paired 1:1 with a step.
#[derive(Debug, Clone)]
pub struct SnapshotRow {
    pub transaction_id: i64,
    pub step_order: i64,
    /// Handler-specific pre-image, stored as an opaque JSON blob.
    pub snapshot_data: String,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_txn_status_roundtrip() {
        for status in [
            TxnStatus::Pending,
            TxnStatus::InProgress,
            TxnStatus::Committed,
            TxnStatus::RollingBack,
            TxnStatus::RolledBack,
            TxnStatus::Failed,
        ] {
            assert_eq!(TxnStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(TxnStatus::parse("bogus").is_err());
    }

    #[test]
    fn test_txn_status_terminal() {
        assert!(TxnStatus::Committed.is_terminal());
        assert!(TxnStatus::RolledBack.is_terminal());
        assert!(TxnStatus::Failed.is_terminal());
        assert!(!TxnStatus::Pending.is_terminal());
        assert!(!TxnStatus::InProgress.is_terminal());
        assert!(!TxnStatus::RollingBack.is_terminal());
    }

    #[test]
    fn test_step_status_roundtrip() {
        for status in [
            StepStatus::Pending,
            StepStatus::Running,
            StepStatus::Succeeded,
            StepStatus::Failed,
            StepStatus::Compensating,
            StepStatus::Compensated,
            StepStatus::CompensationFailed,
        ] {
            assert_eq!(StepStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(StepStatus::parse("completed").is_err());
    }
}
