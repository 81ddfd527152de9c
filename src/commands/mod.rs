pub mod cleanup;
pub mod install;
pub mod list;
pub mod rollback;
pub mod status;
pub mod template;
pub mod validate;

use crate::paths;
use anyhow::{Context as _, Result};
use colored::Colorize;
use std::path::PathBuf;
use txcore::{BackupStore, HandlerRegistry, TransactionManager};
use txlog::{TransactionLog, TxnStatus};

/// Global context shared by all commands.
pub struct Context {
    pub db: Option<PathBuf>,
    pub quiet: bool,
}

/// Open the transaction log and wire a manager with the host handlers.
pub(crate) fn open_manager(ctx: &Context, allow_irreversible: bool) -> Result<TransactionManager> {
    let db = paths::db_path(ctx.db.as_deref())?;
    let log = TransactionLog::open(&db)
        .with_context(|| format!("could not open transaction log at {}", db.display()))?;
    let backups = BackupStore::open(paths::backups_dir(&db))
        .context("could not open the file backup store")?;

    Ok(TransactionManager::new(log, HandlerRegistry::host_defaults(backups))
        .allow_irreversible(allow_irreversible))
}

/// Print a warning when a write-path verb runs without root.
pub(crate) fn warn_if_not_root() {
    if !paths::is_root() {
        eprintln!(
            "  {} not running as root; steps touching privileged resources will fail",
            "⚠".yellow()
        );
    }
}

/// Render an epoch second timestamp for humans.
pub(crate) fn format_epoch(epoch: i64) -> String {
    chrono::DateTime::from_timestamp(epoch, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| epoch.to_string())
}

/// Colored rendering of a transaction status.
pub(crate) fn paint_status(status: TxnStatus) -> colored::ColoredString {
    let text = status.as_str();
    match status {
        TxnStatus::Committed => text.green(),
        TxnStatus::RolledBack => text.yellow(),
        TxnStatus::Failed => text.red(),
        TxnStatus::InProgress | TxnStatus::RollingBack => text.cyan(),
        TxnStatus::Pending => text.normal(),
    }
}
