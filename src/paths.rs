//! Path resolution for the aptomic state directory.
//!
//! The state directory holds the transaction log and the file-backup
//! store. Resolution priority:
//! 1. `APTOMIC_STATE_DIR` environment variable
//! 2. `/var/lib/aptomic` when running as root
//! 3. `XDG_STATE_HOME/aptomic` (if set)
//! 4. `~/.local/state/aptomic`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "APTOMIC_STATE_DIR";

/// Whether the process runs with root privileges.
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// Resolve the state directory.
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("using state dir from {ENV_STATE_DIR}: {}", path.display());
        return Ok(path);
    }

    if is_root() {
        return Ok(PathBuf::from("/var/lib/aptomic"));
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join("aptomic");
        log::debug!("using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".local").join("state").join("aptomic"))
}

/// Path of the transaction log database.
pub fn db_path(overridden: Option<&Path>) -> Result<PathBuf> {
    match overridden {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(state_dir()?.join("transactions.db")),
    }
}

/// Backup store directory, kept next to the log it belongs to.
pub fn backups_dir(db: &Path) -> PathBuf {
    db.parent().unwrap_or(Path::new(".")).join("backups")
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

// ============================================================================
// Tests
// ============================================================================
