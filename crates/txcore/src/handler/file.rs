//! file_copy handler.
//!
//! Copies a source file over a destination, creating parent directories and
//! applying declared owner/group/mode. The snapshot stashes any prior
//! destination content in the backup store together with its metadata, or
//! records that the destination was absent; compensation restores the
//! stashed bytes or deletes the copied file.

use crate::error::HandlerError;
use crate::handler::{wrong_variant, StepHandler};
use crate::runner;
use crate::snapshot::{BackupStore, FilePreImage, Snapshot};
use metadata::{FileCopyStep, Step, StepSpec};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

pub struct FileCopyHandler {
    backups: BackupStore,
}

impl FileCopyHandler {
    pub fn new(backups: BackupStore) -> Self {
        Self { backups }
    }

    fn payload<'a>(&self, step: &'a Step) -> Result<&'a FileCopyStep, HandlerError> {
        match &step.spec {
            StepSpec::FileCopy(file) => Ok(file),
            _ => Err(wrong_variant("file_copy", step)),
        }
    }

    fn apply_attributes(&self, file: &FileCopyStep, dest: &Path) -> Result<(), HandlerError> {
        if let Some(mode) = &file.mode {
            let mode = parse_mode(mode)?;
            std::fs::set_permissions(dest, std::fs::Permissions::from_mode(mode))?;
        }

        if file.owner.is_some() || file.group.is_some() {
            let uid = file.owner.as_deref().map(resolve_uid).transpose()?;
            let gid = file.group.as_deref().map(resolve_gid).transpose()?;
            std::os::unix::fs::chown(dest, uid, gid)?;
        }

        Ok(())
    }
}

impl StepHandler for FileCopyHandler {
    fn kind(&self) -> &'static str {
        "file_copy"
    }

    fn validate(&self, step: &Step) -> Result<(), HandlerError> {
        let file = self.payload(step)?;
        if file.src.is_empty() || file.dest.is_empty() {
            return Err(HandlerError::InvalidStep(
                "file_copy requires src and dest".into(),
            ));
        }
        if let Some(mode) = &file.mode {
            parse_mode(mode)?;
        }
        Ok(())
    }

    fn snapshot(&self, step: &Step) -> Result<Snapshot, HandlerError> {
        let file = self.payload(step)?;
        let dest = Path::new(&file.dest);

        let prior = if dest.exists() {
            let meta = std::fs::metadata(dest)?;
            let backup = self.backups.stash(dest)?;
            Some(FilePreImage {
                backup: backup.to_string_lossy().into_owned(),
                mode: meta.mode() & 0o7777,
                uid: meta.uid(),
                gid: meta.gid(),
            })
        } else {
            None
        };

        Ok(Snapshot::File {
            path: file.dest.clone(),
            prior,
        })
    }

    fn apply(&self, step: &Step) -> Result<(), HandlerError> {
        let file = self.payload(step)?;
        let src = Path::new(&file.src);
        let dest = Path::new(&file.dest);

        if !src.exists() {
            return Err(HandlerError::Other(format!(
                "source file does not exist: {}",
                src.display()
            )));
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        log::info!("copying {} -> {}", src.display(), dest.display());
        std::fs::copy(src, dest)?;
        self.apply_attributes(file, dest)
    }

    fn compensate(&self, step: &Step, snapshot: &Snapshot) -> Result<(), HandlerError> {
        let file = self.payload(step)?;
        let Snapshot::File { prior, .. } = snapshot else {
            return Err(HandlerError::SnapshotMismatch(
                "expected a file snapshot".into(),
            ));
        };
        let dest = Path::new(&file.dest);

        match prior {
            Some(pre) => {
                let backup = Path::new(&pre.backup);
                if !backup.exists() {
                    return Err(HandlerError::SnapshotMismatch(format!(
                        "backup missing: {}",
                        backup.display()
                    )));
                }
                log::info!("restoring prior content of {}", dest.display());
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(backup, dest)?;
                std::fs::set_permissions(dest, std::fs::Permissions::from_mode(pre.mode))?;
                std::os::unix::fs::chown(dest, Some(pre.uid), Some(pre.gid))?;
                Ok(())
            }
            None => {
                // Destination was absent before; remove it if the copy
                // (or part of it) landed.
                if dest.exists() {
                    log::info!("removing {} (absent before transaction)", dest.display());
                    std::fs::remove_file(dest)?;
                }
                Ok(())
            }
        }
    }
}

/// Parse an octal permission string such as "644" or "0755".
fn parse_mode(mode: &str) -> Result<u32, HandlerError> {
    u32::from_str_radix(mode, 8)
        .map_err(|_| HandlerError::InvalidStep(format!("mode '{mode}' is not octal")))
}

/// Resolve a user name to a uid via getent.
fn resolve_uid(name: &str) -> Result<u32, HandlerError> {
    let line = runner::run_capture("getent", &["passwd", name])?;
    parse_getent_id(&line)
        .ok_or_else(|| HandlerError::Other(format!("could not resolve user '{name}'")))
}

/// Resolve a group name to a gid via getent.
fn resolve_gid(name: &str) -> Result<u32, HandlerError> {
    let line = runner::run_capture("getent", &["group", name])?;
    parse_getent_id(&line)
        .ok_or_else(|| HandlerError::Other(format!("could not resolve group '{name}'")))
}

/// Numeric id from a getent passwd/group line (third colon field).
fn parse_getent_id(line: &str) -> Option<u32> {
    line.split(':').nth(2)?.parse().ok()
}
