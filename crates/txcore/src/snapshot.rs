//! Snapshot blobs and the file-backup store.
//!
//! A [`Snapshot`] is the pre-image captured immediately before a step's
//! apply, sufficient to drive the paired compensate. Snapshots serialize to
//! JSON and are stored opaquely in the durable log; only the owning handler
//! interprets them. Prior file *content* is not inlined: it goes into a
//! content-addressed [`BackupStore`] on disk and the snapshot records the
//! backup path.

use crate::error::HandlerError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// Pre-image evidence for one step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Snapshot {
    /// Installed-state of each package named by an `apt_package` step.
    Packages { installed: Vec<PackageState> },
    /// Prior file at the destination of a `file_copy` step.
    /// `prior: None` means the destination was absent.
    File {
        path: String,
        prior: Option<FilePreImage>,
    },
    /// Prior enabled/active state of a systemd unit.
    Service {
        unit: String,
        was_enabled: bool,
        was_active: bool,
    },
    /// Prior account record. `prior: None` means the user was absent.
    User {
        username: String,
        prior: Option<UserRecord>,
    },
    /// `custom_script` captures no host state; only the undo script ref.
    Script { rollback_script: Option<String> },
    /// `ansible_playbook` captures no host state; only the undo playbook.
    Playbook { rollback_playbook: Option<String> },
}

impl Snapshot {
    /// Encode for storage in the log.
    pub fn to_blob(&self) -> Result<String, HandlerError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a blob read back from the log.
    pub fn from_blob(blob: &str) -> Result<Self, HandlerError> {
        Ok(serde_json::from_str(blob)?)
    }
}

/// Whether one package was installed before the step, and at what version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageState {
    pub name: String,
    /// `None` means the package was not installed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Metadata and stashed content of a file that existed before the step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilePreImage {
    /// Path of the stashed copy inside the backup store.
    pub backup: String,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

/// Account attributes as they were before the step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    pub uid: u32,
    pub gid: u32,
    pub home: String,
    pub shell: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
}

/// Content-addressed store for prior file bytes.
///
/// Stashed files are named by the BLAKE3 hash of their content, so
/// re-snapshotting an unchanged file is free and restores are verifiable.
#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
}

impl BackupStore {
    /// Open the store, creating its directory if needed.
    pub fn open(root: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Copy a file into the store and return the stashed path.
    pub fn stash(&self, path: &Path) -> std::io::Result<PathBuf> {
        let hash = hash_file(path)?;
        let backup = self.root.join(hash);
        if !backup.exists() {
            std::fs::copy(path, &backup)?;
        }
        Ok(backup)
    }
}

/// Hash a file's content with BLAKE3.
fn hash_file(path: &Path) -> std::io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(64 * 1024, file);
    let mut hasher = blake3::Hasher::new();

    let mut buffer = [0u8; 65536];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}
