//! Host requirements gate.
//!
//! Checked before a transaction begins: declared minimums for memory and
//! free disk, OS version, and CPU architecture. Violations are collected
//! and reported together. Probes that cannot run on this host (missing
//! /proc entries and the like) are logged and skipped rather than failing
//! the install outright.

use crate::error::{Error, Result};
use metadata::Requirements;
use std::path::Path;

/// Check declared requirements against this host. The disk probe runs
/// against `disk_path` (the store's directory).
pub fn check(requirements: &Requirements, disk_path: &Path) -> Result<()> {
    let mut violations = Vec::new();

    if let Some(min_memory) = requirements.min_memory {
        match total_memory_mb() {
            Some(total) if total < min_memory => {
                violations.push(format!("requires {min_memory} MB memory, host has {total} MB"));
            }
            Some(_) => {}
            None => log::warn!("could not determine host memory; skipping min_memory check"),
        }
    }

    if let Some(min_disk) = requirements.min_disk_space {
        match free_disk_mb(disk_path) {
            Some(free) if free < min_disk => {
                violations.push(format!(
                    "requires {min_disk} MB free disk, {} has {free} MB",
                    disk_path.display()
                ));
            }
            Some(_) => {}
            None => log::warn!("could not determine free disk space; skipping check"),
        }
    }

    if let Some(required) = &requirements.os_version {
        match os_version() {
            Some(current) if !version_at_least(&current, required) => {
                violations.push(format!("requires OS version >= {required}, host is {current}"));
            }
            Some(_) => {}
            None => log::warn!("could not determine OS version; skipping check"),
        }
    }

    if !requirements.architectures.is_empty() {
        let host = normalize_arch(std::env::consts::ARCH);
        let supported = requirements
            .architectures
            .iter()
            .any(|a| normalize_arch(a) == host);
        if !supported {
            violations.push(format!(
                "architecture {host} not in supported set [{}]",
                requirements.architectures.join(", ")
            ));
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "host requirements not met: {}",
            violations.join("; ")
        )))
    }
}

/// Total memory from /proc/meminfo, in MB.
fn total_memory_mb() -> Option<u64> {
    let text = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_meminfo(&text)
}

/// Parse the MemTotal line of /proc/meminfo (reported in kB).
fn parse_meminfo(text: &str) -> Option<u64> {
    let line = text.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb / 1024)
}

/// Free disk space at a path, in MB.
fn free_disk_mb(path: &Path) -> Option<u64> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;

    let probe = if path.exists() {
        path
    } else {
        path.ancestors().find(|p| p.exists())?
    };

    let c_path = CString::new(probe.as_os_str().as_bytes()).ok()?;
    let mut stat: MaybeUninit<libc::statvfs> = MaybeUninit::uninit();
    // SAFETY: c_path is a valid NUL-terminated path and stat points to
    // writable memory of the right size.
    let result = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if result != 0 {
        return None;
    }
    let stat = unsafe { stat.assume_init() };
    Some((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64) / (1024 * 1024))
}

/// VERSION_ID from /etc/os-release.
fn os_version() -> Option<String> {
    let text = std::fs::read_to_string("/etc/os-release").ok()?;
    parse_os_release(&text)
}

fn parse_os_release(text: &str) -> Option<String> {
    let line = text.lines().find(|l| l.starts_with("VERSION_ID="))?;
    let value = line.trim_start_matches("VERSION_ID=").trim();
    Some(value.trim_matches('"').to_string())
}

/// Compare dotted numeric versions component-wise; missing components
/// count as zero, non-numeric components as equal.
fn version_at_least(current: &str, required: &str) -> bool {
    let mut current = current.split('.');
    let mut required = required.split('.');

    loop {
        match (current.next(), required.next()) {
            (None, None) => return true,
            (c, r) => {
                let c: u64 = c.unwrap_or("0").parse().unwrap_or(0);
                let r: u64 = r.unwrap_or("0").parse().unwrap_or(0);
                if c != r {
                    return c > r;
                }
            }
        }
    }
}

/// Common aliases for the same machine architecture.
fn normalize_arch(arch: &str) -> &str {
    match arch {
        "amd64" => "x86_64",
        "arm64" => "aarch64",
        other => other,
    }
}
