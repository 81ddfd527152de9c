//! apt package handler.
//!
//! Applies install/remove/update actions through `apt-get`, snapshots the
//! installed state of every named package via `dpkg-query`, and compensates
//! by driving each package back to its recorded state - reinstalling a
//! pinned `pkg=version` where the prior version is known.

use crate::error::HandlerError;
use crate::handler::{wrong_variant, StepHandler};
use crate::runner;
use crate::snapshot::{PackageState, Snapshot};
use metadata::{AptAction, AptPackageStep, Step, StepSpec};

pub struct AptHandler;

impl AptHandler {
    fn payload<'a>(&self, step: &'a Step) -> Result<&'a AptPackageStep, HandlerError> {
        match &step.spec {
            StepSpec::AptPackage(apt) => Ok(apt),
            _ => Err(wrong_variant("apt_package", step)),
        }
    }

    /// Installed version of one package, or `None` when not installed.
    fn installed_version(package: &str) -> Option<String> {
        let output = runner::run_capture(
            "dpkg-query",
            &["-W", "-f=${db:Status-Status} ${Version}", package],
        )
        .ok()?;
        parse_dpkg_query(&output)
    }

    fn refresh_cache() -> Result<(), HandlerError> {
        log::info!("refreshing apt package index");
        runner::run_checked("apt-get", &["update"])
    }
}

impl StepHandler for AptHandler {
    fn kind(&self) -> &'static str {
        "apt_package"
    }

    fn validate(&self, step: &Step) -> Result<(), HandlerError> {
        let apt = self.payload(step)?;
        if apt.packages.is_empty() {
            return Err(HandlerError::InvalidStep(
                "apt_package requires at least one package".into(),
            ));
        }
        Ok(())
    }

    fn snapshot(&self, step: &Step) -> Result<Snapshot, HandlerError> {
        let apt = self.payload(step)?;
        let installed = apt
            .packages
            .iter()
            .map(|name| PackageState {
                name: name.clone(),
                version: Self::installed_version(name),
            })
            .collect();
        Ok(Snapshot::Packages { installed })
    }

    fn apply(&self, step: &Step) -> Result<(), HandlerError> {
        let apt = self.payload(step)?;
        if apt.update_cache {
            Self::refresh_cache()?;
        }

        let args = build_apply_args(apt.action, &apt.packages);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        log::info!("apt-get {}", args.join(" "));
        runner::run_checked("apt-get", &args)
    }

    fn compensate(&self, step: &Step, snapshot: &Snapshot) -> Result<(), HandlerError> {
        self.payload(step)?;
        let Snapshot::Packages { installed } = snapshot else {
            return Err(HandlerError::SnapshotMismatch(
                "expected a packages snapshot".into(),
            ));
        };

        let mut failures = Vec::new();
        for prior in installed {
            let current = Self::installed_version(&prior.name);
            if let Err(e) = restore_package(&prior.name, prior.version.as_deref(), current) {
                log::error!("failed to restore package {}: {e}", prior.name);
                failures.push(prior.name.clone());
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(HandlerError::Other(format!(
                "could not restore package state for: {}",
                failures.join(", ")
            )))
        }
    }
}

/// Drive one package from its current state back to its snapshotted state.
fn restore_package(
    name: &str,
    prior_version: Option<&str>,
    current_version: Option<String>,
) -> Result<(), HandlerError> {
    match (prior_version, current_version) {
        // Was absent, still absent: the change never took effect.
        (None, None) => Ok(()),
        // Was absent, now installed: remove it.
        (None, Some(_)) => {
            log::info!("removing {name} (absent before transaction)");
            runner::run_checked("apt-get", &["remove", "-y", name])
        }
        // Was installed at some version: reinstall pinned to it.
        (Some(version), current) => {
            if current.as_deref() == Some(version) {
                return Ok(());
            }
            log::info!("restoring {name}={version}");
            let pinned = format!("{name}={version}");
            runner::run_checked(
                "apt-get",
                &["install", "-y", "--allow-downgrades", &pinned],
            )
        }
    }
}

/// apt-get argument list for an action over a package set.
fn build_apply_args(action: AptAction, packages: &[String]) -> Vec<String> {
    let mut args: Vec<String> = match action {
        AptAction::Install => vec!["install".into(), "-y".into()],
        AptAction::Remove => vec!["remove".into(), "-y".into()],
        AptAction::Update => vec!["install".into(), "-y".into(), "--only-upgrade".into()],
    };
    args.extend(packages.iter().cloned());
    args
}

/// Parse `dpkg-query -W -f='${db:Status-Status} ${Version}'` output into an
/// installed version.
fn parse_dpkg_query(output: &str) -> Option<String> {
    let (status, version) = output.split_once(' ')?;
    if status == "installed" && !version.is_empty() {
        Some(version.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metadata::RollbackKind;

    fn apt_step(action: AptAction, packages: &[&str]) -> Step {
        Step {
            rollback: RollbackKind::Auto,
            description: None,
            rollback_script: None,
            rollback_playbook: None,
            spec: StepSpec::AptPackage(AptPackageStep {
                action,
                packages: packages.iter().map(|p| p.to_string()).collect(),
                update_cache: false,
            }),
        }
    }

    #[test]
    fn test_build_apply_args() {
        assert_eq!(
            build_apply_args(AptAction::Install, &["nginx".into(), "curl".into()]),
            vec!["install", "-y", "nginx", "curl"]
        );
        assert_eq!(
            build_apply_args(AptAction::Remove, &["nginx".into()]),
            vec!["remove", "-y", "nginx"]
        );
        assert_eq!(
            build_apply_args(AptAction::Update, &["nginx".into()]),
            vec!["install", "-y", "--only-upgrade", "nginx"]
        );
    }

    #[test]
    fn test_parse_dpkg_query() {
        assert_eq!(
            parse_dpkg_query("installed 1.22.1-9"),
            Some("1.22.1-9".to_string())
        );
        assert_eq!(parse_dpkg_query("not-installed "), None);
        assert_eq!(parse_dpkg_query("config-files 1.0"), None);
        assert_eq!(parse_dpkg_query(""), None);
    }

    #[test]
    fn test_validate_rejects_empty_packages() {
        let step = apt_step(AptAction::Install, &[]);
        assert!(AptHandler.validate(&step).is_err());
    }

    #[test]
    fn test_validate_rejects_foreign_step() {
        let step = Step {
            rollback: RollbackKind::Auto,
            description: None,
            rollback_script: None,
            rollback_playbook: None,
            spec: StepSpec::FileCopy(metadata::FileCopyStep {
                src: "/a".into(),
                dest: "/b".into(),
                owner: None,
                group: None,
                mode: None,
            }),
        };
        assert!(matches!(
            AptHandler.validate(&step),
            Err(HandlerError::InvalidStep(_))
        ));
    }

    #[test]
    fn test_compensate_rejects_foreign_snapshot() {
        let step = apt_step(AptAction::Install, &["nginx"]);
        let snapshot = Snapshot::Script {
            rollback_script: None,
        };
        assert!(matches!(
            AptHandler.compensate(&step, &snapshot),
            Err(HandlerError::SnapshotMismatch(_))
        ));
    }
}
