//! ansible_playbook handler.
//!
//! Runs a declared playbook with supplied variables; success is a
//! non-failed `ansible-playbook` run. State capture is the playbook
//! author's responsibility, so the snapshot only carries the paired
//! `rollback_playbook` reference and compensation runs it with the same
//! variables and inventory.

use crate::error::HandlerError;
use crate::handler::{wrong_variant, StepHandler};
use crate::runner;
use crate::snapshot::Snapshot;
use metadata::{AnsiblePlaybookStep, Step, StepSpec};
use std::collections::BTreeMap;
use std::process::Command;

pub struct AnsibleHandler;

impl AnsibleHandler {
    fn payload<'a>(&self, step: &'a Step) -> Result<&'a AnsiblePlaybookStep, HandlerError> {
        match &step.spec {
            StepSpec::AnsiblePlaybook(playbook) => Ok(playbook),
            _ => Err(wrong_variant("ansible_playbook", step)),
        }
    }
}

impl StepHandler for AnsibleHandler {
    fn kind(&self) -> &'static str {
        "ansible_playbook"
    }

    fn validate(&self, step: &Step) -> Result<(), HandlerError> {
        let playbook = self.payload(step)?;
        if playbook.playbook.is_empty() {
            return Err(HandlerError::InvalidStep(
                "ansible_playbook requires a playbook path".into(),
            ));
        }
        Ok(())
    }

    fn snapshot(&self, step: &Step) -> Result<Snapshot, HandlerError> {
        self.payload(step)?;
        Ok(Snapshot::Playbook {
            rollback_playbook: step.rollback_playbook.clone(),
        })
    }

    fn apply(&self, step: &Step) -> Result<(), HandlerError> {
        let playbook = self.payload(step)?;
        run_playbook(
            &playbook.playbook,
            &playbook.vars,
            playbook.inventory.as_deref(),
            playbook.timeout_secs,
        )
    }

    fn compensate(&self, step: &Step, snapshot: &Snapshot) -> Result<(), HandlerError> {
        let playbook = self.payload(step)?;
        let Snapshot::Playbook { rollback_playbook } = snapshot else {
            return Err(HandlerError::SnapshotMismatch(
                "expected a playbook snapshot".into(),
            ));
        };

        match rollback_playbook {
            Some(undo) => run_playbook(
                undo,
                &playbook.vars,
                playbook.inventory.as_deref(),
                playbook.timeout_secs,
            ),
            None => Err(HandlerError::Unsupported(
                "ansible_playbook step has no rollback_playbook".into(),
            )),
        }
    }
}

/// Run `ansible-playbook` with vars passed as a JSON --extra-vars document.
pub(crate) fn run_playbook(
    playbook: &str,
    vars: &BTreeMap<String, serde_json::Value>,
    inventory: Option<&str>,
    timeout_secs: Option<u64>,
) -> Result<(), HandlerError> {
    let args = build_playbook_args(playbook, vars, inventory)?;
    log::info!("ansible-playbook {}", args.join(" "));

    let mut command = Command::new("ansible-playbook");
    command.args(&args);
    runner::run_with_timeout(command, &format!("ansible-playbook {playbook}"), timeout_secs)
}

fn build_playbook_args(
    playbook: &str,
    vars: &BTreeMap<String, serde_json::Value>,
    inventory: Option<&str>,
) -> Result<Vec<String>, HandlerError> {
    let mut args = vec![playbook.to_string()];
    if let Some(inventory) = inventory {
        args.push("-i".into());
        args.push(inventory.to_string());
    }
    if !vars.is_empty() {
        args.push("--extra-vars".into());
        args.push(serde_json::to_string(vars)?);
    }
    Ok(args)
}
