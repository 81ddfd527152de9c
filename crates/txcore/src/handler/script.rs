//! custom_script handler.
//!
//! Runs an operator-supplied command line; success is exit 0. There is no
//! automatic pre-image for arbitrary scripts, so the snapshot only carries
//! the paired `rollback_script` reference, and compensation runs it - or
//! declares the step unsupported when none was supplied.

use crate::error::HandlerError;
use crate::handler::{wrong_variant, StepHandler};
use crate::runner;
use crate::snapshot::Snapshot;
use metadata::{CustomScriptStep, Step, StepSpec};

pub struct ScriptHandler;

impl ScriptHandler {
    fn payload<'a>(&self, step: &'a Step) -> Result<&'a CustomScriptStep, HandlerError> {
        match &step.spec {
            StepSpec::CustomScript(script) => Ok(script),
            _ => Err(wrong_variant("custom_script", step)),
        }
    }
}

impl StepHandler for ScriptHandler {
    fn kind(&self) -> &'static str {
        "custom_script"
    }

    fn validate(&self, step: &Step) -> Result<(), HandlerError> {
        let script = self.payload(step)?;
        if script.script.trim().is_empty() {
            return Err(HandlerError::InvalidStep(
                "custom_script requires a script".into(),
            ));
        }
        Ok(())
    }

    fn snapshot(&self, step: &Step) -> Result<Snapshot, HandlerError> {
        self.payload(step)?;
        Ok(Snapshot::Script {
            rollback_script: step.rollback_script.clone(),
        })
    }

    fn apply(&self, step: &Step) -> Result<(), HandlerError> {
        let script = self.payload(step)?;
        log::info!("running script: {}", script.script);
        runner::run_shell(&script.script, script.timeout_secs)
    }

    fn compensate(&self, step: &Step, snapshot: &Snapshot) -> Result<(), HandlerError> {
        let script = self.payload(step)?;
        let Snapshot::Script { rollback_script } = snapshot else {
            return Err(HandlerError::SnapshotMismatch(
                "expected a script snapshot".into(),
            ));
        };

        match rollback_script {
            Some(undo) => {
                log::info!("running rollback script: {undo}");
                runner::run_shell(undo, script.timeout_secs)
            }
            None => Err(HandlerError::Unsupported(
                "custom_script step has no rollback_script".into(),
            )),
        }
    }
}
