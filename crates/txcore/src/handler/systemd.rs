//! systemd_service handler.
//!
//! Applies enable/disable/start/stop/restart to a named unit and snapshots
//! the unit's prior enabled/active flags. Compensation reconciles the unit
//! back to those flags rather than inverting the action, which makes it
//! safe to run against a partially applied step.

use crate::error::HandlerError;
use crate::handler::{wrong_variant, StepHandler};
use crate::runner;
use crate::snapshot::Snapshot;
use metadata::{ServiceAction, Step, StepSpec, SystemdServiceStep};

pub struct SystemdHandler;

impl SystemdHandler {
    fn payload<'a>(&self, step: &'a Step) -> Result<&'a SystemdServiceStep, HandlerError> {
        match &step.spec {
            StepSpec::SystemdService(service) => Ok(service),
            _ => Err(wrong_variant("systemd_service", step)),
        }
    }

    fn is_active(unit: &str) -> bool {
        runner::run_quiet("systemctl", &["is-active", "--quiet", unit])
    }

    fn is_enabled(unit: &str) -> bool {
        runner::run_quiet("systemctl", &["is-enabled", "--quiet", unit])
    }
}

impl StepHandler for SystemdHandler {
    fn kind(&self) -> &'static str {
        "systemd_service"
    }

    fn validate(&self, step: &Step) -> Result<(), HandlerError> {
        let service = self.payload(step)?;
        if service.service.is_empty() {
            return Err(HandlerError::InvalidStep(
                "systemd_service requires a unit name".into(),
            ));
        }
        Ok(())
    }

    fn snapshot(&self, step: &Step) -> Result<Snapshot, HandlerError> {
        let service = self.payload(step)?;
        Ok(Snapshot::Service {
            unit: service.service.clone(),
            was_enabled: Self::is_enabled(&service.service),
            was_active: Self::is_active(&service.service),
        })
    }

    fn apply(&self, step: &Step) -> Result<(), HandlerError> {
        let service = self.payload(step)?;
        let verb = action_verb(service.action);
        log::info!("systemctl {verb} {}", service.service);
        runner::run_checked("systemctl", &[verb, &service.service])
    }

    fn compensate(&self, step: &Step, snapshot: &Snapshot) -> Result<(), HandlerError> {
        let service = self.payload(step)?;
        let Snapshot::Service {
            was_enabled,
            was_active,
            ..
        } = snapshot
        else {
            return Err(HandlerError::SnapshotMismatch(
                "expected a service snapshot".into(),
            ));
        };
        let unit = &service.service;

        if Self::is_enabled(unit) != *was_enabled {
            let verb = if *was_enabled { "enable" } else { "disable" };
            log::info!("systemctl {verb} {unit} (restoring prior state)");
            runner::run_checked("systemctl", &[verb, unit])?;
        }

        if Self::is_active(unit) != *was_active {
            let verb = if *was_active { "start" } else { "stop" };
            log::info!("systemctl {verb} {unit} (restoring prior state)");
            runner::run_checked("systemctl", &[verb, unit])?;
        }

        Ok(())
    }
}

/// systemctl verb for a service action.
fn action_verb(action: ServiceAction) -> &'static str {
    match action {
        ServiceAction::Enable => "enable",
        ServiceAction::Disable => "disable",
        ServiceAction::Start => "start",
        ServiceAction::Stop => "stop",
        ServiceAction::Restart => "restart",
    }
}
