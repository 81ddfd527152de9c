//! Pre/post-install hook execution.
//!
//! Hooks run outside the transactional envelope: a failing `pre_install`
//! hook aborts before any transaction begins, and a failing `post_install`
//! hook is the caller's to log - the committed transaction is never rolled
//! back for it.

use crate::error::HandlerError;
use crate::handler::ansible;
use crate::runner;
use metadata::HookStep;

/// Run a single hook step.
pub fn run_hook(hook: &HookStep) -> Result<(), HandlerError> {
    match hook {
        HookStep::Script {
            script,
            timeout_secs,
        } => {
            log::info!("running hook script: {script}");
            runner::run_shell(script, *timeout_secs)
        }
        HookStep::AnsiblePlaybook {
            playbook,
            vars,
            inventory,
        } => {
            log::info!("running hook playbook: {playbook}");
            ansible::run_playbook(playbook, vars, inventory.as_deref(), None)
        }
    }
}
