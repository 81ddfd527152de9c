//! Step handlers and the dispatch registry.
//!
//! Every step type registers a handler implementing the same four
//! operations:
//! - `validate` - pure shape check, never touches the host
//! - `snapshot` - capture enough pre-image to undo a successful apply
//! - `apply` - drive the host to the target state
//! - `compensate` - restore the pre-image; must tolerate the change never
//!   having taken effect (a crashed step may not have run at all)
//!
//! Handlers are injected into the manager at construction time, which is
//! how the engine is tested hermetically against fakes.

use crate::error::HandlerError;
use crate::snapshot::{BackupStore, Snapshot};
use metadata::Step;
use std::collections::HashMap;

pub mod ansible;
pub mod apt;
pub mod file;
pub mod script;
pub mod systemd;
pub mod user;

pub use ansible::AnsibleHandler;
pub use apt::AptHandler;
pub use file::FileCopyHandler;
pub use script::ScriptHandler;
pub use systemd::SystemdHandler;
pub use user::UserHandler;

/// The four-operation contract every step type implements.
pub trait StepHandler: Send + Sync {
    /// Step type tag this handler serves (e.g. "apt_package").
    fn kind(&self) -> &'static str;

    /// Pure shape check; must not produce side effects.
    fn validate(&self, step: &Step) -> Result<(), HandlerError>;

    /// Capture the pre-image needed to undo a subsequent successful apply.
    /// Pre-states of "does not exist" are recorded explicitly.
    fn snapshot(&self, step: &Step) -> Result<Snapshot, HandlerError>;

    /// Attempt to reach the target state.
    fn apply(&self, step: &Step) -> Result<(), HandlerError>;

    /// Restore the captured pre-state. If the change never took effect,
    /// this is a no-op success.
    fn compensate(&self, step: &Step, snapshot: &Snapshot) -> Result<(), HandlerError>;
}

/// Dispatch table from step type tag to handler.
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Box<dyn StepHandler>>,
}

impl HandlerRegistry {
    /// An empty registry. Useful for tests that inject fakes.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry wired with the six real host handlers.
    pub fn host_defaults(backups: BackupStore) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(AptHandler));
        registry.register(Box::new(FileCopyHandler::new(backups)));
        registry.register(Box::new(SystemdHandler));
        registry.register(Box::new(UserHandler));
        registry.register(Box::new(ScriptHandler));
        registry.register(Box::new(AnsibleHandler));
        registry
    }

    /// Register a handler, replacing any previous one for the same tag.
    pub fn register(&mut self, handler: Box<dyn StepHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    /// Look up the handler for a step type tag.
    pub fn get(&self, kind: &str) -> Option<&dyn StepHandler> {
        self.handlers.get(kind).map(|h| h.as_ref())
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shorthand for the mismatch error every handler raises when dispatched a
/// foreign step variant.
pub(crate) fn wrong_variant(expected: &str, step: &Step) -> HandlerError {
    HandlerError::InvalidStep(format!(
        "{expected} handler received a {} step",
        step.kind()
    ))
}
