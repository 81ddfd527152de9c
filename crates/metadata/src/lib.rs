//! # metadata
//!
//! Package metadata for aptomic: typed document model, YAML/JSON parser,
//! schema validation, and a starter-template writer.
//!
//! A metadata document declares a package identity, an ordered list of
//! typed install steps (each tagged with the handler that executes it and
//! the rollback strategy that undoes it), optional pre/post-install hooks,
//! and host requirements.

mod error;
mod parser;
mod types;

pub use error::{Error, Result};
pub use parser::{
    parse_file, parse_str, save_file, template, to_yaml, validate, validate_package_info,
    validate_step,
};
pub use types::{
    AnsiblePlaybookStep, AptAction, AptPackageStep, CustomScriptStep, FileCopyStep, HookStep,
    PackageInfo, PackageMetadata, Requirements, RollbackKind, ServiceAction, Step, StepSpec,
    SystemdServiceStep, UserAction, UserData, UserManagementStep,
};
