//! Typed package metadata.
//!
//! A package document declares identity, an ordered list of install steps,
//! optional pre/post hooks run outside the transactional envelope, and
//! host requirements checked before a transaction begins. Step payloads are
//! tagged variants: the `type` field selects the handler, and the payload
//! carries only that handler's fields.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A complete package metadata document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageMetadata {
    pub package: PackageInfo,
    pub install_steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_install: Vec<HookStep>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_install: Vec<HookStep>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<Requirements>,
}

/// Package identity block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
}

/// One install step: the common envelope plus the typed payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    /// Which compensation path runs if this step must be undone.
    #[serde(default, skip_serializing_if = "RollbackKind::is_auto")]
    pub rollback: RollbackKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Operator-supplied undo script, required by the `manual` strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_script: Option<String>,
    /// Operator-supplied undo playbook, required by the `ansible` strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_playbook: Option<String>,
    #[serde(flatten)]
    pub spec: StepSpec,
}

impl Step {
    /// The step's type tag, as dispatched by the handler registry.
    pub fn kind(&self) -> &'static str {
        self.spec.kind()
    }
}

/// Compensation strategy selector for a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackKind {
    /// The handler's built-in compensate, driven by the snapshot.
    #[default]
    Auto,
    /// Run the step's `rollback_script`.
    Manual,
    /// Run the step's `rollback_playbook`.
    Ansible,
    /// The step declares itself irreversible.
    None,
}

impl RollbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
            Self::Ansible => "ansible",
            Self::None => "none",
        }
    }

    fn is_auto(&self) -> bool {
        *self == Self::Auto
    }
}

/// Handler-specific step payload, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepSpec {
    AptPackage(AptPackageStep),
    FileCopy(FileCopyStep),
    SystemdService(SystemdServiceStep),
    UserManagement(UserManagementStep),
    CustomScript(CustomScriptStep),
    AnsiblePlaybook(AnsiblePlaybookStep),
}

impl StepSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AptPackage(_) => "apt_package",
            Self::FileCopy(_) => "file_copy",
            Self::SystemdService(_) => "systemd_service",
            Self::UserManagement(_) => "user_management",
            Self::CustomScript(_) => "custom_script",
            Self::AnsiblePlaybook(_) => "ansible_playbook",
        }
    }
}

/// Install, remove, or upgrade a set of apt packages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AptPackageStep {
    pub action: AptAction,
    pub packages: Vec<String>,
    /// Refresh the package index before acting.
    #[serde(default = "default_true")]
    pub update_cache: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AptAction {
    Install,
    Remove,
    Update,
}

/// Copy a file into place with optional ownership and mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileCopyStep {
    pub src: String,
    pub dest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Octal permission string, e.g. "644".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

/// Drive a systemd unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemdServiceStep {
    pub service: String,
    pub action: ServiceAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceAction {
    Enable,
    Disable,
    Start,
    Stop,
    Restart,
}

/// Create, modify, or remove a user account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserManagementStep {
    pub username: String,
    pub action: UserAction,
    #[serde(default)]
    pub user_data: UserData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserAction {
    Create,
    Remove,
    Modify,
}

/// Account attributes for create/modify.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(default)]
    pub system: bool,
}

/// Run an operator-supplied shell script.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomScriptStep {
    pub script: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Run an ansible playbook with optional variables and inventory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnsiblePlaybookStep {
    pub playbook: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Hook step for `pre_install` / `post_install`, outside the transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HookStep {
    Script {
        script: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_secs: Option<u64>,
    },
    AnsiblePlaybook {
        playbook: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        vars: BTreeMap<String, serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inventory: Option<String>,
    },
}

/// Host requirements checked before a transaction begins.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Requirements {
    /// Minimum memory in MB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_memory: Option<u64>,
    /// Minimum free disk space in MB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_disk_space: Option<u64>,
    /// Minimum OS version (numeric components compared in order).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub architectures: Vec<String>,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_kind_tags() {
        let step = Step {
            rollback: RollbackKind::Auto,
            description: None,
            rollback_script: None,
            rollback_playbook: None,
            spec: StepSpec::AptPackage(AptPackageStep {
                action: AptAction::Install,
                packages: vec!["nginx".into()],
                update_cache: true,
            }),
        };
        assert_eq!(step.kind(), "apt_package");
    }

    #[test]
    fn test_step_serde_roundtrip() {
        let step = Step {
            rollback: RollbackKind::Manual,
            description: Some("deploy config".into()),
            rollback_script: Some("rm /etc/a.conf".into()),
            rollback_playbook: None,
            spec: StepSpec::FileCopy(FileCopyStep {
                src: "/tmp/a".into(),
                dest: "/etc/a.conf".into(),
                owner: None,
                group: None,
                mode: Some("644".into()),
            }),
        };

        let json = serde_json::to_string(&step).unwrap();
        assert!(json.contains(r#""type":"file_copy""#));
        assert!(json.contains(r#""rollback":"manual""#));

        let back: Step = serde_json::from_str(&json).unwrap();
        assert_eq!(back, step);
    }

    #[test]
    fn test_rollback_defaults_to_auto() {
        let json = r#"{"type":"apt_package","action":"install","packages":["curl"]}"#;
        let step: Step = serde_json::from_str(json).unwrap();
        assert_eq!(step.rollback, RollbackKind::Auto);
        match step.spec {
            StepSpec::AptPackage(apt) => {
                assert_eq!(apt.action, AptAction::Install);
                assert!(apt.update_cache);
            }
            other => panic!("unexpected spec: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_tag_rejected() {
        let json = r#"{"type":"registry_key","key":"x"}"#;
        assert!(serde_json::from_str::<Step>(json).is_err());
    }
}
