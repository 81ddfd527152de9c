//! Parser and validator for package metadata files.
//!
//! Documents are accepted as YAML or JSON: YAML is tried first, JSON
//! second, and both parse errors are reported when neither works. Parsed
//! documents are normalized through `serde_json::Value` before typed
//! decoding, then validated against the package schema.

use crate::error::{Error, Result};
use crate::types::{
    AptAction, AptPackageStep, FileCopyStep, HookStep, PackageInfo, PackageMetadata, RollbackKind,
    ServiceAction, Step, StepSpec, SystemdServiceStep,
};
use std::path::Path;

/// Parse and validate a metadata file.
pub fn parse_file(path: &Path) -> Result<PackageMetadata> {
    if !path.exists() {
        return Err(Error::NotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    parse_str(&content)
}

/// Parse and validate metadata from a string.
pub fn parse_str(content: &str) -> Result<PackageMetadata> {
    let value: serde_json::Value = match serde_yaml::from_str(content) {
        Ok(value) => value,
        Err(yaml_err) => match serde_json::from_str(content) {
            Ok(value) => value,
            Err(json_err) => {
                return Err(Error::Parse(format!(
                    "not valid YAML ({yaml_err}) nor JSON ({json_err})"
                )));
            }
        },
    };

    let metadata: PackageMetadata =
        serde_json::from_value(value).map_err(|e| Error::Parse(e.to_string()))?;

    validate(&metadata)?;
    Ok(metadata)
}

/// Validate a parsed document against the package schema.
pub fn validate(metadata: &PackageMetadata) -> Result<()> {
    validate_package_info(&metadata.package)?;

    if metadata.install_steps.is_empty() {
        return Err(Error::Validation(
            "install_steps must contain at least one step".into(),
        ));
    }

    for (index, step) in metadata.install_steps.iter().enumerate() {
        validate_step(step).map_err(|e| match e {
            Error::Validation(msg) => Error::Validation(format!("step {index}: {msg}")),
            other => other,
        })?;
    }

    for hook in metadata
        .pre_install
        .iter()
        .chain(metadata.post_install.iter())
    {
        validate_hook(hook)?;
    }

    Ok(())
}

/// Validate the package identity block.
pub fn validate_package_info(info: &PackageInfo) -> Result<()> {
    if !is_valid_package_name(&info.name) {
        return Err(Error::Validation(format!(
            "package name '{}' may only contain alphanumerics, '_' and '-'",
            info.name
        )));
    }
    if !is_valid_version(&info.version) {
        return Err(Error::Validation(format!(
            "version '{}' is not MAJOR.MINOR.PATCH with optional -suffix",
            info.version
        )));
    }
    Ok(())
}

/// Validate one step's shape and its rollback-strategy declaration.
///
/// Pure: no host state is consulted.
pub fn validate_step(step: &Step) -> Result<()> {
    match &step.spec {
        StepSpec::AptPackage(apt) => {
            if apt.packages.is_empty() {
                return Err(Error::Validation("apt_package requires packages".into()));
            }
            for name in &apt.packages {
                if !is_valid_apt_name(name) {
                    return Err(Error::Validation(format!(
                        "invalid apt package name '{name}'"
                    )));
                }
            }
        }
        StepSpec::FileCopy(file) => {
            if file.src.is_empty() || file.dest.is_empty() {
                return Err(Error::Validation("file_copy requires src and dest".into()));
            }
            if let Some(mode) = &file.mode {
                if !is_valid_mode(mode) {
                    return Err(Error::Validation(format!(
                        "mode '{mode}' is not 3-4 octal digits"
                    )));
                }
            }
        }
        StepSpec::SystemdService(service) => {
            if service.service.is_empty() {
                return Err(Error::Validation(
                    "systemd_service requires a unit name".into(),
                ));
            }
        }
        StepSpec::UserManagement(user) => {
            if !is_valid_username(&user.username) {
                return Err(Error::Validation(format!(
                    "invalid username '{}'",
                    user.username
                )));
            }
        }
        StepSpec::CustomScript(script) => {
            if script.script.trim().is_empty() {
                return Err(Error::Validation("custom_script requires a script".into()));
            }
        }
        StepSpec::AnsiblePlaybook(playbook) => {
            if playbook.playbook.is_empty() {
                return Err(Error::Validation(
                    "ansible_playbook requires a playbook path".into(),
                ));
            }
        }
    }

    validate_rollback_strategy(step)
}

/// Steps without a built-in compensator must declare their strategy, and a
/// declared strategy must carry the artifact it depends on.
fn validate_rollback_strategy(step: &Step) -> Result<()> {
    let has_auto_compensator = !matches!(
        step.spec,
        StepSpec::CustomScript(_) | StepSpec::AnsiblePlaybook(_)
    );

    match step.rollback {
        RollbackKind::Auto if !has_auto_compensator => Err(Error::Validation(format!(
            "{} has no automatic compensator; declare rollback: manual, ansible, or none",
            step.kind()
        ))),
        RollbackKind::Manual if step.rollback_script.is_none() => Err(Error::Validation(
            "rollback: manual requires rollback_script".into(),
        )),
        RollbackKind::Ansible if step.rollback_playbook.is_none() => Err(Error::Validation(
            "rollback: ansible requires rollback_playbook".into(),
        )),
        _ => Ok(()),
    }
}

fn validate_hook(hook: &HookStep) -> Result<()> {
    match hook {
        HookStep::Script { script, .. } if script.trim().is_empty() => {
            Err(Error::Validation("hook script must not be empty".into()))
        }
        HookStep::AnsiblePlaybook { playbook, .. } if playbook.is_empty() => Err(
            Error::Validation("hook playbook path must not be empty".into()),
        ),
        _ => Ok(()),
    }
}

// ============================================================================
// Template
// ============================================================================

/// Build a starter metadata document for a new package.
pub fn template(package_name: &str, version: &str) -> PackageMetadata {
    PackageMetadata {
        package: PackageInfo {
            name: package_name.to_string(),
            version: version.to_string(),
            description: Some(format!("{package_name} installation package")),
            author: None,
            license: None,
        },
        install_steps: vec![
            Step {
                rollback: RollbackKind::Auto,
                description: Some("Install runtime dependencies".into()),
                rollback_script: None,
                rollback_playbook: None,
                spec: StepSpec::AptPackage(AptPackageStep {
                    action: AptAction::Install,
                    packages: vec![package_name.to_string()],
                    update_cache: true,
                }),
            },
            Step {
                rollback: RollbackKind::Auto,
                description: Some("Deploy the main configuration file".into()),
                rollback_script: None,
                rollback_playbook: None,
                spec: StepSpec::FileCopy(FileCopyStep {
                    src: format!("./files/{package_name}.conf"),
                    dest: format!("/etc/{package_name}/{package_name}.conf"),
                    owner: Some("root".into()),
                    group: Some("root".into()),
                    mode: Some("644".into()),
                }),
            },
            Step {
                rollback: RollbackKind::Auto,
                description: Some("Enable the service".into()),
                rollback_script: None,
                rollback_playbook: None,
                spec: StepSpec::SystemdService(SystemdServiceStep {
                    service: package_name.to_string(),
                    action: ServiceAction::Enable,
                }),
            },
        ],
        pre_install: Vec::new(),
        post_install: Vec::new(),
        dependencies: Vec::new(),
        conflicts: Vec::new(),
        requirements: None,
    }
}

/// Serialize a document to YAML.
pub fn to_yaml(metadata: &PackageMetadata) -> Result<String> {
    serde_yaml::to_string(metadata).map_err(|e| Error::Parse(e.to_string()))
}

/// Write a document to disk as YAML.
pub fn save_file(metadata: &PackageMetadata, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, to_yaml(metadata)?)?;
    Ok(())
}

// ============================================================================
// Pattern checks
// ============================================================================

fn is_valid_package_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// MAJOR.MINOR.PATCH with an optional `-suffix` of alphanumerics, `.` and `_`.
fn is_valid_version(version: &str) -> bool {
    let (core, suffix) = match version.split_once('-') {
        Some((core, suffix)) => (core, Some(suffix)),
        None => (version, None),
    };

    let parts: Vec<&str> = core.split('.').collect();
    if parts.len() != 3
        || parts
            .iter()
            .any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit()))
    {
        return false;
    }

    match suffix {
        Some(s) => {
            !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
        }
        None => true,
    }
}

fn is_valid_apt_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-'))
}

fn is_valid_mode(mode: &str) -> bool {
    (3..=4).contains(&mode.len()) && mode.chars().all(|c| ('0'..='7').contains(&c))
}

fn is_valid_username(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c.is_ascii_uppercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserAction;

    const SAMPLE_YAML: &str = r#"
package:
  name: webstack
  version: 1.2.0
  description: Web server with managed config

install_steps:
  - type: apt_package
    action: install
    packages: [nginx]
  - type: file_copy
    src: /tmp/a
    dest: /etc/a.conf
    mode: "644"
  - type: systemd_service
    service: nginx
    action: enable
  - type: user_management
    username: www-runner
    action: create
    user_data:
      home: /var/lib/www-runner
      shell: /usr/sbin/nologin
      system: true
  - type: custom_script
    script: /opt/webstack/finish.sh
    rollback: manual
    rollback_script: /opt/webstack/undo.sh

requirements:
  min_memory: 512
  architectures: [x86_64]
"#;

    #[test]
    fn test_parse_yaml_document() {
        let metadata = parse_str(SAMPLE_YAML).unwrap();
        assert_eq!(metadata.package.name, "webstack");
        assert_eq!(metadata.install_steps.len(), 5);
        assert_eq!(metadata.install_steps[0].kind(), "apt_package");
        assert_eq!(metadata.install_steps[4].rollback, RollbackKind::Manual);
        assert_eq!(metadata.requirements.unwrap().min_memory, Some(512));

        match &metadata.install_steps[3].spec {
            StepSpec::UserManagement(user) => {
                assert_eq!(user.action, UserAction::Create);
                assert!(user.user_data.system);
            }
            other => panic!("unexpected spec: {other:?}"),
        }
    }

    #[test]
    fn test_parse_json_document() {
        let json = r#"{
            "package": {"name": "tool", "version": "0.1.0"},
            "install_steps": [
                {"type": "apt_package", "action": "install", "packages": ["jq"]}
            ]
        }"#;
        let metadata = parse_str(json).unwrap();
        assert_eq!(metadata.package.name, "tool");
    }

    #[test]
    fn test_parse_garbage_reports_both_formats() {
        let err = parse_str("{ not: [valid").unwrap_err();
        match err {
            Error::Parse(msg) => {
                assert!(msg.contains("YAML"));
                assert!(msg.contains("JSON"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_file_not_found() {
        let err = parse_file(Path::new("/nonexistent/pkg.yaml")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_parse_file_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("pkg.yaml");
        std::fs::write(&path, SAMPLE_YAML).unwrap();
        assert!(parse_file(&path).is_ok());
    }

    #[test]
    fn test_rejects_bad_version() {
        let doc = SAMPLE_YAML.replace("1.2.0", "1.2");
        let err = parse_str(&doc).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_rejects_empty_steps() {
        let json = r#"{"package": {"name": "x", "version": "1.0.0"}, "install_steps": []}"#;
        assert!(matches!(
            parse_str(json),
            Err(Error::Validation(msg)) if msg.contains("install_steps")
        ));
    }

    #[test]
    fn test_rejects_empty_package_list() {
        let json = r#"{
            "package": {"name": "x", "version": "1.0.0"},
            "install_steps": [{"type": "apt_package", "action": "install", "packages": []}]
        }"#;
        assert!(matches!(
            parse_str(json),
            Err(Error::Validation(msg)) if msg.contains("step 0")
        ));
    }

    #[test]
    fn test_rejects_bad_mode() {
        let doc = SAMPLE_YAML.replace("\"644\"", "\"9x4\"");
        assert!(matches!(parse_str(&doc), Err(Error::Validation(_))));
    }

    #[test]
    fn test_script_step_must_declare_strategy() {
        let json = r#"{
            "package": {"name": "x", "version": "1.0.0"},
            "install_steps": [{"type": "custom_script", "script": "run.sh"}]
        }"#;
        assert!(matches!(
            parse_str(json),
            Err(Error::Validation(msg)) if msg.contains("automatic compensator")
        ));
    }

    #[test]
    fn test_manual_strategy_requires_script() {
        let json = r#"{
            "package": {"name": "x", "version": "1.0.0"},
            "install_steps": [
                {"type": "custom_script", "script": "run.sh", "rollback": "manual"}
            ]
        }"#;
        assert!(matches!(
            parse_str(json),
            Err(Error::Validation(msg)) if msg.contains("rollback_script")
        ));
    }

    #[test]
    fn test_ansible_strategy_requires_playbook() {
        let json = r#"{
            "package": {"name": "x", "version": "1.0.0"},
            "install_steps": [
                {"type": "ansible_playbook", "playbook": "site.yml", "rollback": "ansible"}
            ]
        }"#;
        assert!(matches!(
            parse_str(json),
            Err(Error::Validation(msg)) if msg.contains("rollback_playbook")
        ));
    }

    #[test]
    fn test_irreversible_script_step_accepted() {
        let json = r#"{
            "package": {"name": "x", "version": "1.0.0"},
            "install_steps": [
                {"type": "custom_script", "script": "run.sh", "rollback": "none"}
            ]
        }"#;
        let metadata = parse_str(json).unwrap();
        assert_eq!(metadata.install_steps[0].rollback, RollbackKind::None);
    }

    #[test]
    fn test_template_is_valid_and_roundtrips() {
        let metadata = template("nginx-stack", "1.0.0");
        validate(&metadata).unwrap();

        let yaml = to_yaml(&metadata).unwrap();
        let back = parse_str(&yaml).unwrap();
        assert_eq!(back, metadata);
    }

    #[test]
    fn test_version_pattern() {
        assert!(is_valid_version("1.0.0"));
        assert!(is_valid_version("10.22.333"));
        assert!(is_valid_version("1.0.0-rc.1"));
        assert!(!is_valid_version("1.0"));
        assert!(!is_valid_version("1.0.0.0"));
        assert!(!is_valid_version("1.a.0"));
        assert!(!is_valid_version("1.0.0-"));
    }

    #[test]
    fn test_username_pattern() {
        assert!(is_valid_username("deploy"));
        assert!(is_valid_username("_svc"));
        assert!(is_valid_username("www-data"));
        assert!(!is_valid_username("9lives"));
        assert!(!is_valid_username(""));
        assert!(!is_valid_username("bad user"));
    }

    #[test]
    fn test_mode_pattern() {
        assert!(is_valid_mode("644"));
        assert!(is_valid_mode("0755"));
        assert!(!is_valid_mode("64"));
        assert!(!is_valid_mode("77777"));
        assert!(!is_valid_mode("64g"));
    }
}
