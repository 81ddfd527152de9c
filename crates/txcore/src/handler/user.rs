//! user_management handler.
//!
//! Creates, modifies, and removes accounts through the shadow-utils
//! commands. The snapshot records the full prior account record (or its
//! absence) from `getent`/`id`, so compensation can delete a created
//! account, recreate a removed one, or walk a modified one back.

use crate::error::HandlerError;
use crate::handler::{wrong_variant, StepHandler};
use crate::runner;
use crate::snapshot::{Snapshot, UserRecord};
use metadata::{Step, StepSpec, UserAction, UserData, UserManagementStep};

pub struct UserHandler;

impl UserHandler {
    fn payload<'a>(&self, step: &'a Step) -> Result<&'a UserManagementStep, HandlerError> {
        match &step.spec {
            StepSpec::UserManagement(user) => Ok(user),
            _ => Err(wrong_variant("user_management", step)),
        }
    }

    /// The current account record, or `None` when the user does not exist.
    fn current_record(username: &str) -> Option<UserRecord> {
        let line = runner::run_capture("getent", &["passwd", username]).ok()?;
        let mut record = parse_passwd_line(&line)?;
        if let Ok(groups) = runner::run_capture("id", &["-Gn", username]) {
            record.groups = parse_group_list(&groups);
        }
        Some(record)
    }
}

impl StepHandler for UserHandler {
    fn kind(&self) -> &'static str {
        "user_management"
    }

    fn validate(&self, step: &Step) -> Result<(), HandlerError> {
        let user = self.payload(step)?;
        if user.username.is_empty() {
            return Err(HandlerError::InvalidStep(
                "user_management requires a username".into(),
            ));
        }
        Ok(())
    }

    fn snapshot(&self, step: &Step) -> Result<Snapshot, HandlerError> {
        let user = self.payload(step)?;
        Ok(Snapshot::User {
            username: user.username.clone(),
            prior: Self::current_record(&user.username),
        })
    }

    fn apply(&self, step: &Step) -> Result<(), HandlerError> {
        let user = self.payload(step)?;
        let (cmd, args) = match user.action {
            UserAction::Create => ("useradd", build_useradd_args(&user.username, &user.user_data)),
            UserAction::Modify => ("usermod", build_usermod_args(&user.username, &user.user_data)),
            UserAction::Remove => (
                "userdel",
                vec!["-r".to_string(), user.username.clone()],
            ),
        };

        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        log::info!("{cmd} {}", args.join(" "));
        runner::run_checked(cmd, &args)
    }

    fn compensate(&self, step: &Step, snapshot: &Snapshot) -> Result<(), HandlerError> {
        let user = self.payload(step)?;
        let Snapshot::User { prior, .. } = snapshot else {
            return Err(HandlerError::SnapshotMismatch(
                "expected a user snapshot".into(),
            ));
        };

        let current = Self::current_record(&user.username);
        match (prior, current) {
            // Did not exist before and does not now: nothing took effect.
            (None, None) => Ok(()),
            // Created by this step: delete it again.
            (None, Some(_)) => {
                log::info!("deleting user {} (absent before transaction)", user.username);
                runner::run_checked("userdel", &["-r", &user.username])
            }
            // Removed by this step: recreate from the recorded attributes.
            (Some(record), None) => {
                log::info!("recreating user {}", user.username);
                let args = build_restore_args(&user.username, record);
                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                runner::run_checked("useradd", &args)
            }
            // Still exists: walk attributes back to the recorded ones.
            (Some(record), Some(_)) => {
                log::info!("restoring attributes of user {}", user.username);
                let data = UserData {
                    home: Some(record.home.clone()),
                    shell: Some(record.shell.clone()),
                    groups: record.groups.clone(),
                    system: false,
                };
                let args = build_usermod_args(&user.username, &data);
                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                runner::run_checked("usermod", &args)
            }
        }
    }
}

/// useradd argument list from declared attributes.
fn build_useradd_args(username: &str, data: &UserData) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(home) = &data.home {
        args.push("-d".into());
        args.push(home.clone());
        args.push("-m".into());
    }
    if let Some(shell) = &data.shell {
        args.push("-s".into());
        args.push(shell.clone());
    }
    if !data.groups.is_empty() {
        args.push("-G".into());
        args.push(data.groups.join(","));
    }
    if data.system {
        args.push("-r".into());
    }
    args.push(username.to_string());
    args
}

/// usermod argument list from declared attributes.
fn build_usermod_args(username: &str, data: &UserData) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(home) = &data.home {
        args.push("-d".into());
        args.push(home.clone());
    }
    if let Some(shell) = &data.shell {
        args.push("-s".into());
        args.push(shell.clone());
    }
    if !data.groups.is_empty() {
        args.push("-G".into());
        args.push(data.groups.join(","));
    }
    args.push(username.to_string());
    args
}

/// useradd argument list that recreates a snapshotted account, pinning the
/// original uid.
fn build_restore_args(username: &str, record: &UserRecord) -> Vec<String> {
    let mut args = vec![
        "-u".to_string(),
        record.uid.to_string(),
        "-d".to_string(),
        record.home.clone(),
        "-m".to_string(),
        "-s".to_string(),
        record.shell.clone(),
    ];
    if !record.groups.is_empty() {
        args.push("-G".into());
        args.push(record.groups.join(","));
    }
    args.push(username.to_string());
    args
}

/// Parse one `getent passwd` line into a record (groups filled separately).
fn parse_passwd_line(line: &str) -> Option<UserRecord> {
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() < 7 {
        return None;
    }
    Some(UserRecord {
        uid: fields[2].parse().ok()?,
        gid: fields[3].parse().ok()?,
        home: fields[5].to_string(),
        shell: fields[6].to_string(),
        groups: Vec::new(),
    })
}

/// Parse `id -Gn` output into group names.
fn parse_group_list(output: &str) -> Vec<String> {
    output.split_whitespace().map(String::from).collect()
}
