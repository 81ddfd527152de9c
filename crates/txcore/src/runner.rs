//! Host command execution helpers.
//!
//! All step handlers shell out through this module so that failure
//! reporting (captured stderr) and timeout handling stay uniform.

use crate::error::HandlerError;
use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Run a command and capture stdout; non-zero exit becomes an error
/// carrying the trimmed stderr.
pub fn run_capture(cmd: &str, args: &[&str]) -> Result<String, HandlerError> {
    let output = Command::new(cmd)
        .args(args)
        .output()
        .map_err(|e| HandlerError::Command {
            message: format!("failed to execute {cmd}: {e}"),
            stderr: String::new(),
        })?;

    if !output.status.success() {
        return Err(HandlerError::Command {
            message: format!("{cmd} {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Run a command for its effect only.
pub fn run_checked(cmd: &str, args: &[&str]) -> Result<(), HandlerError> {
    run_capture(cmd, args).map(|_| ())
}

/// Run a command silently, returning success/failure.
pub fn run_quiet(cmd: &str, args: &[&str]) -> bool {
    Command::new(cmd)
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Check if a command exists on PATH.
pub fn command_exists(cmd: &str) -> bool {
    Command::new("which")
        .arg(cmd)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Run an operator-supplied shell command line via `sh -c`.
pub fn run_shell(script: &str, timeout_secs: Option<u64>) -> Result<(), HandlerError> {
    let mut command = Command::new("sh");
    command.args(["-c", script]);
    run_with_timeout(command, script, timeout_secs)
}

/// Run a command, enforcing an optional wall-clock timeout.
///
/// On timeout the child is killed and the step is reported failed; the
/// caller's compensation path is expected to clean up whatever the partial
/// run left behind.
pub fn run_with_timeout(
    mut command: Command,
    display: &str,
    timeout_secs: Option<u64>,
) -> Result<(), HandlerError> {
    let Some(seconds) = timeout_secs else {
        let output = command.output().map_err(|e| HandlerError::Command {
            message: format!("failed to execute {display}: {e}"),
            stderr: String::new(),
        })?;
        if !output.status.success() {
            return Err(HandlerError::Command {
                message: display.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        return Ok(());
    };

    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|e| HandlerError::Command {
        message: format!("failed to execute {display}: {e}"),
        stderr: String::new(),
    })?;

    // Drain stderr on a helper thread so a chatty child cannot fill the
    // pipe and stall while we poll for exit.
    let mut stderr_pipe = child.stderr.take();
    let reader = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(pipe) = stderr_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    });

    let deadline = Instant::now() + Duration::from_secs(seconds);
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = reader.join();
                    return Err(HandlerError::Timeout {
                        command: display.to_string(),
                        seconds,
                    });
                }
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(e) => {
                let _ = child.kill();
                let _ = reader.join();
                return Err(HandlerError::Io(e));
            }
        }
    };

    let stderr = reader.join().unwrap_or_default();
    if !status.success() {
        return Err(HandlerError::Command {
            message: display.to_string(),
            stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
        });
    }
    Ok(())
}
