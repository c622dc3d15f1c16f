//! Subprocess execution helpers.
//!
//! Every external tool the registry runs (`git`, `tfswitch`, `terraform`,
//! `tfsec`, `terraform-docs`) goes through [`run`] or [`run_checked`], which
//! centralise timeout enforcement, output capture and failure
//! classification. Spawn failures are mapped onto the registry's subprocess
//! tag set so callers never string-match on OS error text.

use crate::error::{Result, SubprocessStep};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Captured output of a finished subprocess.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Whether the process exited with status zero
    pub success: bool,
    /// The exit code, absent when the process was killed by a signal
    pub exit_code: Option<i32>,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl CommandOutput {
    /// Combined stdout and stderr, stdout first.
    #[must_use]
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Run a subprocess to completion, capturing output.
///
/// A non-zero exit is NOT an error here — callers inspect
/// [`CommandOutput::success`] and decide. Spawn failures and timeouts are
/// errors, tagged with the appropriate [`SubprocessStep`].
///
/// # Errors
///
/// - [`SubprocessStep::CommandNotFound`] when the binary is missing
/// - [`SubprocessStep::PermissionDenied`] when it cannot be executed
/// - [`SubprocessStep::Timeout`] when the budget elapses (the process is killed)
pub async fn run(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    envs: &[(&str, String)],
    timeout: Duration,
) -> Result<CommandOutput> {
    let mut command = Command::new(program);
    command
        .args(args)
        .env("TF_IN_AUTOMATION", "true")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    for (key, value) in envs {
        command.env(key, value);
    }

    tracing::debug!(
        program = program,
        args = ?args,
        cwd = ?cwd.map(|p| p.display().to_string()),
        "Spawning subprocess"
    );

    let output = match tokio::time::timeout(timeout, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            let step = match e.kind() {
                std::io::ErrorKind::NotFound => SubprocessStep::CommandNotFound,
                std::io::ErrorKind::PermissionDenied => SubprocessStep::PermissionDenied,
                _ => SubprocessStep::ProcessKilled,
            };
            return Err(crate::err!(Subprocess {
                step: step,
                message: format!("failed to run {program}: {e}"),
            }));
        }
        Err(_) => {
            // kill_on_drop reaps the child when the future is dropped
            return Err(crate::err!(Subprocess {
                step: SubprocessStep::Timeout,
                message: format!("{program} timed out after {}s", timeout.as_secs()),
            }));
        }
    };

    let exit_code = output.status.code();
    if exit_code.is_none() {
        return Err(crate::err!(Subprocess {
            step: SubprocessStep::ProcessKilled,
            message: format!("{program} was killed by a signal"),
        }));
    }

    Ok(CommandOutput {
        success: output.status.success(),
        exit_code,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Run a subprocess and treat a non-zero exit as a failure of `step`,
/// wrapping the captured stderr into the error message.
///
/// # Errors
///
/// Everything [`run`] returns, plus a `Subprocess` error tagged `step`
/// when the process exits non-zero.
pub async fn run_checked(
    step: SubprocessStep,
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    envs: &[(&str, String)],
    timeout: Duration,
) -> Result<CommandOutput> {
    let output = run(program, args, cwd, envs, timeout).await?;
    if !output.success {
        let detail = if output.stderr.trim().is_empty() {
            output.stdout.trim().to_string()
        } else {
            output.stderr.trim().to_string()
        };
        return Err(crate::err!(Subprocess {
            step: step,
            message: detail,
        }));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_is_command_not_found() {
        let err = run(
            "terravault-no-such-binary",
            &[],
            None,
            &[],
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert_eq!(err.subprocess_step(), Some(SubprocessStep::CommandNotFound));
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let output = run("echo", &["hello"], None, &[], Duration::from_secs(5))
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_nonzero_exit_surfaces_in_run_checked() {
        let err = run_checked(
            SubprocessStep::Git,
            "sh",
            &["-c", "echo broken >&2; exit 3"],
            None,
            &[],
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert_eq!(err.subprocess_step(), Some(SubprocessStep::Git));
        assert!(err.to_string().contains("broken"));
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let err = run("sleep", &["30"], None, &[], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.subprocess_step(), Some(SubprocessStep::Timeout));
    }
}
