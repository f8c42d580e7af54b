//! External process invocation with per-call timeouts.
//!
//! Every pixel-level operation (rasterising, normalising, layout analysis) is
//! delegated to an external tool. Stages describe what to run as a
//! [`ToolCommand`] and hand it to a [`ProcessRunner`]; the default
//! [`SystemRunner`] spawns the program with `tokio::process`, kills it when the
//! timeout expires, and captures stdout/stderr/exit code.
//!
//! The trait exists so tests (and embedders running tools in a sandbox or on
//! a remote host) can substitute their own runner without touching the
//! pipeline stages.

use crate::error::ToolError;
use futures::future::BoxFuture;
use std::ffi::{OsStr, OsString};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// A fully-specified external invocation.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<OsString>,
    pub timeout: Duration,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<S: AsRef<OsStr>>(mut self, args: impl IntoIterator<Item = S>) -> Self {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Arguments as lossy UTF-8, for logging and for runners that pattern-match.
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }
}

/// Captured result of a process that ran to completion.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// Exit code; `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Runs external commands.
///
/// `Ok` means the process ran to completion, whatever its exit code.
/// `Err` means it could not be started ([`ToolError::Spawn`]) or was killed
/// on timeout ([`ToolError::Timeout`]).
pub trait ProcessRunner: Send + Sync {
    fn run<'a>(&'a self, command: &'a ToolCommand) -> BoxFuture<'a, Result<ProcessOutput, ToolError>>;
}

/// Spawns real child processes via `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run<'a>(&'a self, command: &'a ToolCommand) -> BoxFuture<'a, Result<ProcessOutput, ToolError>> {
        Box::pin(async move {
            debug!("exec: {} {:?}", command.program, command.args_lossy());

            let child = Command::new(&command.program)
                .args(&command.args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output();

            match tokio::time::timeout(command.timeout, child).await {
                Ok(Ok(out)) => Ok(ProcessOutput {
                    code: out.status.code(),
                    stdout: out.stdout,
                    stderr: out.stderr,
                }),
                Ok(Err(source)) => Err(ToolError::Spawn {
                    program: command.program.clone(),
                    source,
                }),
                // Dropping the `output()` future kills the child (kill_on_drop).
                Err(_) => Err(ToolError::Timeout {
                    program: command.program.clone(),
                    secs: command.timeout.as_secs(),
                }),
            }
        })
    }
}

/// Run `command` and turn a non-zero exit into [`ToolError::ExitStatus`].
pub async fn run_checked(
    runner: &dyn ProcessRunner,
    command: &ToolCommand,
) -> Result<ProcessOutput, ToolError> {
    let output = runner.run(command).await?;
    if output.success() {
        Ok(output)
    } else {
        Err(ToolError::ExitStatus {
            program: command.program.clone(),
            code: output.code,
            stderr: output.stderr_lossy().trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(program: &str) -> ToolCommand {
        ToolCommand::new(program, Duration::from_secs(5))
    }

    #[test]
    fn builder_collects_args() {
        let c = cmd("pdftoppm").arg("-png").args(["-r", "150"]);
        assert_eq!(c.args_lossy(), vec!["-png", "-r", "150"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let out = SystemRunner
            .run(&cmd("sh").args(["-c", "echo 640 480; exit 0"]))
            .await
            .expect("sh should run");
        assert!(out.success());
        assert_eq!(out.stdout_lossy().trim(), "640 480");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_ok_from_runner_but_err_from_run_checked() {
        let c = cmd("sh").args(["-c", "echo boom >&2; exit 3"]);
        let out = SystemRunner.run(&c).await.expect("sh should run");
        assert_eq!(out.code, Some(3));

        match run_checked(&SystemRunner, &c).await {
            Err(ToolError::ExitStatus { code, stderr, .. }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("expected ExitStatus, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_and_reports() {
        let c = ToolCommand::new("sleep", Duration::from_millis(100)).arg("5");
        match SystemRunner.run(&c).await {
            Err(ToolError::Timeout { program, .. }) => assert_eq!(program, "sleep"),
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let c = cmd("definitely-not-a-real-binary-7f3a");
        assert!(matches!(
            SystemRunner.run(&c).await,
            Err(ToolError::Spawn { .. })
        ));
    }
}
