//! Async process execution with timeouts and captured output.
//!
//! A thin wrapper around `tokio::process::Command`: every external binary
//! (container engine, git, ttyd) is invoked through here so that timeout
//! enforcement and output capture happen in exactly one place.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Captured result of a finished child process.
#[derive(Debug, Clone)]
pub struct Output {
    /// Process exit code. `-1` if the process was killed by a signal.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl Output {
    /// Whether the process exited successfully (code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs external binaries with a bounded wall-clock budget per invocation.
#[derive(Debug, Clone, Default)]
pub struct Executor;

impl Executor {
    /// Create a new executor. Stateless today; kept as a type so call
    /// sites can later grow shared state (e.g. a semaphore) without
    /// changing their signatures.
    pub fn new() -> Self {
        Self
    }

    /// Run `program` with `args` in `cwd`, killing it if it runs longer
    /// than `timeout`.
    ///
    /// # Errors
    /// Returns [`Error::BinaryNotFound`] if the program cannot be spawned,
    /// [`Error::Timeout`] if the budget is exceeded, or
    /// [`Error::CommandFailed`] if it exits non-zero.
    pub async fn run(
        &self,
        program: &str,
        args: &[&str],
        cwd: Option<&std::path::Path>,
        timeout: Duration,
    ) -> Result<Output> {
        let command_line = format!("{program} {}", args.join(" "));
        debug!(command = %command_line, "executing command");

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                Error::BinaryNotFound {
                    binary: program.to_string(),
                }
            } else {
                Error::from(err)
            }
        })?;

        let waited = tokio::time::timeout(timeout, child.wait_with_output()).await;

        let output = match waited {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::timeout(command_line, timeout.as_secs()));
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if exit_code != 0 {
            warn!(command = %command_line, exit_code, "command failed");
            return Err(Error::command_failed(command_line, exit_code, stdout, stderr));
        }

        Ok(Output {
            exit_code,
            stdout,
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_on_success() {
        let executor = Executor::new();
        let out = executor
            .run("echo", &["hello"], None, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn surfaces_nonzero_exit() {
        let executor = Executor::new();
        let err = executor
            .run("sh", &["-c", "exit 3"], None, Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            Error::CommandFailed { exit_code, .. } => assert_eq!(exit_code, 3),
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_binary_is_reported() {
        let executor = Executor::new();
        let err = executor
            .run(
                "definitely-not-a-real-binary",
                &[],
                None,
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BinaryNotFound { .. }));
    }

    #[tokio::test]
    async fn enforces_timeout() {
        let executor = Executor::new();
        let err = executor
            .run("sleep", &["5"], None, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }
}
