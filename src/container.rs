//! Drives the container engine's `compose` subcommands against a rendered
//! workspace. A small config struct builds an argument vector, which is
//! then handed to the shared [`Executor`].

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::executor::Executor;

const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(600);
const UP_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_LOG_LINES: u32 = 100;
/// `compose exec -d` returns as soon as the process is launched inside the
/// container; this bounds only that launch, not the process's lifetime.
const DETACH_LAUNCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Liveness of a single service within a branch's container group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    /// Container reported as up.
    Running,
    /// Container exists but is stopped.
    Stopped,
    /// Container is mid-restart.
    Restarting,
    /// Container process exited.
    Exited,
    /// State could not be determined.
    Unknown,
}

/// A single row of `docker compose ps` output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// The service name as declared in the rendered compose spec.
    pub service: String,
    /// Its current liveness.
    pub state: ServiceState,
}

/// The result of a completed `exec` invocation.
#[derive(Debug, Clone)]
pub struct ExecHandle {
    /// Process exit code.
    pub exit_code: i32,
    /// Combined captured output.
    pub output: String,
}

/// The operations `BranchEngine` needs from a container engine. A trait so
/// orchestration logic can be exercised against an in-memory fake instead
/// of a real Docker daemon.
#[async_trait::async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Build all images declared by the workspace's rendered spec.
    async fn build(&self, workspace: &Path) -> Result<()>;

    /// Start the given services (or all, if empty) detached. Idempotent
    /// for already-running services.
    async fn up(&self, workspace: &Path, services: &[String]) -> Result<()>;

    /// Stop and remove all services. Idempotent.
    async fn down(&self, workspace: &Path) -> Result<()>;

    /// Equivalent to `down` followed by `up` with all services.
    async fn restart(&self, workspace: &Path) -> Result<()>;

    /// Query per-service liveness.
    async fn status(&self, workspace: &Path) -> Result<Vec<ServiceStatus>>;

    /// Return the last `lines` lines of combined stdout/stderr (default
    /// 100 when `None`).
    async fn logs(&self, workspace: &Path, lines: Option<u32>) -> Result<String>;

    /// Start a process inside a running service and wait for it to exit.
    async fn exec(
        &self,
        workspace: &Path,
        service: &str,
        command: &[String],
        timeout: Duration,
    ) -> Result<ExecHandle>;

    /// Start a process inside a running service and return as soon as it
    /// has been launched, without waiting for it to exit. For long-lived
    /// foreground processes (a terminal server, for instance) that do not
    /// exit on their own.
    async fn exec_detached(&self, workspace: &Path, service: &str, command: &[String])
        -> Result<()>;
}

/// Builds `docker compose` argument vectors and runs them in a workspace
/// directory through the shared [`Executor`].
pub struct ContainerController {
    executor: Executor,
    build_timeout: Duration,
}

impl ContainerController {
    /// Build a controller with the given build timeout (others are fixed
    /// per the container-engine contract).
    pub fn new(build_timeout: Duration) -> Self {
        Self {
            executor: Executor::new(),
            build_timeout,
        }
    }

    async fn compose(
        &self,
        workspace: &Path,
        args: &[&str],
        timeout: Duration,
    ) -> Result<crate::executor::Output> {
        let mut full_args = vec!["compose"];
        full_args.extend(args);
        self.executor
            .run("docker", &full_args, Some(workspace), timeout)
            .await
    }
}

#[async_trait::async_trait]
impl ContainerEngine for ContainerController {
    async fn build(&self, workspace: &Path) -> Result<()> {
        self.compose(workspace, &["build"], self.build_timeout).await?;
        Ok(())
    }

    async fn up(&self, workspace: &Path, services: &[String]) -> Result<()> {
        let mut args = vec!["up".to_string(), "-d".to_string()];
        args.extend(services.iter().cloned());
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.compose(workspace, &args, UP_TIMEOUT).await?;
        Ok(())
    }

    async fn down(&self, workspace: &Path) -> Result<()> {
        self.compose(workspace, &["down"], DEFAULT_TIMEOUT).await?;
        Ok(())
    }

    async fn restart(&self, workspace: &Path) -> Result<()> {
        ContainerEngine::down(self, workspace).await?;
        ContainerEngine::up(self, workspace, &[]).await
    }

    async fn status(&self, workspace: &Path) -> Result<Vec<ServiceStatus>> {
        let output = self
            .compose(workspace, &["ps", "--format", "json"], DEFAULT_TIMEOUT)
            .await?;
        parse_ps_output(&output.stdout)
    }

    async fn logs(&self, workspace: &Path, lines: Option<u32>) -> Result<String> {
        let tail = lines.unwrap_or(DEFAULT_LOG_LINES).to_string();
        let output = self
            .compose(workspace, &["logs", "--tail", &tail], DEFAULT_TIMEOUT)
            .await?;
        Ok(output.stdout)
    }

    async fn exec(
        &self,
        workspace: &Path,
        service: &str,
        command: &[String],
        timeout: Duration,
    ) -> Result<ExecHandle> {
        let mut args = vec!["exec".to_string(), "-T".to_string(), service.to_string()];
        args.extend(command.iter().cloned());
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.compose(workspace, &args, timeout).await?;
        Ok(ExecHandle {
            exit_code: output.exit_code,
            output: output.stdout,
        })
    }

    async fn exec_detached(
        &self,
        workspace: &Path,
        service: &str,
        command: &[String],
    ) -> Result<()> {
        let mut args = vec![
            "exec".to_string(),
            "-d".to_string(),
            "-T".to_string(),
            service.to_string(),
        ];
        args.extend(command.iter().cloned());
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.compose(workspace, &args, DETACH_LAUNCH_TIMEOUT).await?;
        Ok(())
    }
}

impl Default for ContainerController {
    fn default() -> Self {
        Self::new(DEFAULT_BUILD_TIMEOUT)
    }
}

fn parse_ps_output(stdout: &str) -> Result<Vec<ServiceStatus>> {
    // `docker compose ps --format json` emits either a single JSON array
    // or newline-delimited JSON objects depending on engine version; this
    // handles both.
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let values: Vec<serde_json::Value> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)?
    } else {
        trimmed
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<std::result::Result<Vec<_>, _>>()?
    };

    Ok(values
        .into_iter()
        .map(|value| {
            let service = value
                .get("Service")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let state_raw = value
                .get("State")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_lowercase();
            let state = match state_raw.as_str() {
                "running" => ServiceState::Running,
                "exited" => ServiceState::Exited,
                "restarting" => ServiceState::Restarting,
                "paused" | "stopped" | "created" => ServiceState::Stopped,
                _ => ServiceState::Unknown,
            };
            ServiceStatus { service, state }
        })
        .collect())
}

/// Resolve the `docker` binary exists and is runnable. Used at startup so
/// a missing container engine is reported before the first branch create.
pub fn require_docker_binary() -> Result<()> {
    which::which("docker")
        .map(|_| ())
        .map_err(|_| Error::BinaryNotFound {
            binary: "docker".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_array_ps_output() {
        let stdout = r#"[{"Service":"app","State":"running"},{"Service":"db","State":"exited"}]"#;
        let parsed = parse_ps_output(stdout).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].service, "app");
        assert_eq!(parsed[0].state, ServiceState::Running);
        assert_eq!(parsed[1].state, ServiceState::Exited);
    }

    #[test]
    fn parses_ndjson_ps_output() {
        let stdout = "{\"Service\":\"app\",\"State\":\"running\"}\n{\"Service\":\"db\",\"State\":\"restarting\"}\n";
        let parsed = parse_ps_output(stdout).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].state, ServiceState::Restarting);
    }

    #[test]
    fn empty_ps_output_is_empty_vec() {
        assert!(parse_ps_output("").unwrap().is_empty());
        assert!(parse_ps_output("   \n").unwrap().is_empty());
    }
}
