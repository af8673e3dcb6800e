//! In-memory test doubles for the engine's external collaborators.
//!
//! Fixtures that let orchestration logic (compensation ordering, state
//! transitions, per-branch locking) be exercised deterministically,
//! without a real container engine or git binary.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use crate::container::{ContainerEngine, ExecHandle, ServiceState, ServiceStatus};
use crate::credential::{CredentialValidator, Verdict};
use crate::error::Result;
use crate::vcs::VcsAdapter;

/// A credential validator that always returns a fixed verdict.
pub struct FakeCredentialValidator {
    verdict: Verdict,
}

impl FakeCredentialValidator {
    /// Build a validator that always returns `verdict`.
    pub fn new(verdict: Verdict) -> Self {
        Self { verdict }
    }
}

#[async_trait::async_trait]
impl CredentialValidator for FakeCredentialValidator {
    async fn validate(&self, _api_key: &str) -> Verdict {
        self.verdict
    }
}

/// A VCS adapter that tracks created/deleted branch names in memory,
/// never touching a real git working tree.
pub struct FakeVcsAdapter {
    created: Mutex<HashSet<String>>,
    /// If set, `create_branch` fails for this exact name.
    pub fail_create_for: Mutex<Option<String>>,
}

impl FakeVcsAdapter {
    /// Build an adapter with no branches created yet.
    pub fn new() -> Self {
        Self {
            created: Mutex::new(HashSet::new()),
            fail_create_for: Mutex::new(None),
        }
    }

    /// Names of branches currently considered created, for assertions.
    pub fn created_branches(&self) -> HashSet<String> {
        self.created.lock().expect("lock poisoned").clone()
    }
}

impl Default for FakeVcsAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl VcsAdapter for FakeVcsAdapter {
    async fn create_branch(&self, name: &str) -> Result<()> {
        if self.fail_create_for.lock().expect("lock poisoned").as_deref() == Some(name) {
            return Err(crate::error::Error::vcs(format!(
                "simulated failure creating {name}"
            )));
        }
        self.created.lock().expect("lock poisoned").insert(name.to_string());
        Ok(())
    }

    async fn delete_branch(&self, name: &str) {
        self.created.lock().expect("lock poisoned").remove(name);
    }
}

/// A container engine that records invocations and reports every service
/// as running, without spawning any process.
pub struct FakeContainerEngine {
    up_calls: Mutex<Vec<std::path::PathBuf>>,
    down_calls: Mutex<Vec<std::path::PathBuf>>,
}

impl FakeContainerEngine {
    /// Build an engine with no recorded calls yet.
    pub fn new() -> Self {
        Self {
            up_calls: Mutex::new(Vec::new()),
            down_calls: Mutex::new(Vec::new()),
        }
    }

    /// Workspaces `up` was called against, in call order.
    pub fn up_calls(&self) -> Vec<std::path::PathBuf> {
        self.up_calls.lock().expect("lock poisoned").clone()
    }

    /// Workspaces `down` was called against, in call order.
    pub fn down_calls(&self) -> Vec<std::path::PathBuf> {
        self.down_calls.lock().expect("lock poisoned").clone()
    }
}

impl Default for FakeContainerEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ContainerEngine for FakeContainerEngine {
    async fn build(&self, _workspace: &Path) -> Result<()> {
        Ok(())
    }

    async fn up(&self, workspace: &Path, _services: &[String]) -> Result<()> {
        self.up_calls
            .lock()
            .expect("lock poisoned")
            .push(workspace.to_path_buf());
        Ok(())
    }

    async fn down(&self, workspace: &Path) -> Result<()> {
        self.down_calls
            .lock()
            .expect("lock poisoned")
            .push(workspace.to_path_buf());
        Ok(())
    }

    async fn restart(&self, workspace: &Path) -> Result<()> {
        self.down(workspace).await?;
        self.up(workspace, &[]).await
    }

    async fn status(&self, _workspace: &Path) -> Result<Vec<ServiceStatus>> {
        Ok(vec![ServiceStatus {
            service: "app".to_string(),
            state: ServiceState::Running,
        }])
    }

    async fn logs(&self, _workspace: &Path, _lines: Option<u32>) -> Result<String> {
        Ok("fake log output\n".to_string())
    }

    async fn exec(
        &self,
        _workspace: &Path,
        _service: &str,
        _command: &[String],
        _timeout: Duration,
    ) -> Result<ExecHandle> {
        Ok(ExecHandle {
            exit_code: 0,
            output: String::new(),
        })
    }

    async fn exec_detached(
        &self,
        _workspace: &Path,
        _service: &str,
        _command: &[String],
    ) -> Result<()> {
        Ok(())
    }
}
