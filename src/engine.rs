//! Orchestrates the full branch lifecycle: creation, deletion, start/stop/
//! restart, status, logs, and startup recovery.
//!
//! Per-branch operations are serialized by a lock keyed on branch name,
//! held in a map that is never shrunk (entries are cheap and lazily
//! allocated).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, Semaphore};
use tracing::{error, info, warn};

use crate::branch::{self, Branch, Status};
use crate::container::{ContainerEngine, ServiceState};
use crate::credential::{CredentialValidator, Verdict};
use crate::error::{Error, Result};
use crate::port_allocator::PortAllocator;
use crate::registry::Registry;
use crate::template::TemplateRenderer;
use crate::terminal::TerminalSessionManager;
use crate::vcs::VcsAdapter;

/// The primary service every rendered workspace is expected to carry; used
/// as the exec target for terminal sessions.
const PRIMARY_SERVICE: &str = "app";

/// Configuration the engine needs beyond its collaborators' own settings.
pub struct EngineConfig {
    /// Root directory of the app template to render into new workspaces.
    pub template_root: std::path::PathBuf,
    /// Host name reported in terminal-session URLs.
    pub host: String,
    /// Command ttyd runs inside the container on session start.
    pub ttyd_command: String,
    /// Maximum number of concurrent build-and-up jobs.
    pub build_concurrency: usize,
}

/// Orchestrates branch lifecycle operations over its collaborators.
pub struct BranchEngine {
    registry: Registry,
    ports: PortAllocator,
    credential: Arc<dyn CredentialValidator>,
    vcs: Arc<dyn VcsAdapter>,
    container: Arc<dyn ContainerEngine>,
    config: EngineConfig,
    locks: DashMap<String, Arc<Mutex<()>>>,
    build_permits: Arc<Semaphore>,
}

impl BranchEngine {
    /// Assemble an engine from its collaborators and configuration.
    pub fn new(
        registry: Registry,
        ports: PortAllocator,
        credential: Arc<dyn CredentialValidator>,
        vcs: Arc<dyn VcsAdapter>,
        container: Arc<dyn ContainerEngine>,
        config: EngineConfig,
    ) -> Self {
        let build_permits = Arc::new(Semaphore::new(config.build_concurrency.max(1)));
        Self {
            registry,
            ports,
            credential,
            vcs,
            container,
            config,
            locks: DashMap::new(),
            build_permits,
        }
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Rebuild in-memory state from the filesystem: reseed the port
    /// allocator from every registered branch and reconcile each branch's
    /// persisted status against the container engine's reported state.
    /// Called once at startup.
    pub async fn recover(&self) -> Result<()> {
        let branches = self.registry.list()?;
        info!(count = branches.len(), "recovering branches from registry");

        for mut branch in branches {
            self.ports.reserve(branch.port);

            if matches!(branch.status, Status::Running | Status::Building) {
                match self.container.status(&branch.workspace_path).await {
                    Ok(statuses) => {
                        let any_running = statuses.iter().any(|s| s.state == ServiceState::Running);
                        let reconciled = if any_running {
                            Status::Running
                        } else {
                            Status::Stopped
                        };
                        if reconciled != branch.status {
                            info!(branch = %branch.name, from = %branch.status, to = %reconciled, "reconciling status on recovery");
                            branch.status = reconciled;
                            self.registry.save(&mut branch)?;
                        }
                    }
                    Err(err) => {
                        warn!(branch = %branch.name, error = %err, "could not query status during recovery");
                    }
                }
            }
        }
        Ok(())
    }

    /// Create a new branch: validate the credential, allocate a port,
    /// create the VCS branch, render the workspace, and persist the
    /// record. If `auto_start` is set, schedules a background build-and-up
    /// job and returns with `status = building`.
    ///
    /// # Errors
    /// See the error-kind table in [`crate::error::Error`]; on any failure
    /// after port allocation, the allocated resources are compensated
    /// (port released, VCS branch removed, partial workspace deleted)
    /// before the error is returned.
    pub async fn create(
        &self,
        name: &str,
        services: Vec<String>,
        api_key: &str,
        auto_start: bool,
    ) -> Result<Branch> {
        branch::validate_name(name)?;
        if api_key.is_empty() {
            return Err(Error::invalid_request("gemini_api_key must not be empty"));
        }
        if self.registry.exists(name) {
            return Err(Error::BranchAlreadyExists {
                name: name.to_string(),
            });
        }

        let lock = self.lock_for(name);
        let _guard = lock.lock().await;
        // Re-check under the lock: another request may have created this
        // branch between the unlocked check above and acquiring the lock.
        if self.registry.exists(name) {
            return Err(Error::BranchAlreadyExists {
                name: name.to_string(),
            });
        }

        // Step 1: validate credential.
        match self.credential.validate(api_key).await {
            Verdict::Ok => {}
            Verdict::Invalid => return Err(Error::CredentialInvalid),
            Verdict::TransientError => {
                return Err(Error::CredentialUnavailable {
                    message: "provider unreachable".to_string(),
                })
            }
        }

        // Step 2: allocate port.
        let port = self.ports.allocate()?;

        // Step 3: create VCS branch.
        if let Err(err) = self.vcs.create_branch(name).await {
            self.ports.release(port);
            return Err(err);
        }

        // Step 4: render workspace.
        let services_set: HashSet<String> = if services.is_empty() {
            ["app".to_string()].into_iter().collect()
        } else {
            services.into_iter().collect()
        };
        let workspace_path = self.registry.workspace_path(name);
        let substitutions = build_substitutions(name, port, api_key);

        if let Err(err) = TemplateRenderer::render(
            &self.config.template_root,
            &workspace_path,
            &substitutions,
            &services_set,
        ) {
            self.ports.release(port);
            self.vcs.delete_branch(name).await;
            let _ = std::fs::remove_dir_all(&workspace_path);
            return Err(err);
        }

        // Step 5: persist record.
        let mut ordered_services: Vec<String> = services_set.into_iter().collect();
        ordered_services.sort();
        let mut record = Branch::new(
            name.to_string(),
            port,
            workspace_path.clone(),
            ordered_services,
            true,
            Utc::now(),
        );

        if let Err(err) = self.registry.save(&mut record) {
            self.ports.release(port);
            self.vcs.delete_branch(name).await;
            let _ = std::fs::remove_dir_all(&workspace_path);
            return Err(err);
        }

        // Step 6: optionally schedule the background build-and-up job.
        if auto_start {
            record.status = Status::Building;
            self.registry.save(&mut record)?;
            self.spawn_build_job(name.to_string());
        }

        Ok(record)
    }

    fn spawn_build_job(&self, name: String) {
        let registry_root = self.registry.workspace_path(&name);
        let container = self.container.clone();
        let permits = self.build_permits.clone();
        // `Registry` holds no interior async state; cheap to open a second
        // handle at the same root for the background task.
        let registry = match Registry::new(
            registry_root
                .parent()
                .expect("workspace path always has a parent")
                .to_path_buf(),
        ) {
            Ok(r) => r,
            Err(err) => {
                error!(branch = %name, error = %err, "failed to open registry for build job");
                return;
            }
        };

        tokio::spawn(async move {
            let _permit = permits.acquire().await;
            let mut record = match registry.get(&name) {
                Ok(r) => r,
                Err(err) => {
                    error!(branch = %name, error = %err, "build job could not load branch record");
                    return;
                }
            };

            let result = async {
                container.build(&record.workspace_path).await?;
                container.up(&record.workspace_path, &[]).await
            }
            .await;

            match result {
                Ok(()) => {
                    record.status = Status::Running;
                    record.last_error = None;
                }
                Err(err) => {
                    error!(branch = %name, error = %err, "build-and-up job failed");
                    record.status = Status::Failed;
                    record.last_error = Some(err.to_string());
                }
            }

            if let Err(err) = registry.save(&mut record) {
                error!(branch = %name, error = %err, "failed to persist build job result");
            }
        });
    }

    /// Stop and remove the branch's containers, remove its VCS branch
    /// (best-effort), delete its workspace, and release its port.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let mut record = self.registry.get(name)?;
        record.status = Status::Deleting;
        self.registry.save(&mut record)?;

        if let Err(err) = self.container.down(&record.workspace_path).await {
            warn!(branch = %name, error = %err, "down failed during delete, continuing");
        }

        self.vcs.delete_branch(name).await;
        self.registry.delete(name)?;
        self.ports.release(record.port);

        Ok(())
    }

    /// Look up a single branch.
    pub fn get(&self, name: &str) -> Result<Branch> {
        self.registry.get(name)
    }

    /// List every registered branch.
    pub fn list(&self) -> Result<Vec<Branch>> {
        self.registry.list()
    }

    /// Start the branch's containers (or a subset of its services).
    /// Idempotent: starting an already-running branch is a no-op success.
    pub async fn start(&self, name: &str, services: Option<Vec<String>>) -> Result<Branch> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let mut record = self.registry.get(name)?;
        if matches!(record.status, Status::Deleting) {
            return Err(Error::invalid_state(name, record.status.to_string(), "start"));
        }

        let requested = services.unwrap_or_default();
        if let Some(unknown) = requested.iter().find(|s| !record.services.contains(s)) {
            return Err(Error::invalid_request(format!(
                "unknown service: {unknown}"
            )));
        }

        self.container.up(&record.workspace_path, &requested).await?;
        record.status = Status::Running;
        record.last_error = None;
        self.registry.save(&mut record)?;
        Ok(record)
    }

    /// Stop the branch's containers. Idempotent: stopping an already
    /// stopped branch is a no-op success.
    pub async fn stop(&self, name: &str) -> Result<Branch> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let mut record = self.registry.get(name)?;
        self.container.down(&record.workspace_path).await?;
        record.status = Status::Stopped;
        self.registry.save(&mut record)?;
        Ok(record)
    }

    /// Stop then start the branch's containers.
    pub async fn restart(&self, name: &str) -> Result<Branch> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let mut record = self.registry.get(name)?;
        self.container.restart(&record.workspace_path).await?;
        record.status = Status::Running;
        record.last_error = None;
        self.registry.save(&mut record)?;
        Ok(record)
    }

    /// Query per-service liveness for a branch.
    pub async fn status(&self, name: &str) -> Result<Vec<crate::container::ServiceStatus>> {
        let record = self.registry.get(name)?;
        self.container.status(&record.workspace_path).await
    }

    /// Fetch the last `lines` lines of combined stdout/stderr.
    pub async fn logs(&self, name: &str, lines: Option<u32>) -> Result<String> {
        let record = self.registry.get(name)?;
        self.container.logs(&record.workspace_path, lines).await
    }

    /// Start an interactive terminal session against the branch's primary
    /// service, requiring it to currently be running.
    pub async fn start_terminal_session(&self, name: &str) -> Result<Branch> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let mut record = self.registry.get(name)?;
        if record.status != Status::Running {
            return Err(Error::invalid_state(
                name,
                record.status.to_string(),
                "start a terminal session",
            ));
        }

        let manager =
            TerminalSessionManager::new(self.container.as_ref(), self.config.ttyd_command.clone());
        let session = manager
            .start(
                &record.workspace_path,
                PRIMARY_SERVICE,
                &self.config.host,
                record.derived_ttyd_port(),
            )
            .await?;

        record.ttyd_port = Some(session.port);
        record.terminal_session = Some(session);
        self.registry.save(&mut record)?;
        Ok(record)
    }
}

fn build_substitutions(name: &str, port: u16, api_key: &str) -> HashMap<String, String> {
    let mut substitutions = HashMap::new();
    substitutions.insert("BRANCH_NAME".to_string(), name.to_string());
    substitutions.insert("PORT".to_string(), port.to_string());
    substitutions.insert("PORT_TTYD".to_string(), (port + 1000).to_string());
    substitutions.insert("GEMINI_API_KEY".to_string(), api_key.to_string());
    substitutions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeContainerEngine, FakeCredentialValidator, FakeVcsAdapter};

    fn engine_with(
        workspaces_root: &std::path::Path,
        template_root: &std::path::Path,
        credential: Verdict,
    ) -> BranchEngine {
        let registry = Registry::new(workspaces_root).unwrap();
        let ports = PortAllocator::new(8001, 8999);
        let config = EngineConfig {
            template_root: template_root.to_path_buf(),
            host: "localhost".to_string(),
            ttyd_command: "gemini".to_string(),
            build_concurrency: 2,
        };
        BranchEngine::new(
            registry,
            ports,
            Arc::new(FakeCredentialValidator::new(credential)),
            Arc::new(FakeVcsAdapter::new()),
            Arc::new(FakeContainerEngine::new()),
            config,
        )
    }

    fn write_template(root: &std::path::Path) {
        std::fs::create_dir_all(root).unwrap();
        std::fs::write(
            root.join("docker-compose.branch.template.yaml"),
            "services:\n  app-{{BRANCH_NAME}}:\n    image: app\n    ports:\n      - \"{{PORT}}:8000\"\n",
        )
        .unwrap();
        std::fs::write(root.join(".env"), "PORT={{PORT}}\n").unwrap();
    }

    #[tokio::test]
    async fn create_persists_branch_with_default_service() {
        let workspaces_root = tempfile::tempdir().unwrap();
        let template_root = tempfile::tempdir().unwrap();
        write_template(template_root.path());

        let engine = engine_with(workspaces_root.path(), template_root.path(), Verdict::Ok);
        let branch = engine
            .create("alpha", vec![], "test-api-key-for-development", false)
            .await
            .unwrap();

        assert_eq!(branch.port, 8001);
        assert_eq!(branch.services, vec!["app".to_string()]);
        assert_eq!(branch.status, Status::Created);
    }

    #[tokio::test]
    async fn duplicate_create_is_conflict() {
        let workspaces_root = tempfile::tempdir().unwrap();
        let template_root = tempfile::tempdir().unwrap();
        write_template(template_root.path());

        let engine = engine_with(workspaces_root.path(), template_root.path(), Verdict::Ok);
        engine
            .create("alpha", vec![], "test-api-key-for-development", false)
            .await
            .unwrap();

        let err = engine
            .create("alpha", vec![], "test-api-key-for-development", false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BranchAlreadyExists { .. }));
    }

    #[tokio::test]
    async fn invalid_credential_leaves_no_port_allocated() {
        let workspaces_root = tempfile::tempdir().unwrap();
        let template_root = tempfile::tempdir().unwrap();
        write_template(template_root.path());

        let engine = engine_with(workspaces_root.path(), template_root.path(), Verdict::Invalid);
        let err = engine
            .create("alpha", vec![], "bad-key", false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CredentialInvalid));
        assert_eq!(engine.ports.in_use_count(), 0);
    }

    #[tokio::test]
    async fn unknown_service_creates_no_workspace_and_frees_port() {
        let workspaces_root = tempfile::tempdir().unwrap();
        let template_root = tempfile::tempdir().unwrap();
        write_template(template_root.path());

        let engine = engine_with(workspaces_root.path(), template_root.path(), Verdict::Ok);
        let err = engine
            .create(
                "gamma",
                vec!["app".to_string(), "nope".to_string()],
                "test-api-key-for-development",
                false,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
        assert!(!workspaces_root.path().join("gamma").exists());
        assert_eq!(engine.ports.in_use_count(), 0);
    }

    #[tokio::test]
    async fn delete_releases_port_and_removes_workspace() {
        let workspaces_root = tempfile::tempdir().unwrap();
        let template_root = tempfile::tempdir().unwrap();
        write_template(template_root.path());

        let engine = engine_with(workspaces_root.path(), template_root.path(), Verdict::Ok);
        engine
            .create("alpha", vec![], "test-api-key-for-development", false)
            .await
            .unwrap();

        engine.delete("alpha").await.unwrap();
        assert!(engine.get("alpha").is_err());
        assert_eq!(engine.ports.in_use_count(), 0);
    }

    #[tokio::test]
    async fn vcs_failure_after_port_allocation_releases_the_port() {
        let workspaces_root = tempfile::tempdir().unwrap();
        let template_root = tempfile::tempdir().unwrap();
        write_template(template_root.path());

        let registry = Registry::new(workspaces_root.path()).unwrap();
        let ports = PortAllocator::new(8001, 8999);
        let config = EngineConfig {
            template_root: template_root.path().to_path_buf(),
            host: "localhost".to_string(),
            ttyd_command: "gemini".to_string(),
            build_concurrency: 2,
        };
        let vcs = Arc::new(FakeVcsAdapter::new());
        *vcs.fail_create_for.lock().unwrap() = Some("alpha".to_string());

        let engine = BranchEngine::new(
            registry,
            ports,
            Arc::new(FakeCredentialValidator::new(Verdict::Ok)),
            vcs,
            Arc::new(FakeContainerEngine::new()),
            config,
        );

        let err = engine
            .create("alpha", vec![], "test-api-key-for-development", false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Vcs { .. }));
        assert_eq!(engine.ports.in_use_count(), 0);
        assert!(engine.get("alpha").is_err());
    }

    #[tokio::test]
    async fn stop_on_stopped_branch_is_idempotent() {
        let workspaces_root = tempfile::tempdir().unwrap();
        let template_root = tempfile::tempdir().unwrap();
        write_template(template_root.path());

        let engine = engine_with(workspaces_root.path(), template_root.path(), Verdict::Ok);
        engine
            .create("alpha", vec![], "test-api-key-for-development", false)
            .await
            .unwrap();
        engine.stop("alpha").await.unwrap();
        let branch = engine.stop("alpha").await.unwrap();
        assert_eq!(branch.status, Status::Stopped);
    }
}
