//! Version-control branch management against the controller's own working
//! tree.
//!
//! All operations run under the controller-wide lock in [`GitVcsAdapter`]:
//! checking out a branch mutates the shared working tree, so two concurrent
//! VCS operations are unsafe regardless of which branches they touch.

use std::time::Duration;

use tokio::sync::Mutex;

use crate::error::Result;
use crate::executor::Executor;

const VCS_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates and removes version-control branches. A trait so `BranchEngine`
/// can be exercised in tests against an in-memory fake.
#[async_trait::async_trait]
pub trait VcsAdapter: Send + Sync {
    /// Create `name` from the current head and check it out.
    ///
    /// # Errors
    /// Returns [`crate::error::Error::Vcs`] if the branch already exists or
    /// the working tree is not a repository.
    async fn create_branch(&self, name: &str) -> Result<()>;

    /// Best-effort removal of `name`. Absence of the branch is not an
    /// error.
    async fn delete_branch(&self, name: &str);
}

/// Shells out to the `git` binary, serialized by a single mutex since
/// checkout is a global mutation of the working tree.
pub struct GitVcsAdapter {
    repo_root: std::path::PathBuf,
    executor: Executor,
    lock: Mutex<()>,
}

impl GitVcsAdapter {
    /// Operate against the git repository rooted at `repo_root`.
    pub fn new(repo_root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            executor: Executor::new(),
            lock: Mutex::new(()),
        }
    }
}

#[async_trait::async_trait]
impl VcsAdapter for GitVcsAdapter {
    async fn create_branch(&self, name: &str) -> Result<()> {
        let _guard = self.lock.lock().await;

        self.executor
            .run(
                "git",
                &["branch", name],
                Some(&self.repo_root),
                VCS_TIMEOUT,
            )
            .await
            .map_err(|err| crate::error::Error::vcs(format!("create branch {name}: {err}")))?;

        self.executor
            .run(
                "git",
                &["checkout", name],
                Some(&self.repo_root),
                VCS_TIMEOUT,
            )
            .await
            .map_err(|err| crate::error::Error::vcs(format!("checkout {name}: {err}")))?;

        Ok(())
    }

    async fn delete_branch(&self, name: &str) {
        let _guard = self.lock.lock().await;
        let _ = self
            .executor
            .run(
                "git",
                &["branch", "-D", name],
                Some(&self.repo_root),
                VCS_TIMEOUT,
            )
            .await;
    }
}
