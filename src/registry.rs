//! Filesystem-backed storage for branch records.
//!
//! `workspaces_root/<name>/.branch` holds one branch's JSON record. Writes
//! go through a sibling temp file and `rename` so a crash mid-write never
//! leaves a corrupt sidecar.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::warn;

use crate::branch::Branch;
use crate::error::{Error, Result};

const SIDECAR_NAME: &str = ".branch";

/// Scans and persists `Branch` records under a single root directory.
pub struct Registry {
    workspaces_root: PathBuf,
}

impl Registry {
    /// Point a registry at `workspaces_root`. The directory is created if
    /// it does not yet exist.
    pub fn new(workspaces_root: impl Into<PathBuf>) -> Result<Self> {
        let workspaces_root = workspaces_root.into();
        std::fs::create_dir_all(&workspaces_root)?;
        Ok(Self { workspaces_root })
    }

    /// The workspace directory a branch named `name` would live in,
    /// regardless of whether it currently exists.
    pub fn workspace_path(&self, name: &str) -> PathBuf {
        self.workspaces_root.join(name)
    }

    fn sidecar_path(&self, name: &str) -> PathBuf {
        self.workspace_path(name).join(SIDECAR_NAME)
    }

    /// Look up a single branch by name.
    ///
    /// # Errors
    /// Returns [`Error::BranchNotFound`] if no `.branch` sidecar exists.
    pub fn get(&self, name: &str) -> Result<Branch> {
        let path = self.sidecar_path(name);
        let contents = std::fs::read(&path).map_err(|_| Error::BranchNotFound {
            name: name.to_string(),
        })?;
        let branch: Branch = serde_json::from_slice(&contents)?;
        Ok(branch)
    }

    /// Whether a branch with this name is currently registered.
    pub fn exists(&self, name: &str) -> bool {
        self.sidecar_path(name).is_file()
    }

    /// Persist `branch`, bumping `updated_at`, via write-temp-then-rename.
    ///
    /// # Errors
    /// Returns [`Error::Io`] on any filesystem failure; the sidecar is left
    /// untouched if the write fails before the rename.
    pub fn save(&self, branch: &mut Branch) -> Result<()> {
        branch.updated_at = Utc::now();
        let dir = self.workspace_path(&branch.name);
        std::fs::create_dir_all(&dir)?;

        let final_path = dir.join(SIDECAR_NAME);
        let tmp_path = dir.join(format!("{SIDECAR_NAME}.tmp"));

        let serialized = serde_json::to_vec_pretty(branch)?;
        std::fs::write(&tmp_path, &serialized)?;
        std::fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    /// Remove a branch's entire workspace directory tree. Missing paths are
    /// not an error.
    pub fn delete(&self, name: &str) -> Result<()> {
        let dir = self.workspace_path(name);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::from(err)),
        }
    }

    /// Enumerate every registered branch by scanning `workspaces_root`.
    /// Subdirectories without a readable, parseable sidecar are skipped and
    /// warn-logged, never fatal.
    pub fn list(&self) -> Result<Vec<Branch>> {
        let mut branches = Vec::new();
        let entries = match std::fs::read_dir(&self.workspaces_root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(branches),
            Err(err) => return Err(Error::from(err)),
        };

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match self.read_sidecar(&entry.path()) {
                Ok(branch) => branches.push(branch),
                Err(err) => {
                    warn!(branch = %name, error = %err, "skipping unreadable branch sidecar");
                }
            }
        }

        Ok(branches)
    }

    fn read_sidecar(&self, workspace_dir: &Path) -> Result<Branch> {
        let contents = std::fs::read(workspace_dir.join(SIDECAR_NAME))?;
        let branch: Branch = serde_json::from_slice(&contents)?;
        Ok(branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::Status;

    fn sample(name: &str, port: u16, root: &Path) -> Branch {
        Branch::new(
            name.to_string(),
            port,
            root.join(name),
            vec!["app".into()],
            true,
            Utc::now(),
        )
    }

    #[test]
    fn save_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path()).unwrap();
        let mut branch = sample("alpha", 8001, dir.path());
        registry.save(&mut branch).unwrap();

        let loaded = registry.get("alpha").unwrap();
        assert_eq!(loaded.name, "alpha");
        assert_eq!(loaded.port, 8001);
        assert_eq!(loaded.status, Status::Created);
    }

    #[test]
    fn get_missing_branch_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path()).unwrap();
        let err = registry.get("nope").unwrap_err();
        assert!(matches!(err, Error::BranchNotFound { .. }));
    }

    #[test]
    fn list_skips_unreadable_entries() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path()).unwrap();

        let mut good = sample("alpha", 8001, dir.path());
        registry.save(&mut good).unwrap();

        std::fs::create_dir_all(dir.path().join("broken")).unwrap();
        std::fs::write(dir.path().join("broken/.branch"), b"not json").unwrap();

        let branches = registry.list().unwrap();
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0].name, "alpha");
    }

    #[test]
    fn delete_removes_workspace_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path()).unwrap();
        let mut branch = sample("alpha", 8001, dir.path());
        registry.save(&mut branch).unwrap();

        registry.delete("alpha").unwrap();
        assert!(!registry.exists("alpha"));
        registry.delete("alpha").unwrap();
    }

    #[test]
    fn save_bumps_updated_at() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path()).unwrap();
        let mut branch = sample("alpha", 8001, dir.path());
        let original = branch.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        registry.save(&mut branch).unwrap();
        assert!(branch.updated_at >= original);
    }
}
