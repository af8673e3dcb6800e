//! The `Branch` entity: the unit of isolation this crate manages.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,62}$").expect("valid regex"));

/// Validate a branch name against `^[A-Za-z0-9][A-Za-z0-9_-]{0,62}$`.
///
/// # Errors
/// Returns [`Error::InvalidRequest`] if the name does not match.
pub fn validate_name(name: &str) -> Result<()> {
    if NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(Error::invalid_request(format!(
            "invalid branch name: {name:?}"
        )))
    }
}

/// Lifecycle status of a branch. See the state machine in [`crate::engine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Workspace rendered and persisted, container group not yet started.
    Created,
    /// A build-and-up job is in flight.
    Building,
    /// At least one container from the group is reported up.
    Running,
    /// The container group has been stopped.
    Stopped,
    /// The most recent build or start attempt failed.
    Failed,
    /// The branch is being torn down.
    Deleting,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Created => "created",
            Status::Building => "building",
            Status::Running => "running",
            Status::Stopped => "stopped",
            Status::Failed => "failed",
            Status::Deleting => "deleting",
        };
        f.write_str(s)
    }
}

/// A running (or just-started) interactive terminal session attached to a
/// branch's primary service container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalSession {
    /// Host port the terminal is reachable on (`branch.port + 1000`).
    pub port: u16,
    /// Fully-qualified URL a client can open the terminal at.
    pub url: String,
    /// When the session was started.
    pub started_at: DateTime<Utc>,
    /// The full command line that was launched inside the container.
    pub command: String,
}

/// The persisted record for one branch. Serialized verbatim as the `.branch`
/// sidecar file; this struct *is* the wire and storage format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    /// Unique identifier; also the VCS branch name and workspace dir name.
    pub name: String,
    /// Host port allocated to this branch's primary service.
    pub port: u16,
    /// Host port for the terminal session, present only while one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttyd_port: Option<u16>,
    /// Absolute path to the branch's workspace directory.
    pub workspace_path: std::path::PathBuf,
    /// Services from the template included in this branch's container group.
    pub services: Vec<String>,
    /// Current lifecycle state.
    pub status: Status,
    /// When the branch was created.
    pub created_at: DateTime<Utc>,
    /// Bumped on every registry save.
    pub updated_at: DateTime<Utc>,
    /// Whether the supplied credential verified successfully at creation.
    pub credential_validated: bool,
    /// The active terminal session, if one has been started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_session: Option<TerminalSession>,
    /// The most recent failure message, cleared on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Branch {
    /// Build a freshly-created branch record in `Status::Created`.
    pub fn new(
        name: String,
        port: u16,
        workspace_path: std::path::PathBuf,
        services: Vec<String>,
        credential_validated: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            name,
            port,
            ttyd_port: None,
            workspace_path,
            services,
            status: Status::Created,
            created_at: now,
            updated_at: now,
            credential_validated,
            terminal_session: None,
            last_error: None,
        }
    }

    /// The derived terminal port, regardless of whether a session is active.
    pub fn derived_ttyd_port(&self) -> u16 {
        self.port + 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_names() {
        assert!(validate_name("alpha").is_ok());
        assert!(validate_name("a").is_ok());
        assert!(validate_name("feature-123_x").is_ok());
        assert!(validate_name(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn rejects_invalid_names() {
        assert!(validate_name("").is_err());
        assert!(validate_name("-leading-dash").is_err());
        assert!(validate_name("_leading-underscore").is_err());
        assert!(validate_name("has space").is_err());
        assert!(validate_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn derived_ttyd_port_is_offset_by_1000() {
        let branch = Branch::new(
            "alpha".into(),
            8001,
            "/tmp/alpha".into(),
            vec!["app".into()],
            true,
            Utc::now(),
        );
        assert_eq!(branch.derived_ttyd_port(), 9001);
    }
}
