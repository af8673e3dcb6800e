//! Error types for the hovel crate.
//!
//! Every fallible public API returns [`Result<T>`], whose error variants
//! carry enough context to log, classify, and map onto an HTTP response
//! without re-deriving it at the call site.

use thiserror::Error;

/// Result type for hovel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for all hovel operations.
#[derive(Error, Debug)]
pub enum Error {
    /// No branch exists with the given name.
    #[error("branch not found: {name}")]
    BranchNotFound {
        /// The branch name that was looked up.
        name: String,
    },

    /// A branch with this name already exists.
    #[error("branch already exists: {name}")]
    BranchAlreadyExists {
        /// The branch name that collided.
        name: String,
    },

    /// The requested operation is not valid for the branch's current status.
    #[error("invalid state transition for {name}: cannot {action} while {status}")]
    InvalidState {
        /// The branch name.
        name: String,
        /// The status the branch was in.
        status: String,
        /// The operation that was attempted.
        action: String,
    },

    /// The port range is exhausted; no free port remains.
    #[error("no free port available in range {start}-{end}")]
    PortsExhausted {
        /// Lower bound of the configured range.
        start: u16,
        /// Upper bound of the configured range.
        end: u16,
    },

    /// The supplied AI-provider credential failed validation.
    #[error("credential rejected by provider")]
    CredentialInvalid,

    /// Credential validation could not reach the provider (network/5xx).
    #[error("credential validation unavailable: {message}")]
    CredentialUnavailable {
        /// Description of the transient failure.
        message: String,
    },

    /// A `docker compose` (or other container engine) invocation failed.
    #[error("container engine command failed: {command}")]
    CommandFailed {
        /// The command line that was run, joined for display.
        command: String,
        /// Exit code returned by the process.
        exit_code: i32,
        /// Captured standard output (tail).
        stdout: String,
        /// Captured standard error (tail).
        stderr: String,
    },

    /// A container engine or VCS invocation did not complete within its budget.
    #[error("operation timed out after {timeout_secs}s: {operation}")]
    Timeout {
        /// What was being waited on.
        operation: String,
        /// The budget that was exceeded.
        timeout_secs: u64,
    },

    /// A required binary (container engine, git, ttyd) is not on PATH.
    #[error("required binary not found: {binary}")]
    BinaryNotFound {
        /// The binary name that could not be located.
        binary: String,
    },

    /// The template repository is missing a file or directory it must have.
    #[error("template error: {message}")]
    Template {
        /// Description of the missing or malformed template content.
        message: String,
    },

    /// A VCS (git) operation failed. VCS failures are advisory per spec and
    /// are surfaced but never block branch lifecycle transitions.
    #[error("vcs operation failed: {message}")]
    Vcs {
        /// Description of the failure.
        message: String,
    },

    /// The on-disk registry sidecar is missing, unreadable, or malformed.
    #[error("registry error: {message}")]
    Registry {
        /// Description of the registry failure.
        message: String,
    },

    /// A request supplied invalid input (bad branch name, missing field).
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Description of the validation failure.
        message: String,
    },

    /// Invalid configuration (environment variables failed to parse).
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration issue.
        message: String,
    },

    /// Underlying I/O error.
    #[error("io error: {message}")]
    Io {
        /// Human-readable context.
        message: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialization error.
    #[error("json error: {message}")]
    Json {
        /// Human-readable context.
        message: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// YAML (de)serialization error, from compose-spec rendering.
    #[error("yaml error: {message}")]
    Yaml {
        /// Human-readable context.
        message: String,
        /// The underlying YAML error.
        #[source]
        source: serde_yaml::Error,
    },
}

impl Error {
    /// Build a [`Error::CommandFailed`].
    pub fn command_failed(
        command: impl Into<String>,
        exit_code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::CommandFailed {
            command: command.into(),
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Build a [`Error::Timeout`].
    pub fn timeout(operation: impl Into<String>, timeout_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_secs,
        }
    }

    /// Build a [`Error::InvalidState`].
    pub fn invalid_state(
        name: impl Into<String>,
        status: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            name: name.into(),
            status: status.into(),
            action: action.into(),
        }
    }

    /// Build a [`Error::Template`].
    pub fn template(message: impl Into<String>) -> Self {
        Self::Template {
            message: message.into(),
        }
    }

    /// Build a [`Error::Vcs`].
    pub fn vcs(message: impl Into<String>) -> Self {
        Self::Vcs {
            message: message.into(),
        }
    }

    /// Build a [`Error::Registry`].
    pub fn registry(message: impl Into<String>) -> Self {
        Self::Registry {
            message: message.into(),
        }
    }

    /// Build a [`Error::InvalidRequest`].
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Build a [`Error::InvalidConfig`].
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Classify the error for logging and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::BranchNotFound { .. } | Self::BranchAlreadyExists { .. } => "branch",
            Self::InvalidState { .. } => "state",
            Self::PortsExhausted { .. } => "ports",
            Self::CredentialInvalid | Self::CredentialUnavailable { .. } => "credential",
            Self::CommandFailed { .. } | Self::Timeout { .. } | Self::BinaryNotFound { .. } => {
                "engine"
            }
            Self::Template { .. } => "template",
            Self::Vcs { .. } => "vcs",
            Self::Registry { .. } => "registry",
            Self::InvalidRequest { .. } | Self::InvalidConfig { .. } => "request",
            Self::Io { .. } => "io",
            Self::Json { .. } | Self::Yaml { .. } => "parsing",
        }
    }

    /// Whether retrying the same operation might succeed without operator
    /// intervention. Used by the credential validator and background jobs.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CommandFailed { .. }
                | Self::Timeout { .. }
                | Self::CredentialUnavailable { .. }
                | Self::Io { .. }
        )
    }

    /// HTTP status code this error maps to on the control API, per the
    /// error-kind table in the engine's design notes.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BranchNotFound { .. } => 404,
            Self::BranchAlreadyExists { .. } => 409,
            Self::InvalidState { .. } => 409,
            Self::PortsExhausted { .. } => 503,
            Self::CredentialInvalid => 401,
            Self::CredentialUnavailable { .. } => 503,
            Self::InvalidRequest { .. } | Self::InvalidConfig { .. } => 400,
            Self::BinaryNotFound { .. }
            | Self::CommandFailed { .. }
            | Self::Timeout { .. }
            | Self::Template { .. }
            | Self::Vcs { .. }
            | Self::Registry { .. }
            | Self::Io { .. }
            | Self::Json { .. }
            | Self::Yaml { .. } => 500,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
            source: err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories() {
        assert_eq!(
            Error::BranchNotFound { name: "x".into() }.category(),
            "branch"
        );
        assert_eq!(
            Error::command_failed("docker compose up", 1, "", "").category(),
            "engine"
        );
        assert_eq!(Error::CredentialInvalid.category(), "credential");
    }

    #[test]
    fn retryable() {
        assert!(Error::command_failed("x", 1, "", "").is_retryable());
        assert!(Error::timeout("build", 600).is_retryable());
        assert!(!Error::CredentialInvalid.is_retryable());
        assert!(!Error::invalid_config("bad").is_retryable());
    }

    #[test]
    fn status_codes() {
        assert_eq!(Error::BranchNotFound { name: "x".into() }.status_code(), 404);
        assert_eq!(
            Error::BranchAlreadyExists { name: "x".into() }.status_code(),
            409
        );
        assert_eq!(Error::CredentialInvalid.status_code(), 401);
        assert_eq!(
            Error::PortsExhausted { start: 1, end: 2 }.status_code(),
            503
        );
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "nope");
        let err: Error = io_err.into();
        assert_eq!(err.category(), "io");
    }
}
