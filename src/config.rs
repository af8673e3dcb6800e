//! Environment-driven configuration.
//!
//! Every knob has a sensible default and an explicit environment-variable
//! override, read once at startup.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Runtime configuration for the control plane, loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP port the control API listens on. `HOVEL_PORT`.
    pub hovel_port: u16,
    /// Bind address for the control API listener. `HOVEL_HOST`.
    pub hovel_host: String,
    /// Root directory of the app template to render into new workspaces.
    /// `APP_TEMPLATE_PATH`.
    pub app_template_path: PathBuf,
    /// Root directory under which each branch gets its own workspace
    /// directory. `WORKSPACES_ROOT`.
    pub workspaces_root: PathBuf,
    /// Lower bound (inclusive) of the branch port range. `BASE_BRANCH_PORT`.
    pub base_branch_port: u16,
    /// Upper bound (inclusive) of the branch port range. `MAX_BRANCH_PORT`.
    pub max_branch_port: u16,
    /// Maximum number of concurrent build-and-up jobs. `BUILD_CONCURRENCY`.
    pub build_concurrency: usize,
    /// Per-build timeout, seconds. `BUILD_TIMEOUT_SEC`.
    pub build_timeout_sec: u64,
    /// Command ttyd should run inside the container on terminal open.
    /// `TTYD_COMMAND`.
    pub ttyd_command: String,
    /// `tracing-subscriber` env-filter directive. `RUST_LOG`.
    pub rust_log: String,
}

impl Config {
    /// Load configuration from the process environment, applying defaults
    /// for anything unset.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if a numeric variable is set but
    /// fails to parse, or if `base_branch_port >= max_branch_port`.
    pub fn from_env() -> Result<Self> {
        let hovel_port = parse_env_or("HOVEL_PORT", 8000)?;
        let hovel_host = std::env::var("HOVEL_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let app_template_path = std::env::var("APP_TEMPLATE_PATH")
            .unwrap_or_else(|_| "/opt/hovel-templates/app-template".to_string())
            .into();
        let workspaces_root = std::env::var("WORKSPACES_ROOT")
            .unwrap_or_else(|_| "./branches".to_string())
            .into();
        let base_branch_port = parse_env_or("BASE_BRANCH_PORT", 8001)?;
        let max_branch_port = parse_env_or("MAX_BRANCH_PORT", 8999)?;
        let build_concurrency = parse_env_or("BUILD_CONCURRENCY", 4usize)?;
        let build_timeout_sec = parse_env_or("BUILD_TIMEOUT_SEC", 600u64)?;
        let ttyd_command = std::env::var("TTYD_COMMAND").unwrap_or_else(|_| "gemini".to_string());
        let rust_log = std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "hovel=info,tower_http=info".to_string());

        if base_branch_port >= max_branch_port {
            return Err(Error::invalid_config(format!(
                "BASE_BRANCH_PORT ({base_branch_port}) must be less than MAX_BRANCH_PORT ({max_branch_port})"
            )));
        }

        Ok(Self {
            hovel_port,
            hovel_host,
            app_template_path,
            workspaces_root,
            base_branch_port,
            max_branch_port,
            build_concurrency,
            build_timeout_sec,
            ttyd_command,
            rust_log,
        })
    }
}

fn parse_env_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| Error::invalid_config(format!("{key}={raw:?} is invalid: {e}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "HOVEL_PORT",
            "HOVEL_HOST",
            "APP_TEMPLATE_PATH",
            "WORKSPACES_ROOT",
            "BASE_BRANCH_PORT",
            "MAX_BRANCH_PORT",
            "BUILD_CONCURRENCY",
            "BUILD_TIMEOUT_SEC",
            "TTYD_COMMAND",
            "RUST_LOG",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn defaults_when_unset() {
        clear_env();
        let config = Config::from_env().unwrap();
        assert_eq!(config.hovel_port, 8000);
        assert_eq!(config.app_template_path, std::path::PathBuf::from(
            "/opt/hovel-templates/app-template"
        ));
        assert_eq!(config.workspaces_root, std::path::PathBuf::from("./branches"));
        assert_eq!(config.base_branch_port, 8001);
        assert_eq!(config.max_branch_port, 8999);
        assert_eq!(config.build_concurrency, 4);
        assert_eq!(config.ttyd_command, "gemini");
    }

    #[test]
    #[serial]
    fn rejects_inverted_port_range() {
        clear_env();
        std::env::set_var("BASE_BRANCH_PORT", "9000");
        std::env::set_var("MAX_BRANCH_PORT", "8000");
        let err = Config::from_env().unwrap_err();
        assert_eq!(err.category(), "request");
        clear_env();
    }

    #[test]
    #[serial]
    fn rejects_unparseable_numeric() {
        clear_env();
        std::env::set_var("BUILD_CONCURRENCY", "not-a-number");
        assert!(Config::from_env().is_err());
        clear_env();
    }
}
