//! Starts one-shot web-terminal sessions inside a running branch.
//!
//! `ttyd -o` runs in the foreground until a client connects and later
//! disconnects, so it is launched detached rather than awaited: awaiting it
//! would block the caller for the session's entire lifetime. Sessions are
//! not tracked for liveness beyond the record written into the branch's
//! sidecar; a stale record is expected and simply overwritten by the next
//! `start`.

use chrono::Utc;

use crate::branch::TerminalSession;
use crate::container::ContainerEngine;
use crate::error::Result;

/// Launches `ttyd` inside a branch's primary service container.
pub struct TerminalSessionManager<'a> {
    container: &'a dyn ContainerEngine,
    tool_command: String,
}

impl<'a> TerminalSessionManager<'a> {
    /// Build a manager that runs `tool_command` inside ttyd on session
    /// start.
    pub fn new(container: &'a dyn ContainerEngine, tool_command: String) -> Self {
        Self {
            container,
            tool_command,
        }
    }

    /// Start a terminal session against `workspace`'s primary service,
    /// exposing it on `ttyd_port`. Launches `ttyd` detached: the call
    /// returns once the process has been started, not once it exits.
    ///
    /// # Errors
    /// Returns [`crate::error::Error::CommandFailed`] if `ttyd` could not
    /// be launched inside the container.
    pub async fn start(
        &self,
        workspace: &std::path::Path,
        primary_service: &str,
        host: &str,
        ttyd_port: u16,
    ) -> Result<TerminalSession> {
        let command = format!("ttyd -o -W -p {ttyd_port} {}", self.tool_command);
        let args: Vec<String> = vec![
            "ttyd".to_string(),
            "-o".to_string(),
            "-W".to_string(),
            "-p".to_string(),
            ttyd_port.to_string(),
            self.tool_command.clone(),
        ];

        self.container
            .exec_detached(workspace, primary_service, &args)
            .await?;

        Ok(TerminalSession {
            port: ttyd_port,
            url: format!("http://{host}:{ttyd_port}"),
            started_at: Utc::now(),
            command,
        })
    }
}
