//! MCP client supervisor
//!
//! Maintains one connected session per configured MCP server, exposes the
//! discovered tools/prompts/resources, publishes state changes on the `mcp`
//! topic, and reconnects transparently when a health probe fails.

mod session;
mod supervisor;
mod tool_adapter;

pub use session::{McpPrompt, McpResource, McpSession, McpToolDef};
pub use supervisor::{McpServerInfo, McpSupervisor, ServerHandle};
pub use tool_adapter::McpToolAdapter;

use serde::{Deserialize, Serialize};

/// Lifecycle of one configured server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpState {
    Disabled,
    Starting,
    Connected,
    Error,
}

impl std::fmt::Display for McpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            McpState::Disabled => write!(f, "disabled"),
            McpState::Starting => write!(f, "starting"),
            McpState::Connected => write!(f, "connected"),
            McpState::Error => write!(f, "error"),
        }
    }
}

/// Errors from the MCP subsystem
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    #[error("server '{0}' timed out")]
    Timeout(String),

    #[error("server '{0}' is disabled")]
    Disabled(String),

    #[error("unknown server '{0}'")]
    UnknownServer(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Shutdown noise that does not deserve surfacing: the far side closing
    /// first produces EOF/cancel errors.
    pub fn is_benign_shutdown(&self) -> bool {
        let text = self.to_string().to_lowercase();
        text.contains("eof")
            || text.contains("cancel")
            || text.contains("closed")
            || text.contains("broken pipe")
    }
}
