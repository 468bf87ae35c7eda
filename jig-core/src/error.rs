//! Top-level error type
//!
//! Flattens the per-subsystem errors into the categories callers act on.
//! The CLI collaborator maps these onto its exit codes via
//! [`Error::exit_code`].

use crate::agent::AgentError;
use crate::lsp::LspError;
use crate::mcp::McpError;
use crate::provider::ProviderError;
use crate::session::SessionError;
use crate::tool::ToolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Authentication failed (invalid or expired credentials)
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Rate limited after exhausting retries
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Network connectivity issue
    #[error("network error: {0}")]
    Network(String),

    /// Model-side failure (refusal, malformed response, context)
    #[error("model error: {0}")]
    Model(String),

    /// Tool execution failed
    #[error("tool error: {0}")]
    Tool(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// No enabled provider is configured; the runtime refuses to start
    #[error("no provider configured")]
    NoProvider,

    /// Session storage error
    #[error("session error: {0}")]
    Session(String),

    /// MCP subsystem error
    #[error("mcp error: {0}")]
    Mcp(String),

    /// LSP subsystem error
    #[error("lsp error: {0}")]
    Lsp(String),

    /// User-initiated cancellation; orderly, never surfaced as a failure
    #[error("canceled")]
    Canceled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Exit code for a CLI driving the runtime: 0 success, 1 usage,
    /// 2 config, 3 no provider, 4 unrecoverable runtime error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) => 2,
            Error::NoProvider => 3,
            Error::Canceled => 0,
            _ => 4,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Auth(_))
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }
}

impl From<ProviderError> for Error {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Authentication(msg) => Error::Auth(msg),
            ProviderError::RateLimited { message, .. } => Error::RateLimited(message),
            ProviderError::RetriesExhausted(msg) => Error::RateLimited(msg),
            ProviderError::Network(msg) => Error::Network(msg),
            ProviderError::Overloaded(msg) => Error::Network(msg),
            ProviderError::Configuration(msg) => Error::Config(msg),
            ProviderError::Canceled => Error::Canceled,
            other => Error::Model(other.to_string()),
        }
    }
}

impl From<AgentError> for Error {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Provider(e) => e.into(),
            AgentError::Session(e) => e.into(),
            AgentError::UnknownAgent(name) => Error::Config(format!("unknown agent: {}", name)),
            AgentError::NoModel(which) => Error::Config(format!("no model selected for {}", which)),
            AgentError::Internal(msg) => Error::Other(msg),
        }
    }
}

impl From<SessionError> for Error {
    fn from(err: SessionError) -> Self {
        Error::Session(err.to_string())
    }
}

impl From<McpError> for Error {
    fn from(err: McpError) -> Self {
        Error::Mcp(err.to_string())
    }
}

impl From<LspError> for Error {
    fn from(err: LspError) -> Self {
        Error::Lsp(err.to_string())
    }
}

impl From<ToolError> for Error {
    fn from(err: ToolError) -> Self {
        Error::Tool(err.to_string())
    }
}

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, Error>;
