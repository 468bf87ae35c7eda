//! # jig-core
//!
//! The core runtime of the `jig` interactive coding agent: a long-running
//! process mediating between a developer, remote LLM backends, and a local
//! execution sandbox (filesystem, shell, MCP and LSP servers).
//!
//! The pieces:
//!
//! - [`types`]: the conversation data model (messages, parts, tool pairing)
//! - [`provider`]: one client per wire dialect behind a common streaming
//!   interface, with the uniform retry policy
//! - [`normalize`]: send-time repair of ragged conversation logs
//! - [`tool`] + [`schema`]: the tool trait, registry and tagged parameter
//!   schemas shared by built-in and MCP tools
//! - [`permission`]: capability gating for side-effecting tool calls
//! - [`mcp`] / [`lsp`]: supervisors for subordinate tool servers
//! - [`agent`]: the turn state machine
//! - [`events`]: the typed pub/sub broker feeding UIs
//! - [`session`]: the persistence facade over external stores
//! - [`runtime`]: the explicitly constructed object tying it together
//!
//! Built-in tools (shell, view, edit, grep, …) live in the `jig-tools`
//! crate; the terminal UI, config parsing and on-disk persistence are
//! external collaborators consumed through traits.
//!
//! # Example
//!
//! ```no_run
//! use jig_core::{Config, Runtime};
//!
//! # async fn run(config: Config) -> jig_core::Result<()> {
//! let runtime = Runtime::builder(config).workspace_root("/work").build().await?;
//! runtime.start().await;
//!
//! let session = runtime.sessions().create_session("/work").await?;
//! let reply = runtime.submit("coder", &session.id, "list files in /tmp", vec![]).await?;
//! println!("{}", reply.text());
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod cancel;
pub mod config;
pub mod error;
pub mod events;
pub mod lsp;
pub mod mcp;
pub mod normalize;
pub mod permission;
pub mod provider;
pub mod resolver;
pub mod runtime;
pub mod schema;
pub mod session;
pub mod tool;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use cancel::RunContext;
pub use config::{
    AgentConfig, CompactionMethod, Config, LspServerConfig, McpServerConfig, McpTransport,
    ModelDescriptor, ModelType, ProviderConfig, ProviderDialect, RuntimeOptions, SelectedModel,
    SelectedModels,
};
pub use error::{Error, Result};
pub use events::{Broker, ContentEvent, Event, McpEvent, PermissionEvent, Subscription, ToolEvent, Topic};
pub use permission::{PermissionDecision, PermissionPolicy, PermissionRequest, PermissionService};
pub use provider::{Provider, ProviderError, ProviderEvent, ProviderResponse};
pub use runtime::{Runtime, RuntimeBuilder};
pub use schema::Schema;
pub use session::{Session, SessionFacade, SessionStore};
pub use tool::{Tool, ToolCallInput, ToolError, ToolInfo, ToolOutput, ToolRegistry};
pub use types::{FinishReason, Message, Part, Role, TokenUsage, ToolCallPart, ToolResultPart};
