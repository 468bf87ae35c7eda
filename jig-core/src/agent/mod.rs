//! The turn state machine
//!
//! Idle → Preparing → Streaming → AwaitingTool → Streaming … → Finished.
//! Preparing assembles the prompt and tool list; Streaming folds provider
//! events into an in-progress assistant message; AwaitingTool executes
//! finished tool calls sequentially under permission. The loop re-enters
//! Preparing after tool results until the model stops with a non-tool
//! finish reason.

mod compact;
mod prompt;
mod run;
mod task_tool;

pub use compact::{estimate_tokens, CompactionOutcome};
pub use prompt::system_prompt;
pub(crate) use run::run_turn;
pub use task_tool::AgentTool;

use crate::provider::ProviderError;
use crate::session::SessionError;
use thiserror::Error;

/// Errors surfaced by the agent loop
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("no model selected for {0}")]
    NoModel(String),

    #[error("{0}")]
    Internal(String),
}
