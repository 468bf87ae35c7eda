//! Wire client for the Anthropic Messages API dialect.
//!
//! This crate is the transport layer only: request/response types, SSE
//! streaming, error classification, and endpoint rewriting for the three
//! places the dialect is served (direct API, AWS Bedrock, Google Vertex).
//! Retry policy, conversation shaping and credential refresh live in
//! `jig-core`, which consumes this crate.
//!
//! # Example
//!
//! ```no_run
//! use jig_anthropic_sdk::{Anthropic, ContentBlockParam, MessageCreateParams, MessageParam};
//!
//! # async fn run() -> Result<(), jig_anthropic_sdk::AnthropicError> {
//! let client = Anthropic::new("sk-ant-...")?;
//! let mut params = MessageCreateParams::new("claude-sonnet-4-20250514", 1024);
//! params.messages.push(MessageParam::user(vec![ContentBlockParam::text("Hello!")]));
//! let message = client.create("claude-sonnet-4-20250514", params).await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod messages;
mod streaming;

pub use client::{Anthropic, AnthropicBuilder, Auth, Endpoint};
pub use error::{AnthropicError, ApiError, ApiErrorResponse};
pub use messages::{
    CacheControl, ContentBlock, ContentBlockParam, ImageSource, Message, MessageCreateParams,
    MessageParam, Role, StopReason, SystemBlock, ThinkingParam, Tool, Usage,
};
pub use streaming::{
    ContentBlockDelta, DeltaUsage, MessageDeltaData, MessageStream, MessageStreamEvent,
};
