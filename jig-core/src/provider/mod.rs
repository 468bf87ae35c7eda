//! Model providers
//!
//! One [`Provider`] implementation per wire dialect hides each vendor's
//! quirks behind a common streaming interface. Providers are constructed
//! once per configured backend and shared across sessions.

pub mod anthropic;
pub mod google;
pub mod openai;
pub mod retry;

use crate::cancel::RunContext;
use crate::config::{ModelDescriptor, SelectedModel};
use crate::tool::ToolInfo;
use crate::types::{FinishReason, Message, TokenUsage, ToolCallPart};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::time::Duration;

pub use anthropic::AnthropicProvider;
pub use google::GoogleProvider;
pub use openai::OpenAiProvider;
pub use retry::{with_retry, RetryConfig, RetryState};

/// A finite, non-restartable sequence of streaming events
pub type ProviderEventStream = BoxStream<'static, Result<ProviderEvent, ProviderError>>;

/// Events from a streaming model response, in arrival order
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    ContentStart,
    ContentDelta(String),
    ContentStop,
    ThinkingDelta(String),
    /// Replaces (never extends) the reasoning signature accumulated so far
    SignatureDelta(String),
    ToolUseStart {
        id: String,
        name: String,
    },
    ToolUseDelta {
        id: String,
        partial_json: String,
    },
    ToolUseStop {
        id: String,
    },
    /// Terminal event carrying the folded response
    Complete(ProviderResponse),
}

/// A complete (or fully folded) model response
#[derive(Debug, Clone, Default)]
pub struct ProviderResponse {
    pub content: String,
    pub reasoning: Option<String>,
    pub reasoning_signature: Option<String>,
    pub tool_calls: Vec<ToolCallPart>,
    pub usage: TokenUsage,
    pub finish_reason: FinishReason,
}

/// Error kinds shared by every dialect
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("service overloaded: {0}")]
    Overloaded(String),

    /// The request exceeded the model context window; retried after
    /// adjusting `max_tokens`
    #[error("context limit exceeded: {input} + {requested} > {limit}")]
    ContextLimit {
        input: u64,
        requested: u64,
        limit: u64,
    },

    /// The provider rejected the conversation shape (unpaired `tool_use`).
    /// The normalizer prevents this; non-retriable when it still happens.
    #[error("conversation history error: {0}")]
    History(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("canceled")]
    Canceled,

    #[error("maximum retry attempts reached: {0}")]
    RetriesExhausted(String),
}

impl ProviderError {
    /// True for errors the retry layer absorbs
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::Overloaded(_)
                | ProviderError::Network(_)
        )
    }
}

/// Parse a context-limit complaint of the form
/// `input length and max_tokens exceed context limit: A + B > C`
pub fn parse_context_limit(body: &str) -> Option<(u64, u64, u64)> {
    let re = regex::Regex::new(
        r"input length and max_tokens exceed context limit: (\d+) \+ (\d+) > (\d+)",
    )
    .ok()?;
    let caps = re.captures(body)?;
    Some((
        caps.get(1)?.as_str().parse().ok()?,
        caps.get(2)?.as_str().parse().ok()?,
        caps.get(3)?.as_str().parse().ok()?,
    ))
}

/// Uniform HTTP error classification applied by every dialect
pub fn classify_status(status: u16, body: &str, retry_after: Option<Duration>) -> ProviderError {
    if let Some((input, requested, limit)) = parse_context_limit(body) {
        return ProviderError::ContextLimit {
            input,
            requested,
            limit,
        };
    }
    if status == 400 && body.contains("tool_use") && body.contains("tool_result") {
        return ProviderError::History(body.to_string());
    }
    let lower = body.to_lowercase();
    match status {
        401 | 403 => ProviderError::Authentication(body.to_string()),
        429 => ProviderError::RateLimited {
            message: body.to_string(),
            retry_after,
        },
        529 | 503 => ProviderError::Overloaded(body.to_string()),
        _ if lower.contains("overloaded") => ProviderError::Overloaded(body.to_string()),
        _ if lower.contains("rate limit exceeded") => ProviderError::RateLimited {
            message: body.to_string(),
            retry_after,
        },
        400..=499 => ProviderError::InvalidRequest(body.to_string()),
        500..=599 => ProviderError::Overloaded(body.to_string()),
        _ => ProviderError::InvalidResponse(format!("HTTP {}: {}", status, body)),
    }
}

impl From<jig_anthropic_sdk::AnthropicError> for ProviderError {
    fn from(err: jig_anthropic_sdk::AnthropicError) -> Self {
        use jig_anthropic_sdk::AnthropicError as E;
        match err {
            E::Authentication(msg) => ProviderError::Authentication(msg),
            E::RateLimited {
                message,
                retry_after,
            } => ProviderError::RateLimited {
                message,
                retry_after,
            },
            E::Overloaded(msg) => ProviderError::Overloaded(msg),
            // The SDK cannot see context-limit or pairing complaints; they
            // come through as invalid requests with the body preserved.
            E::InvalidRequest(msg) => classify_status(400, &msg, None),
            E::InvalidResponse(msg) => ProviderError::InvalidResponse(msg),
            E::Network(msg) => ProviderError::Network(msg),
            E::Json(e) => ProviderError::InvalidResponse(e.to_string()),
            E::Stream(msg) => ProviderError::Network(msg),
            E::Configuration(msg) => ProviderError::Configuration(msg),
            E::Other(msg) => ProviderError::InvalidResponse(msg),
        }
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Credential material for one provider
#[derive(Debug, Clone)]
pub struct Credential {
    pub token: String,
    pub refresh_token: Option<String>,
    /// Unix milliseconds
    pub expires_at: Option<i64>,
}

/// External credential collaborator. The default implementation re-resolves
/// `$VAR` indirections; OAuth token exchange is the embedding application's
/// store.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Current credential for a provider, if any
    async fn access(&self, provider_id: &str) -> Result<Option<Credential>, ProviderError>;

    /// Refresh and return a new credential (OAuth exchange or `$VAR`
    /// re-resolution)
    async fn refresh(&self, provider_id: &str) -> Result<Credential, ProviderError>;
}

/// Credential store over the resolved config: API keys through the variable
/// resolver, OAuth tokens passed through as configured.
pub struct ConfigCredentialStore {
    config: crate::config::Config,
    resolver: std::sync::Arc<dyn crate::resolver::VariableResolver>,
}

impl ConfigCredentialStore {
    pub fn new(
        config: crate::config::Config,
        resolver: std::sync::Arc<dyn crate::resolver::VariableResolver>,
    ) -> Self {
        Self { config, resolver }
    }

    async fn resolve(&self, provider_id: &str) -> Result<Option<Credential>, ProviderError> {
        let provider = match self.config.provider(provider_id) {
            Some(p) => p,
            None => return Ok(None),
        };
        if let Some(oauth) = &provider.oauth {
            return Ok(Some(Credential {
                token: oauth.access_token.clone(),
                refresh_token: Some(oauth.refresh_token.clone()),
                expires_at: Some(oauth.expires_at),
            }));
        }
        match &provider.api_key {
            Some(key) => {
                let token = self
                    .resolver
                    .expand(key)
                    .await
                    .map_err(|e| ProviderError::Authentication(e.to_string()))?;
                Ok(Some(Credential {
                    token,
                    refresh_token: None,
                    expires_at: None,
                }))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CredentialStore for ConfigCredentialStore {
    async fn access(&self, provider_id: &str) -> Result<Option<Credential>, ProviderError> {
        self.resolve(provider_id).await
    }

    async fn refresh(&self, provider_id: &str) -> Result<Credential, ProviderError> {
        self.resolve(provider_id).await?.ok_or_else(|| {
            ProviderError::Authentication(format!(
                "no credentials configured for provider '{}'",
                provider_id
            ))
        })
    }
}

// ============================================================================
// Provider trait
// ============================================================================

/// A model backend speaking one wire dialect
#[async_trait]
pub trait Provider: Send + Sync {
    /// The resolved current model
    fn model(&self) -> &ModelDescriptor;

    /// The selection (provider, model, generation parameters)
    fn selected(&self) -> &SelectedModel;

    /// Non-streaming completion
    async fn send(
        &self,
        ctx: &RunContext,
        messages: &[Message],
        tools: &[ToolInfo],
    ) -> Result<ProviderResponse, ProviderError>;

    /// Streaming completion; the returned stream is finite and not
    /// restartable, and observes `ctx` cancellation at the next event
    async fn stream(
        &self,
        ctx: &RunContext,
        messages: &[Message],
        tools: &[ToolInfo],
    ) -> Result<ProviderEventStream, ProviderError>;
}

/// Fold a full stream into its terminal response. Providers implement
/// `send` with this when the dialect has no separate non-streaming path
/// worth keeping.
pub async fn collect_stream(
    mut stream: ProviderEventStream,
) -> Result<ProviderResponse, ProviderError> {
    let mut last: Option<ProviderResponse> = None;
    while let Some(event) = stream.next().await {
        if let ProviderEvent::Complete(response) = event? {
            last = Some(response);
        }
    }
    last.ok_or_else(|| ProviderError::InvalidResponse("stream ended without completion".into()))
}
