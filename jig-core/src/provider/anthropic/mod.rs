//! Anthropic-family provider (direct API, Bedrock, Vertex)
//!
//! The richest dialect: thinking blocks with signatures that must be echoed
//! back, ephemeral cache markers, and tool inputs streamed as partial JSON.
//! Bedrock and Vertex are the same dialect reached by endpoint rewriting;
//! see [`jig_anthropic_sdk::Endpoint`].

mod conversion;

use super::{
    with_retry, CredentialStore, Provider, ProviderError, ProviderEvent, ProviderEventStream,
    ProviderResponse, RetryConfig, RetryState,
};
use crate::cancel::RunContext;
use crate::config::{ModelDescriptor, ProviderConfig, ProviderDialect, SelectedModel};
use crate::normalize::normalize;
use crate::tool::ToolInfo;
use crate::types::{FinishReason, Message, TokenUsage, ToolCallPart};
use async_trait::async_trait;
use futures::StreamExt;
use jig_anthropic_sdk::{
    Anthropic, Auth, ContentBlock, ContentBlockDelta, Endpoint, MessageCreateParams,
    MessageStreamEvent, ThinkingParam,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub use conversion::{apply_cache_markers, from_stop_reason, to_wire_messages, to_wire_tools};

/// Fraction of the output budget reserved for thinking when `think` is on
const THINKING_BUDGET_FRACTION: f64 = 0.8;

pub struct AnthropicProvider {
    provider_id: String,
    config: ProviderConfig,
    descriptor: ModelDescriptor,
    selected: SelectedModel,
    credentials: Arc<dyn CredentialStore>,
    retry: RetryConfig,
    /// Rebuilt whole on credential refresh; readers clone the handle
    client: RwLock<Anthropic>,
}

impl AnthropicProvider {
    pub async fn new(
        config: &ProviderConfig,
        selected: SelectedModel,
        credentials: Arc<dyn CredentialStore>,
        retry: RetryConfig,
    ) -> Result<Self, ProviderError> {
        let descriptor = config
            .models
            .iter()
            .find(|m| m.id == selected.model_id)
            .cloned()
            .ok_or_else(|| {
                ProviderError::Configuration(format!(
                    "model '{}' not declared by provider '{}'",
                    selected.model_id, config.id
                ))
            })?;

        let credential = credentials.access(&config.id).await?;
        let client = build_client(config, credential.map(|c| c.token))?;

        Ok(Self {
            provider_id: config.id.clone(),
            config: config.clone(),
            descriptor,
            selected,
            credentials,
            retry,
            client: RwLock::new(client),
        })
    }

    async fn refresh_transport(&self) -> Result<(), ProviderError> {
        let credential = self.credentials.refresh(&self.provider_id).await?;
        let client = build_client(&self.config, Some(credential.token))?;
        *self.client.write() = client;
        Ok(())
    }

    fn max_tokens(&self, state: RetryState) -> u32 {
        state
            .max_tokens_override
            .or(self.selected.max_tokens)
            .unwrap_or(self.descriptor.default_max_tokens)
    }

    fn build_params(
        &self,
        messages: &[Message],
        tools: &[ToolInfo],
        state: RetryState,
    ) -> MessageCreateParams {
        let (mut system, mut wire_messages) = to_wire_messages(messages);
        let mut wire_tools = to_wire_tools(tools);
        apply_cache_markers(&mut system, &mut wire_messages, &mut wire_tools);

        let max_tokens = self.max_tokens(state);
        let mut params = MessageCreateParams::new(self.selected.model_id.clone(), max_tokens);
        params.system = system;
        params.messages = wire_messages;
        if !wire_tools.is_empty() {
            params.tools = Some(wire_tools);
        }

        if self.selected.think && self.descriptor.can_reason {
            let budget = ((max_tokens as f64) * THINKING_BUDGET_FRACTION) as u32;
            params.thinking = Some(ThinkingParam::Enabled {
                budget_tokens: budget,
            });
            params.temperature = Some(1.0);
        }

        params
    }
}

fn build_client(config: &ProviderConfig, token: Option<String>) -> Result<Anthropic, ProviderError> {
    let endpoint = match config.dialect {
        ProviderDialect::Anthropic => Endpoint::Direct {
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.anthropic.com".to_string()),
        },
        ProviderDialect::Bedrock => Endpoint::Bedrock {
            region: config.region.clone().ok_or_else(|| {
                ProviderError::Configuration(format!(
                    "provider '{}': bedrock requires a region",
                    config.id
                ))
            })?,
        },
        ProviderDialect::Vertex => Endpoint::Vertex {
            project: config.project.clone().ok_or_else(|| {
                ProviderError::Configuration(format!(
                    "provider '{}': vertex requires a project",
                    config.id
                ))
            })?,
            location: config
                .location
                .clone()
                .unwrap_or_else(|| "us-east5".to_string()),
        },
        other => {
            return Err(ProviderError::Configuration(format!(
                "provider '{}': dialect {:?} is not anthropic-family",
                config.id, other
            )))
        }
    };

    let token = token.ok_or_else(|| {
        ProviderError::Authentication(format!(
            "no credentials configured for provider '{}'",
            config.id
        ))
    })?;
    // The direct API takes an x-api-key header; OAuth tokens and the
    // rewritten endpoints authenticate with bearer tokens.
    let auth = match config.dialect {
        ProviderDialect::Anthropic if config.oauth.is_none() => Auth::ApiKey(token),
        _ => Auth::Bearer(token),
    };

    let mut builder = Anthropic::builder()
        .auth(auth)
        .endpoint(endpoint)
        .extra_body(config.extra_body.clone());
    for (name, value) in &config.extra_headers {
        builder = builder.header(name, value);
    }
    builder.build().map_err(ProviderError::from)
}

/// Routing target for content-block deltas by stream index
enum BlockKind {
    Text,
    Thinking,
    Tool(String),
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn model(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    fn selected(&self) -> &SelectedModel {
        &self.selected
    }

    async fn send(
        &self,
        ctx: &RunContext,
        messages: &[Message],
        tools: &[ToolInfo],
    ) -> Result<ProviderResponse, ProviderError> {
        let messages = normalize(messages);
        let model = self.selected.model_id.clone();

        let wire = with_retry(
            ctx,
            &self.retry,
            |state| {
                let params = self.build_params(&messages, tools, state);
                let client = self.client.read().clone();
                let model = model.clone();
                async move { client.create(&model, params).await.map_err(Into::into) }
            },
            || self.refresh_transport(),
        )
        .await?;

        let mut response = ProviderResponse {
            usage: usage_from_wire(&wire.usage),
            finish_reason: from_stop_reason(wire.stop_reason),
            ..Default::default()
        };
        for block in wire.content {
            match block {
                ContentBlock::Text { text } => response.content.push_str(&text),
                ContentBlock::Thinking {
                    thinking,
                    signature,
                } => {
                    response.reasoning = Some(thinking);
                    response.reasoning_signature = Some(signature);
                }
                ContentBlock::RedactedThinking { data } => {
                    response.reasoning_signature = Some(data);
                }
                ContentBlock::ToolUse { id, name, input } => {
                    response.tool_calls.push(ToolCallPart {
                        id,
                        name,
                        input: input.to_string(),
                        finished: true,
                    });
                }
            }
        }
        Ok(response)
    }

    async fn stream(
        &self,
        ctx: &RunContext,
        messages: &[Message],
        tools: &[ToolInfo],
    ) -> Result<ProviderEventStream, ProviderError> {
        let messages = normalize(messages);
        let model = self.selected.model_id.clone();

        let wire_stream = with_retry(
            ctx,
            &self.retry,
            |state| {
                let params = self.build_params(&messages, tools, state);
                let client = self.client.read().clone();
                let model = model.clone();
                async move { client.stream(&model, params).await.map_err(Into::into) }
            },
            || self.refresh_transport(),
        )
        .await?;

        let ctx = ctx.clone();
        let events = async_stream::stream! {
            let mut wire_stream = wire_stream;
            let mut response = ProviderResponse::default();
            let mut kinds: HashMap<usize, BlockKind> = HashMap::new();
            let mut signature = String::new();

            loop {
                let event = tokio::select! {
                    _ = ctx.canceled() => {
                        yield Err(ProviderError::Canceled);
                        return;
                    }
                    event = wire_stream.next() => match event {
                        Some(Ok(event)) => event,
                        Some(Err(e)) => {
                            yield Err(e.into());
                            return;
                        }
                        None => break,
                    },
                };

                match event {
                    MessageStreamEvent::MessageStart { message } => {
                        response.usage = usage_from_wire(&message.usage);
                    }
                    MessageStreamEvent::ContentBlockStart { index, content_block } => {
                        match content_block {
                            ContentBlock::Text { text } => {
                                kinds.insert(index, BlockKind::Text);
                                yield Ok(ProviderEvent::ContentStart);
                                if !text.is_empty() {
                                    response.content.push_str(&text);
                                    yield Ok(ProviderEvent::ContentDelta(text));
                                }
                            }
                            ContentBlock::Thinking { thinking, signature: sig } => {
                                kinds.insert(index, BlockKind::Thinking);
                                if !thinking.is_empty() {
                                    append_reasoning(&mut response, &thinking);
                                    yield Ok(ProviderEvent::ThinkingDelta(thinking));
                                }
                                if !sig.is_empty() {
                                    signature = sig;
                                    response.reasoning_signature = Some(signature.clone());
                                    yield Ok(ProviderEvent::SignatureDelta(signature.clone()));
                                }
                            }
                            ContentBlock::RedactedThinking { data } => {
                                kinds.insert(index, BlockKind::Thinking);
                                signature = data;
                                response.reasoning_signature = Some(signature.clone());
                                yield Ok(ProviderEvent::SignatureDelta(signature.clone()));
                            }
                            ContentBlock::ToolUse { id, name, input } => {
                                kinds.insert(index, BlockKind::Tool(id.clone()));
                                let initial = match input.as_object() {
                                    Some(o) if !o.is_empty() => input.to_string(),
                                    _ => String::new(),
                                };
                                response.tool_calls.push(ToolCallPart {
                                    id: id.clone(),
                                    name: name.clone(),
                                    input: initial.clone(),
                                    finished: false,
                                });
                                yield Ok(ProviderEvent::ToolUseStart { id: id.clone(), name });
                                if !initial.is_empty() {
                                    yield Ok(ProviderEvent::ToolUseDelta { id, partial_json: initial });
                                }
                            }
                        }
                    }
                    MessageStreamEvent::ContentBlockDelta { index, delta } => match delta {
                        ContentBlockDelta::TextDelta { text } => {
                            response.content.push_str(&text);
                            yield Ok(ProviderEvent::ContentDelta(text));
                        }
                        ContentBlockDelta::ThinkingDelta { thinking } => {
                            append_reasoning(&mut response, &thinking);
                            yield Ok(ProviderEvent::ThinkingDelta(thinking));
                        }
                        ContentBlockDelta::SignatureDelta { signature: sig } => {
                            // The wire may split a signature; consumers see
                            // the full value so far and replace, never append.
                            signature.push_str(&sig);
                            response.reasoning_signature = Some(signature.clone());
                            yield Ok(ProviderEvent::SignatureDelta(signature.clone()));
                        }
                        ContentBlockDelta::InputJsonDelta { partial_json } => {
                            if let Some(BlockKind::Tool(id)) = kinds.get(&index) {
                                if let Some(call) =
                                    response.tool_calls.iter_mut().find(|c| c.id == *id)
                                {
                                    call.input.push_str(&partial_json);
                                }
                                yield Ok(ProviderEvent::ToolUseDelta {
                                    id: id.clone(),
                                    partial_json,
                                });
                            }
                        }
                    },
                    MessageStreamEvent::ContentBlockStop { index } => {
                        match kinds.get(&index) {
                            Some(BlockKind::Text) => yield Ok(ProviderEvent::ContentStop),
                            Some(BlockKind::Tool(id)) => {
                                if let Some(call) =
                                    response.tool_calls.iter_mut().find(|c| c.id == *id)
                                {
                                    if call.input.is_empty() {
                                        call.input = "{}".to_string();
                                    }
                                    call.finished = true;
                                }
                                yield Ok(ProviderEvent::ToolUseStop { id: id.clone() });
                            }
                            _ => {}
                        }
                    }
                    MessageStreamEvent::MessageDelta { delta, usage } => {
                        response.finish_reason = from_stop_reason(delta.stop_reason);
                        if let Some(u) = usage {
                            response.usage.output_tokens = u.output_tokens;
                        }
                    }
                    MessageStreamEvent::MessageStop => break,
                    MessageStreamEvent::Ping => {}
                    MessageStreamEvent::Error { error } => {
                        yield Err(super::classify_status(0, &error.message, None));
                        return;
                    }
                }
            }

            if response.finish_reason == FinishReason::Unknown
                && !response.tool_calls.is_empty()
            {
                response.finish_reason = FinishReason::ToolUse;
            }
            yield Ok(ProviderEvent::Complete(response));
        };

        Ok(Box::pin(events))
    }
}

fn append_reasoning(response: &mut ProviderResponse, delta: &str) {
    match &mut response.reasoning {
        Some(text) => text.push_str(delta),
        None => response.reasoning = Some(delta.to_string()),
    }
}

fn usage_from_wire(usage: &jig_anthropic_sdk::Usage) -> TokenUsage {
    TokenUsage {
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        cache_read_tokens: usage.cache_read_input_tokens.unwrap_or(0),
        cache_creation_tokens: usage.cache_creation_input_tokens.unwrap_or(0),
    }
}
