//! Test doubles for the runtime
//!
//! The [`MockProvider`] replays scripted streams, one script per model
//! call, so loop behavior (tool interleave, cancellation, retries at the
//! loop level) is testable without HTTP.

use crate::cancel::RunContext;
use crate::config::{ModelDescriptor, SelectedModel};
use crate::provider::{
    Provider, ProviderError, ProviderEvent, ProviderEventStream, ProviderResponse,
};
use crate::tool::ToolInfo;
use crate::types::{FinishReason, Message, TokenUsage, ToolCallPart};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

type Script = Result<Vec<ProviderEvent>, ProviderError>;

/// A provider that replays scripted event sequences
pub struct MockProvider {
    descriptor: ModelDescriptor,
    selected: SelectedModel,
    scripts: Mutex<VecDeque<Script>>,
    calls: AtomicUsize,
    /// Delay before each event, to make cancellation windows reachable
    event_delay: Option<Duration>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            descriptor: ModelDescriptor {
                id: "mock-model".to_string(),
                name: "Mock Model".to_string(),
                context_window: 200_000,
                default_max_tokens: 4096,
                cost_per_1m_in: 0.0,
                cost_per_1m_out: 0.0,
                can_reason: true,
                supports_attachments: true,
            },
            selected: SelectedModel {
                provider_id: "mock".to_string(),
                model_id: "mock-model".to_string(),
                max_tokens: None,
                reasoning_effort: None,
                think: false,
            },
            scripts: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            event_delay: None,
        }
    }

    pub fn with_context_window(mut self, window: u64) -> Self {
        self.descriptor.context_window = window;
        self
    }

    pub fn with_event_delay(mut self, delay: Duration) -> Self {
        self.event_delay = Some(delay);
        self
    }

    /// Script one call that streams `text` and ends the turn
    pub fn then_text(self, text: &str) -> Self {
        let response = ProviderResponse {
            content: text.to_string(),
            usage: TokenUsage {
                input_tokens: 25,
                output_tokens: 7,
                ..Default::default()
            },
            finish_reason: FinishReason::EndTurn,
            ..Default::default()
        };
        let mut events = vec![ProviderEvent::ContentStart];
        for chunk in text.as_bytes().chunks(8) {
            events.push(ProviderEvent::ContentDelta(
                String::from_utf8_lossy(chunk).to_string(),
            ));
        }
        events.push(ProviderEvent::ContentStop);
        events.push(ProviderEvent::Complete(response));
        self.push_script(Ok(events))
    }

    /// Script one call that requests a tool
    pub fn then_tool_call(self, id: &str, name: &str, input: serde_json::Value) -> Self {
        let input_json = input.to_string();
        let call = ToolCallPart {
            id: id.to_string(),
            name: name.to_string(),
            input: input_json.clone(),
            finished: true,
        };
        let response = ProviderResponse {
            tool_calls: vec![call],
            usage: TokenUsage {
                input_tokens: 40,
                output_tokens: 12,
                ..Default::default()
            },
            finish_reason: FinishReason::ToolUse,
            ..Default::default()
        };
        let events = vec![
            ProviderEvent::ToolUseStart {
                id: id.to_string(),
                name: name.to_string(),
            },
            ProviderEvent::ToolUseDelta {
                id: id.to_string(),
                partial_json: input_json,
            },
            ProviderEvent::ToolUseStop { id: id.to_string() },
            ProviderEvent::Complete(response),
        ];
        self.push_script(Ok(events))
    }

    /// Script one call that requests several tools in one turn
    pub fn then_tool_calls(self, calls: Vec<(&str, &str, serde_json::Value)>) -> Self {
        let parts: Vec<ToolCallPart> = calls
            .iter()
            .map(|(id, name, input)| ToolCallPart {
                id: id.to_string(),
                name: name.to_string(),
                input: input.to_string(),
                finished: true,
            })
            .collect();
        let mut events = Vec::new();
        for part in &parts {
            events.push(ProviderEvent::ToolUseStart {
                id: part.id.clone(),
                name: part.name.clone(),
            });
            events.push(ProviderEvent::ToolUseDelta {
                id: part.id.clone(),
                partial_json: part.input.clone(),
            });
            events.push(ProviderEvent::ToolUseStop {
                id: part.id.clone(),
            });
        }
        events.push(ProviderEvent::Complete(ProviderResponse {
            tool_calls: parts,
            usage: TokenUsage {
                input_tokens: 50,
                output_tokens: 15,
                ..Default::default()
            },
            finish_reason: FinishReason::ToolUse,
            ..Default::default()
        }));
        self.push_script(Ok(events))
    }

    /// Script one call that streams reasoning (with a signature), then text
    pub fn then_reasoned_text(self, reasoning: &str, signature: &str, text: &str) -> Self {
        let response = ProviderResponse {
            content: text.to_string(),
            reasoning: Some(reasoning.to_string()),
            reasoning_signature: Some(signature.to_string()),
            usage: TokenUsage {
                input_tokens: 30,
                output_tokens: 20,
                ..Default::default()
            },
            finish_reason: FinishReason::EndTurn,
            ..Default::default()
        };
        let events = vec![
            ProviderEvent::ThinkingDelta(reasoning.to_string()),
            ProviderEvent::SignatureDelta(signature.to_string()),
            ProviderEvent::ContentStart,
            ProviderEvent::ContentDelta(text.to_string()),
            ProviderEvent::ContentStop,
            ProviderEvent::Complete(response),
        ];
        self.push_script(Ok(events))
    }

    /// Script one call that fails outright
    pub fn then_error(self, error: ProviderError) -> Self {
        self.push_script(Err(error))
    }

    fn push_script(self, script: Script) -> Self {
        self.scripts.lock().push_back(script);
        self
    }

    /// How many times `stream`/`send` were invoked
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_script(&self) -> Script {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.scripts.lock().pop_front().unwrap_or_else(|| {
            Ok(vec![ProviderEvent::Complete(ProviderResponse {
                finish_reason: FinishReason::EndTurn,
                ..Default::default()
            })])
        })
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn model(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    fn selected(&self) -> &SelectedModel {
        &self.selected
    }

    async fn send(
        &self,
        _ctx: &RunContext,
        _messages: &[Message],
        _tools: &[ToolInfo],
    ) -> Result<ProviderResponse, ProviderError> {
        let events = self.next_script()?;
        for event in events.into_iter().rev() {
            if let ProviderEvent::Complete(response) = event {
                return Ok(response);
            }
        }
        Ok(ProviderResponse::default())
    }

    async fn stream(
        &self,
        ctx: &RunContext,
        _messages: &[Message],
        _tools: &[ToolInfo],
    ) -> Result<ProviderEventStream, ProviderError> {
        let events = self.next_script()?;
        let ctx = ctx.clone();
        let delay = self.event_delay;
        let stream = async_stream::stream! {
            for event in events {
                if let Some(delay) = delay {
                    tokio::select! {
                        _ = ctx.canceled() => {
                            yield Err(ProviderError::Canceled);
                            return;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                if ctx.is_canceled() {
                    yield Err(ProviderError::Canceled);
                    return;
                }
                yield Ok(event);
            }
        };
        Ok(Box::pin(stream))
    }
}
