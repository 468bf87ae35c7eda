//! OpenAI-compatible provider
//!
//! Speaks Chat Completions against api.openai.com and any compatible local
//! endpoint (LM Studio, Ollama, llama.cpp, vLLM), plus the newer Responses
//! API when configured. Tool arguments stream as per-index deltas; some
//! local servers also emit `reasoning_content` deltas, which map to
//! thinking events.

use super::{
    classify_status, collect_stream, with_retry, CredentialStore, Provider, ProviderError,
    ProviderEvent, ProviderEventStream, ProviderResponse, RetryConfig, RetryState,
};
use crate::cancel::RunContext;
use crate::config::{ModelDescriptor, ProviderConfig, ProviderDialect, SelectedModel};
use crate::normalize::normalize;
use crate::tool::ToolInfo;
use crate::types::{FinishReason, Message, Part, Role, TokenUsage, ToolCallPart};
use async_trait::async_trait;
use base64::Engine;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Which of the two OpenAI HTTP surfaces to speak
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Api {
    ChatCompletions,
    Responses,
}

pub struct OpenAiProvider {
    provider_id: String,
    descriptor: ModelDescriptor,
    selected: SelectedModel,
    base_url: String,
    api: Api,
    extra_headers: HashMap<String, String>,
    extra_body: serde_json::Map<String, Value>,
    credentials: Arc<dyn CredentialStore>,
    retry: RetryConfig,
    client: reqwest::Client,
    token: RwLock<String>,
}

impl OpenAiProvider {
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

        let api = match config.dialect {
            ProviderDialect::OpenAi => Api::ChatCompletions,
            ProviderDialect::OpenAiResponses => Api::Responses,
            other => {
                return Err(ProviderError::Configuration(format!(
                    "provider '{}': dialect {:?} is not openai-compatible",
                    config.id, other
                )))
            }
        };

        let token = credentials
            .access(&config.id)
            .await?
            .map(|c| c.token)
            .unwrap_or_default();

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Configuration(e.to_string()))?;

        Ok(Self {
            provider_id: config.id.clone(),
            descriptor,
            selected,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api,
            extra_headers: config.extra_headers.clone(),
            extra_body: config.extra_body.clone(),
            credentials,
            retry,
            client,
            token: RwLock::new(token),
        })
    }

    async fn refresh_token(&self) -> Result<(), ProviderError> {
        let credential = self.credentials.refresh(&self.provider_id).await?;
        *self.token.write() = credential.token;
        Ok(())
    }

    fn max_tokens(&self, state: RetryState) -> u32 {
        state
            .max_tokens_override
            .or(self.selected.max_tokens)
            .unwrap_or(self.descriptor.default_max_tokens)
    }

    fn url(&self) -> String {
        match self.api {
            Api::ChatCompletions => format!("{}/chat/completions", self.base_url),
            Api::Responses => format!("{}/responses", self.base_url),
        }
    }

    fn build_body(&self, messages: &[Message], tools: &[ToolInfo], state: RetryState) -> Value {
        let mut body = match self.api {
            Api::ChatCompletions => json!({
                "model": self.selected.model_id,
                "messages": to_chat_messages(messages),
                "max_tokens": self.max_tokens(state),
                "stream": true,
                "stream_options": {"include_usage": true},
            }),
            Api::Responses => json!({
                "model": self.selected.model_id,
                "input": to_responses_input(messages),
                "max_output_tokens": self.max_tokens(state),
                "stream": true,
            }),
        };
        let obj = body.as_object_mut().expect("body is an object");

        if !tools.is_empty() {
            let tools_value: Vec<Value> = match self.api {
                Api::ChatCompletions => tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters.to_value(),
                            }
                        })
                    })
                    .collect(),
                Api::Responses => tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters.to_value(),
                        })
                    })
                    .collect(),
            };
            obj.insert("tools".to_string(), Value::Array(tools_value));
        }

        if let Some(effort) = &self.selected.reasoning_effort {
            if self.descriptor.can_reason {
                match self.api {
                    Api::ChatCompletions => {
                        obj.insert("reasoning_effort".to_string(), json!(effort));
                    }
                    Api::Responses => {
                        obj.insert("reasoning".to_string(), json!({"effort": effort}));
                    }
                }
            }
        }

        for (k, v) in &self.extra_body {
            obj.entry(k.clone()).or_insert_with(|| v.clone());
        }
        body
    }

    async fn open_sse(
        &self,
        messages: &[Message],
        tools: &[ToolInfo],
        state: RetryState,
    ) -> Result<SseByteStream, ProviderError> {
        let mut request = self
            .client
            .post(self.url())
            .header("content-type", "application/json")
            .bearer_auth(self.token.read().clone());
        for (name, value) in &self.extra_headers {
            request = request.header(name, value);
        }

        let response = request
            .json(&self.build_body(messages, tools, state))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body, retry_after));
        }

        Ok(Box::pin(response.bytes_stream().eventsource()))
    }
}

pub(crate) type SseByteStream = std::pin::Pin<
    Box<
        dyn futures::Stream<
                Item = Result<
                    eventsource_stream::Event,
                    eventsource_stream::EventStreamError<reqwest::Error>,
                >,
            > + Send,
    >,
>;

#[async_trait]
impl Provider for OpenAiProvider {
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
        let stream = self.stream(ctx, messages, tools).await?;
        collect_stream(stream).await
    }

    async fn stream(
        &self,
        ctx: &RunContext,
        messages: &[Message],
        tools: &[ToolInfo],
    ) -> Result<ProviderEventStream, ProviderError> {
        let messages = normalize(messages);

        let sse = with_retry(
            ctx,
            &self.retry,
            |state| self.open_sse(&messages, tools, state),
            || self.refresh_token(),
        )
        .await?;

        let ctx = ctx.clone();
        let api = self.api;
        let events = async_stream::stream! {
            let mut sse = sse;
            let mut fold = StreamFold::default();

            loop {
                let event = tokio::select! {
                    _ = ctx.canceled() => {
                        yield Err(ProviderError::Canceled);
                        return;
                    }
                    event = sse.next() => match event {
                        Some(Ok(event)) => event,
                        Some(Err(e)) => {
                            yield Err(ProviderError::Network(e.to_string()));
                            return;
                        }
                        None => break,
                    },
                };

                if event.data.trim() == "[DONE]" {
                    break;
                }
                let chunk: Value = match serde_json::from_str(&event.data) {
                    Ok(v) => v,
                    Err(e) => {
                        yield Err(ProviderError::InvalidResponse(format!(
                            "bad stream chunk: {} ({})", e, event.data
                        )));
                        return;
                    }
                };

                let out = match api {
                    Api::ChatCompletions => fold.apply_chat_chunk(&chunk),
                    Api::Responses => fold.apply_responses_event(event.event.as_str(), &chunk),
                };
                for item in out {
                    yield Ok(item);
                }
            }

            yield Ok(ProviderEvent::Complete(fold.finish()));
        };

        Ok(Box::pin(events))
    }
}

// ============================================================================
// Stream folding
// ============================================================================

/// Accumulates chunk deltas into the terminal response while translating
/// them into provider events
#[derive(Default)]
struct StreamFold {
    response: ProviderResponse,
    /// chat-completions tool-call index → id
    index_ids: HashMap<u64, String>,
    content_started: bool,
}

impl StreamFold {
    fn apply_chat_chunk(&mut self, chunk: &Value) -> Vec<ProviderEvent> {
        let mut out = Vec::new();

        if let Some(usage) = chunk.get("usage").filter(|u| !u.is_null()) {
            self.response.usage = chat_usage(usage);
        }

        let choice = match chunk["choices"].get(0) {
            Some(c) => c,
            None => return out,
        };

        if let Some(delta) = choice.get("delta") {
            if let Some(text) = delta["content"].as_str() {
                if !text.is_empty() {
                    if !self.content_started {
                        self.content_started = true;
                        out.push(ProviderEvent::ContentStart);
                    }
                    self.response.content.push_str(text);
                    out.push(ProviderEvent::ContentDelta(text.to_string()));
                }
            }
            if let Some(reasoning) = delta["reasoning_content"].as_str() {
                if !reasoning.is_empty() {
                    match &mut self.response.reasoning {
                        Some(r) => r.push_str(reasoning),
                        None => self.response.reasoning = Some(reasoning.to_string()),
                    }
                    out.push(ProviderEvent::ThinkingDelta(reasoning.to_string()));
                }
            }
            if let Some(tool_calls) = delta["tool_calls"].as_array() {
                for tc in tool_calls {
                    let index = tc["index"].as_u64().unwrap_or(0);
                    if let Some(id) = tc["id"].as_str() {
                        let name = tc["function"]["name"].as_str().unwrap_or("").to_string();
                        self.index_ids.insert(index, id.to_string());
                        self.response.tool_calls.push(ToolCallPart {
                            id: id.to_string(),
                            name: name.clone(),
                            input: String::new(),
                            finished: false,
                        });
                        out.push(ProviderEvent::ToolUseStart {
                            id: id.to_string(),
                            name,
                        });
                    }
                    if let Some(arguments) = tc["function"]["arguments"].as_str() {
                        if !arguments.is_empty() {
                            if let Some(id) = self.index_ids.get(&index).cloned() {
                                if let Some(call) =
                                    self.response.tool_calls.iter_mut().find(|c| c.id == id)
                                {
                                    call.input.push_str(arguments);
                                }
                                out.push(ProviderEvent::ToolUseDelta {
                                    id,
                                    partial_json: arguments.to_string(),
                                });
                            }
                        }
                    }
                }
            }
        }

        if let Some(reason) = choice["finish_reason"].as_str() {
            self.response.finish_reason = match reason {
                "stop" => FinishReason::EndTurn,
                "length" => FinishReason::MaxTokens,
                "tool_calls" => FinishReason::ToolUse,
                "content_filter" => FinishReason::Error,
                _ => FinishReason::Unknown,
            };
            if self.content_started {
                out.push(ProviderEvent::ContentStop);
            }
            for call in &mut self.response.tool_calls {
                if !call.finished {
                    if call.input.is_empty() {
                        call.input = "{}".to_string();
                    }
                    call.finished = true;
                    out.push(ProviderEvent::ToolUseStop {
                        id: call.id.clone(),
                    });
                }
            }
        }

        out
    }

    fn apply_responses_event(&mut self, event_name: &str, chunk: &Value) -> Vec<ProviderEvent> {
        let mut out = Vec::new();
        match event_name {
            "response.output_text.delta" => {
                if let Some(text) = chunk["delta"].as_str() {
                    if !self.content_started {
                        self.content_started = true;
                        out.push(ProviderEvent::ContentStart);
                    }
                    self.response.content.push_str(text);
                    out.push(ProviderEvent::ContentDelta(text.to_string()));
                }
            }
            "response.reasoning_summary_text.delta" => {
                if let Some(text) = chunk["delta"].as_str() {
                    match &mut self.response.reasoning {
                        Some(r) => r.push_str(text),
                        None => self.response.reasoning = Some(text.to_string()),
                    }
                    out.push(ProviderEvent::ThinkingDelta(text.to_string()));
                }
            }
            "response.output_item.added" => {
                let item = &chunk["item"];
                if item["type"].as_str() == Some("function_call") {
                    let id = item["call_id"]
                        .as_str()
                        .or_else(|| item["id"].as_str())
                        .unwrap_or_default()
                        .to_string();
                    let name = item["name"].as_str().unwrap_or("").to_string();
                    if let Some(index) = chunk["output_index"].as_u64() {
                        self.index_ids.insert(index, id.clone());
                    }
                    self.response.tool_calls.push(ToolCallPart {
                        id: id.clone(),
                        name: name.clone(),
                        input: String::new(),
                        finished: false,
                    });
                    out.push(ProviderEvent::ToolUseStart { id, name });
                }
            }
            "response.function_call_arguments.delta" => {
                if let (Some(index), Some(delta)) =
                    (chunk["output_index"].as_u64(), chunk["delta"].as_str())
                {
                    if let Some(id) = self.index_ids.get(&index).cloned() {
                        if let Some(call) =
                            self.response.tool_calls.iter_mut().find(|c| c.id == id)
                        {
                            call.input.push_str(delta);
                        }
                        out.push(ProviderEvent::ToolUseDelta {
                            id,
                            partial_json: delta.to_string(),
                        });
                    }
                }
            }
            "response.output_item.done" => {
                let item = &chunk["item"];
                if item["type"].as_str() == Some("function_call") {
                    let id = item["call_id"]
                        .as_str()
                        .or_else(|| item["id"].as_str())
                        .unwrap_or_default()
                        .to_string();
                    if let Some(call) = self.response.tool_calls.iter_mut().find(|c| c.id == id) {
                        if call.input.is_empty() {
                            call.input = item["arguments"].as_str().unwrap_or("{}").to_string();
                        }
                        call.finished = true;
                    }
                    out.push(ProviderEvent::ToolUseStop { id });
                }
            }
            "response.completed" => {
                let response = &chunk["response"];
                if let Some(usage) = response.get("usage") {
                    self.response.usage = TokenUsage {
                        input_tokens: usage["input_tokens"].as_u64().unwrap_or(0),
                        output_tokens: usage["output_tokens"].as_u64().unwrap_or(0),
                        cache_read_tokens: usage["input_tokens_details"]["cached_tokens"]
                            .as_u64()
                            .unwrap_or(0),
                        cache_creation_tokens: 0,
                    };
                }
                self.response.finish_reason = if self.response.tool_calls.is_empty() {
                    FinishReason::EndTurn
                } else {
                    FinishReason::ToolUse
                };
                if response["incomplete_details"]["reason"].as_str() == Some("max_output_tokens")
                {
                    self.response.finish_reason = FinishReason::MaxTokens;
                }
                if self.content_started {
                    out.push(ProviderEvent::ContentStop);
                }
            }
            _ => {}
        }
        out
    }

    fn finish(mut self) -> ProviderResponse {
        if self.response.finish_reason == FinishReason::Unknown
            && !self.response.tool_calls.is_empty()
        {
            self.response.finish_reason = FinishReason::ToolUse;
        }
        self.response
    }
}

fn chat_usage(usage: &Value) -> TokenUsage {
    TokenUsage {
        input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
        output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
        cache_read_tokens: usage["prompt_tokens_details"]["cached_tokens"]
            .as_u64()
            .unwrap_or(0),
        cache_creation_tokens: 0,
    }
}

// ============================================================================
// Message encoding
// ============================================================================

fn to_chat_messages(messages: &[Message]) -> Vec<Value> {
    let mut wire = Vec::new();
    for msg in messages {
        match msg.role {
            Role::System => wire.push(json!({"role": "system", "content": msg.text()})),
            Role::User => {
                let binaries: Vec<&Part> = msg
                    .parts
                    .iter()
                    .filter(|p| matches!(p, Part::Binary { .. }))
                    .collect();
                if binaries.is_empty() {
                    wire.push(json!({"role": "user", "content": msg.text()}));
                } else {
                    let mut content = vec![json!({"type": "text", "text": msg.text()})];
                    for part in binaries {
                        if let Part::Binary { mime, data } = part {
                            let encoded = base64::engine::general_purpose::STANDARD.encode(data);
                            content.push(json!({
                                "type": "image_url",
                                "image_url": {"url": format!("data:{};base64,{}", mime, encoded)}
                            }));
                        }
                    }
                    wire.push(json!({"role": "user", "content": content}));
                }
            }
            Role::Assistant => {
                let mut entry = serde_json::Map::new();
                entry.insert("role".to_string(), json!("assistant"));
                let text = msg.text();
                entry.insert(
                    "content".to_string(),
                    if text.is_empty() { Value::Null } else { json!(text) },
                );
                let calls: Vec<Value> = msg
                    .tool_calls()
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": {"name": c.name, "arguments": c.input},
                        })
                    })
                    .collect();
                if !calls.is_empty() {
                    entry.insert("tool_calls".to_string(), Value::Array(calls));
                }
                wire.push(Value::Object(entry));
            }
            Role::Tool => {
                for result in msg.tool_results_parts() {
                    wire.push(json!({
                        "role": "tool",
                        "tool_call_id": result.call_id,
                        "content": result.content,
                    }));
                }
            }
        }
    }
    wire
}

fn to_responses_input(messages: &[Message]) -> Vec<Value> {
    let mut wire = Vec::new();
    for msg in messages {
        match msg.role {
            Role::System => {
                wire.push(json!({"role": "system", "content": msg.text()}));
            }
            Role::User => {
                wire.push(json!({"role": "user", "content": msg.text()}));
            }
            Role::Assistant => {
                let text = msg.text();
                if !text.is_empty() {
                    wire.push(json!({"role": "assistant", "content": text}));
                }
                for call in msg.tool_calls() {
                    wire.push(json!({
                        "type": "function_call",
                        "call_id": call.id,
                        "name": call.name,
                        "arguments": call.input,
                    }));
                }
            }
            Role::Tool => {
                for result in msg.tool_results_parts() {
                    wire.push(json!({
                        "type": "function_call_output",
                        "call_id": result.call_id,
                        "output": result.content,
                    }));
                }
            }
        }
    }
    wire
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolResultPart;

    fn log_with_tools() -> Vec<Message> {
        let mut assistant = Message::new(Role::Assistant);
        assistant.append_text("checking");
        assistant.parts.push(Part::ToolCall(ToolCallPart {
            id: "call_1".to_string(),
            name: "ls".to_string(),
            input: r#"{"path":"/tmp"}"#.to_string(),
            finished: true,
        }));
        vec![
            Message::system("be brief"),
            Message::user("list files"),
            assistant,
            Message::tool_results(vec![ToolResultPart {
                call_id: "call_1".to_string(),
                content: "a.txt".to_string(),
                is_error: false,
            }]),
        ]
    }

    #[test]
    fn test_chat_message_encoding() {
        let wire = to_chat_messages(&log_with_tools());
        assert_eq!(wire.len(), 4);
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[2]["tool_calls"][0]["id"], "call_1");
        assert_eq!(
            wire[2]["tool_calls"][0]["function"]["arguments"],
            r#"{"path":"/tmp"}"#
        );
        assert_eq!(wire[3]["role"], "tool");
        assert_eq!(wire[3]["tool_call_id"], "call_1");
    }

    #[test]
    fn test_responses_input_encoding() {
        let wire = to_responses_input(&log_with_tools());
        // system, user, assistant text, function_call, function_call_output
        assert_eq!(wire.len(), 5);
        assert_eq!(wire[3]["type"], "function_call");
        assert_eq!(wire[3]["call_id"], "call_1");
        assert_eq!(wire[4]["type"], "function_call_output");
    }

    #[test]
    fn test_chat_fold_text_and_finish() {
        let mut fold = StreamFold::default();
        let events = fold.apply_chat_chunk(&json!({
            "choices": [{"delta": {"content": "Hel"}, "finish_reason": null}]
        }));
        assert!(matches!(events[0], ProviderEvent::ContentStart));
        assert!(matches!(&events[1], ProviderEvent::ContentDelta(d) if d == "Hel"));

        fold.apply_chat_chunk(&json!({
            "choices": [{"delta": {"content": "lo"}, "finish_reason": null}]
        }));
        let events = fold.apply_chat_chunk(&json!({
            "choices": [{"delta": {}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 7, "completion_tokens": 2}
        }));
        assert!(events
            .iter()
            .any(|e| matches!(e, ProviderEvent::ContentStop)));

        let response = fold.finish();
        assert_eq!(response.content, "Hello");
        assert_eq!(response.finish_reason, FinishReason::EndTurn);
        assert_eq!(response.usage.input_tokens, 7);
        assert_eq!(response.usage.output_tokens, 2);
    }

    #[test]
    fn test_chat_fold_tool_call_deltas() {
        let mut fold = StreamFold::default();
        let events = fold.apply_chat_chunk(&json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_9", "function": {"name": "grep", "arguments": ""}}
            ]}, "finish_reason": null}]
        }));
        assert!(matches!(
            &events[0],
            ProviderEvent::ToolUseStart { id, name } if id == "call_9" && name == "grep"
        ));

        fold.apply_chat_chunk(&json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "{\"pattern\":"}}
            ]}, "finish_reason": null}]
        }));
        fold.apply_chat_chunk(&json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "\"fn main\"}"}}
            ]}, "finish_reason": null}]
        }));
        let events = fold.apply_chat_chunk(&json!({
            "choices": [{"delta": {}, "finish_reason": "tool_calls"}]
        }));
        assert!(events
            .iter()
            .any(|e| matches!(e, ProviderEvent::ToolUseStop { id } if id == "call_9")));

        let response = fold.finish();
        assert_eq!(response.finish_reason, FinishReason::ToolUse);
        assert_eq!(response.tool_calls.len(), 1);
        assert!(response.tool_calls[0].finished);
        assert_eq!(response.tool_calls[0].input, r#"{"pattern":"fn main"}"#);
    }

    #[test]
    fn test_chat_fold_reasoning_content() {
        let mut fold = StreamFold::default();
        let events = fold.apply_chat_chunk(&json!({
            "choices": [{"delta": {"reasoning_content": "hmm"}, "finish_reason": null}]
        }));
        assert!(matches!(&events[0], ProviderEvent::ThinkingDelta(d) if d == "hmm"));
        assert_eq!(fold.finish().reasoning.as_deref(), Some("hmm"));
    }

    #[test]
    fn test_responses_fold_function_call() {
        let mut fold = StreamFold::default();
        fold.apply_responses_event(
            "response.output_item.added",
            &json!({
                "output_index": 0,
                "item": {"type": "function_call", "call_id": "fc_1", "name": "view"}
            }),
        );
        fold.apply_responses_event(
            "response.function_call_arguments.delta",
            &json!({"output_index": 0, "delta": "{\"path\":\"x\"}"}),
        );
        fold.apply_responses_event(
            "response.output_item.done",
            &json!({"item": {"type": "function_call", "call_id": "fc_1", "arguments": "{\"path\":\"x\"}"}}),
        );
        fold.apply_responses_event(
            "response.completed",
            &json!({"response": {"usage": {"input_tokens": 5, "output_tokens": 3}}}),
        );

        let response = fold.finish();
        assert_eq!(response.finish_reason, FinishReason::ToolUse);
        assert_eq!(response.tool_calls[0].id, "fc_1");
        assert_eq!(response.tool_calls[0].input, "{\"path\":\"x\"}");
        assert_eq!(response.usage.input_tokens, 5);
    }

    #[test]
    fn test_usage_cached_tokens() {
        let usage = chat_usage(&json!({
            "prompt_tokens": 100,
            "completion_tokens": 10,
            "prompt_tokens_details": {"cached_tokens": 80}
        }));
        assert_eq!(usage.cache_read_tokens, 80);
    }
}
