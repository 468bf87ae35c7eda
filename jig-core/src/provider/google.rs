//! Google GenAI provider (Generative Language API and Vertex)
//!
//! Conversations map to `contents` with `parts`; tool calls become
//! `functionCall` / `functionResponse` pairs. Gemini matches responses to
//! calls by *name*, not id, so encoding keeps a call-id → name map built
//! from the log. Thinking arrives as parts flagged `thought: true`.

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

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

pub struct GoogleProvider {
    provider_id: String,
    descriptor: ModelDescriptor,
    selected: SelectedModel,
    base_url: String,
    /// Bearer auth (Vertex / OAuth) instead of the API-key header
    bearer: bool,
    extra_headers: HashMap<String, String>,
    extra_body: serde_json::Map<String, Value>,
    credentials: Arc<dyn CredentialStore>,
    retry: RetryConfig,
    client: reqwest::Client,
    token: RwLock<String>,
}

impl GoogleProvider {
    pub async fn new(
        config: &ProviderConfig,
        selected: SelectedModel,
        credentials: Arc<dyn CredentialStore>,
        retry: RetryConfig,
    ) -> Result<Self, ProviderError> {
        if config.dialect != ProviderDialect::Google {
            return Err(ProviderError::Configuration(format!(
                "provider '{}': dialect {:?} is not google",
                config.id, config.dialect
            )));
        }
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

        // Vertex serves the same dialect under a project/location path with
        // bearer auth; project presence selects it.
        let (base_url, bearer) = match (&config.project, &config.base_url) {
            (Some(project), _) => {
                let location = config.location.clone().unwrap_or_else(|| "global".into());
                (
                    format!(
                        "https://aiplatform.googleapis.com/v1/projects/{}/locations/{}/publishers/google",
                        project, location
                    ),
                    true,
                )
            }
            (None, Some(base)) => (base.trim_end_matches('/').to_string(), config.oauth.is_some()),
            (None, None) => (DEFAULT_BASE_URL.to_string(), config.oauth.is_some()),
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
            base_url,
            bearer,
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

    fn url(&self) -> String {
        if self.base_url.contains("/publishers/google") {
            format!(
                "{}/models/{}:streamGenerateContent?alt=sse",
                self.base_url, self.selected.model_id
            )
        } else {
            format!(
                "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
                self.base_url, self.selected.model_id
            )
        }
    }

    fn max_tokens(&self, state: RetryState) -> u32 {
        state
            .max_tokens_override
            .or(self.selected.max_tokens)
            .unwrap_or(self.descriptor.default_max_tokens)
    }

    fn build_body(&self, messages: &[Message], tools: &[ToolInfo], state: RetryState) -> Value {
        let (system, contents) = to_contents(messages);
        let mut body = json!({
            "contents": contents,
            "generationConfig": {"maxOutputTokens": self.max_tokens(state)},
        });
        let obj = body.as_object_mut().expect("body is an object");
        if let Some(system) = system {
            obj.insert(
                "systemInstruction".to_string(),
                json!({"parts": [{"text": system}]}),
            );
        }
        if !tools.is_empty() {
            let declarations: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters.to_value(),
                    })
                })
                .collect();
            obj.insert(
                "tools".to_string(),
                json!([{"functionDeclarations": declarations}]),
            );
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
    ) -> Result<super::openai::SseByteStream, ProviderError> {
        let mut request = self
            .client
            .post(self.url())
            .header("content-type", "application/json");
        if self.bearer {
            request = request.bearer_auth(self.token.read().clone());
        } else {
            request = request.header("x-goog-api-key", self.token.read().clone());
        }
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
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body, None));
        }
        Ok(Box::pin(response.bytes_stream().eventsource()))
    }
}

#[async_trait]
impl Provider for GoogleProvider {
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
        let events = async_stream::stream! {
            let mut sse = sse;
            let mut response = ProviderResponse::default();
            let mut call_counter = 0usize;
            let mut content_started = false;

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
                if event.data.is_empty() {
                    continue;
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

                if let Some(usage) = chunk.get("usageMetadata") {
                    response.usage = TokenUsage {
                        input_tokens: usage["promptTokenCount"].as_u64().unwrap_or(0),
                        output_tokens: usage["candidatesTokenCount"].as_u64().unwrap_or(0),
                        cache_read_tokens: usage["cachedContentTokenCount"].as_u64().unwrap_or(0),
                        cache_creation_tokens: 0,
                    };
                }

                let candidate = match chunk["candidates"].get(0) {
                    Some(c) => c,
                    None => continue,
                };

                if let Some(parts) = candidate["content"]["parts"].as_array() {
                    for part in parts {
                        if let Some(text) = part["text"].as_str() {
                            if part["thought"].as_bool() == Some(true) {
                                match &mut response.reasoning {
                                    Some(r) => r.push_str(text),
                                    None => response.reasoning = Some(text.to_string()),
                                }
                                yield Ok(ProviderEvent::ThinkingDelta(text.to_string()));
                            } else if !text.is_empty() {
                                if !content_started {
                                    content_started = true;
                                    yield Ok(ProviderEvent::ContentStart);
                                }
                                response.content.push_str(text);
                                yield Ok(ProviderEvent::ContentDelta(text.to_string()));
                            }
                        }
                        if let Some(call) = part.get("functionCall") {
                            // Gemini sends the whole call at once, without an
                            // id; synthesize one stable within the turn.
                            call_counter += 1;
                            let id = format!("call_{}", call_counter);
                            let name = call["name"].as_str().unwrap_or("").to_string();
                            let args = call.get("args").cloned().unwrap_or(json!({}));
                            let input = args.to_string();
                            response.tool_calls.push(ToolCallPart {
                                id: id.clone(),
                                name: name.clone(),
                                input: input.clone(),
                                finished: true,
                            });
                            yield Ok(ProviderEvent::ToolUseStart { id: id.clone(), name });
                            yield Ok(ProviderEvent::ToolUseDelta {
                                id: id.clone(),
                                partial_json: input,
                            });
                            yield Ok(ProviderEvent::ToolUseStop { id });
                        }
                    }
                }

                if let Some(reason) = candidate["finishReason"].as_str() {
                    response.finish_reason = match reason {
                        "STOP" => FinishReason::EndTurn,
                        "MAX_TOKENS" => FinishReason::MaxTokens,
                        "SAFETY" | "RECITATION" => FinishReason::Error,
                        _ => FinishReason::Unknown,
                    };
                }
            }

            if content_started {
                yield Ok(ProviderEvent::ContentStop);
            }
            if !response.tool_calls.is_empty() {
                response.finish_reason = FinishReason::ToolUse;
            }
            yield Ok(ProviderEvent::Complete(response));
        };

        Ok(Box::pin(events))
    }
}

/// Encode the normalized log as Gemini `contents`, returning the system
/// instruction separately.
fn to_contents(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    // functionResponse parts reference calls by name.
    let mut call_names: HashMap<String, String> = HashMap::new();
    for msg in messages {
        for call in msg.tool_calls() {
            call_names.insert(call.id.clone(), call.name.clone());
        }
    }

    let mut system = String::new();
    let mut contents: Vec<Value> = Vec::new();

    for msg in messages {
        if msg.role == Role::System {
            if !system.is_empty() {
                system.push_str("\n\n");
            }
            system.push_str(&msg.text());
            continue;
        }

        let role = match msg.role {
            Role::Assistant => "model",
            _ => "user",
        };
        let mut parts: Vec<Value> = Vec::new();

        for part in &msg.parts {
            match part {
                Part::Text { text } if !text.is_empty() => {
                    parts.push(json!({"text": text}));
                }
                Part::Binary { mime, data } if msg.role == Role::User => {
                    parts.push(json!({
                        "inlineData": {
                            "mimeType": mime,
                            "data": base64::engine::general_purpose::STANDARD.encode(data),
                        }
                    }));
                }
                Part::ToolCall(call) => {
                    let args: Value =
                        serde_json::from_str(&call.input).unwrap_or_else(|_| json!({}));
                    parts.push(json!({
                        "functionCall": {"name": call.name, "args": args}
                    }));
                }
                Part::ToolResult(result) => {
                    let name = call_names
                        .get(&result.call_id)
                        .cloned()
                        .unwrap_or_else(|| result.call_id.clone());
                    let payload = if result.is_error {
                        json!({"error": result.content})
                    } else {
                        json!({"output": result.content})
                    };
                    parts.push(json!({
                        "functionResponse": {"name": name, "response": payload}
                    }));
                }
                _ => {}
            }
        }

        if parts.is_empty() {
            continue;
        }
        match contents.last_mut() {
            Some(last) if last["role"] == role => {
                if let Some(existing) = last["parts"].as_array_mut() {
                    existing.extend(parts);
                }
            }
            _ => contents.push(json!({"role": role, "parts": parts})),
        }
    }

    let system = if system.is_empty() {
        None
    } else {
        Some(system)
    };
    (system, contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolResultPart;

    fn log() -> Vec<Message> {
        let mut assistant = Message::new(Role::Assistant);
        assistant.parts.push(Part::ToolCall(ToolCallPart {
            id: "call_1".to_string(),
            name: "ls".to_string(),
            input: r#"{"path":"/tmp"}"#.to_string(),
            finished: true,
        }));
        vec![
            Message::system("answer briefly"),
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
    fn test_system_instruction_separated() {
        let (system, contents) = to_contents(&log());
        assert_eq!(system.as_deref(), Some("answer briefly"));
        assert!(contents.iter().all(|c| c["role"] != "system"));
    }

    #[test]
    fn test_function_response_uses_name_not_id() {
        let (_, contents) = to_contents(&log());
        let last = contents.last().unwrap();
        assert_eq!(last["role"], "user");
        assert_eq!(
            last["parts"][0]["functionResponse"]["name"], "ls",
            "responses must be matched by function name"
        );
        assert_eq!(
            last["parts"][0]["functionResponse"]["response"]["output"],
            "a.txt"
        );
    }

    #[test]
    fn test_function_call_args_parsed() {
        let (_, contents) = to_contents(&log());
        let model_turn = &contents[1];
        assert_eq!(model_turn["role"], "model");
        assert_eq!(
            model_turn["parts"][0]["functionCall"]["args"]["path"],
            "/tmp"
        );
    }

    #[test]
    fn test_error_result_payload() {
        let mut assistant = Message::new(Role::Assistant);
        assistant.parts.push(Part::ToolCall(ToolCallPart {
            id: "c".to_string(),
            name: "view".to_string(),
            input: "{}".to_string(),
            finished: true,
        }));
        let log = vec![
            assistant,
            Message::tool_results(vec![ToolResultPart {
                call_id: "c".to_string(),
                content: "no such file".to_string(),
                is_error: true,
            }]),
        ];
        let (_, contents) = to_contents(&log);
        assert_eq!(
            contents[1]["parts"][0]["functionResponse"]["response"]["error"],
            "no such file"
        );
    }

    #[test]
    fn test_consecutive_user_turns_merged() {
        let log = vec![Message::user("one"), Message::user("two")];
        let (_, contents) = to_contents(&log);
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0]["parts"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_binary_attachment_inline_data() {
        let mut user = Message::user("see image");
        user.parts.push(Part::Binary {
            mime: "image/png".to_string(),
            data: vec![0x89, 0x50],
        });
        let (_, contents) = to_contents(&[user]);
        assert_eq!(
            contents[0]["parts"][1]["inlineData"]["mimeType"],
            "image/png"
        );
    }
}
