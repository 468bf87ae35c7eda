//! Message types for the Anthropic Messages API
//!
//! Request types use a `Param` suffix (e.g. `MessageParam`,
//! `ContentBlockParam`); response types have no suffix (`Message`,
//! `ContentBlock`). The same request body is valid against the direct API,
//! Bedrock and Vertex — only the endpoint, auth headers and the
//! `anthropic_version`/`model` placement differ (see [`crate::Endpoint`]).

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Request Types
// ============================================================================

/// Parameters for creating a message
#[derive(Debug, Clone, Serialize)]
pub struct MessageCreateParams {
    /// The model to use. `None` when the endpoint carries the model in the
    /// URL (Bedrock, Vertex).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// The messages in the conversation
    pub messages: Vec<MessageParam>,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// System prompt blocks (block form so cache markers can attach)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<Vec<SystemBlock>>,

    /// Sampling temperature (0.0 to 1.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Tools available to the model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,

    /// Stop sequences
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    /// Whether to stream the response (set by the client)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) stream: Option<bool>,

    /// Extended thinking configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingParam>,

    /// Dialect version marker required by Bedrock/Vertex endpoints
    /// (e.g. `"bedrock-2023-05-31"`, `"vertex-2023-10-16"`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anthropic_version: Option<String>,
}

impl MessageCreateParams {
    pub fn new(model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: Some(model.into()),
            messages: Vec::new(),
            max_tokens,
            system: None,
            temperature: None,
            tools: None,
            stop_sequences: None,
            stream: None,
            thinking: None,
            anthropic_version: None,
        }
    }
}

/// A single message in the request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageParam {
    pub role: Role,
    pub content: Vec<ContentBlockParam>,
}

impl MessageParam {
    pub fn user(content: Vec<ContentBlockParam>) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }

    pub fn assistant(content: Vec<ContentBlockParam>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }
}

/// Conversation role on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A system prompt block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

impl SystemBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            block_type: "text".to_string(),
            text: text.into(),
            cache_control: None,
        }
    }
}

/// Cache marker instructing the API to cache the processed form of a block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheControl {
    #[serde(rename = "type")]
    pub control_type: String,
}

impl CacheControl {
    pub fn ephemeral() -> Self {
        Self {
            control_type: "ephemeral".to_string(),
        }
    }
}

/// Content block within a request message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlockParam {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
    Image {
        source: ImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
    Thinking {
        thinking: String,
        signature: String,
    },
    RedactedThinking {
        data: String,
    },
}

impl ContentBlockParam {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            cache_control: None,
        }
    }

    /// Attach an ephemeral cache marker to blocks that support one
    pub fn with_cache_control(mut self) -> Self {
        match &mut self {
            Self::Text { cache_control, .. }
            | Self::ToolUse { cache_control, .. }
            | Self::ToolResult { cache_control, .. } => {
                *cache_control = Some(CacheControl::ephemeral());
            }
            _ => {}
        }
        self
    }
}

/// Image source for binary attachments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    Base64 { media_type: String, data: String },
}

/// A tool definition on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

/// Extended thinking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThinkingParam {
    Enabled { budget_tokens: u32 },
    Disabled,
}

// ============================================================================
// Response Types
// ============================================================================

/// A complete message response
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub role: Role,
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub stop_reason: Option<StopReason>,
    pub stop_sequence: Option<String>,
    #[serde(default)]
    pub usage: Usage,
}

/// Content block in a response
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    Thinking {
        thinking: String,
        signature: String,
    },
    RedactedThinking {
        data: String,
    },
}

/// Why the model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
    Refusal,
    PauseTurn,
}

/// Token accounting for a response
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: Option<u64>,
    #[serde(default)]
    pub cache_read_input_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_serialization_skips_absent_fields() {
        let params = MessageCreateParams::new("claude-sonnet-4-20250514", 1024);
        let value = serde_json::to_value(&params).unwrap();

        assert_eq!(value["model"], "claude-sonnet-4-20250514");
        assert_eq!(value["max_tokens"], 1024);
        assert!(value.get("system").is_none());
        assert!(value.get("thinking").is_none());
        assert!(value.get("anthropic_version").is_none());
    }

    #[test]
    fn test_model_omitted_for_url_addressed_endpoints() {
        let mut params = MessageCreateParams::new("x", 10);
        params.model = None;
        params.anthropic_version = Some("vertex-2023-10-16".to_string());
        let value = serde_json::to_value(&params).unwrap();

        assert!(value.get("model").is_none());
        assert_eq!(value["anthropic_version"], "vertex-2023-10-16");
    }

    #[test]
    fn test_cache_control_attaches_to_text() {
        let block = ContentBlockParam::text("hello").with_cache_control();
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["cache_control"]["type"], "ephemeral");
    }

    #[test]
    fn test_cache_control_ignored_on_thinking() {
        let block = ContentBlockParam::Thinking {
            thinking: "hmm".to_string(),
            signature: "sig".to_string(),
        }
        .with_cache_control();
        let value = serde_json::to_value(&block).unwrap();
        assert!(value.get("cache_control").is_none());
    }

    #[test]
    fn test_tool_result_block_wire_shape() {
        let block = ContentBlockParam::ToolResult {
            tool_use_id: "toolu_1".to_string(),
            content: "ok".to_string(),
            is_error: Some(false),
            cache_control: None,
        };
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["type"], "tool_result");
        assert_eq!(value["tool_use_id"], "toolu_1");
        assert_eq!(value["is_error"], false);
    }

    #[test]
    fn test_thinking_param_tagged_form() {
        let value = serde_json::to_value(ThinkingParam::Enabled {
            budget_tokens: 2048,
        })
        .unwrap();
        assert_eq!(value["type"], "enabled");
        assert_eq!(value["budget_tokens"], 2048);
    }

    #[test]
    fn test_response_message_deserialization() {
        let json = r#"{
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "content": [
                {"type": "thinking", "thinking": "let me see", "signature": "sig_a"},
                {"type": "text", "text": "hi"},
                {"type": "tool_use", "id": "toolu_1", "name": "ls", "input": {"path": "/tmp"}}
            ],
            "model": "claude-sonnet-4-20250514",
            "stop_reason": "tool_use",
            "stop_sequence": null,
            "usage": {"input_tokens": 12, "output_tokens": 34, "cache_read_input_tokens": 5}
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();

        assert_eq!(msg.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(msg.usage.input_tokens, 12);
        assert_eq!(msg.usage.cache_read_input_tokens, Some(5));
        assert_eq!(msg.content.len(), 3);
        match &msg.content[0] {
            ContentBlock::Thinking { signature, .. } => assert_eq!(signature, "sig_a"),
            other => panic!("expected thinking block, got {:?}", other),
        }
    }

    #[test]
    fn test_usage_defaults_when_absent() {
        let json = r#"{
            "id": "msg_2", "type": "message", "role": "assistant",
            "content": [], "model": "m", "stop_reason": null, "stop_sequence": null
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.usage.input_tokens, 0);
        assert!(msg.usage.cache_read_input_tokens.is_none());
    }
}
