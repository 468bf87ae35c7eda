//! Provider-agnostic conversation types
//!
//! A conversation is an ordered log of [`Message`]s, each an ordered list of
//! [`Part`]s. Providers never see these types directly; each dialect encoder
//! converts the normalized log into its own wire form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A message in the conversation log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub parts: Vec<Part>,
}

/// One element of a message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    /// Text content; may be partial until the stream terminates
    Text { text: String },

    /// Model-emitted reasoning with an opaque provider signature that must
    /// be echoed verbatim when the message is re-sent
    Reasoning { text: String, signature: String },

    /// Binary attachment; only valid on user messages
    Binary { mime: String, data: Vec<u8> },

    /// A tool invocation requested by the model; only valid on assistant
    /// messages. `input` is the JSON-encoded argument text, accumulated
    /// from stream deltas.
    ToolCall(ToolCallPart),

    /// The result for a tool call; only valid on tool messages
    ToolResult(ToolResultPart),

    /// Terminal marker; at most one per assistant message, always last
    Finish {
        reason: FinishReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallPart {
    /// Unique within the turn
    pub id: String,
    pub name: String,
    /// JSON-encoded input text
    pub input: String,
    /// False while input deltas are still arriving
    pub finished: bool,
}

/// The outcome of a tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultPart {
    /// The [`ToolCallPart::id`] this result answers
    pub call_id: String,
    pub content: String,
    pub is_error: bool,
}

/// Why an assistant message ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    Canceled,
    Error,
    #[default]
    Unknown,
}

impl Message {
    pub fn new(role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            created_at: Utc::now(),
            parts: Vec::new(),
        }
    }

    /// Create a system message with text content
    pub fn system(text: impl Into<String>) -> Self {
        Self::with_text(Role::System, text)
    }

    /// Create a user message with text content
    pub fn user(text: impl Into<String>) -> Self {
        Self::with_text(Role::User, text)
    }

    /// Create an assistant message with text content
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_text(Role::Assistant, text)
    }

    /// Create a tool message carrying results
    pub fn tool_results(results: Vec<ToolResultPart>) -> Self {
        let mut msg = Self::new(Role::Tool);
        msg.parts = results.into_iter().map(Part::ToolResult).collect();
        msg
    }

    fn with_text(role: Role, text: impl Into<String>) -> Self {
        let mut msg = Self::new(role);
        msg.parts.push(Part::Text { text: text.into() });
        msg
    }

    /// All text content concatenated
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// The reasoning part, if any
    pub fn reasoning(&self) -> Option<(&str, &str)> {
        self.parts.iter().find_map(|p| match p {
            Part::Reasoning { text, signature } => Some((text.as_str(), signature.as_str())),
            _ => None,
        })
    }

    /// All tool calls in order
    pub fn tool_calls(&self) -> Vec<&ToolCallPart> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::ToolCall(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    /// All tool results in order
    pub fn tool_results_parts(&self) -> Vec<&ToolResultPart> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::ToolResult(result) => Some(result),
                _ => None,
            })
            .collect()
    }

    /// The finish reason, if the message is terminal
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.parts.iter().rev().find_map(|p| match p {
            Part::Finish { reason, .. } => Some(*reason),
            _ => None,
        })
    }

    /// Append a text delta, extending the trailing text part if present
    pub fn append_text(&mut self, delta: &str) {
        if let Some(Part::Text { text }) = self.parts.last_mut() {
            text.push_str(delta);
        } else {
            self.parts.push(Part::Text {
                text: delta.to_string(),
            });
        }
    }

    /// Append a reasoning delta, creating the reasoning part on first use
    pub fn append_reasoning(&mut self, delta: &str) {
        if let Some(Part::Reasoning { text, .. }) = self
            .parts
            .iter_mut()
            .find(|p| matches!(p, Part::Reasoning { .. }))
        {
            text.push_str(delta);
        } else {
            self.parts.push(Part::Reasoning {
                text: delta.to_string(),
                signature: String::new(),
            });
        }
    }

    /// Set the reasoning signature (replaces, never concatenates)
    pub fn set_reasoning_signature(&mut self, sig: &str) {
        if let Some(Part::Reasoning { signature, .. }) = self
            .parts
            .iter_mut()
            .find(|p| matches!(p, Part::Reasoning { .. }))
        {
            *signature = sig.to_string();
        } else {
            self.parts.push(Part::Reasoning {
                text: String::new(),
                signature: sig.to_string(),
            });
        }
    }

    /// Mark the message finished
    pub fn finish(&mut self, reason: FinishReason, message: Option<String>) {
        self.parts.retain(|p| !matches!(p, Part::Finish { .. }));
        self.parts.push(Part::Finish { reason, message });
    }

    /// True when no content, reasoning or tool call was produced
    pub fn is_empty_assistant(&self) -> bool {
        self.role == Role::Assistant
            && self.parts.iter().all(|p| match p {
                Part::Text { text } => text.is_empty(),
                Part::Reasoning { text, signature } => text.is_empty() && signature.is_empty(),
                Part::Finish { .. } => true,
                _ => false,
            })
    }

    /// Ids of finished tool calls that `results` does not answer
    pub fn unanswered_calls(&self, results: &[&ToolResultPart]) -> Vec<&ToolCallPart> {
        self.tool_calls()
            .into_iter()
            .filter(|c| c.finished && !results.iter().any(|r| r.call_id == c.id))
            .collect()
    }
}

/// Token accounting for one assistant message, aggregated per session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_creation_tokens += other.cache_creation_tokens;
    }
}
