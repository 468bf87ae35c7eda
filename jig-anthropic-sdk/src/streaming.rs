//! Server-Sent Events streaming for the Messages API
//!
//! The stream yields [`MessageStreamEvent`]s exactly as the API emits them;
//! higher layers fold them into whatever shape they need. The stream is
//! finite and not restartable.
//!
//! The HTTP request is sent and its status checked *before* the stream is
//! constructed, so pre-flight failures (auth, rate limits, context-limit
//! overruns) surface with their full error body — retry layers match on
//! that text.

use crate::error::{AnthropicError, ApiError};
use crate::messages::{ContentBlock, Message, StopReason, Usage};
use eventsource_stream::Eventsource;
use futures::stream::Stream;
use futures::StreamExt;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::Value;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

// ============================================================================
// Streaming Event Types
// ============================================================================

/// Server-sent event from the streaming API
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageStreamEvent {
    /// Start of the message (carries initial usage with input token count)
    MessageStart { message: Message },

    /// Start of a content block
    ContentBlockStart {
        index: usize,
        content_block: ContentBlock,
    },

    /// Delta update to a content block
    ContentBlockDelta {
        index: usize,
        delta: ContentBlockDelta,
    },

    /// End of a content block
    ContentBlockStop { index: usize },

    /// Delta update to the message (stop_reason, output token count)
    MessageDelta {
        delta: MessageDeltaData,
        usage: Option<DeltaUsage>,
    },

    /// End of the message
    MessageStop,

    /// Ping event (keepalive)
    Ping,

    /// Error event
    Error { error: ApiError },
}

/// Delta update for a content block
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlockDelta {
    /// Text delta
    TextDelta { text: String },

    /// Partial JSON for tool input
    InputJsonDelta { partial_json: String },

    /// Thinking delta
    ThinkingDelta { thinking: String },

    /// Signature delta for a thinking block. Signatures arrive whole or in
    /// pieces; either way the final value must be echoed back verbatim.
    SignatureDelta { signature: String },
}

/// Delta update for the message
#[derive(Debug, Clone, Deserialize)]
pub struct MessageDeltaData {
    pub stop_reason: Option<StopReason>,
    pub stop_sequence: Option<String>,
}

/// Usage info in delta events
#[derive(Debug, Clone, Deserialize)]
pub struct DeltaUsage {
    pub output_tokens: u64,
}

impl Usage {
    /// Merge the final output token count from a delta event
    pub fn apply_delta(&mut self, delta: &DeltaUsage) {
        self.output_tokens = delta.output_tokens;
    }
}

// ============================================================================
// MessageStream
// ============================================================================

type SseStream = Pin<
    Box<
        dyn Stream<
                Item = Result<
                    eventsource_stream::Event,
                    eventsource_stream::EventStreamError<reqwest::Error>,
                >,
            > + Send,
    >,
>;

/// A stream of message events from an Anthropic-family endpoint
pub struct MessageStream {
    inner: SseStream,
}

impl std::fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream").finish_non_exhaustive()
    }
}

impl MessageStream {
    /// Send the request and open the stream. Non-2xx responses are read in
    /// full and classified before any stream exists.
    pub(crate) async fn connect(
        client: &reqwest::Client,
        url: &str,
        headers: HeaderMap,
        body: Value,
    ) -> Result<Self, AnthropicError> {
        let response = client
            .post(url)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(AnthropicError::from_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_header(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(AnthropicError::from_status(
                status.as_u16(),
                &body,
                retry_after,
            ));
        }

        Ok(Self {
            inner: Box::pin(response.bytes_stream().eventsource()),
        })
    }

    fn parse_event(data: &str) -> Result<Option<MessageStreamEvent>, AnthropicError> {
        if data.is_empty() {
            return Ok(None);
        }
        let stream_event: MessageStreamEvent = serde_json::from_str(data).map_err(|e| {
            AnthropicError::Stream(format!(
                "failed to parse stream event: {} (data: {})",
                e, data
            ))
        })?;
        Ok(Some(stream_event))
    }
}

pub(crate) fn retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}

impl Stream for MessageStream {
    type Item = Result<MessageStreamEvent, AnthropicError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => match Self::parse_event(&event.data) {
                    Ok(Some(stream_event)) => return Poll::Ready(Some(Ok(stream_event))),
                    Ok(None) => continue,
                    Err(e) => return Poll::Ready(Some(Err(e))),
                },
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(AnthropicError::Stream(format!(
                        "stream error: {}",
                        e
                    )))));
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_delta() {
        let json = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#;
        let event = MessageStream::parse_event(json).unwrap().unwrap();
        match event {
            MessageStreamEvent::ContentBlockDelta { index, delta } => {
                assert_eq!(index, 0);
                assert!(matches!(delta, ContentBlockDelta::TextDelta { text } if text == "Hello"));
            }
            _ => panic!("expected ContentBlockDelta"),
        }
    }

    #[test]
    fn test_parse_input_json_delta() {
        let json = r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"path\":"}}"#;
        let event = MessageStream::parse_event(json).unwrap().unwrap();
        match event {
            MessageStreamEvent::ContentBlockDelta { delta, .. } => match delta {
                ContentBlockDelta::InputJsonDelta { partial_json } => {
                    assert_eq!(partial_json, r#"{"path":"#);
                }
                _ => panic!("expected InputJsonDelta"),
            },
            _ => panic!("expected ContentBlockDelta"),
        }
    }

    #[test]
    fn test_parse_signature_delta() {
        let json = r#"{"type":"content_block_delta","index":0,"delta":{"type":"signature_delta","signature":"EqQBCg"}}"#;
        let event = MessageStream::parse_event(json).unwrap().unwrap();
        match event {
            MessageStreamEvent::ContentBlockDelta { delta, .. } => {
                assert!(matches!(
                    delta,
                    ContentBlockDelta::SignatureDelta { signature } if signature == "EqQBCg"
                ));
            }
            _ => panic!("expected ContentBlockDelta"),
        }
    }

    #[test]
    fn test_parse_content_block_start_tool_use() {
        let json = r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"ls","input":{}}}"#;
        let event = MessageStream::parse_event(json).unwrap().unwrap();
        match event {
            MessageStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                assert_eq!(index, 1);
                assert!(matches!(content_block, ContentBlock::ToolUse { .. }));
            }
            _ => panic!("expected ContentBlockStart"),
        }
    }

    #[test]
    fn test_parse_message_delta_with_usage() {
        let json = r#"{"type":"message_delta","delta":{"stop_reason":"tool_use","stop_sequence":null},"usage":{"output_tokens":77}}"#;
        let event = MessageStream::parse_event(json).unwrap().unwrap();
        match event {
            MessageStreamEvent::MessageDelta { delta, usage } => {
                assert_eq!(delta.stop_reason, Some(StopReason::ToolUse));
                assert_eq!(usage.unwrap().output_tokens, 77);
            }
            _ => panic!("expected MessageDelta"),
        }
    }

    #[test]
    fn test_parse_message_stop_and_ping() {
        let stop = MessageStream::parse_event(r#"{"type":"message_stop"}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(stop, MessageStreamEvent::MessageStop));

        let ping = MessageStream::parse_event(r#"{"type":"ping"}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(ping, MessageStreamEvent::Ping));
    }

    #[test]
    fn test_parse_error_event() {
        let json =
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        let event = MessageStream::parse_event(json).unwrap().unwrap();
        match event {
            MessageStreamEvent::Error { error } => {
                assert_eq!(error.error_type, "overloaded_error");
            }
            _ => panic!("expected Error"),
        }
    }

    #[test]
    fn test_parse_empty_data_is_skipped() {
        assert!(MessageStream::parse_event("").unwrap().is_none());
    }

    #[test]
    fn test_parse_invalid_json_is_stream_error() {
        let result = MessageStream::parse_event("not json");
        assert!(matches!(result, Err(AnthropicError::Stream(_))));
    }

    #[test]
    fn test_retry_after_header_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", "2".parse().unwrap());
        assert_eq!(
            retry_after_header(&headers),
            Some(Duration::from_secs(2))
        );

        let empty = HeaderMap::new();
        assert_eq!(retry_after_header(&empty), None);
    }

    #[test]
    fn test_usage_apply_delta() {
        let mut usage = Usage {
            input_tokens: 100,
            ..Default::default()
        };
        usage.apply_delta(&DeltaUsage { output_tokens: 42 });
        assert_eq!(usage.input_tokens, 100);
        assert_eq!(usage.output_tokens, 42);
    }
}
