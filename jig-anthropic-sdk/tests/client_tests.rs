//! Wire-level tests against a mock HTTP endpoint

use futures::StreamExt;
use jig_anthropic_sdk::{
    Anthropic, AnthropicError, ContentBlock, ContentBlockDelta, ContentBlockParam,
    MessageCreateParams, MessageParam, MessageStreamEvent, StopReason,
};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn params(text: &str) -> MessageCreateParams {
    let mut params = MessageCreateParams::new("claude-sonnet-4-20250514", 1024);
    params
        .messages
        .push(MessageParam::user(vec![ContentBlockParam::text(text)]));
    params
}

async fn client_for(server: &MockServer) -> Anthropic {
    Anthropic::builder()
        .auth(jig_anthropic_sdk::Auth::ApiKey("sk-test".into()))
        .base_url(server.uri())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_create_parses_response_and_sends_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(serde_json::json!({
            "model": "claude-sonnet-4-20250514",
            "max_tokens": 1024
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{
                "id": "msg_1", "type": "message", "role": "assistant",
                "content": [{"type": "text", "text": "hello there"}],
                "model": "claude-sonnet-4-20250514",
                "stop_reason": "end_turn", "stop_sequence": null,
                "usage": {"input_tokens": 11, "output_tokens": 3}
            }"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let message = client
        .create("claude-sonnet-4-20250514", params("hi"))
        .await
        .unwrap();

    assert_eq!(message.stop_reason, Some(StopReason::EndTurn));
    assert_eq!(message.usage.input_tokens, 11);
    match &message.content[0] {
        ContentBlock::Text { text } => assert_eq!(text, "hello there"),
        other => panic!("expected text, got {:?}", other),
    }
}

#[tokio::test]
async fn test_create_classifies_error_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "3")
                .set_body_string(
                    r#"{"type":"error","error":{"type":"rate_limit_error","message":"slow down"}}"#,
                ),
        )
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client
        .create("claude-sonnet-4-20250514", params("hi"))
        .await
        .unwrap_err();
    match err {
        AnthropicError::RateLimited {
            message,
            retry_after,
        } => {
            assert_eq!(message, "slow down");
            assert_eq!(retry_after, Some(std::time::Duration::from_secs(3)));
        }
        other => panic!("expected RateLimited, got {:?}", other),
    }
}

#[tokio::test]
async fn test_stream_yields_events_in_wire_order() {
    let body = [
        r#"event: message_start
data: {"type":"message_start","message":{"id":"msg_1","type":"message","role":"assistant","content":[],"model":"m","stop_reason":null,"stop_sequence":null,"usage":{"input_tokens":5,"output_tokens":0}}}"#,
        r#"event: content_block_start
data: {"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
        r#"event: content_block_delta
data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}"#,
        r#"event: content_block_delta
data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"lo"}}"#,
        r#"event: content_block_stop
data: {"type":"content_block_stop","index":0}"#,
        r#"event: message_delta
data: {"type":"message_delta","delta":{"stop_reason":"end_turn","stop_sequence":null},"usage":{"output_tokens":2}}"#,
        r#"event: message_stop
data: {"type":"message_stop"}"#,
    ]
    .join("\n\n")
        + "\n\n";

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_partial_json(serde_json::json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(body.into_bytes(), "text/event-stream"),
        )
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let mut stream = client
        .stream("claude-sonnet-4-20250514", params("hi"))
        .await
        .unwrap();

    let mut text = String::new();
    let mut saw_stop_reason = None;
    while let Some(event) = stream.next().await {
        match event.unwrap() {
            MessageStreamEvent::ContentBlockDelta {
                delta: ContentBlockDelta::TextDelta { text: delta },
                ..
            } => text.push_str(&delta),
            MessageStreamEvent::MessageDelta { delta, .. } => {
                saw_stop_reason = delta.stop_reason;
            }
            _ => {}
        }
    }

    assert_eq!(text, "Hello");
    assert_eq!(saw_stop_reason, Some(StopReason::EndTurn));
}

#[tokio::test]
async fn test_stream_preflight_error_carries_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(400).set_body_string(
            r#"{"type":"error","error":{"type":"invalid_request_error","message":"input length and max_tokens exceed context limit: 10 + 20 > 25"}}"#,
        ))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client
        .stream("claude-sonnet-4-20250514", params("hi"))
        .await
        .unwrap_err();
    match err {
        AnthropicError::InvalidRequest(message) => {
            // Retry layers match on this text; it must survive intact.
            assert!(message.contains("exceed context limit: 10 + 20 > 25"));
        }
        other => panic!("expected InvalidRequest, got {:?}", other),
    }
}
