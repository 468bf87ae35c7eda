//! Conversions between the runtime conversation model and the Anthropic wire

use crate::tool::ToolInfo;
use crate::types::{FinishReason, Message, Part, Role};
use base64::Engine;
use jig_anthropic_sdk::{
    ContentBlockParam, ImageSource, MessageParam, Role as WireRole, StopReason, SystemBlock,
    Tool as WireTool,
};

/// Encode the normalized log: system messages are lifted into system blocks,
/// tool messages become wire user messages carrying `tool_result` blocks,
/// and consecutive same-wire-role messages are merged (the API requires
/// alternating turns).
pub fn to_wire_messages(messages: &[Message]) -> (Option<Vec<SystemBlock>>, Vec<MessageParam>) {
    let mut system_text = String::new();
    let mut wire: Vec<MessageParam> = Vec::new();

    for msg in messages {
        if msg.role == Role::System {
            if !system_text.is_empty() {
                system_text.push_str("\n\n");
            }
            system_text.push_str(&msg.text());
            continue;
        }

        let role = match msg.role {
            Role::Assistant => WireRole::Assistant,
            _ => WireRole::User,
        };
        let blocks = to_wire_blocks(msg);
        if blocks.is_empty() {
            continue;
        }

        match wire.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => wire.push(MessageParam {
                role,
                content: blocks,
            }),
        }
    }

    let system = if system_text.is_empty() {
        None
    } else {
        Some(vec![SystemBlock::text(system_text)])
    };
    (system, wire)
}

fn to_wire_blocks(msg: &Message) -> Vec<ContentBlockParam> {
    let mut blocks = Vec::new();
    for part in &msg.parts {
        match part {
            Part::Reasoning { text, signature } => {
                // Unsigned reasoning cannot be replayed; redacted thinking
                // arrives as an empty text with an opaque signature.
                if signature.is_empty() {
                    continue;
                }
                if text.is_empty() {
                    blocks.push(ContentBlockParam::RedactedThinking {
                        data: signature.clone(),
                    });
                } else {
                    blocks.push(ContentBlockParam::Thinking {
                        thinking: text.clone(),
                        signature: signature.clone(),
                    });
                }
            }
            Part::Text { text } => {
                if !text.is_empty() {
                    blocks.push(ContentBlockParam::text(text.clone()));
                }
            }
            Part::Binary { mime, data } => {
                if msg.role == Role::User {
                    blocks.push(ContentBlockParam::Image {
                        source: ImageSource::Base64 {
                            media_type: mime.clone(),
                            data: base64::engine::general_purpose::STANDARD.encode(data),
                        },
                    });
                }
            }
            Part::ToolCall(call) => {
                let input = serde_json::from_str(&call.input)
                    .unwrap_or_else(|_| serde_json::Value::Object(Default::default()));
                blocks.push(ContentBlockParam::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input,
                    cache_control: None,
                });
            }
            Part::ToolResult(result) => {
                blocks.push(ContentBlockParam::ToolResult {
                    tool_use_id: result.call_id.clone(),
                    content: result.content.clone(),
                    is_error: Some(result.is_error),
                    cache_control: None,
                });
            }
            Part::Finish { .. } => {}
        }
    }
    blocks
}

pub fn to_wire_tools(tools: &[ToolInfo]) -> Vec<WireTool> {
    tools
        .iter()
        .map(|tool| WireTool {
            name: tool.name.clone(),
            description: Some(tool.description.clone()),
            input_schema: tool.parameters.to_value(),
            cache_control: None,
        })
        .collect()
}

/// Apply ephemeral cache markers: the system prompt, the last tool
/// definition, and the last two user-role wire messages. At most four
/// marked blocks per request.
pub fn apply_cache_markers(
    system: &mut Option<Vec<SystemBlock>>,
    messages: &mut [MessageParam],
    tools: &mut [WireTool],
) {
    if let Some(blocks) = system {
        if let Some(first) = blocks.first_mut() {
            first.cache_control = Some(jig_anthropic_sdk::CacheControl::ephemeral());
        }
    }
    if let Some(last_tool) = tools.last_mut() {
        last_tool.cache_control = Some(jig_anthropic_sdk::CacheControl::ephemeral());
    }

    let mut marked = 0;
    for msg in messages.iter_mut().rev() {
        if marked >= 2 {
            break;
        }
        if msg.role != WireRole::User {
            continue;
        }
        if let Some(block) = msg.content.last_mut() {
            let taken = std::mem::replace(block, ContentBlockParam::text(""));
            *block = taken.with_cache_control();
            marked += 1;
        }
    }
}

pub fn from_stop_reason(reason: Option<StopReason>) -> FinishReason {
    match reason {
        Some(StopReason::EndTurn) => FinishReason::EndTurn,
        Some(StopReason::MaxTokens) => FinishReason::MaxTokens,
        Some(StopReason::ToolUse) => FinishReason::ToolUse,
        // Stop sequences end the turn from the loop's point of view.
        Some(StopReason::StopSequence) => FinishReason::EndTurn,
        Some(StopReason::Refusal) => FinishReason::Error,
        Some(StopReason::PauseTurn) => FinishReason::EndTurn,
        None => FinishReason::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use crate::types::{ToolCallPart, ToolResultPart};

    fn assistant_with_call() -> Message {
        let mut msg = Message::new(Role::Assistant);
        msg.append_text("listing");
        msg.parts.push(Part::ToolCall(ToolCallPart {
            id: "toolu_1".to_string(),
            name: "ls".to_string(),
            input: r#"{"path":"/tmp"}"#.to_string(),
            finished: true,
        }));
        msg
    }

    #[test]
    fn test_system_lifted_out_of_message_list() {
        let log = vec![Message::system("be terse"), Message::user("hi")];
        let (system, wire) = to_wire_messages(&log);
        assert_eq!(system.unwrap()[0].text, "be terse");
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0].role, WireRole::User);
    }

    #[test]
    fn test_tool_message_becomes_user_with_results() {
        let log = vec![
            Message::user("go"),
            assistant_with_call(),
            Message::tool_results(vec![ToolResultPart {
                call_id: "toolu_1".to_string(),
                content: "a.txt\nb.txt".to_string(),
                is_error: false,
            }]),
        ];
        let (_, wire) = to_wire_messages(&log);
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[2].role, WireRole::User);
        match &wire[2].content[0] {
            ContentBlockParam::ToolResult {
                tool_use_id,
                is_error,
                ..
            } => {
                assert_eq!(tool_use_id, "toolu_1");
                assert_eq!(*is_error, Some(false));
            }
            other => panic!("expected tool_result, got {:?}", other),
        }
    }

    #[test]
    fn test_consecutive_user_messages_merged() {
        let log = vec![
            assistant_with_call(),
            Message::tool_results(vec![ToolResultPart {
                call_id: "toolu_1".to_string(),
                content: "ok".to_string(),
                is_error: false,
            }]),
            Message::user("thanks, continue"),
        ];
        let (_, wire) = to_wire_messages(&log);
        // tool results + following user text share one wire message
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[1].content.len(), 2);
    }

    #[test]
    fn test_tool_call_ids_round_trip_byte_exact() {
        let (_, wire) = to_wire_messages(&[assistant_with_call()]);
        match &wire[0].content[1] {
            ContentBlockParam::ToolUse { id, name, input, .. } => {
                assert_eq!(id, "toolu_1");
                assert_eq!(name, "ls");
                assert_eq!(input["path"], "/tmp");
            }
            other => panic!("expected tool_use, got {:?}", other),
        }
    }

    #[test]
    fn test_signed_reasoning_encoded_unsigned_skipped() {
        let mut msg = Message::new(Role::Assistant);
        msg.append_reasoning("signed thought");
        msg.set_reasoning_signature("sig_x");
        msg.append_text("answer");

        let (_, wire) = to_wire_messages(&[msg]);
        assert!(matches!(
            &wire[0].content[0],
            ContentBlockParam::Thinking { signature, .. } if signature == "sig_x"
        ));

        let mut unsigned = Message::new(Role::Assistant);
        unsigned.append_reasoning("ephemeral thought");
        unsigned.append_text("answer");
        let (_, wire) = to_wire_messages(&[unsigned]);
        assert_eq!(wire[0].content.len(), 1);
        assert!(matches!(&wire[0].content[0], ContentBlockParam::Text { .. }));
    }

    #[test]
    fn test_redacted_thinking_round_trip() {
        let mut msg = Message::new(Role::Assistant);
        msg.set_reasoning_signature("opaque_blob");
        msg.append_text("answer");
        let (_, wire) = to_wire_messages(&[msg]);
        assert!(matches!(
            &wire[0].content[0],
            ContentBlockParam::RedactedThinking { data } if data == "opaque_blob"
        ));
    }

    #[test]
    fn test_binary_only_on_user_messages() {
        let mut user = Message::user("look at this");
        user.parts.push(Part::Binary {
            mime: "image/png".to_string(),
            data: vec![1, 2, 3],
        });
        let mut assistant = Message::assistant("I see");
        assistant.parts.push(Part::Binary {
            mime: "image/png".to_string(),
            data: vec![1, 2, 3],
        });

        let (_, wire) = to_wire_messages(&[user, assistant]);
        assert!(wire[0]
            .content
            .iter()
            .any(|b| matches!(b, ContentBlockParam::Image { .. })));
        assert!(!wire[1]
            .content
            .iter()
            .any(|b| matches!(b, ContentBlockParam::Image { .. })));
    }

    #[test]
    fn test_cache_markers_limits() {
        let log = vec![
            Message::system("sys"),
            Message::user("one"),
            Message::assistant("ok"),
            Message::user("two"),
            Message::assistant("ok"),
            Message::user("three"),
        ];
        let (mut system, mut wire) = to_wire_messages(&log);
        let mut tools = to_wire_tools(&[
            ToolInfo::new("a", "", Schema::empty_object()),
            ToolInfo::new("b", "", Schema::empty_object()),
        ]);
        apply_cache_markers(&mut system, &mut wire, &mut tools);

        assert!(system.unwrap()[0].cache_control.is_some());
        assert!(tools[0].cache_control.is_none());
        assert!(tools[1].cache_control.is_some());

        let marked: Vec<bool> = wire
            .iter()
            .map(|m| {
                m.content.iter().any(|b| {
                    matches!(b, ContentBlockParam::Text { cache_control: Some(_), .. })
                })
            })
            .collect();
        // Only the last two user messages are marked.
        assert_eq!(marked, vec![false, false, true, false, true]);
    }

    #[test]
    fn test_stop_reason_mapping() {
        assert_eq!(
            from_stop_reason(Some(StopReason::ToolUse)),
            FinishReason::ToolUse
        );
        assert_eq!(
            from_stop_reason(Some(StopReason::EndTurn)),
            FinishReason::EndTurn
        );
        assert_eq!(
            from_stop_reason(Some(StopReason::MaxTokens)),
            FinishReason::MaxTokens
        );
        assert_eq!(from_stop_reason(None), FinishReason::Unknown);
    }
}
