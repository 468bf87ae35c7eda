//! Conversation normalizer
//!
//! Providers reject logs that violate the tool-pairing automaton (every
//! `tool_use` must be answered before the next non-tool message). Streams
//! can be canceled at arbitrary points, so the log on disk is allowed to be
//! ragged; this pass repairs it at send time. The agent loop maintains the
//! same invariant at construction time — two layers, because either can be
//! interrupted.

use crate::types::{Message, Part, Role, ToolResultPart};

/// Content of a synthesized result for an unanswered tool call
pub const INTERRUPTED_CONTENT: &str = "tool execution interrupted";

/// A synthesized error result preserving provider-side pairing
pub fn interrupted_result(call_id: &str) -> ToolResultPart {
    ToolResultPart {
        call_id: call_id.to_string(),
        content: INTERRUPTED_CONTENT.to_string(),
        is_error: true,
    }
}

/// Normalize a message log into wire-valid form.
///
/// - Assistant messages canceled before any content are dropped.
/// - Unfinished tool calls (input still streaming when the turn died) are
///   dropped; they have no arguments worth re-sending.
/// - Every finished tool call is paired: real results are kept, missing ones
///   are synthesized as errors, and both land in a single tool message
///   immediately after the assistant message.
/// - Within an assistant message, reasoning precedes text, text precedes
///   tool calls.
pub fn normalize(messages: &[Message]) -> Vec<Message> {
    let mut out: Vec<Message> = Vec::with_capacity(messages.len());
    let mut i = 0;

    while i < messages.len() {
        let msg = &messages[i];
        if msg.role != Role::Assistant {
            out.push(msg.clone());
            i += 1;
            continue;
        }

        let assistant = reorder_assistant(msg);

        // Consume the run of tool messages answering this assistant turn.
        let mut results: Vec<ToolResultPart> = Vec::new();
        let mut j = i + 1;
        while j < messages.len() && messages[j].role == Role::Tool {
            results.extend(
                messages[j]
                    .tool_results_parts()
                    .into_iter()
                    .cloned(),
            );
            j += 1;
        }
        i = j;

        let calls: Vec<_> = assistant.tool_calls().into_iter().cloned().collect();
        if assistant.is_empty_assistant() && calls.is_empty() {
            continue;
        }

        if calls.is_empty() {
            out.push(assistant);
            // Orphaned results with no calls are dropped; nothing pairs them.
            continue;
        }

        // Pair results to calls in call order, synthesizing the gaps.
        let mut paired: Vec<ToolResultPart> = Vec::with_capacity(calls.len());
        for call in &calls {
            match results.iter().find(|r| r.call_id == call.id) {
                Some(real) => paired.push(real.clone()),
                None => paired.push(interrupted_result(&call.id)),
            }
        }

        out.push(assistant);
        out.push(Message::tool_results(paired));
    }

    out
}

/// Reorder assistant parts (reasoning, then text/binary, then tool calls)
/// and drop unfinished tool calls and terminal markers.
fn reorder_assistant(msg: &Message) -> Message {
    let mut reordered = Message {
        id: msg.id,
        role: msg.role,
        created_at: msg.created_at,
        parts: Vec::with_capacity(msg.parts.len()),
    };

    for part in &msg.parts {
        if let Part::Reasoning { text, signature } = part {
            if !text.is_empty() || !signature.is_empty() {
                reordered.parts.push(Part::Reasoning {
                    text: text.clone(),
                    signature: signature.clone(),
                });
            }
        }
    }
    for part in &msg.parts {
        match part {
            Part::Text { text } if !text.is_empty() => {
                reordered.parts.push(part.clone());
            }
            Part::Binary { .. } => reordered.parts.push(part.clone()),
            _ => {}
        }
    }
    for part in &msg.parts {
        if let Part::ToolCall(call) = part {
            if call.finished {
                reordered.parts.push(part.clone());
            }
        }
    }

    reordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FinishReason, ToolCallPart};

    fn call(id: &str, finished: bool) -> ToolCallPart {
        ToolCallPart {
            id: id.to_string(),
            name: "ls".to_string(),
            input: r#"{"path":"/tmp"}"#.to_string(),
            finished,
        }
    }

    fn result(id: &str, content: &str) -> ToolResultPart {
        ToolResultPart {
            call_id: id.to_string(),
            content: content.to_string(),
            is_error: false,
        }
    }

    #[test]
    fn test_orphan_remediation_merges_real_and_synthesized() {
        let mut assistant = Message::new(Role::Assistant);
        assistant.append_text("running tools");
        assistant.parts.push(Part::ToolCall(call("a", true)));
        assistant.parts.push(Part::ToolCall(call("b", true)));

        let tool_msg = Message::tool_results(vec![result("a", "listing")]);
        let log = vec![Message::user("go"), assistant, tool_msg];

        let normalized = normalize(&log);
        assert_eq!(normalized.len(), 3);
        assert_eq!(normalized[2].role, Role::Tool);

        let results = normalized[2].tool_results_parts();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].call_id, "a");
        assert!(!results[0].is_error);
        assert_eq!(results[0].content, "listing");
        assert_eq!(results[1].call_id, "b");
        assert!(results[1].is_error);
        assert_eq!(results[1].content, INTERRUPTED_CONTENT);
    }

    #[test]
    fn test_fully_missing_results_all_synthesized() {
        let mut assistant = Message::new(Role::Assistant);
        assistant.parts.push(Part::ToolCall(call("x", true)));
        let log = vec![assistant];

        let normalized = normalize(&log);
        assert_eq!(normalized.len(), 2);
        let results = normalized[1].tool_results_parts();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].call_id, "x");
        assert!(results[0].is_error);
    }

    #[test]
    fn test_results_follow_call_order_not_arrival_order() {
        let mut assistant = Message::new(Role::Assistant);
        assistant.parts.push(Part::ToolCall(call("first", true)));
        assistant.parts.push(Part::ToolCall(call("second", true)));

        // Results arrived reversed across two tool messages.
        let log = vec![
            assistant,
            Message::tool_results(vec![result("second", "2")]),
            Message::tool_results(vec![result("first", "1")]),
        ];

        let normalized = normalize(&log);
        assert_eq!(normalized.len(), 2);
        let results = normalized[1].tool_results_parts();
        assert_eq!(results[0].call_id, "first");
        assert_eq!(results[1].call_id, "second");
    }

    #[test]
    fn test_empty_assistant_dropped() {
        let mut empty = Message::new(Role::Assistant);
        empty.finish(FinishReason::Canceled, None);
        let log = vec![Message::user("hi"), empty, Message::user("again")];

        let normalized = normalize(&log);
        assert_eq!(normalized.len(), 2);
        assert!(normalized.iter().all(|m| m.role == Role::User));
    }

    #[test]
    fn test_unfinished_call_dropped() {
        let mut assistant = Message::new(Role::Assistant);
        assistant.append_text("partial");
        assistant.parts.push(Part::ToolCall(call("partial", false)));
        let log = vec![assistant];

        let normalized = normalize(&log);
        // Text survives, the half-streamed call does not, so no tool message.
        assert_eq!(normalized.len(), 1);
        assert!(normalized[0].tool_calls().is_empty());
        assert_eq!(normalized[0].text(), "partial");
    }

    #[test]
    fn test_reasoning_reordered_first() {
        let mut assistant = Message::new(Role::Assistant);
        assistant.append_text("answer");
        assistant.parts.push(Part::ToolCall(call("t", true)));
        assistant.parts.push(Part::Reasoning {
            text: "thinking".to_string(),
            signature: "sig".to_string(),
        });
        let log = vec![assistant, Message::tool_results(vec![result("t", "ok")])];

        let normalized = normalize(&log);
        let parts = &normalized[0].parts;
        assert!(matches!(parts[0], Part::Reasoning { .. }));
        assert!(matches!(parts[1], Part::Text { .. }));
        assert!(matches!(parts[2], Part::ToolCall(_)));
    }

    #[test]
    fn test_signature_preserved_byte_exact() {
        let signature = "EqQBCgIYAhIkZm9v/bar+baz==";
        let mut assistant = Message::new(Role::Assistant);
        assistant.append_reasoning("deep thought");
        assistant.set_reasoning_signature(signature);
        assistant.append_text("result");

        let normalized = normalize(&[assistant]);
        assert_eq!(normalized[0].reasoning().unwrap().1, signature);
    }

    #[test]
    fn test_finish_parts_not_sent() {
        let mut assistant = Message::assistant("done");
        assistant.finish(FinishReason::EndTurn, None);
        let normalized = normalize(&[assistant]);
        assert!(normalized[0]
            .parts
            .iter()
            .all(|p| !matches!(p, Part::Finish { .. })));
    }

    #[test]
    fn test_system_and_user_pass_through() {
        let log = vec![
            Message::system("you are a coding agent"),
            Message::user("hello"),
        ];
        let normalized = normalize(&log);
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[0].role, Role::System);
        assert_eq!(normalized[1].role, Role::User);
    }

    #[test]
    fn test_idempotent() {
        let mut assistant = Message::new(Role::Assistant);
        assistant.parts.push(Part::ToolCall(call("a", true)));
        let log = vec![Message::user("go"), assistant];

        let once = normalize(&log);
        let twice = normalize(&once);
        assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(twice.iter()) {
            assert_eq!(
                serde_json::to_string(&a.parts).unwrap(),
                serde_json::to_string(&b.parts).unwrap()
            );
        }
    }
}
