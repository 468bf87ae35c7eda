//! Conversation compaction
//!
//! When the estimated input tokens cross `compaction_threshold ×
//! context_window`, the prefix of the log is replaced — either with a
//! summary produced by the Small model, or by plain truncation at a user
//! message boundary. The replacement happens before the next Preparing
//! step; the suffix keeps its tool pairing intact because cuts only land
//! on user messages.

use crate::cancel::RunContext;
use crate::config::CompactionMethod;
use crate::provider::Provider;
use crate::types::{Message, Part, Role};

const SUMMARIZE_PROMPT: &str = "\
You are a context compaction assistant. Summarize the conversation below \
into a concise, information-dense checkpoint. Preserve file paths, function \
names, error messages, decisions and unfinished work verbatim where they \
matter; the summary replaces the original history.";

/// What a compaction pass did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// Below threshold; log untouched
    NotNeeded,
    /// Prefix replaced by an LLM summary
    Summarized,
    /// Prefix dropped at a turn boundary
    Truncated,
}

/// ~4 characters per token, plus per-message overhead. Matches the
/// heuristic providers use for budgeting, not any exact tokenizer.
pub fn estimate_tokens(messages: &[Message]) -> u64 {
    let mut total: u64 = 0;
    for msg in messages {
        total += 4;
        for part in &msg.parts {
            let len = match part {
                Part::Text { text } => text.len(),
                Part::Reasoning { text, signature } => text.len() + signature.len(),
                Part::Binary { data, .. } => data.len() / 3,
                Part::ToolCall(call) => call.name.len() + call.input.len(),
                Part::ToolResult(result) => result.content.len(),
                Part::Finish { .. } => 0,
            };
            total += (len as u64).div_ceil(4);
        }
    }
    total
}

/// Index of the first message of the kept suffix: the latest user message
/// such that the suffix fits in `budget_tokens`. Returns 0 when no cut
/// helps (the log is kept whole).
fn suffix_boundary(messages: &[Message], budget_tokens: u64) -> usize {
    let mut boundary = 0;
    for (i, msg) in messages.iter().enumerate() {
        if msg.role == Role::User && estimate_tokens(&messages[i..]) <= budget_tokens {
            boundary = i;
            break;
        }
    }
    boundary
}

/// Render the prefix for the summarization request
fn render_history(messages: &[Message]) -> String {
    let mut out = String::new();
    for msg in messages {
        out.push_str(&format!("[{}]\n", msg.role));
        for part in &msg.parts {
            match part {
                Part::Text { text } => {
                    out.push_str(text);
                    out.push('\n');
                }
                Part::ToolCall(call) => {
                    out.push_str(&format!("tool call {}({})\n", call.name, call.input));
                }
                Part::ToolResult(result) => {
                    out.push_str(&format!("tool result: {}\n", result.content));
                }
                _ => {}
            }
        }
        out.push('\n');
    }
    out
}

/// Compact `messages` in place if it exceeds the threshold.
///
/// `summarizer` is the Small-model provider (method = Llm); on any
/// summarization failure the pass degrades to truncation so the turn can
/// proceed regardless.
pub async fn compact(
    ctx: &RunContext,
    messages: &mut Vec<Message>,
    context_window: u64,
    threshold: f64,
    method: CompactionMethod,
    summarizer: Option<&dyn Provider>,
) -> CompactionOutcome {
    let estimate = estimate_tokens(messages);
    let limit = (context_window as f64 * threshold) as u64;
    if estimate <= limit || messages.is_empty() {
        return CompactionOutcome::NotNeeded;
    }

    // Keep roughly half the window for the suffix; the rest is headroom
    // for the system prompt, tools and the next response.
    let budget = context_window / 2;
    let boundary = suffix_boundary(messages, budget);
    if boundary == 0 {
        return CompactionOutcome::NotNeeded;
    }

    let prefix: Vec<Message> = messages[..boundary].to_vec();
    let suffix: Vec<Message> = messages[boundary..].to_vec();

    if method == CompactionMethod::Llm {
        if let Some(provider) = summarizer {
            let request = vec![Message::user(format!(
                "{}\n\n---\n\n{}",
                SUMMARIZE_PROMPT,
                render_history(&prefix)
            ))];
            match provider.send(ctx, &request, &[]).await {
                Ok(response) if !response.content.is_empty() => {
                    let mut compacted = vec![Message::user(format!(
                        "[Conversation summary — earlier history was compacted]\n\n{}",
                        response.content
                    ))];
                    compacted.extend(suffix);
                    *messages = compacted;
                    return CompactionOutcome::Summarized;
                }
                Ok(_) => log::warn!("compaction summary was empty, truncating instead"),
                Err(e) => log::warn!("compaction summary failed ({}), truncating instead", e),
            }
        }
    }

    let mut compacted = vec![Message::user(
        "[Earlier history was dropped to stay within the context window.]".to_string(),
    )];
    compacted.extend(suffix);
    *messages = compacted;
    CompactionOutcome::Truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(user_text: &str, assistant_text: &str) -> Vec<Message> {
        vec![Message::user(user_text), Message::assistant(assistant_text)]
    }

    fn long_log(turns: usize, text_len: usize) -> Vec<Message> {
        let text = "x".repeat(text_len);
        (0..turns).flat_map(|_| turn(&text, &text)).collect()
    }

    #[test]
    fn test_estimate_scales_with_content() {
        let small = estimate_tokens(&turn("hi", "hello"));
        let large = estimate_tokens(&long_log(10, 4000));
        assert!(small < 20);
        assert!(large > 10_000);
    }

    #[test]
    fn test_suffix_boundary_lands_on_user_message() {
        let log = long_log(10, 400);
        let boundary = suffix_boundary(&log, 500);
        assert!(boundary > 0);
        assert_eq!(log[boundary].role, Role::User);
    }

    #[tokio::test]
    async fn test_below_threshold_untouched() {
        let ctx = RunContext::new("s", "/tmp");
        let mut log = turn("hi", "hello");
        let before = log.len();
        let outcome = compact(
            &ctx,
            &mut log,
            200_000,
            0.85,
            CompactionMethod::Truncate,
            None,
        )
        .await;
        assert_eq!(outcome, CompactionOutcome::NotNeeded);
        assert_eq!(log.len(), before);
    }

    #[tokio::test]
    async fn test_truncation_keeps_tail_and_notice() {
        let ctx = RunContext::new("s", "/tmp");
        // window 1000 tokens, threshold 0.5 → compacts; each turn ~200 tokens
        let mut log = long_log(10, 400);
        let outcome = compact(
            &ctx,
            &mut log,
            1000,
            0.5,
            CompactionMethod::Truncate,
            None,
        )
        .await;
        assert_eq!(outcome, CompactionOutcome::Truncated);
        assert!(log[0].text().contains("dropped"));
        assert!(estimate_tokens(&log[1..]) <= 500);
        // The suffix starts at a user message.
        assert_eq!(log[1].role, Role::User);
    }

    #[tokio::test]
    async fn test_llm_method_without_summarizer_degrades_to_truncate() {
        let ctx = RunContext::new("s", "/tmp");
        let mut log = long_log(10, 400);
        let outcome = compact(&ctx, &mut log, 1000, 0.5, CompactionMethod::Llm, None).await;
        assert_eq!(outcome, CompactionOutcome::Truncated);
    }

    #[test]
    fn test_render_history_includes_tool_traffic() {
        let mut assistant = Message::new(Role::Assistant);
        assistant.parts.push(Part::ToolCall(crate::types::ToolCallPart {
            id: "c1".to_string(),
            name: "grep".to_string(),
            input: r#"{"pattern":"main"}"#.to_string(),
            finished: true,
        }));
        let log = vec![
            Message::user("find main"),
            assistant,
            Message::tool_results(vec![crate::types::ToolResultPart {
                call_id: "c1".to_string(),
                content: "src/main.rs:1".to_string(),
                is_error: false,
            }]),
        ];
        let rendered = render_history(&log);
        assert!(rendered.contains("tool call grep"));
        assert!(rendered.contains("src/main.rs:1"));
    }
}
