//! The agentic loop: prepare, stream, execute tools, repeat

use super::{compact, prompt, AgentError};
use crate::cancel::RunContext;
use crate::config::{AgentConfig, ModelType};
use crate::events::{ContentEvent, Event, ToolEvent};
use crate::normalize::interrupted_result;
use crate::provider::{Provider, ProviderError, ProviderEvent};
use crate::runtime::Runtime;
use crate::tool::{Tool, ToolCallInput, ToolError, ToolOutput};
use crate::types::{FinishReason, Message, Part, Role, ToolCallPart, ToolResultPart};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;

/// Drive one user turn to completion.
///
/// The caller holds the per-session submit lock; only one turn is in
/// flight per session.
pub(crate) async fn run_turn(
    runtime: &Runtime,
    agent: &AgentConfig,
    ctx: &RunContext,
    user_message: Message,
) -> Result<Message, AgentError> {
    let session_id = ctx.session_id().to_string();
    let facade = runtime.sessions();
    facade.append_message(&session_id, &user_message).await?;

    let provider = runtime.provider_for(agent.model)?;
    let options = runtime.options();

    loop {
        // ── Preparing ───────────────────────────────────────────────────
        let mut log = facade.list_messages(&session_id).await?;

        let outcome = {
            let summarizer = runtime.provider_for(ModelType::Small).ok();
            compact::compact(
                ctx,
                &mut log,
                provider.model().context_window,
                options.compaction_threshold,
                options.compaction_method,
                summarizer.as_deref(),
            )
            .await
        };
        if outcome != compact::CompactionOutcome::NotNeeded {
            log::info!("session {} compacted ({:?})", session_id, outcome);
            facade.replace_messages(&session_id, &log).await?;
        }

        let system = prompt::system_prompt(agent, ctx.cwd()).await;
        let mut messages = vec![Message::system(system)];
        messages.extend(log);

        let tools = runtime.registry().for_agent(agent);
        let infos: Vec<_> = tools.iter().map(|t| t.info()).collect();

        // ── Streaming ───────────────────────────────────────────────────
        let mut assistant = Message::new(Role::Assistant);
        let message_ctx = ctx.for_message(assistant.id);

        let stream = match provider.stream(&message_ctx, &messages, &infos).await {
            Ok(stream) => stream,
            Err(ProviderError::Canceled) => {
                return finalize_canceled(runtime, ctx, assistant).await;
            }
            Err(e) => return Err(e.into()),
        };
        tokio::pin!(stream);

        let mut completion = None;
        let mut stream_error: Option<ProviderError> = None;
        while let Some(event) = stream.next().await {
            match event {
                Ok(ProviderEvent::ContentStart) => {}
                Ok(ProviderEvent::ContentDelta(delta)) => {
                    assistant.append_text(&delta);
                    runtime.broker().publish(Event::Content(ContentEvent::TextDelta {
                        session_id: session_id.clone(),
                        message_id: assistant.id,
                        delta,
                    }));
                }
                Ok(ProviderEvent::ContentStop) => {
                    facade.append_message(&session_id, &assistant).await?;
                }
                Ok(ProviderEvent::ThinkingDelta(delta)) => {
                    assistant.append_reasoning(&delta);
                    runtime
                        .broker()
                        .publish(Event::Content(ContentEvent::ThinkingDelta {
                            session_id: session_id.clone(),
                            message_id: assistant.id,
                            delta,
                        }));
                }
                Ok(ProviderEvent::SignatureDelta(signature)) => {
                    assistant.set_reasoning_signature(&signature);
                }
                Ok(ProviderEvent::ToolUseStart { id, name }) => {
                    assistant.parts.push(Part::ToolCall(ToolCallPart {
                        id,
                        name,
                        input: String::new(),
                        finished: false,
                    }));
                }
                Ok(ProviderEvent::ToolUseDelta { id, partial_json }) => {
                    if let Some(Part::ToolCall(call)) = assistant
                        .parts
                        .iter_mut()
                        .find(|p| matches!(p, Part::ToolCall(c) if c.id == id))
                    {
                        call.input.push_str(&partial_json);
                    }
                }
                Ok(ProviderEvent::ToolUseStop { id }) => {
                    if let Some(Part::ToolCall(call)) = assistant
                        .parts
                        .iter_mut()
                        .find(|p| matches!(p, Part::ToolCall(c) if c.id == id))
                    {
                        if call.input.is_empty() {
                            call.input = "{}".to_string();
                        }
                        call.finished = true;
                    }
                    facade.append_message(&session_id, &assistant).await?;
                }
                Ok(ProviderEvent::Complete(response)) => {
                    // Dialects that deliver whole calls only in the terminal
                    // response still end up with every call recorded.
                    for call in &response.tool_calls {
                        if !assistant.tool_calls().iter().any(|c| c.id == call.id) {
                            assistant.parts.push(Part::ToolCall(call.clone()));
                        }
                    }
                    completion = Some(response);
                }
                Err(ProviderError::Canceled) => {
                    return finalize_canceled(runtime, ctx, assistant).await;
                }
                Err(e) => {
                    stream_error = Some(e);
                    break;
                }
            }
        }

        if ctx.is_canceled() {
            return finalize_canceled(runtime, ctx, assistant).await;
        }
        if let Some(e) = stream_error {
            assistant.finish(FinishReason::Error, Some(e.to_string()));
            facade.finalize_message(&session_id, &assistant).await?;
            publish_finished(runtime, &session_id, &assistant);
            return Err(e.into());
        }

        let response = completion.ok_or_else(|| {
            AgentError::Provider(ProviderError::InvalidResponse(
                "stream ended without completion".into(),
            ))
        })?;

        let usage_total = facade.record_usage(&session_id, &response.usage).await?;
        runtime
            .broker()
            .publish(Event::Content(ContentEvent::UsageUpdated {
                session_id: session_id.clone(),
                usage: usage_total,
            }));

        assistant.finish(response.finish_reason, None);
        facade.finalize_message(&session_id, &assistant).await?;
        publish_finished(runtime, &session_id, &assistant);

        // ── Transitions ─────────────────────────────────────────────────
        match response.finish_reason {
            FinishReason::ToolUse => {
                let calls: Vec<ToolCallPart> = assistant
                    .tool_calls()
                    .into_iter()
                    .filter(|c| c.finished)
                    .cloned()
                    .collect();

                let mut results: Vec<ToolResultPart> = Vec::new();
                let mut canceled = false;
                for (i, call) in calls.iter().enumerate() {
                    if ctx.is_canceled() {
                        // Synthesize results for this and the remaining
                        // calls so pairing never breaks.
                        results.extend(calls[i..].iter().map(|c| interrupted_result(&c.id)));
                        canceled = true;
                        break;
                    }
                    results.push(execute_tool(runtime, agent, ctx, call).await);
                    if ctx.is_canceled() {
                        results.extend(calls[i + 1..].iter().map(|c| interrupted_result(&c.id)));
                        canceled = true;
                        break;
                    }
                }

                let tool_msg = Message::tool_results(results);
                facade.append_message(&session_id, &tool_msg).await?;

                if canceled {
                    let mut assistant = assistant;
                    assistant.finish(FinishReason::Canceled, None);
                    facade.finalize_message(&session_id, &assistant).await?;
                    publish_finished(runtime, &session_id, &assistant);
                    return Ok(assistant);
                }
                // Re-enter Preparing with the appended results.
            }
            FinishReason::EndTurn | FinishReason::MaxTokens => {
                return Ok(assistant);
            }
            FinishReason::Canceled => {
                return Ok(assistant);
            }
            FinishReason::Error => {
                return Err(AgentError::Provider(ProviderError::InvalidResponse(
                    "model refused the request".into(),
                )));
            }
            FinishReason::Unknown => {
                log::warn!("session {}: unknown finish reason, ending turn", session_id);
                return Ok(assistant);
            }
        }
    }
}

/// Cancellation finalization: every finished tool call gets a synthesized
/// error result, then the assistant message is finalized with
/// `Finish(canceled)`.
async fn finalize_canceled(
    runtime: &Runtime,
    ctx: &RunContext,
    mut assistant: Message,
) -> Result<Message, AgentError> {
    let session_id = ctx.session_id();
    let facade = runtime.sessions();

    let outstanding: Vec<ToolResultPart> = assistant
        .tool_calls()
        .into_iter()
        .filter(|c| c.finished)
        .map(|c| interrupted_result(&c.id))
        .collect();

    assistant.finish(FinishReason::Canceled, None);
    facade.finalize_message(session_id, &assistant).await?;
    if !outstanding.is_empty() {
        let tool_msg = Message::tool_results(outstanding);
        facade.append_message(session_id, &tool_msg).await?;
    }
    publish_finished(runtime, session_id, &assistant);
    Ok(assistant)
}

fn publish_finished(runtime: &Runtime, session_id: &str, assistant: &Message) {
    runtime
        .broker()
        .publish(Event::Content(ContentEvent::Finished {
            session_id: session_id.to_string(),
            message_id: assistant.id,
            reason: assistant.finish_reason().unwrap_or_default(),
        }));
}

/// Execute one tool call, converting every failure mode (missing tool,
/// invalid input, denial, panic) into an error tool-result so pairing is
/// preserved.
async fn execute_tool(
    runtime: &Runtime,
    agent: &AgentConfig,
    ctx: &RunContext,
    call: &ToolCallPart,
) -> ToolResultPart {
    let session_id = ctx.session_id().to_string();
    let started = Instant::now();
    let input = ToolCallInput::new(call.id.clone(), call.input.clone());

    runtime.broker().publish(Event::Tool(ToolEvent::Started {
        session_id: session_id.clone(),
        call_id: call.id.clone(),
        name: call.name.clone(),
        input: input.params(),
    }));

    let visible = runtime.registry().for_agent(agent);
    let tool: Option<Arc<dyn Tool>> = visible.into_iter().find(|t| t.name() == call.name);

    let output = match tool {
        None => ToolOutput::error(format!("tool not found: {}", call.name)),
        Some(tool) => {
            // Tools run on their own task so a panic is caught and becomes
            // an error result instead of tearing down the loop. The task is
            // raced against cancellation: subprocess-backed tools receive
            // the cancel through their child context, and the loop
            // synthesizes the pairing-preserving error result either way.
            let tool_ctx = ctx.child();
            let input_clone = input.clone();
            let mut handle =
                tokio::spawn(async move { tool.run(&tool_ctx, input_clone).await });
            tokio::select! {
                _ = ctx.canceled() => {
                    handle.abort();
                    let synthesized = interrupted_result(&call.id);
                    ToolOutput {
                        content: synthesized.content,
                        is_error: true,
                        metadata: None,
                    }
                }
                joined = &mut handle => match joined {
                    Ok(Ok(output)) => output,
                    Ok(Err(ToolError::PermissionDenied)) => {
                        ToolOutput::error("permission denied")
                    }
                    Ok(Err(e)) => ToolOutput::error(e.to_string()),
                    Err(join_err) if join_err.is_panic() => {
                        ToolOutput::error(format!("tool panicked: {}", call.name))
                    }
                    Err(join_err) => ToolOutput::error(join_err.to_string()),
                },
            }
        }
    };

    runtime.broker().publish(Event::Tool(ToolEvent::Completed {
        session_id,
        call_id: call.id.clone(),
        name: call.name.clone(),
        content: output.content.clone(),
        is_error: output.is_error,
        duration: started.elapsed(),
    }));

    ToolResultPart {
        call_id: call.id.clone(),
        content: output.content,
        is_error: output.is_error,
    }
}
