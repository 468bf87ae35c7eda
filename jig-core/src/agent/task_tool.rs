//! The `agent` tool: spawn a sub-agent for context searches
//!
//! The sub-agent runs the read-only `task` persona in its own session and
//! its own task, parented to the caller's cancellation context. Permission
//! auto-approval does not propagate to the child session.

use crate::cancel::RunContext;
use crate::runtime::Runtime;
use crate::schema::Schema;
use crate::tool::{Tool, ToolCallInput, ToolError, ToolInfo, ToolOutput};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Weak;

#[derive(Deserialize, JsonSchema)]
struct AgentInput {
    /// The task for the sub-agent: what to find out and what to report back
    prompt: String,
}

pub struct AgentTool {
    runtime: Weak<Runtime>,
}

impl AgentTool {
    pub fn new(runtime: Weak<Runtime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        "agent"
    }

    fn info(&self) -> ToolInfo {
        ToolInfo::new(
            "agent",
            "Launch a read-only sub-agent to search the workspace and answer a \
             question. Useful for broad context gathering that would flood the \
             main conversation. The sub-agent can view, grep, glob and ls; it \
             cannot modify anything. Returns its final summary.",
            Schema::of::<AgentInput>(),
        )
    }

    async fn run(&self, ctx: &RunContext, call: ToolCallInput) -> Result<ToolOutput, ToolError> {
        let input: AgentInput = call.parse()?;
        let runtime = self
            .runtime
            .upgrade()
            .ok_or_else(|| ToolError::Custom("runtime is shutting down".to_string()))?;

        // A fresh session: the child does not inherit the parent's
        // permission auto-approval.
        let session = runtime
            .sessions()
            .create_session(ctx.cwd())
            .await
            .map_err(|e| ToolError::Custom(e.to_string()))?;

        let parent_token = ctx.cancellation_token().clone();
        let prompt = input.prompt;
        let session_id = session.id.clone();
        let runtime_clone = runtime.clone();

        // Own task: a panic inside the sub-agent is contained here, and the
        // parent loop simply awaits the terminal result.
        let handle = tokio::spawn(async move {
            runtime_clone
                .submit_with_parent("task", &session_id, &prompt, Vec::new(), &parent_token)
                .await
        });

        match handle.await {
            Ok(Ok(message)) => {
                let text = message.text();
                if text.is_empty() {
                    Ok(ToolOutput::error("sub-agent returned no response"))
                } else {
                    Ok(ToolOutput::text_capped(text))
                }
            }
            Ok(Err(e)) => Ok(ToolOutput::error(format!("sub-agent failed: {}", e))),
            Err(join_err) => Ok(ToolOutput::error(format!("sub-agent crashed: {}", join_err))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_shape() {
        let tool = AgentTool::new(Weak::new());
        let info = tool.info();
        assert_eq!(info.name, "agent");
        assert_eq!(info.required, vec!["prompt"]);
    }

    #[tokio::test]
    async fn test_run_after_runtime_dropped() {
        let tool = AgentTool::new(Weak::new());
        let ctx = RunContext::new("s", "/tmp");
        let result = tool
            .run(&ctx, ToolCallInput::new("c1", r#"{"prompt":"find main"}"#))
            .await;
        assert!(matches!(result, Err(ToolError::Custom(_))));
    }
}
