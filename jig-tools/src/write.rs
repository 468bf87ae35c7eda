//! The `write` tool: create or overwrite a whole file

use crate::edit::{
    atomic_write, collect_diagnostics, finish_mutation, mutation_refusal, unified_diff,
};
use crate::Deps;
use async_trait::async_trait;
use jig_core::permission::PermissionRequest;
use jig_core::tool::{Tool, ToolCallInput, ToolError, ToolInfo, ToolOutput};
use jig_core::{RunContext, Schema};
use schemars::JsonSchema;
use serde::Deserialize;

#[derive(Deserialize, JsonSchema)]
struct WriteInput {
    /// The file to create or overwrite
    path: String,
    /// Full new file content
    content: String,
}

pub struct WriteTool {
    deps: Deps,
}

impl WriteTool {
    pub fn new(deps: Deps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn info(&self) -> ToolInfo {
        ToolInfo::new(
            "write",
            "Write a file, creating it or replacing its contents. \
             Overwriting an existing file requires viewing it first.",
            Schema::of::<WriteInput>(),
        )
    }

    async fn run(&self, ctx: &RunContext, call: ToolCallInput) -> Result<ToolOutput, ToolError> {
        let input: WriteInput = call.parse()?;
        let path = ctx.resolve_path(&input.path);

        let exists = path.exists();
        let old_content = if exists {
            if let Some(refusal) = mutation_refusal(self.deps.tracker(), &path) {
                return Ok(refusal);
            }
            tokio::fs::read_to_string(&path).await.unwrap_or_default()
        } else {
            String::new()
        };

        if exists && old_content == input.content {
            return Ok(ToolOutput::error("file already has this content"));
        }

        let request = PermissionRequest::new(
            ctx,
            call.call_id.clone(),
            "write",
            "write",
            if exists {
                format!("overwrite {}", path.display())
            } else {
                format!("create {}", path.display())
            },
            call.params(),
        )
        .with_path(&path);
        if !self.deps.permissions()?.request(ctx, request).await {
            return Err(ToolError::PermissionDenied);
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let diff = unified_diff(&path, &old_content, &input.content);
        atomic_write(&path, &input.content).await?;
        finish_mutation(&self.deps, ctx, &path, &input.content).await;

        let diagnostics = collect_diagnostics(&self.deps, &path).await;
        let mut content = if exists {
            diff
        } else {
            format!("created {} ({} bytes)", path.display(), input.content.len())
        };
        if !diagnostics.is_empty() {
            content.push_str("\n\nDiagnostics:\n");
            content.push_str(&diagnostics);
        }
        Ok(ToolOutput::text_capped(content))
    }
}
