//! The `view` tool: read a file and record the read timestamp
//!
//! Viewing is the mandatory precursor to `edit`/`write`; the recorded
//! timestamp is what the staleness check compares against.

use crate::Deps;
use async_trait::async_trait;
use jig_core::tool::{Tool, ToolCallInput, ToolError, ToolInfo, ToolOutput};
use jig_core::{RunContext, Schema};
use schemars::JsonSchema;
use serde::Deserialize;

/// Lines shown when no limit is given
const DEFAULT_LIMIT: usize = 2000;

/// Longer lines are clipped
const MAX_LINE_LEN: usize = 2000;

#[derive(Deserialize, JsonSchema)]
struct ViewInput {
    /// The file to read (absolute, or relative to the working directory)
    path: String,
    /// 1-based line to start from
    offset: Option<usize>,
    /// Maximum number of lines to return
    limit: Option<usize>,
}

pub struct ViewTool {
    deps: Deps,
}

impl ViewTool {
    pub fn new(deps: Deps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Tool for ViewTool {
    fn name(&self) -> &str {
        "view"
    }

    fn info(&self) -> ToolInfo {
        ToolInfo::new(
            "view",
            "Read a file with line numbers. Use offset/limit to page through \
             large files. Viewing a file is required before editing it.",
            Schema::of::<ViewInput>(),
        )
    }

    async fn run(&self, ctx: &RunContext, call: ToolCallInput) -> Result<ToolOutput, ToolError> {
        let input: ViewInput = call.parse()?;
        let path = ctx.resolve_path(&input.path);

        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            ToolError::Custom(format!("cannot read {}: {}", path.display(), e))
        })?;
        if bytes[..bytes.len().min(8192)].contains(&0) {
            return Ok(ToolOutput::error(format!(
                "{} looks like a binary file",
                path.display()
            )));
        }
        let content = String::from_utf8_lossy(&bytes);

        self.deps.tracker().mark_read(&path);
        if let Ok(lsp) = self.deps.lsp() {
            if lsp.handles(&path) {
                lsp.sync_file(&path, &content).await;
            }
        }

        let offset = input.offset.unwrap_or(1).max(1);
        let limit = input.limit.unwrap_or(DEFAULT_LIMIT);

        let lines: Vec<&str> = content.lines().collect();
        if offset > lines.len() && !lines.is_empty() {
            return Ok(ToolOutput::error(format!(
                "offset {} is past the end of the file ({} lines)",
                offset,
                lines.len()
            )));
        }

        let mut rendered = String::new();
        let window = lines.iter().enumerate().skip(offset - 1).take(limit);
        for (i, line) in window {
            let clipped = if line.len() > MAX_LINE_LEN {
                &line[..MAX_LINE_LEN]
            } else {
                line
            };
            rendered.push_str(&format!("{:>6}| {}\n", i + 1, clipped));
        }

        let shown = lines.len().min(offset - 1 + limit) - (offset - 1);
        if offset - 1 + shown < lines.len() {
            rendered.push_str(&format!(
                "... ({} more lines; continue with offset {})\n",
                lines.len() - (offset - 1 + shown),
                offset + shown
            ));
        }

        Ok(ToolOutput::text_capped(rendered))
    }
}
