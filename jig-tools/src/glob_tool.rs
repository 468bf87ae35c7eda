//! The `glob` tool: find files by name pattern

use crate::{Deps, IGNORE_FILE};
use async_trait::async_trait;
use jig_core::tool::{Tool, ToolCallInput, ToolError, ToolInfo, ToolOutput};
use jig_core::{RunContext, Schema};
use schemars::JsonSchema;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const MAX_RESULTS: usize = 200;

#[derive(Deserialize, JsonSchema)]
struct GlobInput {
    /// Glob pattern, e.g. `**/*.rs` or `src/*.toml`
    pattern: String,
    /// Directory to search from; defaults to the working directory
    path: Option<String>,
}

pub struct GlobTool {
    #[allow(dead_code)]
    deps: Deps,
}

impl GlobTool {
    pub fn new(deps: Deps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn info(&self) -> ToolInfo {
        ToolInfo::new(
            "glob",
            "Find files whose path matches a glob pattern (e.g. **/*.rs), \
             honoring .gitignore. Results are sorted by modification time, \
             newest first.",
            Schema::of::<GlobInput>(),
        )
    }

    async fn run(&self, ctx: &RunContext, call: ToolCallInput) -> Result<ToolOutput, ToolError> {
        let input: GlobInput = call.parse()?;
        let root = ctx.resolve_path(input.path.as_deref().unwrap_or("."));
        let pattern = glob::Pattern::new(&input.pattern)
            .map_err(|e| ToolError::InvalidInput(format!("invalid pattern: {}", e)))?;

        let ctx_check = ctx.clone();
        let mut found = tokio::task::spawn_blocking(move || {
            collect_matches(&root, &pattern, &ctx_check)
        })
        .await
        .map_err(|e| ToolError::Custom(e.to_string()))?;

        if found.is_empty() {
            return Ok(ToolOutput::text("no files matched"));
        }

        // Newest first; recently touched files are usually what the model
        // is looking for.
        found.sort_by(|a, b| b.1.cmp(&a.1));
        let truncated = found.len() > MAX_RESULTS;
        found.truncate(MAX_RESULTS);

        let mut content = found
            .into_iter()
            .map(|(path, _)| path.display().to_string())
            .collect::<Vec<_>>()
            .join("\n");
        if truncated {
            content.push_str(&format!("\n... (first {} results)", MAX_RESULTS));
        }
        Ok(ToolOutput::text_capped(content))
    }
}

fn collect_matches(
    root: &Path,
    pattern: &glob::Pattern,
    ctx: &RunContext,
) -> Vec<(PathBuf, SystemTime)> {
    let mut found = Vec::new();
    let walker = ignore::WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .add_custom_ignore_filename(IGNORE_FILE)
        .build();

    for entry in walker.flatten() {
        if ctx.is_canceled() {
            break;
        }
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        // Match against both the relative path and the bare file name so
        // `*.rs` works without a `**/` prefix.
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if !pattern.matches_path(relative) && !pattern.matches(name) {
            continue;
        }
        let mtime = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        found.push((path.to_path_buf(), mtime));
    }
    found
}
