//! The `ls` tool: list a directory

use crate::{Deps, IGNORE_FILE};
use async_trait::async_trait;
use jig_core::tool::{Tool, ToolCallInput, ToolError, ToolInfo, ToolOutput};
use jig_core::{RunContext, Schema};
use schemars::JsonSchema;
use serde::Deserialize;

const MAX_ENTRIES: usize = 500;

#[derive(Deserialize, JsonSchema)]
struct LsInput {
    /// Directory to list; defaults to the working directory
    path: Option<String>,
}

pub struct LsTool {
    #[allow(dead_code)]
    deps: Deps,
}

impl LsTool {
    pub fn new(deps: Deps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Tool for LsTool {
    fn name(&self) -> &str {
        "ls"
    }

    fn info(&self) -> ToolInfo {
        ToolInfo::new(
            "ls",
            "List the entries of a directory (directories marked with a \
             trailing slash), honoring .gitignore.",
            Schema::of::<LsInput>(),
        )
    }

    async fn run(&self, ctx: &RunContext, call: ToolCallInput) -> Result<ToolOutput, ToolError> {
        let input: LsInput = call.parse()?;
        let root = ctx.resolve_path(input.path.as_deref().unwrap_or("."));
        if !root.is_dir() {
            return Ok(ToolOutput::error(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let mut entries: Vec<String> = Vec::new();
        let walker = ignore::WalkBuilder::new(&root)
            .max_depth(Some(1))
            .hidden(true)
            .git_ignore(true)
            .add_custom_ignore_filename(IGNORE_FILE)
            .build();

        for entry in walker.flatten() {
            if entry.path() == root {
                continue;
            }
            let name = entry
                .path()
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                entries.push(format!("{}/", name));
            } else {
                entries.push(name);
            }
        }

        if entries.is_empty() {
            return Ok(ToolOutput::text("(empty directory)"));
        }
        entries.sort();
        let truncated = entries.len() > MAX_ENTRIES;
        entries.truncate(MAX_ENTRIES);
        let mut content = entries.join("\n");
        if truncated {
            content.push_str(&format!("\n... (first {} entries)", MAX_ENTRIES));
        }
        Ok(ToolOutput::text_capped(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[tokio::test]
    async fn test_ls_marks_directories() {
        let (_rt, deps) = test_support::auto_approved().await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "").unwrap();

        let tool = LsTool::new(deps);
        let ctx = RunContext::new("s", dir.path());
        let output = tool
            .run(&ctx, ToolCallInput::new("c", "{}"))
            .await
            .unwrap();

        let lines: Vec<&str> = output.content.lines().collect();
        assert_eq!(lines, vec!["Cargo.toml", "src/"]);
    }

    #[tokio::test]
    async fn test_ls_non_directory() {
        let (_rt, deps) = test_support::auto_approved().await;
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, "").unwrap();

        let tool = LsTool::new(deps);
        let ctx = RunContext::new("s", dir.path());
        let output = tool
            .run(
                &ctx,
                ToolCallInput::new("c", format!(r#"{{"path":"{}"}}"#, file.display())),
            )
            .await
            .unwrap();
        assert!(output.is_error);
    }

    #[tokio::test]
    async fn test_ls_empty_directory() {
        let (_rt, deps) = test_support::auto_approved().await;
        let dir = tempfile::tempdir().unwrap();
        let tool = LsTool::new(deps);
        let ctx = RunContext::new("s", dir.path());
        let output = tool.run(&ctx, ToolCallInput::new("c", "{}")).await.unwrap();
        assert_eq!(output.content, "(empty directory)");
    }
}
