//! System prompt assembly: persona text, environment, and context files

use crate::config::AgentConfig;
use std::path::Path;

const CODER_PROMPT: &str = "\
You are an expert software engineering agent operating inside a developer's \
workspace. You read, write and edit files, run shell commands, and search \
the codebase with the tools provided. Work autonomously: inspect before you \
change, prefer minimal targeted edits, and verify your work. Paths in tool \
inputs may be absolute or relative to the working directory. Never invent \
file contents; view a file before editing it.";

const TASK_PROMPT: &str = "\
You are a read-only research agent. Search and read the workspace to answer \
the question you were given, then reply with a concise, information-dense \
summary. You cannot modify files or run commands.";

/// Assemble the system prompt for an agent: persona text, the working
/// directory, and any configured context files.
pub async fn system_prompt(agent: &AgentConfig, cwd: &Path) -> String {
    let base = match &agent.prompt {
        Some(prompt) => prompt.clone(),
        None if agent.id == "task" => TASK_PROMPT.to_string(),
        None => CODER_PROMPT.to_string(),
    };

    let mut sections = vec![base];
    sections.push(format!("Working directory: {}", cwd.display()));

    for path in &agent.context_paths {
        let expanded = shellexpand::tilde(&path.to_string_lossy()).to_string();
        let resolved = if Path::new(&expanded).is_absolute() {
            std::path::PathBuf::from(&expanded)
        } else {
            cwd.join(&expanded)
        };
        match tokio::fs::read_to_string(&resolved).await {
            Ok(content) => {
                sections.push(format!(
                    "# Context from {}\n\n{}",
                    resolved.display(),
                    content.trim_end()
                ));
            }
            Err(e) => {
                log::debug!("skipping context file {}: {}", resolved.display(), e);
            }
        }
    }

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;

    #[tokio::test]
    async fn test_coder_prompt_includes_cwd() {
        let agent = AgentConfig::coder();
        let prompt = system_prompt(&agent, Path::new("/work/project")).await;
        assert!(prompt.contains("software engineering agent"));
        assert!(prompt.contains("Working directory: /work/project"));
    }

    #[tokio::test]
    async fn test_task_prompt_is_read_only() {
        let agent = AgentConfig::task();
        let prompt = system_prompt(&agent, Path::new("/work")).await;
        assert!(prompt.contains("read-only"));
    }

    #[tokio::test]
    async fn test_custom_prompt_overrides() {
        let mut agent = AgentConfig::coder();
        agent.prompt = Some("Custom persona.".to_string());
        let prompt = system_prompt(&agent, Path::new("/w")).await;
        assert!(prompt.starts_with("Custom persona."));
        assert!(!prompt.contains("software engineering agent"));
    }

    #[tokio::test]
    async fn test_context_files_appended() {
        let dir = tempfile::tempdir().unwrap();
        let ctx_file = dir.path().join("AGENTS.md");
        tokio::fs::write(&ctx_file, "Use four-space indents.\n")
            .await
            .unwrap();

        let mut agent = AgentConfig::coder();
        agent.context_paths = vec!["AGENTS.md".into()];
        let prompt = system_prompt(&agent, dir.path()).await;
        assert!(prompt.contains("Use four-space indents."));
        assert!(prompt.contains("# Context from"));
    }

    #[tokio::test]
    async fn test_missing_context_file_skipped() {
        let mut agent = AgentConfig::coder();
        agent.context_paths = vec!["/definitely/not/here.md".into()];
        let prompt = system_prompt(&agent, Path::new("/w")).await;
        assert!(!prompt.contains("# Context from"));
    }
}
