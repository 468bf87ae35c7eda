//! The `shell` tool: run a command in the session's working directory

use crate::Deps;
use async_trait::async_trait;
use jig_core::permission::PermissionRequest;
use jig_core::tool::{Tool, ToolCallInput, ToolError, ToolInfo, ToolOutput};
use jig_core::{RunContext, Schema};
use schemars::JsonSchema;
use serde::Deserialize;
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// Commands refused regardless of configuration
const BANNED: &[&str] = &[
    "sudo", "su", "shutdown", "reboot", "halt", "poweroff", "mkfs", "passwd",
];

/// Grace between SIGTERM and SIGKILL when a command is interrupted
const KILL_GRACE: Duration = Duration::from_secs(2);

#[derive(Deserialize, JsonSchema)]
struct ShellInput {
    /// The command to execute (run through `sh -c`)
    command: String,
    /// Timeout in seconds; defaults to the configured shell timeout
    timeout_secs: Option<u64>,
}

pub struct ShellTool {
    deps: Deps,
}

impl ShellTool {
    pub fn new(deps: Deps) -> Self {
        Self { deps }
    }
}

fn banned_reason(command: &str, extra_banned: &[String]) -> Option<String> {
    let first = command.split_whitespace().next().unwrap_or("");
    let base = first.rsplit('/').next().unwrap_or(first);
    if BANNED.contains(&base) || extra_banned.iter().any(|b| b == base) {
        return Some(format!("command '{}' is not allowed", base));
    }
    None
}

fn allowlisted(command: &str, allowed: &[String]) -> bool {
    let first = command.split_whitespace().next().unwrap_or("");
    allowed.iter().any(|a| a == first)
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn info(&self) -> ToolInfo {
        ToolInfo::new(
            "shell",
            "Execute a shell command in the working directory and return its \
             combined stdout/stderr. Long or interactive commands are subject \
             to a timeout; output is capped at 5MB.",
            Schema::of::<ShellInput>(),
        )
    }

    async fn run(&self, ctx: &RunContext, call: ToolCallInput) -> Result<ToolOutput, ToolError> {
        let input: ShellInput = call.parse()?;
        let options = self.deps.options()?;

        if let Some(reason) = banned_reason(&input.command, &options.banned_commands) {
            return Ok(ToolOutput::error(reason));
        }

        if !allowlisted(&input.command, &options.allowed_commands) {
            let request = PermissionRequest::new(
                ctx,
                call.call_id.clone(),
                "shell",
                "execute",
                format!("run `{}`", input.command),
                call.params(),
            )
            .with_path(ctx.cwd());
            if !self.deps.permissions()?.request(ctx, request).await {
                return Err(ToolError::PermissionDenied);
            }
        }

        let timeout = Duration::from_secs(input.timeout_secs.unwrap_or(options.shell_timeout_secs));

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(&input.command)
            .current_dir(ctx.cwd())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn()?;
        let pid = child.id();
        let mut stdout = child.stdout.take().ok_or("missing stdout")?;
        let mut stderr = child.stderr.take().ok_or("missing stderr")?;

        // Only the pipes live in the reader future; `child` stays free for
        // the cancellation and timeout arms.
        let reader = async move {
            let mut out = Vec::new();
            let mut err = Vec::new();
            let _ = tokio::join!(stdout.read_to_end(&mut out), stderr.read_to_end(&mut err));
            (out, err)
        };

        let (out, err) = tokio::select! {
            _ = ctx.canceled() => {
                terminate(pid).await;
                let _ = child.wait().await;
                return Ok(ToolOutput::error("command interrupted"));
            }
            _ = tokio::time::sleep(timeout) => {
                terminate(pid).await;
                let _ = child.wait().await;
                return Err(ToolError::Timeout(timeout));
            }
            output = reader => output,
        };

        let status = child.wait().await?;
        let exit_code = status.code().unwrap_or(-1);

        let mut combined = String::from_utf8_lossy(&out).to_string();
        if !err.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&String::from_utf8_lossy(&err));
        }
        if combined.is_empty() {
            combined = format!("(no output; exit code {})", exit_code);
        }

        let mut output = ToolOutput::text_capped(combined);
        output.is_error = !status.success();
        let mut meta = output
            .metadata
            .take()
            .unwrap_or_else(|| serde_json::json!({}));
        meta["exit_code"] = serde_json::json!(exit_code);
        Ok(output.with_metadata(meta))
    }
}

/// SIGTERM the process group, escalate to SIGKILL after the grace period
async fn terminate(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        let pgid = Pid::from_raw(pid as i32);
        let _ = killpg(pgid, Signal::SIGTERM);
        tokio::time::sleep(KILL_GRACE).await;
        let _ = killpg(pgid, Signal::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = pid;
}

#[cfg(test)]
mod tests {
    use super::*;
    use jig_core::config::RuntimeOptions;

    #[test]
    fn test_banned_command_detection() {
        assert!(banned_reason("sudo rm -rf /", &[]).is_some());
        assert!(banned_reason("/usr/bin/sudo ls", &[]).is_some());
        assert!(banned_reason("ls -la", &[]).is_none());
        assert!(banned_reason("curl http://x", &["curl".to_string()]).is_some());
    }

    #[test]
    fn test_allowlist_matches_first_word() {
        let allowed = vec!["cargo".to_string(), "git".to_string()];
        assert!(allowlisted("cargo build --release", &allowed));
        assert!(allowlisted("git status", &allowed));
        assert!(!allowlisted("rm -rf /", &allowed));
    }

    #[test]
    fn test_default_options_ban_nothing_extra() {
        let options = RuntimeOptions::default();
        assert!(options.banned_commands.is_empty());
        assert_eq!(options.shell_timeout_secs, 120);
    }
}
