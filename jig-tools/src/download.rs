//! The `download` tool: fetch a URL to a file

use crate::Deps;
use async_trait::async_trait;
use jig_core::permission::PermissionRequest;
use jig_core::tool::{Tool, ToolCallInput, ToolError, ToolInfo, ToolOutput, MAX_TOOL_OUTPUT_BYTES};
use jig_core::{RunContext, Schema};
use schemars::JsonSchema;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize, JsonSchema)]
struct DownloadInput {
    /// URL to download (http or https)
    url: String,
    /// Destination file path
    path: String,
    /// Timeout in seconds (default 30)
    timeout_secs: Option<u64>,
}

pub struct DownloadTool {
    deps: Deps,
    client: reqwest::Client,
}

impl DownloadTool {
    pub fn new(deps: Deps) -> Self {
        Self {
            deps,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Tool for DownloadTool {
    fn name(&self) -> &str {
        "download"
    }

    fn info(&self) -> ToolInfo {
        ToolInfo::new(
            "download",
            "Download a URL to a file (capped at 5MB).",
            Schema::of::<DownloadInput>(),
        )
    }

    async fn run(&self, ctx: &RunContext, call: ToolCallInput) -> Result<ToolOutput, ToolError> {
        let input: DownloadInput = call.parse()?;
        if !input.url.starts_with("http://") && !input.url.starts_with("https://") {
            return Ok(ToolOutput::error("url must be http or https"));
        }
        let dest = ctx.resolve_path(&input.path);

        let request = PermissionRequest::new(
            ctx,
            call.call_id.clone(),
            "download",
            "download",
            format!("download {} to {}", input.url, dest.display()),
            call.params(),
        )
        .with_path(&dest);
        if !self.deps.permissions()?.request(ctx, request).await {
            return Err(ToolError::PermissionDenied);
        }

        let timeout = input
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        let response = tokio::select! {
            _ = ctx.canceled() => return Ok(ToolOutput::error("download interrupted")),
            result = self.client.get(&input.url).timeout(timeout).send() => {
                result.map_err(|e| ToolError::Http(e.to_string()))?
            }
        };
        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Http(format!("HTTP {} for {}", status, input.url)));
        }
        if let Some(length) = response.content_length() {
            if length as usize > MAX_TOOL_OUTPUT_BYTES {
                return Ok(ToolOutput::error(format!(
                    "response is {} bytes; the download cap is {} bytes",
                    length, MAX_TOOL_OUTPUT_BYTES
                )));
            }
        }

        let mut body: Vec<u8> = Vec::new();
        let mut response = response;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ToolError::Http(e.to_string()))?
        {
            if body.len() + chunk.len() > MAX_TOOL_OUTPUT_BYTES {
                return Ok(ToolOutput::error(format!(
                    "response exceeds the {} byte download cap",
                    MAX_TOOL_OUTPUT_BYTES
                )));
            }
            body.extend_from_slice(&chunk);
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&dest, &body).await?;

        Ok(ToolOutput::text(format!(
            "downloaded {} bytes to {}",
            body.len(),
            dest.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_download_writes_file() {
        let (_rt, deps) = test_support::auto_approved().await;
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"payload".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let tool = DownloadTool::new(deps);
        let ctx = RunContext::new("s", dir.path());
        let output = tool
            .run(
                &ctx,
                ToolCallInput::new(
                    "c",
                    format!(r#"{{"url":"{}/f.bin","path":"out/f.bin"}}"#, server.uri()),
                ),
            )
            .await
            .unwrap();

        assert!(!output.is_error);
        let written = std::fs::read(dir.path().join("out/f.bin")).unwrap();
        assert_eq!(written, b"payload");
    }

    #[tokio::test]
    async fn test_download_error_status() {
        let (_rt, deps) = test_support::auto_approved().await;
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let tool = DownloadTool::new(deps);
        let ctx = RunContext::new("s", dir.path());
        let result = tool
            .run(
                &ctx,
                ToolCallInput::new(
                    "c",
                    format!(r#"{{"url":"{}/f","path":"f"}}"#, server.uri()),
                ),
            )
            .await;
        assert!(matches!(result, Err(ToolError::Http(_))));
    }
}
