//! The `fetch` tool: HTTP GET with format conversion

use crate::Deps;
use async_trait::async_trait;
use jig_core::permission::PermissionRequest;
use jig_core::tool::{Tool, ToolCallInput, ToolError, ToolInfo, ToolOutput, MAX_TOOL_OUTPUT_BYTES};
use jig_core::{RunContext, Schema};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum FetchFormat {
    /// Plain text; HTML pages are converted to markdown
    Text,
    /// Pretty-printed JSON
    Json,
    /// The raw body, untouched
    Raw,
}

#[derive(Deserialize)]
struct FetchInput {
    url: String,
    format: Option<FetchFormat>,
    timeout_secs: Option<u64>,
}

fn fetch_schema() -> Schema {
    Schema::object(
        [
            ("url", Schema::string("URL to fetch (http or https)")),
            (
                "format",
                Schema::String {
                    description: Some(
                        "How to present the body; defaults to text".to_string(),
                    ),
                    enum_values: vec![
                        "text".to_string(),
                        "json".to_string(),
                        "raw".to_string(),
                    ],
                },
            ),
            ("timeout_secs", Schema::integer("Timeout in seconds (default 30)")),
        ],
        &["url"],
    )
}

pub struct FetchTool {
    deps: Deps,
    client: reqwest::Client,
}

impl FetchTool {
    pub fn new(deps: Deps) -> Self {
        Self {
            deps,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Tool for FetchTool {
    fn name(&self) -> &str {
        "fetch"
    }

    fn info(&self) -> ToolInfo {
        ToolInfo::new(
            "fetch",
            "Fetch a URL and return its body as text (HTML converted to \
             markdown), pretty-printed JSON, or raw. Bodies are capped at 5MB.",
            fetch_schema(),
        )
    }

    async fn run(&self, ctx: &RunContext, call: ToolCallInput) -> Result<ToolOutput, ToolError> {
        let input: FetchInput = call.parse()?;
        if !input.url.starts_with("http://") && !input.url.starts_with("https://") {
            return Ok(ToolOutput::error("url must be http or https"));
        }

        let request = PermissionRequest::new(
            ctx,
            call.call_id.clone(),
            "fetch",
            "fetch",
            format!("fetch {}", input.url),
            call.params(),
        );
        if !self.deps.permissions()?.request(ctx, request).await {
            return Err(ToolError::PermissionDenied);
        }

        let timeout = input
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        let body = tokio::select! {
            _ = ctx.canceled() => return Ok(ToolOutput::error("fetch interrupted")),
            result = fetch_capped(&self.client, &input.url, timeout) => result?,
        };
        let (content_type, bytes, truncated) = body;

        let format = input.format.unwrap_or(FetchFormat::Text);
        let text = String::from_utf8_lossy(&bytes).to_string();
        let rendered = match format {
            FetchFormat::Raw => text,
            FetchFormat::Json => match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(value) => serde_json::to_string_pretty(&value).unwrap_or(text),
                Err(e) => return Ok(ToolOutput::error(format!("body is not valid json: {}", e))),
            },
            FetchFormat::Text => {
                if content_type.contains("text/html") {
                    html2md::parse_html(&text)
                } else {
                    text
                }
            }
        };

        let mut output = ToolOutput::text_capped(rendered);
        if truncated && output.metadata.is_none() {
            output = output.with_metadata(serde_json::json!({"truncated": true}));
        }
        Ok(output)
    }
}

/// GET with the body capped at the tool output limit; returns
/// (content-type, body, truncated)
async fn fetch_capped(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<(String, Vec<u8>, bool), ToolError> {
    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| ToolError::Http(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ToolError::Http(format!("HTTP {} for {}", status, url)));
    }
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let mut body: Vec<u8> = Vec::new();
    let mut truncated = false;
    let mut response = response;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| ToolError::Http(e.to_string()))?
    {
        if body.len() + chunk.len() > MAX_TOOL_OUTPUT_BYTES {
            let room = MAX_TOOL_OUTPUT_BYTES - body.len();
            body.extend_from_slice(&chunk[..room]);
            truncated = true;
            break;
        }
        body.extend_from_slice(&chunk);
    }
    Ok((content_type, body, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn serve(body: &str, content_type: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(body.as_bytes().to_vec(), content_type),
            )
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_fetch_text() {
        let (_rt, deps) = test_support::auto_approved().await;
        let server = serve("plain body", "text/plain").await;

        let tool = FetchTool::new(deps);
        let ctx = RunContext::new("s", "/tmp");
        let output = tool
            .run(
                &ctx,
                ToolCallInput::new("c", format!(r#"{{"url":"{}/page"}}"#, server.uri())),
            )
            .await
            .unwrap();
        assert_eq!(output.content, "plain body");
    }

    #[tokio::test]
    async fn test_fetch_html_to_markdown() {
        let (_rt, deps) = test_support::auto_approved().await;
        let server = serve("<h1>Title</h1><p>para</p>", "text/html; charset=utf-8").await;

        let tool = FetchTool::new(deps);
        let ctx = RunContext::new("s", "/tmp");
        let output = tool
            .run(
                &ctx,
                ToolCallInput::new("c", format!(r#"{{"url":"{}/page"}}"#, server.uri())),
            )
            .await
            .unwrap();
        assert!(output.content.contains("Title"));
        assert!(!output.content.contains("<h1>"));
    }

    #[tokio::test]
    async fn test_fetch_json_pretty_printed() {
        let (_rt, deps) = test_support::auto_approved().await;
        let server = serve(r#"{"a":1,"b":[2,3]}"#, "application/json").await;

        let tool = FetchTool::new(deps);
        let ctx = RunContext::new("s", "/tmp");
        let output = tool
            .run(
                &ctx,
                ToolCallInput::new(
                    "c",
                    format!(r#"{{"url":"{}/page","format":"json"}}"#, server.uri()),
                ),
            )
            .await
            .unwrap();
        assert!(output.content.contains("\"a\": 1"));
    }

    #[tokio::test]
    async fn test_fetch_http_error_status() {
        let (_rt, deps) = test_support::auto_approved().await;
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let tool = FetchTool::new(deps);
        let ctx = RunContext::new("s", "/tmp");
        let result = tool
            .run(
                &ctx,
                ToolCallInput::new("c", format!(r#"{{"url":"{}/missing"}}"#, server.uri())),
            )
            .await;
        assert!(matches!(result, Err(ToolError::Http(_))));
    }

    #[tokio::test]
    async fn test_fetch_rejects_non_http() {
        let (_rt, deps) = test_support::auto_approved().await;
        let tool = FetchTool::new(deps);
        let ctx = RunContext::new("s", "/tmp");
        let output = tool
            .run(&ctx, ToolCallInput::new("c", r#"{"url":"ftp://x"}"#))
            .await
            .unwrap();
        assert!(output.is_error);
    }

    #[tokio::test]
    async fn test_fetch_denied_without_permission() {
        let runtime =
            test_support::mock_runtime(jig_core::permission::PermissionPolicy::AutoDeny).await;
        let deps = crate::Deps::new(&runtime);
        let tool = FetchTool::new(deps);
        let ctx = RunContext::new("s", "/tmp");
        let result = tool
            .run(
                &ctx,
                ToolCallInput::new("c", r#"{"url":"http://localhost:9/x"}"#),
            )
            .await;
        assert!(matches!(result, Err(ToolError::PermissionDenied)));
    }
}
