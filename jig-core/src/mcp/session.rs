//! One MCP server session over a configured transport

use super::McpError;
use crate::config::{McpServerConfig, McpTransport};
use crate::resolver::VariableResolver;
use rmcp::model::CallToolRequestParam;
use rmcp::service::RunningService;
use rmcp::transport::streamable_http_client::{
    StreamableHttpClientTransport, StreamableHttpClientTransportConfig,
};
use rmcp::transport::TokioChildProcess;
use rmcp::{RoleClient, ServiceExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::RwLock;

/// Tool definition discovered from a server
#[derive(Debug, Clone)]
pub struct McpToolDef {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Prompt advertised by a server
#[derive(Debug, Clone)]
pub struct McpPrompt {
    pub name: String,
    pub description: Option<String>,
}

/// Resource advertised by a server
#[derive(Debug, Clone)]
pub struct McpResource {
    pub uri: String,
    pub name: String,
}

/// A lazily connected MCP client session
pub struct McpSession {
    name: String,
    config: McpServerConfig,
    resolver: Arc<dyn VariableResolver>,
    service: RwLock<Option<RunningService<RoleClient, ()>>>,
}

impl McpSession {
    pub fn new(config: McpServerConfig, resolver: Arc<dyn VariableResolver>) -> Self {
        Self {
            name: config.name.clone(),
            config,
            resolver,
            service: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &McpServerConfig {
        &self.config
    }

    pub async fn is_connected(&self) -> bool {
        self.service.read().await.is_some()
    }

    /// Connect if not already connected. Idempotent.
    pub async fn connect(&self) -> Result<(), McpError> {
        let mut guard = self.service.write().await;
        if guard.is_some() {
            return Ok(());
        }

        let service = match &self.config.transport {
            McpTransport::Stdio { command, args, env } => {
                let mut cmd = Command::new(command);
                for arg in args {
                    cmd.arg(arg);
                }
                for (key, value) in env {
                    let value = self
                        .resolver
                        .expand(value)
                        .await
                        .map_err(|e| McpError::Config(e.to_string()))?;
                    cmd.env(key, value);
                }

                let transport = TokioChildProcess::new(cmd).map_err(|e| {
                    McpError::Transport(format!("failed to spawn '{}': {}", self.name, e))
                })?;
                ().serve(transport).await.map_err(|e| {
                    McpError::Connection(format!("failed to connect to '{}': {}", self.name, e))
                })?
            }
            // SSE config entries ride the streamable-HTTP client; the SSE
            // transport is deprecated upstream.
            McpTransport::Http { url, headers } | McpTransport::Sse { url, headers } => {
                let transport_config = StreamableHttpClientTransportConfig::with_uri(url.clone());
                let header_map = self.resolve_headers(headers).await?;
                let http_client = reqwest::Client::builder()
                    .default_headers(header_map)
                    .build()
                    .map_err(|e| McpError::Transport(e.to_string()))?;
                let transport =
                    StreamableHttpClientTransport::with_client(http_client, transport_config);
                ().serve(transport).await.map_err(|e| {
                    McpError::Connection(format!("failed to connect to '{}': {}", self.name, e))
                })?
            }
        };

        *guard = Some(service);
        Ok(())
    }

    async fn resolve_headers(
        &self,
        headers: &HashMap<String, String>,
    ) -> Result<HeaderMap, McpError> {
        let mut map = HeaderMap::new();
        for (key, value) in headers {
            let value = self
                .resolver
                .expand(value)
                .await
                .map_err(|e| McpError::Config(e.to_string()))?;
            let name = HeaderName::try_from(key.as_str())
                .map_err(|e| McpError::Config(format!("invalid header name '{}': {}", key, e)))?;
            let value = HeaderValue::try_from(value.as_str())
                .map_err(|e| McpError::Config(format!("invalid header value for '{}': {}", key, e)))?;
            map.insert(name, value);
        }
        Ok(map)
    }

    /// Drop the connection; a later `connect` starts fresh.
    pub async fn disconnect(&self) -> Result<(), McpError> {
        let mut guard = self.service.write().await;
        if let Some(service) = guard.take() {
            service
                .cancel()
                .await
                .map_err(|e| McpError::Connection(format!("failed to disconnect: {}", e)))?;
        }
        Ok(())
    }

    /// Tools the server advertises, with disabled tools filtered at
    /// discovery (an undiscovered tool cannot be invoked).
    pub async fn list_tools(&self) -> Result<Vec<McpToolDef>, McpError> {
        let guard = self.service.read().await;
        let service = guard
            .as_ref()
            .ok_or_else(|| McpError::Connection(format!("'{}' not connected", self.name)))?;

        let result = service
            .list_tools(Default::default())
            .await
            .map_err(|e| McpError::Protocol(format!("list_tools failed: {}", e)))?;

        Ok(result
            .tools
            .into_iter()
            .filter(|tool| self.config.tool_enabled(&tool.name))
            .map(|tool| McpToolDef {
                name: tool.name.to_string(),
                description: tool.description.unwrap_or_default().to_string(),
                input_schema: Value::Object((*tool.input_schema).clone()),
            })
            .collect())
    }

    /// Invoke a tool; returns the joined text content and the error flag.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<(String, bool), McpError> {
        let guard = self.service.read().await;
        let service = guard
            .as_ref()
            .ok_or_else(|| McpError::Connection(format!("'{}' not connected", self.name)))?;

        let params = CallToolRequestParam {
            name: name.to_string().into(),
            arguments: arguments.as_object().cloned(),
        };
        let result = service
            .call_tool(params)
            .await
            .map_err(|e| McpError::ToolExecution(e.to_string()))?;

        // Decode through JSON rather than the crate's content types; the
        // wire shape is stable across rmcp versions.
        let value = serde_json::to_value(result)?;
        Ok(decode_call_result(&value))
    }

    pub async fn list_prompts(&self) -> Result<Vec<McpPrompt>, McpError> {
        let guard = self.service.read().await;
        let service = guard
            .as_ref()
            .ok_or_else(|| McpError::Connection(format!("'{}' not connected", self.name)))?;

        match service.list_prompts(Default::default()).await {
            Ok(result) => Ok(result
                .prompts
                .into_iter()
                .map(|p| McpPrompt {
                    name: p.name.to_string(),
                    description: p.description.map(|d| d.to_string()),
                })
                .collect()),
            // Servers without prompt support reject the request; that is
            // an empty list, not an error.
            Err(_) => Ok(Vec::new()),
        }
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<serde_json::Map<String, Value>>,
    ) -> Result<Value, McpError> {
        let guard = self.service.read().await;
        let service = guard
            .as_ref()
            .ok_or_else(|| McpError::Connection(format!("'{}' not connected", self.name)))?;

        let result = service
            .get_prompt(rmcp::model::GetPromptRequestParam {
                name: name.to_string().into(),
                arguments,
            })
            .await
            .map_err(|e| McpError::Protocol(format!("get_prompt failed: {}", e)))?;
        Ok(serde_json::to_value(result)?)
    }

    pub async fn list_resources(&self) -> Result<Vec<McpResource>, McpError> {
        let guard = self.service.read().await;
        let service = guard
            .as_ref()
            .ok_or_else(|| McpError::Connection(format!("'{}' not connected", self.name)))?;

        match service.list_resources(Default::default()).await {
            Ok(result) => Ok(result
                .resources
                .into_iter()
                .map(|r| McpResource {
                    uri: r.uri.to_string(),
                    name: r.name.to_string(),
                })
                .collect()),
            Err(_) => Ok(Vec::new()),
        }
    }

    pub async fn read_resource(&self, uri: &str) -> Result<Value, McpError> {
        let guard = self.service.read().await;
        let service = guard
            .as_ref()
            .ok_or_else(|| McpError::Connection(format!("'{}' not connected", self.name)))?;

        let result = service
            .read_resource(rmcp::model::ReadResourceRequestParam {
                uri: uri.to_string().into(),
            })
            .await
            .map_err(|e| McpError::Protocol(format!("read_resource failed: {}", e)))?;
        Ok(serde_json::to_value(result)?)
    }

    /// Health probe: a bounded round-trip over the live session
    pub async fn ping(&self) -> Result<(), McpError> {
        let timeout = std::time::Duration::from_secs(self.config.timeout_secs);
        match tokio::time::timeout(timeout, self.list_tools()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(McpError::Timeout(self.name.clone())),
        }
    }
}

/// Extract `(text, is_error)` from a serialized `CallToolResult`
fn decode_call_result(value: &Value) -> (String, bool) {
    let is_error = value["isError"].as_bool().unwrap_or(false);
    let mut pieces: Vec<String> = Vec::new();
    if let Some(content) = value["content"].as_array() {
        for item in content {
            match item["type"].as_str() {
                Some("text") => {
                    if let Some(text) = item["text"].as_str() {
                        pieces.push(text.to_string());
                    }
                }
                _ => pieces.push(item.to_string()),
            }
        }
    }
    (pieces.join("\n"), is_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ShellResolver;
    use serde_json::json;

    fn stdio_config(command: &str) -> McpServerConfig {
        McpServerConfig::new(
            "test",
            McpTransport::Stdio {
                command: command.to_string(),
                args: vec![],
                env: HashMap::new(),
            },
        )
    }

    fn session(config: McpServerConfig) -> McpSession {
        McpSession::new(config, Arc::new(ShellResolver::new()))
    }

    #[tokio::test]
    async fn test_not_connected_initially() {
        let s = session(stdio_config("echo"));
        assert!(!s.is_connected().await);
    }

    #[tokio::test]
    async fn test_disconnect_when_not_connected_is_noop() {
        let s = session(stdio_config("echo"));
        assert!(s.disconnect().await.is_ok());
        assert!(s.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_missing_command_fails() {
        let s = session(stdio_config("/nonexistent/command/xyz"));
        let result = s.connect().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_call_without_connection_fails() {
        let s = session(stdio_config("echo"));
        let result = s.call_tool("anything", json!({})).await;
        assert!(matches!(result, Err(McpError::Connection(_))));
    }

    #[tokio::test]
    async fn test_invalid_header_name_rejected() {
        let mut headers = HashMap::new();
        headers.insert("Bad Header".to_string(), "v".to_string());
        let config = McpServerConfig::new(
            "http",
            McpTransport::Http {
                url: "https://example.com/mcp".to_string(),
                headers,
            },
        );
        let s = session(config);
        assert!(matches!(s.connect().await, Err(McpError::Config(_))));
    }

    #[test]
    fn test_decode_call_result_text_items() {
        let value = json!({
            "content": [
                {"type": "text", "text": "line one"},
                {"type": "text", "text": "line two"}
            ],
            "isError": false
        });
        let (text, is_error) = decode_call_result(&value);
        assert_eq!(text, "line one\nline two");
        assert!(!is_error);
    }

    #[test]
    fn test_decode_call_result_error_flag() {
        let value = json!({
            "content": [{"type": "text", "text": "boom"}],
            "isError": true
        });
        let (text, is_error) = decode_call_result(&value);
        assert_eq!(text, "boom");
        assert!(is_error);
    }

    #[test]
    fn test_decode_call_result_non_text_serialized() {
        let value = json!({
            "content": [{"type": "image", "mimeType": "image/png", "data": "aaa"}]
        });
        let (text, is_error) = decode_call_result(&value);
        assert!(text.contains("image/png"));
        assert!(!is_error);
    }
}
