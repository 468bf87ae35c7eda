//! Tool trait and registry
//!
//! Tools are the runtime's only way to touch the outside world. Built-ins
//! live in the `jig-tools` crate; MCP servers contribute tools dynamically
//! under `mcp_<server>_<tool>`. The registry is read-mostly: it is populated
//! at startup (and on MCP list changes) and read by every turn.

use crate::cancel::RunContext;
use crate::schema::Schema;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// Tool output larger than this is truncated, with the truncation recorded
/// in metadata
pub const MAX_TOOL_OUTPUT_BYTES: usize = 5 * 1024 * 1024;

/// Static description of a tool, encoded for providers
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Schema,
    pub required: Vec<String>,
}

impl ToolInfo {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Schema,
    ) -> Self {
        let required = parameters.required().to_vec();
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            required,
        }
    }
}

/// The invocation payload handed to a tool
#[derive(Debug, Clone)]
pub struct ToolCallInput {
    /// The model-issued tool-use id
    pub call_id: String,
    /// JSON-encoded arguments
    pub input: String,
}

impl ToolCallInput {
    pub fn new(call_id: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            input: input.into(),
        }
    }

    /// Deserialize the arguments into a typed input struct
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ToolError> {
        let text = if self.input.trim().is_empty() {
            "{}"
        } else {
            &self.input
        };
        serde_json::from_str(text)
            .map_err(|e| ToolError::InvalidInput(format!("invalid tool input: {}", e)))
    }

    /// The raw arguments as a JSON value (for permission prompts)
    pub fn params(&self) -> Value {
        serde_json::from_str(&self.input).unwrap_or_else(|_| Value::Object(Default::default()))
    }
}

/// What a tool returns
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
    pub metadata: Option<Value>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
            metadata: None,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
            metadata: None,
        }
    }

    /// Like [`Self::text`] but enforcing the output cap; truncation is
    /// reported in metadata
    pub fn text_capped(content: String) -> Self {
        if content.len() <= MAX_TOOL_OUTPUT_BYTES {
            return Self::text(content);
        }
        let original_bytes = content.len();
        let mut cut = MAX_TOOL_OUTPUT_BYTES;
        while !content.is_char_boundary(cut) {
            cut -= 1;
        }
        let mut truncated = content[..cut].to_string();
        truncated.push_str("\n[output truncated]");
        Self {
            content: truncated,
            is_error: false,
            metadata: Some(serde_json::json!({
                "truncated": true,
                "original_bytes": original_bytes,
            })),
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Errors from tool execution
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("permission denied")]
    PermissionDenied,

    #[error("tool timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(String),

    #[error("{0}")]
    Custom(String),
}

impl From<String> for ToolError {
    fn from(s: String) -> Self {
        Self::Custom(s)
    }
}

impl From<&str> for ToolError {
    fn from(s: &str) -> Self {
        Self::Custom(s.to_string())
    }
}

/// A callable tool
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn info(&self) -> ToolInfo;

    async fn run(&self, ctx: &RunContext, call: ToolCallInput) -> Result<ToolOutput, ToolError>;
}

// ============================================================================
// Registry
// ============================================================================

/// Where a registered tool came from
#[derive(Debug, Clone, PartialEq, Eq)]
enum ToolOrigin {
    Builtin,
    Mcp { server: String, tool: String },
}

struct Entry {
    origin: ToolOrigin,
    tool: Arc<dyn Tool>,
}

/// Catalog of built-in and MCP-provided tools
#[derive(Default)]
pub struct ToolRegistry {
    entries: RwLock<Vec<Entry>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a built-in tool, replacing any previous tool of the same name
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let mut entries = self.entries.write();
        entries.retain(|e| e.tool.name() != tool.name());
        entries.push(Entry {
            origin: ToolOrigin::Builtin,
            tool,
        });
    }

    /// Register an MCP-provided tool under its namespaced name
    pub fn register_mcp(&self, server: &str, original_name: &str, tool: Arc<dyn Tool>) {
        let mut entries = self.entries.write();
        entries.retain(|e| e.tool.name() != tool.name());
        entries.push(Entry {
            origin: ToolOrigin::Mcp {
                server: server.to_string(),
                tool: original_name.to_string(),
            },
            tool,
        });
    }

    /// Drop every tool contributed by an MCP server (on disconnect/refresh)
    pub fn unregister_mcp_server(&self, server: &str) {
        self.entries.write().retain(|e| {
            !matches!(&e.origin, ToolOrigin::Mcp { server: s, .. } if s == server)
        });
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.entries
            .read()
            .iter()
            .find(|e| e.tool.name() == name)
            .map(|e| e.tool.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Every registered tool, registration order preserved
    pub fn all(&self) -> Vec<Arc<dyn Tool>> {
        self.entries.read().iter().map(|e| e.tool.clone()).collect()
    }

    /// Tools visible to an agent: built-ins through its whitelist, MCP tools
    /// through its per-server map
    pub fn for_agent(&self, agent: &crate::config::AgentConfig) -> Vec<Arc<dyn Tool>> {
        self.entries
            .read()
            .iter()
            .filter(|e| match &e.origin {
                ToolOrigin::Builtin => agent.tool_allowed(e.tool.name()),
                ToolOrigin::Mcp { server, tool } => agent.mcp_tool_allowed(server, tool),
            })
            .map(|e| e.tool.clone())
            .collect()
    }

    /// `ToolInfo`s for an agent, in registration order
    pub fn infos_for_agent(&self, agent: &crate::config::AgentConfig) -> Vec<ToolInfo> {
        self.for_agent(agent).iter().map(|t| t.info()).collect()
    }
}

/// The namespaced registry name for an MCP tool
pub fn mcp_tool_name(server: &str, tool: &str) -> String {
    format!("mcp_{}_{}", server, tool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;

    struct EchoTool {
        name: String,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            &self.name
        }

        fn info(&self) -> ToolInfo {
            ToolInfo::new(
                self.name.clone(),
                "Echo the input back",
                Schema::object([("text", Schema::string("Text to echo"))], &["text"]),
            )
        }

        async fn run(
            &self,
            _ctx: &RunContext,
            call: ToolCallInput,
        ) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::text(call.input))
        }
    }

    fn echo(name: &str) -> Arc<dyn Tool> {
        Arc::new(EchoTool {
            name: name.to_string(),
        })
    }

    #[test]
    fn test_register_and_get() {
        let registry = ToolRegistry::new();
        registry.register(echo("view"));
        assert!(registry.get("view").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_register_replaces_same_name() {
        let registry = ToolRegistry::new();
        registry.register(echo("view"));
        registry.register(echo("view"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_mcp_registration_and_teardown() {
        let registry = ToolRegistry::new();
        registry.register(echo("view"));
        registry.register_mcp("fs", "read_file", echo(&mcp_tool_name("fs", "read_file")));
        registry.register_mcp("fs", "write_file", echo(&mcp_tool_name("fs", "write_file")));
        assert_eq!(registry.len(), 3);

        registry.unregister_mcp_server("fs");
        assert_eq!(registry.len(), 1);
        assert!(registry.get("view").is_some());
    }

    #[test]
    fn test_for_agent_filters_builtins() {
        let registry = ToolRegistry::new();
        registry.register(echo("view"));
        registry.register(echo("shell"));

        let task = AgentConfig::task();
        let visible = registry.for_agent(&task);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].name(), "view");
    }

    #[test]
    fn test_for_agent_filters_mcp_by_original_name() {
        let registry = ToolRegistry::new();
        registry.register_mcp("fs", "read_file", echo(&mcp_tool_name("fs", "read_file")));
        registry.register_mcp("fs", "write_file", echo(&mcp_tool_name("fs", "write_file")));

        let mut agent = AgentConfig::coder();
        let mut map = std::collections::HashMap::new();
        map.insert("fs".to_string(), Some(vec!["read_file".to_string()]));
        agent.allowed_mcp = Some(map);

        let visible = registry.for_agent(&agent);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].name(), "mcp_fs_read_file");
    }

    #[test]
    fn test_tool_call_input_parse_empty_as_object() {
        #[derive(serde::Deserialize)]
        struct In {
            #[serde(default)]
            text: String,
        }
        let call = ToolCallInput::new("c1", "");
        let parsed: In = call.parse().unwrap();
        assert_eq!(parsed.text, "");
    }

    #[test]
    fn test_tool_call_input_parse_error() {
        #[derive(serde::Deserialize)]
        #[allow(dead_code)]
        struct In {
            text: String,
        }
        let call = ToolCallInput::new("c1", "{not json");
        let result: Result<In, _> = call.parse();
        assert!(matches!(result, Err(ToolError::InvalidInput(_))));
    }

    #[test]
    fn test_output_cap_reports_truncation() {
        let big = "x".repeat(MAX_TOOL_OUTPUT_BYTES + 10);
        let output = ToolOutput::text_capped(big);
        assert!(output.content.len() <= MAX_TOOL_OUTPUT_BYTES + 32);
        assert!(output.content.ends_with("[output truncated]"));
        let meta = output.metadata.unwrap();
        assert_eq!(meta["truncated"], true);
        assert_eq!(meta["original_bytes"], MAX_TOOL_OUTPUT_BYTES + 10);
    }

    #[test]
    fn test_output_under_cap_untouched() {
        let output = ToolOutput::text_capped("small".to_string());
        assert_eq!(output.content, "small");
        assert!(output.metadata.is_none());
    }

    #[test]
    fn test_info_required_pulled_from_schema() {
        let info = ToolInfo::new(
            "view",
            "View a file",
            Schema::object(
                [
                    ("path", Schema::string("File path")),
                    ("offset", Schema::integer("Line offset")),
                ],
                &["path"],
            ),
        );
        assert_eq!(info.required, vec!["path"]);
    }
}
