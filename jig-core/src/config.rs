//! Resolved runtime configuration
//!
//! Parsing and merging of config files is the embedding application's job;
//! the runtime consumes these already-resolved structs. String values may
//! still carry `$VAR` / `$(cmd)` references, expanded through the
//! [`crate::resolver::VariableResolver`] at the point of use.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

/// Top-level resolved configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
    #[serde(default)]
    pub lsp_servers: Vec<LspServerConfig>,
    /// Model selection per model type
    #[serde(default)]
    pub models: SelectedModels,
    #[serde(default)]
    pub options: RuntimeOptions,
}

// ============================================================================
// Providers and models
// ============================================================================

/// Wire dialect spoken by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderDialect {
    /// The Anthropic Messages API, served directly
    Anthropic,
    /// The Anthropic dialect behind AWS Bedrock endpoint rewriting
    Bedrock,
    /// The Anthropic dialect behind Google Vertex endpoint rewriting
    Vertex,
    /// OpenAI Chat Completions (also local OpenAI-compatible servers)
    OpenAi,
    /// The OpenAI Responses API
    OpenAiResponses,
    /// Google Generative Language API
    Google,
}

/// OAuth credential material held by the external credential store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix milliseconds
    pub expires_at: i64,
}

/// One configured inference backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub dialect: ProviderDialect,
    #[serde(default)]
    pub base_url: Option<String>,
    /// API key, possibly a `$VAR` reference
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub oauth: Option<OAuthConfig>,
    #[serde(default)]
    pub models: Vec<ModelDescriptor>,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
    #[serde(default)]
    pub extra_body: serde_json::Map<String, Value>,
    /// Bedrock region / Vertex project+location for rewritten endpoints
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub disabled: bool,
}

/// Static description of one model a provider serves
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub name: String,
    pub context_window: u64,
    pub default_max_tokens: u32,
    #[serde(default)]
    pub cost_per_1m_in: f64,
    #[serde(default)]
    pub cost_per_1m_out: f64,
    #[serde(default)]
    pub can_reason: bool,
    #[serde(default)]
    pub supports_attachments: bool,
}

/// Which family of work a model selection serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    /// The main coding model
    Large,
    /// Cheap model for titles, summaries, compaction
    Small,
}

/// A concrete (provider, model) choice with generation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedModel {
    pub provider_id: String,
    pub model_id: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub reasoning_effort: Option<String>,
    #[serde(default)]
    pub think: bool,
}

/// Model selections per model type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectedModels {
    #[serde(default)]
    pub large: Option<SelectedModel>,
    #[serde(default)]
    pub small: Option<SelectedModel>,
}

impl SelectedModels {
    pub fn get(&self, model_type: ModelType) -> Option<&SelectedModel> {
        match model_type {
            ModelType::Large => self.large.as_ref(),
            ModelType::Small => self.small.as_ref(),
        }
    }

    pub fn set(&mut self, model_type: ModelType, selected: SelectedModel) {
        match model_type {
            ModelType::Large => self.large = Some(selected),
            ModelType::Small => self.small = Some(selected),
        }
    }
}

// ============================================================================
// MCP
// ============================================================================

/// Transport for an MCP server connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum McpTransport {
    /// Spawn a child process, framed JSON-RPC over stdio
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// Streamable HTTP (POST + SSE responses)
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    /// Legacy SSE transport; accepted in config, served over the
    /// streamable-HTTP client (upstream deprecates SSE)
    Sse {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

/// One configured MCP server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    pub transport: McpTransport,
    /// Startup / health-probe timeout in seconds
    #[serde(default = "default_mcp_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub disabled: bool,
    /// Tool names never exposed from this server (filtered at discovery)
    #[serde(default)]
    pub disabled_tools: Vec<String>,
}

fn default_mcp_timeout() -> u64 {
    15
}

impl McpServerConfig {
    pub fn new(name: impl Into<String>, transport: McpTransport) -> Self {
        Self {
            name: name.into(),
            transport,
            timeout_secs: default_mcp_timeout(),
            disabled: false,
            disabled_tools: Vec::new(),
        }
    }

    /// Disabled tools are filtered at discovery; an undiscovered tool
    /// cannot be invoked.
    pub fn tool_enabled(&self, tool_name: &str) -> bool {
        !self.disabled_tools.iter().any(|t| t == tool_name)
    }
}

// ============================================================================
// LSP
// ============================================================================

/// One configured language server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LspServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Files marking a workspace root (e.g. `Cargo.toml`, `.git`)
    #[serde(default)]
    pub root_markers: Vec<String>,
    /// Glob patterns for files this server handles (e.g. `*.rs`)
    #[serde(default)]
    pub filetypes: Vec<String>,
    #[serde(default)]
    pub init_options: Option<Value>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default = "default_lsp_timeout")]
    pub timeout_secs: u64,
}

fn default_lsp_timeout() -> u64 {
    30
}

impl LspServerConfig {
    /// Does this server handle the given file?
    pub fn handles(&self, path: &std::path::Path) -> bool {
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => return false,
        };
        self.filetypes.iter().any(|pat| {
            glob_match(pat, name)
        })
    }
}

/// Minimal `*`-only glob matching for filetype patterns
fn glob_match(pattern: &str, name: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix('*') {
        name.ends_with(suffix)
    } else {
        pattern == name
    }
}

// ============================================================================
// Agents
// ============================================================================

/// A configured persona operated by the loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub name: String,
    pub model: ModelType,
    /// Built-in tool whitelist; `None` = all built-ins
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,
    /// MCP server → tool whitelist; value `None` = all tools of that server;
    /// map absent = all servers
    #[serde(default)]
    pub allowed_mcp: Option<HashMap<String, Option<Vec<String>>>>,
    #[serde(default)]
    pub allowed_lsp: Option<Vec<String>>,
    /// Files prepended to the system prompt
    #[serde(default)]
    pub context_paths: Vec<PathBuf>,
    /// Extra system prompt text for this persona
    #[serde(default)]
    pub prompt: Option<String>,
}

impl AgentConfig {
    /// The full-capability default persona
    pub fn coder() -> Self {
        Self {
            id: "coder".to_string(),
            name: "Coder".to_string(),
            model: ModelType::Large,
            allowed_tools: None,
            allowed_mcp: None,
            allowed_lsp: None,
            context_paths: Vec::new(),
            prompt: None,
        }
    }

    /// Read-only persona used by the `agent` tool for context searches
    pub fn task() -> Self {
        Self {
            id: "task".to_string(),
            name: "Task".to_string(),
            model: ModelType::Large,
            allowed_tools: Some(
                ["view", "grep", "glob", "ls"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
            allowed_mcp: Some(HashMap::new()),
            allowed_lsp: Some(Vec::new()),
            context_paths: Vec::new(),
            prompt: None,
        }
    }

    pub fn tool_allowed(&self, name: &str) -> bool {
        match &self.allowed_tools {
            None => true,
            Some(allowed) => allowed.iter().any(|t| t == name),
        }
    }

    pub fn mcp_tool_allowed(&self, server: &str, tool: &str) -> bool {
        match &self.allowed_mcp {
            None => true,
            Some(map) => match map.get(server) {
                None => false,
                Some(None) => true,
                Some(Some(tools)) => tools.iter().any(|t| t == tool),
            },
        }
    }
}

// ============================================================================
// Options
// ============================================================================

/// How conversation compaction replaces the prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompactionMethod {
    /// Summarize older messages with the Small model
    Llm,
    /// Drop older messages at a turn boundary
    Truncate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeOptions {
    /// Fraction of the context window that triggers compaction
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f64,
    #[serde(default = "default_compaction_method")]
    pub compaction_method: CompactionMethod,
    /// Shell tool timeout in seconds
    #[serde(default = "default_shell_timeout")]
    pub shell_timeout_secs: u64,
    /// Commands the shell tool refuses outright
    #[serde(default)]
    pub banned_commands: Vec<String>,
    /// Commands allowed without their own permission prompt
    #[serde(default)]
    pub allowed_commands: Vec<String>,
    /// Provider retry attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

fn default_compaction_threshold() -> f64 {
    0.85
}

fn default_compaction_method() -> CompactionMethod {
    CompactionMethod::Llm
}

fn default_shell_timeout() -> u64 {
    120
}

fn default_max_retries() -> usize {
    8
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            compaction_threshold: default_compaction_threshold(),
            compaction_method: default_compaction_method(),
            shell_timeout_secs: default_shell_timeout(),
            banned_commands: Vec::new(),
            allowed_commands: Vec::new(),
            max_retries: default_max_retries(),
        }
    }
}

impl Config {
    /// Providers that are configured and enabled
    pub fn enabled_providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.iter().filter(|p| !p.disabled)
    }

    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id == id)
    }

    pub fn agent(&self, id: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.id == id)
    }

    pub fn model_descriptor(&self, selected: &SelectedModel) -> Option<&ModelDescriptor> {
        self.provider(&selected.provider_id)?
            .models
            .iter()
            .find(|m| m.id == selected.model_id)
    }
}
