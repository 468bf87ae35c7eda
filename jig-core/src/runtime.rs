//! The runtime object
//!
//! Everything that used to be ambient global state — provider connections,
//! the tool registry, MCP/LSP session maps, the permission registry — lives
//! on one explicitly constructed `Runtime`, passed as a dependency. Tests
//! construct their own.
//!
//! Shared maps follow a reader-writer discipline: single-writer at
//! construction and on `reload`, read-only for all runtime callers.

use crate::agent::{run_turn, AgentError, AgentTool};
use crate::cancel::RunContext;
use crate::config::{
    AgentConfig, Config, ModelDescriptor, ModelType, ProviderDialect, SelectedModel,
};
use crate::error::{Error, Result};
use crate::events::{Broker, ContentEvent, Event, Subscription, Topic};
use crate::lsp::LspSupervisor;
use crate::mcp::McpSupervisor;
use crate::permission::{PermissionPolicy, PermissionService};
use crate::provider::{
    AnthropicProvider, ConfigCredentialStore, CredentialStore, GoogleProvider, OpenAiProvider,
    Provider, ProviderError, RetryConfig,
};
use crate::resolver::{ShellResolver, VariableResolver};
use crate::session::{
    MemoryMessageStore, MemorySessionStore, MessageStore, SessionFacade, SessionStore,
};
use crate::tool::{Tool, ToolInfo, ToolRegistry};
use crate::types::{Message, Part, Role};
use parking_lot::{Mutex as SyncMutex, RwLock};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub struct Runtime {
    config: RwLock<Config>,
    workspace_root: PathBuf,
    broker: Arc<Broker>,
    resolver: Arc<dyn VariableResolver>,
    credentials: Arc<dyn CredentialStore>,
    registry: Arc<ToolRegistry>,
    permissions: Arc<PermissionService>,
    mcp: Arc<McpSupervisor>,
    lsp: RwLock<Arc<LspSupervisor>>,
    sessions: Arc<SessionFacade>,
    providers: RwLock<HashMap<ModelType, Arc<dyn Provider>>>,
    root_token: CancellationToken,
    /// Serializes submits per session (concurrent submits wait, they are
    /// not rejected)
    submit_locks: SyncMutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Turn contexts for cancel()
    active_turns: SyncMutex<HashMap<String, RunContext>>,
}

/// Assembles a [`Runtime`] from config plus collaborator implementations;
/// in-memory defaults cover tests and demos.
pub struct RuntimeBuilder {
    config: Config,
    workspace_root: PathBuf,
    session_store: Option<Arc<dyn SessionStore>>,
    message_store: Option<Arc<dyn MessageStore>>,
    resolver: Option<Arc<dyn VariableResolver>>,
    credentials: Option<Arc<dyn CredentialStore>>,
    permission_policy: PermissionPolicy,
    provider_overrides: HashMap<ModelType, Arc<dyn Provider>>,
}

impl RuntimeBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            workspace_root: PathBuf::from("."),
            session_store: None,
            message_store: None,
            resolver: None,
            credentials: None,
            permission_policy: PermissionPolicy::Interactive,
            provider_overrides: HashMap::new(),
        }
    }

    pub fn workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    pub fn message_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.message_store = Some(store);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn VariableResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn permission_policy(mut self, policy: PermissionPolicy) -> Self {
        self.permission_policy = policy;
        self
    }

    /// Install a pre-built provider for a model type instead of constructing
    /// one from config (custom backends, test doubles).
    pub fn provider(mut self, model_type: ModelType, provider: Arc<dyn Provider>) -> Self {
        self.provider_overrides.insert(model_type, provider);
        self
    }

    /// Validate the config and assemble the runtime. Fails fast: an invalid
    /// config or a config without any enabled provider refuses to start.
    pub async fn build(self) -> Result<Arc<Runtime>> {
        let config = self.config;
        if config.enabled_providers().next().is_none() {
            return Err(Error::NoProvider);
        }
        if config.models.large.is_none() {
            return Err(Error::Config("no large model selected".to_string()));
        }

        let resolver: Arc<dyn VariableResolver> = self
            .resolver
            .unwrap_or_else(|| Arc::new(ShellResolver::new()));
        let credentials: Arc<dyn CredentialStore> = self.credentials.unwrap_or_else(|| {
            Arc::new(ConfigCredentialStore::new(config.clone(), resolver.clone()))
        });

        let broker = Arc::new(Broker::new());
        let registry = Arc::new(ToolRegistry::new());
        let permissions = Arc::new(PermissionService::new(
            broker.clone(),
            self.permission_policy,
        ));
        let mcp = Arc::new(McpSupervisor::new(
            broker.clone(),
            resolver.clone(),
            &registry,
        ));
        let lsp = Arc::new(LspSupervisor::new(
            config.lsp_servers.clone(),
            &self.workspace_root,
        ));
        let sessions = Arc::new(SessionFacade::new(
            self.session_store
                .unwrap_or_else(|| Arc::new(MemorySessionStore::new())),
            self.message_store
                .unwrap_or_else(|| Arc::new(MemoryMessageStore::new())),
        ));

        // Overrides win and are never constructed from config; the Small
        // slot falls back to the Large provider when unselected.
        let mut providers = self.provider_overrides;
        for model_type in [ModelType::Large, ModelType::Small] {
            if providers.contains_key(&model_type) {
                continue;
            }
            let selected = match config.models.get(model_type) {
                Some(selected) => selected.clone(),
                None => match providers.get(&ModelType::Large) {
                    Some(large) => {
                        providers.insert(model_type, large.clone());
                        continue;
                    }
                    None => match config.models.get(ModelType::Large) {
                        Some(selected) => selected.clone(),
                        None => continue,
                    },
                },
            };
            let provider = build_provider(&config, &selected, credentials.clone())
                .await
                .map_err(Error::from)?;
            providers.insert(model_type, provider);
        }

        let runtime = Arc::new(Runtime {
            config: RwLock::new(config),
            workspace_root: self.workspace_root,
            broker,
            resolver,
            credentials,
            registry,
            permissions,
            mcp,
            lsp: RwLock::new(lsp),
            sessions,
            providers: RwLock::new(providers),
            root_token: CancellationToken::new(),
            submit_locks: SyncMutex::new(HashMap::new()),
            active_turns: SyncMutex::new(HashMap::new()),
        });

        // The sub-agent tool needs a handle back to the runtime.
        runtime
            .registry
            .register(Arc::new(AgentTool::new(Arc::downgrade(&runtime))));

        Ok(runtime)
    }
}

async fn build_providers(
    config: &Config,
    credentials: Arc<dyn CredentialStore>,
) -> std::result::Result<HashMap<ModelType, Arc<dyn Provider>>, ProviderError> {
    let mut providers = HashMap::new();
    for model_type in [ModelType::Large, ModelType::Small] {
        // Small falls back to the large selection.
        let selected = match config.models.get(model_type) {
            Some(selected) => selected.clone(),
            None => match config.models.get(ModelType::Large) {
                Some(selected) => selected.clone(),
                None => continue,
            },
        };
        let provider = build_provider(config, &selected, credentials.clone()).await?;
        providers.insert(model_type, provider);
    }
    Ok(providers)
}

async fn build_provider(
    config: &Config,
    selected: &SelectedModel,
    credentials: Arc<dyn CredentialStore>,
) -> std::result::Result<Arc<dyn Provider>, ProviderError> {
    let provider_config = config.provider(&selected.provider_id).ok_or_else(|| {
        ProviderError::Configuration(format!("unknown provider '{}'", selected.provider_id))
    })?;
    if provider_config.disabled {
        return Err(ProviderError::Configuration(format!(
            "provider '{}' is disabled",
            provider_config.id
        )));
    }

    let retry = RetryConfig {
        max_attempts: config.options.max_retries,
        ..RetryConfig::default()
    };

    let provider: Arc<dyn Provider> = match provider_config.dialect {
        ProviderDialect::Anthropic | ProviderDialect::Bedrock | ProviderDialect::Vertex => {
            Arc::new(
                AnthropicProvider::new(provider_config, selected.clone(), credentials, retry)
                    .await?,
            )
        }
        ProviderDialect::OpenAi | ProviderDialect::OpenAiResponses => Arc::new(
            OpenAiProvider::new(provider_config, selected.clone(), credentials, retry).await?,
        ),
        ProviderDialect::Google => Arc::new(
            GoogleProvider::new(provider_config, selected.clone(), credentials, retry).await?,
        ),
    };
    Ok(provider)
}

impl Runtime {
    pub fn builder(config: Config) -> RuntimeBuilder {
        RuntimeBuilder::new(config)
    }

    /// Start the supervised subsystems (MCP servers, LSP servers, the MCP
    /// keep-alive loop).
    pub async fn start(self: &Arc<Self>) {
        let mcp_configs = self.config.read().mcp_servers.clone();
        self.mcp.start_all(&mcp_configs).await;
        self.mcp.spawn_keepalive(self.root_token.child_token());
        self.lsp.read().clone().start_all().await;
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub fn permissions(&self) -> &Arc<PermissionService> {
        &self.permissions
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionFacade> {
        &self.sessions
    }

    pub fn mcp(&self) -> &Arc<McpSupervisor> {
        &self.mcp
    }

    pub fn lsp(&self) -> Arc<LspSupervisor> {
        self.lsp.read().clone()
    }

    pub fn resolver(&self) -> &Arc<dyn VariableResolver> {
        &self.resolver
    }

    pub fn options(&self) -> crate::config::RuntimeOptions {
        self.config.read().options.clone()
    }

    pub fn workspace_root(&self) -> &std::path::Path {
        &self.workspace_root
    }

    /// Subscribe to an event topic for the lifetime of `ctx`
    pub fn subscribe(&self, topic: Topic, ctx: &RunContext) -> Subscription {
        self.broker.subscribe(topic, ctx)
    }

    // ── Models ──────────────────────────────────────────────────────────

    pub(crate) fn provider_for(
        &self,
        model_type: ModelType,
    ) -> std::result::Result<Arc<dyn Provider>, AgentError> {
        self.providers
            .read()
            .get(&model_type)
            .cloned()
            .ok_or_else(|| AgentError::NoModel(format!("{:?}", model_type).to_lowercase()))
    }

    /// Every model of every enabled provider
    pub fn enumerate_models(&self) -> Vec<(String, ModelDescriptor)> {
        let config = self.config.read();
        config
            .enabled_providers()
            .flat_map(|p| p.models.iter().map(|m| (p.id.clone(), m.clone())))
            .collect()
    }

    /// Swap the selection for a model type; the provider connection is
    /// rebuilt immediately.
    pub async fn switch_model(
        &self,
        model_type: ModelType,
        selected: SelectedModel,
    ) -> Result<()> {
        let config_snapshot = self.config.read().clone();
        if config_snapshot.model_descriptor(&selected).is_none() {
            return Err(Error::Config(format!(
                "provider '{}' does not declare model '{}'",
                selected.provider_id, selected.model_id
            )));
        }
        let provider = build_provider(&config_snapshot, &selected, self.credentials.clone())
            .await
            .map_err(Error::from)?;

        self.providers.write().insert(model_type, provider);
        self.config
            .write()
            .models
            .set(model_type, selected.clone());
        self.broker
            .publish(Event::Content(ContentEvent::ModelSwitched {
                model_type,
                provider_id: selected.provider_id,
                model_id: selected.model_id,
            }));
        Ok(())
    }

    // ── Agent API ───────────────────────────────────────────────────────

    fn agent_config(&self, agent_id: &str) -> std::result::Result<AgentConfig, AgentError> {
        if let Some(agent) = self.config.read().agent(agent_id) {
            return Ok(agent.clone());
        }
        match agent_id {
            "coder" => Ok(AgentConfig::coder()),
            "task" => Ok(AgentConfig::task()),
            other => Err(AgentError::UnknownAgent(other.to_string())),
        }
    }

    /// Submit a user message and drive the turn to completion, returning
    /// the final assistant message. Streaming output arrives on the event
    /// bus while this future runs.
    pub async fn submit(
        self: &Arc<Self>,
        agent_id: &str,
        session_id: &str,
        text: &str,
        attachments: Vec<(String, Vec<u8>)>,
    ) -> Result<Message> {
        self.submit_with_parent(agent_id, session_id, text, attachments, &self.root_token)
            .await
    }

    /// Like [`Self::submit`], with an explicit parent cancellation token
    /// (used by the sub-agent tool to tie child turns to the caller).
    pub async fn submit_with_parent(
        self: &Arc<Self>,
        agent_id: &str,
        session_id: &str,
        text: &str,
        attachments: Vec<(String, Vec<u8>)>,
        parent: &CancellationToken,
    ) -> Result<Message> {
        let agent = self.agent_config(agent_id).map_err(Error::from)?;
        let session = self.sessions.get_session(session_id).await?;

        let lock = self.submit_lock(session_id);
        let _guard = lock.lock().await;

        let ctx = RunContext::with_parent(session_id, &session.working_dir, parent);
        self.active_turns
            .lock()
            .insert(session_id.to_string(), ctx.clone());

        let mut user = Message::new(Role::User);
        if !text.is_empty() {
            user.append_text(text);
        }
        for (mime, data) in attachments {
            user.parts.push(Part::Binary { mime, data });
        }

        let result = run_turn(self, &agent, &ctx, user).await;
        self.active_turns.lock().remove(session_id);
        result.map_err(Error::from)
    }

    /// Cancel the in-flight turn of a session, if any
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.active_turns.lock().get(session_id) {
            Some(ctx) => {
                ctx.cancel();
                true
            }
            None => false,
        }
    }

    /// Tools visible to an agent
    pub fn enumerate_tools(&self, agent_id: &str) -> Result<Vec<ToolInfo>> {
        let agent = self.agent_config(agent_id).map_err(Error::from)?;
        Ok(self.registry.infos_for_agent(&agent))
    }

    /// Register a built-in tool (called by the tools crate at startup)
    pub fn register_tool(&self, tool: Arc<dyn Tool>) {
        self.registry.register(tool);
    }

    fn submit_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.submit_locks
            .lock()
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Apply a new config under the single-writer discipline. Reloading an
    /// identical config is a no-op on all in-memory state; returns whether
    /// anything changed.
    pub async fn reload(self: &Arc<Self>, new_config: Config) -> Result<bool> {
        if *self.config.read() == new_config {
            return Ok(false);
        }
        if new_config.enabled_providers().next().is_none() {
            return Err(Error::NoProvider);
        }

        let providers = build_providers(&new_config, self.credentials.clone())
            .await
            .map_err(Error::from)?;

        let (mcp_changed, lsp_changed) = {
            let old = self.config.read();
            (
                old.mcp_servers != new_config.mcp_servers,
                old.lsp_servers != new_config.lsp_servers,
            )
        };

        *self.providers.write() = providers;
        *self.config.write() = new_config.clone();

        if mcp_changed {
            let _ = self.mcp.close_all().await;
            self.mcp.start_all(&new_config.mcp_servers).await;
        }
        if lsp_changed {
            let old = self.lsp.read().clone();
            old.shutdown_all().await;
            let fresh = Arc::new(LspSupervisor::new(
                new_config.lsp_servers.clone(),
                &self.workspace_root,
            ));
            fresh.start_all().await;
            *self.lsp.write() = fresh;
        }
        Ok(true)
    }

    /// Orderly shutdown: cancel every turn, close every supervised session.
    pub async fn shutdown(&self) {
        self.root_token.cancel();
        if let Err(errors) = self.mcp.close_all().await {
            for e in errors {
                log::warn!("mcp shutdown error: {}", e);
            }
        }
        self.lsp.read().clone().shutdown_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelDescriptor, ProviderConfig, SelectedModels};

    fn minimal_config() -> Config {
        let provider = ProviderConfig {
            id: "anthropic".to_string(),
            dialect: ProviderDialect::Anthropic,
            base_url: None,
            api_key: Some("sk-test".to_string()),
            oauth: None,
            models: vec![ModelDescriptor {
                id: "claude-sonnet-4-20250514".to_string(),
                name: "Claude Sonnet 4".to_string(),
                context_window: 200_000,
                default_max_tokens: 8192,
                cost_per_1m_in: 3.0,
                cost_per_1m_out: 15.0,
                can_reason: true,
                supports_attachments: true,
            }],
            extra_headers: HashMap::new(),
            extra_body: serde_json::Map::new(),
            region: None,
            project: None,
            location: None,
            disabled: false,
        };
        Config {
            providers: vec![provider],
            models: SelectedModels {
                large: Some(SelectedModel {
                    provider_id: "anthropic".to_string(),
                    model_id: "claude-sonnet-4-20250514".to_string(),
                    max_tokens: None,
                    reasoning_effort: None,
                    think: false,
                }),
                small: None,
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_build_requires_provider() {
        let result = Runtime::builder(Config::default()).build().await;
        assert!(matches!(result, Err(Error::NoProvider)));
    }

    #[tokio::test]
    async fn test_build_requires_model_selection() {
        let mut config = minimal_config();
        config.models = SelectedModels::default();
        let result = Runtime::builder(config).build().await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_small_falls_back_to_large() {
        let runtime = Runtime::builder(minimal_config()).build().await.unwrap();
        let small = runtime.provider_for(ModelType::Small).unwrap();
        assert_eq!(small.selected().model_id, "claude-sonnet-4-20250514");
    }

    #[tokio::test]
    async fn test_agent_tool_registered() {
        let runtime = Runtime::builder(minimal_config()).build().await.unwrap();
        assert!(runtime.registry().get("agent").is_some());
    }

    #[tokio::test]
    async fn test_builtin_agents_resolve() {
        let runtime = Runtime::builder(minimal_config()).build().await.unwrap();
        assert!(runtime.agent_config("coder").is_ok());
        assert!(runtime.agent_config("task").is_ok());
        assert!(matches!(
            runtime.agent_config("ghost"),
            Err(AgentError::UnknownAgent(_))
        ));
    }

    #[tokio::test]
    async fn test_reload_unchanged_config_is_noop() {
        let config = minimal_config();
        let runtime = Runtime::builder(config.clone()).build().await.unwrap();
        let changed = runtime.reload(config).await.unwrap();
        assert!(!changed);
    }

    #[tokio::test]
    async fn test_reload_changed_options_applies() {
        let config = minimal_config();
        let runtime = Runtime::builder(config.clone()).build().await.unwrap();
        let mut updated = config;
        updated.options.shell_timeout_secs = 42;
        assert!(runtime.reload(updated).await.unwrap());
        assert_eq!(runtime.options().shell_timeout_secs, 42);
    }

    #[tokio::test]
    async fn test_switch_model_validates() {
        let runtime = Runtime::builder(minimal_config()).build().await.unwrap();
        let result = runtime
            .switch_model(
                ModelType::Large,
                SelectedModel {
                    provider_id: "anthropic".to_string(),
                    model_id: "not-a-model".to_string(),
                    max_tokens: None,
                    reasoning_effort: None,
                    think: false,
                },
            )
            .await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_cancel_without_active_turn() {
        let runtime = Runtime::builder(minimal_config()).build().await.unwrap();
        assert!(!runtime.cancel("nope"));
    }

    #[tokio::test]
    async fn test_enumerate_models() {
        let runtime = Runtime::builder(minimal_config()).build().await.unwrap();
        let models = runtime.enumerate_models();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].0, "anthropic");
    }
}
