//! Supervisor for the configured MCP server fleet
//!
//! States: disabled → starting → connected → error; an errored server is
//! lazily reconnected on its next invocation. Startup is concurrent with
//! per-server timeouts, and a panic in one server's startup isolates to
//! that server.

use super::session::{McpPrompt, McpResource, McpSession, McpToolDef};
use super::tool_adapter::McpToolAdapter;
use super::{McpError, McpState};
use crate::config::McpServerConfig;
use crate::events::{Broker, Event, McpEvent};
use crate::resolver::VariableResolver;
use crate::tool::{mcp_tool_name, ToolRegistry};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Application-level keep-alive cadence
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(600);

/// Status snapshot for one server
#[derive(Debug, Clone)]
pub struct McpServerInfo {
    pub name: String,
    pub state: McpState,
    pub error: Option<String>,
    pub tool_count: usize,
    pub prompt_count: usize,
}

/// Everything one server needs to serve calls: the session, its state, and
/// the hooks to publish changes and refresh the tool registry.
pub struct ServerHandle {
    session: McpSession,
    state: RwLock<McpState>,
    error: RwLock<Option<String>>,
    tool_count: AtomicUsize,
    prompt_count: AtomicUsize,
    broker: Arc<Broker>,
    registry: Weak<ToolRegistry>,
}

impl ServerHandle {
    fn new(
        config: McpServerConfig,
        resolver: Arc<dyn VariableResolver>,
        broker: Arc<Broker>,
        registry: Weak<ToolRegistry>,
    ) -> Self {
        let initial = if config.disabled {
            McpState::Disabled
        } else {
            McpState::Starting
        };
        Self {
            session: McpSession::new(config, resolver),
            state: RwLock::new(initial),
            error: RwLock::new(None),
            tool_count: AtomicUsize::new(0),
            prompt_count: AtomicUsize::new(0),
            broker,
            registry,
        }
    }

    pub fn name(&self) -> &str {
        self.session.name()
    }

    pub fn state(&self) -> McpState {
        *self.state.read()
    }

    pub fn info(&self) -> McpServerInfo {
        McpServerInfo {
            name: self.name().to_string(),
            state: self.state(),
            error: self.error.read().clone(),
            tool_count: self.tool_count.load(Ordering::Relaxed),
            prompt_count: self.prompt_count.load(Ordering::Relaxed),
        }
    }

    fn set_state(&self, state: McpState, error: Option<String>) {
        *self.state.write() = state;
        *self.error.write() = error;
        self.broker.publish(Event::Mcp(McpEvent::StateChanged {
            name: self.name().to_string(),
            state,
            tool_count: self.tool_count.load(Ordering::Relaxed),
            prompt_count: self.prompt_count.load(Ordering::Relaxed),
        }));
    }

    /// Connect, discover capabilities, register tool adapters, publish.
    async fn start(self: &Arc<Self>) -> Result<(), McpError> {
        self.session.connect().await?;
        self.refresh_capabilities().await?;
        self.set_state(McpState::Connected, None);
        Ok(())
    }

    async fn refresh_capabilities(self: &Arc<Self>) -> Result<(), McpError> {
        let tools = self.session.list_tools().await?;
        let prompts = self.session.list_prompts().await.unwrap_or_default();
        self.tool_count.store(tools.len(), Ordering::Relaxed);
        self.prompt_count.store(prompts.len(), Ordering::Relaxed);

        if let Some(registry) = self.registry.upgrade() {
            registry.unregister_mcp_server(self.name());
            for def in tools {
                let adapter = McpToolAdapter::new(Arc::clone(self), def.clone());
                registry.register_mcp(
                    self.name(),
                    &def.name,
                    Arc::new(adapter),
                );
            }
        }
        self.broker.publish(Event::Mcp(McpEvent::ToolsListChanged {
            name: self.name().to_string(),
        }));
        self.broker
            .publish(Event::Mcp(McpEvent::PromptsListChanged {
                name: self.name().to_string(),
            }));
        Ok(())
    }

    fn fail(&self, err: &McpError) {
        log::warn!("mcp server '{}' errored: {}", self.name(), err);
        self.set_state(McpState::Error, Some(err.to_string()));
    }

    async fn reconnect(self: &Arc<Self>) -> Result<(), McpError> {
        let _ = self.session.disconnect().await;
        self.set_state(McpState::Starting, None);
        match self.start().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Probe the session before a call; on failure transition to error and
    /// eagerly attempt one reconnect so the call proceeds transparently.
    async fn ensure_ready(self: &Arc<Self>) -> Result<(), McpError> {
        match self.state() {
            McpState::Disabled => return Err(McpError::Disabled(self.name().to_string())),
            McpState::Connected => match self.session.ping().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    self.fail(&e);
                    log::info!("mcp server '{}' reconnecting after failed probe", self.name());
                }
            },
            McpState::Starting | McpState::Error => {}
        }
        self.reconnect().await
    }

    /// Invoke a tool with the probe/reconnect discipline
    pub async fn call_tool(
        self: &Arc<Self>,
        tool: &str,
        arguments: Value,
    ) -> Result<(String, bool), McpError> {
        self.ensure_ready().await?;
        match self.session.call_tool(tool, arguments).await {
            Ok(result) => Ok(result),
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    pub async fn list_tools(self: &Arc<Self>) -> Result<Vec<McpToolDef>, McpError> {
        self.ensure_ready().await?;
        self.session.list_tools().await
    }

    pub async fn list_prompts(self: &Arc<Self>) -> Result<Vec<McpPrompt>, McpError> {
        self.ensure_ready().await?;
        self.session.list_prompts().await
    }

    pub async fn get_prompt(
        self: &Arc<Self>,
        name: &str,
        arguments: Option<serde_json::Map<String, Value>>,
    ) -> Result<Value, McpError> {
        self.ensure_ready().await?;
        self.session.get_prompt(name, arguments).await
    }

    pub async fn list_resources(self: &Arc<Self>) -> Result<Vec<McpResource>, McpError> {
        self.ensure_ready().await?;
        self.session.list_resources().await
    }

    pub async fn read_resource(self: &Arc<Self>, uri: &str) -> Result<Value, McpError> {
        self.ensure_ready().await?;
        self.session.read_resource(uri).await
    }

    async fn close(&self) -> Result<(), McpError> {
        self.session.disconnect().await
    }
}

/// The fleet supervisor
pub struct McpSupervisor {
    servers: RwLock<HashMap<String, Arc<ServerHandle>>>,
    broker: Arc<Broker>,
    resolver: Arc<dyn VariableResolver>,
    registry: Weak<ToolRegistry>,
}

impl McpSupervisor {
    pub fn new(
        broker: Arc<Broker>,
        resolver: Arc<dyn VariableResolver>,
        registry: &Arc<ToolRegistry>,
    ) -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
            broker,
            resolver,
            registry: Arc::downgrade(registry),
        }
    }

    /// Initialize every configured server concurrently, each under its own
    /// timeout. A panicking startup isolates to its server.
    pub async fn start_all(&self, configs: &[McpServerConfig]) {
        let mut tasks = Vec::new();

        for config in configs {
            let handle = Arc::new(ServerHandle::new(
                config.clone(),
                self.resolver.clone(),
                self.broker.clone(),
                self.registry.clone(),
            ));
            self.servers
                .write()
                .insert(config.name.clone(), handle.clone());

            if config.disabled {
                handle.set_state(McpState::Disabled, None);
                continue;
            }
            handle.set_state(McpState::Starting, None);

            let timeout = Duration::from_secs(config.timeout_secs);
            let name = config.name.clone();
            tasks.push((
                name,
                handle.clone(),
                tokio::spawn(async move {
                    match tokio::time::timeout(timeout, handle.start()).await {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(e),
                        Err(_) => Err(McpError::Timeout(handle.name().to_string())),
                    }
                }),
            ));
        }

        for (name, handle, task) in tasks {
            match task.await {
                Ok(Ok(())) => {
                    log::info!("mcp server '{}' connected", name);
                }
                Ok(Err(e)) => handle.fail(&e),
                Err(join_err) => {
                    let e = if join_err.is_panic() {
                        McpError::Connection(format!("startup panicked: {}", join_err))
                    } else {
                        McpError::Connection(join_err.to_string())
                    };
                    handle.fail(&e);
                }
            }
        }
    }

    /// Spawn the 10-minute keep-alive loop; it dies with the token.
    pub fn spawn_keepalive(self: &Arc<Self>, token: tokio_util::sync::CancellationToken) {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(KEEPALIVE_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await; // the immediate first tick
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = interval.tick() => {}
                }
                for handle in supervisor.handles() {
                    if handle.state() != McpState::Connected {
                        continue;
                    }
                    if let Err(e) = handle.session.ping().await {
                        handle.fail(&e);
                    }
                }
            }
        });
    }

    fn handles(&self) -> Vec<Arc<ServerHandle>> {
        self.servers.read().values().cloned().collect()
    }

    pub fn server(&self, name: &str) -> Option<Arc<ServerHandle>> {
        self.servers.read().get(name).cloned()
    }

    /// Status of every configured server
    pub fn states(&self) -> HashMap<String, McpServerInfo> {
        self.servers
            .read()
            .iter()
            .map(|(name, handle)| (name.clone(), handle.info()))
            .collect()
    }

    /// Invoke `tool` on `server` (names as configured, not namespaced)
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<(String, bool), McpError> {
        let handle = self
            .server(server)
            .ok_or_else(|| McpError::UnknownServer(server.to_string()))?;
        handle.call_tool(tool, arguments).await
    }

    /// Close every session, joining errors and filtering benign shutdown
    /// noise.
    pub async fn close_all(&self) -> Result<(), Vec<McpError>> {
        let handles = self.handles();
        let mut errors = Vec::new();
        for handle in handles {
            if let Err(e) = handle.close().await {
                if !e.is_benign_shutdown() {
                    errors.push(e);
                }
            }
        }
        if let Some(registry) = self.registry.upgrade() {
            for handle in self.handles() {
                registry.unregister_mcp_server(handle.name());
            }
        }
        self.servers.write().clear();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// The registry name an MCP tool is published under
    pub fn registry_name(server: &str, tool: &str) -> String {
        mcp_tool_name(server, tool)
    }
}
