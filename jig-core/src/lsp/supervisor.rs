//! Routing and lifecycle for the configured language servers

use super::client::LspClient;
use super::Diagnostic;
use crate::config::LspServerConfig;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Status of one configured server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LspServerState {
    Disabled,
    Running,
    Error(String),
}

pub struct LspSupervisor {
    configs: Vec<LspServerConfig>,
    root: PathBuf,
    clients: RwLock<HashMap<String, Arc<LspClient>>>,
    states: RwLock<HashMap<String, LspServerState>>,
}

impl LspSupervisor {
    pub fn new(configs: Vec<LspServerConfig>, root: impl Into<PathBuf>) -> Self {
        Self {
            configs,
            root: root.into(),
            clients: RwLock::new(HashMap::new()),
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Start every enabled server. Failures are recorded per server and do
    /// not block the others.
    pub async fn start_all(&self) {
        for config in &self.configs {
            if config.disabled {
                self.states
                    .write()
                    .insert(config.name.clone(), LspServerState::Disabled);
                continue;
            }
            self.start_one(config).await;
        }
    }

    async fn start_one(&self, config: &LspServerConfig) {
        let root = self.workspace_root(config);
        match LspClient::start(config, &root).await {
            Ok(client) => {
                log::info!("lsp server '{}' started", config.name);
                self.clients
                    .write()
                    .insert(config.name.clone(), Arc::new(client));
                self.states
                    .write()
                    .insert(config.name.clone(), LspServerState::Running);
            }
            Err(e) => {
                log::warn!("lsp server '{}' failed to start: {}", config.name, e);
                self.states
                    .write()
                    .insert(config.name.clone(), LspServerState::Error(e.to_string()));
            }
        }
    }

    /// Walk up from the session root looking for a configured root marker
    fn workspace_root(&self, config: &LspServerConfig) -> PathBuf {
        if config.root_markers.is_empty() {
            return self.root.clone();
        }
        let mut dir = self.root.as_path();
        loop {
            for marker in &config.root_markers {
                if dir.join(marker).exists() {
                    return dir.to_path_buf();
                }
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => return self.root.clone(),
            }
        }
    }

    fn clients_for(&self, path: &Path) -> Vec<(String, Arc<LspClient>)> {
        self.clients
            .read()
            .iter()
            .filter(|(_, client)| client.config().handles(path))
            .map(|(name, client)| (name.clone(), client.clone()))
            .collect()
    }

    /// Notify the servers handling `path` that its content changed (after
    /// view/edit/write). Dead servers are transparently restarted first.
    pub async fn sync_file(&self, path: &Path, content: &str) {
        for (name, client) in self.clients_for(path) {
            let client = match self.ensure_alive(&name, client).await {
                Some(client) => client,
                None => continue,
            };
            if let Err(e) = client.sync_file(path, content).await {
                log::debug!("lsp '{}' sync failed for {}: {}", name, path.display(), e);
            }
        }
    }

    async fn ensure_alive(&self, name: &str, client: Arc<LspClient>) -> Option<Arc<LspClient>> {
        if client.is_alive() {
            return Some(client);
        }
        log::info!("lsp server '{}' died, restarting", name);
        let config = self.configs.iter().find(|c| c.name == name)?.clone();
        self.start_one(&config).await;
        self.clients.read().get(name).cloned()
    }

    /// Diagnostics for `path`, merged across servers. Waits (bounded) for
    /// each relevant server's publish round when `wait` is set.
    pub async fn diagnostics(&self, path: &Path, wait: bool) -> Vec<Diagnostic> {
        let mut merged = Vec::new();
        for (_, client) in self.clients_for(path) {
            if wait {
                merged.extend(client.wait_for_diagnostics(path).await);
            } else {
                merged.extend(client.diagnostics(path));
            }
        }
        merged
    }

    pub async fn close_file(&self, path: &Path) {
        for (_, client) in self.clients_for(path) {
            let _ = client.close_file(path).await;
        }
    }

    /// State of every configured server
    pub fn states(&self) -> HashMap<String, LspServerState> {
        self.states.read().clone()
    }

    pub async fn shutdown_all(&self) {
        let clients: Vec<_> = self.clients.write().drain().collect();
        for (_, client) in clients {
            client.shutdown().await;
        }
    }

    /// True when no server is configured for this path; callers skip the
    /// diagnostics wait entirely.
    pub fn handles(&self, path: &Path) -> bool {
        !self.clients_for(path).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str, command: &str, disabled: bool) -> LspServerConfig {
        LspServerConfig {
            name: name.to_string(),
            command: command.to_string(),
            args: vec![],
            env: HashMap::new(),
            root_markers: vec![],
            filetypes: vec!["*.rs".to_string()],
            init_options: None,
            disabled,
            timeout_secs: 1,
        }
    }

    #[tokio::test]
    async fn test_disabled_server_not_started() {
        let supervisor = LspSupervisor::new(vec![config("ra", "true", true)], "/tmp");
        supervisor.start_all().await;
        assert_eq!(supervisor.states()["ra"], LspServerState::Disabled);
        assert!(!supervisor.handles(Path::new("/tmp/main.rs")));
    }

    #[tokio::test]
    async fn test_failed_server_recorded_as_error() {
        let supervisor =
            LspSupervisor::new(vec![config("ghost", "/nonexistent/lsp", false)], "/tmp");
        supervisor.start_all().await;
        assert!(matches!(
            supervisor.states()["ghost"],
            LspServerState::Error(_)
        ));
    }

    #[tokio::test]
    async fn test_diagnostics_empty_without_servers() {
        let supervisor = LspSupervisor::new(vec![], "/tmp");
        supervisor.start_all().await;
        let diags = supervisor.diagnostics(Path::new("/tmp/a.rs"), false).await;
        assert!(diags.is_empty());
    }

    #[tokio::test]
    async fn test_workspace_root_marker_search() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();

        let mut cfg = config("ra", "true", false);
        cfg.root_markers = vec!["Cargo.toml".to_string()];
        let supervisor = LspSupervisor::new(vec![cfg.clone()], &nested);
        assert_eq!(supervisor.workspace_root(&cfg), dir.path());
    }
}
