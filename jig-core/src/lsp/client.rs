//! One language-server subprocess: JSON-RPC over stdio with Content-Length
//! framing, request/response correlation, and diagnostics collection.

use super::{Diagnostic, LspError};
use crate::config::LspServerConfig;
use parking_lot::Mutex as SyncMutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex, Notify};

/// Bounded wait for diagnostics after a file notification
pub const DIAGNOSTICS_WAIT: Duration = Duration::from_secs(2);

type Pending = Arc<SyncMutex<HashMap<i64, oneshot::Sender<Value>>>>;
type DiagnosticsMap = Arc<SyncMutex<HashMap<PathBuf, Vec<Diagnostic>>>>;

pub struct LspClient {
    name: String,
    config: LspServerConfig,
    child: Mutex<Child>,
    stdin: Arc<Mutex<ChildStdin>>,
    next_id: AtomicI64,
    pending: Pending,
    diagnostics: DiagnosticsMap,
    diag_notify: Arc<Notify>,
    /// Document versions for files we have opened
    open_files: SyncMutex<HashMap<PathBuf, i64>>,
    alive: Arc<AtomicBool>,
}

impl LspClient {
    /// Spawn the server process and run the LSP initialize handshake,
    /// bounded by the configured timeout.
    pub async fn start(config: &LspServerConfig, root: &Path) -> Result<Self, LspError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .current_dir(root)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| LspError::Spawn(config.name.clone(), e))?;
        let stdin = child.stdin.take().ok_or(LspError::ServerExited)?;
        let stdout = child.stdout.take().ok_or(LspError::ServerExited)?;

        let client = Self {
            name: config.name.clone(),
            config: config.clone(),
            child: Mutex::new(child),
            stdin: Arc::new(Mutex::new(stdin)),
            next_id: AtomicI64::new(1),
            pending: Arc::new(SyncMutex::new(HashMap::new())),
            diagnostics: Arc::new(SyncMutex::new(HashMap::new())),
            diag_notify: Arc::new(Notify::new()),
            open_files: SyncMutex::new(HashMap::new()),
            alive: Arc::new(AtomicBool::new(true)),
        };
        client.spawn_reader(stdout);

        let timeout = Duration::from_secs(config.timeout_secs);
        tokio::time::timeout(timeout, client.initialize(root))
            .await
            .map_err(|_| LspError::Timeout(config.name.clone()))??;

        Ok(client)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &LspServerConfig {
        &self.config
    }

    /// False once the server's stdout closed (crash or exit)
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    fn spawn_reader(&self, stdout: ChildStdout) {
        let pending = self.pending.clone();
        let diagnostics = self.diagnostics.clone();
        let diag_notify = self.diag_notify.clone();
        let stdin = self.stdin.clone();
        let alive = self.alive.clone();

        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            loop {
                let message = match read_frame(&mut reader).await {
                    Ok(Some(message)) => message,
                    Ok(None) | Err(_) => break,
                };

                if let Some(id) = message.get("id").and_then(Value::as_i64) {
                    if message.get("result").is_some() || message.get("error").is_some() {
                        // Response to one of our requests.
                        if let Some(tx) = pending.lock().remove(&id) {
                            let _ = tx.send(message);
                        }
                        continue;
                    }
                    // Server-to-client request (configuration, registration).
                    // We support none of them; answer null so the server
                    // does not stall.
                    let reply = json!({"jsonrpc": "2.0", "id": id, "result": null});
                    let mut stdin = stdin.lock().await;
                    let _ = write_frame(&mut stdin, &reply).await;
                    continue;
                }

                if message.get("method").and_then(Value::as_str)
                    == Some("textDocument/publishDiagnostics")
                {
                    let params = &message["params"];
                    if let (Some(uri), Ok(diags)) = (
                        params["uri"].as_str(),
                        serde_json::from_value::<Vec<Diagnostic>>(
                            params["diagnostics"].clone(),
                        ),
                    ) {
                        if let Some(path) = uri_to_path(uri) {
                            diagnostics.lock().insert(path, diags);
                            diag_notify.notify_waiters();
                        }
                    }
                }
            }
            alive.store(false, Ordering::Relaxed);
        });
    }

    async fn initialize(&self, root: &Path) -> Result<(), LspError> {
        let params = json!({
            "processId": std::process::id(),
            "rootUri": path_to_uri(root),
            "capabilities": {
                "textDocument": {
                    "synchronization": {"didSave": true},
                    "publishDiagnostics": {"relatedInformation": false}
                }
            },
            "initializationOptions": self.config.init_options.clone().unwrap_or(Value::Null),
        });
        self.request("initialize", params).await?;
        self.notify("initialized", json!({})).await
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, LspError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let message = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        {
            let mut stdin = self.stdin.lock().await;
            write_frame(&mut stdin, &message).await?;
        }

        let response = rx.await.map_err(|_| LspError::ServerExited)?;
        if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
            return Err(LspError::Protocol(format!(
                "{} failed: {}",
                method, error
            )));
        }
        Ok(response["result"].clone())
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), LspError> {
        let message = json!({"jsonrpc": "2.0", "method": method, "params": params});
        let mut stdin = self.stdin.lock().await;
        write_frame(&mut stdin, &message).await
    }

    /// Notify the server about current file content, opening it on first
    /// contact and sending a full-sync change thereafter.
    pub async fn sync_file(&self, path: &Path, content: &str) -> Result<(), LspError> {
        let version = {
            let mut open = self.open_files.lock();
            match open.get_mut(&path.to_path_buf()) {
                Some(version) => {
                    *version += 1;
                    Some(*version)
                }
                None => {
                    open.insert(path.to_path_buf(), 1);
                    None
                }
            }
        };

        match version {
            None => {
                self.notify(
                    "textDocument/didOpen",
                    json!({
                        "textDocument": {
                            "uri": path_to_uri(path),
                            "languageId": language_id(path),
                            "version": 1,
                            "text": content,
                        }
                    }),
                )
                .await
            }
            Some(version) => {
                self.notify(
                    "textDocument/didChange",
                    json!({
                        "textDocument": {"uri": path_to_uri(path), "version": version},
                        "contentChanges": [{"text": content}],
                    }),
                )
                .await
            }
        }
    }

    pub async fn close_file(&self, path: &Path) -> Result<(), LspError> {
        if self.open_files.lock().remove(&path.to_path_buf()).is_none() {
            return Ok(());
        }
        self.diagnostics.lock().remove(&path.to_path_buf());
        self.notify(
            "textDocument/didClose",
            json!({"textDocument": {"uri": path_to_uri(path)}}),
        )
        .await
    }

    /// Current diagnostics for a file
    pub fn diagnostics(&self, path: &Path) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .get(&path.to_path_buf())
            .cloned()
            .unwrap_or_default()
    }

    /// Wait briefly for a publishDiagnostics round after a sync
    pub async fn wait_for_diagnostics(&self, path: &Path) -> Vec<Diagnostic> {
        let deadline = tokio::time::Instant::now() + DIAGNOSTICS_WAIT;
        loop {
            let notified = self.diag_notify.notified();
            if self.diagnostics.lock().contains_key(&path.to_path_buf()) {
                return self.diagnostics(path);
            }
            tokio::select! {
                _ = notified => continue,
                _ = tokio::time::sleep_until(deadline) => return self.diagnostics(path),
            }
        }
    }

    /// Orderly shutdown; the process is killed if it lingers.
    pub async fn shutdown(&self) {
        let _ = tokio::time::timeout(Duration::from_secs(2), async {
            let _ = self.request("shutdown", Value::Null).await;
            let _ = self.notify("exit", Value::Null).await;
        })
        .await;
        let mut child = self.child.lock().await;
        let _ = child.kill().await;
        self.alive.store(false, Ordering::Relaxed);
    }
}

// ============================================================================
// Framing and paths
// ============================================================================

async fn write_frame(stdin: &mut ChildStdin, message: &Value) -> Result<(), LspError> {
    let body = serde_json::to_string(message)?;
    let frame = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);
    stdin.write_all(frame.as_bytes()).await?;
    stdin.flush().await?;
    Ok(())
}

async fn read_frame(
    reader: &mut BufReader<ChildStdout>,
) -> Result<Option<Value>, LspError> {
    let mut content_length: Option<usize> = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some(value) = line.strip_prefix("Content-Length:") {
            content_length = value.trim().parse().ok();
        }
    }

    let length = content_length
        .ok_or_else(|| LspError::Protocol("missing Content-Length header".to_string()))?;
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    Ok(Some(serde_json::from_slice(&body)?))
}

fn path_to_uri(path: &Path) -> String {
    format!("file://{}", path.display())
}

fn uri_to_path(uri: &str) -> Option<PathBuf> {
    uri.strip_prefix("file://").map(PathBuf::from)
}

fn language_id(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("rs") => "rust",
        Some("go") => "go",
        Some("py") => "python",
        Some("ts") | Some("tsx") => "typescript",
        Some("js") | Some("jsx") => "javascript",
        Some("c") | Some("h") => "c",
        Some("cpp") | Some("cc") | Some("hpp") => "cpp",
        Some("java") => "java",
        Some("rb") => "ruby",
        Some("md") => "markdown",
        Some("toml") => "toml",
        Some("json") => "json",
        Some("yaml") | Some("yml") => "yaml",
        _ => "plaintext",
    }
}
