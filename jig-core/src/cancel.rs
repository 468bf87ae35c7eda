//! Cancellation contexts
//!
//! Contexts form a tree rooted at the process: one child per session, one
//! per turn, one per tool invocation. Cancelling a parent cancels the whole
//! subtree. Every async operation in the runtime takes a [`RunContext`] and
//! observes cancellation at its next suspension point.

use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Identifies and scopes one unit of runtime work
#[derive(Debug, Clone)]
pub struct RunContext {
    session_id: String,
    message_id: Option<Uuid>,
    cwd: PathBuf,
    token: CancellationToken,
}

impl RunContext {
    /// A root context for a session
    pub fn new(session_id: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            session_id: session_id.into(),
            message_id: None,
            cwd: cwd.into(),
            token: CancellationToken::new(),
        }
    }

    /// A root context parented to an existing cancellation token
    pub fn with_parent(
        session_id: impl Into<String>,
        cwd: impl Into<PathBuf>,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            message_id: None,
            cwd: cwd.into(),
            token: parent.child_token(),
        }
    }

    /// Derive a child context; cancelling the parent cancels the child
    pub fn child(&self) -> Self {
        Self {
            session_id: self.session_id.clone(),
            message_id: self.message_id,
            cwd: self.cwd.clone(),
            token: self.token.child_token(),
        }
    }

    /// Derive a child context scoped to a specific message
    pub fn for_message(&self, message_id: Uuid) -> Self {
        let mut child = self.child();
        child.message_id = Some(message_id);
        child
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn message_id(&self) -> Option<Uuid> {
        self.message_id
    }

    /// The session working directory; relative tool paths resolve against it
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Resolve a possibly-relative path against the working directory
    pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes when the context is canceled
    pub async fn canceled(&self) {
        self.token.cancelled().await
    }

    /// The underlying token, for wiring into subscribers and tasks
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }
}
