//! Permission service for side-effecting tool calls
//!
//! Every tool that mutates state, spawns processes or touches the network
//! asks here first. Under the interactive policy a request blocks (no
//! timeout) until a responder — usually the UI draining the `permission`
//! topic — answers, or the requesting context cancels. A
//! `GrantSession` answer silences further prompts for that session.

use crate::cancel::RunContext;
use crate::events::{Broker, Event, PermissionEvent};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;
use uuid::Uuid;

/// A capability request for one tool call
#[derive(Debug, Clone)]
pub struct PermissionRequest {
    pub id: Uuid,
    pub session_id: String,
    pub tool_call_id: String,
    pub tool_name: String,
    /// Verb-like action, e.g. `execute`, `write`, `fetch`
    pub action: String,
    pub path: Option<PathBuf>,
    pub description: String,
    pub params: Value,
}

impl PermissionRequest {
    pub fn new(
        ctx: &RunContext,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        action: impl Into<String>,
        description: impl Into<String>,
        params: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: ctx.session_id().to_string(),
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            action: action.into(),
            path: None,
            description: description.into(),
            params,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Stable hash of the parameters, for exact-match grants
    pub fn params_hash(&self) -> String {
        hash_params(&self.params)
    }
}

/// Hash a parameter object into a stable hex digest
pub fn hash_params(params: &Value) -> String {
    // serde_json orders object keys, so serialization is canonical.
    let canonical = serde_json::to_string(params).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{:x}", digest)
}

/// A responder's answer to a permission request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    /// Allow this call
    Grant,
    /// Allow this call and every later call in the same session
    GrantSession,
    /// Refuse this call
    Deny,
}

/// What to do when no responder answers for us
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionPolicy {
    /// Publish a prompt and block until answered (default)
    #[default]
    Interactive,
    /// Grant everything; for trusted non-interactive runs
    AutoApprove,
    /// Deny everything; for untrusted non-interactive runs
    AutoDeny,
}

/// The process-wide permission service
pub struct PermissionService {
    broker: Arc<Broker>,
    policy: PermissionPolicy,
    pending: Mutex<HashMap<Uuid, oneshot::Sender<PermissionDecision>>>,
    approved_sessions: RwLock<HashSet<String>>,
}

impl PermissionService {
    pub fn new(broker: Arc<Broker>, policy: PermissionPolicy) -> Self {
        Self {
            broker,
            policy,
            pending: Mutex::new(HashMap::new()),
            approved_sessions: RwLock::new(HashSet::new()),
        }
    }

    pub fn policy(&self) -> PermissionPolicy {
        self.policy
    }

    /// Request capability for one tool call; returns whether it was granted.
    ///
    /// Blocks under [`PermissionPolicy::Interactive`] until a responder
    /// answers or `ctx` cancels (cancellation denies).
    pub async fn request(&self, ctx: &RunContext, request: PermissionRequest) -> bool {
        if self.is_session_approved(&request.session_id) {
            self.publish_resolved(request.id, true);
            return true;
        }

        match self.policy {
            PermissionPolicy::AutoApprove => {
                self.publish_resolved(request.id, true);
                return true;
            }
            PermissionPolicy::AutoDeny => {
                self.publish_resolved(request.id, false);
                return false;
            }
            PermissionPolicy::Interactive => {}
        }

        let (tx, rx) = oneshot::channel();
        let request_id = request.id;
        let session_id = request.session_id.clone();
        self.pending.lock().insert(request_id, tx);
        self.broker
            .publish(Event::Permission(PermissionEvent::Requested(request)));

        let decision = tokio::select! {
            _ = ctx.canceled() => {
                self.pending.lock().remove(&request_id);
                PermissionDecision::Deny
            }
            result = rx => result.unwrap_or(PermissionDecision::Deny),
        };

        let granted = match decision {
            PermissionDecision::Grant => true,
            PermissionDecision::GrantSession => {
                self.auto_approve_session(&session_id);
                true
            }
            PermissionDecision::Deny => false,
        };
        self.publish_resolved(request_id, granted);
        granted
    }

    /// Answer a pending request. Returns false when the id is unknown
    /// (already answered, or the requester canceled).
    pub fn respond(&self, request_id: Uuid, decision: PermissionDecision) -> bool {
        match self.pending.lock().remove(&request_id) {
            Some(tx) => tx.send(decision).is_ok(),
            None => false,
        }
    }

    /// Silence future prompts for a session
    pub fn auto_approve_session(&self, session_id: &str) {
        self.approved_sessions
            .write()
            .insert(session_id.to_string());
    }

    pub fn is_session_approved(&self, session_id: &str) -> bool {
        self.approved_sessions.read().contains(session_id)
    }

    /// Pending request count (for status displays)
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    fn publish_resolved(&self, request_id: Uuid, granted: bool) {
        self.broker
            .publish(Event::Permission(PermissionEvent::Resolved {
                request_id,
                granted,
            }));
    }
}
