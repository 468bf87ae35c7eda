//! Session and history facade
//!
//! Persistence itself is an external collaborator behind the
//! [`SessionStore`] / [`MessageStore`] traits (SQLite in the real
//! application). The facade serializes all mutations per session and keeps
//! token accounting; concurrent sessions are independent.

use crate::types::{Message, TokenUsage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// A conversation with its working directory and accumulated usage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: Option<String>,
    pub working_dir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub usage: TokenUsage,
}

impl Session {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: None,
            working_dir: working_dir.into(),
            created_at: Utc::now(),
            usage: TokenUsage::default(),
        }
    }
}

/// External session repository
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: Session) -> Result<(), SessionError>;
    async fn get(&self, id: &str) -> Result<Option<Session>, SessionError>;
    async fn update(&self, session: &Session) -> Result<(), SessionError>;
    async fn list(&self) -> Result<Vec<Session>, SessionError>;
    async fn delete(&self, id: &str) -> Result<(), SessionError>;
}

/// External message repository with file-version snapshots
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert or replace a message (streaming parts are appended by
    /// re-upserting the in-progress message)
    async fn upsert(&self, session_id: &str, message: &Message) -> Result<(), SessionError>;

    async fn list(&self, session_id: &str) -> Result<Vec<Message>, SessionError>;

    /// Replace the whole log (compaction)
    async fn replace_all(
        &self,
        session_id: &str,
        messages: &[Message],
    ) -> Result<(), SessionError>;

    /// Atomic snapshot keyed by (session, path, timestamp)
    async fn snapshot_file_version(
        &self,
        session_id: &str,
        path: &std::path::Path,
        content: &str,
    ) -> Result<(), SessionError>;
}

/// The facade the rest of the runtime talks to
pub struct SessionFacade {
    sessions: Arc<dyn SessionStore>,
    messages: Arc<dyn MessageStore>,
    /// One lock per session; all mutations for a session serialize on it
    locks: SyncMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionFacade {
    pub fn new(sessions: Arc<dyn SessionStore>, messages: Arc<dyn MessageStore>) -> Self {
        Self {
            sessions,
            messages,
            locks: SyncMutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn create_session(
        &self,
        working_dir: impl Into<PathBuf>,
    ) -> Result<Session, SessionError> {
        let session = Session::new(working_dir);
        self.sessions.create(session.clone()).await?;
        Ok(session)
    }

    pub async fn get_session(&self, id: &str) -> Result<Session, SessionError> {
        self.sessions
            .get(id)
            .await?
            .ok_or_else(|| SessionError::UnknownSession(id.to_string()))
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>, SessionError> {
        self.sessions.list().await
    }

    pub async fn delete_session(&self, id: &str) -> Result<(), SessionError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        self.sessions.delete(id).await
    }

    /// Persist an in-progress or complete message
    pub async fn append_message(
        &self,
        session_id: &str,
        message: &Message,
    ) -> Result<(), SessionError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        self.messages.upsert(session_id, message).await
    }

    /// Persist the terminal form of a message
    pub async fn finalize_message(
        &self,
        session_id: &str,
        message: &Message,
    ) -> Result<(), SessionError> {
        self.append_message(session_id, message).await
    }

    pub async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, SessionError> {
        self.messages.list(session_id).await
    }

    /// Swap the log for its compacted form
    pub async fn replace_messages(
        &self,
        session_id: &str,
        messages: &[Message],
    ) -> Result<(), SessionError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        self.messages.replace_all(session_id, messages).await
    }

    /// Add one turn's token usage to the session totals
    pub async fn record_usage(
        &self,
        session_id: &str,
        usage: &TokenUsage,
    ) -> Result<TokenUsage, SessionError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        let mut session = self.get_session(session_id).await?;
        session.usage.add(usage);
        self.sessions.update(&session).await?;
        Ok(session.usage)
    }

    pub async fn snapshot_file_version(
        &self,
        session_id: &str,
        path: &std::path::Path,
        content: &str,
    ) -> Result<(), SessionError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        self.messages
            .snapshot_file_version(session_id, path, content)
            .await
    }
}

// ============================================================================
// In-memory stores (tests, demos)
// ============================================================================

/// In-memory session store
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: SyncMutex<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: Session) -> Result<(), SessionError> {
        self.sessions.lock().insert(session.id.clone(), session);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Session>, SessionError> {
        Ok(self.sessions.lock().get(id).cloned())
    }

    async fn update(&self, session: &Session) -> Result<(), SessionError> {
        self.sessions
            .lock()
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Session>, SessionError> {
        Ok(self.sessions.lock().values().cloned().collect())
    }

    async fn delete(&self, id: &str) -> Result<(), SessionError> {
        self.sessions.lock().remove(id);
        Ok(())
    }
}

/// In-memory message store with file snapshots
#[derive(Default)]
pub struct MemoryMessageStore {
    messages: SyncMutex<HashMap<String, Vec<Message>>>,
    snapshots: SyncMutex<Vec<(String, PathBuf, DateTime<Utc>, String)>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.lock().len()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn upsert(&self, session_id: &str, message: &Message) -> Result<(), SessionError> {
        let mut map = self.messages.lock();
        let log = map.entry(session_id.to_string()).or_default();
        match log.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message.clone(),
            None => log.push(message.clone()),
        }
        Ok(())
    }

    async fn list(&self, session_id: &str) -> Result<Vec<Message>, SessionError> {
        Ok(self
            .messages
            .lock()
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_all(
        &self,
        session_id: &str,
        messages: &[Message],
    ) -> Result<(), SessionError> {
        self.messages
            .lock()
            .insert(session_id.to_string(), messages.to_vec());
        Ok(())
    }

    async fn snapshot_file_version(
        &self,
        session_id: &str,
        path: &std::path::Path,
        content: &str,
    ) -> Result<(), SessionError> {
        self.snapshots.lock().push((
            session_id.to_string(),
            path.to_path_buf(),
            Utc::now(),
            content.to_string(),
        ));
        Ok(())
    }
}

/// A facade over fresh in-memory stores
pub fn memory_facade() -> SessionFacade {
    SessionFacade::new(
        Arc::new(MemorySessionStore::new()),
        Arc::new(MemoryMessageStore::new()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    #[tokio::test]
    async fn test_create_and_get_session() {
        let facade = memory_facade();
        let session = facade.create_session("/work").await.unwrap();
        let loaded = facade.get_session(&session.id).await.unwrap();
        assert_eq!(loaded.working_dir, PathBuf::from("/work"));
    }

    #[tokio::test]
    async fn test_unknown_session_errors() {
        let facade = memory_facade();
        assert!(matches!(
            facade.get_session("missing").await,
            Err(SessionError::UnknownSession(_))
        ));
    }

    #[tokio::test]
    async fn test_upsert_replaces_in_progress_message() {
        let facade = memory_facade();
        let session = facade.create_session("/work").await.unwrap();

        let mut msg = Message::new(Role::Assistant);
        msg.append_text("partial");
        facade.append_message(&session.id, &msg).await.unwrap();

        msg.append_text(" complete");
        facade.finalize_message(&session.id, &msg).await.unwrap();

        let log = facade.list_messages(&session.id).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].text(), "partial complete");
    }

    #[tokio::test]
    async fn test_message_order_preserved() {
        let facade = memory_facade();
        let session = facade.create_session("/work").await.unwrap();
        for i in 0..5 {
            let msg = Message::user(format!("msg {}", i));
            facade.append_message(&session.id, &msg).await.unwrap();
        }
        let log = facade.list_messages(&session.id).await.unwrap();
        let texts: Vec<String> = log.iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["msg 0", "msg 1", "msg 2", "msg 3", "msg 4"]);
    }

    #[tokio::test]
    async fn test_usage_accumulates() {
        let facade = memory_facade();
        let session = facade.create_session("/work").await.unwrap();
        let usage = TokenUsage {
            input_tokens: 100,
            output_tokens: 20,
            ..Default::default()
        };
        facade.record_usage(&session.id, &usage).await.unwrap();
        let total = facade.record_usage(&session.id, &usage).await.unwrap();
        assert_eq!(total.input_tokens, 200);
        assert_eq!(total.output_tokens, 40);
    }

    #[tokio::test]
    async fn test_replace_messages_for_compaction() {
        let facade = memory_facade();
        let session = facade.create_session("/work").await.unwrap();
        for i in 0..10 {
            facade
                .append_message(&session.id, &Message::user(format!("{}", i)))
                .await
                .unwrap();
        }
        let compacted = vec![Message::user("summary of 0..8"), Message::user("9")];
        facade
            .replace_messages(&session.id, &compacted)
            .await
            .unwrap();
        assert_eq!(facade.list_messages(&session.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let facade = memory_facade();
        let a = facade.create_session("/a").await.unwrap();
        let b = facade.create_session("/b").await.unwrap();
        facade
            .append_message(&a.id, &Message::user("for a"))
            .await
            .unwrap();
        assert!(facade.list_messages(&b.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshots_recorded() {
        let store = Arc::new(MemoryMessageStore::new());
        let facade = SessionFacade::new(Arc::new(MemorySessionStore::new()), store.clone());
        let session = facade.create_session("/work").await.unwrap();
        facade
            .snapshot_file_version(&session.id, std::path::Path::new("/work/a.rs"), "fn a() {}")
            .await
            .unwrap();
        assert_eq!(store.snapshot_count(), 1);
    }
}
