//! Typed pub/sub broker
//!
//! Four topics: `content` (streaming text for UIs, lossy under backpressure,
//! oldest events dropped first), and `tool` / `mcp` / `permission`
//! (lossless, per-subscriber FIFO queues). Subscriptions are tied to a
//! [`RunContext`]; when the context cancels, the subscription is garbage
//! collected on the next publish.

use crate::cancel::RunContext;
use crate::config::ModelType;
use crate::permission::PermissionRequest;
use crate::types::{FinishReason, TokenUsage};
use parking_lot::Mutex;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const CONTENT_BUFFER: usize = 256;

/// Broker topics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Content,
    Tool,
    Mcp,
    Permission,
}

/// Everything published on the bus
#[derive(Debug, Clone)]
pub enum Event {
    Content(ContentEvent),
    Tool(ToolEvent),
    Mcp(McpEvent),
    Permission(PermissionEvent),
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::Content(_) => Topic::Content,
            Event::Tool(_) => Topic::Tool,
            Event::Mcp(_) => Topic::Mcp,
            Event::Permission(_) => Topic::Permission,
        }
    }
}

/// Streaming content lifecycle for one assistant message
#[derive(Debug, Clone)]
pub enum ContentEvent {
    TextDelta {
        session_id: String,
        message_id: Uuid,
        delta: String,
    },
    ThinkingDelta {
        session_id: String,
        message_id: Uuid,
        delta: String,
    },
    Finished {
        session_id: String,
        message_id: Uuid,
        reason: FinishReason,
    },
    UsageUpdated {
        session_id: String,
        usage: TokenUsage,
    },
    ModelSwitched {
        model_type: ModelType,
        provider_id: String,
        model_id: String,
    },
}

/// Tool invocation lifecycle
#[derive(Debug, Clone)]
pub enum ToolEvent {
    Started {
        session_id: String,
        call_id: String,
        name: String,
        input: Value,
    },
    Completed {
        session_id: String,
        call_id: String,
        name: String,
        content: String,
        is_error: bool,
        duration: Duration,
    },
}

/// MCP supervisor state changes
#[derive(Debug, Clone)]
pub enum McpEvent {
    StateChanged {
        name: String,
        state: crate::mcp::McpState,
        tool_count: usize,
        prompt_count: usize,
    },
    ToolsListChanged {
        name: String,
    },
    PromptsListChanged {
        name: String,
    },
}

/// Permission prompt lifecycle
#[derive(Debug, Clone)]
pub enum PermissionEvent {
    Requested(PermissionRequest),
    Resolved { request_id: Uuid, granted: bool },
}

// ============================================================================
// Broker
// ============================================================================

struct LosslessSub {
    topic: Topic,
    tx: mpsc::UnboundedSender<Event>,
    token: CancellationToken,
}

/// The process-wide event broker
pub struct Broker {
    content: broadcast::Sender<Event>,
    lossless: Mutex<Vec<LosslessSub>>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker {
    pub fn new() -> Self {
        let (content, _) = broadcast::channel(CONTENT_BUFFER);
        Self {
            content,
            lossless: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to a topic for the lifetime of `ctx`
    pub fn subscribe(&self, topic: Topic, ctx: &RunContext) -> Subscription {
        let token = ctx.cancellation_token().child_token();
        let inner = match topic {
            Topic::Content => SubscriptionInner::Lossy(self.content.subscribe()),
            _ => {
                let (tx, rx) = mpsc::unbounded_channel();
                self.lossless.lock().push(LosslessSub {
                    topic,
                    tx,
                    token: token.clone(),
                });
                SubscriptionInner::Lossless(rx)
            }
        };
        Subscription { inner, token }
    }

    /// Publish an event to every live subscriber of its topic
    pub fn publish(&self, event: Event) {
        match event.topic() {
            Topic::Content => {
                // No receivers is fine; content is best-effort.
                let _ = self.content.send(event);
            }
            topic => {
                let mut subs = self.lossless.lock();
                subs.retain(|sub| {
                    if sub.token.is_cancelled() {
                        return false;
                    }
                    if sub.topic != topic {
                        return true;
                    }
                    sub.tx.send(event.clone()).is_ok()
                });
            }
        }
    }

    /// Live lossless subscriber count (drops are GCed on publish)
    pub fn lossless_subscriber_count(&self) -> usize {
        self.lossless.lock().len()
    }
}

enum SubscriptionInner {
    Lossy(broadcast::Receiver<Event>),
    Lossless(mpsc::UnboundedReceiver<Event>),
}

/// A live subscription; `next().await` yields events in publish order
pub struct Subscription {
    inner: SubscriptionInner,
    token: CancellationToken,
}

impl Subscription {
    /// The next event, or `None` once the subscription context cancels or
    /// the broker is dropped
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            match &mut self.inner {
                SubscriptionInner::Lossy(rx) => {
                    tokio::select! {
                        _ = self.token.cancelled() => return None,
                        result = rx.recv() => match result {
                            Ok(event) => return Some(event),
                            // Lagged: older events were overwritten; keep
                            // reading from the oldest retained event.
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => return None,
                        },
                    }
                }
                SubscriptionInner::Lossless(rx) => {
                    tokio::select! {
                        _ = self.token.cancelled() => return None,
                        event = rx.recv() => return event,
                    }
                }
            }
        }
    }

    /// Non-blocking poll used by synchronous test helpers
    pub fn try_next(&mut self) -> Option<Event> {
        match &mut self.inner {
            SubscriptionInner::Lossy(rx) => loop {
                match rx.try_recv() {
                    Ok(event) => return Some(event),
                    Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                    Err(_) => return None,
                }
            },
            SubscriptionInner::Lossless(rx) => rx.try_recv().ok(),
        }
    }
}
