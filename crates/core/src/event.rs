//! Domain event system: decoupled status notifications.
//!
//! The orchestrator publishes events when something user-visible happens
//! (a retry, a provider switch, a tool dispatch, an abort). Hosts subscribe
//! and render them; nothing in the loop waits on a subscriber.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A new round is about to call the provider
    RoundStarted {
        request_id: u64,
        round: u32,
        timestamp: DateTime<Utc>,
    },

    /// A provider returned a separate reasoning trace
    ReasoningTrace {
        request_id: u64,
        provider: String,
        content: String,
    },

    /// A transient provider failure will be retried after a delay
    RetryScheduled {
        provider: String,
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
        reason: String,
    },

    /// The current provider is exhausted; failing over to the next in chain
    ProviderSwitched {
        from: String,
        to: String,
        reason: String,
    },

    /// A tool call is being dispatched
    ToolDispatched { request_id: u64, tool_name: String },

    /// A tool was executed
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A remote tool server went away; its tools are no longer callable
    ToolServerDisconnected { server: String },

    /// A request reached a terminal state
    ConversationFinished {
        request_id: u64,
        state: String,
        rounds: u32,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Components can subscribe to receive all events and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
