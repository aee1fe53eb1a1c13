//! Domain event system — structured record of what the readiness loop did.
//!
//! Events are published alongside `tracing` logs. Subscribers (the CLI, tests,
//! a metrics exporter) react without coupling to the loop itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// The scanner found a wake word and the user became pending
    WakeWordDetected {
        user_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A pending user crossed a readiness timer
    QueryReady {
        user_id: String,
        forced: bool,
        lookback_secs: u64,
        timestamp: DateTime<Utc>,
    },

    /// The transcript window held no recognisable query
    ExtractionMissed {
        user_id: String,
        timestamp: DateTime<Utc>,
    },

    /// An insight (real or fallback) was written for a query
    InsightPersisted {
        user_id: String,
        query: String,
        fallback: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A tick or dispatch failed and was absorbed by its error boundary
    TickFailed {
        kind: String,
        context: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
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
