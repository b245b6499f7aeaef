//! Lifecycle event bus.
//!
//! A thin `tokio::sync::broadcast` wrapper, mirroring `connection_state.rs`'s
//! single-channel design so every part of this crate that needs to fan out
//! an event to an unknown number of observers does it the same way.

use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::connection_state::ConnectionState;
use crate::error::GraphQlError;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle events a caller can observe independently of any one
/// subscription's data stream.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    ConnectionStateChange(ConnectionState),
    /// Mirrors the wire emission `{event: "SubscriptionAck", data:{query,
    /// variables}}`; `subscription_id` is carried alongside for callers
    /// that need to correlate it back to a specific `subscribe()` call.
    SubscriptionAck {
        subscription_id: String,
        query: String,
        variables: Value,
    },
    SubscriptionFailed { subscription_id: String, errors: Vec<GraphQlError> },
    SubscriptionComplete { subscription_id: String },
}

pub struct EventBus {
    sender: broadcast::Sender<ProviderEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> BroadcastStream<ProviderEvent> {
        BroadcastStream::new(self.sender.subscribe())
    }

    pub fn publish(&self, event: ProviderEvent) {
        let _ = self.sender.send(event);
    }
}
