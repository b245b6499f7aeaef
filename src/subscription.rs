//! Subscription surface: the per-caller lazy event stream.
//!
//! The stream returned by [`subscribe`] is cold: nothing happens until the
//! caller polls it for the first time, and the registration performed on
//! that first poll is torn down exactly once, whether the stream is polled
//! to completion, dropped early, or never polled past that first step. An
//! `async_stream::stream!` body paired with an RAII guard gives this
//! cold-activation, single-teardown guarantee without a manual `Drop` impl
//! scattered across call sites.

use std::sync::Arc;

use async_stream::stream;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_stream::Stream;

use crate::auth::{AuthMode, ExtraHeaders, SessionTokenProvider};
use crate::error::{GraphQlError, ProviderError};
use crate::provider::RealtimeProvider;

use aws_credential_types::Credentials;

/// Per-subscription lifecycle state. No transitions out of `Failed` or
/// `Connected -> Pending`; a reconnect always creates a fresh `Pending`
/// entry under a new id rather than resurrecting this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Pending,
    Connected,
    Failed,
}

/// One message delivered to a subscription's observer.
#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    Data(Value),
    Error(Vec<GraphQlError>),
    Complete,
}

/// Caller-supplied configuration for one `subscribe` call.
pub struct SubscribeOptions {
    /// Validated by [`Self::validate`] as a required field, but otherwise
    /// inert: the socket a subscription actually runs over is always
    /// `RealtimeProvider`'s own endpoint (one provider owns exactly one
    /// AppSync endpoint for its whole lifetime), never this value.
    pub endpoint: String,
    pub query: String,
    pub variables: Value,
    pub auth_mode: AuthMode,
    pub api_key: Option<String>,
    pub auth_token: Option<String>,
    pub extra_headers: Option<ExtraHeaders>,
    pub iam_credentials: Option<Credentials>,
    pub session_provider: Option<Arc<dyn SessionTokenProvider>>,
}

impl SubscribeOptions {
    /// Validation performed before any network activity: missing endpoint
    /// or query fails immediately with a GraphQL-shaped error rather than
    /// reaching the handshake.
    pub fn validate(&self) -> Result<(), GraphQlError> {
        if self.endpoint.trim().is_empty() {
            return Err(GraphQlError::new("endpoint is required"));
        }
        if self.query.trim().is_empty() {
            return Err(GraphQlError::new("query is required"));
        }
        Ok(())
    }
}

/// Server-visible state for one logical subscription, owned by the
/// provider's subscription table.
pub struct SubscriptionEntry {
    pub id: String,
    pub query: String,
    pub variables: Value,
    pub auth_mode: AuthMode,
    pub api_key: Option<String>,
    pub auth_token: Option<String>,
    pub extra_headers: Option<ExtraHeaders>,
    pub iam_credentials: Option<Credentials>,
    pub session_provider: Option<Arc<dyn SessionTokenProvider>>,
    pub state: Mutex<SubscriptionState>,
    pub sender: mpsc::UnboundedSender<SubscriptionEvent>,
    pub ready: Mutex<Option<oneshot::Sender<()>>>,
    pub failed: Mutex<Option<oneshot::Sender<Vec<GraphQlError>>>>,
    pub starting: Mutex<bool>,
    /// The start-ack timeout task; canceled on entering `Connected` or
    /// `Failed`.
    pub start_ack_timer: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SubscriptionEntry {
    /// Aborts and clears the start-ack timer, if still armed.
    pub async fn clear_start_ack_timer(&self) {
        if let Some(handle) = self.start_ack_timer.lock().await.take() {
            handle.abort();
        }
    }
}

impl SubscriptionEntry {
    pub async fn set_state(&self, state: SubscriptionState) {
        *self.state.lock().await = state;
    }

    pub async fn current_state(&self) -> SubscriptionState {
        *self.state.lock().await
    }
}

/// Returns the cold event stream for one subscription. Registration with
/// `provider` happens the first time this stream is polled, not when this
/// function is called.
pub fn subscribe(
    provider: Arc<RealtimeProvider>,
    options: SubscribeOptions,
) -> impl Stream<Item = SubscriptionEvent> {
    stream! {
        if let Err(validation_error) = options.validate() {
            yield SubscriptionEvent::Error(vec![validation_error]);
            return;
        }

        if provider.is_closed() {
            yield SubscriptionEvent::Error(vec![GraphQlError::new(ProviderError::Closed.to_string())]);
            return;
        }

        let (id, mut receiver) = provider.register_subscription(options).await;
        // Dropped at the end of this generator body regardless of how we
        // leave it (normal completion, early `return`, or the caller
        // dropping the stream), guaranteeing exactly-once teardown.
        let _guard = SubscriptionGuard {
            provider: provider.clone(),
            id: id.clone(),
        };

        provider.start_subscription(&id).await;

        while let Some(event) = receiver.recv().await {
            let is_terminal = matches!(event, SubscriptionEvent::Error(_) | SubscriptionEvent::Complete);
            yield event;
            if is_terminal {
                break;
            }
        }
    }
}

struct SubscriptionGuard {
    provider: Arc<RealtimeProvider>,
    id: String,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let provider = self.provider.clone();
        let id = self.id.clone();
        tokio::spawn(async move {
            provider.teardown(&id).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_missing_endpoint() {
        let options = SubscribeOptions {
            endpoint: String::new(),
            query: "subscription { x }".into(),
            variables: Value::Null,
            auth_mode: AuthMode::None,
            api_key: None,
            auth_token: None,
            extra_headers: None,
            iam_credentials: None,
            session_provider: None,
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn validate_rejects_missing_query() {
        let options = SubscribeOptions {
            endpoint: "https://api.example.com/graphql".into(),
            query: String::new(),
            variables: Value::Null,
            auth_mode: AuthMode::None,
            api_key: None,
            auth_token: None,
            extra_headers: None,
            iam_credentials: None,
            session_provider: None,
        };
        assert!(options.validate().is_err());
    }

    #[tokio::test]
    async fn subscribe_after_close_errors_immediately() {
        use crate::config::RealtimeClientConfig;
        use futures::StreamExt;

        let provider = RealtimeProvider::new(
            RealtimeClientConfig::default(),
            "https://api.example.com/graphql",
            None,
        );
        provider.close().await;

        let stream = subscribe(
            provider,
            SubscribeOptions {
                endpoint: "https://api.example.com/graphql".into(),
                query: "subscription { x }".into(),
                variables: Value::Null,
                auth_mode: AuthMode::None,
                api_key: None,
                auth_token: Some("token".into()),
                extra_headers: None,
                iam_credentials: None,
                session_provider: None,
            },
        );
        tokio::pin!(stream);

        match stream.next().await.expect("stream ended without an event") {
            SubscriptionEvent::Error(errors) => {
                assert!(errors[0].message.contains("closed"));
            }
            other => panic!("expected an immediate Error event, got {other:?}"),
        }
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn validate_accepts_complete_options() {
        let options = SubscribeOptions {
            endpoint: "https://api.example.com/graphql".into(),
            query: "subscription { x }".into(),
            variables: Value::Null,
            auth_mode: AuthMode::None,
            api_key: None,
            auth_token: Some("token".into()),
            extra_headers: None,
            iam_credentials: None,
            session_provider: None,
        };
        assert!(options.validate().is_ok());
    }
}
