//! Client-side realtime subscription provider for AWS AppSync's
//! `graphql-ws`-over-WebSocket protocol.
//!
//! A [`RealtimeProvider`] owns one socket per AppSync endpoint and
//! multiplexes every [`subscribe`] call over it, matching the relationship
//! between the AWS Amplify JS SDK's `AWSAppSyncRealTimeProvider` and the
//! subscriptions it serves. See [`RealtimeProvider::new`] to construct one
//! and [`subscribe`] to attach an individual GraphQL subscription to it.

pub mod auth;
pub mod config;
pub mod connection_state;
pub mod error;
pub mod event_bus;
pub mod logging;
pub mod protocol;
pub mod provider;
pub mod reconnection;
pub mod retry;
pub mod subscription;

pub use auth::{AuthMode, ExtraHeaders, ExtraHeadersContext, ExtraHeadersSupplier, SessionTokenProvider};
pub use config::RealtimeClientConfig;
pub use connection_state::{ConnectionEvent, ConnectionState};
pub use error::{AuthError, GraphQlError, HandshakeError, ProviderError, SubscriptionError};
pub use event_bus::ProviderEvent;
pub use provider::RealtimeProvider;
pub use subscription::{subscribe, SubscribeOptions, SubscriptionEvent, SubscriptionState};
