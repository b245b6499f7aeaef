//! Inbound frame demultiplexer: one task per live socket, reading
//! `ServerMessage`s and routing each to the subscription entry its `id`
//! names over a loop on a `SplitStream`, matched by message kind and fed by
//! a table lookup on the correlation id.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

use crate::connection_state::ConnectionEvent;
use crate::error::GraphQlError;
use crate::event_bus::ProviderEvent;
use crate::protocol::ServerMessage;
use crate::subscription::{SubscriptionEvent, SubscriptionState};

use super::{RealtimeProvider, WsStream};

/// Runs until the socket closes, errors, or the provider replaces it with a
/// fresh reader from a later handshake. Never aborts itself on a transport
/// error — it hands that off to [`RealtimeProvider::disconnect_unexpectedly`]
/// and returns, the same way a real socket's `onclose`/`onerror` callback
/// would stop firing once the socket is gone.
pub(crate) async fn run_dispatch_loop(provider: Arc<RealtimeProvider>, mut stream: futures_util::stream::SplitStream<WsStream>) {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => dispatch_text(&provider, &text).await,
            Some(Ok(Message::Close(frame))) => {
                debug!(?frame, "realtime socket closed by peer");
                provider.disconnect_unexpectedly().await;
                return;
            }
            Some(Ok(_)) => continue,
            Some(Err(error)) => {
                warn!(%error, "realtime socket read error");
                provider.disconnect_unexpectedly().await;
                return;
            }
            None => {
                provider.disconnect_unexpectedly().await;
                return;
            }
        }
    }
}

async fn dispatch_text(provider: &Arc<RealtimeProvider>, text: &str) {
    let message = match ServerMessage::from_text(text) {
        Ok(message) => message,
        Err(error) => {
            warn!(%error, raw = %text, "could not parse realtime server frame");
            return;
        }
    };

    match message {
        // The handshake task already consumed the first `connection_ack`;
        // a later one (a server sending a stray duplicate) is ignored.
        ServerMessage::ConnectionAck { .. } => {}
        ServerMessage::ConnectionError { payload } => {
            warn!(?payload, "connection_error received outside handshake");
        }
        ServerMessage::KeepAlive => on_keep_alive(provider).await,
        ServerMessage::StartAck { id } => on_start_ack(provider, id).await,
        ServerMessage::Data { id, payload } => on_data(provider, id, payload).await,
        ServerMessage::Error { id, payload } => on_error(provider, id, payload.into_vec()).await,
        ServerMessage::Complete { id } => on_complete(provider, id).await,
    }
}

/// Resets both keep-alive timers and reports recovery to the connection
/// state monitor.
async fn on_keep_alive(provider: &Arc<RealtimeProvider>) {
    let hard_timeout = *provider.keep_alive_hard_timeout.lock().await;
    let soft_timeout = provider.effective_soft_timeout(hard_timeout);
    provider.arm_keep_alive_timers(hard_timeout, soft_timeout).await;
    provider.connection_state.apply(ConnectionEvent::KeepAlive);
}

async fn on_start_ack(provider: &Arc<RealtimeProvider>, id: String) {
    let entry = provider.subscriptions.lock().await.get(&id).cloned();
    let Some(entry) = entry else {
        trace!(%id, "start_ack for unknown subscription");
        return;
    };

    entry.clear_start_ack_timer().await;
    entry.set_state(SubscriptionState::Connected).await;
    if let Some(ready) = entry.ready.lock().await.take() {
        let _ = ready.send(());
    }
    entry.failed.lock().await.take();

    provider.event_bus.publish(ProviderEvent::SubscriptionAck {
        subscription_id: entry.id.clone(),
        query: entry.query.clone(),
        variables: entry.variables.clone(),
    });
}

async fn on_data(provider: &Arc<RealtimeProvider>, id: String, payload: serde_json::Value) {
    let entry = provider.subscriptions.lock().await.get(&id).cloned();
    let Some(entry) = entry else {
        trace!(%id, "data frame for unknown subscription");
        return;
    };
    let _ = entry.sender.send(SubscriptionEvent::Data(payload));
}

async fn on_error(provider: &Arc<RealtimeProvider>, id: Option<String>, errors: Vec<GraphQlError>) {
    let Some(id) = id else {
        warn!(?errors, "connection-scoped error frame outside handshake");
        return;
    };
    let entry = provider.subscriptions.lock().await.get(&id).cloned();
    let Some(entry) = entry else {
        trace!(%id, "error frame for unknown subscription");
        return;
    };
    provider.fail_entry(&entry, errors).await;
}

/// The server ending a subscription on its own terms. Forwarded to the
/// observer as a normal completion; the entry itself is only ever removed
/// by [`RealtimeProvider::teardown`], driven by the caller dropping or
/// exhausting its stream.
async fn on_complete(provider: &Arc<RealtimeProvider>, id: String) {
    let entry = provider.subscriptions.lock().await.get(&id).cloned();
    let Some(entry) = entry else {
        trace!(%id, "complete frame for unknown subscription");
        return;
    };
    entry.clear_start_ack_timer().await;
    let _ = entry.sender.send(SubscriptionEvent::Complete);
}
