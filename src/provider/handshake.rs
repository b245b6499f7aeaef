//! Connection establishment.
//!
//! Single-flight: a CLOSED provider takes the connecting role and performs
//! the sequence below, wrapped in [`retry_handshake`]'s jittered exponential
//! backoff; a CONNECTING provider enqueues a waiter; a READY provider
//! returns immediately. The handshake request is built manually (a
//! `http::Request` carrying `Sec-WebSocket-Protocol: graphql-ws`) since
//! `tokio_tungstenite`'s standard `connect_async(url)` helper can't attach
//! extra headers.

use std::sync::atomic::Ordering;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::auth::{build_auth_headers, AuthHeaderRequest, ExtraHeadersContext};
use crate::connection_state::ConnectionEvent;
use crate::error::HandshakeError;
use crate::protocol::url::{append_handshake_query, derive_realtime_url};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::retry::retry_handshake;
use crate::subscription::SubscriptionEntry;

use super::dispatch::run_dispatch_loop;
use super::{RealtimeProvider, SocketStatus};

const GRAPHQL_WS_SUBPROTOCOL: &str = "graphql-ws";

impl RealtimeProvider {
    /// Ensures `socket_status` is READY before the caller sends a
    /// frame, connecting (or joining an in-flight connect) as needed. The
    /// `entry` whose `subscribe()` call triggered this is the one whose
    /// auth configuration authenticates the handshake itself — the socket
    /// is shared afterward by every subscription regardless of their own
    /// per-start authorization.
    pub(crate) async fn ensure_ready(
        self: &std::sync::Arc<Self>,
        entry: &std::sync::Arc<SubscriptionEntry>,
    ) -> Result<(), HandshakeError> {
        {
            // Held across the read-and-set so two tasks racing out of
            // `Closed` can't both observe `Closed` and both take the
            // connecting role (§4.4 single-flight).
            let mut guard = self.socket_status.lock().await;
            match *guard {
                SocketStatus::Ready => return Ok(()),
                SocketStatus::Connecting => {
                    drop(guard);
                    let (tx, rx) = oneshot::channel();
                    self.waiters.lock().await.push(tx);
                    return rx.await.unwrap_or(Err(HandshakeError::ClosedBeforeOpen));
                }
                SocketStatus::Closed => {
                    *guard = SocketStatus::Connecting;
                }
            }
        }

        self.intended_close.store(false, Ordering::SeqCst);
        self.connection_state.apply(ConnectionEvent::OpeningConnection);

        let config = self.config.clone();
        let entry = entry.clone();
        let provider = self.clone();
        let result = retry_handshake(&config, move || {
            let provider = provider.clone();
            let entry = entry.clone();
            async move { provider.connect_once(&entry).await }
        })
        .await;

        match &result {
            Ok(()) => {
                *self.socket_status.lock().await = SocketStatus::Ready;
            }
            Err(_) => {
                *self.socket_status.lock().await = SocketStatus::Closed;
            }
        }

        let waiters: Vec<_> = self.waiters.lock().await.drain(..).collect();
        for waiter in waiters {
            let _ = waiter.send(match &result {
                Ok(()) => Ok(()),
                Err(error) => Err(error.clone()),
            });
        }

        result
    }

    /// One handshake attempt. Returns once `connection_ack`
    /// has been received, the socket is wired up for `run_dispatch_loop`,
    /// and the keep-alive timers are armed.
    async fn connect_once(self: &std::sync::Arc<Self>, entry: &std::sync::Arc<SubscriptionEntry>) -> Result<(), HandshakeError> {
        let endpoint_host = self.endpoint_host()?;

        let headers = build_auth_headers(AuthHeaderRequest {
            mode: entry.auth_mode,
            endpoint_host: &endpoint_host,
            region: self.region.as_deref(),
            payload: "{}",
            canonical_uri: "/connect",
            api_key: entry.api_key.as_deref(),
            auth_token: entry.auth_token.as_deref(),
            iam_credentials: entry.iam_credentials.as_ref(),
            session_provider: entry.session_provider.as_deref(),
            extra_headers: entry.extra_headers.as_ref(),
            extra_headers_ctx: ExtraHeadersContext {
                url: self.endpoint.clone(),
                query_string: String::new(),
            },
        })
        .await?;

        // A caller-supplied `ws://`/`wss://` endpoint is used verbatim
        // instead of being derived from an `https://` AppSync endpoint —
        // the escape hatch a local mock server (or a non-AppSync
        // `graphql-ws` backend speaking the same wire protocol) needs,
        // without disturbing `derive_realtime_url`'s AppSync-specific
        // host-rewrite rules for the normal case.
        let realtime_url = if self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://") {
            url::Url::parse(&self.endpoint)
                .map_err(|e| HandshakeError::InvalidEndpoint(self.endpoint.clone(), e.to_string()))?
        } else {
            derive_realtime_url(&self.endpoint)?
        };
        let realtime_url = append_handshake_query(realtime_url, &headers)?;

        debug!(url = %realtime_url, "connecting AppSync realtime websocket");

        let mut request = realtime_url
            .as_str()
            .into_client_request()
            .map_err(|e| HandshakeError::ConnectFailure(e.to_string()))?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            GRAPHQL_WS_SUBPROTOCOL
                .parse()
                .expect("static subprotocol name is a valid header value"),
        );
        request.headers_mut().insert(
            "Sec-WebSocket-Key",
            generate_key()
                .parse()
                .expect("generate_key() always produces a valid header value"),
        );

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| HandshakeError::ConnectFailure(e.to_string()))?;

        let (mut sink, mut stream) = ws_stream.split();

        sink.send(Message::Text(ClientMessage::ConnectionInit.to_json().into()))
            .await
            .map_err(|e| HandshakeError::ConnectFailure(e.to_string()))?;

        let connection_timeout_ms = tokio::time::timeout(self.config.connection_ack_timeout, async {
            loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => match ServerMessage::from_text(&text) {
                        Ok(ServerMessage::ConnectionAck { payload }) => {
                            return Ok(payload.connection_timeout_ms);
                        }
                        Ok(ServerMessage::ConnectionError { payload }) => {
                            let detail = payload.errors.into_iter().next();
                            return Err(HandshakeError::ConnectionError {
                                error_type: detail
                                    .as_ref()
                                    .and_then(|d| d.error_type.clone())
                                    .unwrap_or_default(),
                                error_code: detail.and_then(|d| d.error_code),
                            });
                        }
                        // Anything else (e.g. a stray `ka`) arriving before
                        // the ack is ignored rather than treated as fatal.
                        Ok(_) => continue,
                        Err(error) => {
                            return Err(HandshakeError::ConnectFailure(error.to_string()));
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(HandshakeError::ClosedBeforeOpen);
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(error)) => {
                        return Err(HandshakeError::ConnectFailure(error.to_string()));
                    }
                }
            }
        })
        .await
        .map_err(|_| HandshakeError::AckTimeout)??;

        let hard_timeout = connection_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.keep_alive_hard_timeout);
        *self.keep_alive_hard_timeout.lock().await = hard_timeout;

        *self.sink.lock().await = Some(sink);
        let reader_provider = self.clone();
        let reader_task = tokio::spawn(async move {
            run_dispatch_loop(reader_provider, stream).await;
        });
        *self.reader_task.lock().await = Some(reader_task);

        self.arm_keep_alive_timers(hard_timeout, self.effective_soft_timeout(hard_timeout))
            .await;

        self.connection_state.apply(ConnectionEvent::ConnectionEstablished);

        Ok(())
    }

    /// Clamps the configured soft keep-alive alert to strictly less than the
    /// (possibly server-overridden) hard deadline.
    pub(crate) fn effective_soft_timeout(&self, hard_timeout: Duration) -> Duration {
        self.config.keep_alive_soft_timeout.min(
            hard_timeout
                .checked_sub(Duration::from_secs(1))
                .unwrap_or(hard_timeout),
        )
    }

    pub(crate) async fn arm_keep_alive_timers(self: &std::sync::Arc<Self>, hard_timeout: Duration, soft_timeout: Duration) {
        if let Some(task) = self.keep_alive_hard.lock().await.take() {
            task.abort();
        }
        if let Some(task) = self.keep_alive_soft.lock().await.take() {
            task.abort();
        }

        let hard_provider = self.clone();
        let hard_task = tokio::spawn(async move {
            tokio::time::sleep(hard_timeout).await;
            warn!("keep-alive hard timeout elapsed, closing socket");
            hard_provider.disconnect_unexpectedly().await;
        });
        *self.keep_alive_hard.lock().await = Some(hard_task);

        let soft_provider = self.clone();
        let soft_task = tokio::spawn(async move {
            tokio::time::sleep(soft_timeout).await;
            soft_provider.connection_state.apply(ConnectionEvent::KeepAliveMissed);
        });
        *self.keep_alive_soft.lock().await = Some(soft_task);
    }
}
