//! The socket orchestrator: owns the single WebSocket, the subscription
//! table, and the keep-alive timers.
//!
//! A struct owning a split sink/stream pair and a background reader task
//! that demultiplexes frames by id, with guard types for cleanup. State is
//! held behind a `tokio::sync::Mutex` per field and the whole provider is
//! shared via `Arc`, so mutation never depends on single-threaded
//! event-loop semantics.

pub mod dispatch;
pub mod handshake;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::{build_auth_headers, AuthHeaderRequest, ExtraHeadersContext};
use crate::config::RealtimeClientConfig;
use crate::connection_state::{ConnectionEvent, ConnectionState, ConnectionStateMonitor};
use crate::error::{GraphQlError, HandshakeError, SubscriptionError};
use crate::event_bus::{EventBus, ProviderEvent};
use crate::protocol::{ClientMessage, StartExtensions, StartPayload};
use crate::reconnection::ReconnectionMonitor;
use crate::retry::retry_handshake;
use crate::subscription::{SubscribeOptions, SubscriptionEntry, SubscriptionEvent, SubscriptionState};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type WsSink = SplitSink<WsStream, Message>;

/// Owned exclusively by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketStatus {
    Closed,
    Connecting,
    Ready,
}

/// Matches the name the AWS Amplify JS SDK's AppSync realtime provider
/// reports from `getProviderName()`.
const DEFAULT_PROVIDER_NAME: &str = "AWSAppSyncRealTimeProvider";

pub struct RealtimeProvider {
    config: RealtimeClientConfig,
    endpoint: String,
    region: Option<String>,
    connection_state: Arc<ConnectionStateMonitor>,
    reconnection: ReconnectionMonitor,
    event_bus: Arc<EventBus>,
    socket_status: Mutex<SocketStatus>,
    sink: Mutex<Option<WsSink>>,
    subscriptions: Mutex<HashMap<String, Arc<SubscriptionEntry>>>,
    waiters: Mutex<Vec<oneshot::Sender<Result<(), HandshakeError>>>>,
    keep_alive_hard: Mutex<Option<JoinHandle<()>>>,
    keep_alive_soft: Mutex<Option<JoinHandle<()>>>,
    /// Effective hard keep-alive deadline, overridden by the server's
    /// `connection_ack.payload.connectionTimeoutMs` once a handshake
    /// completes.
    keep_alive_hard_timeout: Mutex<std::time::Duration>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    intended_close: AtomicBool,
    closed: AtomicBool,
}

impl RealtimeProvider {
    /// One provider owns exactly one AppSync endpoint's socket: `endpoint`
    /// is the HTTPS GraphQL endpoint, not the derived realtime URL.
    pub fn new(config: RealtimeClientConfig, endpoint: impl Into<String>, region: Option<String>) -> Arc<Self> {
        let connection_state = Arc::new(ConnectionStateMonitor::new());
        let reconnection = ReconnectionMonitor::watch(connection_state.clone());
        let event_bus = Arc::new(EventBus::new());
        let default_keep_alive_hard_timeout = config.keep_alive_hard_timeout;

        let provider = Arc::new(Self {
            config,
            endpoint: endpoint.into(),
            region,
            connection_state,
            reconnection,
            event_bus,
            socket_status: Mutex::new(SocketStatus::Closed),
            sink: Mutex::new(None),
            subscriptions: Mutex::new(HashMap::new()),
            waiters: Mutex::new(Vec::new()),
            keep_alive_hard: Mutex::new(None),
            keep_alive_soft: Mutex::new(None),
            keep_alive_hard_timeout: Mutex::new(default_keep_alive_hard_timeout),
            reader_task: Mutex::new(None),
            intended_close: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        provider.forward_connection_state_to_event_bus();
        provider
    }

    fn forward_connection_state_to_event_bus(self: &Arc<Self>) {
        let connection_state = self.connection_state.clone();
        let event_bus = self.event_bus.clone();
        tokio::spawn(async move {
            use futures::StreamExt;
            let mut stream = connection_state.subscribe();
            while let Some(Ok(state)) = stream.next().await {
                event_bus.publish(ProviderEvent::ConnectionStateChange(state));
            }
        });
    }

    pub fn provider_name(&self) -> &'static str {
        DEFAULT_PROVIDER_NAME
    }

    /// Whether [`Self::close`] has already run. A `subscribe()` call arriving
    /// after `close()` gets an immediate [`crate::error::ProviderError::Closed`]
    /// instead of registering into a table `close()` already drained and
    /// racing a socket that will never come back.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state.current()
    }

    pub fn subscribe_connection_state(&self) -> tokio_stream::wrappers::BroadcastStream<ConnectionState> {
        self.connection_state.subscribe()
    }

    pub fn events(&self) -> tokio_stream::wrappers::BroadcastStream<ProviderEvent> {
        self.event_bus.subscribe()
    }

    /// Allocates a fresh id and inserts a `Pending` entry. Registration
    /// alone performs no network activity.
    pub async fn register_subscription(
        self: &Arc<Self>,
        options: SubscribeOptions,
    ) -> (String, mpsc::UnboundedReceiver<SubscriptionEvent>) {
        let id = Uuid::new_v4().to_string();
        let (sender, receiver) = mpsc::unbounded_channel();

        let entry = Arc::new(SubscriptionEntry {
            id: id.clone(),
            query: options.query,
            variables: options.variables,
            auth_mode: options.auth_mode,
            api_key: options.api_key,
            auth_token: options.auth_token,
            extra_headers: options.extra_headers,
            iam_credentials: options.iam_credentials,
            session_provider: options.session_provider,
            state: Mutex::new(SubscriptionState::Pending),
            sender,
            ready: Mutex::new(None),
            failed: Mutex::new(None),
            starting: Mutex::new(false),
            start_ack_timer: Mutex::new(None),
        });

        self.subscriptions.lock().await.insert(id.clone(), entry);

        // Register this subscription's restart action so the reconnection
        // monitor can re-run it on entering a disrupted state. A reconnect
        // always starts from a fresh `Pending` entry.
        let restart_provider = self.clone();
        let restart_id = id.clone();
        self.reconnection.register(
            id.clone(),
            Arc::new(move || {
                let provider = restart_provider.clone();
                let id = restart_id.clone();
                Box::pin(async move {
                    let entry = provider.subscriptions.lock().await.get(&id).cloned();
                    if let Some(entry) = entry {
                        entry.set_state(SubscriptionState::Pending).await;
                        provider.start_subscription(&id).await;
                    }
                })
            }),
        );

        (id, receiver)
    }

    /// Starts one subscription: guarded against overlapping starts for the
    /// same id, ensures the socket is READY, sends GQL_START, arms the
    /// start-ack timeout.
    pub async fn start_subscription(self: &Arc<Self>, id: &str) {
        let entry = {
            let table = self.subscriptions.lock().await;
            match table.get(id) {
                Some(entry) => entry.clone(),
                None => return,
            }
        };

        {
            let mut starting = entry.starting.lock().await;
            if *starting {
                return;
            }
            *starting = true;
        }

        self.do_start_subscription(id, &entry).await;

        // Always release the guard, regardless of which branch above
        // returned, so a later restart (reconnect, or a fresh
        // `start_subscription` call after a FAILED ack) is not blocked
        // forever by a start that already finished — the guard exists to
        // prevent *overlapping* starts, not future ones.
        *entry.starting.lock().await = false;
    }

    async fn do_start_subscription(self: &Arc<Self>, id: &str, entry: &Arc<SubscriptionEntry>) {
        let endpoint_host = match self.endpoint_host() {
            Ok(host) => host,
            Err(error) => {
                self.fail_entry(entry, vec![SubscriptionError::from(error).into()])
                    .await;
                return;
            }
        };

        if let Err(error) = self.ensure_ready(entry).await {
            self.fail_entry(entry, vec![SubscriptionError::from(error).into()])
                .await;
            return;
        }

        let payload_json = json!({ "query": entry.query, "variables": entry.variables }).to_string();

        let headers = match build_auth_headers(AuthHeaderRequest {
            mode: entry.auth_mode,
            endpoint_host: &endpoint_host,
            region: self.region.as_deref(),
            payload: &payload_json,
            canonical_uri: "/graphql",
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
        .await
        {
            Ok(headers) => headers,
            Err(error) => {
                self.fail_entry(entry, vec![SubscriptionError::from(error).into()])
                    .await;
                return;
            }
        };

        self.arm_start_ack_timeout(entry.clone()).await;

        self.send_frame(&ClientMessage::Start {
            id: id.to_string(),
            payload: StartPayload {
                data: payload_json,
                extensions: StartExtensions { authorization: headers },
            },
        })
        .await;
    }

    /// The HTTPS endpoint's hostname, used as the `host` header value for
    /// every auth mode. This is always the hostname of the HTTPS endpoint,
    /// not the derived WebSocket host.
    pub(crate) fn endpoint_host(&self) -> Result<String, HandshakeError> {
        let parsed = url::Url::parse(&self.endpoint)
            .map_err(|e| HandshakeError::InvalidEndpoint(self.endpoint.clone(), e.to_string()))?;
        parsed
            .host_str()
            .map(str::to_string)
            .ok_or_else(|| HandshakeError::InvalidEndpoint(self.endpoint.clone(), "missing host".into()))
    }

    async fn arm_start_ack_timeout(self: &Arc<Self>, entry: Arc<SubscriptionEntry>) {
        let provider = self.clone();
        let timeout = self.config.start_ack_timeout;
        let timer_entry = entry.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if entry.current_state().await == SubscriptionState::Pending {
                provider
                    .fail_entry(&entry, vec![SubscriptionError::StartAckTimeout.into()])
                    .await;
            }
        });
        *timer_entry.start_ack_timer.lock().await = Some(handle);
    }

    async fn fail_entry(&self, entry: &Arc<SubscriptionEntry>, errors: Vec<GraphQlError>) {
        entry.clear_start_ack_timer().await;
        entry.set_state(SubscriptionState::Failed).await;
        let _ = entry.sender.send(SubscriptionEvent::Error(errors.clone()));
        if let Some(failed) = entry.failed.lock().await.take() {
            let _ = failed.send(errors.clone());
        }
        entry.ready.lock().await.take();
        self.event_bus.publish(ProviderEvent::SubscriptionFailed {
            subscription_id: entry.id.clone(),
            errors,
        });
    }

    /// Resolves a `subscribe()` call's race against teardown: if the entry
    /// is still PENDING, installs a pair of one-shot channels that
    /// [`Self::fail_entry`] and the dispatcher's `start_ack` handling
    /// resolve, then waits on whichever fires first.
    async fn wait_for_terminal_or_connected(&self, entry: &Arc<SubscriptionEntry>) -> bool {
        match entry.current_state().await {
            SubscriptionState::Connected => return true,
            SubscriptionState::Failed => return false,
            SubscriptionState::Pending => {}
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let (failed_tx, failed_rx) = oneshot::channel();
        *entry.ready.lock().await = Some(ready_tx);
        *entry.failed.lock().await = Some(failed_tx);

        // Re-check: the entry may have reached a terminal state between the
        // first check above and the channels being installed.
        match entry.current_state().await {
            SubscriptionState::Connected => {
                entry.ready.lock().await.take();
                entry.failed.lock().await.take();
                true
            }
            SubscriptionState::Failed => {
                entry.ready.lock().await.take();
                entry.failed.lock().await.take();
                false
            }
            SubscriptionState::Pending => tokio::select! {
                res = ready_rx => res.is_ok(),
                res = failed_rx => { let _ = res; false }
            },
        }
    }

    /// Tears down one subscription: awaits the entry reaching a terminal
    /// state, sends GQL_STOP if it ever became CONNECTED, then always
    /// removes the entry.
    pub async fn teardown(self: &Arc<Self>, id: &str) {
        self.reconnection.unregister(id);

        let entry = {
            let mut table = self.subscriptions.lock().await;
            table.remove(id)
        };
        let Some(entry) = entry else { return };

        entry.clear_start_ack_timer().await;

        let reached_connected = self.wait_for_terminal_or_connected(&entry).await;

        if reached_connected {
            self.send_frame(&ClientMessage::Stop { id: id.to_string() }).await;
        }

        self.event_bus.publish(ProviderEvent::SubscriptionComplete {
            subscription_id: id.to_string(),
        });

        self.schedule_idle_close();
    }

    /// Schedules a deferred idle check. Any prior still-pending check is
    /// left to run too — each one re-reads the
    /// table size when it actually fires, rather than a value captured at
    /// schedule time, so a stale check can never incorrectly close a socket
    /// that gained new subscriptions in the meantime.
    fn schedule_idle_close(self: &Arc<Self>) {
        let provider = self.clone();
        let grace = self.config.idle_close_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            provider.close_if_idle().await;
        });
    }

    async fn close_if_idle(self: &Arc<Self>) {
        if !self.subscriptions.lock().await.is_empty() {
            return;
        }
        if matches!(*self.socket_status.lock().await, SocketStatus::Closed) {
            return;
        }
        self.close_socket(true).await;
    }

    pub(crate) async fn send_frame(&self, message: &ClientMessage) {
        let status = *self.socket_status.lock().await;
        if status != SocketStatus::Ready {
            debug!(?status, "dropping frame: socket not ready");
            return;
        }
        let mut guard = self.sink.lock().await;
        if let Some(sink) = guard.as_mut() {
            if let Err(error) = sink.send(Message::Text(message.to_json().into())).await {
                warn!(%error, "failed to send frame");
            }
        }
    }

    pub(crate) async fn close_socket(self: &Arc<Self>, intended: bool) {
        self.intended_close.store(intended, Ordering::SeqCst);
        if intended {
            self.connection_state.apply(ConnectionEvent::ClosingConnection);
        }

        if let Some(task) = self.keep_alive_hard.lock().await.take() {
            task.abort();
        }
        if let Some(task) = self.keep_alive_soft.lock().await.take() {
            task.abort();
        }
        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }

        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }

        *self.socket_status.lock().await = SocketStatus::Closed;
        self.connection_state.apply(ConnectionEvent::Closed);
    }

    /// Fatal socket error / unsolicited close. Unlike
    /// [`Self::close_socket`], this never aborts the reader task — it is
    /// always invoked *from* that task, either directly on an unexpected
    /// stream end or via the keep-alive hard-timeout callback — and does not
    /// mark the close as intended, so [`ConnectionEvent::ConnectionFailed`]
    /// rather than a clean `Closed` reaches the state monitor.
    pub(crate) async fn disconnect_unexpectedly(self: &Arc<Self>) {
        if self.intended_close.load(Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.keep_alive_hard.lock().await.take() {
            task.abort();
        }
        if let Some(task) = self.keep_alive_soft.lock().await.take() {
            task.abort();
        }
        self.reader_task.lock().await.take();
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }
        *self.socket_status.lock().await = SocketStatus::Closed;
        self.connection_state.apply(ConnectionEvent::ConnectionFailed);
    }

    /// Intentional shutdown: unsubscribes from the event bus (by dropping
    /// its sender side's only strong reference once this provider is
    /// dropped) and completes the reconnection monitor. Safe to call more
    /// than once.
    pub async fn close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.reconnection.complete_all();
        self.close_socket(true).await;

        let mut table = self.subscriptions.lock().await;
        for (_, entry) in table.drain() {
            entry.clear_start_ack_timer().await;
            let _ = entry.sender.send(SubscriptionEvent::Complete);
        }
    }
}
