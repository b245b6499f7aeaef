//! Deterministic connection-state machine.
//!
//! Encoded as an explicit finite-state machine with tabulated transitions
//! rather than ad-hoc flag combinations, and published through a single
//! broadcast channel so every observer sees the same total order of
//! transitions.

use std::sync::Mutex;

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Published connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ConnectedPendingKeepAlive,
    ConnectedPendingNetwork,
    ConnectedPendingDisconnect,
    ConnectionDisrupted,
    ConnectionDisruptedPendingNetwork,
}

/// Input alphabet driving the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    OpeningConnection,
    ConnectionEstablished,
    ClosingConnection,
    Closed,
    ConnectionFailed,
    KeepAlive,
    KeepAliveMissed,
    Online,
    Offline,
}

/// Pure, total transition function. Event/state pairs that have no named
/// transition leave the state unchanged rather than erroring, so the
/// published sequence is always a valid path through the machine.
fn next_state(current: ConnectionState, event: ConnectionEvent) -> ConnectionState {
    use ConnectionEvent::*;
    use ConnectionState::*;

    match (current, event) {
        (Disconnected, OpeningConnection) => Connecting,
        (Connecting, ConnectionEstablished) => Connected,

        (Connected, KeepAliveMissed) => ConnectedPendingKeepAlive,
        (ConnectedPendingKeepAlive, KeepAlive) => Connected,

        // (any connected variant) + CLOSED while network online -> ConnectionDisrupted.
        (Connected, Closed) | (ConnectedPendingKeepAlive, Closed) => ConnectionDisrupted,
        // Socket closed while already offline-pending: land directly in the
        // offline-aware disrupted variant instead of bouncing through the
        // online one first.
        (ConnectedPendingNetwork, Closed) => ConnectionDisruptedPendingNetwork,

        (ConnectionDisrupted, Offline) => ConnectionDisruptedPendingNetwork,
        (ConnectionDisruptedPendingNetwork, Online) => ConnectionDisrupted,

        // (any connected variant) + OFFLINE -> ConnectedPendingNetwork.
        (Connected, Offline) | (ConnectedPendingKeepAlive, Offline) => ConnectedPendingNetwork,
        (ConnectedPendingNetwork, Online) => Connected,

        // CLOSING_CONNECTION from any connected variant -> ConnectedPendingDisconnect -> CLOSED -> Disconnected.
        (Connected, ClosingConnection)
        | (ConnectedPendingKeepAlive, ClosingConnection)
        | (ConnectedPendingNetwork, ClosingConnection) => ConnectedPendingDisconnect,
        (ConnectedPendingDisconnect, Closed) => Disconnected,

        // A fatal socket error from any connected-ish state is a disruption,
        // same as an unsolicited CLOSED.
        (Connected, ConnectionFailed)
        | (ConnectedPendingKeepAlive, ConnectionFailed)
        | (ConnectedPendingNetwork, ConnectionFailed) => ConnectionDisrupted,

        (state, _unmodeled_event) => state,
    }
}

/// Channel capacity for the published `ConnectionState` broadcast. Sized
/// generously above any realistic burst of transitions between the moment
/// a consumer subscribes and the moment it starts polling.
const STATE_CHANNEL_CAPACITY: usize = 32;

pub struct ConnectionStateMonitor {
    state: Mutex<ConnectionState>,
    sender: broadcast::Sender<ConnectionState>,
}

impl Default for ConnectionStateMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateMonitor {
    pub fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            sender,
        }
    }

    pub fn current(&self) -> ConnectionState {
        *self.state.lock().expect("connection state mutex poisoned")
    }

    /// Subscribes to the published state sequence. Two observers subscribed
    /// at the same logical instant see the identical subsequent sequence —
    /// guaranteed here because every mutation goes through the single
    /// `apply` call path below, serialized by `state`'s mutex.
    pub fn subscribe(&self) -> BroadcastStream<ConnectionState> {
        BroadcastStream::new(self.sender.subscribe())
    }

    /// Applies one event, publishing the new state only if it actually
    /// changed (duplicate transitions are suppressed).
    pub fn apply(&self, event: ConnectionEvent) -> ConnectionState {
        let mut guard = self.state.lock().expect("connection state mutex poisoned");
        let next = next_state(*guard, event);
        if next != *guard {
            *guard = next;
            // No receivers is a normal, non-error condition (e.g. nobody
            // has called `subscribe()` yet).
            let _ = self.sender.send(next);
        }
        next
    }
}
