//! Reconnection controller.
//!
//! Observes the published `ConnectionState` sequence and drives a
//! start/halt signal a socket-owning task can poll, rather than owning the
//! socket itself, keeping this module ignorant of the transport. It also
//! keeps a list of observers, one per live subscription, registered by
//! `RealtimeProvider` and invoked on entering a disrupted state so each
//! subscription re-runs its restart action.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::task::JoinHandle;

use crate::connection_state::{ConnectionState, ConnectionStateMonitor};

fn is_disrupted(state: ConnectionState) -> bool {
    matches!(
        state,
        ConnectionState::ConnectionDisrupted | ConnectionState::ConnectionDisruptedPendingNetwork
    )
}

/// A subscription's restart action, re-invoked on entering a disrupted state.
pub type RestartAction = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Tracks whether a reconnection attempt should currently be running.
/// `ReconnectionMonitor::watch` flips this on entering a disrupted state and
/// off on entering any other state.
#[derive(Clone)]
pub struct ReconnectSignal {
    should_reconnect: Arc<AtomicBool>,
}

impl ReconnectSignal {
    fn new() -> Self {
        Self {
            should_reconnect: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.should_reconnect.load(Ordering::SeqCst)
    }
}

type ObserverMap = Arc<Mutex<HashMap<String, RestartAction>>>;

pub struct ReconnectionMonitor {
    signal: ReconnectSignal,
    observers: ObserverMap,
    task: JoinHandle<()>,
}

impl ReconnectionMonitor {
    /// Spawns a task that watches `connection_state`'s published sequence,
    /// flips the returned signal accordingly, and on *entering* a disrupted
    /// state invokes every currently-registered restart action once.
    /// Re-entering a disrupted variant from another disrupted variant (an
    /// offline/online flap) is not itself a new entry edge.
    pub fn watch(connection_state: Arc<ConnectionStateMonitor>) -> Self {
        let signal = ReconnectSignal::new();
        let observers: ObserverMap = Arc::new(Mutex::new(HashMap::new()));
        let signal_clone = signal.clone();
        let observers_clone = observers.clone();
        let task = tokio::spawn(async move {
            let mut stream = connection_state.subscribe();
            let mut was_disrupted = false;
            while let Some(Ok(state)) = stream.next().await {
                let disrupted = is_disrupted(state);
                signal_clone.should_reconnect.store(disrupted, Ordering::SeqCst);
                if disrupted && !was_disrupted {
                    let actions: Vec<RestartAction> = observers_clone
                        .lock()
                        .expect("reconnection observer mutex poisoned")
                        .values()
                        .cloned()
                        .collect();
                    for action in actions {
                        tokio::spawn(action());
                    }
                }
                was_disrupted = disrupted;
            }
        });
        Self { signal, observers, task }
    }

    pub fn signal(&self) -> ReconnectSignal {
        self.signal.clone()
    }

    /// Registers a subscription's restart action, keyed by subscription id.
    pub fn register(&self, id: impl Into<String>, action: RestartAction) {
        self.observers
            .lock()
            .expect("reconnection observer mutex poisoned")
            .insert(id.into(), action);
    }

    /// Removes a subscription's restart action, e.g. on teardown.
    pub fn unregister(&self, id: &str) {
        self.observers
            .lock()
            .expect("reconnection observer mutex poisoned")
            .remove(id);
    }

    /// Irrevocable close: drops every registered observer so a provider
    /// `close()` cannot trigger further restarts.
    pub fn complete_all(&self) {
        self.observers
            .lock()
            .expect("reconnection observer mutex poisoned")
            .clear();
    }
}

impl Drop for ReconnectionMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}
