//! Observable holder for the current [`ConnectionState`].
//!
//! Single writer (the heartbeat engine), any number of readers.  Backed by a
//! `tokio::sync::watch` channel, so late subscribers always start from the
//! latest value and slow subscribers skip intermediate values instead of
//! queueing them.

use std::sync::Arc;

use buttonbox_core::ConnectionState;
use tokio::sync::watch;

/// Publishes the connection state and the latest response time.
///
/// Cloning is cheap and every clone sees the same values.
#[derive(Debug, Clone)]
pub struct ConnectionStatePublisher {
    state: Arc<watch::Sender<ConnectionState>>,
    latency: Arc<watch::Sender<Option<u64>>>,
}

impl Default for ConnectionStatePublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStatePublisher {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::NoConfig);
        let (latency, _) = watch::channel(None);
        Self {
            state: Arc::new(state),
            latency: Arc::new(latency),
        }
    }

    /// Returns the current state.
    pub fn current(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribes to state changes.
    ///
    /// The first `changed().await` on the returned receiver completes
    /// immediately with the current value, so a new subscriber never misses
    /// the state that was in effect when it subscribed.
    pub fn observe(&self) -> watch::Receiver<ConnectionState> {
        let mut receiver = self.state.subscribe();
        receiver.mark_changed();
        receiver
    }

    /// Average one-way latency of recent replies in milliseconds.
    pub fn latest_response_time_ms(&self) -> Option<u64> {
        *self.latency.borrow()
    }

    /// Subscribes to latency updates, starting with the current value.
    pub fn observe_latency(&self) -> watch::Receiver<Option<u64>> {
        let mut receiver = self.latency.subscribe();
        receiver.mark_changed();
        receiver
    }

    /// Stores new values, notifying subscribers only of actual changes.
    ///
    /// Returns `true` if the state changed.
    pub(crate) fn publish(&self, state: ConnectionState, latency_ms: Option<u64>) -> bool {
        self.latency.send_if_modified(|current| {
            let changed = *current != latency_ms;
            *current = latency_ms;
            changed
        });
        self.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        })
    }
}
