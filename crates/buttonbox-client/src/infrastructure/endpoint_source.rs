//! Where the heartbeat engine learns which companion to talk to.
//!
//! The settings screen (or the CLI, or a config file watcher) owns the
//! endpoint; the engine only observes it.  `None` means "not configured".

use buttonbox_core::Endpoint;
use tokio::sync::watch;

/// An observable, runtime-changeable endpoint.
pub trait EndpointConfigSource: Send + Sync {
    /// Subscribes to endpoint changes.  The receiver's current value is the
    /// endpoint in effect right now.
    fn observe(&self) -> watch::Receiver<Option<Endpoint>>;
}

/// In-memory endpoint source backed by a `watch` channel.
#[derive(Debug)]
pub struct WatchEndpointSource {
    sender: watch::Sender<Option<Endpoint>>,
}

impl WatchEndpointSource {
    pub fn new(initial: Option<Endpoint>) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    /// Replaces the endpoint wholesale and notifies observers.
    pub fn set(&self, endpoint: Option<Endpoint>) {
        self.sender.send_replace(endpoint);
    }

    pub fn current(&self) -> Option<Endpoint> {
        self.sender.borrow().clone()
    }
}

impl Default for WatchEndpointSource {
    fn default() -> Self {
        Self::new(None)
    }
}

impl EndpointConfigSource for WatchEndpointSource {
    fn observe(&self) -> watch::Receiver<Option<Endpoint>> {
        self.sender.subscribe()
    }
}
