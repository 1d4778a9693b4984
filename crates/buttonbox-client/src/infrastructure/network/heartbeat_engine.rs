//! HeartbeatEngine: the UDP socket, its receive loop and the heartbeat timers.
//!
//! One *session* exists per valid endpoint.  A session consists of:
//!
//! - a UDP socket bound to an ephemeral local port,
//! - a receive loop that decodes datagrams and feeds pongs and acks to the
//!   [`HeartbeatMonitor`],
//! - a heartbeat timer that sends a ping immediately and then every
//!   `health_check_interval`,
//! - a sweep timer that runs every `ping_timeout / 2` and reaps expired pings
//!   (and retransmits unacknowledged commands in ack mode).
//!
//! # Teardown order
//!
//! Sessions are torn down before a new one is built, so no ping for the new
//! endpoint can leave while the old socket still exists:
//!
//! 1. the live link is unpublished, so commands fail fast with `NotConnected`;
//! 2. the shutdown signal stops both timers and the receive loop;
//! 3. the timers and then the receive loop are awaited;
//! 4. the socket is dropped with the last task holding it;
//! 5. the caller resets the monitor.
//!
//! Build and teardown are serialized by an async session lock; heartbeat
//! state is serialized by the monitor lock, which is never held across an
//! `.await`.
//!
//! Session tasks and the endpoint observer only hold a weak reference to the
//! engine.  Once the last handle is gone they stop on their own.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use buttonbox_core::{decode_packet, encode_packet, ConnectionState, Endpoint, Packet, PacketBody};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::command_channel::CommandChannel;
use super::EngineError;
use crate::application::heartbeat_monitor::{HeartbeatMonitor, HeartbeatSettings};
use crate::application::state_publisher::ConnectionStatePublisher;
use crate::infrastructure::endpoint_source::EndpointConfigSource;

/// Point-in-time view of the engine, for logs and status displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSnapshot {
    pub state: ConnectionState,
    pub endpoint: Option<Endpoint>,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub pending_pings: usize,
    pub pending_commands: usize,
    pub latest_response_time_ms: Option<u64>,
}

/// The socket and resolved target of the current session.
#[derive(Debug, Clone)]
pub(crate) struct LiveLink {
    pub(crate) socket: Arc<UdpSocket>,
    pub(crate) target: SocketAddr,
}

/// Where a session's pings are written.  The session socket unless the
/// engine was built with another sink.
#[async_trait]
pub(crate) trait PingSink: Send + Sync {
    async fn send_datagram(&self, datagram: &[u8], target: SocketAddr) -> io::Result<usize>;
}

#[async_trait]
impl PingSink for UdpSocket {
    async fn send_datagram(&self, datagram: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.send_to(datagram, target).await
    }
}

/// A running session: its endpoint, shutdown signal and task handles.
struct Session {
    generation: u64,
    endpoint: Endpoint,
    shutdown: watch::Sender<bool>,
    timers: Vec<JoinHandle<()>>,
    listener: JoinHandle<()>,
}

/// What every task of one session needs.
#[derive(Clone)]
struct SessionContext {
    inner: Weak<EngineInner>,
    link: LiveLink,
    pings: Arc<dyn PingSink>,
    settings: HeartbeatSettings,
    generation: u64,
}

impl SessionContext {
    /// The engine, unless every handle to it has been dropped.
    fn engine(&self) -> Option<Arc<EngineInner>> {
        self.inner.upgrade()
    }
}

pub(crate) struct EngineInner {
    monitor: Mutex<HeartbeatMonitor>,
    publisher: ConnectionStatePublisher,
    session: tokio::sync::Mutex<Option<Session>>,
    link: RwLock<Option<LiveLink>>,
    /// Last endpoint handed to the engine, valid or not.
    requested: Mutex<Option<Endpoint>>,
    observer: Mutex<Option<JoinHandle<()>>>,
    next_generation: AtomicU64,
    ping_sink: Option<Arc<dyn PingSink>>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        let observer = self
            .observer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(observer) = observer {
            observer.abort();
        }
    }
}

/// Keeps a UDP heartbeat running against the configured endpoint.
///
/// Cloning is cheap; all clones drive the same engine.  [`stop`](Self::stop)
/// is the orderly shutdown.  Dropping every handle, command channels
/// included, also ends the session, without waiting for its tasks.
#[derive(Clone)]
pub struct HeartbeatEngine {
    inner: Arc<EngineInner>,
}

impl HeartbeatEngine {
    /// Creates a stopped engine in `NoConfig`.
    pub fn new(settings: HeartbeatSettings) -> Self {
        Self::with_parts(settings, None)
    }

    /// Creates an engine whose pings go to `sink` instead of the socket.
    #[cfg(test)]
    pub(crate) fn with_ping_sink(settings: HeartbeatSettings, sink: Arc<dyn PingSink>) -> Self {
        Self::with_parts(settings, Some(sink))
    }

    fn with_parts(settings: HeartbeatSettings, ping_sink: Option<Arc<dyn PingSink>>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                monitor: Mutex::new(HeartbeatMonitor::new(settings)),
                publisher: ConnectionStatePublisher::new(),
                session: tokio::sync::Mutex::new(None),
                link: RwLock::new(None),
                requested: Mutex::new(None),
                observer: Mutex::new(None),
                next_generation: AtomicU64::new(0),
                ping_sink,
            }),
        }
    }

    /// The observable connection state.
    pub fn publisher(&self) -> ConnectionStatePublisher {
        self.inner.publisher.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.publisher.current()
    }

    /// A command channel that sends over this engine's socket.
    pub fn command_channel(&self) -> CommandChannel {
        CommandChannel::new(Arc::clone(&self.inner))
    }

    /// Follows `source`: applies its current endpoint, then every change.
    ///
    /// Must be called from within a Tokio runtime.  Calling it again
    /// replaces the previous source.
    pub fn start<S: EndpointConfigSource + ?Sized>(&self, source: &S) {
        let mut endpoints = source.observe();
        let engine = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            loop {
                let endpoint = endpoints.borrow_and_update().clone();
                let Some(inner) = engine.upgrade() else {
                    break;
                };
                if let Err(e) = inner.apply(endpoint, false).await {
                    error!(error = %e, "heartbeat session could not be started");
                }
                drop(inner);
                if endpoints.changed().await.is_err() {
                    debug!("endpoint source dropped; keeping current session");
                    break;
                }
            }
        });

        let previous = lock(&self.inner.observer).replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        info!("heartbeat engine started");
    }

    /// Stops following the endpoint source, tears the session down and
    /// returns to `NoConfig`.
    pub async fn stop(&self) {
        let observer = lock(&self.inner.observer).take();
        if let Some(observer) = observer {
            observer.abort();
            let _ = observer.await;
        }

        let mut session = self.inner.session.lock().await;
        self.inner.teardown(&mut session).await;
        *lock(&self.inner.requested) = None;
        self.inner.with_monitor(HeartbeatMonitor::clear_config);
        info!("heartbeat engine stopped");
    }

    /// Applies one endpoint value.
    ///
    /// - `None` or an invalid endpoint tears the session down (`NoConfig`).
    /// - The endpoint of the live session is a no-op unless the link is lost.
    /// - Anything else tears down the old session and builds a new one.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the new session could not be built; the
    /// engine is then in `ConnectionLost`.
    pub async fn apply_endpoint(&self, endpoint: Option<Endpoint>) -> Result<(), EngineError> {
        self.inner.apply(endpoint, false).await
    }

    /// Rebuilds the session for the most recent endpoint.
    ///
    /// Does nothing when no valid endpoint is configured.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the session could not be built.
    pub async fn reconnect(&self) -> Result<(), EngineError> {
        let endpoint = lock(&self.inner.requested).clone();
        match endpoint {
            Some(endpoint) if endpoint.is_valid() => {
                info!(%endpoint, "reconnecting");
                self.inner.apply(Some(endpoint), true).await
            }
            _ => {
                debug!("reconnect requested without a valid endpoint; ignoring");
                Ok(())
            }
        }
    }

    /// Returns the current counters and state.
    pub fn snapshot(&self) -> EngineSnapshot {
        let endpoint = lock(&self.inner.requested)
            .clone()
            .filter(Endpoint::is_valid);
        let monitor = lock(&self.inner.monitor);
        EngineSnapshot {
            state: monitor.state(),
            endpoint,
            consecutive_successes: monitor.consecutive_successes(),
            consecutive_failures: monitor.consecutive_failures(),
            pending_pings: monitor.pending_pings(),
            pending_commands: monitor.pending_commands(),
            latest_response_time_ms: monitor.latest_response_time_ms(),
        }
    }
}

impl EngineInner {
    /// Runs `f` under the monitor lock and publishes the resulting state
    /// before releasing it.
    pub(crate) fn with_monitor<R>(&self, f: impl FnOnce(&mut HeartbeatMonitor) -> R) -> R {
        let mut monitor = lock(&self.monitor);
        let result = f(&mut monitor);
        self.publisher
            .publish(monitor.state(), monitor.latest_response_time_ms());
        result
    }

    /// The socket and target of the current session, if there is one.
    pub(crate) fn live_link(&self) -> Option<LiveLink> {
        self.link
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.publisher.current()
    }

    async fn apply(
        self: &Arc<Self>,
        endpoint: Option<Endpoint>,
        force: bool,
    ) -> Result<(), EngineError> {
        let mut session = self.session.lock().await;
        *lock(&self.requested) = endpoint.clone();

        let Some(endpoint) = endpoint.filter(Endpoint::is_valid) else {
            self.teardown(&mut session).await;
            self.with_monitor(HeartbeatMonitor::clear_config);
            return Ok(());
        };

        let unchanged = session
            .as_ref()
            .is_some_and(|live| live.endpoint == endpoint);
        if unchanged && !force && self.state() != ConnectionState::ConnectionLost {
            debug!(%endpoint, "endpoint unchanged; keeping session");
            return Ok(());
        }

        self.teardown(&mut session).await;
        self.with_monitor(HeartbeatMonitor::begin_session);
        match self.build_session(endpoint).await {
            Ok(built) => {
                *session = Some(built);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "heartbeat session failed");
                self.with_monitor(HeartbeatMonitor::fatal_socket_error);
                Err(e)
            }
        }
    }

    async fn build_session(self: &Arc<Self>, endpoint: Endpoint) -> Result<Session, EngineError> {
        let target = tokio::net::lookup_host(endpoint.authority())
            .await
            .map_err(|source| EngineError::Resolve {
                endpoint: endpoint.clone(),
                source,
            })?
            .next()
            .ok_or_else(|| EngineError::NoAddress(endpoint.clone()))?;

        let local: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|source| EngineError::Bind {
                endpoint: endpoint.clone(),
                source,
            })?;

        let link = LiveLink {
            socket: Arc::new(socket),
            target,
        };
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let pings: Arc<dyn PingSink> = match &self.ping_sink {
            Some(sink) => Arc::clone(sink),
            None => Arc::clone(&link.socket) as Arc<dyn PingSink>,
        };
        let ctx = SessionContext {
            inner: Arc::downgrade(self),
            link: link.clone(),
            pings,
            settings: lock(&self.monitor).settings().clone(),
            generation,
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let listener = tokio::spawn(run_listener(ctx.clone(), shutdown_rx.clone()));
        let timers = vec![
            tokio::spawn(run_heartbeat(ctx.clone(), shutdown_rx.clone())),
            tokio::spawn(run_sweep(ctx, shutdown_rx)),
        ];

        *self.link.write().unwrap_or_else(PoisonError::into_inner) = Some(link.clone());
        match link.socket.local_addr() {
            Ok(local) => info!(%endpoint, %target, %local, "heartbeat session started"),
            Err(_) => info!(%endpoint, %target, "heartbeat session started"),
        }

        Ok(Session {
            generation,
            endpoint,
            shutdown,
            timers,
            listener,
        })
    }

    async fn teardown(&self, session: &mut Option<Session>) {
        *self.link.write().unwrap_or_else(PoisonError::into_inner) = None;
        let Some(session) = session.take() else {
            return;
        };

        let _ = session.shutdown.send(true);
        for timer in session.timers {
            if let Err(e) = timer.await {
                warn!(error = %e, "heartbeat timer ended abnormally");
            }
        }
        if let Err(e) = session.listener.await {
            warn!(error = %e, "receive loop ended abnormally");
        }
        info!(endpoint = %session.endpoint, "heartbeat session stopped");
    }

    /// Tears down session `generation` from outside its own tasks, after a
    /// fatal socket error.  A newer session is left alone.
    fn discard_session(self: &Arc<Self>, generation: u64) -> JoinHandle<()> {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let mut session = inner.session.lock().await;
            if session.as_ref().map(|s| s.generation) == Some(generation) {
                inner.teardown(&mut session).await;
            } else {
                debug!(generation, "session already replaced; nothing to discard");
            }
        })
    }
}

// ── Session tasks ─────────────────────────────────────────────────────────────

async fn run_listener(ctx: SessionContext, mut shutdown: watch::Receiver<bool>) {
    let mut buf = vec![0u8; ctx.settings.receive_buffer_size];

    loop {
        let (len, from) = tokio::select! {
            _ = shutdown.changed() => break,
            received = ctx.link.socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    // Some platforms report ICMP port-unreachable here.
                    debug!(error = %e, "receive failed");
                    continue;
                }
            },
        };

        if from != ctx.link.target {
            debug!(%from, "dropping datagram from unexpected peer");
            continue;
        }

        let packet = match decode_packet(&buf[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(%from, len, error = %e, "discarding malformed datagram");
                continue;
            }
        };

        let Some(inner) = ctx.engine() else {
            break;
        };
        let now = Instant::now();
        match packet.body {
            PacketBody::Pong => {
                inner.with_monitor(|m| m.pong_received(&packet.id, now));
            }
            PacketBody::CommandAck => {
                inner.with_monitor(|m| m.ack_received(&packet.id, now));
            }
            other => debug!(kind = %other.kind(), "ignoring unexpected packet"),
        }
    }
    debug!(generation = ctx.generation, "receive loop exited");
}

async fn run_heartbeat(ctx: SessionContext, mut shutdown: watch::Receiver<bool>) {
    let period = ctx.settings.health_check_interval.max(Duration::from_millis(1));
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }
        let Some(inner) = ctx.engine() else {
            break;
        };

        let ping = Packet::ping();
        let bytes = match encode_packet(&ping) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "failed to encode ping");
                continue;
            }
        };
        if !inner.with_monitor(|m| m.ping_sent(ping.id, Instant::now())) {
            continue;
        }

        match ctx.pings.send_datagram(&bytes, ctx.link.target).await {
            Ok(_) => debug!(id = %ping.id, target = %ctx.link.target, "ping sent"),
            Err(e) if is_fatal(&e) => {
                error!(error = %e, "socket unusable; dropping session");
                inner.with_monitor(HeartbeatMonitor::fatal_socket_error);
                drop(inner.discard_session(ctx.generation));
                break;
            }
            Err(e) => {
                debug!(error = %e, "ping send failed");
                inner.with_monitor(|m| m.ping_send_failed(&ping.id));
            }
        }
    }
}

async fn run_sweep(ctx: SessionContext, mut shutdown: watch::Receiver<bool>) {
    let period = ctx.settings.sweep_interval();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; nothing can have expired yet.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        let Some(inner) = ctx.engine() else {
            break;
        };
        let retransmits = inner.with_monitor(|m| m.sweep(Instant::now()));
        drop(inner);
        for retransmit in retransmits {
            match ctx
                .link
                .socket
                .send_to(&retransmit.datagram, ctx.link.target)
                .await
            {
                Ok(_) => debug!(id = %retransmit.id, attempt = retransmit.attempt, "command retransmitted"),
                Err(e) => warn!(id = %retransmit.id, error = %e, "command retransmit failed"),
            }
        }
    }
}

// ── Internal helpers ──────────────────────────────────────────────────────────

/// Send errors after which the socket itself cannot be trusted.
fn is_fatal(e: &io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::BrokenPipe | ErrorKind::NotConnected | ErrorKind::InvalidInput
    )
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
