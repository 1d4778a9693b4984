//! HeartbeatMonitor: the connection-health state machine.
//!
//! This type holds everything the heartbeat engine mutates: the current
//! [`ConnectionState`], the consecutive success/failure counters, the set of
//! outstanding pings (and commands, in ack mode), and the latency window.
//! It performs no I/O and never reads the clock; every method that depends
//! on time takes `now` explicitly.  The infrastructure layer wraps one
//! monitor in a single `Mutex`, which is what serializes a PONG arrival
//! against a timeout sweep.
//!
//! # State machine (for beginners)
//!
//! ```text
//!                  endpoint set
//!   NoConfig  ───────────────────►  Connecting  ──── 2 pongs ────►  Connected
//!      ▲                              ▲    │                          │  ▲
//!      │ endpoint cleared             │    │ 3 failures      1 miss  │  │ ack
//!      │ (from any state)             │    ▼                          ▼  │
//!      └──────────────────────  ConnectionLost  ◄── 3 failures ── SendingPendingAck
//! ```
//!
//! - A *failure* is a ping that timed out, a ping that could not be sent, or
//!   (in ack mode) a command that exhausted its retries.
//! - One failure degrades `Connected` to `Connecting`; `max_failed_checks`
//!   consecutive failures declare `ConnectionLost`.
//! - Pongs keep arriving while lost, so the link recovers on its own once the
//!   companion answers again.

use std::time::{Duration, Instant};

use buttonbox_core::ConnectionState;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::latency::LatencyWindow;
use crate::application::pending::PendingTracker;

// ── Defaults ──────────────────────────────────────────────────────────────────

/// Interval between two pings.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_millis(5000);

/// How long a ping may wait for its pong before it counts as a failure.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_millis(2000);

/// Consecutive failures that declare the connection lost.
pub const DEFAULT_MAX_FAILED_CHECKS: u32 = 3;

/// Consecutive successes needed before the link is reported as connected.
pub const DEFAULT_MIN_SUCCESSES_FOR_CONNECTED: u32 = 2;

/// Retransmissions of an unacknowledged command before it counts as failed.
pub const DEFAULT_COMMAND_MAX_RETRIES: u8 = 2;

// ── Settings ──────────────────────────────────────────────────────────────────

/// Whether commands wait for a `MACRO_ACK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandAckPolicy {
    /// Commands are sent once and forgotten.
    #[default]
    FireAndForget,
    /// Commands stay pending until acknowledged; unacknowledged ones are
    /// retransmitted with the same id up to `max_retries` times and then
    /// counted as one heartbeat failure.
    AwaitAck { timeout: Duration, max_retries: u8 },
}

/// Tuning knobs for the heartbeat engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatSettings {
    pub health_check_interval: Duration,
    pub ping_timeout: Duration,
    pub max_failed_checks: u32,
    pub min_successes_for_connected: u32,
    /// Bytes allocated for each received datagram.
    pub receive_buffer_size: usize,
    pub command_ack: CommandAckPolicy,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            max_failed_checks: DEFAULT_MAX_FAILED_CHECKS,
            min_successes_for_connected: DEFAULT_MIN_SUCCESSES_FOR_CONNECTED,
            receive_buffer_size: buttonbox_core::protocol::RECEIVE_BUFFER_SIZE,
            command_ack: CommandAckPolicy::FireAndForget,
        }
    }
}

impl HeartbeatSettings {
    /// Period of the timeout sweep: half the ping timeout, at least 1 ms.
    pub fn sweep_interval(&self) -> Duration {
        (self.ping_timeout / 2).max(Duration::from_millis(1))
    }
}

// ── Outcomes ──────────────────────────────────────────────────────────────────

/// Result of handling an incoming reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// The reply resolved an outstanding request.
    Matched { round_trip: Duration },
    /// No outstanding request has this id (late, duplicate, or foreign).
    Unmatched,
}

/// A command the sweep wants sent again, byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retransmit {
    pub id: Uuid,
    pub datagram: Vec<u8>,
    pub attempt: u8,
}

// ── Monitor ───────────────────────────────────────────────────────────────────

/// The connection-health state machine.  See the module docs.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    settings: HeartbeatSettings,
    state: ConnectionState,
    consecutive_successes: u32,
    consecutive_failures: u32,
    pending_pings: PendingTracker<()>,
    pending_commands: PendingTracker<Vec<u8>>,
    latency: LatencyWindow,
}

impl HeartbeatMonitor {
    pub fn new(settings: HeartbeatSettings) -> Self {
        Self {
            settings,
            state: ConnectionState::NoConfig,
            consecutive_successes: 0,
            consecutive_failures: 0,
            pending_pings: PendingTracker::new(),
            pending_commands: PendingTracker::new(),
            latency: LatencyWindow::new(),
        }
    }

    pub fn settings(&self) -> &HeartbeatSettings {
        &self.settings
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn pending_pings(&self) -> usize {
        self.pending_pings.len()
    }

    pub fn pending_commands(&self) -> usize {
        self.pending_commands.len()
    }

    /// Average one-way latency over the recent window, in milliseconds.
    pub fn latest_response_time_ms(&self) -> Option<u64> {
        self.latency.average()
    }

    // ── Session lifecycle ─────────────────────────────────────────────────────

    /// A session for a valid endpoint is about to be built.
    pub fn begin_session(&mut self) {
        self.reset_bookkeeping();
        self.transition(ConnectionState::Connecting);
    }

    /// The endpoint was cleared or the engine stopped.
    pub fn clear_config(&mut self) {
        self.reset_bookkeeping();
        self.transition(ConnectionState::NoConfig);
    }

    /// The socket could not be created, resolved, or used.
    ///
    /// Ignored while unconfigured: a late error from a torn-down session
    /// must not invent an endpoint.
    pub fn fatal_socket_error(&mut self) {
        if self.state == ConnectionState::NoConfig {
            return;
        }
        self.pending_pings.clear();
        self.pending_commands.clear();
        self.latency.reset();
        self.consecutive_successes = 0;
        self.transition(ConnectionState::ConnectionLost);
    }

    // ── Pings ─────────────────────────────────────────────────────────────────

    /// Records a ping that is about to be sent.  Returns `false` if the
    /// monitor is unconfigured or the id is already pending.
    pub fn ping_sent(&mut self, id: Uuid, now: Instant) -> bool {
        if self.state == ConnectionState::NoConfig {
            return false;
        }
        self.pending_pings.insert(id, now, ())
    }

    /// A ping could not be sent.  Counts as one failed check immediately.
    pub fn ping_send_failed(&mut self, id: &Uuid) {
        self.pending_pings.resolve(id);
        warn!(%id, "health check ping could not be sent");
        self.record_failure();
    }

    /// Handles a `HEALTH_CHECK_PONG` carrying `id`.
    pub fn pong_received(&mut self, id: &Uuid, now: Instant) -> ReplyOutcome {
        let Some(entry) = self.pending_pings.resolve(id) else {
            warn!(%id, "pong for unknown or expired ping; ignoring");
            return ReplyOutcome::Unmatched;
        };
        let round_trip = now.saturating_duration_since(entry.sent_at);
        self.record_success(round_trip);
        debug!(%id, rtt_ms = round_trip.as_millis() as u64, "pong matched");

        if self.consecutive_successes >= self.settings.min_successes_for_connected
            && self.state != ConnectionState::SendingPendingAck
        {
            self.transition(ConnectionState::Connected);
        }
        ReplyOutcome::Matched { round_trip }
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    /// Records a command that is about to be sent.
    ///
    /// Only tracked in ack mode; returns whether the command is now pending.
    pub fn command_sent(&mut self, id: Uuid, datagram: Vec<u8>, now: Instant) -> bool {
        if !matches!(self.settings.command_ack, CommandAckPolicy::AwaitAck { .. })
            || self.state == ConnectionState::NoConfig
        {
            return false;
        }
        if !self.pending_commands.insert(id, now, datagram) {
            return false;
        }
        if matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            self.transition(ConnectionState::SendingPendingAck);
        }
        true
    }

    /// A command could not be sent: forget it and undo its effect on the
    /// state, without counting a failure.
    pub fn command_send_failed(&mut self, id: &Uuid) {
        if self.pending_commands.resolve(id).is_none() {
            return;
        }
        if self.pending_commands.is_empty() && self.state == ConnectionState::SendingPendingAck {
            self.transition(self.liveness_state());
        }
    }

    /// Handles a `MACRO_ACK` carrying `id`.
    pub fn ack_received(&mut self, id: &Uuid, now: Instant) -> ReplyOutcome {
        let Some(entry) = self.pending_commands.resolve(id) else {
            debug!(%id, "ack for unknown command; ignoring");
            return ReplyOutcome::Unmatched;
        };
        let round_trip = now.saturating_duration_since(entry.sent_at);
        self.record_success(round_trip);
        debug!(%id, attempts = entry.attempts, "command acknowledged");

        if self.pending_commands.is_empty() {
            if matches!(
                self.state,
                ConnectionState::SendingPendingAck | ConnectionState::Connecting
            ) {
                self.transition(ConnectionState::Connected);
            }
        } else if self.state == ConnectionState::Connecting {
            self.transition(ConnectionState::SendingPendingAck);
        }
        ReplyOutcome::Matched { round_trip }
    }

    // ── Timeout sweep ─────────────────────────────────────────────────────────

    /// Reaps every expired ping and command.
    ///
    /// Each expired ping is one failure.  Each expired command is either
    /// returned for retransmission (and put back with a fresh clock) or, once
    /// its retries are spent, dropped as one failure.
    pub fn sweep(&mut self, now: Instant) -> Vec<Retransmit> {
        let expired_pings = self.pending_pings.take_expired(now, self.settings.ping_timeout);
        for (id, _) in expired_pings {
            warn!(%id, timeout_ms = self.settings.ping_timeout.as_millis() as u64, "health check timed out");
            self.record_failure();
        }

        let CommandAckPolicy::AwaitAck {
            timeout,
            max_retries,
        } = self.settings.command_ack
        else {
            return Vec::new();
        };

        let mut retransmits = Vec::new();
        for (id, entry) in self.pending_commands.take_expired(now, timeout) {
            if entry.attempts <= max_retries {
                retransmits.push(Retransmit {
                    id,
                    datagram: entry.data.clone(),
                    attempt: entry.attempts + 1,
                });
                self.pending_commands.reinsert_retry(id, entry, now);
            } else {
                warn!(%id, attempts = entry.attempts, "command never acknowledged");
                self.record_failure();
            }
        }
        retransmits
    }

    // ── Internal helpers ──────────────────────────────────────────────────────

    fn record_success(&mut self, round_trip: Duration) {
        self.consecutive_failures = 0;
        self.consecutive_successes =
            (self.consecutive_successes + 1).min(self.settings.min_successes_for_connected + 1);
        self.latency.record(round_trip);
    }

    fn record_failure(&mut self) {
        if self.state == ConnectionState::NoConfig {
            return;
        }
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
        self.latency.reset();

        if self.consecutive_failures >= self.settings.max_failed_checks {
            self.transition(ConnectionState::ConnectionLost);
        } else if !matches!(
            self.state,
            ConnectionState::Connecting
                | ConnectionState::NoConfig
                | ConnectionState::ConnectionLost
        ) {
            self.transition(ConnectionState::Connecting);
        }
    }

    /// The state implied by the liveness counters alone.
    fn liveness_state(&self) -> ConnectionState {
        if self.consecutive_failures >= self.settings.max_failed_checks {
            ConnectionState::ConnectionLost
        } else if self.consecutive_successes >= self.settings.min_successes_for_connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Connecting
        }
    }

    fn reset_bookkeeping(&mut self) {
        self.consecutive_successes = 0;
        self.consecutive_failures = 0;
        self.pending_pings.clear();
        self.pending_commands.clear();
        self.latency.reset();
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "connection state changed");
            self.state = next;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
