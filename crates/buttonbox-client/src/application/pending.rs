//! Bookkeeping for packets that are waiting for a reply.
//!
//! Pings wait for a `HEALTH_CHECK_PONG`; commands sent in ack mode wait for a
//! `MACRO_ACK`.  Both are keyed by the packet id that the reply echoes.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

/// One outstanding request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry<T> {
    /// When the request (or its latest retransmission) left the socket.
    pub sent_at: Instant,
    /// Number of transmissions so far, starting at 1.
    pub attempts: u8,
    pub data: T,
}

/// Set of outstanding requests keyed by packet id.
///
/// Each id resolves at most once: whichever of [`resolve`](Self::resolve) or
/// [`take_expired`](Self::take_expired) removes the entry first wins, and the
/// other sees nothing.
#[derive(Debug)]
pub struct PendingTracker<T> {
    entries: HashMap<Uuid, PendingEntry<T>>,
}

impl<T> Default for PendingTracker<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<T> PendingTracker<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new outstanding request.
    ///
    /// Returns `false` (and leaves the existing entry alone) if `id` is
    /// already pending.
    pub fn insert(&mut self, id: Uuid, sent_at: Instant, data: T) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(
            id,
            PendingEntry {
                sent_at,
                attempts: 1,
                data,
            },
        );
        true
    }

    /// Removes and returns the entry for `id`, if still pending.
    pub fn resolve(&mut self, id: &Uuid) -> Option<PendingEntry<T>> {
        self.entries.remove(id)
    }

    /// Removes and returns every entry strictly older than `timeout` at `now`.
    pub fn take_expired(&mut self, now: Instant, timeout: Duration) -> Vec<(Uuid, PendingEntry<T>)> {
        let expired: Vec<Uuid> = self
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.sent_at) > timeout)
            .map(|(id, _)| *id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|entry| (id, entry)))
            .collect()
    }

    /// Puts an entry back after a retransmission, restarting its clock.
    pub fn reinsert_retry(&mut self, id: Uuid, mut entry: PendingEntry<T>, now: Instant) {
        entry.sent_at = now;
        entry.attempts = entry.attempts.saturating_add(1);
        self.entries.insert(id, entry);
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
