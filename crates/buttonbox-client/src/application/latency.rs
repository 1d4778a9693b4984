//! Rolling one-way latency estimate shown next to the connection state.

use std::collections::VecDeque;
use std::time::Duration;

/// Number of samples averaged into the published response time.
pub const LATENCY_WINDOW_SIZE: usize = 5;

/// Keeps the last [`LATENCY_WINDOW_SIZE`] one-way latency samples.
///
/// A sample is half the measured round trip, rounded to the nearest
/// millisecond.
#[derive(Debug, Default)]
pub struct LatencyWindow {
    samples: VecDeque<u64>,
}

impl LatencyWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the sample for one round trip and returns the new average.
    pub fn record(&mut self, round_trip: Duration) -> u64 {
        let one_way = (round_trip.as_millis() as u64 + 1) / 2;
        if self.samples.len() == LATENCY_WINDOW_SIZE {
            self.samples.pop_front();
        }
        self.samples.push_back(one_way);
        self.average().unwrap_or(one_way)
    }

    /// Rounded mean of the current samples, or `None` if there are none.
    pub fn average(&self) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let count = self.samples.len() as u64;
        let sum: u64 = self.samples.iter().sum();
        Some((sum + count / 2) / count)
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }
}
