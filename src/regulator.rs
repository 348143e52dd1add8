//! Per-endpoint dispatch pacing
//!
//! The Regulator turns recent repair latency into an advisory delay before
//! the next dispatch to the same endpoint: endpoints whose recent repairs
//! ran slow are throttled harder, endpoints never seen before are admitted
//! immediately. This is self-tuning backpressure, not hard admission
//! control; the Scheduler decides how much of the suggested delay to honor.

use dashmap::DashMap;
use std::time::Duration;

use crate::window::DurationWindow;

/// Advisory pacing controller, one rolling latency window per endpoint.
///
/// Safe for concurrent use across endpoints; updates for one endpoint are
/// serialized on its map entry.
pub struct Regulator {
    windows: DashMap<String, DurationWindow>,
    capacity: usize,
}

impl Regulator {
    /// Create a regulator whose per-endpoint windows hold `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            windows: DashMap::new(),
            capacity,
        }
    }

    /// Record an observed repair duration for an endpoint, creating its
    /// window on first sight.
    pub fn record(&self, endpoint: &str, elapsed: Duration) {
        self.windows
            .entry(endpoint.to_string())
            .or_insert_with(|| DurationWindow::new(self.capacity))
            .push(elapsed);
    }

    /// Suggested delay before the next dispatch to `endpoint`: the mean of
    /// its recent repair durations. Endpoints with no history get zero
    /// delay (greedy cold start).
    pub fn admit(&self, endpoint: &str) -> Duration {
        self.windows
            .get(endpoint)
            .map(|window| window.mean())
            .unwrap_or(Duration::ZERO)
    }

    /// Number of samples currently held for an endpoint.
    pub fn samples(&self, endpoint: &str) -> usize {
        self.windows.get(endpoint).map(|w| w.len()).unwrap_or(0)
    }
}
