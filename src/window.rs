//! Bounded rolling window of duration samples
//!
//! Leaf data structure of the Regulator: a fixed-capacity FIFO that keeps
//! the most recent elapsed-time observations for one endpoint. Eviction of
//! old samples bounds how long a single slow repair can dominate pacing.

use std::collections::VecDeque;
use std::time::Duration;

/// Fixed-capacity FIFO of duration samples with oldest-first eviction.
#[derive(Debug, Clone)]
pub struct DurationWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl DurationWindow {
    /// Create a window holding at most `capacity` samples.
    /// A zero capacity is clamped to 1 so the window always observes.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest one at capacity.
    pub fn push(&mut self, sample: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Arithmetic mean of the held samples; zero when empty.
    pub fn mean(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.samples.iter().sum();
        total / self.samples.len() as u32
    }

    /// Samples currently held, oldest first.
    pub fn values(&self) -> impl Iterator<Item = Duration> + '_ {
        self.samples.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holds_at_most_capacity_most_recent_samples() {
        let capacity = 5;
        let mut window = DurationWindow::new(capacity);

        for i in 1..=capacity + 3 {
            window.push(Duration::from_secs(i as u64));
            assert_eq!(window.len(), i.min(capacity), "length must track min(N, pushes)");
        }

        // Pushed 8 into capacity 5: samples 4..=8 remain, oldest first.
        let held: Vec<u64> = window.values().map(|d| d.as_secs()).collect();
        assert_eq!(held, vec![4, 5, 6, 7, 8]);
    }

    #[test]
    fn mean_of_empty_window_is_zero() {
        let window = DurationWindow::new(3);
        assert!(window.is_empty());
        assert_eq!(window.mean(), Duration::ZERO);
    }

    #[test]
    fn mean_updates_after_eviction() {
        let mut window = DurationWindow::new(3);
        for secs in [10, 20, 30] {
            window.push(Duration::from_secs(secs));
        }
        assert_eq!(window.mean(), Duration::from_secs(20));

        // Fourth push evicts the 10s sample: mean of [20, 30, 40] = 30.
        window.push(Duration::from_secs(40));
        assert_eq!(window.mean(), Duration::from_secs(30));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut window = DurationWindow::new(0);
        window.push(Duration::from_secs(1));
        window.push(Duration::from_secs(3));
        assert_eq!(window.len(), 1);
        assert_eq!(window.mean(), Duration::from_secs(3));
    }
}
