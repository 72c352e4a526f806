//! Stall detection over a trailing throughput window.
//!
//! A pure idle timeout misses connections that stay open and trickle bytes.
//! The tracker samples cumulative progress during a transfer and flags a
//! stall when the average rate over the trailing window drops below a floor.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Abort threshold: average throughput below `min_bytes_per_sec` sustained
/// over `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StallPolicy {
    pub window: Duration,
    pub min_bytes_per_sec: u64,
}

impl Default for StallPolicy {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            min_bytes_per_sec: 5000,
        }
    }
}

/// Decides when an in-flight transfer counts as stalled.
///
/// Feed it `(now, cumulative_bytes)` from the engine's progress callback.
/// It keeps just enough samples to cover the trailing window and reports a
/// stall only once a full window of history is on record, so transfers that
/// finish earlier are never judged. A drop in the cumulative count (a
/// redirect hop restarting the body) resets the history.
#[derive(Debug)]
pub struct StallTracker {
    policy: StallPolicy,
    samples: VecDeque<(Instant, u64)>,
}

impl StallTracker {
    pub fn new(policy: StallPolicy) -> Self {
        Self {
            policy,
            samples: VecDeque::new(),
        }
    }

    /// Record one progress observation; returns true when the transfer has
    /// averaged below the floor for at least the full window.
    pub fn observe(&mut self, now: Instant, transferred: u64) -> bool {
        if let Some(&(_, last)) = self.samples.back() {
            if transferred < last {
                self.samples.clear();
            }
        }
        self.samples.push_back((now, transferred));
        // Trim samples older than the window, but keep one preceding sample
        // so the retained span still covers the whole window.
        while self.samples.len() >= 2 {
            if now.duration_since(self.samples[1].0) >= self.policy.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        let (first_t, first_b) = match self.samples.front() {
            Some(&s) => s,
            None => return false,
        };
        let span = now.duration_since(first_t);
        if span < self.policy.window {
            return false;
        }
        let bytes = transferred.saturating_sub(first_b);
        (bytes as f64 / span.as_secs_f64()) < self.policy.min_bytes_per_sec as f64
    }
}
