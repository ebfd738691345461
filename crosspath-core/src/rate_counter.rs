//! Sliding-window counter behind the mixer insert-rate stats.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Counts events in per-second buckets over a bounded window.
///
/// Buckets older than the window are pruned on every update, so memory is
/// bounded by the window size regardless of traffic.
pub struct RateCounter {
    window_s: i64,
    buckets: Mutex<VecDeque<(i64, u64)>>,
}

impl RateCounter {
    pub fn new(window_s: i64) -> Self {
        Self {
            window_s,
            buckets: Mutex::new(VecDeque::new()),
        }
    }

    /// Adds `count` events at the current wall-clock second.
    pub fn increment(&self, count: u64) {
        self.increment_at(chrono::Utc::now().timestamp(), count);
    }

    /// Number of events seen during the last `n` seconds.
    pub fn rate_for_last_n_seconds(&self, n: i64) -> u64 {
        self.rate_at(chrono::Utc::now().timestamp(), n)
    }

    fn increment_at(&self, now: i64, count: u64) {
        let mut buckets = self.buckets.lock().unwrap();

        match buckets.back_mut() {
            Some((timestamp, total)) if *timestamp == now => *total += count,
            _ => buckets.push_back((now, count)),
        }

        let horizon = now - self.window_s;
        while let Some((timestamp, _)) = buckets.front() {
            if *timestamp >= horizon {
                break;
            }
            buckets.pop_front();
        }
    }

    fn rate_at(&self, now: i64, n: i64) -> u64 {
        let horizon = now - n;
        let buckets = self.buckets.lock().unwrap();
        buckets
            .iter()
            .filter(|(timestamp, _)| *timestamp > horizon)
            .map(|(_, count)| count)
            .sum()
    }
}
