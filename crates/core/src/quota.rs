use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

const PREALLOCATED_SLOTS: usize = 64;

/// Sliding-window request quota.
///
/// The window is an ordinary value owned by whoever issues the requests; a
/// reconciliation pass builds a fresh one per run.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    limit: usize,
    window: Duration,
    hits: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: VecDeque::with_capacity(limit.min(PREALLOCATED_SLOTS)),
        }
    }

    /// Records a request at `now` if the quota allows it.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.evict(now);
        if self.hits.len() >= self.limit {
            return false;
        }
        self.hits.push_back(now);
        true
    }

    /// Requests still allowed at `now`.
    pub fn remaining(&mut self, now: Instant) -> usize {
        self.evict(now);
        self.limit.saturating_sub(self.hits.len())
    }

    fn evict(&mut self, now: Instant) {
        while let Some(oldest) = self.hits.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }
}
