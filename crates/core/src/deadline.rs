use std::time::{Duration, Instant};

/// Advisory time budget checked between units of work.
///
/// Nothing is cancelled when the budget runs out; callers simply stop
/// starting new work.
#[derive(Debug, Clone, Copy)]
pub struct SoftDeadline {
    started: Instant,
    budget: Duration,
}

impl SoftDeadline {
    pub fn new(started: Instant, budget: Duration) -> Self {
        Self { started, budget }
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }

    /// `true` once strictly more than the budget has elapsed.
    pub fn is_exceeded(&self, now: Instant) -> bool {
        self.elapsed(now) > self.budget
    }
}
