use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Source of time for grace period checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when advanced explicitly.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Whether `grace` has passed between `since` and `now`.
pub(crate) fn grace_elapsed(since: Instant, grace: Duration, now: Instant) -> bool {
    now.checked_duration_since(since)
        .is_some_and(|idle| idle >= grace)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_grace_elapsed() {
        let clock = ManualClock::new();
        let start = clock.now();
        assert!(grace_elapsed(start, Duration::ZERO, clock.now()));
        assert!(!grace_elapsed(start, Duration::from_secs(5), clock.now()));

        clock.advance(Duration::from_secs(5));
        assert!(grace_elapsed(start, Duration::from_secs(5), clock.now()));
    }
}
