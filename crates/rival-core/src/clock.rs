//! Injectable time source.
//!
//! Breakers and cursors read time through [`Clock`] so tests can move time
//! forward without sleeping.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Monotonic time, for measuring windows and cooldowns.
    fn instant(&self) -> Instant;

    /// Wall-clock time, for timestamps that leave the process.
    fn utc(&self) -> DateTime<Utc>;
}

pub type SharedClock = Arc<dyn Clock>;

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn instant(&self) -> Instant {
        Instant::now()
    }

    fn utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualInner>>,
}

#[derive(Debug)]
struct ManualInner {
    instant: Instant,
    utc: DateTime<Utc>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(utc: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualInner {
                instant: Instant::now(),
                utc,
            })),
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, ManualInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn advance(&self, by: Duration) {
        let mut inner = self.lock_inner();
        inner.instant += by;
        inner.utc += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn instant(&self) -> Instant {
        self.lock_inner().instant
    }

    fn utc(&self) -> DateTime<Utc> {
        self.lock_inner().utc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_only_when_advanced() {
        let clock = ManualClock::new();
        let before = clock.instant();
        let before_utc = clock.utc();
        assert_eq!(clock.instant(), before);

        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.instant() - before, Duration::from_secs(90));
        assert_eq!((clock.utc() - before_utc).num_seconds(), 90);
    }

    #[test]
    fn clones_share_time() {
        let clock = ManualClock::new();
        let other = clock.clone();
        let start = other.instant();
        clock.advance(Duration::from_secs(5));
        assert_eq!(other.instant() - start, Duration::from_secs(5));
    }
}
