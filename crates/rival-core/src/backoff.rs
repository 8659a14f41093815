//! Exponential backoff with jitter between bypass attempts.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound on the exponential part.
    pub max: Duration,
    /// Maximum uniform jitter added on top (uniform [0, jitter]).
    pub jitter: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// No waiting at all; used by tests and local runs.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped, plus jitter.
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.min(16)).unwrap_or(u32::MAX);
        let exp = self.base.saturating_mul(factor).min(self.max);
        if self.jitter.is_zero() {
            return exp;
        }
        exp + Duration::from_millis(rand_jitter_ms(self.jitter.as_millis() as u64))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(250),
            max: Duration::from_secs(4),
            jitter: Duration::from_millis(250),
        }
    }
}

// ---------------------------------------------------------------------------
// Time-seeded xorshift jitter.
// ---------------------------------------------------------------------------

pub(crate) fn rand_jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    // Not crypto.
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
        | 1;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % max_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_until_capped() {
        let b = Backoff::new(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(b.delay(0), Duration::from_millis(100));
        assert_eq!(b.delay(1), Duration::from_millis(200));
        assert_eq!(b.delay(2), Duration::from_millis(400));
        assert_eq!(b.delay(3), Duration::from_millis(500));
        assert_eq!(b.delay(40), Duration::from_millis(500));
    }

    #[test]
    fn jitter_is_bounded() {
        let b = Backoff::new(Duration::from_millis(100), Duration::from_secs(1))
            .with_jitter(Duration::from_millis(50));
        for _ in 0..100 {
            let d = b.delay(0);
            assert!(d >= Duration::from_millis(100));
            assert!(d < Duration::from_millis(150));
        }
    }

    #[test]
    fn none_never_waits() {
        assert_eq!(Backoff::none().delay(5), Duration::ZERO);
    }
}
