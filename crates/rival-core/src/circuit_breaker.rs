//! Circuit breakers for flaky upstreams (search engines).
//!
//! # Circuit States
//!
//! ```text
//! CLOSED (healthy) --[N failures in window]--> OPEN (skipped) --[cooldown]--> HALF_OPEN (probing)
//!                                                                                  |
//!                                            <--[failure]--                        |
//!                                                                                  |
//! CLOSED <--------------------------------[success]--------------------------------+
//! ```
//!
//! While half-open, [`CircuitBreaker::call`] admits one trial call at a time;
//! concurrent callers are turned away as if the circuit were still open.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::clock::{SharedClock, system_clock};
use crate::error::TripSignal;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow normally.
    Closed,
    /// Requests are rejected without reaching the service.
    Open,
    /// A single trial request is let through to test recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures (within `failure_window`) before opening.
    pub failure_threshold: u32,

    /// A failure older than this no longer counts toward the streak.
    pub failure_window: Duration,

    /// Successful probes in half-open state needed to close the circuit.
    pub success_threshold: u32,

    /// Time to wait before transitioning from Open to Half-Open.
    pub recovery_timeout: Duration,

    /// When the upstream rate limits us, multiply recovery_timeout by this factor.
    pub rate_limit_backoff_multiplier: f32,

    /// Maximum recovery timeout after rate limit backoffs.
    pub max_recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            failure_window: Duration::from_secs(60),
            success_threshold: 1,
            recovery_timeout: Duration::from_secs(30),
            rate_limit_backoff_multiplier: 2.0,
            max_recovery_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug)]
struct CircuitBreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    opened_at: Option<Instant>,
    last_error_message: Option<String>,
    current_recovery_timeout: Duration,
    trial_in_flight: bool,
}

impl CircuitBreakerInner {
    fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            opened_at: None,
            last_error_message: None,
            current_recovery_timeout: config.recovery_timeout,
            trial_in_flight: false,
        }
    }

    fn remaining_cooldown(&self, now: Instant) -> Duration {
        self.opened_at
            .map(|t| {
                self.current_recovery_timeout
                    .saturating_sub(now.saturating_duration_since(t))
            })
            .unwrap_or(self.current_recovery_timeout)
    }
}

/// Statistics about circuit breaker state for monitoring.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_error: Option<String>,
    pub time_until_half_open: Option<Duration>,
}

/// Error type for circuit breaker operations.
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open; the operation was not executed.
    Open { name: String, retry_after: Duration },
    /// The inner operation failed.
    Inner(E),
}

impl<E: Display> Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::Open { name, retry_after } => {
                write!(
                    f,
                    "Circuit breaker '{}' is open. Retry after {} seconds.",
                    name,
                    retry_after.as_secs()
                )
            }
            CircuitBreakerError::Inner(e) => write!(f, "{e}"),
        }
    }
}

impl<E: std::fmt::Debug + Display> std::error::Error for CircuitBreakerError<E> {}

/// Releases the half-open trial slot when the trial call ends, including
/// when its future is dropped mid-flight.
struct TrialSlot<'a> {
    breaker: &'a CircuitBreaker,
    held: bool,
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        if self.held {
            self.breaker.lock_inner().trial_in_flight = false;
        }
    }
}

/// Thread-safe circuit breaker for one upstream.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: SharedClock,
    inner: Arc<Mutex<CircuitBreakerInner>>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, system_clock())
    }

    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: SharedClock,
    ) -> Self {
        let inner = CircuitBreakerInner::new(&config);
        Self {
            name: name.into(),
            config,
            clock,
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquires the inner mutex lock, recovering from poison if necessary.
    fn lock_inner(&self) -> std::sync::MutexGuard<'_, CircuitBreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(circuit = %self.name, "Recovered from poisoned mutex");
            poisoned.into_inner()
        })
    }

    /// Returns the current state, handling lazy Open → HalfOpen transitions.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);
        inner.state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);

        let time_until_half_open = (inner.state == CircuitState::Open)
            .then(|| inner.remaining_cooldown(self.clock.instant()));

        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_error: inner.last_error_message.clone(),
            time_until_half_open,
        }
    }

    /// Checks whether a request may pass, without executing anything.
    ///
    /// Returns the remaining cooldown when the circuit is open.
    pub fn check(&self) -> Result<(), Duration> {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);
        if inner.state == CircuitState::Open {
            return Err(inner.remaining_cooldown(self.clock.instant()));
        }
        Ok(())
    }

    /// Admits a call, reserving the trial slot when half-open.
    fn admit(&self) -> Result<TrialSlot<'_>, Duration> {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);
        match inner.state {
            CircuitState::Closed => Ok(TrialSlot {
                breaker: self,
                held: false,
            }),
            CircuitState::Open => Err(inner.remaining_cooldown(self.clock.instant())),
            CircuitState::HalfOpen if inner.trial_in_flight => Err(Duration::ZERO),
            CircuitState::HalfOpen => {
                inner.trial_in_flight = true;
                Ok(TrialSlot {
                    breaker: self,
                    held: true,
                })
            }
        }
    }

    /// Executes the given operation through the circuit breaker.
    ///
    /// - Closed: executes operation, tracks success/failure
    /// - Open: returns `CircuitBreakerError::Open` immediately
    /// - HalfOpen: executes one probe and transitions based on its result;
    ///   other callers get `CircuitBreakerError::Open` until it finishes
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: TripSignal + Display,
    {
        let _slot = match self.admit() {
            Ok(slot) => slot,
            Err(retry_after) => {
                return Err(CircuitBreakerError::Open {
                    name: self.name.clone(),
                    retry_after,
                });
            }
        };

        let result = operation().await;

        match &result {
            Ok(_) => self.record_success(),
            Err(e) => {
                if e.should_trip_circuit() {
                    self.record_failure(e);
                }
            }
        }

        result.map_err(CircuitBreakerError::Inner)
    }

    pub fn record_success(&self) {
        let mut inner = self.lock_inner();

        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    tracing::info!(
                        circuit = %self.name,
                        "Circuit breaker closing after {} successful probes",
                        inner.success_count
                    );
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.opened_at = None;
                    inner.last_error_message = None;
                    inner.current_recovery_timeout = self.config.recovery_timeout;
                }
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure<E: TripSignal + Display>(&self, error: &E) {
        let mut inner = self.lock_inner();
        let now = self.clock.instant();
        let is_rate_limit = error.is_rate_limit();

        match inner.state {
            CircuitState::Closed => {
                let streak_expired = inner
                    .last_failure_time
                    .is_some_and(|t| now.saturating_duration_since(t) > self.config.failure_window);
                if streak_expired {
                    inner.failure_count = 0;
                }
                inner.failure_count += 1;
                inner.last_failure_time = Some(now);
                inner.last_error_message = Some(error.to_string());

                if inner.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        circuit = %self.name,
                        failures = inner.failure_count,
                        error = %error,
                        "Circuit breaker opening after {} consecutive failures",
                        inner.failure_count
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    if is_rate_limit {
                        self.extend_recovery(&mut inner);
                    }
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(
                    circuit = %self.name,
                    error = %error,
                    "Circuit breaker probe failed, returning to open state"
                );
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.last_failure_time = Some(now);
                inner.last_error_message = Some(error.to_string());
                inner.success_count = 0;
                if is_rate_limit {
                    self.extend_recovery(&mut inner);
                }
            }
            CircuitState::Open => {
                inner.last_error_message = Some(error.to_string());
            }
        }
    }

    fn extend_recovery(&self, inner: &mut CircuitBreakerInner) {
        inner.current_recovery_timeout = std::cmp::min(
            Duration::from_secs_f32(
                inner.current_recovery_timeout.as_secs_f32()
                    * self.config.rate_limit_backoff_multiplier,
            ),
            self.config.max_recovery_timeout,
        );
        tracing::info!(
            circuit = %self.name,
            recovery_timeout_secs = inner.current_recovery_timeout.as_secs(),
            "Extended recovery timeout due to rate limit"
        );
    }

    pub fn reset(&self) {
        let mut inner = self.lock_inner();
        tracing::info!(circuit = %self.name, "Circuit breaker manually reset");
        *inner = CircuitBreakerInner::new(&self.config);
    }

    fn maybe_transition_to_half_open(&self, inner: &mut CircuitBreakerInner) {
        if inner.state == CircuitState::Open
            && let Some(opened_at) = inner.opened_at
            && self.clock.instant().saturating_duration_since(opened_at)
                >= inner.current_recovery_timeout
        {
            tracing::info!(
                circuit = %self.name,
                "Circuit breaker transitioning to half-open state"
            );
            inner.state = CircuitState::HalfOpen;
            inner.success_count = 0;
            inner.trial_in_flight = false;
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Breakers keyed by upstream name, created lazily with a shared config.
#[derive(Clone)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    clock: SharedClock,
    breakers: Arc<Mutex<HashMap<String, CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            breakers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the breaker for `name`, creating it on first use.
    pub fn get(&self, name: &str) -> CircuitBreaker {
        let mut breakers = self.breakers.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned breaker registry mutex");
            poisoned.into_inner()
        });
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                CircuitBreaker::with_clock(name, self.config.clone(), Arc::clone(&self.clock))
            })
            .clone()
    }

    /// Snapshot of every breaker created so far, sorted by name.
    pub fn stats(&self) -> Vec<CircuitBreakerStats> {
        let breakers: Vec<CircuitBreaker> = {
            let guard = self
                .breakers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.values().cloned().collect()
        };
        let mut stats: Vec<_> = breakers.iter().map(CircuitBreaker::stats).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[derive(Debug)]
    struct TestError {
        trips: bool,
        rate_limit: bool,
    }

    impl TestError {
        fn failure() -> Self {
            Self {
                trips: true,
                rate_limit: false,
            }
        }

        fn rate_limited() -> Self {
            Self {
                trips: true,
                rate_limit: true,
            }
        }

        fn harmless() -> Self {
            Self {
                trips: false,
                rate_limit: false,
            }
        }
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error")
        }
    }

    impl TripSignal for TestError {
        fn should_trip_circuit(&self) -> bool {
            self.trips
        }

        fn is_rate_limit(&self) -> bool {
            self.rate_limit
        }
    }

    fn breaker(config: CircuitBreakerConfig) -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::new();
        let cb = CircuitBreaker::with_clock("test", config, Arc::new(clock.clone()));
        (cb, clock)
    }

    #[test]
    fn test_circuit_starts_closed() {
        let cb = CircuitBreaker::new("test", CircuitBreakerConfig::default());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_circuit_opens_after_threshold_failures() {
        let (cb, _clock) = breaker(CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        });

        for _ in 0..3 {
            cb.record_failure(&TestError::failure());
        }

        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.check().is_err());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let (cb, _clock) = breaker(CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        });

        cb.record_failure(&TestError::failure());
        cb.record_failure(&TestError::failure());
        cb.record_success();
        cb.record_failure(&TestError::failure());
        cb.record_failure(&TestError::failure());

        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_failures_outside_window_do_not_accumulate() {
        let (cb, clock) = breaker(CircuitBreakerConfig {
            failure_threshold: 3,
            failure_window: Duration::from_secs(10),
            ..Default::default()
        });

        cb.record_failure(&TestError::failure());
        cb.record_failure(&TestError::failure());
        clock.advance(Duration::from_secs(11));
        cb.record_failure(&TestError::failure());

        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failure_count, 1);
    }

    #[test]
    fn test_cooldown_leads_to_half_open_then_closed() {
        let (cb, clock) = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(30),
            ..Default::default()
        });

        cb.record_failure(&TestError::failure());
        clock.advance(Duration::from_secs(29));
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(1));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_reopens_on_failure() {
        let (cb, clock) = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(5),
            ..Default::default()
        });

        cb.record_failure(&TestError::failure());
        clock.advance(Duration::from_secs(5));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure(&TestError::failure());
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.stats().time_until_half_open, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_rate_limit_extends_recovery_timeout() {
        let (cb, _clock) = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(30),
            rate_limit_backoff_multiplier: 2.0,
            max_recovery_timeout: Duration::from_secs(300),
            ..Default::default()
        });

        cb.record_failure(&TestError::rate_limited());

        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::Open);
        assert_eq!(stats.time_until_half_open, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_rate_limit_backoff_capped_at_max() {
        let (cb, _clock) = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(200),
            rate_limit_backoff_multiplier: 2.0,
            max_recovery_timeout: Duration::from_secs(300),
            ..Default::default()
        });

        cb.record_failure(&TestError::rate_limited());

        assert_eq!(cb.stats().time_until_half_open, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_manual_reset() {
        let (cb, _clock) = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });

        cb.record_failure(&TestError::failure());
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_call_returns_open_error_without_running_operation() {
        let (cb, _clock) = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        cb.record_failure(&TestError::failure());

        let ran = std::sync::atomic::AtomicBool::new(false);
        let result = cb
            .call(|| async {
                ran.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok::<_, TestError>("should not execute")
            })
            .await;

        assert!(matches!(result, Err(CircuitBreakerError::Open { .. })));
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_call_ignores_non_tripping_errors() {
        let (cb, _clock) = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });

        let result = cb
            .call(|| async { Err::<(), _>(TestError::harmless()) })
            .await;

        assert!(matches!(result, Err(CircuitBreakerError::Inner(_))));
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_admits_one_call_at_a_time() {
        let (cb, clock) = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(5),
            ..Default::default()
        });
        cb.record_failure(&TestError::failure());
        clock.advance(Duration::from_secs(5));

        let (release, released) = tokio::sync::oneshot::channel::<()>();
        let trial = {
            let cb = cb.clone();
            tokio::spawn(async move {
                cb.call(move || async move {
                    let _ = released.await;
                    Ok::<_, TestError>("trial")
                })
                .await
                .is_ok()
            })
        };
        while !cb.lock_inner().trial_in_flight {
            tokio::task::yield_now().await;
        }

        let ran = std::sync::atomic::AtomicBool::new(false);
        let second = cb
            .call(|| async {
                ran.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok::<_, TestError>("second")
            })
            .await;
        assert!(matches!(second, Err(CircuitBreakerError::Open { .. })));
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));

        release.send(()).unwrap();
        assert!(trial.await.unwrap());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_dropped_half_open_call_frees_the_slot() {
        let (cb, clock) = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(5),
            ..Default::default()
        });
        cb.record_failure(&TestError::failure());
        clock.advance(Duration::from_secs(5));

        let stalled = cb.call(|| std::future::pending::<Result<(), TestError>>());
        let timed_out = tokio::time::timeout(Duration::from_millis(10), stalled).await;
        assert!(timed_out.is_err());

        let result = cb.call(|| async { Ok::<_, TestError>(()) }).await;
        assert!(result.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_registry_shares_breaker_per_name() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });

        registry.get("bing").record_failure(&TestError::failure());

        assert_eq!(registry.get("bing").state(), CircuitState::Open);
        assert_eq!(registry.get("yahoo").state(), CircuitState::Closed);

        let names: Vec<_> = registry.stats().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["bing", "yahoo"]);
    }
}
