use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use stratum_core::{BreakerSettings, Result, StratumError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - requests allowed
    Closed,
    /// Testing if the layer recovered - probe requests allowed
    HalfOpen,
    /// Failing - requests blocked until the reset window elapses
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::HalfOpen => write!(f, "half_open"),
            CircuitState::Open => write!(f, "open"),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    last_failure_at: Option<Instant>,
    next_attempt_at: Option<Instant>,
}

/// Point-in-time view of one breaker, for health reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub layer: String,
    pub state: CircuitState,
    pub failure_count: u32,
}

/// Per-layer failure tracker gating whether an operation is attempted at all.
///
/// Transition table:
/// - Closed, failure count reaches threshold -> Open
/// - Open, reset timeout elapsed on next acquire -> HalfOpen (one window)
/// - HalfOpen, `half_open_success_threshold` consecutive successes -> Closed
/// - HalfOpen, any failure -> Open
pub struct CircuitBreaker {
    layer: String,
    config: BreakerSettings,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(layer: impl Into<String>, config: BreakerSettings) -> Self {
        Self {
            layer: layer.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                last_failure_at: None,
                next_attempt_at: None,
            }),
        }
    }

    pub fn layer(&self) -> &str {
        &self.layer
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            layer: self.layer.clone(),
            state: inner.state,
            failure_count: inner.consecutive_failures,
        }
    }

    /// Gate a call. While Open, fails fast with `CircuitOpen` until the reset
    /// window elapses, at which point the breaker moves to HalfOpen and lets
    /// the probe through without incurring any layer cost for blocked calls.
    pub fn try_acquire(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let now = Instant::now();
                match inner.next_attempt_at {
                    Some(at) if now >= at => {
                        info!(layer = %self.layer, "circuit breaker: open -> half-open");
                        inner.state = CircuitState::HalfOpen;
                        inner.half_open_successes = 0;
                        Ok(())
                    }
                    Some(at) => Err(StratumError::CircuitOpen {
                        layer: self.layer.clone(),
                        retry_after: at.saturating_duration_since(now),
                    }),
                    // Open without a deadline should not happen; allow a probe
                    // rather than wedging the layer shut.
                    None => {
                        inner.state = CircuitState::HalfOpen;
                        inner.half_open_successes = 0;
                        Ok(())
                    }
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_success_threshold {
                    info!(layer = %self.layer, "circuit breaker: half-open -> closed");
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.half_open_successes = 0;
                    inner.next_attempt_at = None;
                }
            }
            CircuitState::Open => {
                debug!(layer = %self.layer, "success recorded while open, ignoring");
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.consecutive_failures += 1;
        inner.last_failure_at = Some(now);
        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        layer = %self.layer,
                        failures = inner.consecutive_failures,
                        "circuit breaker: closed -> open"
                    );
                    inner.state = CircuitState::Open;
                    inner.next_attempt_at = Some(now + self.config.reset_timeout());
                }
            }
            CircuitState::HalfOpen => {
                warn!(layer = %self.layer, "circuit breaker: half-open -> open (probe failed)");
                inner.state = CircuitState::Open;
                inner.half_open_successes = 0;
                inner.next_attempt_at = Some(now + self.config.reset_timeout());
            }
            CircuitState::Open => {}
        }
    }

    /// Administrative reset to the initial state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.half_open_successes = 0;
        inner.last_failure_at = None;
        inner.next_attempt_at = None;
    }

    /// Run `op` behind the breaker. Validation errors pass through without
    /// tripping the failure counter; they say nothing about layer health.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.try_acquire()?;
        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                if err.is_retryable() {
                    self.record_failure();
                }
                Err(err)
            }
        }
    }
}

/// Process-wide map of breakers, one per layer name. Lifecycle is the process
/// lifetime; reset only via explicit administrative action.
pub struct BreakerRegistry {
    config: BreakerSettings,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerSettings) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn get_or_create(&self, layer: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(layer.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(layer, self.config.clone())))
            .clone()
    }

    pub fn get(&self, layer: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(layer).map(|b| b.clone())
    }

    pub fn snapshot_all(&self) -> Vec<BreakerSnapshot> {
        self.breakers.iter().map(|b| b.snapshot()).collect()
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.iter() {
            breaker.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(threshold: u32, reset_ms: u64, half_open: u32) -> BreakerSettings {
        BreakerSettings {
            failure_threshold: threshold,
            reset_timeout_ms: reset_ms,
            half_open_success_threshold: half_open,
        }
    }

    fn unavailable() -> StratumError {
        StratumError::LayerUnavailable {
            layer: "test".into(),
            reason: "down".into(),
        }
    }

    #[test]
    fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new("test", settings(5, 60_000, 3));
        for _ in 0..4 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(matches!(
            cb.try_acquire().unwrap_err(),
            StratumError::CircuitOpen { .. }
        ));
    }

    #[test]
    fn success_resets_failure_count_while_closed() {
        let cb = CircuitBreaker::new("test", settings(5, 60_000, 3));
        for _ in 0..4 {
            cb.record_failure();
        }
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn open_fast_fails_without_attempting_the_call() {
        let cb = CircuitBreaker::new("test", settings(1, 60_000, 1));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        let mut attempted = false;
        let result: Result<()> = cb
            .execute(|| {
                attempted = true;
                async { Ok(()) }
            })
            .await;
        assert!(matches!(
            result.unwrap_err(),
            StratumError::CircuitOpen { .. }
        ));
        assert!(!attempted);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_allowed_after_reset_timeout() {
        let cb = CircuitBreaker::new("test", settings(1, 1000, 2));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert!(cb.try_acquire().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_closes_after_consecutive_successes() {
        let cb = CircuitBreaker::new("test", settings(1, 1000, 3));
        cb.record_failure();
        tokio::time::advance(Duration::from_millis(1001)).await;
        cb.try_acquire().unwrap();

        cb.record_success();
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens_immediately() {
        let cb = CircuitBreaker::new("test", settings(1, 1000, 3));
        cb.record_failure();
        tokio::time::advance(Duration::from_millis(1001)).await;
        cb.try_acquire().unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.try_acquire().is_err());
    }

    #[tokio::test]
    async fn validation_errors_do_not_trip_the_breaker() {
        let cb = CircuitBreaker::new("test", settings(1, 60_000, 1));
        let result: Result<()> = cb
            .execute(|| async { Err(StratumError::Validation("bad".into())) })
            .await;
        assert!(result.is_err());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[tokio::test]
    async fn execute_records_retryable_failures() {
        let cb = CircuitBreaker::new("test", settings(2, 60_000, 1));
        for _ in 0..2 {
            let _: Result<()> = cb.execute(|| async { Err(unavailable()) }).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn registry_returns_same_breaker_per_layer() {
        let registry = BreakerRegistry::new(settings(5, 60_000, 3));
        let a = registry.get_or_create("fast-search");
        let b = registry.get_or_create("fast-search");
        assert!(Arc::ptr_eq(&a, &b));
        a.record_failure();
        assert_eq!(registry.get("fast-search").unwrap().failure_count(), 1);
    }

    #[test]
    fn registry_reset_all_closes_everything() {
        let registry = BreakerRegistry::new(settings(1, 60_000, 1));
        registry.get_or_create("a").record_failure();
        registry.get_or_create("b").record_failure();
        registry.reset_all();
        for snap in registry.snapshot_all() {
            assert_eq!(snap.state, CircuitState::Closed);
            assert_eq!(snap.failure_count, 0);
        }
    }
}
