use std::future::Future;
use std::time::Duration;
use stratum_core::{Result, RetrySettings, StratumError};
use tracing::debug;

/// Exponential backoff with optional jitter around a single operation.
///
/// Never retries validation errors (caller bugs) or `CircuitOpen` (the
/// breaker already fast-fails; retrying would be pointless).
#[derive(Debug, Clone)]
pub struct RetryHandler {
    settings: RetrySettings,
}

impl RetryHandler {
    pub fn new(settings: RetrySettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    /// Delay before retrying after attempt `attempt` (0-indexed):
    /// `min(base * multiplier^attempt, max)`, scaled by a uniform factor in
    /// [0.5, 1.0] when jitter is enabled so simultaneous failures don't
    /// thunder back in lockstep.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.settings.base_delay_ms as f64;
        let max_ms = self.settings.max_delay_ms as f64;
        let raw = (base_ms * self.settings.backoff_multiplier.powi(attempt as i32)).min(max_ms);
        let scaled = if self.settings.jitter {
            raw * (0.5 + 0.5 * fastrand::f64())
        } else {
            raw
        };
        Duration::from_millis(scaled.round() as u64)
    }

    /// Run `op` with up to `max_attempts` tries.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with(op, |_| true).await
    }

    /// Like [`execute`](Self::execute), with a caller predicate that can veto
    /// a retry for errors that are nominally transient.
    pub async fn execute_with<T, F, Fut, P>(&self, mut op: F, should_retry: P) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&StratumError) -> bool,
    {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut last_err = None;

        for attempt in 0..max_attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let last_attempt = attempt + 1 == max_attempts;
                    if last_attempt || !err.is_retryable() || !should_retry(&err) {
                        return Err(err);
                    }
                    let delay = self.delay_for(attempt);
                    debug!(attempt, ?delay, error = %err, "retrying after backoff");
                    last_err = Some(err);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        // Unreachable: the loop always returns on the last attempt.
        Err(last_err.unwrap_or_else(|| StratumError::Validation("retry loop exhausted".into())))
    }
}
