// =============================================================================
// Retry Policy — classified exponential back-off with jitter
// =============================================================================
//
// The policy never inspects raw errors: it pattern-matches on the
// `ExchangeError` taxonomy. Non-retryable kinds (authentication,
// insufficient funds, parameter-invalid orders, unsupported exchange)
// surface on the first occurrence; everything else is re-attempted up to
// `max_retries` additional times.
//
// Delay for attempt n (0-based): `min(base * 2^n, max_delay)` when
// exponential, else `base`, multiplied by a jitter factor drawn uniformly
// from `[1 - jitter, 1 + jitter]`. A venue-provided Retry-After overrides
// the computed delay for rate-limit errors.
// =============================================================================

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::errors::{ExchangeError, ExchangeResult};

/// Back-off parameters for one connector. Immutable after construction.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential: bool,
    pub jitter_factor: f64,
}

impl RetryPolicy {
    pub fn new(
        max_retries: u32,
        base_delay: Duration,
        max_delay: Duration,
        exponential: bool,
        jitter_factor: f64,
    ) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            exponential,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
        }
    }

    /// 3 retries, 1 s base, 30 s cap, exponential, 0.1 jitter.
    pub fn default_policy() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(30), true, 0.1)
    }

    /// 5 retries, 500 ms base, 60 s cap, exponential, 0.2 jitter.
    pub fn aggressive() -> Self {
        Self::new(
            5,
            Duration::from_millis(500),
            Duration::from_secs(60),
            true,
            0.2,
        )
    }

    /// 2 retries, 2 s base, 15 s cap, exponential, 0.1 jitter.
    pub fn conservative() -> Self {
        Self::new(2, Duration::from_secs(2), Duration::from_secs(15), true, 0.1)
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO, false, 0.0)
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.exponential,
            config.jitter_factor,
        )
    }

    /// Back-off delay for the given 0-based attempt index, jitter applied.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = if self.exponential {
            let factor = 2_u64.saturating_pow(attempt.min(32));
            self.base_delay
                .saturating_mul(factor.min(u64::from(u32::MAX)) as u32)
                .min(self.max_delay)
        } else {
            self.base_delay
        };

        if self.jitter_factor == 0.0 {
            return base;
        }
        let jitter = rand::thread_rng()
            .gen_range((1.0 - self.jitter_factor)..=(1.0 + self.jitter_factor));
        Duration::from_secs_f64((base.as_secs_f64() * jitter).max(0.0))
    }

    /// Run `op` up to `max_retries + 1` times. `op` is a factory so each
    /// attempt gets a fresh future. Non-retryable errors surface
    /// immediately; a rate-limit `retry_after` hint takes precedence over
    /// the computed back-off.
    pub async fn execute<T, F, Fut>(&self, op: F) -> ExchangeResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ExchangeResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempt = attempt + 1, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_retryable() => {
                    debug!(error = %err, "non-retryable error, surfacing immediately");
                    return Err(err);
                }
                Err(err) if attempt >= self.max_retries => {
                    warn!(
                        attempts = attempt + 1,
                        error = %err,
                        "retries exhausted"
                    );
                    return Err(err);
                }
                Err(err) => {
                    let delay = err
                        .retry_after()
                        .unwrap_or_else(|| self.delay_for_attempt(attempt));
                    debug!(
                        attempt = attempt + 1,
                        ?delay,
                        error = %err,
                        "retryable error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::default_policy()
    }
}
