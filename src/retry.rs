use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::error::{ConfigError, TransportError};
use crate::telemetry::metric_inc;
use crate::transport::{PublishRequest, Transport, TransportResponse};

#[cfg(feature = "tracing")]
fn trace_retry(attempt: u32, delay: Duration, result: &Result<TransportResponse, TransportError>) {
    let delay_ms = delay.as_millis() as u64;
    match result {
        Ok(response) => tracing::debug!(
            attempt,
            status = response.status.as_u16(),
            delay_ms,
            "publish attempt rejected, backing off"
        ),
        Err(err) => tracing::debug!(
            attempt,
            error = %err,
            delay_ms,
            "publish attempt failed, backing off"
        ),
    }
}

#[cfg(not(feature = "tracing"))]
fn trace_retry(_attempt: u32, _delay: Duration, _result: &Result<TransportResponse, TransportError>) {}

/// Exponential backoff bounds plus the number of retries after the first
/// attempt.
///
/// Invariant: `1ms <= min <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    min: Duration,
    max: Duration,
    retries: u32,
}

impl BackoffPolicy {
    pub fn new(min: Duration, max: Duration, retries: u32) -> Result<Self, ConfigError> {
        if min < Duration::from_millis(1) || max < Duration::from_millis(1) {
            return Err(ConfigError::BackoffTooShort);
        }
        if min > max {
            return Err(ConfigError::BackoffRange);
        }
        Ok(Self { min, max, retries })
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Total attempts including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    ///
    /// Starts at `min`, doubles per attempt and clamps at `max`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let mut delay = self.min;
        for _ in 1..attempt {
            delay = match delay.checked_mul(2) {
                Some(next) if next < self.max => next,
                _ => return self.max,
            };
        }
        delay.min(self.max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(200),
            max: Duration::from_secs(1),
            retries: 5,
        }
    }
}

/// Wraps a [`Transport`] with bounded retries.
///
/// A send is retried when it fails or the status is outside 2xx. Once the
/// attempts are exhausted the last error or the last non-2xx response is
/// returned untouched. Dropping the returned future cancels any pending sleep.
#[derive(Debug, Clone)]
pub struct RetryingTransport<T> {
    inner: T,
    policy: BackoffPolicy,
}

impl<T: Transport> RetryingTransport<T> {
    pub fn new(inner: T, policy: BackoffPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: Transport> Transport for RetryingTransport<T> {
    async fn send(&self, request: &PublishRequest) -> Result<TransportResponse, TransportError> {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 1;

        loop {
            let result = self.inner.send(request).await;
            let success = matches!(&result, Ok(response) if response.status.is_success());
            if success || attempt >= max_attempts {
                return result;
            }

            let delay = self.policy.delay_for_attempt(attempt);
            metric_inc("qstash.publish.retry");
            trace_retry(attempt, delay, &result);

            sleep(delay).await;
            attempt += 1;
        }
    }
}
