//! Transport retry policy and deadlines.
//!
//! Only transient gateway failures (unavailable, timed out) are retried
//! here. Conflicts and missing entities are protocol outcomes handled by the
//! mutation engine, and everything else is surfaced as is.

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::gateway::GatewayError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Delay schedule between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `base * 2^attempt`, capped at `max`, plus up to `base` of jitter
    Exponential {
        base: Duration,
        max: Duration,
        jitter: bool,
    },
}

impl Backoff {
    /// Delay before retry number `attempt` (starting at 1).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential { base, max, jitter } => {
                let exponential = base.saturating_mul(1u32 << attempt.min(16));
                let capped = exponential.min(*max);
                if *jitter && !base.is_zero() {
                    let extra = rand::thread_rng().gen_range(0..=base.as_millis() as u64);
                    capped + Duration::from_millis(extra)
                } else {
                    capped
                }
            }
        }
    }
}

/// Bounded retry of transient transport failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub backoff: Backoff,
    /// Upper bound for a single attempt
    pub attempt_timeout: Option<Duration>,
}

impl RetryPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: Backoff::Fixed(config.retry_delay),
            attempt_timeout: Some(config.timeout),
        }
    }

    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            backoff: Backoff::Fixed(Duration::ZERO),
            attempt_timeout: None,
        }
    }
}

/// Point in time after which a call sequence must stop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No overall deadline; only per-call timeouts apply.
    pub fn none() -> Self {
        Self(None)
    }

    pub fn after(duration: Duration) -> Self {
        Self(Some(Instant::now() + duration))
    }

    pub fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    pub fn expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// The tighter of the remaining time and `limit`.
    pub fn bound(&self, limit: Option<Duration>) -> Option<Duration> {
        match (self.remaining(), limit) {
            (Some(left), Some(limit)) => Some(left.min(limit)),
            (left, limit) => left.or(limit),
        }
    }

    /// Sleep for `duration`, waking early at the deadline.
    ///
    /// Returns `false` when the deadline cut the sleep short.
    pub async fn sleep(&self, duration: Duration) -> bool {
        match self.remaining() {
            Some(left) if left <= duration => {
                tokio::time::sleep(left).await;
                false
            }
            _ => {
                tokio::time::sleep(duration).await;
                true
            }
        }
    }
}

/// Run `call` under `policy`, bounded by `deadline`.
///
/// Non-transient gateway errors are returned after the first attempt. A
/// transient error that outlives the policy becomes
/// [`ClientError::TransportFailure`].
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    deadline: Deadline,
    operation: &'static str,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, GatewayError>>,
{
    let mut retries = 0u32;

    loop {
        if deadline.expired() {
            return Err(ClientError::DeadlineExceeded { operation });
        }

        let outcome = match deadline.bound(policy.attempt_timeout) {
            Some(limit) => match tokio::time::timeout(limit, call()).await {
                Ok(outcome) => outcome,
                Err(_) if deadline.expired() => {
                    return Err(ClientError::DeadlineExceeded { operation })
                }
                Err(_) => Err(GatewayError::Timeout(format!(
                    "{operation} took longer than {limit:?}"
                ))),
            },
            None => call().await,
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && retries < policy.max_retries => {
                retries += 1;
                let delay = policy.backoff.delay(retries);
                tracing::debug!(operation, attempt = retries, error = %err, ?delay, "Transient gateway failure, retrying");
                if !deadline.sleep(delay).await {
                    return Err(ClientError::DeadlineExceeded { operation });
                }
            }
            Err(err) if err.is_transient() => {
                return Err(ClientError::TransportFailure {
                    attempts: retries + 1,
                    source: err,
                })
            }
            Err(err) => return Err(err.into()),
        }
    }
}
