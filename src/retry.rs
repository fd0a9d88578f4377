//! Bounded retry with linear backoff and per-attempt timeouts.
//!
//! [`RetryPolicy::run`] drives an async operation until it succeeds, fails
//! with an error the classifier calls definitive, or runs out of attempts.
//! Each attempt is wrapped in [`tokio::time::timeout`]; a timed-out attempt's
//! future is dropped, which cancels whatever I/O it had in flight.
//!
//! Timeouts always count as transient. Before retry `n` (1-based) the policy
//! sleeps `n × base_delay`. When an overall cap is set, neither an attempt
//! nor a backoff sleep may run past it.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::DispatchConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub attempt_timeout: Duration,
    pub overall_timeout: Option<Duration>,
}

/// Why an individual attempt did not produce a value.
#[derive(Debug)]
pub enum AttemptError<E> {
    TimedOut(Duration),
    Failed(E),
}

impl<E> AttemptError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut(_))
    }
}

/// Final result of [`RetryPolicy::run`] with bookkeeping.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, AttemptError<E>>,
    /// Number of attempts actually started (≥ 1).
    pub attempts: u32,
    pub elapsed: Duration,
}

impl<T, E> RetryOutcome<T, E> {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

impl RetryPolicy {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_backoff_ms),
            attempt_timeout: config.attempt_timeout(),
            overall_timeout: config.overall_timeout_ms.map(Duration::from_millis),
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(retry)
    }

    pub async fn run<T, E, F, Fut, C>(&self, mut op: F, is_transient: C) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
    {
        let started = Instant::now();
        let deadline = self.overall_timeout.map(|d| started + d);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let budget = match deadline {
                Some(deadline) => self
                    .attempt_timeout
                    .min(deadline.saturating_duration_since(Instant::now())),
                None => self.attempt_timeout,
            };

            let err = match tokio::time::timeout(budget, op(attempt)).await {
                Ok(Ok(value)) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                        elapsed: started.elapsed(),
                    }
                }
                Ok(Err(e)) => AttemptError::Failed(e),
                Err(_) => AttemptError::TimedOut(budget),
            };

            let transient = match &err {
                AttemptError::TimedOut(_) => true,
                AttemptError::Failed(e) => is_transient(e),
            };

            if !transient || attempt > self.max_retries {
                return RetryOutcome {
                    result: Err(err),
                    attempts: attempt,
                    elapsed: started.elapsed(),
                };
            }

            let delay = self.backoff(attempt);
            if let Some(deadline) = deadline {
                if Instant::now() + delay >= deadline {
                    tracing::debug!(attempt, "retry budget exhausted before backoff");
                    return RetryOutcome {
                        result: Err(err),
                        attempts: attempt,
                        elapsed: started.elapsed(),
                    };
                }
            }

            tracing::warn!(
                attempt,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                timed_out = err.is_timeout(),
                "transient upstream failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
