//! Exponential backoff retry

use std::future::Future;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::constants::{
    DEFAULT_INITIAL_INTERVAL, DEFAULT_MAX_ELAPSED_TIME, DEFAULT_MAX_INTERVAL, DEFAULT_MULTIPLIER,
    DEFAULT_RANDOMIZATION_FACTOR,
};

/// Why [`ExponentialBackoff::retry`] gave up
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("retry budget of {budget:?} exhausted after {attempts} attempt(s): {last_error}")]
    Exhausted {
        attempts: u32,
        elapsed: Duration,
        budget: Duration,
        last_error: E,
    },

    #[error("retry cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32, last_error: Option<E> },
}

/// Backoff parameters.
///
/// Intervals start at `initial_interval`, grow by `multiplier` per attempt up
/// to `max_interval`, and are stretched by up to `randomization_factor`.
/// With `max_elapsed_time` set to `None` the policy retries until the
/// operation succeeds or the cancellation token fires.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub randomization_factor: f64,
    pub max_interval: Duration,
    pub max_elapsed_time: Option<Duration>,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            multiplier: DEFAULT_MULTIPLIER,
            randomization_factor: DEFAULT_RANDOMIZATION_FACTOR,
            max_interval: DEFAULT_MAX_INTERVAL,
            max_elapsed_time: Some(DEFAULT_MAX_ELAPSED_TIME),
        }
    }
}

impl ExponentialBackoff {
    /// Same parameters without an elapsed-time ceiling
    pub fn unbounded(mut self) -> Self {
        self.max_elapsed_time = None;
        self
    }

    /// Infinite sequence of wait intervals, never decreasing
    pub fn intervals(&self) -> Intervals<'_> {
        Intervals {
            policy: self,
            current: self.initial_interval.min(self.max_interval),
            last: Duration::ZERO,
        }
    }

    pub async fn retry<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.retry_notify(cancel, operation, |_, _| {}).await
    }

    /// Like [`retry`](Self::retry), calling `notify` with each failure and the
    /// wait that follows it
    pub async fn retry_notify<T, E, F, Fut, N>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
        mut notify: N,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        N: FnMut(&E, Duration),
    {
        let start = Instant::now();
        let mut intervals = self.intervals();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(RetryError::Cancelled { attempts, last_error: None });
                }
                result = operation() => result,
            };

            let last_error = match result {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            // Checked after every attempt, so exhaustion lands at most one
            // wait (plus one attempt) past the budget
            if let Some(budget) = self.max_elapsed_time {
                let elapsed = start.elapsed();
                if elapsed >= budget {
                    return Err(RetryError::Exhausted {
                        attempts,
                        elapsed,
                        budget,
                        last_error,
                    });
                }
            }

            let delay = intervals.next().unwrap_or(self.max_interval);

            notify(&last_error, delay);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(RetryError::Cancelled {
                        attempts,
                        last_error: Some(last_error),
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Iterator returned by [`ExponentialBackoff::intervals`]
#[derive(Debug)]
pub struct Intervals<'a> {
    policy: &'a ExponentialBackoff,
    current: Duration,
    last: Duration,
}

impl Iterator for Intervals<'_> {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let max = self.policy.max_interval;
        let base = self.current;

        let jittered = if self.policy.randomization_factor > 0.0 {
            let jitter = fastrand::f64() * self.policy.randomization_factor;
            scale(base, 1.0 + jitter, max)
        } else {
            base
        };

        let delay = jittered.min(max).max(self.last);
        self.last = delay;
        self.current = scale(base, self.policy.multiplier, max);
        Some(delay)
    }
}

/// `duration * factor`, saturating at `ceiling`
fn scale(duration: Duration, factor: f64, ceiling: Duration) -> Duration {
    Duration::try_from_secs_f64(duration.as_secs_f64() * factor)
        .map(|d| d.min(ceiling))
        .unwrap_or(ceiling)
}
