//! Retry policy for rate-limited and flaky page requests.
//!
//! The policy itself is a pure function of (attempt, previous delay, signal,
//! jitter sample); [`fetch_with_backoff`] adds the sleep.

use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::monitor::{Monitor, PageQuery};
use crate::{Error, Result};

/// Jitter factor range applied to each doubled delay.
pub const JITTER_RANGE: (f64, f64) = (0.75, 1.25);

/// How a failed attempt should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// HTTP 429, with the server's `Retry-After` if it sent one.
    RateLimited { retry_after: Option<Duration> },
    /// Timeouts, connection failures and 5xx responses.
    Transient,
    /// Anything retrying won't fix.
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry(Duration),
    GiveUp,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    /// Decides what follows a failure.
    ///
    /// `retries` is the number of retries already spent on this request,
    /// `previous` the last delay slept (or `base_delay` before the first retry)
    /// and `jitter` a sample from [`JITTER_RANGE`].
    pub fn decide(&self, retries: u32, previous: Duration, signal: Signal, jitter: f64) -> Decision {
        if signal == Signal::Fatal {
            return Decision::Fatal;
        }
        if retries >= self.max_retries {
            return Decision::GiveUp;
        }
        match signal {
            Signal::RateLimited {
                retry_after: Some(hint),
            } => Decision::Retry(hint),
            _ => Decision::Retry(self.grow(previous, jitter)),
        }
    }

    /// `min(max_delay, previous * 2 * jitter)`
    pub fn grow(&self, previous: Duration, jitter: f64) -> Duration {
        let jitter = jitter.clamp(JITTER_RANGE.0, JITTER_RANGE.1);
        let grown = previous.as_secs_f64() * 2.0 * jitter;
        if grown >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(grown)
        }
    }
}

pub fn sample_jitter() -> f64 {
    rand::rng().random_range(JITTER_RANGE.0..=JITTER_RANGE.1)
}

/// Fetches one page, retrying under `policy`. The delay state lives only for
/// this call, so every page starts again from `base_delay`. Rate limiting and
/// transient failures share that state, so a mix of them keeps compounding.
pub async fn fetch_with_backoff<M: Monitor + ?Sized>(
    monitor: &M,
    query: &PageQuery,
    policy: &BackoffPolicy,
) -> Result<String> {
    fetch_with_jitter(monitor, query, policy, sample_jitter).await
}

/// [`fetch_with_backoff`] with the jitter source supplied by the caller.
pub async fn fetch_with_jitter<M, J>(
    monitor: &M,
    query: &PageQuery,
    policy: &BackoffPolicy,
    mut jitter: J,
) -> Result<String>
where
    M: Monitor + ?Sized,
    J: FnMut() -> f64,
{
    let mut retries = 0;
    let mut delay = policy.base_delay;

    loop {
        let err = match monitor.fetch(query).await {
            Ok(raw) => return Ok(raw),
            Err(e) => e,
        };

        let signal = err.signal();
        match policy.decide(retries, delay, signal, jitter()) {
            Decision::Retry(next) => {
                retries += 1;
                warn!(
                    monitor = monitor.name(),
                    page = query.page,
                    attempt = retries,
                    max_retries = policy.max_retries,
                    delay_ms = next.as_millis() as u64,
                    error = %err,
                    "request failed, backing off"
                );
                tokio::time::sleep(next).await;
                delay = next;
            }
            Decision::GiveUp => {
                return Err(Error::RetriesExhausted {
                    page: query.page,
                    attempts: retries,
                    last: err.to_string(),
                })
            }
            Decision::Fatal => return Err(err.into()),
        }
    }
}
