//! Fixed-delay retry for establishing connections.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

/// Jittered backoff bounds, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Jitter {
    pub base: f64,
    pub min: f64,
    pub max: f64,
}

impl Default for Jitter {
    fn default() -> Self {
        Self {
            base: 4.0,
            min: 2.0,
            max: 12.0,
        }
    }
}

/// Random delay between `min` and `min(max, base * 2^attempt)`.
///
/// Later attempts draw from a wider window so that many clients retrying at
/// once spread out.
pub fn jitter_delay(attempt: u32, jitter: &Jitter) -> Duration {
    let ceiling = (jitter.base * 2f64.powi(attempt as i32)).min(jitter.max);
    let secs = if ceiling <= jitter.min {
        jitter.min
    } else {
        rand::rng().random_range(jitter.min..=ceiling)
    };
    Duration::from_secs_f64(secs.max(0.0))
}

/// Retry policy for connection attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConnection {
    pub retry_count: u32,
    pub delay: Duration,
    pub jitter: Option<Jitter>,
}

impl Default for RetryConnection {
    fn default() -> Self {
        Self {
            retry_count: 3,
            delay: Duration::from_secs(5),
            jitter: None,
        }
    }
}

impl RetryConnection {
    pub fn new(retry_count: u32, delay: Duration) -> Self {
        Self {
            retry_count,
            delay,
            jitter: None,
        }
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = Some(jitter);
        self
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        match &self.jitter {
            Some(jitter) => jitter_delay(attempt, jitter),
            None => self.delay,
        }
    }

    /// Run `connect_fn` until it succeeds or `retry_count` attempts fail.
    ///
    /// Exhausting the attempts yields `None` rather than an error; callers
    /// treat a missing value as a connection failure.
    pub async fn run<T, E, F, Fut>(&self, mut connect_fn: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.retry_count.max(1);
        for attempt in 1..=max_attempts {
            match connect_fn().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!("connection_retry=success attempts={}", attempt);
                    }
                    return Some(value);
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        "connection_retry=failed attempt={} max_attempts={}",
                        attempt, max_attempts
                    );
                    if attempt < max_attempts {
                        tokio::time::sleep(self.delay_for(attempt)).await;
                    }
                }
            }
        }
        None
    }
}
