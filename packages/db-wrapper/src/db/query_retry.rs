//! Bounded retry of query execution across dropped connections.
//!
//! One execution moves through `Attempting(1..=max)` and ends either
//! `Succeeded` or `FailedTerminal`. A failure tagged
//! [`DbErrKind::TransientDisconnect`] before the last attempt sleeps
//! `base_delay * 2^attempt` and runs the query again from scratch, unless the
//! caller's state says earlier work cannot be replayed. Anything else is
//! terminal and hands the original error back.

use std::time::Duration;

use futures::future::BoxFuture;
use sea_orm::DbErr;
use tracing::warn;

use crate::infra::db_errors::{classify, requires_rollback, DbErrKind};
use crate::logging::pii::Redacted;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for QueryRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl QueryRetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Sleep before attempt `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Decide what follows a failed attempt.
    pub fn on_failure(&self, attempt: u32, err: &DbErr) -> RetryDecision {
        let kind = classify(err);
        if kind == DbErrKind::TransientDisconnect && attempt < self.max_attempts {
            RetryDecision::Retry {
                delay: self.backoff(attempt),
            }
        } else {
            RetryDecision::Fail {
                kind,
                should_rollback: requires_rollback(err),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    Fail { kind: DbErrKind, should_rollback: bool },
}

/// Terminal outcome of [`retry_query`]: the untouched error plus what the
/// caller must do with its session.
#[derive(Debug)]
pub struct RetryFailure {
    pub error: DbErr,
    pub attempts: u32,
    pub kind: DbErrKind,
    pub should_rollback: bool,
}

/// State threaded through every attempt of one retried execution.
pub trait Replay {
    /// `false` once work that a fresh attempt would lose has been done, so
    /// a transient failure becomes terminal instead of being retried.
    fn can_replay(&self) -> bool {
        true
    }
}

/// Runs `attempt_fn(state, n)` for `n = 1..` under `policy`.
pub async fn retry_query<S, T, F>(
    policy: &QueryRetryPolicy,
    state: &mut S,
    mut attempt_fn: F,
) -> Result<T, RetryFailure>
where
    S: Replay,
    F: for<'s> FnMut(&'s mut S, u32) -> BoxFuture<'s, Result<T, DbErr>>,
{
    let mut attempt = 1;
    loop {
        let err = match attempt_fn(state, attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        let decision = match policy.on_failure(attempt, &err) {
            RetryDecision::Retry { .. } if !state.can_replay() => RetryDecision::Fail {
                kind: classify(&err),
                should_rollback: true,
            },
            decision => decision,
        };
        match decision {
            RetryDecision::Retry { delay } => {
                warn!(
                    raw_error = %Redacted(&err),
                    "query_retry=transient attempt={} max_attempts={} sleep_ms={}",
                    attempt,
                    policy.max_attempts,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            RetryDecision::Fail {
                kind,
                should_rollback,
            } => {
                return Err(RetryFailure {
                    error: err,
                    attempts: attempt,
                    kind,
                    should_rollback,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use sea_orm::RuntimeErr;
    use tokio::time::Instant;

    use super::*;

    fn dropped() -> DbErr {
        DbErr::Conn(RuntimeErr::Internal(
            "server closed the connection unexpectedly".into(),
        ))
    }

    #[derive(Default)]
    struct Attempts {
        seen: Vec<Duration>,
        replayable: bool,
    }

    impl Replay for Attempts {
        fn can_replay(&self) -> bool {
            self.replayable
        }
    }

    fn replayable() -> Attempts {
        Attempts {
            replayable: true,
            ..Attempts::default()
        }
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = QueryRetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
    }

    #[test]
    fn last_attempt_is_terminal_even_when_transient() {
        let policy = QueryRetryPolicy::default();
        assert!(matches!(
            policy.on_failure(2, &dropped()),
            RetryDecision::Retry { .. }
        ));
        assert_eq!(
            policy.on_failure(3, &dropped()),
            RetryDecision::Fail {
                kind: DbErrKind::TransientDisconnect,
                should_rollback: true
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures_with_exponential_sleeps() {
        let policy = QueryRetryPolicy::default();
        let started = Instant::now();
        let max_attempts = policy.max_attempts;
        let mut state = replayable();

        let rows = retry_query(&policy, &mut state, move |state, attempt| {
            Box::pin(async move {
                state.seen.push(Instant::now().duration_since(started));
                if attempt < max_attempts {
                    Err(dropped())
                } else {
                    Ok(vec![1, 2, 3])
                }
            })
        })
        .await
        .unwrap();

        assert_eq!(rows, vec![1, 2, 3]);
        let seen = state.seen;
        assert_eq!(seen.len(), 3);
        // Two sleeps: 2^1 and 2^2 seconds.
        assert!(seen[1] - seen[0] >= Duration::from_secs(2));
        assert!(seen[1] - seen[0] < Duration::from_secs(3));
        assert!(seen[2] - seen[1] >= Duration::from_secs(4));
        assert!(seen[2] - seen[1] < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_attempts_returns_original_error() {
        let policy = QueryRetryPolicy::default();
        let mut state = replayable();

        let failure = retry_query(&policy, &mut state, |state, _| {
            Box::pin(async move {
                state.seen.push(Duration::ZERO);
                Err::<(), _>(dropped())
            })
        })
        .await
        .unwrap_err();

        assert_eq!(state.seen.len(), 3);
        assert_eq!(failure.attempts, 3);
        assert!(failure.should_rollback);
        assert!(failure
            .error
            .to_string()
            .contains("server closed the connection unexpectedly"));
    }

    #[tokio::test]
    async fn statement_errors_run_exactly_once() {
        let policy = QueryRetryPolicy::default();
        let mut state = replayable();

        let failure = retry_query(&policy, &mut state, |state, _| {
            Box::pin(async move {
                state.seen.push(Duration::ZERO);
                Err::<(), _>(DbErr::Custom("invalid input syntax for type uuid".into()))
            })
        })
        .await
        .unwrap_err();

        assert_eq!(state.seen.len(), 1);
        assert_eq!(failure.kind, DbErrKind::Statement);
        assert!(!failure.should_rollback);
    }

    #[tokio::test]
    async fn transient_failure_is_terminal_when_state_cannot_replay() {
        let policy = QueryRetryPolicy::default();
        let mut state = Attempts::default();

        let failure = retry_query(&policy, &mut state, |state, _| {
            Box::pin(async move {
                state.seen.push(Duration::ZERO);
                Err::<(), _>(dropped())
            })
        })
        .await
        .unwrap_err();

        assert_eq!(state.seen.len(), 1);
        assert_eq!(failure.attempts, 1);
        assert_eq!(failure.kind, DbErrKind::TransientDisconnect);
        assert!(failure.should_rollback);
    }
}
