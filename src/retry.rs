//! Deadline-bounded retry for calls made through an endpoint handle.
//!
//! A call is retried while it keeps failing with a transient error and the
//! retry budget has not run out. The delay between attempts is constant.
//! When the budget is spent, the last transient error is returned as is.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::error::{Classify, ErrorClass};

/// Default wall-clock budget for all attempts of one call.
pub const DEFAULT_MAX_RETRY_DURATION: Duration = Duration::from_secs(30);

/// Default pause between two attempts.
pub const DEFAULT_BACKOFF_DELAY: Duration = Duration::from_secs(1);

/// Budget and backoff applied to every call made through a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retry_duration: Duration,
    pub backoff_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retry_duration: DEFAULT_MAX_RETRY_DURATION,
            backoff_delay: DEFAULT_BACKOFF_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retry_duration: Duration, backoff_delay: Duration) -> Self {
        Self {
            max_retry_duration,
            backoff_delay,
        }
    }

    /// A policy that never retries: the first transient error is returned.
    pub fn no_retry() -> Self {
        Self {
            max_retry_duration: Duration::ZERO,
            backoff_delay: Duration::ZERO,
        }
    }
}

/// Runs `operation` until it succeeds, fails fatally, or the budget in
/// `policy` is exhausted.
///
/// The budget is checked after each failed attempt, so the total time spent
/// may exceed `max_retry_duration` by up to one attempt plus one backoff.
pub async fn with_deadline_retry<F, Fut, T, E>(
    endpoint: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + std::fmt::Display,
{
    let start = Instant::now();
    let mut attempt: u32 = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(endpoint, attempt, "call succeeded after retries");
                }
                return Ok(value);
            }
            Err(e) if e.error_class() == ErrorClass::Fatal => {
                error!(
                    endpoint,
                    attempt,
                    error_kind = e.kind(),
                    "[RPC: {}] non-retryable error: {}",
                    endpoint,
                    e
                );
                return Err(e);
            }
            Err(e) => {
                let elapsed = start.elapsed();
                let Some(remaining) = policy
                    .max_retry_duration
                    .checked_sub(elapsed)
                    .filter(|r| !r.is_zero())
                else {
                    error!(
                        endpoint,
                        attempt,
                        error_kind = e.kind(),
                        "[RPC: {}] retry budget of {:?} exhausted after {} attempts: {}",
                        endpoint,
                        policy.max_retry_duration,
                        attempt,
                        e
                    );
                    return Err(e);
                };

                warn!(
                    endpoint,
                    attempt,
                    error_kind = e.kind(),
                    remaining_ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
                    "[RPC: {}] attempt #{} failed: {}. Retrying, time left: {:.1}s",
                    endpoint,
                    attempt,
                    e,
                    remaining.as_secs_f64()
                );
                tokio::time::sleep(policy.backoff_delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcError;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing::field::{Field, Visit};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    const ENDPOINT: &str = "http://node.test:8545";

    /// Paused-clock timers fire on millisecond ticks.
    fn assert_about(actual: Duration, expected: Duration) {
        assert!(
            actual >= expected && actual < expected + Duration::from_millis(10),
            "expected about {:?}, got {:?}",
            expected,
            actual
        );
    }

    /// One event emitted by this module, with its fields rendered as text.
    #[derive(Debug)]
    struct LoggedEvent {
        level: Level,
        fields: HashMap<&'static str, String>,
    }

    #[derive(Clone, Default)]
    struct EventLog(Arc<Mutex<Vec<LoggedEvent>>>);

    impl EventLog {
        fn take(&self) -> Vec<LoggedEvent> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    struct FieldText<'a>(&'a mut HashMap<&'static str, String>);

    impl Visit for FieldText<'_> {
        fn record_str(&mut self, field: &Field, value: &str) {
            self.0.insert(field.name(), value.to_string());
        }

        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            self.0.insert(field.name(), format!("{:?}", value));
        }
    }

    impl<S: Subscriber> Layer<S> for EventLog {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if event.metadata().target() != "rpc_adapter::retry" {
                return;
            }
            let mut fields = HashMap::new();
            event.record(&mut FieldText(&mut fields));
            self.0.lock().unwrap().push(LoggedEvent {
                level: *event.metadata().level(),
                fields,
            });
        }
    }

    /// Routes this thread's events to the returned log until the guard drops.
    fn capture_events() -> (EventLog, tracing::subscriber::DefaultGuard) {
        let log = EventLog::default();
        let subscriber = tracing_subscriber::registry().with(log.clone());
        (log, tracing::subscriber::set_default(subscriber))
    }

    fn policy(budget_secs: u64, backoff_secs: u64) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(budget_secs),
            Duration::from_secs(backoff_secs),
        )
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retry_duration, Duration::from_secs(30));
        assert_eq!(policy.backoff_delay, Duration::from_secs(1));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_success_first_attempt_adds_no_delay() {
        let start = Instant::now();
        let result =
            with_deadline_retry(ENDPOINT, &policy(30, 1), || async { Ok::<_, RpcError>(42) })
                .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_fatal_error_short_circuits() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let result = with_deadline_retry(ENDPOINT, &policy(30, 1), || {
            let attempts = Arc::clone(&attempts_clone);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(RpcError::Rpc {
                    code: -32601,
                    message: "method not found".into(),
                })
            }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(
            result.unwrap_err(),
            RpcError::Rpc {
                code: -32601,
                message: "method not found".into(),
            }
        );
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_eventual_success_on_third_attempt() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let result = with_deadline_retry(ENDPOINT, &policy(30, 1), || {
            let attempts = Arc::clone(&attempts_clone);
            async move {
                let count = attempts.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err(RpcError::BlockNotFound("0x64".into()))
                } else {
                    Ok("block")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "block");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_budget_exhaustion_returns_fourth_error() {
        // budget 3s, backoff 1s: attempts at 0s, 1s, 2s and 3s
        let start = Instant::now();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let result = with_deadline_retry(ENDPOINT, &policy(3, 1), || {
            let seen = Arc::clone(&seen_clone);
            async move {
                let mut seen = seen.lock().unwrap();
                seen.push(start.elapsed());
                Err::<(), _>(RpcError::Connection(format!(
                    "connection refused (attempt {})",
                    seen.len()
                )))
            }
        })
        .await;

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 4);
        for (i, at) in seen.iter().enumerate() {
            assert_about(*at, Duration::from_secs(i as u64));
        }
        assert_eq!(
            result.unwrap_err(),
            RpcError::Connection("connection refused (attempt 4)".into())
        );
        assert_about(start.elapsed(), Duration::from_secs(3));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_retry_bound_matches_budget_over_backoff() {
        for (budget, backoff) in [(10u64, 1u64), (10, 3), (5, 2)] {
            let start = Instant::now();
            let attempts = Arc::new(AtomicUsize::new(0));
            let attempts_clone = Arc::clone(&attempts);

            let result = with_deadline_retry(ENDPOINT, &policy(budget, backoff), || {
                let attempts = Arc::clone(&attempts_clone);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(RpcError::Timeout("10s".into()))
                }
            })
            .await;

            assert!(result.is_err());
            let expected = (budget / backoff + 1) as usize;
            let made = attempts.load(Ordering::SeqCst);
            assert!(
                made.abs_diff(expected) <= 1,
                "budget={} backoff={}: {} attempts, expected about {}",
                budget,
                backoff,
                made,
                expected
            );
            let elapsed = start.elapsed();
            assert!(elapsed >= Duration::from_secs(budget));
            assert!(elapsed < Duration::from_secs(budget + backoff) + Duration::from_millis(10));
        }
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_last_error_fidelity() {
        // E1 while budget remains, E2 on the attempt that exhausts it
        let start = Instant::now();
        let result = with_deadline_retry(ENDPOINT, &policy(3, 1), || async move {
            if start.elapsed() < Duration::from_secs(3) {
                Err::<(), _>(RpcError::Connection("E1".into()))
            } else {
                Err(RpcError::TransactionNotFound("E2".into()))
            }
        })
        .await;

        assert_eq!(
            result.unwrap_err(),
            RpcError::TransactionNotFound("E2".into())
        );
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_fatal_after_transient_stops_immediately() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let result = with_deadline_retry(ENDPOINT, &policy(30, 1), || {
            let attempts = Arc::clone(&attempts_clone);
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err::<(), _>(RpcError::Timeout("slow".into()))
                } else {
                    Err(RpcError::Decode("garbage".into()))
                }
            }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(result.unwrap_err(), RpcError::Decode("garbage".into()));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_no_retry_policy_makes_one_attempt() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let result = with_deadline_retry(ENDPOINT, &RetryPolicy::no_retry(), || {
            let attempts = Arc::clone(&attempts_clone);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(RpcError::Connection("refused".into()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_each_call_gets_a_fresh_session() {
        let p = policy(2, 1);
        for _ in 0..2 {
            let attempts = Arc::new(AtomicUsize::new(0));
            let attempts_clone = Arc::clone(&attempts);
            let _ = with_deadline_retry(ENDPOINT, &p, || {
                let attempts = Arc::clone(&attempts_clone);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(RpcError::Connection("refused".into()))
                }
            })
            .await;
            assert_eq!(attempts.load(Ordering::SeqCst), 3);
        }
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_anyhow_errors_are_classified() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let result: anyhow::Result<()> = with_deadline_retry(ENDPOINT, &policy(1, 1), || {
            let attempts = Arc::clone(&attempts_clone);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::Error::from(RpcError::Connection("refused".into())))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_and_exhaustion_are_logged_with_fields() {
        let (log, _guard) = capture_events();

        let result = with_deadline_retry(ENDPOINT, &policy(3, 1), || async {
            Err::<(), _>(RpcError::Connection("connection refused".into()))
        })
        .await;
        assert!(result.is_err());

        let events = log.take();
        assert_eq!(events.len(), 4, "{:?}", events);

        let (warns, last) = events.split_at(3);
        for (i, event) in warns.iter().enumerate() {
            assert_eq!(event.level, Level::WARN);
            assert_eq!(event.fields["endpoint"], ENDPOINT);
            assert_eq!(event.fields["attempt"], (i + 1).to_string());
            assert_eq!(event.fields["error_kind"], "Connection");
            let remaining_ms: u64 = event.fields["remaining_ms"].parse().unwrap();
            let expected_ms = 3000 - 1000 * i as u64;
            assert!(
                remaining_ms <= expected_ms && remaining_ms + 10 >= expected_ms,
                "attempt {}: remaining_ms = {}",
                i + 1,
                remaining_ms
            );
        }

        assert_eq!(last[0].level, Level::ERROR);
        assert_eq!(last[0].fields["endpoint"], ENDPOINT);
        assert_eq!(last[0].fields["attempt"], "4");
        assert_eq!(last[0].fields["error_kind"], "Connection");
        assert!(!last[0].fields.contains_key("remaining_ms"));
        assert!(last[0].fields["message"].contains("exhausted after 4 attempts"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_logged_once_with_kind() {
        let (log, _guard) = capture_events();

        let result = with_deadline_retry(ENDPOINT, &policy(30, 1), || async {
            Err::<(), _>(RpcError::Http {
                status: 401,
                message: "Unauthorized".into(),
            })
        })
        .await;
        assert!(result.is_err());

        let events = log.take();
        assert_eq!(events.len(), 1, "{:?}", events);
        assert_eq!(events[0].level, Level::ERROR);
        assert_eq!(events[0].fields["attempt"], "1");
        assert_eq!(events[0].fields["error_kind"], "Http");
        assert!(events[0].fields["message"].contains("non-retryable"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_retry_logs_no_error() {
        let (log, _guard) = capture_events();
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let result = with_deadline_retry(ENDPOINT, &policy(30, 1), || {
            let attempts = Arc::clone(&attempts_clone);
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(RpcError::Timeout("10s".into()))
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(result.is_ok());

        let levels: Vec<Level> = log.take().iter().map(|e| e.level).collect();
        assert_eq!(levels, vec![Level::WARN, Level::DEBUG]);
    }
}
