//! The retry execution loop.
//!
//! [`RetryPolicy`] pairs a default [`Strategy`] with an optional total time
//! budget. Each call drives one operation through the loop:
//!
//! 1. If the time budget is spent, stop with [`RetryError::DeadlineExceeded`].
//! 2. Run the operation. Success ends the loop.
//! 3. Ask the failure observer whether to continue; `false` returns the
//!    operation's error as [`RetryError::Operation`].
//! 4. Take the next delay. None left means [`RetryError::RetryLimitExceeded`].
//! 5. If cancelled, stop with [`RetryError::Cancelled`] without sleeping.
//! 6. Sleep for the delay, then go back to 1.
//!
//! The deadline is checked before the attempt budget, so a loop that runs
//! out of both at once reports the deadline.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::RetryError;
use crate::outcome::{AttemptLog, RetryResult};
use crate::strategy::Strategy;

/// A retry policy: the default strategy plus an optional time budget.
///
/// Policies are plain data and cheap to clone. One policy can drive any
/// number of concurrent calls; each call keeps its own attempt counter,
/// error list and clock.
///
/// # Examples
///
/// ```rust
/// use backstop::{RetryPolicy, Strategy};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let policy = RetryPolicy::new(
///     Strategy::exponential(Duration::from_millis(1)).with_max_attempts(5),
/// )
/// .with_max_total_duration(Duration::from_secs(2));
///
/// let value = policy.execute(|| async { Ok::<_, String>(42) }).await.unwrap();
/// assert_eq!(value, 42);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    strategy: Strategy,
    max_total_duration: Option<Duration>,
}

impl RetryPolicy {
    /// Create a policy with no time budget.
    pub fn new(strategy: impl Into<Strategy>) -> Self {
        Self {
            strategy: strategy.into(),
            max_total_duration: None,
        }
    }

    /// Limit the wall time of the whole retry loop.
    ///
    /// The budget is checked before each attempt. An attempt that is already
    /// running is never interrupted.
    pub fn with_max_total_duration(mut self, budget: Duration) -> Self {
        self.max_total_duration = Some(budget);
        self
    }

    /// The default strategy.
    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// The total time budget, if any.
    pub fn max_total_duration(&self) -> Option<Duration> {
        self.max_total_duration
    }

    /// Start configuring a single call.
    ///
    /// Use this to override the strategy, observe failures or attach a
    /// cancellation token for one call.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use backstop::{RetryError, RetryPolicy, Strategy};
    /// use std::time::Duration;
    ///
    /// #[derive(Debug, PartialEq)]
    /// enum ApiError { Unavailable, NotFound }
    ///
    /// # tokio_test::block_on(async {
    /// let policy = RetryPolicy::new(Strategy::constant(Duration::from_millis(1)));
    ///
    /// let result = policy
    ///     .retry(|| async { Err::<(), _>(ApiError::NotFound) })
    ///     .on_failure(|err| *err == ApiError::Unavailable)
    ///     .run()
    ///     .await;
    ///
    /// assert_eq!(result, Err(RetryError::Operation(ApiError::NotFound)));
    /// # });
    /// ```
    pub fn retry<'a, F, Fut, T, E>(&'a self, operation: F) -> Retry<'a, F, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        Retry {
            policy: self,
            operation,
            strategy: None,
            observer: None,
            cancel: None,
        }
    }

    /// Run `operation` until it succeeds or the policy gives up.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.retry(operation).run().await
    }

    /// Like [`execute`](Self::execute), also reporting attempts, elapsed time
    /// and every error seen before the success.
    pub async fn execute_with_result<F, Fut, T, E>(
        &self,
        operation: F,
    ) -> Result<RetryResult<T, E>, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.retry(operation).run_with_result().await
    }

    /// Retry a synchronous operation, sleeping asynchronously between attempts.
    ///
    /// ```rust
    /// use backstop::{RetryPolicy, Strategy};
    /// use std::time::Duration;
    ///
    /// # tokio_test::block_on(async {
    /// let mut remaining_failures = 2;
    /// let policy = RetryPolicy::new(Strategy::constant(Duration::from_millis(1)));
    ///
    /// let value = policy
    ///     .execute_fn(|| {
    ///         if remaining_failures > 0 {
    ///             remaining_failures -= 1;
    ///             Err("not yet")
    ///         } else {
    ///             Ok("ready")
    ///         }
    ///     })
    ///     .await;
    ///
    /// assert_eq!(value, Ok("ready"));
    /// # });
    /// ```
    pub async fn execute_fn<F, T, E>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Result<T, E>,
    {
        self.retry(move || futures::future::ready(operation()))
            .run()
            .await
    }
}

impl From<Strategy> for RetryPolicy {
    fn from(strategy: Strategy) -> Self {
        Self::new(strategy)
    }
}

type Observer<'a, E> = Box<dyn FnMut(&E) -> bool + Send + 'a>;

/// One configured retry call.
///
/// Created by [`RetryPolicy::retry`]. Nothing runs until [`run`](Self::run)
/// or [`run_with_result`](Self::run_with_result) is awaited.
pub struct Retry<'a, F, E> {
    policy: &'a RetryPolicy,
    operation: F,
    strategy: Option<Strategy>,
    observer: Option<Observer<'a, E>>,
    cancel: Option<CancellationToken>,
}

impl<F, E> fmt::Debug for Retry<'_, F, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retry")
            .field("policy", self.policy)
            .field("strategy", &self.strategy)
            .field("observer", &self.observer.is_some())
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

impl<'a, F, Fut, T, E> Retry<'a, F, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    /// Use `strategy` instead of the policy's default for this call only.
    pub fn strategy(mut self, strategy: impl Into<Strategy>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    /// Inspect each failure before the next delay is taken.
    ///
    /// Return `true` to keep retrying, `false` to stop and hand the error
    /// back unchanged as [`RetryError::Operation`]. Panics in the observer
    /// are not caught.
    pub fn on_failure<O>(mut self, observer: O) -> Self
    where
        O: FnMut(&E) -> bool + Send + 'a,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Stop the loop when `token` is cancelled.
    ///
    /// Cancellation is checked before every sleep and interrupts a sleep in
    /// progress. An attempt that is already running is not interrupted.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Run the loop, returning the successful value.
    pub async fn run(self) -> Result<T, RetryError<E>> {
        self.drive(AttemptLog::last_only())
            .await
            .map(RetryResult::into_value)
    }

    /// Run the loop, returning the value with attempt metadata.
    pub async fn run_with_result(self) -> Result<RetryResult<T, E>, RetryError<E>> {
        self.drive(AttemptLog::aggregating()).await
    }

    async fn drive(self, mut log: AttemptLog<E>) -> Result<RetryResult<T, E>, RetryError<E>> {
        let Retry {
            policy,
            mut operation,
            strategy,
            mut observer,
            cancel,
        } = self;
        let strategy = strategy.as_ref().unwrap_or(&policy.strategy);
        let mut delays = strategy.sequence();
        let start = Instant::now();

        loop {
            if let Some(budget) = policy.max_total_duration {
                let elapsed = start.elapsed();
                if elapsed >= budget {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        attempts = log.attempts(),
                        ?elapsed,
                        ?budget,
                        "retry deadline exceeded"
                    );
                    return Err(RetryError::DeadlineExceeded {
                        attempts: log.attempts(),
                        elapsed,
                        budget,
                        last_error: log.take_last(),
                    });
                }
            }

            log.begin_attempt();
            let error = match operation().await {
                Ok(value) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(attempts = log.attempts(), "operation succeeded");
                    return Ok(log.finish(value, start.elapsed()));
                }
                Err(error) => error,
            };

            let proceed = match observer.as_mut() {
                Some(observe) => observe(&error),
                None => true,
            };
            if !proceed {
                #[cfg(feature = "tracing")]
                tracing::debug!(attempts = log.attempts(), "failure observer stopped retries");
                return Err(RetryError::Operation(error));
            }

            let Some(delay) = delays.next() else {
                #[cfg(feature = "tracing")]
                tracing::warn!(attempts = log.attempts(), "retry limit exceeded");
                return Err(RetryError::RetryLimitExceeded {
                    attempts: log.attempts(),
                    last_error: error,
                });
            };

            if cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                #[cfg(feature = "tracing")]
                tracing::debug!(attempts = log.attempts(), "retry cancelled");
                return Err(RetryError::Cancelled {
                    attempts: log.attempts(),
                });
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(attempt = log.attempts(), ?delay, "attempt failed, retrying");
            log.record(error);

            if !sleep(delay, cancel.as_ref()).await {
                #[cfg(feature = "tracing")]
                tracing::debug!(attempts = log.attempts(), "retry cancelled during backoff");
                return Err(RetryError::Cancelled {
                    attempts: log.attempts(),
                });
            }
        }
    }
}

/// Sleep for `delay`, returning false if `cancel` fired first.
async fn sleep(delay: Duration, cancel: Option<&CancellationToken>) -> bool {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        },
        None => {
            tokio::time::sleep(delay).await;
            true
        }
    }
}

#[cfg(test)]
mod policy_tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn counting_failure(
        calls: &Arc<AtomicU32>,
    ) -> impl FnMut() -> futures::future::Ready<Result<(), &'static str>> {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Err("always fails"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_runs_budget_plus_one() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(
            Strategy::constant(Duration::from_millis(10)).with_max_attempts(4),
        );

        let result = policy.execute(counting_failure(&calls)).await;

        assert_eq!(
            result,
            Err(RetryError::RetryLimitExceeded {
                attempts: 5,
                last_error: "always fails"
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_budget_fails_after_one_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy =
            RetryPolicy::new(Strategy::constant(Duration::from_secs(1)).with_max_attempts(0));

        let result = policy.execute(counting_failure(&calls)).await;

        assert!(result.unwrap_err().is_retry_limit());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_takes_priority() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(
            Strategy::constant(Duration::from_millis(10)).with_max_attempts(1_000),
        )
        .with_max_total_duration(Duration::from_millis(35));

        let err = policy.execute(counting_failure(&calls)).await.unwrap_err();

        // Attempts at 0, 10, 20 and 30ms; the check at 40ms refuses the fifth.
        match err {
            RetryError::DeadlineExceeded {
                attempts,
                budget,
                last_error,
                ..
            } => {
                assert_eq!(attempts, 4);
                assert_eq!(budget, Duration::from_millis(35));
                assert_eq!(last_error, Some("always fails"));
            }
            other => panic!("expected deadline, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_reported_when_budgets_coincide() {
        // Budget runs out on the same step the strategy does.
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(
            Strategy::constant(Duration::from_millis(10)).with_max_attempts(2),
        )
        .with_max_total_duration(Duration::from_millis(20));

        let err = policy.execute(counting_failure(&calls)).await.unwrap_err();

        assert!(err.is_deadline(), "got {:?}", err);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_deadline_never_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(Strategy::constant(Duration::from_millis(1)))
            .with_max_total_duration(Duration::ZERO);

        let err = policy.execute(counting_failure(&calls)).await.unwrap_err();

        assert_eq!(err.attempts(), Some(0));
        assert_eq!(err.last_error(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_abort_returns_original_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(Strategy::constant(Duration::from_millis(1)));

        let result = policy
            .retry(counting_failure(&calls))
            .on_failure(|_| false)
            .run()
            .await;

        assert_eq!(result, Err(RetryError::Operation("always fails")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_sees_every_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::new(AtomicU32::new(0));
        let policy =
            RetryPolicy::new(Strategy::constant(Duration::from_millis(1)).with_max_attempts(2));

        let result = policy
            .retry(counting_failure(&calls))
            .on_failure({
                let seen = Arc::clone(&seen);
                move |_| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    true
                }
            })
            .run()
            .await;

        assert!(result.unwrap_err().is_retry_limit());
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_strategy_override() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy =
            RetryPolicy::new(Strategy::constant(Duration::from_millis(1)).with_max_attempts(10));

        let err = policy
            .retry(counting_failure(&calls))
            .strategy(Strategy::linear(Duration::from_millis(1)).with_max_attempts(1))
            .run()
            .await
            .unwrap_err();

        assert_eq!(err.attempts(), Some(2));
        // The override does not stick to the policy.
        assert_eq!(policy.strategy().max_attempts(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_aggregation() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(
            Strategy::constant(Duration::from_millis(10)).with_max_attempts(3),
        );

        let result = policy
            .execute_with_result({
                let calls = Arc::clone(&calls);
                move || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err(format!("failure {}", n))
                        } else {
                            Ok(n)
                        }
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(*result.value(), 2);
        assert_eq!(result.attempts(), 3);
        assert_eq!(result.errors(), &["failure 0", "failure 1"]);
        assert!(result.total_duration() >= Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_try_success() {
        let policy = RetryPolicy::new(Strategy::constant(Duration::from_secs(1)));

        let result = policy
            .execute_with_result(|| async { Ok::<_, String>("hello") })
            .await
            .unwrap();

        assert_eq!(result.attempts(), 1);
        assert!(result.errors().is_empty());
        assert_eq!(result.total_duration(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_sleep() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();
        let policy =
            RetryPolicy::new(Strategy::constant(Duration::from_secs(60)).with_max_attempts(5));

        let result = policy
            .retry(counting_failure(&calls))
            .on_failure({
                let token = token.clone();
                move |_| {
                    token.cancel();
                    true
                }
            })
            .cancel_on(token)
            .run()
            .await;

        assert_eq!(result, Err(RetryError::Cancelled { attempts: 1 }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_during_sleep() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();
        let policy =
            RetryPolicy::new(Strategy::constant(Duration::from_secs(3600)).with_max_attempts(5));

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                token.cancel();
            })
        };

        let mut observed = 0;
        let started = Instant::now();
        let result = policy
            .retry(counting_failure(&calls))
            .on_failure(|_| {
                observed += 1;
                true
            })
            .cancel_on(token)
            .run()
            .await;
        canceller.await.unwrap();

        assert_eq!(result, Err(RetryError::Cancelled { attempts: 1 }));
        assert!(started.elapsed() < Duration::from_secs(3600));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(observed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_fn() {
        let mut failures = 1;
        let policy = RetryPolicy::new(Strategy::constant(Duration::from_millis(1)));

        let value = policy
            .execute_fn(|| {
                if failures > 0 {
                    failures -= 1;
                    Err("later")
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(value, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delays_are_slept() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(
            Strategy::exponential(Duration::from_millis(10)).with_max_attempts(3),
        );

        let started = Instant::now();
        let _ = policy.execute(counting_failure(&calls)).await;

        // 10ms + 20ms + 40ms
        let elapsed = started.elapsed();
        assert!(
            elapsed >= Duration::from_millis(70) && elapsed < Duration::from_millis(80),
            "Expected about 70ms, got {:?}",
            elapsed
        );
    }

    #[test]
    fn test_retry_is_debug() {
        let policy = RetryPolicy::new(Strategy::constant(Duration::ZERO));
        let retry = policy.retry(|| async { Ok::<(), ()>(()) });
        assert!(format!("{:?}", retry).contains("Retry"));
    }
}
