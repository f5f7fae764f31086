//! Attach a retry policy to any async call.
//!
//! [`Retryable`] is a thin extension over closures that produce futures,
//! such as a request builder's `send`. Each attempt calls the closure once,
//! so the whole call is retried, never a part of it.

use std::future::Future;

use crate::error::RetryError;
use crate::outcome::RetryResult;
use crate::policy::RetryPolicy;

/// Extension trait for retrying async calls.
///
/// # Examples
///
/// ```rust
/// use backstop::{Retryable, RetryPolicy, Strategy};
/// use std::time::Duration;
///
/// async fn fetch(url: &str) -> Result<String, String> {
///     Ok(format!("body of {}", url))
/// }
///
/// # tokio_test::block_on(async {
/// let policy = RetryPolicy::new(Strategy::exponential(Duration::from_millis(10)));
///
/// let body = (|| fetch("https://example.com")).retry_with(&policy).await;
/// assert_eq!(body.unwrap(), "body of https://example.com");
/// # });
/// ```
pub trait Retryable<T, E>: Sized {
    /// Retry this call under `policy`.
    fn retry_with(self, policy: &RetryPolicy) -> impl Future<Output = Result<T, RetryError<E>>>;

    /// Retry this call under `policy`, consulting `on_failure` after each
    /// failed attempt exactly as [`Retry::on_failure`](crate::Retry::on_failure) does.
    fn retry_observed<O>(
        self,
        policy: &RetryPolicy,
        on_failure: O,
    ) -> impl Future<Output = Result<T, RetryError<E>>>
    where
        O: FnMut(&E) -> bool + Send;

    /// Retry this call under `policy`, reporting attempts and errors.
    fn retry_with_result(
        self,
        policy: &RetryPolicy,
    ) -> impl Future<Output = Result<RetryResult<T, E>, RetryError<E>>>;
}

impl<F, Fut, T, E> Retryable<T, E> for F
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    fn retry_with(self, policy: &RetryPolicy) -> impl Future<Output = Result<T, RetryError<E>>> {
        policy.execute(self)
    }

    fn retry_observed<O>(
        self,
        policy: &RetryPolicy,
        on_failure: O,
    ) -> impl Future<Output = Result<T, RetryError<E>>>
    where
        O: FnMut(&E) -> bool + Send,
    {
        async move { policy.retry(self).on_failure(on_failure).run().await }
    }

    fn retry_with_result(
        self,
        policy: &RetryPolicy,
    ) -> impl Future<Output = Result<RetryResult<T, E>, RetryError<E>>> {
        policy.execute_with_result(self)
    }
}

#[cfg(test)]
mod adapter_tests {
    use super::*;
    use crate::Strategy;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_each_attempt_calls_whole_operation_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy =
            RetryPolicy::new(Strategy::constant(Duration::from_millis(5)).with_max_attempts(2));

        let result = {
            let calls = Arc::clone(&calls);
            move || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("503")
                }
            }
        }
        .retry_with(&policy)
        .await;

        assert!(result.unwrap_err().is_retry_limit());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_passes_through() {
        let policy = RetryPolicy::new(Strategy::constant(Duration::from_millis(5)));

        let result = (|| async { Err::<(), _>(404) })
            .retry_observed(&policy, |status: &i32| *status >= 500)
            .await;

        assert_eq!(result, Err(RetryError::Operation(404)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_result() {
        let policy = RetryPolicy::new(Strategy::constant(Duration::from_millis(5)));

        let result = (|| async { Ok::<_, ()>("ok") })
            .retry_with_result(&policy)
            .await
            .unwrap();

        assert_eq!(result.attempts(), 1);
    }
}
