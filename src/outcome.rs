//! Aggregated results of a retry loop.

use std::time::Duration;

/// The value of a successful retry loop, with how it got there.
///
/// Only [`RetryPolicy::execute_with_result`](crate::RetryPolicy::execute_with_result)
/// and [`Retry::run_with_result`](crate::Retry::run_with_result) produce one.
///
/// # Examples
///
/// ```rust
/// use backstop::{RetryPolicy, Strategy};
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let calls = AtomicU32::new(0);
/// let calls = &calls;
/// let policy = RetryPolicy::new(
///     Strategy::constant(Duration::from_millis(1)).with_max_attempts(5),
/// );
///
/// let result = policy
///     .execute_with_result(move || async move {
///         match calls.fetch_add(1, Ordering::SeqCst) {
///             0 | 1 => Err("busy"),
///             _ => Ok("done"),
///         }
///     })
///     .await
///     .unwrap();
///
/// assert_eq!(*result.value(), "done");
/// assert_eq!(result.attempts(), 3);
/// assert_eq!(result.errors(), &["busy", "busy"]);
/// # });
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryResult<T, E> {
    value: T,
    attempts: u32,
    total_duration: Duration,
    errors: Vec<E>,
}

impl<T, E> RetryResult<T, E> {
    /// The successful value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Extract the successful value, discarding metadata.
    pub fn into_value(self) -> T {
        self.value
    }

    /// Attempts made, including the one that succeeded.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Wall time from just before the first attempt to the success.
    pub fn total_duration(&self) -> Duration {
        self.total_duration
    }

    /// Errors from every failed attempt, oldest first.
    pub fn errors(&self) -> &[E] {
        &self.errors
    }

    /// Split into `(value, attempts, total_duration, errors)`.
    pub fn into_parts(self) -> (T, u32, Duration, Vec<E>) {
        (self.value, self.attempts, self.total_duration, self.errors)
    }

    /// Transform the value, keeping the metadata.
    pub fn map<U, F>(self, f: F) -> RetryResult<U, E>
    where
        F: FnOnce(T) -> U,
    {
        RetryResult {
            value: f(self.value),
            attempts: self.attempts,
            total_duration: self.total_duration,
            errors: self.errors,
        }
    }
}

/// Per-call record of attempts and failures.
///
/// Owned by exactly one retry loop. With `keep_all` unset only the most
/// recent error is held, which is all the terminal errors need.
#[derive(Debug)]
pub(crate) struct AttemptLog<E> {
    attempts: u32,
    errors: Vec<E>,
    keep_all: bool,
}

impl<E> AttemptLog<E> {
    pub(crate) fn aggregating() -> Self {
        Self {
            attempts: 0,
            errors: Vec::new(),
            keep_all: true,
        }
    }

    pub(crate) fn last_only() -> Self {
        Self {
            attempts: 0,
            errors: Vec::with_capacity(1),
            keep_all: false,
        }
    }

    pub(crate) fn begin_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn record(&mut self, error: E) {
        if !self.keep_all {
            self.errors.clear();
        }
        self.errors.push(error);
    }

    pub(crate) fn take_last(&mut self) -> Option<E> {
        self.errors.pop()
    }

    pub(crate) fn finish<T>(self, value: T, total_duration: Duration) -> RetryResult<T, E> {
        RetryResult {
            value,
            attempts: self.attempts,
            total_duration,
            errors: self.errors,
        }
    }
}
