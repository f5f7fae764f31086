//! Error types for retry execution and configuration.

use std::time::Duration;

/// Terminal failure of a retried operation.
///
/// Callers get exactly one of these when a retry loop does not produce a
/// value:
///
/// - [`RetryError::Operation`]: the failure observer declined to retry. The
///   operation's own error is carried unchanged.
/// - [`RetryError::RetryLimitExceeded`]: the strategy ran out of delays.
/// - [`RetryError::DeadlineExceeded`]: the policy's total time budget ran out
///   before the next attempt could start.
/// - [`RetryError::Cancelled`]: the caller's cancellation token fired.
///
/// # Examples
///
/// ```rust
/// use backstop::{RetryError, RetryPolicy, Strategy};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let policy = RetryPolicy::new(
///     Strategy::constant(Duration::from_millis(1)).with_max_attempts(2),
/// );
///
/// let result = policy
///     .execute(|| async { Err::<(), _>("connection refused") })
///     .await;
///
/// match result {
///     Err(RetryError::RetryLimitExceeded { attempts, last_error }) => {
///         assert_eq!(attempts, 3); // 1 initial + 2 retries
///         assert_eq!(last_error, "connection refused");
///     }
///     other => panic!("unexpected: {:?}", other),
/// }
/// # });
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The failure observer chose not to retry this error.
    Operation(E),
    /// Every delay the strategy authorizes was used up.
    RetryLimitExceeded {
        /// Attempts made, including the initial one.
        attempts: u32,
        /// The error from the final attempt.
        last_error: E,
    },
    /// The total time budget elapsed before the next attempt.
    DeadlineExceeded {
        /// Attempts made before the budget ran out.
        attempts: u32,
        /// Time elapsed since the first attempt started.
        elapsed: Duration,
        /// The configured budget.
        budget: Duration,
        /// The error from the most recent attempt, if any attempt ran.
        last_error: Option<E>,
    },
    /// The caller cancelled the loop before the next delay finished.
    Cancelled {
        /// Attempts made before cancellation.
        attempts: u32,
    },
}

impl<E> RetryError<E> {
    /// Returns true if the observer aborted with the operation's error.
    pub fn is_operation(&self) -> bool {
        matches!(self, Self::Operation(_))
    }

    /// Returns true if the strategy's attempt budget was exhausted.
    pub fn is_retry_limit(&self) -> bool {
        matches!(self, Self::RetryLimitExceeded { .. })
    }

    /// Returns true if the total time budget ran out.
    pub fn is_deadline(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. })
    }

    /// Returns true if the loop was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Number of attempts made, when known.
    ///
    /// `Operation` does not carry a count and returns `None`.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Operation(_) => None,
            Self::RetryLimitExceeded { attempts, .. }
            | Self::DeadlineExceeded { attempts, .. }
            | Self::Cancelled { attempts } => Some(*attempts),
        }
    }

    /// The most recent operation error, if any.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            Self::Operation(e) => Some(e),
            Self::RetryLimitExceeded { last_error, .. } => Some(last_error),
            Self::DeadlineExceeded { last_error, .. } => last_error.as_ref(),
            Self::Cancelled { .. } => None,
        }
    }

    /// Extract the operation error, discarding policy metadata.
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            Self::RetryLimitExceeded { last_error, .. } => Some(last_error),
            Self::DeadlineExceeded { last_error, .. } => last_error,
            Self::Cancelled { .. } => None,
        }
    }

    /// Transform the carried operation error.
    pub fn map_err<E2, F>(self, f: F) -> RetryError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            Self::Operation(e) => RetryError::Operation(f(e)),
            Self::RetryLimitExceeded {
                attempts,
                last_error,
            } => RetryError::RetryLimitExceeded {
                attempts,
                last_error: f(last_error),
            },
            Self::DeadlineExceeded {
                attempts,
                elapsed,
                budget,
                last_error,
            } => RetryError::DeadlineExceeded {
                attempts,
                elapsed,
                budget,
                last_error: last_error.map(f),
            },
            Self::Cancelled { attempts } => RetryError::Cancelled { attempts },
        }
    }
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Operation(e) => write!(f, "{}", e),
            Self::RetryLimitExceeded {
                attempts,
                last_error,
            } => write!(
                f,
                "retry limit exceeded after {} attempts: {}",
                attempts, last_error
            ),
            Self::DeadlineExceeded {
                attempts,
                elapsed,
                budget,
                last_error,
            } => {
                write!(
                    f,
                    "retry deadline of {:?} exceeded after {} attempts ({:?} elapsed)",
                    budget, attempts, elapsed
                )?;
                if let Some(e) = last_error {
                    write!(f, ": {}", e)?;
                }
                Ok(())
            }
            Self::Cancelled { attempts } => {
                write!(f, "retry cancelled after {} attempts", attempts)
            }
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            // Transparent: the operation error is the error.
            Self::Operation(e) => e.source(),
            Self::RetryLimitExceeded { last_error, .. } => Some(last_error),
            Self::DeadlineExceeded { last_error, .. } => {
                last_error.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
            }
            Self::Cancelled { .. } => None,
        }
    }
}

/// Error returned when a strategy or policy configuration is invalid.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Exponential multiplier was negative or not a number.
    InvalidMultiplier(f64),
    /// Jitter factor was outside `[0, 1]`.
    InvalidJitter(f64),
    /// A chain was configured without any segments.
    EmptyChain,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMultiplier(m) => {
                write!(f, "multiplier must be a non-negative number, got {}", m)
            }
            Self::InvalidJitter(j) => write!(f, "jitter must be within [0, 1], got {}", j),
            Self::EmptyChain => write!(f, "chain must contain at least one segment"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn test_retry_limit_display() {
        let err: RetryError<&str> = RetryError::RetryLimitExceeded {
            attempts: 4,
            last_error: "connection failed",
        };
        let display = format!("{}", err);
        assert!(display.contains("retry limit exceeded"));
        assert!(display.contains("4 attempts"));
        assert!(display.contains("connection failed"));
    }

    #[test]
    fn test_deadline_display_without_error() {
        let err: RetryError<&str> = RetryError::DeadlineExceeded {
            attempts: 0,
            elapsed: Duration::from_millis(5),
            budget: Duration::ZERO,
            last_error: None,
        };
        let display = format!("{}", err);
        assert!(display.contains("deadline"));
        assert!(!display.ends_with(": "));
    }

    #[test]
    fn test_operation_display_is_transparent() {
        let err = RetryError::Operation("bad request");
        assert_eq!(format!("{}", err), "bad request");
    }

    #[test]
    fn test_predicates() {
        assert!(RetryError::Operation(1).is_operation());
        assert!(RetryError::<i32>::Cancelled { attempts: 1 }.is_cancelled());
        assert!(RetryError::RetryLimitExceeded {
            attempts: 1,
            last_error: 1
        }
        .is_retry_limit());
        assert!(RetryError::<i32>::DeadlineExceeded {
            attempts: 1,
            elapsed: Duration::ZERO,
            budget: Duration::ZERO,
            last_error: None,
        }
        .is_deadline());
    }

    #[test]
    fn test_attempts_and_last_error() {
        let err = RetryError::RetryLimitExceeded {
            attempts: 3,
            last_error: "boom",
        };
        assert_eq!(err.attempts(), Some(3));
        assert_eq!(err.last_error(), Some(&"boom"));
        assert_eq!(RetryError::Operation("x").attempts(), None);
        assert_eq!(RetryError::<&str>::Cancelled { attempts: 2 }.last_error(), None);
    }

    #[test]
    fn test_into_operation_error() {
        assert_eq!(RetryError::Operation("x").into_operation_error(), Some("x"));
        assert_eq!(
            RetryError::<&str>::Cancelled { attempts: 1 }.into_operation_error(),
            None
        );
    }

    #[test]
    fn test_map_err() {
        let err = RetryError::RetryLimitExceeded {
            attempts: 2,
            last_error: 7,
        }
        .map_err(|n| n.to_string());
        assert_eq!(
            err,
            RetryError::RetryLimitExceeded {
                attempts: 2,
                last_error: "7".to_string()
            }
        );
    }

    #[test]
    fn test_source_points_at_last_error() {
        use std::error::Error;

        let io = std::io::Error::other("disk");
        let err = RetryError::RetryLimitExceeded {
            attempts: 2,
            last_error: io,
        };
        assert_eq!(err.source().map(|e| e.to_string()), Some("disk".to_string()));
    }

    #[test]
    fn test_config_error_display() {
        assert!(format!("{}", ConfigError::InvalidMultiplier(-1.0)).contains("multiplier"));
        assert!(format!("{}", ConfigError::InvalidJitter(2.0)).contains("jitter"));
        assert!(format!("{}", ConfigError::EmptyChain).contains("segment"));
    }
}
