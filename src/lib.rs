//! # Backstop
//!
//! Policy-driven retries for async Rust.
//!
//! Backstop keeps retry behavior split the same way as the rest of a
//! well-behaved client:
//! - **Strategies** are pure data: for attempt `k`, how long to wait
//! - **The policy** runs one operation through a single cancellable loop
//!
//! ## Quick Example
//!
//! ```rust
//! use backstop::{RetryPolicy, Strategy};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! // Up to 5 retries, doubling from 10ms, never waiting more than 1s,
//! // and giving up after 10s whatever the attempt count.
//! let policy = RetryPolicy::new(
//!     Strategy::exponential(Duration::from_millis(10))
//!         .with_jitter(0.2)
//!         .with_max_interval(Duration::from_secs(1))
//!         .with_max_attempts(5),
//! )
//! .with_max_total_duration(Duration::from_secs(10));
//!
//! let value = policy
//!     .execute(|| async { Ok::<_, std::io::Error>("response") })
//!     .await
//!     .unwrap();
//! assert_eq!(value, "response");
//! # });
//! ```
//!
//! ## Composing strategies
//!
//! ```rust
//! use backstop::Strategy;
//! use std::time::Duration;
//!
//! // Three quick retries, then two slow ones.
//! let strategy = Strategy::chain([
//!     (3, Strategy::constant(Duration::from_millis(50))),
//!     (2, Strategy::linear(Duration::from_secs(1))),
//! ]);
//! assert_eq!(strategy.max_attempts(), 5);
//! ```
//!
//! ## Features
//!
//! - `tracing`: emit `tracing` events for failed attempts and terminal errors
//! - `serde`: `Serialize`/`Deserialize` for the [`config`] types

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod adapter;
pub mod config;
pub mod duration;
pub mod error;
pub mod outcome;
pub mod policy;
pub mod sequence;
pub mod strategy;

// Re-exports
pub use adapter::Retryable;
pub use config::{PolicyConfig, SegmentConfig, StrategyConfig};
pub use duration::Interval;
pub use error::{ConfigError, RetryError};
pub use outcome::RetryResult;
pub use policy::{Retry, RetryPolicy};
pub use sequence::RetrySequence;
pub use strategy::{Chain, DelayStrategy, Exponential, FnStrategy, Strategy};
pub use tokio_util::sync::CancellationToken;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::adapter::Retryable;
    pub use crate::error::RetryError;
    pub use crate::outcome::RetryResult;
    pub use crate::policy::RetryPolicy;
    pub use crate::strategy::{DelayStrategy, Strategy};
}
