//! Declarative policy configuration.
//!
//! [`PolicyConfig`] and [`StrategyConfig`] describe a policy as plain data
//! with durations in milliseconds, so a policy can live in a settings file.
//! With the `serde` feature they implement `Serialize` and `Deserialize`.
//! Loading the file is left to the caller.
//!
//! ```rust
//! use backstop::config::{PolicyConfig, StrategyConfig};
//! use backstop::RetryPolicy;
//! use std::time::Duration;
//!
//! let config = PolicyConfig {
//!     strategy: StrategyConfig::Exponential {
//!         base_ms: 100,
//!         multiplier: 2.0,
//!         jitter: 0.1,
//!         max_interval_ms: Some(5_000),
//!         max_attempts: 6,
//!     },
//!     max_total_duration_ms: Some(30_000),
//! };
//!
//! let policy = RetryPolicy::try_from(config).unwrap();
//! assert_eq!(policy.strategy().max_attempts(), 6);
//! assert_eq!(policy.max_total_duration(), Some(Duration::from_secs(30)));
//! ```

use std::time::Duration;

use crate::error::ConfigError;
use crate::policy::RetryPolicy;
use crate::strategy::Strategy;

#[cfg(feature = "serde")]
fn default_max_attempts() -> u32 {
    crate::strategy::DEFAULT_MAX_ATTEMPTS
}

#[cfg(feature = "serde")]
fn default_multiplier() -> f64 {
    crate::strategy::DEFAULT_MULTIPLIER
}

/// A strategy as configuration data.
///
/// Serialized with a `kind` tag, e.g.
/// `{"kind": "linear", "base_ms": 100, "max_attempts": 5}`.
/// `Custom` strategies carry code and have no configuration form.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(tag = "kind", rename_all = "snake_case")
)]
pub enum StrategyConfig {
    /// See [`Strategy::Constant`].
    Constant {
        /// Delay in milliseconds.
        delay_ms: u64,
        /// Retry budget.
        #[cfg_attr(feature = "serde", serde(default = "default_max_attempts"))]
        max_attempts: u32,
    },
    /// See [`Strategy::Linear`].
    Linear {
        /// Base delay in milliseconds.
        base_ms: u64,
        /// Retry budget.
        #[cfg_attr(feature = "serde", serde(default = "default_max_attempts"))]
        max_attempts: u32,
    },
    /// See [`Strategy::Fibonacci`].
    Fibonacci {
        /// Base delay in milliseconds.
        base_ms: u64,
        /// Retry budget.
        #[cfg_attr(feature = "serde", serde(default = "default_max_attempts"))]
        max_attempts: u32,
    },
    /// See [`Strategy::Exponential`].
    Exponential {
        /// Base delay in milliseconds.
        base_ms: u64,
        /// Growth factor per attempt.
        #[cfg_attr(feature = "serde", serde(default = "default_multiplier"))]
        multiplier: f64,
        /// Jitter factor in `[0, 1]`.
        #[cfg_attr(feature = "serde", serde(default))]
        jitter: f64,
        /// Cap on any delay, in milliseconds.
        #[cfg_attr(feature = "serde", serde(default))]
        max_interval_ms: Option<u64>,
        /// Retry budget.
        #[cfg_attr(feature = "serde", serde(default = "default_max_attempts"))]
        max_attempts: u32,
    },
    /// See [`Strategy::Chain`].
    Chain {
        /// Segments in order.
        segments: Vec<SegmentConfig>,
    },
}

/// One `(attempts, strategy)` segment of a chain.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SegmentConfig {
    /// Retries this segment covers.
    pub attempts: u32,
    /// The segment's strategy.
    pub strategy: StrategyConfig,
}

/// A [`RetryPolicy`] as configuration data.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PolicyConfig {
    /// Default strategy.
    pub strategy: StrategyConfig,
    /// Total time budget in milliseconds.
    #[cfg_attr(feature = "serde", serde(default))]
    pub max_total_duration_ms: Option<u64>,
}

impl TryFrom<StrategyConfig> for Strategy {
    type Error = ConfigError;

    fn try_from(config: StrategyConfig) -> Result<Self, Self::Error> {
        let strategy = match config {
            StrategyConfig::Constant {
                delay_ms,
                max_attempts,
            } => Strategy::constant(Duration::from_millis(delay_ms)).with_max_attempts(max_attempts),
            StrategyConfig::Linear {
                base_ms,
                max_attempts,
            } => Strategy::linear(Duration::from_millis(base_ms)).with_max_attempts(max_attempts),
            StrategyConfig::Fibonacci {
                base_ms,
                max_attempts,
            } => {
                Strategy::fibonacci(Duration::from_millis(base_ms)).with_max_attempts(max_attempts)
            }
            StrategyConfig::Exponential {
                base_ms,
                multiplier,
                jitter,
                max_interval_ms,
                max_attempts,
            } => {
                // Checked here because `with_jitter` clamps silently.
                if !(0.0..=1.0).contains(&jitter) {
                    return Err(ConfigError::InvalidJitter(jitter));
                }
                let strategy = Strategy::exponential(Duration::from_millis(base_ms))
                    .with_multiplier(multiplier)
                    .with_jitter(jitter)
                    .with_max_attempts(max_attempts);
                match max_interval_ms {
                    Some(ms) => strategy.with_max_interval(Duration::from_millis(ms)),
                    None => strategy,
                }
            }
            StrategyConfig::Chain { segments } => {
                let segments = segments
                    .into_iter()
                    .map(|s| Ok((s.attempts, Strategy::try_from(s.strategy)?)))
                    .collect::<Result<Vec<_>, ConfigError>>()?;
                Strategy::chain(segments)
            }
        };
        strategy.validate()?;
        Ok(strategy)
    }
}

impl TryFrom<PolicyConfig> for RetryPolicy {
    type Error = ConfigError;

    fn try_from(config: PolicyConfig) -> Result<Self, Self::Error> {
        let policy = RetryPolicy::new(Strategy::try_from(config.strategy)?);
        Ok(match config.max_total_duration_ms {
            Some(ms) => policy.with_max_total_duration(Duration::from_millis(ms)),
            None => policy,
        })
    }
}
