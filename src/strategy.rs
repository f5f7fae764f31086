//! Backoff strategies.
//!
//! A [`Strategy`] answers one question: how long to wait before retry `k`.
//! Strategies are pure data. Apart from exponential jitter, evaluating the
//! same strategy at the same attempt twice gives the same delay.
//!
//! # Strategies
//!
//! - **Constant**: the same delay every time
//! - **Linear**: `base * (k + 1)`
//! - **Fibonacci**: `base * fib(k + 1)` (1, 1, 2, 3, 5, 8, ...)
//! - **Exponential**: `base * multiplier^k`, optionally jittered and capped
//! - **Custom**: any [`DelayStrategy`] implementation
//! - **Chain**: segments run one after another, each with its own budget

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::duration::{
    duration_to_nanos, nanos_f64_to_duration, saturating_mul, Interval, MAX_NANOS_DURATION,
};
use crate::error::ConfigError;
use crate::sequence::RetrySequence;

/// Retry budget used by the strategy constructors.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Growth factor used by [`Strategy::exponential`].
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Jitter factor used by [`Strategy::exponential`].
pub const DEFAULT_JITTER: f64 = 0.0;

/// A caller-supplied delay function.
///
/// Implementations must be pure in `attempt`: the engine may evaluate any
/// attempt index and never assumes the delays grow.
///
/// # Examples
///
/// ```rust
/// use backstop::{DelayStrategy, Strategy};
/// use std::time::Duration;
///
/// #[derive(Debug)]
/// struct Stepped;
///
/// impl DelayStrategy for Stepped {
///     fn delay(&self, attempt: u32) -> Option<Duration> {
///         Some(if attempt < 2 { Duration::from_millis(10) } else { Duration::from_secs(1) })
///     }
///
///     fn max_attempts(&self) -> u32 {
///         4
///     }
/// }
///
/// let strategy = Strategy::from_delay_strategy(Stepped);
/// let delays: Vec<_> = strategy.sequence().collect();
/// assert_eq!(delays.len(), 4);
/// assert_eq!(delays[3], Duration::from_secs(1));
/// ```
pub trait DelayStrategy: fmt::Debug + Send + Sync {
    /// Delay before retry `attempt` (0-indexed), or `None` to stop retrying.
    fn delay(&self, attempt: u32) -> Option<Duration>;

    /// Number of retries this strategy authorizes.
    fn max_attempts(&self) -> u32;
}

/// A [`DelayStrategy`] backed by a closure.
///
/// Created by [`Strategy::custom`].
pub struct FnStrategy<F> {
    max_attempts: u32,
    f: F,
}

impl<F> FnStrategy<F>
where
    F: Fn(u32) -> Option<Duration> + Send + Sync,
{
    /// Wrap `f` with a retry budget.
    pub fn new(max_attempts: u32, f: F) -> Self {
        Self { max_attempts, f }
    }
}

impl<F> fmt::Debug for FnStrategy<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStrategy")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl<F> DelayStrategy for FnStrategy<F>
where
    F: Fn(u32) -> Option<Duration> + Send + Sync,
{
    fn delay(&self, attempt: u32) -> Option<Duration> {
        (self.f)(attempt)
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Parameters of exponential backoff.
///
/// Delay for attempt `k` is `base * multiplier^k`. With a jitter factor `f`
/// the delay is drawn uniformly from `[raw * (1 - f), raw * (1 + f)]`, and
/// with `max_interval` set it never exceeds the cap.
#[derive(Debug, Clone, PartialEq)]
pub struct Exponential {
    base: Duration,
    multiplier: f64,
    jitter: f64,
    max_interval: Option<Duration>,
    max_attempts: u32,
}

impl Exponential {
    /// Exponential backoff with the default multiplier, no jitter and no cap.
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            multiplier: DEFAULT_MULTIPLIER,
            jitter: DEFAULT_JITTER,
            max_interval: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Base delay for attempt 0.
    pub fn base(&self) -> Duration {
        self.base
    }

    /// Growth factor per attempt.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Jitter factor in `[0, 1]`.
    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Upper bound on any produced delay.
    pub fn max_interval(&self) -> Option<Duration> {
        self.max_interval
    }

    fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let raw = duration_to_nanos(self.base) as f64 * self.multiplier.powi(exponent);
        if raw.is_nan() || raw <= 0.0 {
            return Duration::ZERO;
        }
        if raw.is_infinite() {
            return self.max_interval.unwrap_or(MAX_NANOS_DURATION);
        }

        let cap = self
            .max_interval
            .map_or(f64::INFINITY, |d| duration_to_nanos(d) as f64);
        let low = raw * (1.0 - self.jitter);
        if low >= cap {
            // Even the smallest jittered value is past the cap.
            return self.max_interval.unwrap_or(MAX_NANOS_DURATION);
        }

        let high = (raw * (1.0 + self.jitter)).min(cap);
        let delay = if self.jitter <= 0.0 || !high.is_finite() || high <= low {
            nanos_f64_to_duration(raw.min(cap))
        } else {
            use rand::Rng;
            nanos_f64_to_duration(rand::rng().random_range(low..=high))
        };

        match self.max_interval {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

/// A segment-by-segment composition of strategies.
///
/// Each segment runs for its own number of attempts and sees attempt
/// indices starting from 0. The chain's budget is the sum of the segment
/// budgets and is fixed when the chain is built.
///
/// # Examples
///
/// ```rust
/// use backstop::{Chain, Strategy};
/// use std::time::Duration;
///
/// let chain = Chain::new([
///     (2, Strategy::constant(Duration::from_millis(10))),
///     (3, Strategy::linear(Duration::from_millis(100))),
/// ]);
/// assert_eq!(chain.budget(), 5);
///
/// let strategy = Strategy::Chain(chain);
/// let delays: Vec<_> = strategy.sequence().map(|d| d.as_millis()).collect();
/// assert_eq!(delays, vec![10, 10, 100, 200, 300]);
/// ```
#[derive(Debug, Clone)]
pub struct Chain {
    segments: Vec<Segment>,
    budget: u32,
}

#[derive(Debug, Clone)]
struct Segment {
    start: u32,
    attempts: u32,
    strategy: Strategy,
}

impl Chain {
    /// Build a chain from `(attempts, strategy)` pairs, in order.
    pub fn new<I>(segments: I) -> Self
    where
        I: IntoIterator<Item = (u32, Strategy)>,
    {
        segments
            .into_iter()
            .fold(Self::builder(), |chain, (attempts, strategy)| {
                chain.then(attempts, strategy)
            })
    }

    /// Start an empty chain, to be extended with [`Chain::then`].
    ///
    /// ```rust
    /// use backstop::{Chain, Strategy};
    /// use std::time::Duration;
    ///
    /// let chain = Chain::builder()
    ///     .then(2, Strategy::constant(Duration::from_millis(10)))
    ///     .then(1, Strategy::constant(Duration::from_secs(1)));
    /// assert_eq!(chain.budget(), 3);
    /// assert_eq!(chain.delay(2), Some(Duration::from_secs(1)));
    /// ```
    pub fn builder() -> Self {
        Self {
            segments: Vec::new(),
            budget: 0,
        }
    }

    /// Append a segment that serves the next `attempts` retries.
    pub fn then(mut self, attempts: u32, strategy: impl Into<Strategy>) -> Self {
        self.segments.push(Segment {
            start: self.budget,
            attempts,
            strategy: strategy.into(),
        });
        self.budget = self.budget.saturating_add(attempts);
        self
    }

    /// Total retries across every segment.
    pub fn budget(&self) -> u32 {
        self.budget
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns true if the chain has no segments.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Iterate the `(attempts, strategy)` segments in order.
    pub fn segments(&self) -> impl Iterator<Item = (u32, &Strategy)> {
        self.segments.iter().map(|s| (s.attempts, &s.strategy))
    }

    /// Delay for global `attempt`, delegated with a segment-local index.
    ///
    /// A segment's inner strategy may still return `None` before the segment's
    /// count runs out (a nested chain past its own budget), which ends the chain.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.budget {
            return None;
        }
        let idx = self
            .segments
            .partition_point(|s| s.start.saturating_add(s.attempts) <= attempt);
        let segment = self.segments.get(idx)?;
        segment.strategy.delay(attempt - segment.start)
    }
}

/// The backoff strategy for retry delays.
///
/// Every variant except `Chain` carries its own retry budget; a chain's
/// budget is the sum of its segments.
///
/// # Examples
///
/// ```rust
/// use backstop::Strategy;
/// use std::time::Duration;
///
/// let strategy = Strategy::exponential(Duration::from_millis(100))
///     .with_max_interval(Duration::from_millis(500))
///     .with_max_attempts(6);
///
/// let delays: Vec<_> = strategy.sequence().map(|d| d.as_millis()).collect();
/// assert_eq!(delays, vec![100, 200, 400, 500, 500, 500]);
/// ```
#[derive(Debug, Clone)]
pub enum Strategy {
    /// Fixed delay between attempts.
    Constant {
        /// Delay before every retry.
        delay: Duration,
        /// Retry budget.
        max_attempts: u32,
    },
    /// Delay grows linearly: base * (attempt + 1).
    Linear {
        /// Delay before the first retry.
        base: Duration,
        /// Retry budget.
        max_attempts: u32,
    },
    /// Delay follows the Fibonacci sequence: base * fib(attempt + 1).
    Fibonacci {
        /// Delay before the first retry.
        base: Duration,
        /// Retry budget.
        max_attempts: u32,
    },
    /// Delay grows geometrically, with optional jitter and cap.
    Exponential(Exponential),
    /// Caller-supplied delay function.
    Custom(Arc<dyn DelayStrategy>),
    /// Sequential composition of strategies.
    Chain(Chain),
}

impl Strategy {
    /// Constant delay between retries.
    ///
    /// ```rust
    /// use backstop::Strategy;
    /// use std::time::Duration;
    ///
    /// let strategy = Strategy::constant(Duration::from_millis(500));
    /// assert_eq!(strategy.delay(0), Some(Duration::from_millis(500)));
    /// assert_eq!(strategy.delay(40), Some(Duration::from_millis(500)));
    /// ```
    pub fn constant(delay: Duration) -> Self {
        Strategy::Constant {
            delay,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Linearly increasing delay.
    ///
    /// ```rust
    /// use backstop::Strategy;
    /// use std::time::Duration;
    ///
    /// let strategy = Strategy::linear(Duration::from_secs(1));
    /// assert_eq!(strategy.delay(0), Some(Duration::from_secs(1)));
    /// assert_eq!(strategy.delay(1), Some(Duration::from_secs(2)));
    /// assert_eq!(strategy.delay(2), Some(Duration::from_secs(3)));
    /// ```
    pub fn linear(base: Duration) -> Self {
        Strategy::Linear {
            base,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Fibonacci-based delay.
    pub fn fibonacci(base: Duration) -> Self {
        Strategy::Fibonacci {
            base,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Exponential backoff with the default multiplier (2.0) and no jitter.
    ///
    /// ```rust
    /// use backstop::Strategy;
    /// use std::time::Duration;
    ///
    /// let strategy = Strategy::exponential(Duration::from_nanos(1));
    /// let delays: Vec<_> = (0..4).map(|k| strategy.delay(k).unwrap().as_nanos()).collect();
    /// assert_eq!(delays, vec![1, 2, 4, 8]);
    /// ```
    pub fn exponential(base: Duration) -> Self {
        Strategy::Exponential(Exponential::new(base))
    }

    /// Constant delay from an [`Interval`]; [`Interval::Never`] waits zero.
    ///
    /// ```rust
    /// use backstop::{Interval, Strategy};
    /// use std::time::Duration;
    ///
    /// let strategy = Strategy::constant_interval(Interval::Milliseconds(250));
    /// assert_eq!(strategy.delay(3), Some(Duration::from_millis(250)));
    ///
    /// let strategy = Strategy::constant_interval(Interval::Never);
    /// assert_eq!(strategy.delay(0), Some(Duration::ZERO));
    /// ```
    pub fn constant_interval(delay: Interval) -> Self {
        Self::constant(delay.to_delay())
    }

    /// Linear delay from an [`Interval`] base.
    pub fn linear_interval(base: Interval) -> Self {
        Self::linear(base.to_delay())
    }

    /// Fibonacci delay from an [`Interval`] base.
    pub fn fibonacci_interval(base: Interval) -> Self {
        Self::fibonacci(base.to_delay())
    }

    /// Exponential delay from an [`Interval`] base.
    pub fn exponential_interval(base: Interval) -> Self {
        Self::exponential(base.to_delay())
    }

    /// Strategy backed by a closure.
    ///
    /// ```rust
    /// use backstop::Strategy;
    /// use std::time::Duration;
    ///
    /// let strategy = Strategy::custom(2, |attempt| {
    ///     Some(Duration::from_millis(if attempt == 0 { 50 } else { 5 }))
    /// });
    /// assert_eq!(strategy.max_attempts(), 2);
    /// assert_eq!(strategy.delay(1), Some(Duration::from_millis(5)));
    /// ```
    pub fn custom<F>(max_attempts: u32, f: F) -> Self
    where
        F: Fn(u32) -> Option<Duration> + Send + Sync + 'static,
    {
        Strategy::Custom(Arc::new(FnStrategy::new(max_attempts, f)))
    }

    /// Wrap any [`DelayStrategy`] implementation.
    pub fn from_delay_strategy<S>(strategy: S) -> Self
    where
        S: DelayStrategy + 'static,
    {
        Strategy::Custom(Arc::new(strategy))
    }

    /// Sequential composition of `(attempts, strategy)` segments.
    pub fn chain<I>(segments: I) -> Self
    where
        I: IntoIterator<Item = (u32, Strategy)>,
    {
        Strategy::Chain(Chain::new(segments))
    }

    /// Set the retry budget.
    ///
    /// Does nothing for `Custom` and `Chain`, whose budgets are fixed by
    /// their construction.
    pub fn with_max_attempts(mut self, n: u32) -> Self {
        match &mut self {
            Strategy::Constant { max_attempts, .. }
            | Strategy::Linear { max_attempts, .. }
            | Strategy::Fibonacci { max_attempts, .. } => *max_attempts = n,
            Strategy::Exponential(exp) => exp.max_attempts = n,
            Strategy::Custom(_) | Strategy::Chain(_) => {}
        }
        self
    }

    /// Set the exponential growth factor. Only affects `Exponential`.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        if let Strategy::Exponential(exp) = &mut self {
            exp.multiplier = multiplier;
        }
        self
    }

    /// Set the jitter factor, clamped to `[0, 1]`. Only affects `Exponential`.
    ///
    /// A factor of `0.25` spreads each delay across ±25% of its computed value.
    pub fn with_jitter(mut self, factor: f64) -> Self {
        if let Strategy::Exponential(exp) = &mut self {
            exp.jitter = if factor.is_nan() {
                0.0
            } else {
                factor.clamp(0.0, 1.0)
            };
        }
        self
    }

    /// Cap every delay at `max`. Only affects `Exponential`.
    pub fn with_max_interval(mut self, max: Duration) -> Self {
        if let Strategy::Exponential(exp) = &mut self {
            exp.max_interval = Some(max);
        }
        self
    }

    /// Number of retries this strategy authorizes.
    pub fn max_attempts(&self) -> u32 {
        match self {
            Strategy::Constant { max_attempts, .. }
            | Strategy::Linear { max_attempts, .. }
            | Strategy::Fibonacci { max_attempts, .. } => *max_attempts,
            Strategy::Exponential(exp) => exp.max_attempts,
            Strategy::Custom(custom) => custom.max_attempts(),
            Strategy::Chain(chain) => chain.budget(),
        }
    }

    /// Alias of [`Strategy::max_attempts`].
    pub fn budget(&self) -> u32 {
        self.max_attempts()
    }

    /// Delay before retry `attempt` (0-indexed).
    ///
    /// Simple variants compute the delay for any index; the budget is
    /// enforced by [`RetrySequence`]. `Chain` returns `None` past its budget,
    /// `Custom` whenever its function does.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        match self {
            Strategy::Constant { delay, .. } => Some(*delay),
            Strategy::Linear { base, .. } => {
                Some(saturating_mul(*base, u64::from(attempt) + 1))
            }
            Strategy::Fibonacci { base, .. } => {
                Some(saturating_mul(*base, fibonacci(u64::from(attempt) + 1)))
            }
            Strategy::Exponential(exp) => Some(exp.delay(attempt)),
            Strategy::Custom(custom) => custom.delay(attempt),
            Strategy::Chain(chain) => chain.delay(attempt),
        }
    }

    /// A fresh, lazy sequence of this strategy's delays.
    pub fn sequence(&self) -> RetrySequence<'_> {
        RetrySequence::new(self)
    }

    /// Check the strategy's parameters.
    ///
    /// Rejects negative or `NaN` multipliers, jitter outside `[0, 1]` and
    /// empty chains, recursively.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Strategy::Exponential(exp) => {
                if exp.multiplier.is_nan() || exp.multiplier < 0.0 {
                    return Err(ConfigError::InvalidMultiplier(exp.multiplier));
                }
                if !(0.0..=1.0).contains(&exp.jitter) {
                    return Err(ConfigError::InvalidJitter(exp.jitter));
                }
                Ok(())
            }
            Strategy::Chain(chain) => {
                if chain.is_empty() {
                    return Err(ConfigError::EmptyChain);
                }
                chain.segments().try_for_each(|(_, s)| s.validate())
            }
            _ => Ok(()),
        }
    }
}

impl From<Exponential> for Strategy {
    fn from(exp: Exponential) -> Self {
        Strategy::Exponential(exp)
    }
}

impl From<Chain> for Strategy {
    fn from(chain: Chain) -> Self {
        Strategy::Chain(chain)
    }
}

impl DelayStrategy for Strategy {
    fn delay(&self, attempt: u32) -> Option<Duration> {
        Strategy::delay(self, attempt)
    }

    fn max_attempts(&self) -> u32 {
        Strategy::max_attempts(self)
    }
}

/// The nth Fibonacci number, saturating (fib(1) = fib(2) = 1).
fn fibonacci(n: u64) -> u64 {
    if n == 0 {
        return 0;
    }
    let mut a = 0u64;
    let mut b = 1u64;
    for _ in 1..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
        if b == u64::MAX {
            break;
        }
    }
    b
}
