//! Duration normalisation.
//!
//! Every delay computed by this crate passes through integer nanoseconds
//! (`u64`). The helpers here convert from the units callers actually hold
//! (seconds, millis, float nanos from exponential math) without wrapping:
//! everything saturates at `u64::MAX` nanoseconds and clamps at zero.

use std::time::Duration;

const NANOS_PER_MICRO: u64 = 1_000;
const NANOS_PER_MILLI: u64 = 1_000_000;
const NANOS_PER_SEC: u64 = 1_000_000_000;

/// The largest duration representable in integer nanoseconds.
pub const MAX_NANOS_DURATION: Duration = Duration::from_nanos(u64::MAX);

/// A time interval in a caller's native unit.
///
/// Negative magnitudes are accepted and clamp to zero. [`Interval::Never`]
/// is the "no duration" sentinel.
///
/// # Examples
///
/// ```rust
/// use backstop::duration::Interval;
///
/// assert_eq!(Interval::Milliseconds(5).as_nanos(), Some(5_000_000));
/// assert_eq!(Interval::Seconds(-3).as_nanos(), Some(0));
/// assert_eq!(Interval::Seconds(i64::MAX).as_nanos(), Some(u64::MAX));
/// assert_eq!(Interval::Never.as_nanos(), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interval {
    /// Whole seconds.
    Seconds(i64),
    /// Whole milliseconds.
    Milliseconds(i64),
    /// Whole microseconds.
    Microseconds(i64),
    /// Whole nanoseconds.
    Nanoseconds(i64),
    /// No duration at all.
    Never,
}

/// Error converting an [`Interval`] into a [`Duration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationError {
    /// The interval was the `Never` sentinel.
    Never,
}

impl std::fmt::Display for DurationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Never => write!(f, "interval `never` has no finite duration"),
        }
    }
}

impl std::error::Error for DurationError {}

impl Interval {
    /// Nanoseconds in this interval, or `None` for [`Interval::Never`].
    pub fn as_nanos(&self) -> Option<u64> {
        let (magnitude, scale) = match *self {
            Interval::Seconds(n) => (n, NANOS_PER_SEC),
            Interval::Milliseconds(n) => (n, NANOS_PER_MILLI),
            Interval::Microseconds(n) => (n, NANOS_PER_MICRO),
            Interval::Nanoseconds(n) => (n, 1),
            Interval::Never => return None,
        };
        if magnitude <= 0 {
            return Some(0);
        }
        Some((magnitude as u64).saturating_mul(scale))
    }

    /// The interval as a [`Duration`], or `None` for [`Interval::Never`].
    pub fn to_duration(&self) -> Option<Duration> {
        self.as_nanos().map(Duration::from_nanos)
    }

    /// The interval as a backoff delay: [`Interval::Never`] waits zero.
    ///
    /// ```rust
    /// use backstop::duration::Interval;
    /// use std::time::Duration;
    ///
    /// assert_eq!(Interval::Seconds(2).to_delay(), Duration::from_secs(2));
    /// assert_eq!(Interval::Never.to_delay(), Duration::ZERO);
    /// ```
    pub fn to_delay(&self) -> Duration {
        self.to_duration().unwrap_or(Duration::ZERO)
    }
}

impl From<Duration> for Interval {
    fn from(d: Duration) -> Self {
        Interval::Nanoseconds(duration_to_nanos(d).min(i64::MAX as u64) as i64)
    }
}

impl TryFrom<Interval> for Duration {
    type Error = DurationError;

    fn try_from(interval: Interval) -> Result<Self, Self::Error> {
        interval.to_duration().ok_or(DurationError::Never)
    }
}

/// Nanoseconds in `d`, saturating at `u64::MAX`.
pub fn duration_to_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Convert a floating-point nanosecond count into a [`Duration`].
///
/// `NaN` and anything `<= 0` become zero; anything at or past `u64::MAX`
/// becomes [`MAX_NANOS_DURATION`].
///
/// ```rust
/// use backstop::duration::{nanos_f64_to_duration, MAX_NANOS_DURATION};
/// use std::time::Duration;
///
/// assert_eq!(nanos_f64_to_duration(1500.7), Duration::from_nanos(1500));
/// assert_eq!(nanos_f64_to_duration(-4.0), Duration::ZERO);
/// assert_eq!(nanos_f64_to_duration(f64::INFINITY), MAX_NANOS_DURATION);
/// ```
pub fn nanos_f64_to_duration(nanos: f64) -> Duration {
    if nanos.is_nan() || nanos <= 0.0 {
        Duration::ZERO
    } else if nanos >= u64::MAX as f64 {
        MAX_NANOS_DURATION
    } else {
        Duration::from_nanos(nanos as u64)
    }
}

/// Multiply `d` by `factor` in nanosecond space, saturating.
pub fn saturating_mul(d: Duration, factor: u64) -> Duration {
    Duration::from_nanos(duration_to_nanos(d).saturating_mul(factor))
}
