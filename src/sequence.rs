//! Lazy delay sequences.

use std::iter::FusedIterator;
use std::time::Duration;

use crate::strategy::Strategy;

/// The delays a [`Strategy`] authorizes, produced one at a time.
///
/// A sequence yields at most `strategy.max_attempts()` delays. It is not
/// restartable: once it returns `None`, build a new one with
/// [`Strategy::sequence`]. A strategy that returns `None` for an attempt
/// consumes that slot and ends the sequence.
///
/// # Examples
///
/// ```rust
/// use backstop::Strategy;
/// use std::time::Duration;
///
/// let strategy = Strategy::linear(Duration::from_millis(100)).with_max_attempts(3);
/// let mut delays = strategy.sequence();
///
/// assert_eq!(delays.next(), Some(Duration::from_millis(100)));
/// assert_eq!(delays.next(), Some(Duration::from_millis(200)));
/// assert_eq!(delays.remaining(), 1);
/// assert_eq!(delays.next(), Some(Duration::from_millis(300)));
/// assert_eq!(delays.next(), None);
/// ```
#[derive(Debug, Clone)]
pub struct RetrySequence<'a> {
    strategy: &'a Strategy,
    attempts_taken: u32,
    max_attempts: u32,
}

impl<'a> RetrySequence<'a> {
    /// Start a sequence at attempt 0.
    pub fn new(strategy: &'a Strategy) -> Self {
        Self {
            strategy,
            attempts_taken: 0,
            max_attempts: strategy.max_attempts(),
        }
    }

    /// Delays consumed so far, including a slot that ended the sequence.
    pub fn attempts_taken(&self) -> u32 {
        self.attempts_taken
    }

    /// Delays left before the budget runs out.
    pub fn remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts_taken)
    }

    /// Returns true once no further delays will be produced.
    pub fn is_exhausted(&self) -> bool {
        self.attempts_taken >= self.max_attempts
    }
}

impl Iterator for RetrySequence<'_> {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let delay = self.strategy.delay(self.attempts_taken);
        self.attempts_taken += 1;
        if delay.is_none() {
            // The strategy gave up early; treat it as budget exhaustion.
            self.max_attempts = self.attempts_taken;
        }
        delay
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining() as usize))
    }
}

impl FusedIterator for RetrySequence<'_> {}

#[cfg(test)]
mod sequence_tests {
    use super::*;

    #[test]
    fn test_sequence_yields_budget() {
        let strategy = Strategy::constant(Duration::from_millis(5)).with_max_attempts(4);
        let delays: Vec<_> = strategy.sequence().collect();
        assert_eq!(delays, vec![Duration::from_millis(5); 4]);
    }

    #[test]
    fn test_zero_budget_is_empty() {
        let strategy = Strategy::constant(Duration::from_millis(5)).with_max_attempts(0);
        let mut delays = strategy.sequence();
        assert!(delays.is_exhausted());
        assert_eq!(delays.next(), None);
    }

    #[test]
    fn test_sequence_is_not_restartable() {
        let strategy = Strategy::constant(Duration::from_millis(5)).with_max_attempts(1);
        let mut delays = strategy.sequence();
        assert!(delays.next().is_some());
        assert_eq!(delays.next(), None);
        assert_eq!(delays.next(), None);
        assert_eq!(delays.attempts_taken(), 1);

        // A new sequence starts over.
        assert_eq!(strategy.sequence().count(), 1);
    }

    #[test]
    fn test_strategy_none_ends_sequence() {
        let strategy = Strategy::custom(10, |k| (k != 1).then(|| Duration::from_millis(1)));
        let mut delays = strategy.sequence();
        assert_eq!(delays.next(), Some(Duration::from_millis(1)));
        assert_eq!(delays.next(), None);
        assert_eq!(delays.attempts_taken(), 2);
        // Fused even though attempt 2 would produce a delay again.
        assert_eq!(delays.next(), None);
        assert_eq!(delays.remaining(), 0);
    }

    #[test]
    fn test_chain_sequence() {
        let d1 = Duration::from_millis(1);
        let d2 = Duration::from_millis(2);
        let strategy = Strategy::chain([
            (3, Strategy::constant(d1)),
            (2, Strategy::constant(d2)),
        ]);
        let delays: Vec<_> = strategy.sequence().collect();
        assert_eq!(delays, vec![d1, d1, d1, d2, d2]);
    }

    #[test]
    fn test_size_hint_upper_bound() {
        let strategy = Strategy::linear(Duration::from_millis(1)).with_max_attempts(3);
        let mut delays = strategy.sequence();
        assert_eq!(delays.size_hint(), (0, Some(3)));
        delays.next();
        assert_eq!(delays.size_hint(), (0, Some(2)));
    }
}
