//! # Jitter for retry backoff windows.
//!
//! [`BackoffJitter`] spreads redeliveries of messages that failed together so
//! they do not come back as one burst.
//!
//! - [`BackoffJitter::None`] no randomization, predictable (and monotonic) delays
//! - [`BackoffJitter::Smear`] adds `random[0, 30) seconds × (attempt + 1)`

use rand::Rng;
use std::time::Duration;

/// Upper bound (exclusive, in seconds) of the per-attempt random smear.
const SMEAR_SECS: u64 = 30;

/// Randomization applied on top of the polynomial backoff.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackoffJitter {
    /// No jitter: delays depend only on the attempt number.
    None,

    /// Smear: adds `random[0, 30) seconds × (attempt + 1)`.
    ///
    /// The smear grows with the attempt, so later retries are spread wider.
    #[default]
    Smear,
}

impl BackoffJitter {
    /// Random extra delay for the given attempt.
    pub fn extra(&self, attempt: u32) -> Duration {
        match self {
            BackoffJitter::None => Duration::ZERO,
            BackoffJitter::Smear => {
                let step = rand::rng().random_range(0..SMEAR_SECS);
                Duration::from_secs(step.saturating_mul(u64::from(attempt) + 1))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smear_is_bounded_by_attempt() {
        for attempt in 0..20u32 {
            let extra = BackoffJitter::Smear.extra(attempt);
            assert!(extra < Duration::from_secs(SMEAR_SECS * (u64::from(attempt) + 1)));
        }
        assert_eq!(BackoffJitter::None.extra(7), Duration::ZERO);
    }
}
