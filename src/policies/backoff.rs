//! # Retry backoff for failed deliveries.
//!
//! When auto-retry is enabled, a failed message is not rejected; its ack
//! deadline is pushed out by a backoff window instead. [`RetryBackoff`] computes
//! that window from the transport's delivery-attempt counter:
//!
//! ```text
//! delay(n) = min(maximum, minimum + n⁴ s + jitter(n))
//! delay(unknown) = clamp(60 s, minimum, maximum)
//! ```
//!
//! Once `n >= max_attempts` the retry budget is spent and the message is
//! acknowledged instead ([`RetryDecision::GiveUp`]).
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use pubsubvisor::{BackoffJitter, RetryBackoff, RetryDecision};
//!
//! let backoff = RetryBackoff {
//!     minimum: Duration::from_secs(15),
//!     maximum: Duration::from_secs(600),
//!     max_attempts: 10,
//!     jitter: BackoffJitter::None,
//! };
//!
//! // 15 s + 2⁴ s
//! assert_eq!(backoff.delay(Some(2)), Duration::from_secs(31));
//! // 15 s + 6⁴ s is capped
//! assert_eq!(backoff.delay(Some(6)), Duration::from_secs(600));
//! assert_eq!(backoff.decide(Some(10)), RetryDecision::GiveUp);
//! ```

use std::time::Duration;

use crate::policies::jitter::BackoffJitter;

/// Delay used when the transport does not report a delivery attempt.
pub const UNKNOWN_ATTEMPT_DELAY: Duration = Duration::from_secs(60);

/// What to do with a failed message under auto-retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Extend the ack deadline by this much.
    Extend(Duration),
    /// Retry budget exhausted: acknowledge and stop retrying.
    GiveUp,
}

/// Polynomial retry backoff with a retry budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryBackoff {
    /// Lower bound of every backoff window.
    pub minimum: Duration,
    /// Upper bound of every backoff window.
    pub maximum: Duration,
    /// Delivery attempts after which the message is given up on.
    pub max_attempts: u32,
    /// Randomization added per attempt.
    pub jitter: BackoffJitter,
}

impl Default for RetryBackoff {
    /// 15 s .. 600 s, 1200 attempts, smeared.
    fn default() -> Self {
        Self {
            minimum: Duration::from_secs(15),
            maximum: Duration::from_secs(600),
            max_attempts: 1200,
            jitter: BackoffJitter::Smear,
        }
    }
}

impl RetryBackoff {
    /// Backoff window for the given delivery attempt, always inside `[minimum, maximum]`.
    ///
    /// If `minimum > maximum`, `maximum` wins.
    pub fn delay(&self, attempts: Option<u32>) -> Duration {
        let floor = self.minimum.min(self.maximum);
        let Some(n) = attempts else {
            return UNKNOWN_ATTEMPT_DELAY.clamp(floor, self.maximum);
        };

        let poly = Duration::from_secs(u64::from(n).saturating_pow(4));
        self.minimum
            .saturating_add(poly)
            .saturating_add(self.jitter.extra(n))
            .clamp(floor, self.maximum)
    }

    /// Applies the retry budget, then computes the window.
    pub fn decide(&self, attempts: Option<u32>) -> RetryDecision {
        match attempts {
            Some(n) if n >= self.max_attempts => RetryDecision::GiveUp,
            _ => RetryDecision::Extend(self.delay(attempts)),
        }
    }
}
