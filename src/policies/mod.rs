//! Retry policies.
//!
//! This module groups the knobs that control **how long** a failed message is
//! held back before the transport redelivers it, and **when** to give up.
//!
//! ## Contents
//! - [`RetryBackoff`] polynomial backoff with a retry budget
//! - [`RetryDecision`] extend the ack deadline, or give up and acknowledge
//! - [`BackoffJitter`] randomization to avoid redelivery bursts
//!
//! ## Quick wiring
//! ```text
//! AutoRetryConfig ──► RetryBackoff
//!      └─► core::dispatch uses:
//!           - decide(attempts) on every handler failure
//!           - Extend(d) → message.modify_ack_deadline(d)
//!           - GiveUp    → message.acknowledge()
//! ```

mod backoff;
mod jitter;

pub use backoff::{RetryBackoff, RetryDecision, UNKNOWN_ATTEMPT_DELAY};
pub use jitter::BackoffJitter;
