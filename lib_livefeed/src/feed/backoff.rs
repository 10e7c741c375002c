//! Reconnect scheduling: capped exponential backoff bounded by an attempt ceiling.

use std::time::Duration;

use crate::configs::RetryPolicy;
use crate::feed::state::RetryState;

/// What to do after a genuine stream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffDecision {
    /// Schedule one reconnect after this delay.
    Reconnect(Duration),
    /// Retry budget spent: stop streaming and poll instead.
    Fallback,
}

/// Delay before reconnect attempt `attempt` (0-based): `min(base * 2^attempt, cap)`.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    let delay_ms = policy
        .base_delay_ms
        .saturating_mul(factor)
        .min(policy.max_delay_ms);
    Duration::from_millis(delay_ms)
}

pub fn decide(policy: &RetryPolicy, retry: &RetryState) -> BackoffDecision {
    if retry.exhausted() {
        BackoffDecision::Fallback
    } else {
        BackoffDecision::Reconnect(backoff_delay(policy, retry.attempt_count()))
    }
}
