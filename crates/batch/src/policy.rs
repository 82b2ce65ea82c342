//! Skip and retry policies: pure decisions over an error and a counter.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ItemError};

/// Decides whether a failing item may be discarded.
pub trait SkipPolicy: Send + Sync {
    /// `skip_count` is the number of items this step execution has already
    /// skipped, across read, process and write.
    fn should_skip(&self, error: &ItemError, skip_count: u64) -> bool;
}

/// Skips recognised error kinds until the step execution has used up its limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitCheckingSkipPolicy {
    skippable: HashSet<ErrorKind>,
    limit: u64,
}

impl LimitCheckingSkipPolicy {
    pub fn new(limit: u64, skippable: impl IntoIterator<Item = ErrorKind>) -> Self {
        Self {
            skippable: skippable.into_iter().collect(),
            limit,
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }
}

impl SkipPolicy for LimitCheckingSkipPolicy {
    fn should_skip(&self, error: &ItemError, skip_count: u64) -> bool {
        self.skippable.contains(&error.kind()) && skip_count < self.limit
    }
}

/// Never skips.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverSkipPolicy;

impl SkipPolicy for NeverSkipPolicy {
    fn should_skip(&self, _error: &ItemError, _skip_count: u64) -> bool {
        false
    }
}

/// Skips every item-level error. Resource errors still fail the step.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysSkipPolicy;

impl SkipPolicy for AlwaysSkipPolicy {
    fn should_skip(&self, error: &ItemError, _skip_count: u64) -> bool {
        error.kind() != ErrorKind::Resource
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(attempt - 1)
    #[default]
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

impl BackoffStrategy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fixed" => Some(Self::Fixed),
            "exponential" => Some(Self::Exponential),
            "linear" => Some(Self::Linear),
            _ => None,
        }
    }
}

/// Retry policy for processing a single item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed per item after its first failure (0 = no retries)
    pub max_retries: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    retryable: HashSet<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::no_retry()
    }
}

impl RetryPolicy {
    /// Create a policy with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            strategy: BackoffStrategy::Fixed,
            retryable: HashSet::from([ErrorKind::Transient]),
        }
    }

    /// Create a policy with fixed delays.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            ..Self::no_retry()
        }
    }

    /// Create a policy with exponential backoff.
    pub fn exponential(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            ..Self::no_retry()
        }
    }

    /// Replace the set of retryable error kinds (transient only by default).
    pub fn with_retryable(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retryable = kinds.into_iter().collect();
        self
    }

    /// `attempt` is the number of times the item has failed so far (1-indexed).
    pub fn should_retry(&self, error: &ItemError, attempt: u32) -> bool {
        self.retryable.contains(&error.kind()) && attempt <= self.max_retries
    }

    /// Calculate delay before retry number `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let factor = 2u32.saturating_pow(attempt - 1);
                self.base_delay.saturating_mul(factor)
            }
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
        };

        delay.min(self.max_delay.max(self.base_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_error() -> ItemError {
        ItemError::parse(Some(1), "x", "bad")
    }

    #[test]
    fn limit_policy_skips_until_limit() {
        let policy = LimitCheckingSkipPolicy::new(2, [ErrorKind::Parse]);
        assert!(policy.should_skip(&parse_error(), 0));
        assert!(policy.should_skip(&parse_error(), 1));
        assert!(!policy.should_skip(&parse_error(), 2));
    }

    #[test]
    fn limit_policy_ignores_unrecognised_kinds() {
        let policy = LimitCheckingSkipPolicy::new(10, [ErrorKind::Parse]);
        assert!(!policy.should_skip(&ItemError::permanent("boom"), 0));
    }

    #[test]
    fn always_skip_still_refuses_resource_errors() {
        assert!(AlwaysSkipPolicy.should_skip(&ItemError::permanent("p"), 1_000));
        assert!(!AlwaysSkipPolicy.should_skip(&ItemError::resource("gone"), 0));
        assert!(!NeverSkipPolicy.should_skip(&parse_error(), 0));
    }

    #[test]
    fn exponential_backoff_calculates_correctly() {
        let policy =
            RetryPolicy::exponential(5, Duration::from_millis(100), Duration::from_secs(10));

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let policy =
            RetryPolicy::exponential(50, Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(1));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(500));

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
    }

    #[test]
    fn linear_backoff_increases_linearly() {
        let policy = RetryPolicy {
            strategy: BackoffStrategy::Linear,
            ..RetryPolicy::exponential(5, Duration::from_millis(100), Duration::from_secs(10))
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(300));
    }

    #[test]
    fn should_retry_allows_exactly_max_retries() {
        let policy = RetryPolicy::fixed(3, Duration::ZERO);
        let err = ItemError::transient("timeout");

        assert!(policy.should_retry(&err, 1));
        assert!(policy.should_retry(&err, 3));
        assert!(!policy.should_retry(&err, 4));
    }

    #[test]
    fn permanent_errors_are_not_retried_by_default() {
        let policy = RetryPolicy::fixed(3, Duration::ZERO);
        assert!(!policy.should_retry(&ItemError::permanent("nope"), 1));

        let policy = policy.with_retryable([ErrorKind::Transient, ErrorKind::Permanent]);
        assert!(policy.should_retry(&ItemError::permanent("nope"), 1));
    }

    #[test]
    fn backoff_strategy_parses_names() {
        assert_eq!(BackoffStrategy::parse("Linear"), Some(BackoffStrategy::Linear));
        assert_eq!(BackoffStrategy::parse("quadratic"), None);
    }
}
