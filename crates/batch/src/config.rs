//! Engine defaults: chunk size, skip limit and retry backoff.

use std::collections::HashSet;
use std::time::Duration;

use thiserror::Error;

use crate::error::ErrorKind;
use crate::policy::{BackoffStrategy, LimitCheckingSkipPolicy, RetryPolicy};

pub const CHUNK_SIZE_ENV: &str = "CHUNKFLOW_CHUNK_SIZE";
pub const SKIP_LIMIT_ENV: &str = "CHUNKFLOW_SKIP_LIMIT";
pub const RETRY_LIMIT_ENV: &str = "CHUNKFLOW_RETRY_LIMIT";
pub const BACKOFF_MS_ENV: &str = "CHUNKFLOW_BACKOFF_MS";
pub const BACKOFF_MAX_MS_ENV: &str = "CHUNKFLOW_BACKOFF_MAX_MS";
pub const BACKOFF_STRATEGY_ENV: &str = "CHUNKFLOW_BACKOFF_STRATEGY";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{name}: invalid value '{value}': {reason}")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(name: &str, value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Batch engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    pub chunk_size: usize,
    /// Skips allowed per step execution
    pub skip_limit: u64,
    /// Retries allowed per item
    pub retry_limit: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub backoff_strategy: BackoffStrategy,
    /// Error kinds the default skip policy may skip
    pub skippable: HashSet<ErrorKind>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
            skip_limit: 10,
            retry_limit: 0,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(10),
            backoff_strategy: BackoffStrategy::Exponential,
            skippable: HashSet::from([ErrorKind::Parse]),
        }
    }
}

impl BatchConfig {
    pub const DEFAULT_CHUNK_SIZE: usize = 100;

    /// Defaults overridden by `CHUNKFLOW_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(size) = parse_var::<usize, _>(&lookup, CHUNK_SIZE_ENV)? {
            if size == 0 {
                return Err(ConfigError::invalid(CHUNK_SIZE_ENV, "0", "must be at least 1"));
            }
            config.chunk_size = size;
        }
        if let Some(limit) = parse_var(&lookup, SKIP_LIMIT_ENV)? {
            config.skip_limit = limit;
        }
        if let Some(limit) = parse_var(&lookup, RETRY_LIMIT_ENV)? {
            config.retry_limit = limit;
        }
        if let Some(ms) = parse_var(&lookup, BACKOFF_MS_ENV)? {
            config.backoff_base = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, BACKOFF_MAX_MS_ENV)? {
            config.backoff_max = Duration::from_millis(ms);
        }
        if let Some(raw) = lookup(BACKOFF_STRATEGY_ENV) {
            config.backoff_strategy = BackoffStrategy::parse(&raw).ok_or_else(|| {
                ConfigError::invalid(
                    BACKOFF_STRATEGY_ENV,
                    &raw,
                    "expected fixed, linear or exponential",
                )
            })?;
        }

        Ok(config)
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_skip_limit(mut self, limit: u64) -> Self {
        self.skip_limit = limit;
        self
    }

    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit;
        self
    }

    pub fn with_backoff(
        mut self,
        strategy: BackoffStrategy,
        base: Duration,
        max: Duration,
    ) -> Self {
        self.backoff_strategy = strategy;
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    pub fn with_skippable(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.skippable = kinds.into_iter().collect();
        self
    }

    pub fn skip_policy(&self) -> LimitCheckingSkipPolicy {
        LimitCheckingSkipPolicy::new(self.skip_limit, self.skippable.iter().copied())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let mut policy = RetryPolicy::no_retry();
        policy.max_retries = self.retry_limit;
        policy.base_delay = self.backoff_base;
        policy.max_delay = self.backoff_max;
        policy.strategy = self.backoff_strategy;
        policy
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::invalid(name, &raw, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let config = BatchConfig::default();
        assert_eq!(config.chunk_size, 100);
        assert_eq!(config.skip_limit, 10);
        assert_eq!(config.retry_limit, 0);
        assert_eq!(config.skip_policy().limit(), 10);
        assert_eq!(config.retry_policy().max_retries, 0);
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = BatchConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, BatchConfig::default());
    }

    #[test]
    fn variables_override_defaults() {
        let config = BatchConfig::from_lookup(lookup(&[
            (CHUNK_SIZE_ENV, "25"),
            (SKIP_LIMIT_ENV, " 3 "),
            (RETRY_LIMIT_ENV, "2"),
            (BACKOFF_MS_ENV, "50"),
            (BACKOFF_MAX_MS_ENV, "400"),
            (BACKOFF_STRATEGY_ENV, "linear"),
        ]))
        .unwrap();

        assert_eq!(config.chunk_size, 25);
        assert_eq!(config.skip_limit, 3);

        let retry = config.retry_policy();
        assert_eq!(retry.max_retries, 2);
        assert_eq!(retry.strategy, BackoffStrategy::Linear);
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(100));
        assert_eq!(retry.delay_for_attempt(20), Duration::from_millis(400));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = BatchConfig::from_lookup(lookup(&[(SKIP_LIMIT_ENV, "many")])).unwrap_err();
        assert!(err.to_string().starts_with("CHUNKFLOW_SKIP_LIMIT: invalid value 'many'"));

        assert!(BatchConfig::from_lookup(lookup(&[(CHUNK_SIZE_ENV, "0")])).is_err());
        assert!(BatchConfig::from_lookup(lookup(&[(BACKOFF_STRATEGY_ENV, "random")])).is_err());
    }

    #[test]
    fn builders_chain() {
        let config = BatchConfig::default()
            .with_chunk_size(5)
            .with_retry_limit(1)
            .with_skippable([ErrorKind::Parse, ErrorKind::Permanent]);
        assert_eq!(config.chunk_size, 5);
        assert_eq!(config.retry_limit, 1);
        assert!(config.skippable.contains(&ErrorKind::Permanent));
    }
}
