use crate::core::{LockError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default name of the per-document version counter.
pub const DEFAULT_VERSION_FIELD: &str = "lock_version";

/// Retry behavior for conflicting writes.
///
/// `max_retries` counts retries only: an operation runs at most
/// `1 + max_retries` times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds. Zero disables sleeping.
    pub initial_backoff_ms: u64,
    /// Upper bound of the exponential part of the delay.
    pub max_backoff_ms: u64,
    /// Adds a random offset of up to half the delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 5,
            max_backoff_ms: 250,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Retries without sleeping between attempts.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            jitter: false,
        }
    }

    pub fn initial_backoff_ms(mut self, ms: u64) -> Self {
        self.initial_backoff_ms = ms;
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.max_backoff_ms = ms;
        self
    }

    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Exponential part of the delay before retry number `retry` (1-based).
    pub fn base_backoff_ms(&self, retry: u32) -> u64 {
        if self.initial_backoff_ms == 0 {
            return 0;
        }
        let max = self.max_backoff_ms.max(self.initial_backoff_ms);
        let factor = 2u64.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff_ms.saturating_mul(factor).min(max)
    }

    /// Delay to sleep before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let base = self.base_backoff_ms(retry);
        let offset = if self.jitter && base > 1 {
            rand::thread_rng().gen_range(0..=base / 2)
        } else {
            0
        };
        Duration::from_millis(base.saturating_add(offset))
    }
}

/// Process-wide defaults applied when entity types are registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockingConfig {
    /// Version field used by types that do not name their own.
    pub version_field: String,
    /// Retry policy used by `with_locking` helpers.
    pub retry: RetryPolicy,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            version_field: DEFAULT_VERSION_FIELD.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl LockingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON configuration; missing keys keep their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn version_field(mut self, field: &str) -> Self {
        self.version_field = field.to_string();
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_version_field(&self.version_field)
    }
}

pub(crate) fn validate_version_field(field: &str) -> Result<()> {
    if field.is_empty() || field.contains('.') || field.starts_with('$') || field == "_id" {
        return Err(LockError::Config(format!(
            "'{}' cannot be used as a version field",
            field
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::new(5).initial_backoff_ms(10).max_backoff_ms(50);
        let curve: Vec<u64> = (1..=5).map(|retry| policy.base_backoff_ms(retry)).collect();
        assert_eq!(curve, vec![10, 20, 40, 50, 50]);
    }

    #[test]
    fn jitter_stays_within_half_of_base() {
        let policy = RetryPolicy::new(3).initial_backoff_ms(40).max_backoff_ms(40);
        for _ in 0..100 {
            let delay = policy.backoff(1).as_millis() as u64;
            assert!((40..=60).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[test]
    fn immediate_policy_never_sleeps() {
        let policy = RetryPolicy::immediate(10);
        assert_eq!(policy.backoff(1), Duration::ZERO);
        assert_eq!(policy.backoff(9), Duration::ZERO);
    }

    #[test]
    fn config_from_partial_json() {
        let config =
            LockingConfig::from_json_str(r#"{ "version_field": "rev", "retry": { "max_retries": 7 } }"#)
                .unwrap();
        assert_eq!(config.version_field, "rev");
        assert_eq!(config.retry.max_retries, 7);
        assert_eq!(config.retry.max_backoff_ms, 250);
    }

    #[test]
    fn rejects_nested_version_field() {
        let err = LockingConfig::from_json_str(r#"{ "version_field": "meta.rev" }"#).unwrap_err();
        assert!(matches!(err, LockError::Config(_)));
    }
}
