//! Serializable retry configuration.
//!
//! [`RetryConfig`] is the plain-data form of a [`RetryPolicy`], suitable for loading from JSON or
//! any other serde format. Missing fields take the policy defaults.
//!
//! ```rust
//! use ninelives_interceptors::{config::RetryConfig, RetryPolicy};
//!
//! let config: RetryConfig = serde_json::from_str(
//!     r#"{ "max_retries": 5, "initial_backoff_ms": 50, "retryable_codes": ["unavailable"] }"#,
//! )
//! .unwrap();
//! let policy = RetryPolicy::try_from(config).unwrap();
//! assert_eq!(policy.max_retries(), 5);
//! ```

use crate::backoff::DEFAULT_MULTIPLIER;
use crate::retry::{BuildError, DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_RETRIES, DEFAULT_RETRYABLE_CODES};
use crate::{Backoff, Code, Jitter, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Upper bound on a single delay. `None` leaves delays uncapped (below one day).
    pub max_backoff_ms: Option<u64>,
    pub jitter: Jitter,
    pub retryable_codes: Vec<Code>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF.as_millis() as u64,
            backoff_multiplier: DEFAULT_MULTIPLIER,
            max_backoff_ms: None,
            jitter: Jitter::None,
            retryable_codes: DEFAULT_RETRYABLE_CODES.to_vec(),
        }
    }
}

impl TryFrom<RetryConfig> for RetryPolicy {
    type Error = BuildError;

    fn try_from(config: RetryConfig) -> Result<Self, Self::Error> {
        let mut backoff = Backoff::exponential(Duration::from_millis(config.initial_backoff_ms))
            .with_multiplier(config.backoff_multiplier)?;
        if let Some(max) = config.max_backoff_ms {
            backoff = backoff.with_max(Duration::from_millis(max))?;
        }
        RetryPolicy::builder()
            .max_retries(config.max_retries)
            .backoff(backoff)
            .with_jitter(config.jitter)
            .retry_on(config.retryable_codes)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config: RetryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, RetryConfig::default());

        let policy = RetryPolicy::try_from(config).unwrap();
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(225));
    }

    #[test]
    fn full_config() {
        let config: RetryConfig = serde_json::from_str(
            r#"{
                "max_retries": 4,
                "initial_backoff_ms": 10,
                "backoff_multiplier": 2.0,
                "max_backoff_ms": 50,
                "jitter": "equal",
                "retryable_codes": ["resource_exhausted", "unavailable"]
            }"#,
        )
        .unwrap();
        assert_eq!(config.jitter, Jitter::Equal);

        let policy = RetryPolicy::try_from(config).unwrap();
        assert_eq!(policy.delay(0), Duration::from_millis(10));
        assert_eq!(policy.delay(2), Duration::from_millis(40));
        assert_eq!(policy.delay(3), Duration::from_millis(50));
        assert!(policy.is_retryable(&crate::Status::new(Code::ResourceExhausted, "quota").into()));
        assert!(!policy.is_retryable(&crate::Status::aborted("conflict").into()));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let bad_multiplier = RetryConfig { backoff_multiplier: 0.5, ..RetryConfig::default() };
        assert!(matches!(RetryPolicy::try_from(bad_multiplier), Err(BuildError::Backoff(_))));

        let ok_code = RetryConfig { retryable_codes: vec![Code::Ok], ..RetryConfig::default() };
        assert_eq!(RetryPolicy::try_from(ok_code).unwrap_err(), BuildError::OkIsNotAFailure);

        assert!(serde_json::from_str::<RetryConfig>(r#"{"max_attempts": 3}"#).is_err());
        assert!(serde_json::from_str::<RetryConfig>(r#"{"retryable_codes": ["flaky"]}"#).is_err());
    }
}
