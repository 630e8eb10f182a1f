//! Exponential backoff for the retry interceptor.
//!
//! `delay(n)` is the pause inserted before retry `n + 1`, i.e. `n = 0` is the wait between the
//! first attempt and the first retry. Exponential backoff computes
//! `initial * multiplier^n` in floating point and rounds to whole nanoseconds.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use ninelives_interceptors::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(100))
//!     .with_multiplier(1.5)
//!     .unwrap();
//! assert_eq!(backoff.delay(0), Duration::from_millis(100));
//! assert_eq!(backoff.delay(1), Duration::from_millis(150));
//! assert_eq!(backoff.delay(2), Duration::from_millis(225));
//! ```
//!
//! Overflow behavior: delays saturate at `MAX_BACKOFF` (1 day).

use std::time::Duration;

/// Upper bound for any computed delay (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Multiplier used by [`Backoff::exponential`] unless overridden.
pub const DEFAULT_MULTIPLIER: f64 = 1.5;

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackoffError {
    #[error("max must be greater than zero")]
    MaxMustBePositive,
    #[error("max ({max:?}) must be >= initial delay ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
    #[error("multiplier must be finite and >= 1.0 (got {0})")]
    InvalidMultiplier(f64),
}

/// Exponential delay schedule between retry attempts, optionally capped.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    base: Duration,
    multiplier: f64,
    max: Option<Duration>,
}

impl Backoff {
    /// `base * multiplier^n`, with the default multiplier of 1.5.
    pub fn exponential(base: Duration) -> Self {
        Self { base, multiplier: DEFAULT_MULTIPLIER, max: None }
    }

    /// Override the growth factor. `1.0` gives a constant delay.
    pub fn with_multiplier(mut self, multiplier: f64) -> Result<Self, BackoffError> {
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(BackoffError::InvalidMultiplier(multiplier));
        }
        self.multiplier = multiplier;
        Ok(self)
    }

    /// Cap every computed delay at `max`.
    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        if max < self.base {
            return Err(BackoffError::MaxLessThanBase { base: self.base, max });
        }
        self.max = Some(max);
        Ok(self)
    }

    /// Initial delay (the delay before the first retry).
    pub fn initial(&self) -> Duration {
        self.base
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Delay inserted before retry `retry + 1` (0-based).
    pub fn delay(&self, retry: usize) -> Duration {
        if self.base.is_zero() {
            return Duration::ZERO;
        }
        let exponent = retry.min(i32::MAX as usize) as i32;
        let nanos = self.base.as_nanos() as f64 * self.multiplier.powi(exponent);
        let exp = if !nanos.is_finite() || nanos >= MAX_BACKOFF.as_nanos() as f64 {
            MAX_BACKOFF
        } else {
            Duration::from_nanos(nanos.round() as u64)
        };
        cap(exp, self.max).min(MAX_BACKOFF)
    }
}

fn cap(delay: Duration, max: Option<Duration>) -> Duration {
    max.map(|m| delay.min(m)).unwrap_or(delay)
}
