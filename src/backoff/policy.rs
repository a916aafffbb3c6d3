//! # Delay Policy
//!
//! Pure mapping from a [`CounterRecord`] snapshot to an artificial delay.
//!
//! The first `free_errors` errors of a window are delivered immediately, so an
//! occasional mistake costs nothing. Past that the delay doubles with every
//! error, with the exponent capped at `max_exponent` and the result capped at
//! `max_delay`.
//!
//! ## Example
//!
//! ```rust
//! use shard_router_backoff::backoff::DelayPolicy;
//! use std::time::Duration;
//!
//! let policy = DelayPolicy::default(); // 10ms base, 2^6 cap, 640ms max, 1 free error
//! assert_eq!(policy.delay_for_count(1), Duration::ZERO);
//! assert_eq!(policy.delay_for_count(2), Duration::from_millis(10));
//! assert_eq!(policy.delay_for_count(3), Duration::from_millis(20));
//! assert_eq!(policy.delay_for_count(50), Duration::from_millis(640));
//! ```

use crate::backoff::error::ConfigError;
use crate::backoff::ledger::CounterRecord;
use crate::constants::{
    DEFAULT_BACKOFF_BASE_DELAY_MS, DEFAULT_BACKOFF_FREE_ERRORS, DEFAULT_BACKOFF_MAX_DELAY_MS,
    DEFAULT_BACKOFF_MAX_EXPONENT,
};
use std::time::Duration;

/// Exponent ceiling that keeps `2^exp` inside a `u32` multiplier
const HARD_MAX_EXPONENT: u32 = 31;

/// More free errors would hold the delay at zero for several errors in a row
const MAX_FREE_ERRORS: u32 = 1;

/// Exponential delay parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayPolicy {
    /// Delay of the first penalised error
    pub base_delay: Duration,
    /// Cap on the doubling exponent, applied before multiplying
    pub max_exponent: u32,
    /// Cap on the resulting delay
    pub max_delay: Duration,
    /// Errors per window delivered without delay (0 or 1)
    pub free_errors: u32,
}

impl Default for DelayPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(DEFAULT_BACKOFF_BASE_DELAY_MS),
            max_exponent: DEFAULT_BACKOFF_MAX_EXPONENT,
            max_delay: Duration::from_millis(DEFAULT_BACKOFF_MAX_DELAY_MS),
            free_errors: DEFAULT_BACKOFF_FREE_ERRORS,
        }
    }
}

impl DelayPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay.is_zero() {
            return Err(ConfigError::ZeroBaseDelay);
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::MaxBelowBase {
                base: self.base_delay,
                max: self.max_delay,
            });
        }
        if self.free_errors > MAX_FREE_ERRORS {
            return Err(ConfigError::TooManyFreeErrors(self.free_errors));
        }
        Ok(())
    }

    #[must_use]
    pub fn delay_for(&self, snapshot: &CounterRecord) -> Duration {
        self.delay_for_count(snapshot.count)
    }

    /// Delay for the `count`-th error of a window (1-based)
    #[must_use]
    pub fn delay_for_count(&self, count: u32) -> Duration {
        if count <= self.free_errors {
            return Duration::ZERO;
        }
        let exponent = (count - self.free_errors - 1)
            .min(self.max_exponent)
            .min(HARD_MAX_EXPONENT);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// True once further errors can no longer increase the delay
    #[must_use]
    pub fn is_saturated(&self, count: u32) -> bool {
        count > self.free_errors
            && self.delay_for_count(count) >= self.delay_for_count(count.saturating_add(1))
    }
}
