//! # Backoff
//!
//! Two schedules live here:
//!
//! - the per-action retry curve, which decides whether a failed action is still
//!   inside its wait window
//! - the constant schedule the coordinator uses to resubmit throttled bulk items

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::models::{ActionMetaData, ActionRetry, RetryBackoff};

/// Wait before the next retry after `consumed_retries` failed attempts
pub fn retry_delay(backoff: RetryBackoff, consumed_retries: u64, delay: Duration) -> Duration {
    match backoff {
        RetryBackoff::Exponential => {
            let exponent = consumed_retries.saturating_sub(1).min(u32::MAX as u64) as u32;
            let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
            delay.saturating_mul(factor)
        }
        RetryBackoff::Constant => delay,
        RetryBackoff::Linear => {
            let factor = consumed_retries.min(u32::MAX as u64) as u32;
            delay.saturating_mul(factor)
        }
    }
}

/// Whether a retried action is still waiting out its backoff window
pub fn should_backoff(retry: &ActionRetry, action: Option<&ActionMetaData>, now: DateTime<Utc>) -> bool {
    let Some(action) = action else {
        return false;
    };
    if action.consumed_retries == 0 {
        return false;
    }
    let Some(last_retry) = action.last_retry_time else {
        return false;
    };

    let wait = retry_delay(retry.backoff, action.consumed_retries, retry.delay);
    let Ok(wait) = chrono::Duration::from_std(wait) else {
        return true;
    };
    last_retry + wait > now
}

/// Fixed delay between a bounded number of retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantBackoff {
    delay: Duration,
    max_retries: u32,
}

impl ConstantBackoff {
    pub fn new(delay: Duration, max_retries: u32) -> Self {
        Self { delay, max_retries }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delays before each retry, in order
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(move |_| self.delay)
    }
}
