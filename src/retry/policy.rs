//! Retry eligibility and backoff

use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

use crate::config::RetryConfig;
use crate::disbursement::state::DisbursementStatus;

/// Result codes that are never retried: insufficient float, invalid
/// initiator, invalid recipient, unsupported customer, blacklist
pub const DEFAULT_PERMANENT_CODES: &[&str] =
    &["1", "2001", "2006", "2028", "2040", "8006", "400.002.02"];

pub const DEFAULT_BASE_DELAY_MINUTES: i64 = 5;
pub const DEFAULT_MULTIPLIER: i64 = 3;
pub const DEFAULT_CAP_MINUTES: i64 = 135;

/// `min(base * multiplier^n, cap)` in minutes, saturating at `cap`
pub fn delay_minutes(base: i64, multiplier: i64, cap: i64, n: u32) -> i64 {
    multiplier
        .checked_pow(n)
        .and_then(|factor| base.checked_mul(factor))
        .map_or(cap, |delay| delay.min(cap))
}

/// Backoff with the default parameters: 5, 15, 45, 135, 135, ...
pub fn calculate_next_retry(n: u32) -> i64 {
    delay_minutes(
        DEFAULT_BASE_DELAY_MINUTES,
        DEFAULT_MULTIPLIER,
        DEFAULT_CAP_MINUTES,
        n,
    )
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay_minutes: i64,
    multiplier: i64,
    cap_minutes: i64,
    permanent_codes: HashSet<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base_delay_minutes: config.base_delay_minutes,
            multiplier: config.multiplier,
            cap_minutes: config.cap_minutes,
            permanent_codes: config
                .permanent_codes
                .iter()
                .map(|c| c.trim().to_string())
                .collect(),
        }
    }

    #[inline]
    pub fn is_permanent(&self, result_code: &str) -> bool {
        self.permanent_codes.contains(result_code.trim())
    }

    pub fn should_retry(
        &self,
        status: DisbursementStatus,
        retry_count: u32,
        max_retries: u32,
        result_code: Option<&str>,
    ) -> bool {
        if status.is_success() {
            return false;
        }
        if retry_count >= max_retries {
            return false;
        }
        !result_code.is_some_and(|code| self.is_permanent(code))
    }

    /// Delay after the `retry_count`-th attempt failed
    pub fn backoff(&self, retry_count: u32) -> Duration {
        Duration::minutes(delay_minutes(
            self.base_delay_minutes,
            self.multiplier,
            self.cap_minutes,
            retry_count,
        ))
    }

    pub fn next_retry_at(&self, retry_count: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.backoff(retry_count)
    }

    /// `next_retry_at` for a non-success outcome, `None` when no retry follows
    pub fn schedule(
        &self,
        status: DisbursementStatus,
        retry_count: u32,
        max_retries: u32,
        result_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        self.should_retry(status, retry_count, max_retries, result_code)
            .then(|| self.next_retry_at(retry_count, now))
    }
}
