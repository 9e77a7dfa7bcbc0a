//! Retry and row-selection policies for the bulk uploader.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;

use crate::config::UploadConfig;
use crate::record::Record;

/// Statuses that are retried with backoff.
pub const RETRYABLE_STATUSES: &[u16] = &[429, 500, 502, 503, 504];

// ─────────────────────────────────────────────────────────────────────────────
// RetryPolicy
// ─────────────────────────────────────────────────────────────────────────────

/// Exponential backoff for one batch: retry `n` waits `factor * 2^(n-1)`
/// seconds, capped at `max_backoff`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub retries: u32,
    pub backoff_factor: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&UploadConfig::default())
    }
}

impl From<&UploadConfig> for RetryPolicy {
    fn from(config: &UploadConfig) -> Self {
        Self {
            retries: config.retries,
            backoff_factor: config.backoff_factor,
            max_backoff: Duration::from_secs(config.max_backoff_secs),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            retries: 0,
            backoff_factor: 0.0,
            max_backoff: Duration::ZERO,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    pub fn is_retryable_status(status: StatusCode) -> bool {
        RETRYABLE_STATUSES.contains(&status.as_u16())
    }

    /// Backoff before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry == 0 || self.backoff_factor <= 0.0 {
            return Duration::ZERO;
        }
        let exponent = retry.saturating_sub(1).min(30) as i32;
        let secs = self.backoff_factor * 2f64.powi(exponent);
        let max = self.max_backoff.as_secs_f64();
        Duration::from_secs_f64(secs.min(max).max(0.0))
    }

    /// Delay before retry `retry`, preferring a server hint when present.
    pub fn delay(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(hint) => hint.min(self.max_backoff),
            None => self.backoff(retry),
        }
    }
}

/// Parses a `Retry-After` value: delta-seconds or an HTTP date.
///
/// Dates in the past yield a zero delay.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

// ─────────────────────────────────────────────────────────────────────────────
// SendPolicy
// ─────────────────────────────────────────────────────────────────────────────

/// Which rows are sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SendPolicy {
    /// Every row, blank ones included
    AllRows,
    /// Only rows with keyword, line and item filled
    AllFields,
    /// Rows that are not entirely blank
    #[default]
    AnyField,
}

impl SendPolicy {
    /// `include_all_rows` wins over `require_all_fields`.
    pub fn from_flags(include_all_rows: bool, require_all_fields: bool) -> Self {
        if include_all_rows {
            SendPolicy::AllRows
        } else if require_all_fields {
            SendPolicy::AllFields
        } else {
            SendPolicy::AnyField
        }
    }

    pub fn accepts(self, record: &Record) -> bool {
        match self {
            SendPolicy::AllRows => true,
            SendPolicy::AllFields => record.is_complete(),
            SendPolicy::AnyField => !record.is_blank(),
        }
    }
}
