//! Retry policy for platform registrations.
//!
//! The schedule is exponential (`[30, 60, 120, 300]` seconds by default)
//! with a hard attempt cap. Permanent errors terminate a registration
//! immediately regardless of remaining attempts. Batch settings may
//! override both the cap and the schedule.

use serde_json::Value;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::platform::PlatformError;

/// Error kinds that never become retryable, matching
/// `PlatformError::is_permanent`. Used to re-classify errors persisted as
/// `"{kind}: {message}"` strings.
const PERMANENT_KINDS: &[&str] = &[
    "validation",
    "auth_failed",
    "account_banned",
    "missing_product_id",
    "http_4xx",
];

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Vec<Duration>,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_attempts: config.max_retry_attempts,
            backoff: config
                .retry_backoff_seconds
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
        }
    }

    /// Apply batch or stage overrides (`retry_failures`,
    /// `max_retry_attempts`, `retry_backoff_seconds`) on top of this
    /// policy. `retry_failures: false` disables retries outright; an
    /// explicit `max_retry_attempts` still wins over it.
    pub fn with_overrides(mut self, settings: &Value) -> Self {
        if settings["retry_failures"].as_bool() == Some(false) {
            self.max_attempts = 1;
        }
        if let Some(cap) = settings["max_retry_attempts"].as_u64() {
            self.max_attempts = (cap as u32).max(1);
        }
        if let Some(schedule) = settings["retry_backoff_seconds"].as_array() {
            let parsed: Vec<Duration> = schedule
                .iter()
                .filter_map(Value::as_u64)
                .map(Duration::from_secs)
                .collect();
            if parsed.len() == schedule.len() {
                self.backoff = parsed;
            }
        }
        self
    }

    /// Delay before the next attempt after `attempt` failures (1-based).
    /// The last schedule entry repeats past the end.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if self.backoff.is_empty() {
            return Duration::ZERO;
        }
        let idx = (attempt.saturating_sub(1) as usize).min(self.backoff.len() - 1);
        self.backoff[idx]
    }

    /// Whether another attempt is allowed after `attempt_count` failures
    /// ending in `error`.
    pub fn allows_retry(&self, attempt_count: u32, error: &PlatformError) -> bool {
        attempt_count < self.max_attempts && !error.is_permanent()
    }

    /// Retry eligibility from a persisted `"{kind}: {message}"` error
    /// string, for registrations reloaded from the store.
    pub fn allows_retry_of_recorded(&self, attempt_count: u32, last_error: Option<&str>) -> bool {
        if attempt_count >= self.max_attempts {
            return false;
        }
        match last_error {
            Some(recorded) => !PERMANENT_KINDS
                .iter()
                .any(|kind| recorded.starts_with(kind)),
            None => true,
        }
    }
}

/// Persisted form of a platform error: a stable kind tag, then the message.
pub fn record_error(error: &PlatformError) -> String {
    // 4xx statuses need their own tag so recorded errors classify the same
    // way live ones do.
    let kind = match error {
        PlatformError::Http { .. } if error.is_permanent() => "http_4xx",
        other => other.kind(),
    };
    format!("{kind}: {error}")
}
