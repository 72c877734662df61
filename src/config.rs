//! Process-wide pipeline configuration.
//!
//! A single `PipelineConfig` is assembled at startup (defaults, optionally a
//! TOML file, then builder overrides) and shared read-only by every
//! component. Stage-level and batch-level settings override individual
//! fields at their call sites; the struct itself never changes after the
//! orchestrator is built.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

fn default_max_concurrent_registrations() -> usize {
    10
}
fn default_max_retry_attempts() -> u32 {
    4
}
fn default_retry_backoff_seconds() -> Vec<u64> {
    vec![30, 60, 120, 300]
}
fn default_platform_call_timeout_seconds() -> u64 {
    30
}
fn default_progress_tick_min_interval_seconds() -> u64 {
    5
}
fn default_progress_tick_min_items() -> u32 {
    50
}
fn default_snapshot_ttl_days() -> u64 {
    7
}
fn default_checkpoint_ttl_days() -> u64 {
    3
}
fn default_recovery_stale_threshold_minutes() -> u64 {
    60
}
fn default_progress_history_points() -> usize {
    100
}
fn default_progress_rate_points() -> usize {
    20
}

/// Tunable knobs the pipeline core recognises.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Worker-pool size for per-item platform fan-out.
    #[serde(default = "default_max_concurrent_registrations")]
    pub max_concurrent_registrations: usize,

    /// Cap on per-platform registration attempts.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    /// Backoff schedule between attempts, in seconds. The last entry repeats
    /// for attempts beyond the schedule length.
    #[serde(default = "default_retry_backoff_seconds")]
    pub retry_backoff_seconds: Vec<u64>,

    /// Per-platform-call timeout, in seconds.
    #[serde(default = "default_platform_call_timeout_seconds")]
    pub platform_call_timeout_seconds: u64,

    /// Minimum interval between snapshot/progress writes.
    #[serde(default = "default_progress_tick_min_interval_seconds")]
    pub progress_tick_min_interval_seconds: u64,

    /// Minimum items completed since the last write before writing again.
    #[serde(default = "default_progress_tick_min_items")]
    pub progress_tick_min_items: u32,

    /// Lifetime of ephemeral execution-state snapshots.
    #[serde(default = "default_snapshot_ttl_days")]
    pub snapshot_ttl_days: u64,

    /// Lifetime of ephemeral step checkpoints.
    #[serde(default = "default_checkpoint_ttl_days")]
    pub checkpoint_ttl_days: u64,

    /// Minimum staleness before recovery considers an execution abandoned.
    #[serde(default = "default_recovery_stale_threshold_minutes")]
    pub recovery_stale_threshold_minutes: u64,

    /// Ring-buffer size for progress points.
    #[serde(default = "default_progress_history_points")]
    pub progress_history_points: usize,

    /// Ring-buffer size for rate samples.
    #[serde(default = "default_progress_rate_points")]
    pub progress_rate_points: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_registrations: default_max_concurrent_registrations(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_backoff_seconds: default_retry_backoff_seconds(),
            platform_call_timeout_seconds: default_platform_call_timeout_seconds(),
            progress_tick_min_interval_seconds: default_progress_tick_min_interval_seconds(),
            progress_tick_min_items: default_progress_tick_min_items(),
            snapshot_ttl_days: default_snapshot_ttl_days(),
            checkpoint_ttl_days: default_checkpoint_ttl_days(),
            recovery_stale_threshold_minutes: default_recovery_stale_threshold_minutes(),
            progress_history_points: default_progress_history_points(),
            progress_rate_points: default_progress_rate_points(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file, falling back to defaults for
    /// missing keys.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Set the fan-out worker-pool size.
    pub fn with_max_concurrent_registrations(mut self, max: usize) -> Self {
        self.max_concurrent_registrations = max.max(1);
        self
    }

    /// Set the per-platform retry cap.
    pub fn with_max_retry_attempts(mut self, cap: u32) -> Self {
        self.max_retry_attempts = cap.max(1);
        self
    }

    /// Set the backoff schedule, in seconds.
    pub fn with_retry_backoff_seconds(mut self, schedule: Vec<u64>) -> Self {
        self.retry_backoff_seconds = schedule;
        self
    }

    /// Set the per-call timeout, in seconds.
    pub fn with_platform_call_timeout_seconds(mut self, secs: u64) -> Self {
        self.platform_call_timeout_seconds = secs;
        self
    }

    /// Set the minimum interval between progress writes, in seconds.
    pub fn with_progress_tick_min_interval_seconds(mut self, secs: u64) -> Self {
        self.progress_tick_min_interval_seconds = secs;
        self
    }

    /// Per-call timeout as a `Duration`.
    pub fn platform_call_timeout(&self) -> Duration {
        Duration::from_secs(self.platform_call_timeout_seconds)
    }

    /// Snapshot TTL as a `Duration`.
    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_days * 24 * 3600)
    }

    /// Checkpoint TTL as a `Duration`.
    pub fn checkpoint_ttl(&self) -> Duration {
        Duration::from_secs(self.checkpoint_ttl_days * 24 * 3600)
    }

    /// Staleness threshold for recovery candidates.
    pub fn recovery_stale_threshold(&self) -> Duration {
        Duration::from_secs(self.recovery_stale_threshold_minutes * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_concurrent_registrations, 10);
        assert_eq!(config.max_retry_attempts, 4);
        assert_eq!(config.retry_backoff_seconds, vec![30, 60, 120, 300]);
        assert_eq!(config.platform_call_timeout_seconds, 30);
        assert_eq!(config.progress_tick_min_interval_seconds, 5);
        assert_eq!(config.snapshot_ttl_days, 7);
        assert_eq!(config.checkpoint_ttl_days, 3);
        assert_eq!(config.recovery_stale_threshold_minutes, 60);
        assert_eq!(config.progress_history_points, 100);
        assert_eq!(config.progress_rate_points, 20);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: PipelineConfig =
            toml::from_str("max_concurrent_registrations = 3\nmax_retry_attempts = 2\n").unwrap();
        assert_eq!(config.max_concurrent_registrations, 3);
        assert_eq!(config.max_retry_attempts, 2);
        assert_eq!(config.platform_call_timeout_seconds, 30);
    }

    #[test]
    fn builders_clamp_to_minimum_of_one() {
        let config = PipelineConfig::default()
            .with_max_concurrent_registrations(0)
            .with_max_retry_attempts(0);
        assert_eq!(config.max_concurrent_registrations, 1);
        assert_eq!(config.max_retry_attempts, 1);
    }
}
