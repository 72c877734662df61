//! Ephemeral execution snapshots, step checkpoints and error context.
//!
//! These are recovery aids, not sources of truth: each entry carries a TTL
//! and lives in the ephemeral cache under colon-separated composite keys:
//!
//! - `execution_state:{id}`: current step index, template snapshot, last
//!   progress point, pause/cancel intents (snapshot TTL, default 7 d)
//! - `checkpoint:{execution_id}:{step}`: opaque step progress token
//!   (checkpoint TTL, default 3 d)
//! - `progress:{id}`: live progress blob for dashboards (12 h)
//! - `error:{execution_id}:{step}`: stage failure context (7 d)
//! - `cleanup:{id}`: cleanup marker written at completion (24 h)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::errors::StoreError;
use crate::store::EphemeralCache;

const PROGRESS_TTL: Duration = Duration::from_secs(12 * 3600);
const CLEANUP_TTL: Duration = Duration::from_secs(24 * 3600);

pub fn snapshot_key(execution_id: &str) -> String {
    format!("execution_state:{execution_id}")
}

pub fn checkpoint_key(execution_id: &str, step_name: &str) -> String {
    format!("checkpoint:{execution_id}:{step_name}")
}

pub fn progress_key(execution_id: &str) -> String {
    format!("progress:{execution_id}")
}

pub fn error_key(execution_id: &str, step_name: &str) -> String {
    format!("error:{execution_id}:{step_name}")
}

pub fn cleanup_key(execution_id: &str) -> String {
    format!("cleanup:{execution_id}")
}

/// Advisory snapshot of a running execution, written at every stage
/// boundary and on progress ticks. Recovery resumes from `current_step`;
/// unfinished item work in that step re-runs (at-least-once).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub execution_id: String,
    pub template_name: String,
    pub stage_names: Vec<String>,
    pub current_step: usize,
    pub completed_items: u32,
    pub last_progress_at: DateTime<Utc>,
    pub pause_requested: bool,
    pub cancel_requested: bool,
    pub last_updated: DateTime<Utc>,
}

/// Opaque per-step progress token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub execution_id: String,
    pub step_name: String,
    pub token: Value,
    pub timestamp: DateTime<Utc>,
}

/// Structured failure context persisted for operators; the orchestrator
/// never reads it back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub execution_id: String,
    pub step_name: String,
    pub error_type: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub context: Value,
}

/// Front-end over the ephemeral cache for snapshot-shaped state.
#[derive(Clone)]
pub struct SnapshotStore {
    cache: Arc<dyn EphemeralCache>,
    snapshot_ttl: Duration,
    checkpoint_ttl: Duration,
}

impl SnapshotStore {
    pub fn new(cache: Arc<dyn EphemeralCache>, config: &PipelineConfig) -> Self {
        Self {
            cache,
            snapshot_ttl: config.snapshot_ttl(),
            checkpoint_ttl: config.checkpoint_ttl(),
        }
    }

    pub fn save_snapshot(&self, snapshot: &ExecutionSnapshot) -> Result<(), StoreError> {
        let mut snapshot = snapshot.clone();
        snapshot.last_updated = Utc::now();
        self.cache.put(
            &snapshot_key(&snapshot.execution_id),
            serde_json::to_value(&snapshot)?,
            self.snapshot_ttl,
        )
    }

    pub fn load_snapshot(&self, execution_id: &str) -> Result<Option<ExecutionSnapshot>, StoreError> {
        match self.cache.get(&snapshot_key(execution_id))? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn clear_snapshot(&self, execution_id: &str) -> Result<(), StoreError> {
        self.cache.delete(&snapshot_key(execution_id))
    }

    pub fn save_checkpoint(
        &self,
        execution_id: &str,
        step_name: &str,
        token: Value,
    ) -> Result<(), StoreError> {
        let checkpoint = Checkpoint {
            execution_id: execution_id.to_string(),
            step_name: step_name.to_string(),
            token,
            timestamp: Utc::now(),
        };
        self.cache.put(
            &checkpoint_key(execution_id, step_name),
            serde_json::to_value(&checkpoint)?,
            self.checkpoint_ttl,
        )
    }

    pub fn load_checkpoint(
        &self,
        execution_id: &str,
        step_name: &str,
    ) -> Result<Option<Checkpoint>, StoreError> {
        match self.cache.get(&checkpoint_key(execution_id, step_name))? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Persist failure context for a stage. Kept for the snapshot TTL
    /// (7 days by default).
    pub fn save_error_context(
        &self,
        execution_id: &str,
        step_name: &str,
        error_type: &str,
        message: &str,
        context: Value,
    ) -> Result<(), StoreError> {
        let blob = ErrorContext {
            execution_id: execution_id.to_string(),
            step_name: step_name.to_string(),
            error_type: error_type.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
            context,
        };
        self.cache.put(
            &error_key(execution_id, step_name),
            serde_json::to_value(&blob)?,
            self.snapshot_ttl,
        )
    }

    /// Error blobs for an execution, oldest first.
    pub fn error_history(&self, execution_id: &str) -> Result<Vec<ErrorContext>, StoreError> {
        let prefix = format!("error:{execution_id}:");
        let mut errors = Vec::new();
        for key in self.cache.keys(&prefix)? {
            if let Some(value) = self.cache.get(&key)? {
                errors.push(serde_json::from_value::<ErrorContext>(value)?);
            }
        }
        errors.sort_by_key(|e| e.timestamp);
        Ok(errors)
    }

    /// Live progress blob for dashboards.
    pub fn update_progress(&self, execution_id: &str, progress: Value) -> Result<(), StoreError> {
        self.cache
            .put(&progress_key(execution_id), progress, PROGRESS_TTL)
    }

    pub fn get_progress(&self, execution_id: &str) -> Result<Option<Value>, StoreError> {
        self.cache.get(&progress_key(execution_id))
    }

    /// Schedule post-completion cleanup.
    pub fn mark_for_cleanup(&self, execution_id: &str) -> Result<(), StoreError> {
        self.cache.put(
            &cleanup_key(execution_id),
            Value::String("cleanup_scheduled".to_string()),
            CLEANUP_TTL,
        )
    }
}
