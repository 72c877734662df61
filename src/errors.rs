//! Typed error hierarchy for the Shipwright pipeline core.
//!
//! Three top-level enums cover the three subsystems:
//! - `WorkflowError`: orchestrator entry points and template validation
//! - `RegistrationError`: batch registration engine failures
//! - `StoreError`: durable store and ephemeral cache failures
//!
//! Platform-call failures have their own classified enum in
//! `crate::platform::PlatformError` because retry eligibility depends on
//! the variant.

use thiserror::Error;

/// Errors surfaced synchronously from the orchestrator's public operations.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Unknown workflow template '{name}'")]
    UnknownTemplate { name: String },

    #[error("Item selector yielded no items for template '{template}'")]
    InvalidSelector { template: String },

    #[error("Duplicate stage name '{name}' in template")]
    DuplicateStage { name: String },

    #[error("A template named '{name}' is already registered")]
    DuplicateTemplate { name: String },

    #[error("Stage '{stage}' depends on unknown stage '{dependency}'")]
    UnknownDependency { stage: String, dependency: String },

    #[error("Cycle detected in stage dependencies. Involved stages: {stages:?}")]
    DependencyCycle { stages: Vec<String> },

    #[error("Execution {execution_id} not found")]
    NotFound { execution_id: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the batch registration engine.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Batch {batch_id} not found")]
    BatchNotFound { batch_id: String },

    #[error("Batch {batch_id} already terminal in state '{status}' (pass force to reprocess)")]
    BatchTerminal { batch_id: String, status: String },

    #[error("No active accounts available for platforms {platforms:?}")]
    NoActiveAccounts { platforms: Vec<String> },

    #[error("Invalid item '{item_id}': missing required field '{field}'")]
    InvalidItem { item_id: String, field: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the durable store and the ephemeral cache.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid stored value: {0}")]
    Corrupted(String),
}

impl StoreError {
    /// Convenience constructor for missing entities.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}
