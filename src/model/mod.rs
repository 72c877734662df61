//! Domain entities persisted by the pipeline core.
//!
//! Status enums follow a common shape: serde snake_case wire form plus
//! `as_str`/`parse` for the database TEXT columns, and `is_terminal` where
//! the lifecycle has terminal states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid execution status: {}", s)),
        }
    }

    /// Terminal states are `completed`, `failed` and `cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Lifecycle of a single step within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(format!("Invalid step status: {}", s)),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// Per-stage sub-status on an item result. Same states as a step, tracked
/// independently for each stage kind an item passes through.
pub type StageState = StepStatus;

/// Kind tag for a stage; selects the processor that runs it and the item
/// sub-status column it updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Preparation,
    Sourcing,
    Processing,
    Registration,
    Validation,
    Monitoring,
    Analysis,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preparation => "preparation",
            Self::Sourcing => "sourcing",
            Self::Processing => "processing",
            Self::Registration => "registration",
            Self::Validation => "validation",
            Self::Monitoring => "monitoring",
            Self::Analysis => "analysis",
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "preparation" => Ok(Self::Preparation),
            "sourcing" => Ok(Self::Sourcing),
            "processing" => Ok(Self::Processing),
            "registration" => Ok(Self::Registration),
            "validation" => Ok(Self::Validation),
            "monitoring" => Ok(Self::Monitoring),
            "analysis" => Ok(Self::Analysis),
            _ => Err(format!("Invalid stage kind: {}", s)),
        }
    }
}

/// A canonical product item flowing through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductItem {
    pub id: String,
    pub code: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: f64,
    #[serde(default)]
    pub original_price: Option<f64>,
    #[serde(default)]
    pub cost_price: Option<f64>,
    #[serde(default)]
    pub stock_quantity: u32,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub main_image_url: Option<String>,
    #[serde(default)]
    pub additional_images: Vec<String>,
    #[serde(default)]
    pub attributes: serde_json::Map<String, Value>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ProductItem {
    /// Minimal constructor used by tests and the CLI; everything optional
    /// starts empty.
    pub fn new(id: impl Into<String>, name: impl Into<String>, price: f64) -> Self {
        Self {
            id: id.into(),
            code: None,
            name: name.into(),
            description: None,
            price,
            original_price: None,
            cost_price: None,
            stock_quantity: 0,
            weight: None,
            category_id: None,
            brand: None,
            main_image_url: None,
            additional_images: Vec::new(),
            attributes: serde_json::Map::new(),
            keywords: Vec::new(),
            tags: Vec::new(),
        }
    }
}

/// One run of a workflow template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    /// Internal row id.
    pub id: String,
    /// Public execution id; unique, UUID-shaped. All public operations key
    /// on this.
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: ExecutionStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_completion: Option<DateTime<Utc>>,

    pub total_steps: u32,
    pub completed_steps: u32,
    pub failed_steps: u32,

    pub total_items: u32,
    pub processed_items: u32,
    pub succeeded_items: u32,
    pub failed_items: u32,

    /// Items per minute over the recent window.
    pub processing_rate: f64,
    /// Percentage of processed items that succeeded.
    pub success_rate: f64,
    /// Percentage of processed items that failed.
    pub error_rate: f64,

    pub execution_config: Value,
    pub results_summary: Option<Value>,
    pub resource_usage: Option<Value>,
    pub error_log: Option<String>,

    /// Canonical item set the execution was started with; recovery rebuilds
    /// the runner from this snapshot.
    pub items: Vec<ProductItem>,
}

impl Execution {
    /// Overall progress over steps, in percent.
    pub fn progress_percentage(&self) -> f64 {
        if self.total_steps == 0 {
            return 0.0;
        }
        (self.completed_steps as f64 / self.total_steps as f64) * 100.0
    }

    /// Percentage of processed items that succeeded.
    pub fn calculate_success_rate(&self) -> f64 {
        if self.processed_items == 0 {
            return 0.0;
        }
        (self.succeeded_items as f64 / self.processed_items as f64) * 100.0
    }

    /// Estimated minutes remaining at the current processing rate.
    pub fn estimated_minutes_remaining(&self) -> Option<f64> {
        if self.started_at.is_none() || self.processing_rate <= 0.0 {
            return None;
        }
        let remaining = self.total_items.saturating_sub(self.processed_items);
        Some(remaining as f64 / self.processing_rate)
    }
}

/// One stage of one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub id: String,
    pub execution_id: String,
    pub ordinal: u32,
    pub name: String,
    pub kind: StageKind,
    pub status: StepStatus,

    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,

    pub total_items: u32,
    pub processed_items: u32,
    pub succeeded_items: u32,
    pub failed_items: u32,

    pub config: Value,
    pub results: Option<Value>,
    pub error_details: Option<String>,
    pub processing_rate: f64,
}

impl StepRecord {
    /// Derive and store the duration once both timestamps are set.
    pub fn calculate_duration(&mut self) {
        if let (Some(started), Some(completed)) = (self.started_at, self.completed_at) {
            self.duration_seconds = Some((completed - started).num_seconds());
        }
    }
}

/// Per-item materialised outcome for one execution or batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemResult {
    pub id: String,
    pub execution_id: Option<String>,
    pub batch_id: Option<String>,
    pub item_id: String,
    pub item_code: Option<String>,
    /// Canonical item snapshot; batch items carry it so the engine can
    /// transform payloads without an external catalog.
    pub item: Option<ProductItem>,

    pub sourcing_status: StageState,
    pub processing_status: StageState,
    pub registration_status: StageState,

    pub sourcing_completed_at: Option<DateTime<Utc>>,
    pub processing_completed_at: Option<DateTime<Utc>>,
    pub registration_completed_at: Option<DateTime<Utc>>,

    pub sourcing_artifacts: Option<Value>,
    pub processing_artifacts: Option<Value>,
    pub registration_artifacts: Option<Value>,

    pub final_status: RegistrationState,
    pub last_error: Option<String>,
    pub total_processing_time_secs: Option<i64>,
}

/// Status of a platform registration, an item rollup or a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationState {
    #[default]
    Pending,
    Running,
    Completed,
    PartiallyCompleted,
    Failed,
    Cancelled,
}

impl RegistrationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::PartiallyCompleted => "partially_completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "partially_completed" => Ok(Self::PartiallyCompleted),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid registration state: {}", s)),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::PartiallyCompleted | Self::Failed | Self::Cancelled
        )
    }
}

/// Roll per-platform statuses up into an item-level status.
///
/// | Per-platform statuses | Overall item status |
/// |---|---|
/// | all completed | completed |
/// | any running | running |
/// | any completed and any terminal-failed | partially_completed |
/// | all terminal-failed | failed |
/// | otherwise | pending |
pub fn rollup_item_status(platform_statuses: &[RegistrationState]) -> RegistrationState {
    if platform_statuses.is_empty() {
        return RegistrationState::Pending;
    }
    let all_completed = platform_statuses
        .iter()
        .all(|s| *s == RegistrationState::Completed);
    if all_completed {
        return RegistrationState::Completed;
    }
    if platform_statuses
        .iter()
        .any(|s| *s == RegistrationState::Running)
    {
        return RegistrationState::Running;
    }
    let any_completed = platform_statuses
        .iter()
        .any(|s| *s == RegistrationState::Completed);
    let failed =
        |s: &RegistrationState| matches!(s, RegistrationState::Failed | RegistrationState::Cancelled);
    if any_completed && platform_statuses.iter().any(failed) {
        return RegistrationState::PartiallyCompleted;
    }
    if platform_statuses.iter().all(failed) {
        return RegistrationState::Failed;
    }
    RegistrationState::Pending
}

/// Per-(item, platform) unit driven by the registration engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformRegistration {
    pub id: String,
    pub item_result_id: String,
    pub platform: String,
    pub account_id: Option<String>,
    pub status: RegistrationState,

    pub payload: Option<Value>,
    pub response: Option<Value>,
    pub platform_product_id: Option<String>,

    pub attempt_count: u32,
    pub api_call_count: u32,
    pub last_error: Option<String>,

    pub scheduled_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Priority of a registration batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl BatchPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            _ => Err(format!("Invalid batch priority: {}", s)),
        }
    }
}

/// A group of items submitted together to the registration engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationBatch {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub target_platforms: Vec<String>,
    pub priority: BatchPriority,
    pub status: RegistrationState,

    pub total_items: u32,
    pub completed_items: u32,
    pub failed_items: u32,
    pub progress_percentage: f64,

    pub settings: Value,
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RegistrationBatch {
    /// Recompute the progress percentage from counters.
    pub fn calculate_progress(&mut self) {
        self.progress_percentage = if self.total_items == 0 {
            0.0
        } else {
            ((self.completed_items + self.failed_items) as f64 / self.total_items as f64) * 100.0
        };
    }
}

/// A seller account on an external platform. Selection prefers healthy,
/// least-recently-used accounts; usage counters feed back into that order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformAccount {
    pub id: String,
    pub platform: String,
    pub label: String,
    pub active: bool,
    pub selected: bool,

    pub api_calls_total: u64,
    pub api_failures: u64,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl PlatformAccount {
    /// Failure ratio over all recorded calls, in [0, 1].
    pub fn failure_ratio(&self) -> f64 {
        if self.api_calls_total == 0 {
            return 0.0;
        }
        self.api_failures as f64 / self.api_calls_total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_status_round_trips_through_text() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Paused,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            assert_eq!(ExecutionStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(ExecutionStatus::parse("bogus").is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::Paused.is_terminal());
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(StepStatus::Skipped.is_terminal());
        assert!(!StepStatus::Running.is_terminal());
    }

    #[test]
    fn success_rate_handles_zero_processed() {
        let mut execution = sample_execution();
        execution.processed_items = 0;
        assert_eq!(execution.calculate_success_rate(), 0.0);

        execution.processed_items = 4;
        execution.succeeded_items = 3;
        assert_eq!(execution.calculate_success_rate(), 75.0);
    }

    #[test]
    fn rollup_all_completed() {
        use RegistrationState::*;
        assert_eq!(rollup_item_status(&[Completed, Completed]), Completed);
    }

    #[test]
    fn rollup_mixed_outcomes() {
        use RegistrationState::*;
        assert_eq!(rollup_item_status(&[Completed, Failed]), PartiallyCompleted);
        assert_eq!(rollup_item_status(&[Failed, Failed]), Failed);
        assert_eq!(rollup_item_status(&[Completed, Running]), Running);
        assert_eq!(rollup_item_status(&[Pending, Pending]), Pending);
        assert_eq!(rollup_item_status(&[]), Pending);
        // Cancelled counts as terminal-failed for the rollup.
        assert_eq!(rollup_item_status(&[Completed, Cancelled]), PartiallyCompleted);
    }

    #[test]
    fn batch_progress_counts_both_outcomes() {
        let mut batch = RegistrationBatch {
            id: "b1".into(),
            user_id: "u1".into(),
            name: "test".into(),
            target_platforms: vec!["coupang".into()],
            priority: BatchPriority::Medium,
            status: RegistrationState::Running,
            total_items: 4,
            completed_items: 1,
            failed_items: 1,
            progress_percentage: 0.0,
            settings: serde_json::json!({}),
            last_error: None,
            created_at: Utc::now(),
            scheduled_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        batch.calculate_progress();
        assert_eq!(batch.progress_percentage, 50.0);
    }

    #[test]
    fn account_failure_ratio() {
        let mut account = PlatformAccount {
            id: "a1".into(),
            platform: "naver".into(),
            label: "main".into(),
            active: true,
            selected: true,
            api_calls_total: 0,
            api_failures: 0,
            last_used_at: None,
        };
        assert_eq!(account.failure_ratio(), 0.0);
        account.api_calls_total = 10;
        account.api_failures = 2;
        assert!((account.failure_ratio() - 0.2).abs() < f64::EPSILON);
    }

    fn sample_execution() -> Execution {
        Execution {
            id: "row-1".into(),
            workflow_id: "wf-1".into(),
            workflow_name: "registration_only".into(),
            status: ExecutionStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            started_at: None,
            completed_at: None,
            estimated_completion: None,
            total_steps: 3,
            completed_steps: 0,
            failed_steps: 0,
            total_items: 10,
            processed_items: 0,
            succeeded_items: 0,
            failed_items: 0,
            processing_rate: 0.0,
            success_rate: 0.0,
            error_rate: 0.0,
            execution_config: serde_json::json!({}),
            results_summary: None,
            resource_usage: None,
            error_log: None,
            items: Vec::new(),
        }
    }
}
