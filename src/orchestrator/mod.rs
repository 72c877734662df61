//! Workflow orchestrator: public operations over executions.
//!
//! The orchestrator is assembled once through `OrchestratorBuilder`
//! (dependency injection over inheritance: the store, cache, adapters,
//! analyzer and content processor are all swappable seams) and drives each
//! execution on its own tokio task. Public operations are thin: they
//! validate, persist intent, and let the runner observe it.

mod runner;
mod stage;

pub use runner::{ExecutionControls, RunnerDeps};
pub use stage::{
    BasicContentProcessor, ContentOutcome, ContentProcessor, EmptyCatalog, HeuristicAnalyzer,
    ItemCatalog, ItemOutcome, ItemSelector, SourcingAnalyzer, SourcingAssessment, StageContext,
    StageOutcome, StageProcessor,
};

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use uuid::Uuid;

use crate::alerts::{Alert, AlertEmitter};
use crate::config::PipelineConfig;
use crate::errors::{StoreError, WorkflowError};
use crate::model::{Execution, ExecutionStatus, ProductItem, StageKind, StepRecord};
use crate::progress::{ProgressSummary, ProgressTracker};
use crate::registration::RegistrationEngine;
use crate::store::{
    EphemeralCache, ErrorContext, MemoryCache, SnapshotStore, SqliteStore,
};
use crate::workflow::{TemplateRegistry, WorkflowTemplate};

/// Items for a new execution: an explicit list, or a selector resolved
/// against the injected catalog.
pub enum ItemSource {
    Items(Vec<ProductItem>),
    Selector(ItemSelector),
}

/// Snapshot returned by `status`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecutionStatusView {
    pub execution: Execution,
    pub steps: Vec<StepRecord>,
    pub alerts: Vec<Alert>,
    pub progress: Option<ProgressSummary>,
    pub live_progress: Option<Value>,
}

struct ActiveExecution {
    controls: Arc<ExecutionControls>,
    handle: tokio::task::JoinHandle<()>,
}

/// Builder for the orchestrator; everything except the store has a
/// sensible default.
pub struct OrchestratorBuilder {
    store: Option<Arc<SqliteStore>>,
    cache: Option<Arc<dyn EphemeralCache>>,
    templates: Option<TemplateRegistry>,
    engine: Option<Arc<RegistrationEngine>>,
    catalog: Option<Arc<dyn ItemCatalog>>,
    analyzer: Option<Arc<dyn SourcingAnalyzer>>,
    content: Option<Arc<dyn ContentProcessor>>,
    config: PipelineConfig,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            cache: None,
            templates: None,
            engine: None,
            catalog: None,
            analyzer: None,
            content: None,
            config: PipelineConfig::default(),
        }
    }

    pub fn with_store(mut self, store: Arc<SqliteStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn EphemeralCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_templates(mut self, templates: TemplateRegistry) -> Self {
        self.templates = Some(templates);
        self
    }

    pub fn with_engine(mut self, engine: Arc<RegistrationEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn ItemCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn SourcingAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn with_content_processor(mut self, content: Arc<dyn ContentProcessor>) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Orchestrator, WorkflowError> {
        let store = self
            .store
            .ok_or_else(|| WorkflowError::Other(anyhow::anyhow!("a store is required")))?;
        let cache: Arc<dyn EphemeralCache> =
            self.cache.unwrap_or_else(|| Arc::new(MemoryCache::new()));
        let templates = Arc::new(self.templates.unwrap_or_else(TemplateRegistry::with_defaults));
        let engine = self
            .engine
            .unwrap_or_else(|| Arc::new(RegistrationEngine::new(store.clone(), self.config.clone())));
        let catalog: Arc<dyn ItemCatalog> =
            self.catalog.unwrap_or_else(|| Arc::new(EmptyCatalog));
        let analyzer: Arc<dyn SourcingAnalyzer> =
            self.analyzer.unwrap_or_else(|| Arc::new(HeuristicAnalyzer));
        let content: Arc<dyn ContentProcessor> =
            self.content.unwrap_or_else(|| Arc::new(BasicContentProcessor));

        // Persist the registry's view so operators can inspect templates.
        for name in templates.names() {
            if let Some(template) = templates.get(&name) {
                store.save_template(template)?;
            }
        }

        let mut processors: HashMap<StageKind, Arc<dyn StageProcessor>> = HashMap::new();
        processors.insert(StageKind::Preparation, Arc::new(stage::PreparationProcessor));
        processors.insert(
            StageKind::Sourcing,
            Arc::new(stage::SourcingProcessor::new(analyzer)),
        );
        processors.insert(
            StageKind::Processing,
            Arc::new(stage::ProcessingProcessor::new(content)),
        );
        processors.insert(StageKind::Validation, Arc::new(stage::ValidationProcessor));
        processors.insert(
            StageKind::Registration,
            Arc::new(stage::RegistrationProcessor::new(engine.clone())),
        );
        processors.insert(StageKind::Monitoring, Arc::new(stage::MonitoringProcessor));
        processors.insert(StageKind::Analysis, Arc::new(stage::AnalysisProcessor));

        let snapshots = SnapshotStore::new(cache.clone(), &self.config);
        let tracker = Arc::new(ProgressTracker::new(&self.config));
        let alerts = Arc::new(AlertEmitter::new(store.clone()));

        let deps = Arc::new(RunnerDeps {
            store: store.clone(),
            snapshots: snapshots.clone(),
            tracker: tracker.clone(),
            alerts: alerts.clone(),
            processors,
            config: self.config.clone(),
        });

        Ok(Orchestrator {
            store,
            snapshots,
            tracker,
            templates,
            engine,
            catalog,
            deps,
            active: DashMap::new(),
            config: self.config,
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The workflow orchestrator.
pub struct Orchestrator {
    store: Arc<SqliteStore>,
    snapshots: SnapshotStore,
    tracker: Arc<ProgressTracker>,
    templates: Arc<TemplateRegistry>,
    engine: Arc<RegistrationEngine>,
    catalog: Arc<dyn ItemCatalog>,
    deps: Arc<RunnerDeps>,
    active: DashMap<String, ActiveExecution>,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Start an execution of a registered template. Returns immediately;
    /// the execution proceeds asynchronously on its own task.
    pub fn start(
        &self,
        template_name: &str,
        items: ItemSource,
        run_config: Value,
    ) -> Result<String, WorkflowError> {
        self.reap_finished();
        let template = self
            .templates
            .get(template_name)
            .ok_or_else(|| WorkflowError::UnknownTemplate {
                name: template_name.to_string(),
            })?
            .clone();

        let items = match items {
            ItemSource::Items(items) => items,
            ItemSource::Selector(selector) => {
                let resolved = self.catalog.select(&selector)?;
                if resolved.is_empty() {
                    return Err(WorkflowError::InvalidSelector {
                        template: template_name.to_string(),
                    });
                }
                resolved
            }
        };

        let now = Utc::now();
        let execution = Execution {
            id: Uuid::new_v4().to_string(),
            workflow_id: Uuid::new_v4().to_string(),
            workflow_name: template_name.to_string(),
            status: ExecutionStatus::Pending,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            estimated_completion: None,
            total_steps: template.stage_count() as u32,
            completed_steps: 0,
            failed_steps: 0,
            total_items: items.len() as u32,
            processed_items: 0,
            succeeded_items: 0,
            failed_items: 0,
            processing_rate: 0.0,
            success_rate: 0.0,
            error_rate: 0.0,
            execution_config: run_config,
            results_summary: None,
            resource_usage: None,
            error_log: None,
            items,
        };
        self.store.insert_execution(&execution)?;

        let workflow_id = execution.workflow_id.clone();
        self.spawn_runner(template, workflow_id.clone());
        tracing::info!(execution_id = %workflow_id, template = template_name, "execution started");
        Ok(workflow_id)
    }

    /// Live (or persisted terminal) snapshot of an execution.
    pub fn status(&self, execution_id: &str) -> Result<ExecutionStatusView, WorkflowError> {
        let execution = self.get_execution(execution_id)?;
        let steps = self.store.steps_for_execution(&execution.id)?;
        let alerts = self.store.alerts_for_execution(execution_id)?;
        Ok(ExecutionStatusView {
            progress: self.tracker.summary(execution_id),
            live_progress: self.snapshots.get_progress(execution_id)?,
            execution,
            steps,
            alerts,
        })
    }

    /// Set a pause intent; honoured at the next stage boundary. No-op on
    /// terminal or already-paused executions.
    pub fn pause(&self, execution_id: &str) -> Result<(), WorkflowError> {
        let execution = self.get_execution(execution_id)?;
        if execution.status.is_terminal() {
            return Ok(());
        }
        if let Some(active) = self.active.get(execution_id) {
            active.controls.pause.store(true, Ordering::SeqCst);
            tracing::info!(execution_id, "pause requested");
        }
        Ok(())
    }

    /// Clear the pause intent; the runner resumes at its next check.
    pub fn resume(&self, execution_id: &str) -> Result<(), WorkflowError> {
        let execution = self.get_execution(execution_id)?;
        if execution.status.is_terminal() {
            return Ok(());
        }
        if let Some(active) = self.active.get(execution_id) {
            active.controls.pause.store(false, Ordering::SeqCst);
            tracing::info!(execution_id, "resume requested");
        }
        Ok(())
    }

    /// Set the cancel intent. In-flight per-item units finish and are
    /// recorded; no new work is dispatched. Idempotent.
    pub fn cancel(&self, execution_id: &str) -> Result<(), WorkflowError> {
        let mut execution = self.get_execution(execution_id)?;
        if execution.status.is_terminal() {
            return Ok(());
        }
        match self.active.get(execution_id) {
            Some(active) => {
                active.controls.pause.store(false, Ordering::SeqCst);
                active.controls.cancel.cancel();
            }
            None => {
                // No owning task (e.g. process restart): cancel directly.
                execution.status = ExecutionStatus::Cancelled;
                execution.completed_at = Some(Utc::now());
                self.store.update_execution(&execution)?;
                self.snapshots.clear_snapshot(execution_id)?;
            }
        }
        tracing::info!(execution_id, "cancel requested");
        Ok(())
    }

    /// List executions, newest first.
    pub fn list_executions(
        &self,
        status: Option<ExecutionStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Execution>, WorkflowError> {
        Ok(self.store.list_executions(status, limit, offset)?)
    }

    /// Running and paused executions, newest first, each with its live
    /// progress blob from the cache when one exists.
    pub fn active_executions(&self) -> Result<Vec<(Execution, Option<Value>)>, WorkflowError> {
        let mut out = Vec::new();
        for status in [ExecutionStatus::Running, ExecutionStatus::Paused] {
            for execution in self.store.list_executions(Some(status), 100, 0)? {
                let progress = self.snapshots.get_progress(&execution.workflow_id)?;
                out.push((execution, progress));
            }
        }
        Ok(out)
    }

    /// Executions eligible for recovery: stale in `{running, paused}` with
    /// a valid snapshot.
    pub fn load_recovery_candidates(&self) -> Result<Vec<Execution>, WorkflowError> {
        let stale = self.config.recovery_stale_threshold();
        let mut candidates = Vec::new();
        for execution in self.store.recovery_candidates(stale)? {
            if self.active.contains_key(&execution.workflow_id) {
                continue;
            }
            if self
                .snapshots
                .load_snapshot(&execution.workflow_id)?
                .is_some()
            {
                candidates.push(execution);
            }
        }
        Ok(candidates)
    }

    /// Re-take ownership of a stale execution and resume it from its
    /// snapshot. Unfinished item work from the interrupted step re-runs
    /// under at-least-once semantics.
    pub fn recover(&self, execution_id: &str) -> Result<bool, WorkflowError> {
        self.reap_finished();
        if self.active.contains_key(execution_id) {
            return Ok(false);
        }
        let execution = self.get_execution(execution_id)?;
        if !matches!(
            execution.status,
            ExecutionStatus::Running | ExecutionStatus::Paused
        ) {
            return Ok(false);
        }
        let Some(snapshot) = self.snapshots.load_snapshot(execution_id)? else {
            return Ok(false);
        };
        let template = self
            .templates
            .get(&snapshot.template_name)
            .ok_or_else(|| WorkflowError::UnknownTemplate {
                name: snapshot.template_name.clone(),
            })?
            .clone();

        self.store.touch_execution(execution_id)?;
        self.spawn_runner(template, execution_id.to_string());
        tracing::info!(execution_id, step = snapshot.current_step, "execution recovered");
        Ok(true)
    }

    /// Streaming progress summary for an active execution.
    pub fn summary(&self, execution_id: &str) -> Option<ProgressSummary> {
        self.tracker.summary(execution_id)
    }

    /// Progress view for one step of an execution.
    pub fn step_progress(
        &self,
        execution_id: &str,
        step_name: &str,
    ) -> Result<Option<Value>, WorkflowError> {
        let execution = self.get_execution(execution_id)?;
        let steps = self.store.steps_for_execution(&execution.id)?;
        Ok(steps
            .iter()
            .find(|s| s.name == step_name)
            .map(crate::progress::step_progress))
    }

    /// Per-item progress across the item-visible stages.
    pub fn item_progress(&self, execution_id: &str) -> Result<Vec<Value>, WorkflowError> {
        let execution = self.get_execution(execution_id)?;
        let items = self.store.item_results_for_execution(&execution.id)?;
        Ok(crate::progress::item_progress(&items))
    }

    /// Persisted stage-failure blobs for an execution, oldest first.
    pub fn error_history(&self, execution_id: &str) -> Result<Vec<ErrorContext>, WorkflowError> {
        Ok(self.snapshots.error_history(execution_id)?)
    }

    /// Alerts not yet acknowledged, for the delivery subscriber.
    pub fn unacknowledged_alerts(&self, limit: usize) -> Result<Vec<Alert>, WorkflowError> {
        Ok(self.store.unacknowledged_alerts(limit)?)
    }

    pub fn acknowledge_alert(&self, alert_id: &str, actor: &str) -> Result<(), WorkflowError> {
        Ok(self.store.acknowledge_alert(alert_id, actor)?)
    }

    pub fn resolve_alert(&self, alert_id: &str, action: &str) -> Result<(), WorkflowError> {
        Ok(self.store.resolve_alert(alert_id, action)?)
    }

    /// Periodic housekeeping: drop tracker state for old executions.
    pub fn sweep(&self) -> usize {
        self.reap_finished();
        self.tracker.sweep()
    }

    /// The registration engine, for direct batch operations.
    pub fn engine(&self) -> &Arc<RegistrationEngine> {
        &self.engine
    }

    /// Registered template names.
    pub fn template_names(&self) -> Vec<String> {
        self.templates.names()
    }

    /// Block until the execution reaches a terminal state, polling the
    /// store. Returns the terminal record, or the latest one on timeout.
    pub async fn wait_for_terminal(
        &self,
        execution_id: &str,
        timeout: Duration,
    ) -> Result<Execution, WorkflowError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let execution = self.get_execution(execution_id)?;
            if execution.status.is_terminal() {
                return Ok(execution);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(execution);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn get_execution(&self, execution_id: &str) -> Result<Execution, WorkflowError> {
        self.store.get_execution(execution_id).map_err(|e| match e {
            StoreError::NotFound { .. } => WorkflowError::NotFound {
                execution_id: execution_id.to_string(),
            },
            other => WorkflowError::Store(other),
        })
    }

    fn spawn_runner(&self, template: WorkflowTemplate, workflow_id: String) {
        let controls = Arc::new(ExecutionControls::new());
        let deps = self.deps.clone();
        let task_controls = controls.clone();
        let task_id = workflow_id.clone();
        let handle = tokio::spawn(async move {
            runner::run_execution(deps, template, task_id, task_controls).await;
        });
        self.active
            .insert(workflow_id, ActiveExecution { controls, handle });
    }

    fn reap_finished(&self) {
        self.active.retain(|_, active| !active.handle.is_finished());
    }
}
