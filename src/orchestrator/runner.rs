//! Per-execution driver task.
//!
//! One runner task owns one execution: it walks the template's stages in
//! order, verifies dependencies, fans per-item work out through the stage
//! processors, and persists every observable transition. All progress
//! ticks for the execution flow through a single writer task so counters
//! never regress.

use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::alerts::{AlertEmitter, AlertKind};
use crate::config::PipelineConfig;
use crate::errors::WorkflowError;
use crate::model::{
    Execution, ExecutionStatus, ItemResult, RegistrationState, StageKind, StepRecord, StepStatus,
};
use crate::orchestrator::stage::{ItemOutcome, StageContext, StageProcessor};
use crate::progress::ProgressTracker;
use crate::registration::{DispatchObserver, ItemDispatchEvent};
use crate::store::{ExecutionSnapshot, SnapshotStore, SqliteStore};
use crate::workflow::{WorkflowTemplate, merge_config};

/// Pause/cancel intents for one execution. Cancel is terminal; pause is
/// honoured at the next stage boundary.
pub struct ExecutionControls {
    pub pause: AtomicBool,
    pub cancel: CancellationToken,
}

impl ExecutionControls {
    pub fn new() -> Self {
        Self {
            pause: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }
}

impl Default for ExecutionControls {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared collaborators the runner needs; cheap to clone behind an `Arc`.
pub struct RunnerDeps {
    pub store: Arc<SqliteStore>,
    pub snapshots: SnapshotStore,
    pub tracker: Arc<ProgressTracker>,
    pub alerts: Arc<AlertEmitter>,
    pub processors: HashMap<StageKind, Arc<dyn StageProcessor>>,
    pub config: PipelineConfig,
}

/// Drive an execution to a terminal state. Never panics; failures are
/// persisted on the execution record.
pub async fn run_execution(
    deps: Arc<RunnerDeps>,
    template: WorkflowTemplate,
    workflow_id: String,
    controls: Arc<ExecutionControls>,
) {
    if let Err(e) = drive(&deps, &template, &workflow_id, &controls).await {
        tracing::error!(execution_id = %workflow_id, error = %e, "execution runner failed");
        // Best-effort: surface the internal failure on the record.
        if let Ok(mut execution) = deps.store.get_execution(&workflow_id)
            && !execution.status.is_terminal()
        {
            execution.status = ExecutionStatus::Failed;
            execution.completed_at = Some(Utc::now());
            execution.error_log = Some(e.to_string());
            let _ = deps.store.update_execution(&execution);
        }
        deps.tracker.stop_tracking(&workflow_id);
    }
}

async fn drive(
    deps: &Arc<RunnerDeps>,
    template: &WorkflowTemplate,
    workflow_id: &str,
    controls: &Arc<ExecutionControls>,
) -> Result<(), WorkflowError> {
    let mut execution = deps.store.get_execution(workflow_id)?;

    execution.status = ExecutionStatus::Running;
    if execution.started_at.is_none() {
        execution.started_at = Some(Utc::now());
    }
    execution.total_steps = template.stage_count() as u32;
    deps.store.update_execution(&execution)?;

    if !deps.tracker.is_tracking(workflow_id) {
        deps.tracker
            .start_tracking(workflow_id, execution.total_items);
    }
    ensure_item_results(deps, &execution)?;

    tracing::info!(
        execution_id = %workflow_id,
        template = %template.name,
        items = execution.total_items,
        "execution running"
    );

    let graph = template.graph()?;
    let mut existing_steps: HashMap<u32, StepRecord> = deps
        .store
        .steps_for_execution(&execution.id)?
        .into_iter()
        .map(|s| (s.ordinal, s))
        .collect();
    let mut stage_state: Vec<StepStatus> = (0..template.stages.len())
        .map(|i| {
            existing_steps
                .get(&(i as u32))
                .map(|s| s.status)
                .unwrap_or(StepStatus::Pending)
        })
        .collect();

    for (idx, stage) in template.stages.iter().enumerate() {
        // Recovery path: stages that already finished stay finished.
        if stage_state[idx].is_terminal() && stage_state[idx] != StepStatus::Failed {
            continue;
        }

        // Stage boundary: honour cancel, then pause.
        if controls.cancel.is_cancelled() {
            return finalize_cancelled(deps, &mut execution, None);
        }
        if wait_while_paused(deps, &mut execution, controls).await? {
            return finalize_cancelled(deps, &mut execution, None);
        }

        // Dependency gate.
        let unmet = graph
            .dependencies(idx)
            .iter()
            .find(|dep| stage_state[**dep] != StepStatus::Completed);
        if let Some(&dep) = unmet {
            let dep_name = &template.stages[dep].name;
            if stage.on_failure_skip {
                let (mut step, existed) = match existing_steps.remove(&(idx as u32)) {
                    Some(step) => (step, true),
                    None => (new_step(&execution, idx, stage), false),
                };
                step.status = StepStatus::Skipped;
                upsert_step(deps, &step, existed)?;
                stage_state[idx] = StepStatus::Skipped;
                tracing::warn!(
                    execution_id = %workflow_id,
                    stage = %stage.name,
                    dependency = %dep_name,
                    "stage skipped after dependency failure"
                );
                continue;
            }
            let message = format!(
                "stage '{}' depends on '{}' which did not complete",
                stage.name, dep_name
            );
            return fail_execution(deps, &mut execution, &stage.name, idx, &message);
        }

        // Step record: reuse the row on recovery, else create it.
        let (mut step, existed) = match existing_steps.remove(&(idx as u32)) {
            Some(step) => (step, true),
            None => (new_step(&execution, idx, stage), false),
        };
        step.status = StepStatus::Running;
        if step.started_at.is_none() {
            step.started_at = Some(Utc::now());
        }
        step.total_items = execution.total_items;
        let merged = merge_config(
            &stage.default_config,
            &execution.execution_config,
            &execution.execution_config["stage_overrides"][&stage.name],
        );
        step.config = merged.clone();
        upsert_step(deps, &step, existed)?;

        // Progress plumbing: a single writer task consumes per-item events
        // and is the only thing that writes live counters.
        let (event_tx, event_rx) = mpsc::unbounded_channel::<(String, Option<bool>)>();
        let observer: DispatchObserver = {
            let tx = event_tx.clone();
            Arc::new(move |event: ItemDispatchEvent<'_>| match event {
                ItemDispatchEvent::Started { item_id } => {
                    let _ = tx.send((item_id.to_string(), None));
                }
                ItemDispatchEvent::Finished { item_id, success } => {
                    let _ = tx.send((item_id.to_string(), Some(success)));
                }
            })
        };
        drop(event_tx);
        let writer = spawn_progress_writer(
            deps.clone(),
            workflow_id.to_string(),
            step.clone(),
            event_rx,
        );

        let processor = deps
            .processors
            .get(&stage.kind)
            .cloned()
            .ok_or_else(|| {
                WorkflowError::Other(anyhow::anyhow!(
                    "no processor registered for stage kind '{}'",
                    stage.kind.as_str()
                ))
            })?;

        let item_results = deps.store.item_results_for_execution(&execution.id)?;
        let ctx = StageContext {
            execution: &execution,
            stage,
            items: &execution.items,
            item_results: &item_results,
            config: merged,
            max_concurrency: deps.config.max_concurrent_registrations,
            cancel: &controls.cancel,
            observer: Some(observer),
        };
        let result = processor.run(ctx).await;
        writer.await.ok();

        match result {
            Ok(outcome) => {
                let succeeded = outcome.item_outcomes.iter().filter(|o| o.success).count() as u32;
                step.processed_items = outcome.item_outcomes.len() as u32;
                step.succeeded_items = succeeded;
                step.failed_items = step.processed_items - succeeded;
                step.results = Some(outcome.results.clone());
                step.processing_rate = deps.tracker.current_rate(workflow_id);

                // The registration engine updates item rows itself.
                if stage.kind != StageKind::Registration {
                    apply_item_outcomes(deps, &execution, stage.kind, &outcome.item_outcomes)?;
                }

                if controls.cancel.is_cancelled() {
                    step.status = StepStatus::Failed;
                    step.error_details = Some("cancelled".to_string());
                    step.completed_at = Some(Utc::now());
                    step.calculate_duration();
                    deps.store.update_step(&step)?;
                    execution.failed_steps += 1;
                    return finalize_cancelled(deps, &mut execution, Some(&step));
                }

                step.status = StepStatus::Completed;
                step.completed_at = Some(Utc::now());
                step.calculate_duration();
                deps.store.update_step(&step)?;
                stage_state[idx] = StepStatus::Completed;

                execution.completed_steps += 1;
                execution.processed_items = step.processed_items;
                execution.succeeded_items = step.succeeded_items;
                execution.failed_items = step.failed_items;
                execution.success_rate = execution.calculate_success_rate();
                execution.error_rate = if execution.processed_items > 0 {
                    (execution.failed_items as f64 / execution.processed_items as f64) * 100.0
                } else {
                    0.0
                };
                deps.store.update_execution(&execution)?;

                save_snapshot(deps, &execution, template, idx + 1, controls)?;
                deps.snapshots.save_checkpoint(
                    workflow_id,
                    &stage.name,
                    json!({
                        "processed": step.processed_items,
                        "succeeded": step.succeeded_items,
                        "failed": step.failed_items,
                    }),
                )?;
                tracing::info!(
                    execution_id = %workflow_id,
                    stage = %stage.name,
                    processed = step.processed_items,
                    succeeded = step.succeeded_items,
                    "stage completed"
                );
            }
            Err(e) => {
                step.status = StepStatus::Failed;
                step.error_details = Some(e.to_string());
                step.completed_at = Some(Utc::now());
                step.calculate_duration();
                deps.store.update_step(&step)?;
                execution.failed_steps += 1;
                return fail_execution(deps, &mut execution, &stage.name, idx, &e.to_string());
            }
        }
    }

    finalize_completed(deps, &mut execution)
}

fn new_step(execution: &Execution, idx: usize, stage: &crate::workflow::StageSpec) -> StepRecord {
    StepRecord {
        id: Uuid::new_v4().to_string(),
        execution_id: execution.id.clone(),
        ordinal: idx as u32,
        name: stage.name.clone(),
        kind: stage.kind,
        status: StepStatus::Pending,
        started_at: None,
        completed_at: None,
        duration_seconds: None,
        total_items: execution.total_items,
        processed_items: 0,
        succeeded_items: 0,
        failed_items: 0,
        config: json!({}),
        results: None,
        error_details: None,
        processing_rate: 0.0,
    }
}

fn upsert_step(
    deps: &RunnerDeps,
    step: &StepRecord,
    existed: bool,
) -> Result<(), WorkflowError> {
    if existed {
        deps.store.update_step(step)?;
    } else {
        deps.store.insert_step(step)?;
    }
    Ok(())
}

/// Create item-result rows for items that do not have one yet (fresh
/// starts create all of them; recovery finds them in place).
fn ensure_item_results(deps: &RunnerDeps, execution: &Execution) -> Result<(), WorkflowError> {
    let existing: std::collections::HashSet<String> = deps
        .store
        .item_results_for_execution(&execution.id)?
        .into_iter()
        .map(|r| r.item_id)
        .collect();

    for item in &execution.items {
        if existing.contains(&item.id) {
            continue;
        }
        deps.store.insert_item_result(&ItemResult {
            id: Uuid::new_v4().to_string(),
            execution_id: Some(execution.id.clone()),
            batch_id: None,
            item_id: item.id.clone(),
            item_code: item.code.clone(),
            item: Some(item.clone()),
            sourcing_status: StepStatus::Pending,
            processing_status: StepStatus::Pending,
            registration_status: StepStatus::Pending,
            sourcing_completed_at: None,
            processing_completed_at: None,
            registration_completed_at: None,
            sourcing_artifacts: None,
            processing_artifacts: None,
            registration_artifacts: None,
            final_status: RegistrationState::Pending,
            last_error: None,
            total_processing_time_secs: None,
        })?;
    }
    Ok(())
}

/// Block while the pause intent is set, re-checking the cancel signal.
/// Returns true when cancellation interrupted the pause.
async fn wait_while_paused(
    deps: &RunnerDeps,
    execution: &mut Execution,
    controls: &ExecutionControls,
) -> Result<bool, WorkflowError> {
    if !controls.pause.load(Ordering::SeqCst) {
        return Ok(false);
    }

    execution.status = ExecutionStatus::Paused;
    deps.store.update_execution(execution)?;
    tracing::info!(execution_id = %execution.workflow_id, "execution paused");

    loop {
        if controls.cancel.is_cancelled() {
            return Ok(true);
        }
        if !controls.pause.load(Ordering::SeqCst) {
            break;
        }
        // Keep the record warm so recovery does not claim a paused
        // execution that is still owned.
        deps.store.touch_execution(&execution.workflow_id)?;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    execution.status = ExecutionStatus::Running;
    deps.store.update_execution(execution)?;
    tracing::info!(execution_id = %execution.workflow_id, "execution resumed");
    Ok(false)
}

/// Map stage outcomes onto the per-item rows, as the stage kind dictates.
fn apply_item_outcomes(
    deps: &RunnerDeps,
    execution: &Execution,
    kind: StageKind,
    outcomes: &[ItemOutcome],
) -> Result<(), WorkflowError> {
    let mut rows: HashMap<String, ItemResult> = deps
        .store
        .item_results_for_execution(&execution.id)?
        .into_iter()
        .map(|r| (r.item_id.clone(), r))
        .collect();
    let now = Utc::now();

    for outcome in outcomes {
        let Some(row) = rows.get_mut(&outcome.item_id) else {
            continue;
        };
        let stage_status = if outcome.success {
            StepStatus::Completed
        } else {
            StepStatus::Failed
        };

        match kind {
            StageKind::Sourcing => {
                row.sourcing_status = stage_status;
                row.sourcing_completed_at = Some(now);
                row.sourcing_artifacts = Some(outcome.artifacts.clone());
            }
            StageKind::Processing => {
                row.processing_status = stage_status;
                row.processing_completed_at = Some(now);
                row.processing_artifacts = Some(outcome.artifacts.clone());
            }
            // Registration rows are written by the engine.
            StageKind::Registration => {}
            _ => {}
        }

        if outcome.success {
            // Upgrade only undecided items; a partial registration result
            // stays partial and a failed item stays failed.
            if matches!(
                row.final_status,
                RegistrationState::Pending | RegistrationState::Running
            ) {
                row.final_status = RegistrationState::Completed;
            }
        } else {
            row.final_status = RegistrationState::Failed;
            row.last_error = outcome.error.clone();
        }
        if let Some(started) = execution.started_at {
            row.total_processing_time_secs = Some((now - started).num_seconds());
        }
        deps.store.update_item_result(row)?;
    }
    Ok(())
}

fn save_snapshot(
    deps: &RunnerDeps,
    execution: &Execution,
    template: &WorkflowTemplate,
    current_step: usize,
    controls: &ExecutionControls,
) -> Result<(), WorkflowError> {
    deps.snapshots.save_snapshot(&ExecutionSnapshot {
        execution_id: execution.workflow_id.clone(),
        template_name: template.name.clone(),
        stage_names: template.stages.iter().map(|s| s.name.clone()).collect(),
        current_step,
        completed_items: execution.processed_items,
        last_progress_at: Utc::now(),
        pause_requested: controls.pause.load(Ordering::SeqCst),
        cancel_requested: controls.cancel.is_cancelled(),
        last_updated: Utc::now(),
    })?;
    Ok(())
}

/// Recompute execution item counters from per-item final statuses.
fn refresh_item_counters(
    deps: &RunnerDeps,
    execution: &mut Execution,
) -> Result<(), WorkflowError> {
    let items = deps.store.item_results_for_execution(&execution.id)?;
    let succeeded = items
        .iter()
        .filter(|i| {
            matches!(
                i.final_status,
                RegistrationState::Completed | RegistrationState::PartiallyCompleted
            )
        })
        .count() as u32;
    let failed = items
        .iter()
        .filter(|i| {
            matches!(
                i.final_status,
                RegistrationState::Failed | RegistrationState::Cancelled
            )
        })
        .count() as u32;
    execution.succeeded_items = succeeded;
    execution.failed_items = failed;
    execution.processed_items = succeeded + failed;
    execution.success_rate = execution.calculate_success_rate();
    execution.error_rate = if execution.processed_items > 0 {
        (failed as f64 / execution.processed_items as f64) * 100.0
    } else {
        0.0
    };
    Ok(())
}

fn finalize_completed(
    deps: &RunnerDeps,
    execution: &mut Execution,
) -> Result<(), WorkflowError> {
    refresh_item_counters(deps, execution)?;
    let now = Utc::now();
    execution.status = ExecutionStatus::Completed;
    execution.completed_at = Some(now);

    let duration_minutes = execution
        .started_at
        .map(|s| (now - s).num_milliseconds() as f64 / 60_000.0)
        .unwrap_or(0.0);
    execution.results_summary = Some(json!({
        "completed_at": now.to_rfc3339(),
        "total_duration_minutes": duration_minutes,
        "success_rate": execution.success_rate,
        "items_processed": execution.processed_items,
    }));
    deps.store.update_execution(execution)?;

    deps.tracker.stop_tracking(&execution.workflow_id);
    deps.snapshots.clear_snapshot(&execution.workflow_id)?;
    deps.snapshots.mark_for_cleanup(&execution.workflow_id)?;
    tracing::info!(
        execution_id = %execution.workflow_id,
        succeeded = execution.succeeded_items,
        failed = execution.failed_items,
        "execution completed"
    );
    Ok(())
}

fn finalize_cancelled(
    deps: &RunnerDeps,
    execution: &mut Execution,
    running_step: Option<&StepRecord>,
) -> Result<(), WorkflowError> {
    refresh_item_counters(deps, execution)?;
    execution.status = ExecutionStatus::Cancelled;
    execution.completed_at = Some(Utc::now());
    deps.store.update_execution(execution)?;

    deps.tracker.stop_tracking(&execution.workflow_id);
    deps.snapshots.clear_snapshot(&execution.workflow_id)?;
    deps.snapshots.mark_for_cleanup(&execution.workflow_id)?;

    let _ = deps.alerts.emit(
        Some(&execution.workflow_id),
        AlertKind::Info,
        crate::alerts::AlertSeverity::Low,
        "Execution cancelled",
        &format!(
            "Execution of '{}' was cancelled after {} items",
            execution.workflow_name, execution.processed_items
        ),
        Some("orchestrator"),
        running_step.map(|s| json!({"step": s.name})),
    );
    tracing::info!(
        execution_id = %execution.workflow_id,
        processed = execution.processed_items,
        "execution cancelled"
    );
    Ok(())
}

fn fail_execution(
    deps: &RunnerDeps,
    execution: &mut Execution,
    stage_name: &str,
    stage_index: usize,
    message: &str,
) -> Result<(), WorkflowError> {
    refresh_item_counters(deps, execution)?;
    execution.status = ExecutionStatus::Failed;
    execution.completed_at = Some(Utc::now());
    execution.error_log = Some(format!("Stage '{stage_name}' failed: {message}"));
    deps.store.update_execution(execution)?;

    deps.alerts
        .stage_failed(&execution.workflow_id, stage_name, message)?;
    deps.snapshots.save_error_context(
        &execution.workflow_id,
        stage_name,
        "StageProcessorError",
        message,
        json!({"stage_index": stage_index}),
    )?;

    deps.tracker.stop_tracking(&execution.workflow_id);
    deps.snapshots.mark_for_cleanup(&execution.workflow_id)?;
    Ok(())
}

/// Single writer for live progress: consumes per-item events, feeds the
/// tracker, and flushes counters to the store and cache on throttled
/// ticks. Bottleneck checks piggyback on the same ticks.
fn spawn_progress_writer(
    deps: Arc<RunnerDeps>,
    workflow_id: String,
    step: StepRecord,
    mut events: mpsc::UnboundedReceiver<(String, Option<bool>)>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut processed = step.processed_items;
        let mut succeeded = step.succeeded_items;
        let mut failed = step.failed_items;
        let mut last_write = Instant::now();
        let mut since_write: u32 = 0;
        let interval = Duration::from_secs(deps.config.progress_tick_min_interval_seconds);

        while let Some((_item_id, phase)) = events.recv().await {
            let Some(success) = phase else {
                continue;
            };
            processed += 1;
            since_write += 1;
            if success {
                succeeded += 1;
            } else {
                failed += 1;
            }

            let estimation = deps.tracker.record(&workflow_id, processed, Some(&step.name));

            let due = since_write >= deps.config.progress_tick_min_items
                || last_write.elapsed() >= interval;
            if !due {
                continue;
            }
            since_write = 0;
            last_write = Instant::now();

            let (rate, eta) = estimation
                .map(|e| (e.current_rate, e.estimated_completion))
                .unwrap_or((0.0, None));
            if let Err(e) = deps.store.apply_progress_tick(
                &workflow_id,
                &step.id,
                processed,
                succeeded,
                failed,
                processed,
                succeeded,
                failed,
                rate,
                eta,
            ) {
                tracing::error!(execution_id = %workflow_id, error = %e, "progress tick failed");
            }
            let _ = deps.snapshots.update_progress(
                &workflow_id,
                json!({
                    "step": step.name,
                    "completed": processed,
                    "succeeded": succeeded,
                    "failed": failed,
                    "total": step.total_items,
                    "processing_rate": rate,
                }),
            );

            // Bottleneck checks run against the live counters.
            let mut live = step.clone();
            live.status = StepStatus::Running;
            live.processed_items = processed;
            live.succeeded_items = succeeded;
            live.failed_items = failed;
            for signal in deps
                .tracker
                .detect_bottlenecks(&workflow_id, std::slice::from_ref(&live))
            {
                let _ = deps.alerts.emit(
                    Some(&workflow_id),
                    AlertKind::Warning,
                    signal.severity,
                    &format!("Bottleneck detected: {}", signal.kind.as_str()),
                    &signal.message,
                    Some("progress_tracker"),
                    Some(signal.details.clone()),
                );
            }
        }
    })
}
