//! End-to-end pipeline scenarios.
//!
//! These tests drive the public orchestrator and engine APIs against an
//! in-memory store, a deterministic cache and scripted platform adapters.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shipwright::config::PipelineConfig;
use shipwright::errors::WorkflowError;
use shipwright::model::{
    Execution, ExecutionStatus, ItemResult, PlatformAccount, PlatformRegistration, ProductItem,
    RegistrationState, StageKind, StepRecord, StepStatus,
};
use shipwright::orchestrator::{
    ContentOutcome, ContentProcessor, ItemSelector, ItemSource, Orchestrator,
};
use shipwright::platform::{PlatformAdapter, PlatformError, RegistrationRequest};
use shipwright::store::{EphemeralCache, ExecutionSnapshot, MemoryCache, SnapshotStore, SqliteStore};

// =============================================================================
// Harness
// =============================================================================

/// Adapter that answers from a scripted queue (last entry repeats) with
/// optional artificial latency.
struct ScriptedAdapter {
    platform: String,
    script: Mutex<Vec<Result<Value, PlatformError>>>,
    latency: Duration,
    calls: Mutex<u32>,
}

impl ScriptedAdapter {
    fn new(platform: &str, script: Vec<Result<Value, PlatformError>>) -> Arc<Self> {
        Self::with_latency(platform, script, Duration::ZERO)
    }

    fn with_latency(
        platform: &str,
        script: Vec<Result<Value, PlatformError>>,
        latency: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            platform: platform.to_string(),
            script: Mutex::new(script),
            latency,
            calls: Mutex::new(0),
        })
    }

    fn call_count(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl PlatformAdapter for ScriptedAdapter {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn create_product(&self, _request: &RegistrationRequest) -> Result<Value, PlatformError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        *self.calls.lock().unwrap() += 1;
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.remove(0)
        } else {
            script[0].clone()
        }
    }
}

/// Content processor with per-item latency, for pause timing tests.
struct SlowContent(Duration);

#[async_trait]
impl ContentProcessor for SlowContent {
    async fn process(&self, _item: &ProductItem, _config: &Value) -> anyhow::Result<ContentOutcome> {
        tokio::time::sleep(self.0).await;
        Ok(ContentOutcome {
            changes: json!({}),
            quality_score: 9.0,
        })
    }
}

fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default().with_retry_backoff_seconds(vec![0, 0, 0, 0]);
    config.progress_tick_min_interval_seconds = 0;
    config.progress_tick_min_items = 1;
    config
}

fn seed_account(store: &SqliteStore, platform: &str) {
    store
        .upsert_account(&PlatformAccount {
            id: format!("acct-{platform}"),
            platform: platform.to_string(),
            label: "test".into(),
            active: true,
            selected: true,
            api_calls_total: 0,
            api_failures: 0,
            last_used_at: None,
        })
        .unwrap();
}

struct Harness {
    store: Arc<SqliteStore>,
    cache: Arc<MemoryCache>,
    orchestrator: Orchestrator,
    config: PipelineConfig,
}

fn harness(adapters: Vec<Arc<ScriptedAdapter>>, config: PipelineConfig) -> Harness {
    harness_with(adapters, config, None)
}

fn harness_with(
    adapters: Vec<Arc<ScriptedAdapter>>,
    config: PipelineConfig,
    content: Option<Arc<dyn ContentProcessor>>,
) -> Harness {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let cache = Arc::new(MemoryCache::new());
    let mut engine =
        shipwright::registration::RegistrationEngine::new(store.clone(), config.clone());
    for adapter in adapters {
        seed_account(&store, adapter.platform());
        engine = engine.with_adapter(adapter);
    }

    let mut builder = Orchestrator::builder()
        .with_store(store.clone())
        .with_cache(cache.clone() as Arc<dyn EphemeralCache>)
        .with_engine(Arc::new(engine))
        .with_config(config.clone());
    if let Some(content) = content {
        builder = builder.with_content_processor(content);
    }

    Harness {
        store,
        cache,
        orchestrator: builder.build().unwrap(),
        config,
    }
}

fn lamp(id: &str) -> ProductItem {
    let mut item = ProductItem::new(id, "Desk Lamp", 19.99);
    item.code = Some(format!("SKU-{id}"));
    item.description = Some("Warm LED desk lamp with adjustable arm".into());
    item.main_image_url = Some("https://cdn.example.com/lamp.jpg".into());
    item
}

async fn wait_terminal(orchestrator: &Orchestrator, id: &str) -> Execution {
    orchestrator
        .wait_for_terminal(id, Duration::from_secs(30))
        .await
        .unwrap()
}

// =============================================================================
// Scenario tests
// =============================================================================

#[tokio::test]
async fn happy_path_single_item_single_platform() {
    let adapter = ScriptedAdapter::new("A", vec![Ok(json!({"productId": "P-1"}))]);
    let h = harness(vec![adapter.clone()], fast_config());

    let id = h
        .orchestrator
        .start(
            "registration_only",
            ItemSource::Items(vec![lamp("item-1")]),
            json!({"platforms": ["A"]}),
        )
        .unwrap();
    let execution = wait_terminal(&h.orchestrator, &id).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.succeeded_items, 1);
    assert_eq!(execution.failed_items, 0);
    assert!(execution.results_summary.is_some());
    assert!(execution.completed_at.is_some());

    let view = h.orchestrator.status(&id).unwrap();
    let registration_step = view
        .steps
        .iter()
        .find(|s| s.name == "multi_platform_registration")
        .unwrap();
    assert_eq!(registration_step.status, StepStatus::Completed);
    assert_eq!(registration_step.total_items, 1);
    assert_eq!(registration_step.succeeded_items, 1);

    let items = h.store.item_results_for_execution(&execution.id).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].registration_status, StepStatus::Completed);
    assert_eq!(items[0].final_status, RegistrationState::Completed);

    let regs = h.store.registrations_for_item(&items[0].id).unwrap();
    assert_eq!(regs.len(), 1);
    assert_eq!(regs[0].platform_product_id.as_deref(), Some("P-1"));
    assert_eq!(adapter.call_count(), 1);
}

#[tokio::test]
async fn partial_platform_failure_across_items() {
    let good = ScriptedAdapter::new("A", vec![Ok(json!({"productId": "P-1"}))]);
    let bad = ScriptedAdapter::new(
        "B",
        vec![Err(PlatformError::Http {
            status: 500,
            message: "internal error".into(),
        })],
    );
    let h = harness(vec![good, bad.clone()], fast_config());

    let id = h
        .orchestrator
        .start(
            "registration_only",
            ItemSource::Items(vec![lamp("item-1"), lamp("item-2")]),
            json!({"platforms": ["A", "B"]}),
        )
        .unwrap();
    let execution = wait_terminal(&h.orchestrator, &id).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);

    let items = h.store.item_results_for_execution(&execution.id).unwrap();
    assert_eq!(items.len(), 2);
    for item in &items {
        assert_eq!(item.final_status, RegistrationState::PartiallyCompleted);
        let regs = h.store.registrations_for_item(&item.id).unwrap();
        let b_reg = regs.iter().find(|r| r.platform == "B").unwrap();
        assert_eq!(b_reg.status, RegistrationState::Failed);
        assert_eq!(b_reg.attempt_count, 4);
        let a_reg = regs.iter().find(|r| r.platform == "A").unwrap();
        assert_eq!(a_reg.status, RegistrationState::Completed);
    }
    // Four attempts per item on the failing platform.
    assert_eq!(bad.call_count(), 8);

    // Invariants at terminal state.
    assert_eq!(
        execution.processed_items,
        execution.succeeded_items + execution.failed_items
    );
    let view = h.orchestrator.status(&id).unwrap();
    for step in &view.steps {
        assert!(step.processed_items <= step.total_items);
        if let (Some(started), Some(completed)) = (step.started_at, step.completed_at) {
            assert!(started <= completed);
        }
    }
}

#[tokio::test]
async fn zero_item_execution_completes_immediately() {
    let adapter = ScriptedAdapter::new("A", vec![Ok(json!({"productId": "P-1"}))]);
    let h = harness(vec![adapter.clone()], fast_config());

    let id = h
        .orchestrator
        .start(
            "registration_only",
            ItemSource::Items(Vec::new()),
            json!({"platforms": ["A"]}),
        )
        .unwrap();
    let execution = wait_terminal(&h.orchestrator, &id).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.succeeded_items, 0);
    assert_eq!(execution.failed_items, 0);
    assert_eq!(adapter.call_count(), 0);
    // No items, no progress points beyond the initial zero, no bottlenecks.
    assert!(h.orchestrator.status(&id).unwrap().alerts.is_empty());
}

#[tokio::test]
async fn cancellation_mid_fan_out() {
    let adapter = ScriptedAdapter::with_latency(
        "A",
        vec![Ok(json!({"productId": "P"}))],
        Duration::from_millis(200),
    );
    let h = harness(vec![adapter], fast_config());

    let items: Vec<ProductItem> = (0..100).map(|i| lamp(&format!("item-{i}"))).collect();
    let id = h
        .orchestrator
        .start(
            "registration_only",
            ItemSource::Items(items),
            json!({"platforms": ["A"]}),
        )
        .unwrap();

    // Wait until at least 10 items completed the registration stage.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    loop {
        let view = h.orchestrator.status(&id).unwrap();
        let processed: u32 = view
            .steps
            .iter()
            .filter(|s| s.kind == StageKind::Registration)
            .map(|s| s.processed_items)
            .sum();
        if processed >= 10 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "never reached 10 processed items"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    h.orchestrator.cancel(&id).unwrap();
    let execution = wait_terminal(&h.orchestrator, &id).await;

    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    assert!(execution.processed_items >= 10);
    assert!(execution.processed_items <= 100);
    assert_eq!(
        execution.processed_items,
        execution.succeeded_items + execution.failed_items
    );

    // The in-flight registration step records the cancellation.
    let view = h.orchestrator.status(&id).unwrap();
    let registration_step = view
        .steps
        .iter()
        .find(|s| s.kind == StageKind::Registration)
        .unwrap();
    assert_eq!(registration_step.status, StepStatus::Failed);
    assert_eq!(registration_step.error_details.as_deref(), Some("cancelled"));

    // Cancel is idempotent once terminal.
    h.orchestrator.cancel(&id).unwrap();
    let after = wait_terminal(&h.orchestrator, &id).await;
    assert_eq!(after.status, ExecutionStatus::Cancelled);
}

#[tokio::test]
async fn pause_then_resume_reaches_same_terminal_state() {
    let items = vec![lamp("a"), lamp("b"), lamp("c")];

    // Reference run without pausing.
    let reference = harness_with(
        Vec::new(),
        fast_config(),
        Some(Arc::new(SlowContent(Duration::from_millis(20))) as Arc<dyn ContentProcessor>),
    );
    let ref_id = reference
        .orchestrator
        .start("processing_only", ItemSource::Items(items.clone()), json!({}))
        .unwrap();
    let ref_execution = wait_terminal(&reference.orchestrator, &ref_id).await;
    assert_eq!(ref_execution.status, ExecutionStatus::Completed);

    // Paused run.
    let h = harness_with(
        Vec::new(),
        fast_config(),
        Some(Arc::new(SlowContent(Duration::from_millis(20))) as Arc<dyn ContentProcessor>),
    );
    let id = h
        .orchestrator
        .start("processing_only", ItemSource::Items(items), json!({}))
        .unwrap();
    h.orchestrator.pause(&id).unwrap();

    // The pause is honoured at a stage boundary.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let status = h.orchestrator.status(&id).unwrap().execution.status;
        if status == ExecutionStatus::Paused {
            break;
        }
        assert!(
            status != ExecutionStatus::Completed,
            "completed before pause was honoured"
        );
        assert!(tokio::time::Instant::now() < deadline, "never paused");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    h.orchestrator.resume(&id).unwrap();
    let execution = wait_terminal(&h.orchestrator, &id).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.succeeded_items, ref_execution.succeeded_items);
    assert_eq!(execution.failed_items, ref_execution.failed_items);
    assert_eq!(execution.completed_steps, ref_execution.completed_steps);
}

#[tokio::test]
async fn unknown_template_and_invalid_selector_fail_synchronously() {
    let h = harness(Vec::new(), fast_config());

    let unknown = h.orchestrator.start(
        "no_such_template",
        ItemSource::Items(vec![lamp("x")]),
        json!({}),
    );
    assert!(matches!(unknown, Err(WorkflowError::UnknownTemplate { .. })));

    // The default catalog resolves every selector to nothing.
    let empty = h.orchestrator.start(
        "processing_only",
        ItemSource::Selector(ItemSelector::default()),
        json!({}),
    );
    assert!(matches!(empty, Err(WorkflowError::InvalidSelector { .. })));
}

#[tokio::test]
async fn stage_failure_fails_execution_with_alert_and_error_context() {
    // No accounts seeded: the registration stage processor errors out.
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let orchestrator = Orchestrator::builder()
        .with_store(store.clone())
        .with_config(fast_config())
        .build()
        .unwrap();

    let id = orchestrator
        .start(
            "registration_only",
            ItemSource::Items(vec![lamp("item-1")]),
            json!({"platforms": ["A"]}),
        )
        .unwrap();
    let execution = orchestrator
        .wait_for_terminal(&id, Duration::from_secs(30))
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.error_log.as_deref().unwrap().contains("multi_platform_registration"));
    assert!(execution.completed_at.is_some());

    let view = orchestrator.status(&id).unwrap();
    let failed_step = view
        .steps
        .iter()
        .find(|s| s.name == "multi_platform_registration")
        .unwrap();
    assert_eq!(failed_step.status, StepStatus::Failed);

    // High-severity alert and an operator-readable error blob.
    assert!(view
        .alerts
        .iter()
        .any(|a| a.severity == shipwright::alerts::AlertSeverity::High));
    let history = orchestrator.error_history(&id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].step_name, "multi_platform_registration");
}

#[tokio::test]
async fn recovery_preserves_and_advances_counters() {
    let adapter = ScriptedAdapter::new("A", vec![Ok(json!({"productId": "P-2"}))]);
    let mut config = fast_config();
    config.recovery_stale_threshold_minutes = 0;
    let h = harness(vec![adapter.clone()], config.clone());

    // Fabricate an interrupted execution: stage 0 done, stage 1 half done.
    let now = Utc::now();
    let execution = Execution {
        id: "row-rec".into(),
        workflow_id: "wf-rec".into(),
        workflow_name: "registration_only".into(),
        status: ExecutionStatus::Running,
        created_at: now,
        updated_at: now - chrono::Duration::hours(2),
        started_at: Some(now - chrono::Duration::hours(2)),
        completed_at: None,
        estimated_completion: None,
        total_steps: 3,
        completed_steps: 1,
        failed_steps: 0,
        total_items: 2,
        processed_items: 1,
        succeeded_items: 1,
        failed_items: 0,
        processing_rate: 0.0,
        success_rate: 100.0,
        error_rate: 0.0,
        execution_config: json!({"platforms": ["A"]}),
        results_summary: None,
        resource_usage: None,
        error_log: None,
        items: vec![lamp("item-1"), lamp("item-2")],
    };
    h.store.insert_execution(&execution).unwrap();

    let step = |ordinal: u32, name: &str, kind: StageKind, status: StepStatus| StepRecord {
        id: format!("step-{ordinal}"),
        execution_id: "row-rec".into(),
        ordinal,
        name: name.into(),
        kind,
        status,
        started_at: Some(now - chrono::Duration::hours(2)),
        completed_at: None,
        duration_seconds: None,
        total_items: 2,
        processed_items: if ordinal == 1 { 1 } else { 2 },
        succeeded_items: if ordinal == 1 { 1 } else { 2 },
        failed_items: 0,
        config: json!({}),
        results: None,
        error_details: None,
        processing_rate: 0.0,
    };
    h.store
        .insert_step(&step(0, "pre_registration_check", StageKind::Validation, StepStatus::Completed))
        .unwrap();
    h.store
        .insert_step(&step(1, "multi_platform_registration", StageKind::Registration, StepStatus::Running))
        .unwrap();

    let item_row = |id: &str, item: ProductItem, done: bool| ItemResult {
        id: id.into(),
        execution_id: Some("row-rec".into()),
        batch_id: None,
        item_id: item.id.clone(),
        item_code: item.code.clone(),
        item: Some(item),
        sourcing_status: StepStatus::Pending,
        processing_status: StepStatus::Pending,
        registration_status: if done { StepStatus::Completed } else { StepStatus::Pending },
        sourcing_completed_at: None,
        processing_completed_at: None,
        registration_completed_at: if done { Some(now) } else { None },
        sourcing_artifacts: None,
        processing_artifacts: None,
        registration_artifacts: None,
        final_status: if done {
            RegistrationState::Completed
        } else {
            RegistrationState::Pending
        },
        last_error: None,
        total_processing_time_secs: None,
    };
    h.store
        .insert_item_result(&item_row("ir-1", lamp("item-1"), true))
        .unwrap();
    h.store
        .insert_item_result(&item_row("ir-2", lamp("item-2"), false))
        .unwrap();
    h.store
        .insert_platform_registration(&PlatformRegistration {
            id: "pr-1".into(),
            item_result_id: "ir-1".into(),
            platform: "A".into(),
            account_id: None,
            status: RegistrationState::Completed,
            payload: None,
            response: Some(json!({"productId": "P-1"})),
            platform_product_id: Some("P-1".into()),
            attempt_count: 1,
            api_call_count: 1,
            last_error: None,
            scheduled_at: Some(now),
            next_retry_at: None,
            started_at: Some(now),
            completed_at: Some(now),
        })
        .unwrap();

    // The snapshot the crashed process left behind.
    let snapshots = SnapshotStore::new(h.cache.clone() as Arc<dyn EphemeralCache>, &h.config);
    snapshots
        .save_snapshot(&ExecutionSnapshot {
            execution_id: "wf-rec".into(),
            template_name: "registration_only".into(),
            stage_names: vec![
                "pre_registration_check".into(),
                "multi_platform_registration".into(),
                "registration_validation".into(),
            ],
            current_step: 1,
            completed_items: 1,
            last_progress_at: now - chrono::Duration::hours(2),
            pause_requested: false,
            cancel_requested: false,
            last_updated: now - chrono::Duration::hours(2),
        })
        .unwrap();

    let candidates = h.orchestrator.load_recovery_candidates().unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].workflow_id, "wf-rec");

    assert!(h.orchestrator.recover("wf-rec").unwrap());
    let execution = wait_terminal(&h.orchestrator, "wf-rec").await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    // Counters advanced, never regressed.
    assert_eq!(execution.succeeded_items, 2);
    assert_eq!(execution.processed_items, 2);
    assert!(execution.completed_steps >= 1);

    // The already-completed registration was not re-issued.
    assert_eq!(adapter.call_count(), 1);
    let regs = h.store.registrations_for_item("ir-1").unwrap();
    assert_eq!(regs[0].platform_product_id.as_deref(), Some("P-1"));
    let regs2 = h.store.registrations_for_item("ir-2").unwrap();
    assert_eq!(regs2.len(), 1);
    assert_eq!(regs2[0].platform_product_id.as_deref(), Some("P-2"));
}

#[tokio::test]
async fn durable_store_survives_process_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("pipeline.db");

    let adapter = ScriptedAdapter::new("A", vec![Ok(json!({"productId": "P-1"}))]);
    let execution_id = {
        let store = Arc::new(SqliteStore::open(&db_path).unwrap());
        seed_account(&store, "A");
        let engine = shipwright::registration::RegistrationEngine::new(
            store.clone(),
            fast_config(),
        )
        .with_adapter(adapter);
        let orchestrator = Orchestrator::builder()
            .with_store(store)
            .with_engine(Arc::new(engine))
            .with_config(fast_config())
            .build()
            .unwrap();

        let id = orchestrator
            .start(
                "registration_only",
                ItemSource::Items(vec![lamp("item-1")]),
                json!({"platforms": ["A"]}),
            )
            .unwrap();
        let execution = wait_terminal(&orchestrator, &id).await;
        assert_eq!(execution.status, ExecutionStatus::Completed);
        id
    };

    // A fresh process sees the terminal record and its rows.
    let store = Arc::new(SqliteStore::open(&db_path).unwrap());
    let orchestrator = Orchestrator::builder()
        .with_store(store.clone())
        .with_config(fast_config())
        .build()
        .unwrap();
    let view = orchestrator.status(&execution_id).unwrap();
    assert_eq!(view.execution.status, ExecutionStatus::Completed);
    assert_eq!(view.steps.len(), 3);
    let items = store.item_results_for_execution(&view.execution.id).unwrap();
    assert_eq!(items[0].final_status, RegistrationState::Completed);
}

#[tokio::test]
async fn complete_workflow_runs_all_stages() {
    let adapter = ScriptedAdapter::new("A", vec![Ok(json!({"productId": "P"}))]);
    let h = harness(vec![adapter], fast_config());

    // Rich items pass the default sourcing threshold.
    let items: Vec<ProductItem> = (0..3)
        .map(|i| {
            let mut item = lamp(&format!("item-{i}"));
            item.stock_quantity = 10;
            item.cost_price = Some(5.0);
            item.description = Some("x".repeat(120));
            item.keywords = vec!["lamp".into(), "desk".into(), "led".into()];
            item
        })
        .collect();

    let id = h
        .orchestrator
        .start(
            "complete_dropshipping",
            ItemSource::Items(items),
            json!({"platforms": ["A"]}),
        )
        .unwrap();
    let execution = wait_terminal(&h.orchestrator, &id).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.completed_steps, 6);
    assert_eq!(execution.succeeded_items, 3);

    let view = h.orchestrator.status(&id).unwrap();
    assert_eq!(view.steps.len(), 6);
    assert!(view.steps.iter().all(|s| s.status == StepStatus::Completed));

    // Item rows carry per-stage artifacts.
    let items = h.store.item_results_for_execution(&execution.id).unwrap();
    for item in items {
        assert_eq!(item.sourcing_status, StepStatus::Completed);
        assert_eq!(item.processing_status, StepStatus::Completed);
        assert_eq!(item.registration_status, StepStatus::Completed);
        assert!(item.sourcing_artifacts.is_some());
        assert!(item.processing_artifacts.is_some());
        assert!(item.registration_artifacts.is_some());
    }
}

#[tokio::test]
async fn progress_summary_tracks_live_execution() {
    let adapter = ScriptedAdapter::with_latency(
        "A",
        vec![Ok(json!({"productId": "P"}))],
        Duration::from_millis(50),
    );
    let h = harness(vec![adapter], fast_config());

    let items: Vec<ProductItem> = (0..30).map(|i| lamp(&format!("item-{i}"))).collect();
    let id = h
        .orchestrator
        .start(
            "registration_only",
            ItemSource::Items(items),
            json!({"platforms": ["A"]}),
        )
        .unwrap();

    // While running, the tracker serves summaries.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let mut saw_summary = false;
    loop {
        if let Some(summary) = h.orchestrator.summary(&id) {
            assert_eq!(summary.execution_id, id);
            assert!(summary.estimation.confidence >= 0.0);
            assert!(summary.estimation.confidence <= 1.0);
            if summary.current.as_ref().map(|c| c.completed).unwrap_or(0) > 0 {
                saw_summary = true;
                break;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(saw_summary, "tracker never reported progress");

    let execution = wait_terminal(&h.orchestrator, &id).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    // Tracker state is dropped at terminal.
    assert!(h.orchestrator.summary(&id).is_none());
}
