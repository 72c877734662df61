//! Stage processors and the collaborator seams they depend on.
//!
//! A stage processor receives the execution's item set, the merged config
//! and a cancellation signal, and returns per-item outcomes plus a results
//! blob. Processors for sourcing and content work delegate to narrow
//! collaborator traits with deterministic built-in implementations, so the
//! shipped templates run end-to-end without external services.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::errors::WorkflowError;
use crate::model::{Execution, ItemResult, ProductItem, StepStatus};
use crate::registration::{DispatchObserver, RegistrationEngine, base_payload};
use crate::workflow::StageSpec;

/// Item selection criteria for starting an execution without an explicit
/// item list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemSelector {
    /// Restrict to these item ids.
    #[serde(default)]
    pub ids: Option<Vec<String>>,
    /// Cap the number of items returned.
    #[serde(default)]
    pub limit: Option<usize>,
}

/// External catalog the orchestrator resolves selectors against.
pub trait ItemCatalog: Send + Sync {
    fn select(&self, selector: &ItemSelector) -> Result<Vec<ProductItem>, WorkflowError>;
}

/// Catalog used when none is injected; every selector resolves empty, which
/// `start` rejects as an invalid selector.
pub struct EmptyCatalog;

impl ItemCatalog for EmptyCatalog {
    fn select(&self, _selector: &ItemSelector) -> Result<Vec<ProductItem>, WorkflowError> {
        Ok(Vec::new())
    }
}

/// Sourcing assessment for one item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcingAssessment {
    pub score: f64,
    pub reasons: Vec<String>,
    pub market_data: Value,
}

/// AI/analysis collaborator behind the sourcing stage.
#[async_trait]
pub trait SourcingAnalyzer: Send + Sync {
    async fn analyze(&self, item: &ProductItem) -> anyhow::Result<SourcingAssessment>;
}

/// Deterministic scoring heuristic used when no analyzer is injected:
/// margin, content completeness and discoverability each contribute to a
/// 0–10 score.
pub struct HeuristicAnalyzer;

#[async_trait]
impl SourcingAnalyzer for HeuristicAnalyzer {
    async fn analyze(&self, item: &ProductItem) -> anyhow::Result<SourcingAssessment> {
        let mut score: f64 = 5.0;
        let mut reasons = Vec::new();

        if let Some(cost) = item.cost_price
            && cost > 0.0
        {
            let margin = (item.price - cost) / item.price;
            if margin >= 0.3 {
                score += 2.0;
                reasons.push("healthy margin".to_string());
            } else if margin < 0.1 {
                score -= 2.0;
                reasons.push("thin margin".to_string());
            }
        }
        if item.main_image_url.is_some() {
            score += 1.0;
            reasons.push("has main image".to_string());
        }
        if item
            .description
            .as_deref()
            .is_some_and(|d| d.len() >= 80)
        {
            score += 1.0;
            reasons.push("detailed description".to_string());
        }
        if item.keywords.len() >= 3 {
            score += 1.0;
            reasons.push("search keywords present".to_string());
        }

        Ok(SourcingAssessment {
            score: score.clamp(0.0, 10.0),
            reasons,
            market_data: json!({"source": "heuristic"}),
        })
    }
}

/// Outcome of content processing for one item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentOutcome {
    pub changes: Value,
    pub quality_score: f64,
}

/// Name/image/description processing collaborator behind the processing
/// stage.
#[async_trait]
pub trait ContentProcessor: Send + Sync {
    async fn process(&self, item: &ProductItem, config: &Value) -> anyhow::Result<ContentOutcome>;
}

/// Whitespace-normalising processor used when none is injected. Scores
/// content completeness so quality gates have something to act on. With
/// `optimize_content` set it also cleans the description and derives
/// search keywords from the name when the item has none.
pub struct BasicContentProcessor;

#[async_trait]
impl ContentProcessor for BasicContentProcessor {
    async fn process(&self, item: &ProductItem, config: &Value) -> anyhow::Result<ContentOutcome> {
        let mut changes = serde_json::Map::new();

        if config["generate_names"].as_bool().unwrap_or(true) {
            let cleaned = item.name.split_whitespace().collect::<Vec<_>>().join(" ");
            if cleaned != item.name {
                changes.insert("name".to_string(), json!(cleaned));
            }
        }

        if config["process_images"].as_bool().unwrap_or(true)
            && item.main_image_url.is_none()
            && let Some(first) = item.additional_images.first()
        {
            // No representative image: promote the first gallery image.
            changes.insert("main_image_url".to_string(), json!(first));
        }

        if config["optimize_content"].as_bool().unwrap_or(false) {
            if let Some(description) = &item.description {
                let cleaned = description.split_whitespace().collect::<Vec<_>>().join(" ");
                if cleaned != *description {
                    changes.insert("description".to_string(), json!(cleaned));
                }
            }
            if item.keywords.is_empty() {
                let derived: Vec<String> = item
                    .name
                    .split_whitespace()
                    .filter(|word| word.len() > 2)
                    .map(str::to_lowercase)
                    .collect();
                if !derived.is_empty() {
                    changes.insert("keywords".to_string(), json!(derived));
                }
            }
        }

        let mut quality: f64 = 4.0;
        if item.description.is_some() {
            quality += 2.0;
        }
        if item.main_image_url.is_some() {
            quality += 2.0;
        }
        if !item.additional_images.is_empty() {
            quality += 1.0;
        }
        if !item.keywords.is_empty() {
            quality += 1.0;
        }

        Ok(ContentOutcome {
            changes: Value::Object(changes),
            quality_score: quality.min(10.0),
        })
    }
}

/// Per-item outcome reported by a stage processor.
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub item_id: String,
    pub success: bool,
    pub error: Option<String>,
    pub artifacts: Value,
}

impl ItemOutcome {
    pub fn success(item_id: &str, artifacts: Value) -> Self {
        Self {
            item_id: item_id.to_string(),
            success: true,
            error: None,
            artifacts,
        }
    }

    pub fn failure(item_id: &str, error: impl Into<String>) -> Self {
        Self {
            item_id: item_id.to_string(),
            success: false,
            error: Some(error.into()),
            artifacts: Value::Null,
        }
    }
}

/// Aggregated result of running one stage.
#[derive(Debug, Clone, Default)]
pub struct StageOutcome {
    pub item_outcomes: Vec<ItemOutcome>,
    pub results: Value,
}

/// Everything a stage processor gets to work with.
pub struct StageContext<'a> {
    pub execution: &'a Execution,
    pub stage: &'a StageSpec,
    pub items: &'a [ProductItem],
    pub item_results: &'a [ItemResult],
    pub config: Value,
    pub max_concurrency: usize,
    pub cancel: &'a CancellationToken,
    pub observer: Option<DispatchObserver>,
}

/// A first-class stage implementation.
#[async_trait]
pub trait StageProcessor: Send + Sync {
    async fn run(&self, ctx: StageContext<'_>) -> anyhow::Result<StageOutcome>;
}

/// Run `f` over the context's items, honouring the stage's parallel flag
/// and checking the cancellation signal between per-item units. Items not
/// dispatched because of cancellation yield no outcome.
async fn for_each_item<'a, F, Fut>(ctx: &'a StageContext<'_>, f: F) -> Vec<ItemOutcome>
where
    F: Fn(&'a ProductItem) -> Fut,
    Fut: std::future::Future<Output = ItemOutcome> + 'a,
{
    let observer = ctx.observer.clone();
    let run_one = |item: &'a ProductItem| {
        let observer = observer.clone();
        let fut = f(item);
        async move {
            if ctx.cancel.is_cancelled() {
                return None;
            }
            if let Some(observer) = &observer {
                observer.as_ref()(crate::registration::ItemDispatchEvent::Started {
                    item_id: &item.id,
                });
            }
            let outcome = fut.await;
            if let Some(observer) = &observer {
                observer.as_ref()(crate::registration::ItemDispatchEvent::Finished {
                    item_id: &outcome.item_id,
                    success: outcome.success,
                });
            }
            Some(outcome)
        }
    };

    if ctx.stage.parallel {
        let futures: Vec<_> = ctx.items.iter().map(run_one).collect();
        futures::stream::iter(futures)
            .buffer_unordered(ctx.max_concurrency.max(1))
            .filter_map(|o| async { o })
            .collect()
            .await
    } else {
        let mut outcomes = Vec::new();
        for item in ctx.items {
            if let Some(outcome) = run_one(item).await {
                outcomes.push(outcome);
            }
        }
        outcomes
    }
}

fn stage_results(outcomes: &[ItemOutcome]) -> Value {
    let succeeded = outcomes.iter().filter(|o| o.success).count();
    json!({
        "items_processed": outcomes.len(),
        "items_succeeded": succeeded,
        "items_failed": outcomes.len() - succeeded,
    })
}

// ── Built-in processors ───────────────────────────────────────────────

/// Validates raw item data before anything expensive runs.
pub struct PreparationProcessor;

#[async_trait]
impl StageProcessor for PreparationProcessor {
    async fn run(&self, ctx: StageContext<'_>) -> anyhow::Result<StageOutcome> {
        let validate = ctx.config["validate_items"].as_bool().unwrap_or(true);
        let check_inventory = ctx.config["check_inventory"].as_bool().unwrap_or(false);

        let item_outcomes = for_each_item(&ctx, |item| async move {
            if validate {
                if item.name.trim().is_empty() {
                    return ItemOutcome::failure(&item.id, "item has no name");
                }
                if !item.price.is_finite() || item.price <= 0.0 {
                    return ItemOutcome::failure(&item.id, "item has no positive price");
                }
            }
            if check_inventory && item.stock_quantity == 0 {
                return ItemOutcome::failure(&item.id, "item is out of stock");
            }
            ItemOutcome::success(
                &item.id,
                json!({"validated": validate, "inventory_checked": check_inventory}),
            )
        })
        .await;

        let results = stage_results(&item_outcomes);
        Ok(StageOutcome {
            item_outcomes,
            results,
        })
    }
}

/// Scores items through the sourcing analyzer; items below the threshold
/// fail the stage.
pub struct SourcingProcessor {
    analyzer: Arc<dyn SourcingAnalyzer>,
}

impl SourcingProcessor {
    pub fn new(analyzer: Arc<dyn SourcingAnalyzer>) -> Self {
        Self { analyzer }
    }
}

#[async_trait]
impl StageProcessor for SourcingProcessor {
    async fn run(&self, ctx: StageContext<'_>) -> anyhow::Result<StageOutcome> {
        let threshold = ctx.config["score_threshold"].as_f64().unwrap_or(7.0);
        let detailed = ctx.config["detailed_analysis"].as_bool().unwrap_or(false);
        let analyzer = &self.analyzer;

        let item_outcomes = for_each_item(&ctx, |item| async move {
            match analyzer.analyze(item).await {
                Ok(assessment) => {
                    let mut artifacts = json!({
                        "score": assessment.score,
                        "reasons": assessment.reasons,
                    });
                    // Market data is bulky; only detailed analysis keeps it.
                    if detailed {
                        artifacts["market_data"] = assessment.market_data;
                    }
                    if assessment.score >= threshold {
                        ItemOutcome::success(&item.id, artifacts)
                    } else {
                        let mut outcome = ItemOutcome::failure(
                            &item.id,
                            format!(
                                "sourcing score {:.1} below threshold {:.1}",
                                assessment.score, threshold
                            ),
                        );
                        outcome.artifacts = artifacts;
                        outcome
                    }
                }
                Err(e) => ItemOutcome::failure(&item.id, e.to_string()),
            }
        })
        .await;

        let results = stage_results(&item_outcomes);
        Ok(StageOutcome {
            item_outcomes,
            results,
        })
    }
}

/// Runs names/images/content through the content processor.
pub struct ProcessingProcessor {
    content: Arc<dyn ContentProcessor>,
}

impl ProcessingProcessor {
    pub fn new(content: Arc<dyn ContentProcessor>) -> Self {
        Self { content }
    }
}

#[async_trait]
impl StageProcessor for ProcessingProcessor {
    async fn run(&self, ctx: StageContext<'_>) -> anyhow::Result<StageOutcome> {
        let content = &self.content;
        let config = ctx.config.clone();

        let item_outcomes = for_each_item(&ctx, |item| {
            let config = config.clone();
            async move {
                match content.process(item, &config).await {
                    Ok(outcome) => ItemOutcome::success(
                        &item.id,
                        json!({
                            "changes": outcome.changes,
                            "quality_score": outcome.quality_score,
                        }),
                    ),
                    Err(e) => ItemOutcome::failure(&item.id, e.to_string()),
                }
            }
        })
        .await;

        let results = stage_results(&item_outcomes);
        Ok(StageOutcome {
            item_outcomes,
            results,
        })
    }
}

/// Config-driven checks: payload validity by default, registration
/// completeness when `check_all_platforms` is set, processing quality when
/// a `score_threshold` is present.
pub struct ValidationProcessor;

#[async_trait]
impl StageProcessor for ValidationProcessor {
    async fn run(&self, ctx: StageContext<'_>) -> anyhow::Result<StageOutcome> {
        let check_platforms = ctx.config["check_all_platforms"].as_bool().unwrap_or(false);
        let quality_threshold = ctx.config["score_threshold"].as_f64();
        let item_results = ctx.item_results;

        let item_outcomes = for_each_item(&ctx, |item| async move {
            let record = item_results.iter().find(|r| r.item_id == item.id);

            if check_platforms {
                return match record {
                    Some(r) if r.registration_status == StepStatus::Completed => {
                        ItemOutcome::success(&item.id, r.registration_artifacts.clone().unwrap_or(Value::Null))
                    }
                    Some(r) => ItemOutcome::failure(
                        &item.id,
                        format!(
                            "registration incomplete: {}",
                            r.registration_status.as_str()
                        ),
                    ),
                    None => ItemOutcome::failure(&item.id, "no registration record"),
                };
            }

            if let Some(threshold) = quality_threshold {
                let score = record
                    .and_then(|r| r.processing_artifacts.as_ref())
                    .and_then(|a| a["quality_score"].as_f64())
                    .unwrap_or(0.0);
                return if score >= threshold {
                    ItemOutcome::success(&item.id, json!({"quality_score": score}))
                } else {
                    ItemOutcome::failure(
                        &item.id,
                        format!("quality score {score:.1} below threshold {threshold:.1}"),
                    )
                };
            }

            match base_payload(item) {
                Ok(_) => ItemOutcome::success(&item.id, json!({"payload_valid": true})),
                Err(e) => ItemOutcome::failure(&item.id, e.to_string()),
            }
        })
        .await;

        let results = stage_results(&item_outcomes);
        Ok(StageOutcome {
            item_outcomes,
            results,
        })
    }
}

/// Delegates per-item platform fan-out to the registration engine. The
/// engine writes the item rows itself; the runner only aggregates the
/// outcomes returned here.
pub struct RegistrationProcessor {
    engine: Arc<RegistrationEngine>,
}

impl RegistrationProcessor {
    pub fn new(engine: Arc<RegistrationEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl StageProcessor for RegistrationProcessor {
    async fn run(&self, ctx: StageContext<'_>) -> anyhow::Result<StageOutcome> {
        let platforms: Vec<String> = match ctx.config["platforms"].as_array() {
            Some(values) => values
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            None => self.engine.platforms(),
        };

        let outcomes = self
            .engine
            .register_execution_items(
                ctx.item_results.to_vec(),
                &platforms,
                &ctx.config,
                ctx.cancel,
                ctx.observer.clone(),
            )
            .await?;

        let item_outcomes: Vec<ItemOutcome> = outcomes
            .iter()
            .filter(|o| o.dispatched)
            .map(|o| ItemOutcome {
                item_id: o.item_id.clone(),
                success: o.succeeded(),
                error: o.error.clone(),
                artifacts: json!({
                    "platforms": platforms,
                    "results": o.platform_results,
                }),
            })
            .collect();

        let results = stage_results(&item_outcomes);
        Ok(StageOutcome {
            item_outcomes,
            results,
        })
    }
}

/// Post-registration checks against the recorded platform outcomes.
pub struct MonitoringProcessor;

#[async_trait]
impl StageProcessor for MonitoringProcessor {
    async fn run(&self, ctx: StageContext<'_>) -> anyhow::Result<StageOutcome> {
        let check_status = ctx.config["check_status"].as_bool().unwrap_or(true);
        let item_results = ctx.item_results;
        let item_outcomes = for_each_item(&ctx, |item| async move {
            let record = item_results.iter().find(|r| r.item_id == item.id);
            let checks = record
                .and_then(|r| r.registration_artifacts.clone())
                .unwrap_or(Value::Null);
            if !check_status {
                return ItemOutcome::success(
                    &item.id,
                    json!({"status_checks": Value::Null, "issues": []}),
                );
            }
            let registered = record
                .map(|r| r.registration_status == StepStatus::Completed)
                .unwrap_or(false);
            if registered {
                ItemOutcome::success(&item.id, json!({"status_checks": checks, "issues": []}))
            } else {
                ItemOutcome::failure(&item.id, "listing not live on any platform")
            }
        })
        .await;

        let results = stage_results(&item_outcomes);
        Ok(StageOutcome {
            item_outcomes,
            results,
        })
    }
}

/// Aggregates run statistics; per-item work is trivially successful.
pub struct AnalysisProcessor;

#[async_trait]
impl StageProcessor for AnalysisProcessor {
    async fn run(&self, ctx: StageContext<'_>) -> anyhow::Result<StageOutcome> {
        let item_outcomes = for_each_item(&ctx, |item| async move {
            ItemOutcome::success(&item.id, json!({"analyzed": true}))
        })
        .await;

        let succeeded = ctx
            .item_results
            .iter()
            .filter(|r| r.final_status == crate::model::RegistrationState::Completed)
            .count();
        let results = json!({
            "analyzed_items": item_outcomes.len(),
            "items_fully_completed": succeeded,
        });
        Ok(StageOutcome {
            item_outcomes,
            results,
        })
    }
}
