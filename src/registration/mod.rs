//! Batched multi-platform registration engine.
//!
//! For every (item, platform) pair the engine produces either a success
//! carrying the platform-assigned product id, or a durably recorded
//! failure, subject to the retry policy. Items fan out through a bounded
//! worker pool; inside one item, its platform calls run together and the
//! item's overall status is rolled up when they settle. Failures in one
//! item never halt the others.

mod accounts;
mod retry;
mod transform;

pub use accounts::AccountPool;
pub use retry::{RetryPolicy, record_error};
pub use transform::{base_payload, extract_product_id, shape_for_platform};

use chrono::Utc;
use futures::StreamExt;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::errors::RegistrationError;
use crate::model::{
    BatchPriority, ItemResult, PlatformAccount, PlatformRegistration, ProductItem,
    RegistrationBatch, RegistrationState, StepStatus, rollup_item_status,
};
use crate::platform::{
    PlatformAdapter, PlatformError, RegistrationRequest, create_product_with_timeout,
    idempotency_key,
};
use crate::store::SqliteStore;

/// Progress notification for one item dispatch.
#[derive(Debug, Clone, Copy)]
pub enum ItemDispatchEvent<'a> {
    Started { item_id: &'a str },
    Finished { item_id: &'a str, success: bool },
}

/// Callback invoked before and after each item dispatch.
pub type DispatchObserver = Arc<dyn Fn(ItemDispatchEvent<'_>) + Send + Sync>;

/// Settled outcome of one item's platform fan-out.
#[derive(Debug, Clone)]
pub struct ItemDispatchOutcome {
    pub item_result_id: String,
    pub item_id: String,
    pub final_status: RegistrationState,
    pub platform_results: Value,
    pub error: Option<String>,
    /// False when the dispatch was skipped (cancellation before start).
    pub dispatched: bool,
}

impl ItemDispatchOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(
            self.final_status,
            RegistrationState::Completed | RegistrationState::PartiallyCompleted
        )
    }
}

/// Per-platform counters for summaries and batch snapshots.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PlatformSummary {
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    pub running: u32,
    pub pending: u32,
    pub last_error: Option<String>,
}

/// Result of processing (or retrying) a batch.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RegistrationSummary {
    pub batch_id: String,
    pub success: bool,
    pub total_registered: u32,
    pub total_failed: u32,
    pub platform_results: HashMap<String, PlatformSummary>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub processing_time_secs: f64,
}

/// Detailed batch snapshot for status queries.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchSnapshot {
    pub batch: RegistrationBatch,
    pub platform_summary: HashMap<String, PlatformSummary>,
}

/// The registration engine. Shares the durable store with the orchestrator
/// and owns the adapter registry.
pub struct RegistrationEngine {
    store: Arc<SqliteStore>,
    accounts: AccountPool,
    adapters: HashMap<String, Arc<dyn PlatformAdapter>>,
    config: PipelineConfig,
}

impl RegistrationEngine {
    pub fn new(store: Arc<SqliteStore>, config: PipelineConfig) -> Self {
        Self {
            accounts: AccountPool::new(store.clone()),
            store,
            adapters: HashMap::new(),
            config,
        }
    }

    /// Register a platform adapter under its platform tag.
    pub fn with_adapter(mut self, adapter: Arc<dyn PlatformAdapter>) -> Self {
        self.adapters.insert(adapter.platform().to_string(), adapter);
        self
    }

    pub fn platforms(&self) -> Vec<String> {
        let mut platforms: Vec<String> = self.adapters.keys().cloned().collect();
        platforms.sort();
        platforms
    }

    // ── Batch lifecycle ───────────────────────────────────────────────

    /// Create a batch with one item result per product. Items are validated
    /// up front; an invalid item rejects the whole batch before anything is
    /// persisted.
    #[allow(clippy::too_many_arguments)]
    pub fn create_batch(
        &self,
        user_id: &str,
        name: &str,
        items: Vec<ProductItem>,
        target_platforms: Vec<String>,
        priority: BatchPriority,
        settings: Value,
        scheduled_at: Option<chrono::DateTime<Utc>>,
    ) -> Result<RegistrationBatch, RegistrationError> {
        for item in &items {
            base_payload(item)?;
        }

        let now = Utc::now();
        let batch = RegistrationBatch {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            target_platforms,
            priority,
            status: RegistrationState::Pending,
            total_items: items.len() as u32,
            completed_items: 0,
            failed_items: 0,
            progress_percentage: 0.0,
            settings,
            last_error: None,
            created_at: now,
            scheduled_at: scheduled_at.unwrap_or(now),
            started_at: None,
            completed_at: None,
        };
        self.store.insert_batch(&batch)?;

        for item in items {
            let record = ItemResult {
                id: Uuid::new_v4().to_string(),
                execution_id: None,
                batch_id: Some(batch.id.clone()),
                item_id: item.id.clone(),
                item_code: item.code.clone(),
                item: Some(item),
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
            };
            self.store.insert_item_result(&record)?;
        }

        tracing::info!(
            batch_id = %batch.id,
            items = batch.total_items,
            platforms = ?batch.target_platforms,
            "created registration batch"
        );
        Ok(batch)
    }

    /// Process a batch to settlement. Refuses terminal batches unless
    /// `force` is set.
    pub async fn process_batch(
        &self,
        batch_id: &str,
        force: bool,
    ) -> Result<RegistrationSummary, RegistrationError> {
        let started = Instant::now();
        let mut batch = self.load_batch(batch_id)?;

        if batch.status.is_terminal() && !force {
            return Err(RegistrationError::BatchTerminal {
                batch_id: batch_id.to_string(),
                status: batch.status.as_str().to_string(),
            });
        }

        let policy = RetryPolicy::from_config(&self.config).with_overrides(&batch.settings);
        let concurrency = self.concurrency_from(&batch.settings);
        let accounts = self.accounts.select(&batch.target_platforms)?;

        batch.status = RegistrationState::Running;
        batch.started_at = Some(Utc::now());
        self.store.update_batch(&batch)?;

        let items: Vec<ItemResult> = self
            .store
            .item_results_for_batch(batch_id)?
            .into_iter()
            .filter(|item| item.final_status != RegistrationState::Completed)
            .collect();

        let cancel = CancellationToken::new();
        self.dispatch_items(items, &accounts, &policy, concurrency, &cancel, None)
            .await;

        let batch = self.refresh_batch_status(batch_id)?;
        let mut summary = self.build_summary(&batch, started)?;
        if force {
            summary
                .warnings
                .push("batch reprocessed with force".to_string());
        }

        tracing::info!(
            batch_id,
            registered = summary.total_registered,
            failed = summary.total_failed,
            status = batch.status.as_str(),
            "processed registration batch"
        );
        Ok(summary)
    }

    /// Register one product across platforms through an ephemeral batch.
    pub async fn register_single(
        &self,
        user_id: &str,
        item: ProductItem,
        target_platforms: Vec<String>,
        priority: BatchPriority,
    ) -> Result<RegistrationSummary, RegistrationError> {
        let name = format!("Single product: {}", item.name);
        let batch = self.create_batch(
            user_id,
            &name,
            vec![item],
            target_platforms,
            priority,
            json!({}),
            None,
        )?;
        self.process_batch(&batch.id, false).await
    }

    /// Retry failed registrations in a batch, optionally filtered by
    /// platform. Only registrations under the attempt cap with a
    /// non-permanent recorded error are retried.
    pub async fn retry_failed(
        &self,
        batch_id: &str,
        platform_filter: Option<Vec<String>>,
    ) -> Result<RegistrationSummary, RegistrationError> {
        let started = Instant::now();
        let batch = self.load_batch(batch_id)?;
        let policy = RetryPolicy::from_config(&self.config).with_overrides(&batch.settings);
        let concurrency = self.concurrency_from(&batch.settings);

        let retryable: Vec<PlatformRegistration> = self
            .store
            .registrations_for_batch(batch_id)?
            .into_iter()
            .filter(|reg| reg.status == RegistrationState::Failed)
            .filter(|reg| {
                policy.allows_retry_of_recorded(reg.attempt_count, reg.last_error.as_deref())
            })
            .filter(|reg| match &platform_filter {
                Some(platforms) => platforms.contains(&reg.platform),
                None => true,
            })
            .collect();

        if retryable.is_empty() {
            let batch = self.load_batch(batch_id)?;
            let mut summary = self.build_summary(&batch, started)?;
            summary
                .warnings
                .push("no failed registrations eligible for retry".to_string());
            return Ok(summary);
        }

        let item_ids: std::collections::HashSet<String> = retryable
            .iter()
            .map(|reg| reg.item_result_id.clone())
            .collect();
        let items: Vec<ItemResult> = self
            .store
            .item_results_for_batch(batch_id)?
            .into_iter()
            .filter(|item| item_ids.contains(&item.id))
            .collect();

        let accounts = self.accounts.select(&batch.target_platforms)?;
        let cancel = CancellationToken::new();
        self.dispatch_items(items, &accounts, &policy, concurrency, &cancel, None)
            .await;

        let batch = self.refresh_batch_status(batch_id)?;
        self.build_summary(&batch, started)
    }

    /// Detailed batch snapshot with per-platform counters.
    pub fn batch_status(&self, batch_id: &str) -> Result<BatchSnapshot, RegistrationError> {
        let batch = self.load_batch(batch_id)?;
        let platform_summary = self.platform_summary(batch_id)?;
        Ok(BatchSnapshot {
            batch,
            platform_summary,
        })
    }

    /// Cancel a pending or running batch. Returns false if the batch is
    /// already terminal.
    pub fn cancel_batch(&self, batch_id: &str) -> Result<bool, RegistrationError> {
        let mut batch = self.load_batch(batch_id)?;
        if batch.status.is_terminal() {
            return Ok(false);
        }
        batch.status = RegistrationState::Cancelled;
        batch.completed_at = Some(Utc::now());
        self.store.update_batch(&batch)?;
        tracing::info!(batch_id, "cancelled registration batch");
        Ok(true)
    }

    // ── Execution-stage entry point ───────────────────────────────────

    /// Fan execution-owned item results out across platforms. Used by the
    /// registration stage processor; honours the execution's cancellation
    /// token between per-item units and reports per-item dispatch events.
    pub async fn register_execution_items(
        &self,
        item_results: Vec<ItemResult>,
        target_platforms: &[String],
        settings: &Value,
        cancel: &CancellationToken,
        observer: Option<DispatchObserver>,
    ) -> Result<Vec<ItemDispatchOutcome>, RegistrationError> {
        let policy = RetryPolicy::from_config(&self.config).with_overrides(settings);
        let concurrency = self.concurrency_from(settings);
        let accounts = self.accounts.select(target_platforms)?;
        Ok(self
            .dispatch_items(item_results, &accounts, &policy, concurrency, cancel, observer)
            .await)
    }

    // ── Fan-out internals ─────────────────────────────────────────────

    async fn dispatch_items(
        &self,
        items: Vec<ItemResult>,
        accounts: &HashMap<String, PlatformAccount>,
        policy: &RetryPolicy,
        concurrency: usize,
        cancel: &CancellationToken,
        observer: Option<DispatchObserver>,
    ) -> Vec<ItemDispatchOutcome> {
        let unit_futures: Vec<_> = items
            .into_iter()
            .map(|item| self.process_item(item, accounts, policy, cancel, observer.clone()))
            .collect();

        futures::stream::iter(unit_futures)
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }

    /// Drive one item across its target platforms and roll the outcome up
    /// into the item result row. Store failures are absorbed into a failed
    /// outcome so sibling items keep going.
    async fn process_item(
        &self,
        item_result: ItemResult,
        accounts: &HashMap<String, PlatformAccount>,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        observer: Option<DispatchObserver>,
    ) -> ItemDispatchOutcome {
        // Cooperative cancellation point: nothing new starts once the
        // signal is set, but items already dispatched run to completion.
        if cancel.is_cancelled() {
            return ItemDispatchOutcome {
                item_result_id: item_result.id,
                item_id: item_result.item_id,
                final_status: RegistrationState::Pending,
                platform_results: json!({}),
                error: None,
                dispatched: false,
            };
        }

        if let Some(observer) = &observer {
            observer.as_ref()(ItemDispatchEvent::Started {
                item_id: &item_result.item_id,
            });
        }

        let outcome = match self
            .process_item_inner(item_result.clone(), accounts, policy, cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(item_id = %item_result.item_id, error = %e, "item dispatch failed");
                ItemDispatchOutcome {
                    item_result_id: item_result.id,
                    item_id: item_result.item_id,
                    final_status: RegistrationState::Failed,
                    platform_results: json!({}),
                    error: Some(e.to_string()),
                    dispatched: true,
                }
            }
        };

        if let Some(observer) = &observer {
            observer.as_ref()(ItemDispatchEvent::Finished {
                item_id: &outcome.item_id,
                success: outcome.succeeded(),
            });
        }
        outcome
    }

    async fn process_item_inner(
        &self,
        mut item_result: ItemResult,
        accounts: &HashMap<String, PlatformAccount>,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<ItemDispatchOutcome, RegistrationError> {
        let item = match item_result.item.clone() {
            Some(item) => item,
            None => {
                item_result.final_status = RegistrationState::Failed;
                item_result.registration_status = StepStatus::Failed;
                item_result.last_error = Some("item snapshot missing".to_string());
                self.store.update_item_result(&item_result)?;
                return Ok(ItemDispatchOutcome {
                    item_result_id: item_result.id,
                    item_id: item_result.item_id,
                    final_status: RegistrationState::Failed,
                    platform_results: json!({}),
                    error: item_result.last_error,
                    dispatched: true,
                });
            }
        };

        let existing = self.store.registrations_for_item(&item_result.id)?;
        let mut units = Vec::new();
        for (platform, account) in accounts {
            let registration = match existing.iter().find(|r| &r.platform == platform) {
                Some(reg) => {
                    if reg.status == RegistrationState::Completed {
                        continue;
                    }
                    if reg.status == RegistrationState::Failed
                        && !policy
                            .allows_retry_of_recorded(reg.attempt_count, reg.last_error.as_deref())
                    {
                        continue;
                    }
                    reg.clone()
                }
                None => {
                    let reg = PlatformRegistration {
                        id: Uuid::new_v4().to_string(),
                        item_result_id: item_result.id.clone(),
                        platform: platform.clone(),
                        account_id: Some(account.id.clone()),
                        status: RegistrationState::Pending,
                        payload: None,
                        response: None,
                        platform_product_id: None,
                        attempt_count: 0,
                        api_call_count: 0,
                        last_error: None,
                        scheduled_at: Some(Utc::now()),
                        next_retry_at: None,
                        started_at: None,
                        completed_at: None,
                    };
                    self.store.insert_platform_registration(&reg)?;
                    reg
                }
            };
            units.push((registration, account.clone()));
        }

        item_result.registration_status = StepStatus::Running;
        self.store.update_item_result(&item_result)?;

        let unit_futures: Vec<_> = units
            .into_iter()
            .map(|(reg, account)| self.run_unit(reg, &item, account, policy, cancel))
            .collect();
        futures::future::join_all(unit_futures).await;

        // Authoritative rollup from persisted statuses.
        let registrations = self.store.registrations_for_item(&item_result.id)?;
        let statuses: Vec<RegistrationState> =
            registrations.iter().map(|r| r.status).collect();
        let rollup = rollup_item_status(&statuses);

        let mut platform_results = serde_json::Map::new();
        let mut first_error = None;
        for reg in &registrations {
            if first_error.is_none() && reg.status == RegistrationState::Failed {
                first_error = reg
                    .last_error
                    .clone()
                    .map(|e| format!("{}: {}", reg.platform, e));
            }
            platform_results.insert(
                reg.platform.clone(),
                json!({
                    "status": reg.status.as_str(),
                    "platform_product_id": reg.platform_product_id,
                    "attempt_count": reg.attempt_count,
                    "error": reg.last_error,
                }),
            );
        }
        let platform_results = Value::Object(platform_results);

        // Batch items live and die by the platform rollup. Execution items
        // keep earlier stage failures sticky: a later registration success
        // does not resurrect an item a previous stage failed.
        if item_result.batch_id.is_some() || item_result.final_status != RegistrationState::Failed
        {
            item_result.final_status = rollup;
        }
        item_result.registration_status = match rollup {
            RegistrationState::Completed | RegistrationState::PartiallyCompleted => {
                StepStatus::Completed
            }
            RegistrationState::Failed | RegistrationState::Cancelled => StepStatus::Failed,
            RegistrationState::Running => StepStatus::Running,
            RegistrationState::Pending => StepStatus::Pending,
        };
        if item_result.registration_status.is_terminal() {
            item_result.registration_completed_at = Some(Utc::now());
        }
        item_result.registration_artifacts = Some(platform_results.clone());
        item_result.last_error = first_error.clone();
        self.store.update_item_result(&item_result)?;

        Ok(ItemDispatchOutcome {
            item_result_id: item_result.id,
            item_id: item_result.item_id,
            final_status: rollup,
            platform_results,
            error: first_error,
            dispatched: true,
        })
    }

    /// Drive a single (item, platform) unit to settlement: transform, call
    /// with timeout, classify, and retry under the backoff schedule.
    async fn run_unit(
        &self,
        mut registration: PlatformRegistration,
        item: &ProductItem,
        account: PlatformAccount,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) {
        let adapter = match self.adapters.get(&registration.platform) {
            Some(adapter) => adapter.clone(),
            None => {
                registration.status = RegistrationState::Failed;
                registration.last_error = Some(format!(
                    "validation: no adapter registered for platform '{}'",
                    registration.platform
                ));
                self.persist_registration(&registration);
                return;
            }
        };

        let payload = match base_payload(item) {
            Ok(base) => shape_for_platform(&registration.platform, &base),
            Err(e) => {
                registration.status = RegistrationState::Failed;
                registration.last_error = Some(format!("validation: {e}"));
                self.persist_registration(&registration);
                return;
            }
        };

        registration.account_id = Some(account.id.clone());
        registration.payload = Some(payload.clone());
        registration.status = RegistrationState::Running;
        registration.started_at = Some(Utc::now());
        self.persist_registration(&registration);

        loop {
            let attempt = registration.attempt_count + 1;
            let request = RegistrationRequest {
                platform: registration.platform.clone(),
                payload: payload.clone(),
                idempotency_key: idempotency_key(&item.id, &registration.platform, attempt),
            };

            let call = create_product_with_timeout(
                adapter.as_ref(),
                &request,
                self.config.platform_call_timeout(),
            )
            .await;
            registration.api_call_count += 1;
            registration.attempt_count = attempt;

            let outcome = match call {
                Ok(response) => match extract_product_id(&registration.platform, &response) {
                    Some(id) => Ok((response, id)),
                    None => {
                        registration.response = Some(response);
                        Err(PlatformError::MissingProductId)
                    }
                },
                Err(e) => Err(e),
            };

            match outcome {
                Ok((response, product_id)) => {
                    self.record_usage(&account.id, true);
                    registration.response = Some(response);
                    registration.platform_product_id = Some(product_id);
                    registration.status = RegistrationState::Completed;
                    registration.completed_at = Some(Utc::now());
                    registration.next_retry_at = None;
                    self.persist_registration(&registration);
                    return;
                }
                Err(error) => {
                    self.record_usage(&account.id, false);
                    registration.last_error = Some(record_error(&error));

                    if policy.allows_retry(attempt, &error) && !cancel.is_cancelled() {
                        let delay = policy.delay_after(attempt);
                        registration.next_retry_at =
                            Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default());
                        self.persist_registration(&registration);
                        tracing::warn!(
                            platform = %registration.platform,
                            item_id = %item.id,
                            attempt,
                            error = %error,
                            "registration attempt failed, retrying"
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                registration.status = RegistrationState::Failed;
                                registration.next_retry_at = None;
                                self.persist_registration(&registration);
                                return;
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                        continue;
                    }

                    registration.status = RegistrationState::Failed;
                    registration.next_retry_at = None;
                    self.persist_registration(&registration);
                    if error.is_permanent() {
                        let _ = self.store.create_alert(crate::alerts::NewAlert {
                            execution_id: None,
                            kind: crate::alerts::AlertKind::Error,
                            severity: crate::alerts::AlertSeverity::High,
                            title: format!(
                                "Registration on '{}' failed permanently",
                                registration.platform
                            ),
                            message: error.to_string(),
                            component: Some("registration_engine".to_string()),
                            step_name: None,
                            payload: Some(json!({
                                "item_id": item.id,
                                "platform": registration.platform,
                                "error_kind": error.kind(),
                            })),
                        });
                    }
                    tracing::error!(
                        platform = %registration.platform,
                        item_id = %item.id,
                        attempts = registration.attempt_count,
                        error = %error,
                        "registration failed"
                    );
                    return;
                }
            }
        }
    }

    /// Store failures inside a work unit must not bring the unit down; the
    /// outcome is already reflected in the in-memory record and the rollup
    /// re-reads whatever did persist.
    fn persist_registration(&self, registration: &PlatformRegistration) {
        if let Err(e) = self.store.update_platform_registration(registration) {
            tracing::error!(registration_id = %registration.id, error = %e, "failed to persist registration");
        }
    }

    fn record_usage(&self, account_id: &str, success: bool) {
        if let Err(e) = self.accounts.record_usage(account_id, success) {
            tracing::error!(account_id, error = %e, "failed to record account usage");
        }
    }

    // ── Rollups and summaries ─────────────────────────────────────────

    fn load_batch(&self, batch_id: &str) -> Result<RegistrationBatch, RegistrationError> {
        self.store.get_batch(batch_id).map_err(|e| match e {
            crate::errors::StoreError::NotFound { .. } => RegistrationError::BatchNotFound {
                batch_id: batch_id.to_string(),
            },
            other => RegistrationError::Store(other),
        })
    }

    /// Recompute batch counters and status from its items.
    fn refresh_batch_status(
        &self,
        batch_id: &str,
    ) -> Result<RegistrationBatch, RegistrationError> {
        let mut batch = self.load_batch(batch_id)?;
        let items = self.store.item_results_for_batch(batch_id)?;

        let total = items.len() as u32;
        let fully = items
            .iter()
            .filter(|i| i.final_status == RegistrationState::Completed)
            .count() as u32;
        let partial = items
            .iter()
            .filter(|i| i.final_status == RegistrationState::PartiallyCompleted)
            .count() as u32;
        let failed = items
            .iter()
            .filter(|i| i.final_status == RegistrationState::Failed)
            .count() as u32;

        batch.total_items = total;
        batch.completed_items = fully + partial;
        batch.failed_items = failed;
        batch.calculate_progress();

        batch.status = if total == 0 || fully == total {
            RegistrationState::Completed
        } else if failed == total {
            RegistrationState::Failed
        } else if fully + partial > 0 {
            RegistrationState::PartiallyCompleted
        } else {
            RegistrationState::Pending
        };

        if batch.status.is_terminal() {
            batch.completed_at = Some(Utc::now());
            batch.last_error = items.iter().find_map(|i| i.last_error.clone());
        }
        self.store.update_batch(&batch)?;
        Ok(batch)
    }

    fn platform_summary(
        &self,
        batch_id: &str,
    ) -> Result<HashMap<String, PlatformSummary>, RegistrationError> {
        let mut summary: HashMap<String, PlatformSummary> = HashMap::new();
        for reg in self.store.registrations_for_batch(batch_id)? {
            let entry = summary.entry(reg.platform.clone()).or_default();
            entry.total += 1;
            match reg.status {
                RegistrationState::Completed => entry.completed += 1,
                RegistrationState::Failed | RegistrationState::Cancelled => {
                    entry.failed += 1;
                    if let Some(error) = &reg.last_error {
                        entry.last_error = Some(error.clone());
                    }
                }
                RegistrationState::Running => entry.running += 1,
                _ => entry.pending += 1,
            }
        }
        Ok(summary)
    }

    fn build_summary(
        &self,
        batch: &RegistrationBatch,
        started: Instant,
    ) -> Result<RegistrationSummary, RegistrationError> {
        let platform_results = self.platform_summary(&batch.id)?;
        let total_registered: u32 = platform_results.values().map(|p| p.completed).sum();
        let total_failed: u32 = platform_results.values().map(|p| p.failed).sum();
        let errors: Vec<String> = platform_results
            .iter()
            .filter_map(|(platform, p)| {
                p.last_error
                    .as_ref()
                    .map(|e| format!("{platform}: {e}"))
            })
            .collect();

        Ok(RegistrationSummary {
            batch_id: batch.id.clone(),
            success: batch.status == RegistrationState::Completed,
            total_registered,
            total_failed,
            platform_results,
            errors,
            warnings: Vec::new(),
            processing_time_secs: started.elapsed().as_secs_f64(),
        })
    }

    fn concurrency_from(&self, settings: &Value) -> usize {
        settings["max_concurrent_registrations"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or(self.config.max_concurrent_registrations)
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Adapter that answers each call from a scripted queue, falling back
    /// to its last entry.
    struct ScriptedAdapter {
        platform: String,
        script: Mutex<Vec<Result<Value, PlatformError>>>,
        calls: Mutex<Vec<RegistrationRequest>>,
    }

    impl ScriptedAdapter {
        fn new(platform: &str, script: Vec<Result<Value, PlatformError>>) -> Arc<Self> {
            Arc::new(Self {
                platform: platform.to_string(),
                script: Mutex::new(script),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PlatformAdapter for ScriptedAdapter {
        fn platform(&self) -> &str {
            &self.platform
        }

        async fn create_product(
            &self,
            request: &RegistrationRequest,
        ) -> Result<Value, PlatformError> {
            self.calls.lock().unwrap().push(request.clone());
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            }
        }
    }

    fn engine_with(
        adapters: Vec<Arc<ScriptedAdapter>>,
        config: PipelineConfig,
    ) -> RegistrationEngine {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        for adapter in &adapters {
            store
                .upsert_account(&PlatformAccount {
                    id: format!("acct-{}", adapter.platform),
                    platform: adapter.platform.clone(),
                    label: "test".into(),
                    active: true,
                    selected: true,
                    api_calls_total: 0,
                    api_failures: 0,
                    last_used_at: None,
                })
                .unwrap();
        }
        let mut engine = RegistrationEngine::new(store, config);
        for adapter in adapters {
            engine = engine.with_adapter(adapter);
        }
        engine
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig::default().with_retry_backoff_seconds(vec![0, 0, 0, 0])
    }

    #[tokio::test]
    async fn single_item_single_platform_success() {
        let adapter = ScriptedAdapter::new("A", vec![Ok(json!({"productId": "P-1"}))]);
        let engine = engine_with(vec![adapter.clone()], fast_config());

        let batch = engine
            .create_batch(
                "u1",
                "one item",
                vec![ProductItem::new("item-1", "Desk Lamp", 19.99)],
                vec!["A".into()],
                BatchPriority::Medium,
                json!({}),
                None,
            )
            .unwrap();

        let summary = engine.process_batch(&batch.id, false).await.unwrap();
        assert!(summary.success);
        assert_eq!(summary.total_registered, 1);
        assert_eq!(summary.total_failed, 0);
        assert_eq!(adapter.call_count(), 1);

        let snapshot = engine.batch_status(&batch.id).unwrap();
        assert_eq!(snapshot.batch.status, RegistrationState::Completed);
        assert_eq!(snapshot.platform_summary["A"].completed, 1);
    }

    #[tokio::test]
    async fn invalid_item_rejected_before_any_call() {
        let adapter = ScriptedAdapter::new("A", vec![Ok(json!({"productId": "P-1"}))]);
        let engine = engine_with(vec![adapter.clone()], fast_config());

        let mut bad = ProductItem::new("item-1", "", 19.99);
        bad.name = String::new();
        let result = engine.create_batch(
            "u1",
            "bad",
            vec![bad],
            vec!["A".into()],
            BatchPriority::Medium,
            json!({}),
            None,
        );
        assert!(matches!(result, Err(RegistrationError::InvalidItem { .. })));
        assert_eq!(adapter.call_count(), 0);
    }

    #[tokio::test]
    async fn retry_succeeds_on_third_attempt() {
        let adapter = ScriptedAdapter::new(
            "B",
            vec![
                Err(PlatformError::Http { status: 503, message: "unavailable".into() }),
                Err(PlatformError::Http { status: 503, message: "unavailable".into() }),
                Ok(json!({"id": "X"})),
            ],
        );
        let engine = engine_with(vec![adapter.clone()], fast_config());

        let batch = engine
            .create_batch(
                "u1",
                "retry",
                vec![ProductItem::new("item-1", "Desk Lamp", 19.99)],
                vec!["B".into()],
                BatchPriority::Medium,
                json!({}),
                None,
            )
            .unwrap();
        let summary = engine.process_batch(&batch.id, false).await.unwrap();
        assert!(summary.success);
        assert_eq!(adapter.call_count(), 3);

        let regs = engine.store.registrations_for_batch(&batch.id).unwrap();
        assert_eq!(regs.len(), 1);
        assert_eq!(regs[0].status, RegistrationState::Completed);
        assert_eq!(regs[0].attempt_count, 3);
        assert_eq!(regs[0].platform_product_id.as_deref(), Some("X"));
    }

    #[tokio::test]
    async fn partial_platform_failure_rolls_up() {
        let good = ScriptedAdapter::new("A", vec![Ok(json!({"productId": "P-1"}))]);
        let bad = ScriptedAdapter::new(
            "B",
            vec![Err(PlatformError::Http { status: 500, message: "boom".into() })],
        );
        let engine = engine_with(vec![good, bad.clone()], fast_config());

        let batch = engine
            .create_batch(
                "u1",
                "partial",
                vec![
                    ProductItem::new("item-1", "Desk Lamp", 19.99),
                    ProductItem::new("item-2", "Floor Lamp", 49.99),
                ],
                vec!["A".into(), "B".into()],
                BatchPriority::Medium,
                json!({}),
                None,
            )
            .unwrap();
        let summary = engine.process_batch(&batch.id, false).await.unwrap();
        assert!(!summary.success);
        assert_eq!(summary.total_registered, 2);
        assert_eq!(summary.total_failed, 2);

        let snapshot = engine.batch_status(&batch.id).unwrap();
        assert_eq!(snapshot.batch.status, RegistrationState::PartiallyCompleted);

        let items = engine.store.item_results_for_batch(&batch.id).unwrap();
        for item in items {
            assert_eq!(item.final_status, RegistrationState::PartiallyCompleted);
        }

        // Four attempts per failing unit, all recorded.
        let regs = engine.store.registrations_for_batch(&batch.id).unwrap();
        let failed: Vec<_> = regs
            .iter()
            .filter(|r| r.status == RegistrationState::Failed)
            .collect();
        assert_eq!(failed.len(), 2);
        for reg in failed {
            assert_eq!(reg.attempt_count, 4);
        }
    }

    #[tokio::test]
    async fn permanent_error_skips_retries() {
        let adapter = ScriptedAdapter::new(
            "A",
            vec![Err(PlatformError::Validation("bad category".into()))],
        );
        let engine = engine_with(vec![adapter.clone()], fast_config());
        let batch = engine
            .create_batch(
                "u1",
                "permanent",
                vec![ProductItem::new("item-1", "Desk Lamp", 19.99)],
                vec!["A".into()],
                BatchPriority::Medium,
                json!({}),
                None,
            )
            .unwrap();
        engine.process_batch(&batch.id, false).await.unwrap();

        assert_eq!(adapter.call_count(), 1);
        let regs = engine.store.registrations_for_batch(&batch.id).unwrap();
        assert_eq!(regs[0].status, RegistrationState::Failed);
        assert_eq!(regs[0].attempt_count, 1);
    }

    #[tokio::test]
    async fn missing_product_id_is_a_distinct_failure() {
        let adapter = ScriptedAdapter::new("A", vec![Ok(json!({"status": "accepted"}))]);
        let engine = engine_with(vec![adapter], fast_config());
        let batch = engine
            .create_batch(
                "u1",
                "drift",
                vec![ProductItem::new("item-1", "Desk Lamp", 19.99)],
                vec!["A".into()],
                BatchPriority::Medium,
                json!({}),
                None,
            )
            .unwrap();
        engine.process_batch(&batch.id, false).await.unwrap();

        let regs = engine.store.registrations_for_batch(&batch.id).unwrap();
        assert_eq!(regs[0].status, RegistrationState::Failed);
        assert!(regs[0]
            .last_error
            .as_deref()
            .unwrap()
            .starts_with("missing_product_id"));
    }

    #[tokio::test]
    async fn terminal_batch_requires_force() {
        let adapter = ScriptedAdapter::new("A", vec![Ok(json!({"productId": "P-1"}))]);
        let engine = engine_with(vec![adapter], fast_config());
        let batch = engine
            .create_batch(
                "u1",
                "twice",
                vec![ProductItem::new("item-1", "Desk Lamp", 19.99)],
                vec!["A".into()],
                BatchPriority::Medium,
                json!({}),
                None,
            )
            .unwrap();
        engine.process_batch(&batch.id, false).await.unwrap();

        let again = engine.process_batch(&batch.id, false).await;
        assert!(matches!(again, Err(RegistrationError::BatchTerminal { .. })));

        let forced = engine.process_batch(&batch.id, true).await.unwrap();
        assert!(forced.success);
        assert!(!forced.warnings.is_empty());
    }

    #[tokio::test]
    async fn retry_failed_reprocesses_only_eligible_units() {
        // Cap at 2 attempts in-line, then one more via retry_failed.
        let config = fast_config().with_max_retry_attempts(2);
        let adapter = ScriptedAdapter::new(
            "B",
            vec![
                Err(PlatformError::Http { status: 503, message: "unavailable".into() }),
                Err(PlatformError::Http { status: 503, message: "unavailable".into() }),
                Ok(json!({"id": "X"})),
            ],
        );
        let engine = engine_with(vec![adapter.clone()], config);
        let batch = engine
            .create_batch(
                "u1",
                "later",
                vec![ProductItem::new("item-1", "Desk Lamp", 19.99)],
                vec!["B".into()],
                BatchPriority::Medium,
                // Batch override raises the cap so the stored failure stays
                // eligible when retried.
                json!({"max_retry_attempts": 3}),
                None,
            )
            .unwrap();

        // Batch settings say 3 attempts; the script fails twice then succeeds.
        let summary = engine.process_batch(&batch.id, false).await.unwrap();
        assert!(summary.success);
        assert_eq!(adapter.call_count(), 3);

        let noop = engine.retry_failed(&batch.id, None).await.unwrap();
        assert!(!noop.warnings.is_empty());
    }

    #[tokio::test]
    async fn cancel_batch_is_terminal_and_idempotent() {
        let adapter = ScriptedAdapter::new("A", vec![Ok(json!({"productId": "P-1"}))]);
        let engine = engine_with(vec![adapter], fast_config());
        let batch = engine
            .create_batch(
                "u1",
                "cancel me",
                vec![ProductItem::new("item-1", "Desk Lamp", 19.99)],
                vec!["A".into()],
                BatchPriority::Medium,
                json!({}),
                None,
            )
            .unwrap();

        assert!(engine.cancel_batch(&batch.id).unwrap());
        assert!(!engine.cancel_batch(&batch.id).unwrap());
        let snapshot = engine.batch_status(&batch.id).unwrap();
        assert_eq!(snapshot.batch.status, RegistrationState::Cancelled);
    }

    #[tokio::test]
    async fn register_single_creates_ephemeral_batch() {
        let adapter = ScriptedAdapter::new("A", vec![Ok(json!({"productId": "P-9"}))]);
        let engine = engine_with(vec![adapter], fast_config());
        let summary = engine
            .register_single(
                "u1",
                ProductItem::new("item-9", "Desk Lamp", 19.99),
                vec!["A".into()],
                BatchPriority::High,
            )
            .await
            .unwrap();
        assert!(summary.success);
        assert_eq!(summary.total_registered, 1);

        let batch = engine.store.get_batch(&summary.batch_id).unwrap();
        assert_eq!(batch.priority, BatchPriority::High);
        assert!(batch.name.contains("Desk Lamp"));
    }

    #[tokio::test]
    async fn worker_pool_size_does_not_change_outcomes() {
        for pool_size in [1u64, 8] {
            let good = ScriptedAdapter::new("A", vec![Ok(json!({"productId": "P"}))]);
            let bad = ScriptedAdapter::new(
                "B",
                vec![Err(PlatformError::Validation("nope".into()))],
            );
            let engine = engine_with(vec![good, bad], fast_config());
            let items: Vec<ProductItem> = (0..6)
                .map(|i| ProductItem::new(format!("item-{i}"), "Lamp", 10.0))
                .collect();
            let batch = engine
                .create_batch(
                    "u1",
                    "determinism",
                    items,
                    vec!["A".into(), "B".into()],
                    BatchPriority::Medium,
                    json!({"max_concurrent_registrations": pool_size}),
                    None,
                )
                .unwrap();
            let summary = engine.process_batch(&batch.id, false).await.unwrap();
            assert_eq!(summary.total_registered, 6, "pool size {pool_size}");
            assert_eq!(summary.total_failed, 6, "pool size {pool_size}");
            let snapshot = engine.batch_status(&batch.id).unwrap();
            assert_eq!(
                snapshot.batch.status,
                RegistrationState::PartiallyCompleted
            );
        }
    }

    #[tokio::test]
    async fn account_usage_recorded_per_call() {
        let adapter = ScriptedAdapter::new(
            "A",
            vec![
                Err(PlatformError::Http { status: 503, message: "unavailable".into() }),
                Ok(json!({"productId": "P-1"})),
            ],
        );
        let engine = engine_with(vec![adapter], fast_config());
        let batch = engine
            .create_batch(
                "u1",
                "usage",
                vec![ProductItem::new("item-1", "Desk Lamp", 19.99)],
                vec!["A".into()],
                BatchPriority::Medium,
                json!({}),
                None,
            )
            .unwrap();
        engine.process_batch(&batch.id, false).await.unwrap();

        let accounts = engine.store.active_accounts(&["A".to_string()]).unwrap();
        assert_eq!(accounts[0].api_calls_total, 2);
        assert_eq!(accounts[0].api_failures, 1);
    }
}
