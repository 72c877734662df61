//! Durable SQLite store for executions, steps, item results, platform
//! registrations, batches, accounts, alerts and template snapshots.
//!
//! Writes are transactional at the granularity of a single entity update.
//! The one cross-entity write, a progress tick touching a step and its
//! execution together, runs in a single transaction
//! (`apply_progress_tick`). The connection sits behind a mutex; all methods
//! are synchronous point lookups or bounded queries.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use crate::alerts::{Alert, AlertKind, AlertSeverity, NewAlert};
use crate::errors::StoreError;
use crate::model::*;
use crate::workflow::WorkflowTemplate;

/// Format a timestamp for TEXT storage. Fixed precision keeps the column
/// lexicographically ordered, which the recovery query relies on.
fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn fmt_ts_opt(ts: &Option<DateTime<Utc>>) -> Option<String> {
    ts.as_ref().map(fmt_ts)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupted(format!("bad timestamp '{raw}': {e}")))
}

fn parse_ts_opt(raw: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.as_deref().map(parse_ts).transpose()
}

fn parse_json_opt(raw: Option<String>) -> Result<Option<Value>, StoreError> {
    raw.map(|s| serde_json::from_str(&s)).transpose().map_err(StoreError::from)
}

fn corrupted(e: String) -> StoreError {
    StoreError::Corrupted(e)
}

/// The durable store. Cheap to share behind an `Arc`.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    /// Create an in-memory database (for tests and the CLI dry-run path).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn init(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL UNIQUE,
                workflow_name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                estimated_completion TEXT,
                total_steps INTEGER NOT NULL DEFAULT 0,
                completed_steps INTEGER NOT NULL DEFAULT 0,
                failed_steps INTEGER NOT NULL DEFAULT 0,
                total_items INTEGER NOT NULL DEFAULT 0,
                processed_items INTEGER NOT NULL DEFAULT 0,
                succeeded_items INTEGER NOT NULL DEFAULT 0,
                failed_items INTEGER NOT NULL DEFAULT 0,
                processing_rate REAL NOT NULL DEFAULT 0,
                success_rate REAL NOT NULL DEFAULT 0,
                error_rate REAL NOT NULL DEFAULT 0,
                execution_config TEXT NOT NULL DEFAULT '{}',
                results_summary TEXT,
                resource_usage TEXT,
                error_log TEXT,
                items TEXT NOT NULL DEFAULT '[]'
            );

            CREATE TABLE IF NOT EXISTS steps (
                id TEXT PRIMARY KEY,
                execution_id TEXT NOT NULL REFERENCES executions(id) ON DELETE CASCADE,
                ordinal INTEGER NOT NULL,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                started_at TEXT,
                completed_at TEXT,
                duration_seconds INTEGER,
                total_items INTEGER NOT NULL DEFAULT 0,
                processed_items INTEGER NOT NULL DEFAULT 0,
                succeeded_items INTEGER NOT NULL DEFAULT 0,
                failed_items INTEGER NOT NULL DEFAULT 0,
                config TEXT NOT NULL DEFAULT '{}',
                results TEXT,
                error_details TEXT,
                processing_rate REAL NOT NULL DEFAULT 0,
                UNIQUE(execution_id, ordinal)
            );

            CREATE TABLE IF NOT EXISTS batches (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                target_platforms TEXT NOT NULL DEFAULT '[]',
                priority TEXT NOT NULL DEFAULT 'medium',
                status TEXT NOT NULL DEFAULT 'pending',
                total_items INTEGER NOT NULL DEFAULT 0,
                completed_items INTEGER NOT NULL DEFAULT 0,
                failed_items INTEGER NOT NULL DEFAULT 0,
                progress_percentage REAL NOT NULL DEFAULT 0,
                settings TEXT NOT NULL DEFAULT '{}',
                last_error TEXT,
                created_at TEXT NOT NULL,
                scheduled_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT
            );

            CREATE TABLE IF NOT EXISTS item_results (
                id TEXT PRIMARY KEY,
                execution_id TEXT REFERENCES executions(id) ON DELETE CASCADE,
                batch_id TEXT REFERENCES batches(id) ON DELETE CASCADE,
                item_id TEXT NOT NULL,
                item_code TEXT,
                item TEXT,
                sourcing_status TEXT NOT NULL DEFAULT 'pending',
                processing_status TEXT NOT NULL DEFAULT 'pending',
                registration_status TEXT NOT NULL DEFAULT 'pending',
                sourcing_completed_at TEXT,
                processing_completed_at TEXT,
                registration_completed_at TEXT,
                sourcing_artifacts TEXT,
                processing_artifacts TEXT,
                registration_artifacts TEXT,
                final_status TEXT NOT NULL DEFAULT 'pending',
                last_error TEXT,
                total_processing_time_secs INTEGER,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS platform_registrations (
                id TEXT PRIMARY KEY,
                item_result_id TEXT NOT NULL REFERENCES item_results(id) ON DELETE CASCADE,
                platform TEXT NOT NULL,
                account_id TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                payload TEXT,
                response TEXT,
                platform_product_id TEXT,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                api_call_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                scheduled_at TEXT,
                next_retry_at TEXT,
                started_at TEXT,
                completed_at TEXT
            );

            CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                execution_id TEXT REFERENCES executions(workflow_id) ON DELETE SET NULL,
                kind TEXT NOT NULL,
                severity TEXT NOT NULL DEFAULT 'medium',
                title TEXT NOT NULL,
                message TEXT NOT NULL,
                component TEXT,
                step_name TEXT,
                payload TEXT,
                created_at TEXT NOT NULL,
                acknowledged_by TEXT,
                acknowledged_at TEXT,
                action_taken TEXT,
                resolved_at TEXT
            );

            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                platform TEXT NOT NULL,
                label TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                selected INTEGER NOT NULL DEFAULT 1,
                api_calls_total INTEGER NOT NULL DEFAULT 0,
                api_failures INTEGER NOT NULL DEFAULT 0,
                last_used_at TEXT
            );

            CREATE TABLE IF NOT EXISTS workflow_templates (
                name TEXT PRIMARY KEY,
                stages TEXT NOT NULL,
                registered_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_executions_status ON executions(status);
            CREATE INDEX IF NOT EXISTS idx_steps_execution ON steps(execution_id);
            CREATE INDEX IF NOT EXISTS idx_item_results_execution ON item_results(execution_id);
            CREATE INDEX IF NOT EXISTS idx_item_results_batch ON item_results(batch_id);
            CREATE INDEX IF NOT EXISTS idx_platform_regs_item ON platform_registrations(item_result_id);
            CREATE INDEX IF NOT EXISTS idx_alerts_execution ON alerts(execution_id);
            CREATE INDEX IF NOT EXISTS idx_accounts_platform ON accounts(platform);
            ",
        )?;
        Ok(())
    }

    // ── Executions ────────────────────────────────────────────────────

    pub fn insert_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO executions (
                id, workflow_id, workflow_name, status, created_at, updated_at,
                started_at, completed_at, estimated_completion,
                total_steps, completed_steps, failed_steps,
                total_items, processed_items, succeeded_items, failed_items,
                processing_rate, success_rate, error_rate,
                execution_config, results_summary, resource_usage, error_log, items
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                      ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)",
            params![
                execution.id,
                execution.workflow_id,
                execution.workflow_name,
                execution.status.as_str(),
                fmt_ts(&execution.created_at),
                fmt_ts(&execution.updated_at),
                fmt_ts_opt(&execution.started_at),
                fmt_ts_opt(&execution.completed_at),
                fmt_ts_opt(&execution.estimated_completion),
                execution.total_steps,
                execution.completed_steps,
                execution.failed_steps,
                execution.total_items,
                execution.processed_items,
                execution.succeeded_items,
                execution.failed_items,
                execution.processing_rate,
                execution.success_rate,
                execution.error_rate,
                serde_json::to_string(&execution.execution_config)?,
                execution
                    .results_summary
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                execution
                    .resource_usage
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                execution.error_log,
                serde_json::to_string(&execution.items)?,
            ],
        )?;
        Ok(())
    }

    /// Full-row update; bumps `updated_at`.
    pub fn update_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE executions SET
                status = ?2, updated_at = ?3, started_at = ?4, completed_at = ?5,
                estimated_completion = ?6, total_steps = ?7, completed_steps = ?8,
                failed_steps = ?9, total_items = ?10, processed_items = ?11,
                succeeded_items = ?12, failed_items = ?13, processing_rate = ?14,
                success_rate = ?15, error_rate = ?16, results_summary = ?17,
                resource_usage = ?18, error_log = ?19
             WHERE workflow_id = ?1",
            params![
                execution.workflow_id,
                execution.status.as_str(),
                fmt_ts(&Utc::now()),
                fmt_ts_opt(&execution.started_at),
                fmt_ts_opt(&execution.completed_at),
                fmt_ts_opt(&execution.estimated_completion),
                execution.total_steps,
                execution.completed_steps,
                execution.failed_steps,
                execution.total_items,
                execution.processed_items,
                execution.succeeded_items,
                execution.failed_items,
                execution.processing_rate,
                execution.success_rate,
                execution.error_rate,
                execution
                    .results_summary
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                execution
                    .resource_usage
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                execution.error_log,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("execution", &execution.workflow_id));
        }
        Ok(())
    }

    pub fn get_execution(&self, workflow_id: &str) -> Result<Execution, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("{EXECUTION_SELECT} WHERE workflow_id = ?1"),
                params![workflow_id],
                ExecutionRow::from_row,
            )
            .optional()?;
        match row {
            Some(row) => row.into_execution(),
            None => Err(StoreError::not_found("execution", workflow_id)),
        }
    }

    /// List executions, newest first, optionally filtered by status.
    pub fn list_executions(
        &self,
        status: Option<ExecutionStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Execution>, StoreError> {
        let conn = self.conn()?;
        let mut out = Vec::new();
        match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "{EXECUTION_SELECT} WHERE status = ?1 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3"
                ))?;
                let rows = stmt.query_map(
                    params![status.as_str(), limit as i64, offset as i64],
                    ExecutionRow::from_row,
                )?;
                for row in rows {
                    out.push(row?.into_execution()?);
                }
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "{EXECUTION_SELECT} ORDER BY created_at DESC LIMIT ?1 OFFSET ?2"
                ))?;
                let rows =
                    stmt.query_map(params![limit as i64, offset as i64], ExecutionRow::from_row)?;
                for row in rows {
                    out.push(row?.into_execution()?);
                }
            }
        }
        Ok(out)
    }

    /// Executions in `running` or `paused` whose last update is older than
    /// the staleness threshold: candidates for recovery.
    pub fn recovery_candidates(
        &self,
        stale_threshold: std::time::Duration,
    ) -> Result<Vec<Execution>, StoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(stale_threshold)
                .map_err(|e| corrupted(format!("stale threshold out of range: {e}")))?;
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{EXECUTION_SELECT} WHERE status IN ('running', 'paused') AND updated_at < ?1
             ORDER BY updated_at ASC"
        ))?;
        let rows = stmt.query_map(params![fmt_ts(&cutoff)], ExecutionRow::from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_execution()?);
        }
        Ok(out)
    }

    /// One-transaction progress tick: update the step's live counters and
    /// the execution's aggregates together so readers never see them skew.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_progress_tick(
        &self,
        workflow_id: &str,
        step_id: &str,
        step_processed: u32,
        step_succeeded: u32,
        step_failed: u32,
        execution_processed: u32,
        execution_succeeded: u32,
        execution_failed: u32,
        processing_rate: f64,
        estimated_completion: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE steps SET processed_items = ?2, succeeded_items = ?3,
                failed_items = ?4, processing_rate = ?5
             WHERE id = ?1",
            params![
                step_id,
                step_processed,
                step_succeeded,
                step_failed,
                processing_rate
            ],
        )?;
        tx.execute(
            "UPDATE executions SET processed_items = ?2, succeeded_items = ?3,
                failed_items = ?4, processing_rate = ?5, estimated_completion = ?6,
                updated_at = ?7
             WHERE workflow_id = ?1",
            params![
                workflow_id,
                execution_processed,
                execution_succeeded,
                execution_failed,
                processing_rate,
                fmt_ts_opt(&estimated_completion),
                fmt_ts(&Utc::now()),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Refresh `updated_at` without touching anything else. Keeps an owned
    /// execution out of the recovery candidate set.
    pub fn touch_execution(&self, workflow_id: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE executions SET updated_at = ?2 WHERE workflow_id = ?1",
            params![workflow_id, fmt_ts(&Utc::now())],
        )?;
        Ok(())
    }

    // ── Steps ─────────────────────────────────────────────────────────

    pub fn insert_step(&self, step: &StepRecord) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO steps (
                id, execution_id, ordinal, name, kind, status,
                started_at, completed_at, duration_seconds,
                total_items, processed_items, succeeded_items, failed_items,
                config, results, error_details, processing_rate
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                step.id,
                step.execution_id,
                step.ordinal,
                step.name,
                step.kind.as_str(),
                step.status.as_str(),
                fmt_ts_opt(&step.started_at),
                fmt_ts_opt(&step.completed_at),
                step.duration_seconds,
                step.total_items,
                step.processed_items,
                step.succeeded_items,
                step.failed_items,
                serde_json::to_string(&step.config)?,
                step.results.as_ref().map(serde_json::to_string).transpose()?,
                step.error_details,
                step.processing_rate,
            ],
        )?;
        Ok(())
    }

    pub fn update_step(&self, step: &StepRecord) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE steps SET
                status = ?2, started_at = ?3, completed_at = ?4, duration_seconds = ?5,
                total_items = ?6, processed_items = ?7, succeeded_items = ?8,
                failed_items = ?9, results = ?10, error_details = ?11, processing_rate = ?12
             WHERE id = ?1",
            params![
                step.id,
                step.status.as_str(),
                fmt_ts_opt(&step.started_at),
                fmt_ts_opt(&step.completed_at),
                step.duration_seconds,
                step.total_items,
                step.processed_items,
                step.succeeded_items,
                step.failed_items,
                step.results.as_ref().map(serde_json::to_string).transpose()?,
                step.error_details,
                step.processing_rate,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("step", &step.id));
        }
        Ok(())
    }

    /// Steps of an execution in ordinal order. Takes the execution row id.
    pub fn steps_for_execution(&self, execution_id: &str) -> Result<Vec<StepRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, execution_id, ordinal, name, kind, status, started_at,
                    completed_at, duration_seconds, total_items, processed_items,
                    succeeded_items, failed_items, config, results, error_details,
                    processing_rate
             FROM steps WHERE execution_id = ?1 ORDER BY ordinal",
        )?;
        let rows = stmt.query_map(params![execution_id], StepRow::from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_step()?);
        }
        Ok(out)
    }

    // ── Item results ──────────────────────────────────────────────────

    pub fn insert_item_result(&self, item: &ItemResult) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO item_results (
                id, execution_id, batch_id, item_id, item_code, item,
                sourcing_status, processing_status, registration_status,
                sourcing_completed_at, processing_completed_at, registration_completed_at,
                sourcing_artifacts, processing_artifacts, registration_artifacts,
                final_status, last_error, total_processing_time_secs, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                      ?15, ?16, ?17, ?18, ?19)",
            params![
                item.id,
                item.execution_id,
                item.batch_id,
                item.item_id,
                item.item_code,
                item.item.as_ref().map(serde_json::to_string).transpose()?,
                item.sourcing_status.as_str(),
                item.processing_status.as_str(),
                item.registration_status.as_str(),
                fmt_ts_opt(&item.sourcing_completed_at),
                fmt_ts_opt(&item.processing_completed_at),
                fmt_ts_opt(&item.registration_completed_at),
                item.sourcing_artifacts
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                item.processing_artifacts
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                item.registration_artifacts
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                item.final_status.as_str(),
                item.last_error,
                item.total_processing_time_secs,
                fmt_ts(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn update_item_result(&self, item: &ItemResult) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE item_results SET
                sourcing_status = ?2, processing_status = ?3, registration_status = ?4,
                sourcing_completed_at = ?5, processing_completed_at = ?6,
                registration_completed_at = ?7, sourcing_artifacts = ?8,
                processing_artifacts = ?9, registration_artifacts = ?10,
                final_status = ?11, last_error = ?12, total_processing_time_secs = ?13
             WHERE id = ?1",
            params![
                item.id,
                item.sourcing_status.as_str(),
                item.processing_status.as_str(),
                item.registration_status.as_str(),
                fmt_ts_opt(&item.sourcing_completed_at),
                fmt_ts_opt(&item.processing_completed_at),
                fmt_ts_opt(&item.registration_completed_at),
                item.sourcing_artifacts
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                item.processing_artifacts
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                item.registration_artifacts
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                item.final_status.as_str(),
                item.last_error,
                item.total_processing_time_secs,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("item result", &item.id));
        }
        Ok(())
    }

    pub fn item_results_for_execution(
        &self,
        execution_id: &str,
    ) -> Result<Vec<ItemResult>, StoreError> {
        self.item_results_where("execution_id = ?1", execution_id)
    }

    pub fn item_results_for_batch(&self, batch_id: &str) -> Result<Vec<ItemResult>, StoreError> {
        self.item_results_where("batch_id = ?1", batch_id)
    }

    fn item_results_where(&self, clause: &str, param: &str) -> Result<Vec<ItemResult>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, execution_id, batch_id, item_id, item_code, item,
                    sourcing_status, processing_status, registration_status,
                    sourcing_completed_at, processing_completed_at,
                    registration_completed_at, sourcing_artifacts,
                    processing_artifacts, registration_artifacts, final_status,
                    last_error, total_processing_time_secs
             FROM item_results WHERE {clause} ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(params![param], ItemResultRow::from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_item_result()?);
        }
        Ok(out)
    }

    // ── Platform registrations ────────────────────────────────────────

    pub fn insert_platform_registration(
        &self,
        registration: &PlatformRegistration,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO platform_registrations (
                id, item_result_id, platform, account_id, status, payload, response,
                platform_product_id, attempt_count, api_call_count, last_error,
                scheduled_at, next_retry_at, started_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                registration.id,
                registration.item_result_id,
                registration.platform,
                registration.account_id,
                registration.status.as_str(),
                registration
                    .payload
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                registration
                    .response
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                registration.platform_product_id,
                registration.attempt_count,
                registration.api_call_count,
                registration.last_error,
                fmt_ts_opt(&registration.scheduled_at),
                fmt_ts_opt(&registration.next_retry_at),
                fmt_ts_opt(&registration.started_at),
                fmt_ts_opt(&registration.completed_at),
            ],
        )?;
        Ok(())
    }

    pub fn update_platform_registration(
        &self,
        registration: &PlatformRegistration,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE platform_registrations SET
                account_id = ?2, status = ?3, payload = ?4, response = ?5,
                platform_product_id = ?6, attempt_count = ?7, api_call_count = ?8,
                last_error = ?9, next_retry_at = ?10, started_at = ?11, completed_at = ?12
             WHERE id = ?1",
            params![
                registration.id,
                registration.account_id,
                registration.status.as_str(),
                registration
                    .payload
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                registration
                    .response
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                registration.platform_product_id,
                registration.attempt_count,
                registration.api_call_count,
                registration.last_error,
                fmt_ts_opt(&registration.next_retry_at),
                fmt_ts_opt(&registration.started_at),
                fmt_ts_opt(&registration.completed_at),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found(
                "platform registration",
                &registration.id,
            ));
        }
        Ok(())
    }

    pub fn registrations_for_item(
        &self,
        item_result_id: &str,
    ) -> Result<Vec<PlatformRegistration>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{REGISTRATION_SELECT} WHERE item_result_id = ?1 ORDER BY platform"
        ))?;
        let rows = stmt.query_map(params![item_result_id], RegistrationRow::from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_registration()?);
        }
        Ok(out)
    }

    /// All platform registrations under a batch, joined through item results.
    pub fn registrations_for_batch(
        &self,
        batch_id: &str,
    ) -> Result<Vec<PlatformRegistration>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT pr.id, pr.item_result_id, pr.platform, pr.account_id, pr.status,
                    pr.payload, pr.response, pr.platform_product_id, pr.attempt_count,
                    pr.api_call_count, pr.last_error, pr.scheduled_at, pr.next_retry_at,
                    pr.started_at, pr.completed_at
             FROM platform_registrations pr
             JOIN item_results ir ON ir.id = pr.item_result_id
             WHERE ir.batch_id = ?1
             ORDER BY pr.platform",
        )?;
        let rows = stmt.query_map(params![batch_id], RegistrationRow::from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_registration()?);
        }
        Ok(out)
    }

    // ── Batches ───────────────────────────────────────────────────────

    pub fn insert_batch(&self, batch: &RegistrationBatch) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO batches (
                id, user_id, name, target_platforms, priority, status,
                total_items, completed_items, failed_items, progress_percentage,
                settings, last_error, created_at, scheduled_at, started_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                batch.id,
                batch.user_id,
                batch.name,
                serde_json::to_string(&batch.target_platforms)?,
                batch.priority.as_str(),
                batch.status.as_str(),
                batch.total_items,
                batch.completed_items,
                batch.failed_items,
                batch.progress_percentage,
                serde_json::to_string(&batch.settings)?,
                batch.last_error,
                fmt_ts(&batch.created_at),
                fmt_ts(&batch.scheduled_at),
                fmt_ts_opt(&batch.started_at),
                fmt_ts_opt(&batch.completed_at),
            ],
        )?;
        Ok(())
    }

    pub fn update_batch(&self, batch: &RegistrationBatch) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE batches SET
                status = ?2, total_items = ?3, completed_items = ?4, failed_items = ?5,
                progress_percentage = ?6, last_error = ?7, started_at = ?8, completed_at = ?9
             WHERE id = ?1",
            params![
                batch.id,
                batch.status.as_str(),
                batch.total_items,
                batch.completed_items,
                batch.failed_items,
                batch.progress_percentage,
                batch.last_error,
                fmt_ts_opt(&batch.started_at),
                fmt_ts_opt(&batch.completed_at),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("batch", &batch.id));
        }
        Ok(())
    }

    pub fn get_batch(&self, batch_id: &str) -> Result<RegistrationBatch, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, user_id, name, target_platforms, priority, status,
                        total_items, completed_items, failed_items, progress_percentage,
                        settings, last_error, created_at, scheduled_at, started_at, completed_at
                 FROM batches WHERE id = ?1",
                params![batch_id],
                BatchRow::from_row,
            )
            .optional()?;
        match row {
            Some(row) => row.into_batch(),
            None => Err(StoreError::not_found("batch", batch_id)),
        }
    }

    // ── Accounts ──────────────────────────────────────────────────────

    pub fn upsert_account(&self, account: &PlatformAccount) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO accounts (
                id, platform, label, active, selected, api_calls_total,
                api_failures, last_used_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                platform = excluded.platform, label = excluded.label,
                active = excluded.active, selected = excluded.selected",
            params![
                account.id,
                account.platform,
                account.label,
                account.active as i64,
                account.selected as i64,
                account.api_calls_total as i64,
                account.api_failures as i64,
                fmt_ts_opt(&account.last_used_at),
            ],
        )?;
        Ok(())
    }

    /// Active, selected accounts for any of the given platforms.
    pub fn active_accounts(&self, platforms: &[String]) -> Result<Vec<PlatformAccount>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, platform, label, active, selected, api_calls_total,
                    api_failures, last_used_at
             FROM accounts WHERE active = 1 AND selected = 1
             ORDER BY platform, last_used_at",
        )?;
        let rows = stmt.query_map([], AccountRow::from_row)?;
        let mut out = Vec::new();
        for row in rows {
            let account = row?.into_account()?;
            if platforms.contains(&account.platform) {
                out.push(account);
            }
        }
        Ok(out)
    }

    /// Bump an account's API-usage counters for one dispatched call.
    pub fn record_account_usage(&self, account_id: &str, success: bool) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE accounts SET
                api_calls_total = api_calls_total + 1,
                api_failures = api_failures + ?2,
                last_used_at = ?3
             WHERE id = ?1",
            params![account_id, if success { 0 } else { 1 }, fmt_ts(&Utc::now())],
        )?;
        Ok(())
    }

    // ── Alerts ────────────────────────────────────────────────────────

    pub fn insert_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO alerts (
                id, execution_id, kind, severity, title, message, component,
                step_name, payload, created_at, acknowledged_by, acknowledged_at,
                action_taken, resolved_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                alert.id,
                alert.execution_id,
                alert.kind.as_str(),
                alert.severity.as_str(),
                alert.title,
                alert.message,
                alert.component,
                alert.step_name,
                alert.payload.as_ref().map(serde_json::to_string).transpose()?,
                fmt_ts(&alert.created_at),
                alert.acknowledged_by,
                fmt_ts_opt(&alert.acknowledged_at),
                alert.action_taken,
                fmt_ts_opt(&alert.resolved_at),
            ],
        )?;
        Ok(())
    }

    pub fn alerts_for_execution(&self, workflow_id: &str) -> Result<Vec<Alert>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{ALERT_SELECT} WHERE execution_id = ?1 ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(params![workflow_id], AlertRow::from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_alert()?);
        }
        Ok(out)
    }

    /// Alerts not yet acknowledged, oldest first: the delivery subscriber's
    /// read path.
    pub fn unacknowledged_alerts(&self, limit: usize) -> Result<Vec<Alert>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{ALERT_SELECT} WHERE acknowledged_at IS NULL ORDER BY created_at LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit as i64], AlertRow::from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_alert()?);
        }
        Ok(out)
    }

    pub fn acknowledge_alert(&self, alert_id: &str, actor: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE alerts SET acknowledged_by = ?2, acknowledged_at = ?3 WHERE id = ?1",
            params![alert_id, actor, fmt_ts(&Utc::now())],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("alert", alert_id));
        }
        Ok(())
    }

    pub fn resolve_alert(&self, alert_id: &str, action_taken: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE alerts SET action_taken = ?2, resolved_at = ?3 WHERE id = ?1",
            params![alert_id, action_taken, fmt_ts(&Utc::now())],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("alert", alert_id));
        }
        Ok(())
    }

    // ── Workflow templates ────────────────────────────────────────────

    /// Persist a registered template. Templates are immutable once
    /// registered; re-registering the same name is rejected upstream, so a
    /// plain INSERT OR REPLACE records the registry's view.
    pub fn save_template(&self, template: &WorkflowTemplate) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO workflow_templates (name, stages, registered_at)
             VALUES (?1, ?2, ?3)",
            params![
                template.name,
                serde_json::to_string(&template.stages)?,
                fmt_ts(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn template_names(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT name FROM workflow_templates ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

// ── Row mapping ───────────────────────────────────────────────────────
// Raw TEXT/INTEGER rows are read inside rusqlite closures and converted to
// domain types outside them, so enum/JSON parse failures surface as
// StoreError rather than panics.

const EXECUTION_SELECT: &str = "SELECT id, workflow_id, workflow_name, status, created_at, \
     updated_at, started_at, completed_at, estimated_completion, total_steps, completed_steps, \
     failed_steps, total_items, processed_items, succeeded_items, failed_items, processing_rate, \
     success_rate, error_rate, execution_config, results_summary, resource_usage, error_log, \
     items FROM executions";

struct ExecutionRow {
    id: String,
    workflow_id: String,
    workflow_name: String,
    status: String,
    created_at: String,
    updated_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    estimated_completion: Option<String>,
    total_steps: u32,
    completed_steps: u32,
    failed_steps: u32,
    total_items: u32,
    processed_items: u32,
    succeeded_items: u32,
    failed_items: u32,
    processing_rate: f64,
    success_rate: f64,
    error_rate: f64,
    execution_config: String,
    results_summary: Option<String>,
    resource_usage: Option<String>,
    error_log: Option<String>,
    items: String,
}

impl ExecutionRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            workflow_id: row.get(1)?,
            workflow_name: row.get(2)?,
            status: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
            started_at: row.get(6)?,
            completed_at: row.get(7)?,
            estimated_completion: row.get(8)?,
            total_steps: row.get(9)?,
            completed_steps: row.get(10)?,
            failed_steps: row.get(11)?,
            total_items: row.get(12)?,
            processed_items: row.get(13)?,
            succeeded_items: row.get(14)?,
            failed_items: row.get(15)?,
            processing_rate: row.get(16)?,
            success_rate: row.get(17)?,
            error_rate: row.get(18)?,
            execution_config: row.get(19)?,
            results_summary: row.get(20)?,
            resource_usage: row.get(21)?,
            error_log: row.get(22)?,
            items: row.get(23)?,
        })
    }

    fn into_execution(self) -> Result<Execution, StoreError> {
        Ok(Execution {
            id: self.id,
            workflow_id: self.workflow_id,
            workflow_name: self.workflow_name,
            status: ExecutionStatus::parse(&self.status).map_err(corrupted)?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            started_at: parse_ts_opt(self.started_at)?,
            completed_at: parse_ts_opt(self.completed_at)?,
            estimated_completion: parse_ts_opt(self.estimated_completion)?,
            total_steps: self.total_steps,
            completed_steps: self.completed_steps,
            failed_steps: self.failed_steps,
            total_items: self.total_items,
            processed_items: self.processed_items,
            succeeded_items: self.succeeded_items,
            failed_items: self.failed_items,
            processing_rate: self.processing_rate,
            success_rate: self.success_rate,
            error_rate: self.error_rate,
            execution_config: serde_json::from_str(&self.execution_config)?,
            results_summary: parse_json_opt(self.results_summary)?,
            resource_usage: parse_json_opt(self.resource_usage)?,
            error_log: self.error_log,
            items: serde_json::from_str(&self.items)?,
        })
    }
}

struct StepRow {
    id: String,
    execution_id: String,
    ordinal: u32,
    name: String,
    kind: String,
    status: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    duration_seconds: Option<i64>,
    total_items: u32,
    processed_items: u32,
    succeeded_items: u32,
    failed_items: u32,
    config: String,
    results: Option<String>,
    error_details: Option<String>,
    processing_rate: f64,
}

impl StepRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            execution_id: row.get(1)?,
            ordinal: row.get(2)?,
            name: row.get(3)?,
            kind: row.get(4)?,
            status: row.get(5)?,
            started_at: row.get(6)?,
            completed_at: row.get(7)?,
            duration_seconds: row.get(8)?,
            total_items: row.get(9)?,
            processed_items: row.get(10)?,
            succeeded_items: row.get(11)?,
            failed_items: row.get(12)?,
            config: row.get(13)?,
            results: row.get(14)?,
            error_details: row.get(15)?,
            processing_rate: row.get(16)?,
        })
    }

    fn into_step(self) -> Result<StepRecord, StoreError> {
        Ok(StepRecord {
            id: self.id,
            execution_id: self.execution_id,
            ordinal: self.ordinal,
            name: self.name,
            kind: StageKind::parse(&self.kind).map_err(corrupted)?,
            status: StepStatus::parse(&self.status).map_err(corrupted)?,
            started_at: parse_ts_opt(self.started_at)?,
            completed_at: parse_ts_opt(self.completed_at)?,
            duration_seconds: self.duration_seconds,
            total_items: self.total_items,
            processed_items: self.processed_items,
            succeeded_items: self.succeeded_items,
            failed_items: self.failed_items,
            config: serde_json::from_str(&self.config)?,
            results: parse_json_opt(self.results)?,
            error_details: self.error_details,
            processing_rate: self.processing_rate,
        })
    }
}

struct ItemResultRow {
    id: String,
    execution_id: Option<String>,
    batch_id: Option<String>,
    item_id: String,
    item_code: Option<String>,
    item: Option<String>,
    sourcing_status: String,
    processing_status: String,
    registration_status: String,
    sourcing_completed_at: Option<String>,
    processing_completed_at: Option<String>,
    registration_completed_at: Option<String>,
    sourcing_artifacts: Option<String>,
    processing_artifacts: Option<String>,
    registration_artifacts: Option<String>,
    final_status: String,
    last_error: Option<String>,
    total_processing_time_secs: Option<i64>,
}

impl ItemResultRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            execution_id: row.get(1)?,
            batch_id: row.get(2)?,
            item_id: row.get(3)?,
            item_code: row.get(4)?,
            item: row.get(5)?,
            sourcing_status: row.get(6)?,
            processing_status: row.get(7)?,
            registration_status: row.get(8)?,
            sourcing_completed_at: row.get(9)?,
            processing_completed_at: row.get(10)?,
            registration_completed_at: row.get(11)?,
            sourcing_artifacts: row.get(12)?,
            processing_artifacts: row.get(13)?,
            registration_artifacts: row.get(14)?,
            final_status: row.get(15)?,
            last_error: row.get(16)?,
            total_processing_time_secs: row.get(17)?,
        })
    }

    fn into_item_result(self) -> Result<ItemResult, StoreError> {
        Ok(ItemResult {
            id: self.id,
            execution_id: self.execution_id,
            batch_id: self.batch_id,
            item_id: self.item_id,
            item_code: self.item_code,
            item: self
                .item
                .map(|raw| serde_json::from_str(&raw))
                .transpose()?,
            sourcing_status: StepStatus::parse(&self.sourcing_status).map_err(corrupted)?,
            processing_status: StepStatus::parse(&self.processing_status).map_err(corrupted)?,
            registration_status: StepStatus::parse(&self.registration_status)
                .map_err(corrupted)?,
            sourcing_completed_at: parse_ts_opt(self.sourcing_completed_at)?,
            processing_completed_at: parse_ts_opt(self.processing_completed_at)?,
            registration_completed_at: parse_ts_opt(self.registration_completed_at)?,
            sourcing_artifacts: parse_json_opt(self.sourcing_artifacts)?,
            processing_artifacts: parse_json_opt(self.processing_artifacts)?,
            registration_artifacts: parse_json_opt(self.registration_artifacts)?,
            final_status: RegistrationState::parse(&self.final_status).map_err(corrupted)?,
            last_error: self.last_error,
            total_processing_time_secs: self.total_processing_time_secs,
        })
    }
}

const REGISTRATION_SELECT: &str = "SELECT id, item_result_id, platform, account_id, status, \
     payload, response, platform_product_id, attempt_count, api_call_count, last_error, \
     scheduled_at, next_retry_at, started_at, completed_at FROM platform_registrations";

struct RegistrationRow {
    id: String,
    item_result_id: String,
    platform: String,
    account_id: Option<String>,
    status: String,
    payload: Option<String>,
    response: Option<String>,
    platform_product_id: Option<String>,
    attempt_count: u32,
    api_call_count: u32,
    last_error: Option<String>,
    scheduled_at: Option<String>,
    next_retry_at: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl RegistrationRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            item_result_id: row.get(1)?,
            platform: row.get(2)?,
            account_id: row.get(3)?,
            status: row.get(4)?,
            payload: row.get(5)?,
            response: row.get(6)?,
            platform_product_id: row.get(7)?,
            attempt_count: row.get(8)?,
            api_call_count: row.get(9)?,
            last_error: row.get(10)?,
            scheduled_at: row.get(11)?,
            next_retry_at: row.get(12)?,
            started_at: row.get(13)?,
            completed_at: row.get(14)?,
        })
    }

    fn into_registration(self) -> Result<PlatformRegistration, StoreError> {
        Ok(PlatformRegistration {
            id: self.id,
            item_result_id: self.item_result_id,
            platform: self.platform,
            account_id: self.account_id,
            status: RegistrationState::parse(&self.status).map_err(corrupted)?,
            payload: parse_json_opt(self.payload)?,
            response: parse_json_opt(self.response)?,
            platform_product_id: self.platform_product_id,
            attempt_count: self.attempt_count,
            api_call_count: self.api_call_count,
            last_error: self.last_error,
            scheduled_at: parse_ts_opt(self.scheduled_at)?,
            next_retry_at: parse_ts_opt(self.next_retry_at)?,
            started_at: parse_ts_opt(self.started_at)?,
            completed_at: parse_ts_opt(self.completed_at)?,
        })
    }
}

struct BatchRow {
    id: String,
    user_id: String,
    name: String,
    target_platforms: String,
    priority: String,
    status: String,
    total_items: u32,
    completed_items: u32,
    failed_items: u32,
    progress_percentage: f64,
    settings: String,
    last_error: Option<String>,
    created_at: String,
    scheduled_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl BatchRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            target_platforms: row.get(3)?,
            priority: row.get(4)?,
            status: row.get(5)?,
            total_items: row.get(6)?,
            completed_items: row.get(7)?,
            failed_items: row.get(8)?,
            progress_percentage: row.get(9)?,
            settings: row.get(10)?,
            last_error: row.get(11)?,
            created_at: row.get(12)?,
            scheduled_at: row.get(13)?,
            started_at: row.get(14)?,
            completed_at: row.get(15)?,
        })
    }

    fn into_batch(self) -> Result<RegistrationBatch, StoreError> {
        Ok(RegistrationBatch {
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            target_platforms: serde_json::from_str(&self.target_platforms)?,
            priority: BatchPriority::parse(&self.priority).map_err(corrupted)?,
            status: RegistrationState::parse(&self.status).map_err(corrupted)?,
            total_items: self.total_items,
            completed_items: self.completed_items,
            failed_items: self.failed_items,
            progress_percentage: self.progress_percentage,
            settings: serde_json::from_str(&self.settings)?,
            last_error: self.last_error,
            created_at: parse_ts(&self.created_at)?,
            scheduled_at: parse_ts(&self.scheduled_at)?,
            started_at: parse_ts_opt(self.started_at)?,
            completed_at: parse_ts_opt(self.completed_at)?,
        })
    }
}

struct AccountRow {
    id: String,
    platform: String,
    label: String,
    active: i64,
    selected: i64,
    api_calls_total: i64,
    api_failures: i64,
    last_used_at: Option<String>,
}

impl AccountRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            platform: row.get(1)?,
            label: row.get(2)?,
            active: row.get(3)?,
            selected: row.get(4)?,
            api_calls_total: row.get(5)?,
            api_failures: row.get(6)?,
            last_used_at: row.get(7)?,
        })
    }

    fn into_account(self) -> Result<PlatformAccount, StoreError> {
        Ok(PlatformAccount {
            id: self.id,
            platform: self.platform,
            label: self.label,
            active: self.active != 0,
            selected: self.selected != 0,
            api_calls_total: self.api_calls_total as u64,
            api_failures: self.api_failures as u64,
            last_used_at: parse_ts_opt(self.last_used_at)?,
        })
    }
}

const ALERT_SELECT: &str = "SELECT id, execution_id, kind, severity, title, message, component, \
     step_name, payload, created_at, acknowledged_by, acknowledged_at, action_taken, resolved_at \
     FROM alerts";

struct AlertRow {
    id: String,
    execution_id: Option<String>,
    kind: String,
    severity: String,
    title: String,
    message: String,
    component: Option<String>,
    step_name: Option<String>,
    payload: Option<String>,
    created_at: String,
    acknowledged_by: Option<String>,
    acknowledged_at: Option<String>,
    action_taken: Option<String>,
    resolved_at: Option<String>,
}

impl AlertRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            execution_id: row.get(1)?,
            kind: row.get(2)?,
            severity: row.get(3)?,
            title: row.get(4)?,
            message: row.get(5)?,
            component: row.get(6)?,
            step_name: row.get(7)?,
            payload: row.get(8)?,
            created_at: row.get(9)?,
            acknowledged_by: row.get(10)?,
            acknowledged_at: row.get(11)?,
            action_taken: row.get(12)?,
            resolved_at: row.get(13)?,
        })
    }

    fn into_alert(self) -> Result<Alert, StoreError> {
        Ok(Alert {
            id: self.id,
            execution_id: self.execution_id,
            kind: AlertKind::parse(&self.kind).map_err(corrupted)?,
            severity: AlertSeverity::parse(&self.severity).map_err(corrupted)?,
            title: self.title,
            message: self.message,
            component: self.component,
            step_name: self.step_name,
            payload: parse_json_opt(self.payload)?,
            created_at: parse_ts(&self.created_at)?,
            acknowledged_by: self.acknowledged_by,
            acknowledged_at: parse_ts_opt(self.acknowledged_at)?,
            action_taken: self.action_taken,
            resolved_at: parse_ts_opt(self.resolved_at)?,
        })
    }
}

/// Persist a freshly built alert and return it with an assigned id.
impl SqliteStore {
    pub fn create_alert(&self, new_alert: NewAlert) -> Result<Alert, StoreError> {
        let alert = new_alert.into_alert();
        self.insert_alert(&alert)?;
        Ok(alert)
    }
}
