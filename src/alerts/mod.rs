//! Structured alerts raised on threshold conditions.
//!
//! The core only persists alerts; delivery to chat/email/webhooks is an
//! external subscriber reading unacknowledged alerts from the store.
//! Alerts are immutable after creation except for the acknowledgement and
//! resolution fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::StoreError;

/// What the alert reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Error,
    Warning,
    Info,
    Success,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
            Self::Success => "success",
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "error" => Ok(Self::Error),
            "warning" => Ok(Self::Warning),
            "info" => Ok(Self::Info),
            "success" => Ok(Self::Success),
            _ => Err(format!("Invalid alert kind: {}", s)),
        }
    }
}

/// How urgently an operator should look.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Invalid alert severity: {}", s)),
        }
    }
}

/// A persisted alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    /// Public execution id the alert belongs to, if any.
    pub execution_id: Option<String>,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub component: Option<String>,
    pub step_name: Option<String>,
    pub payload: Option<Value>,
    pub created_at: DateTime<Utc>,

    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub action_taken: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged_at.is_some()
    }
}

/// Alert fields supplied by the caller; id and timestamp are assigned on
/// creation.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub execution_id: Option<String>,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub component: Option<String>,
    pub step_name: Option<String>,
    pub payload: Option<Value>,
}

impl NewAlert {
    pub fn into_alert(self) -> Alert {
        Alert {
            id: Uuid::new_v4().to_string(),
            execution_id: self.execution_id,
            kind: self.kind,
            severity: self.severity,
            title: self.title,
            message: self.message,
            component: self.component,
            step_name: self.step_name,
            payload: self.payload,
            created_at: Utc::now(),
            acknowledged_by: None,
            acknowledged_at: None,
            action_taken: None,
            resolved_at: None,
        }
    }
}

/// Persistence seam for alerts; the durable store implements it.
pub trait AlertSink: Send + Sync {
    fn emit(&self, alert: NewAlert) -> Result<Alert, StoreError>;
}

/// Convenience front-end over an `AlertSink`.
pub struct AlertEmitter {
    sink: Arc<dyn AlertSink>,
}

impl AlertEmitter {
    pub fn new(sink: Arc<dyn AlertSink>) -> Self {
        Self { sink }
    }

    /// Persist an alert and return its id.
    #[allow(clippy::too_many_arguments)]
    pub fn emit(
        &self,
        execution_id: Option<&str>,
        kind: AlertKind,
        severity: AlertSeverity,
        title: &str,
        message: &str,
        component: Option<&str>,
        payload: Option<Value>,
    ) -> Result<String, StoreError> {
        match severity {
            AlertSeverity::High | AlertSeverity::Critical => {
                tracing::error!(execution_id, title, severity = severity.as_str(), "alert")
            }
            _ => tracing::warn!(execution_id, title, severity = severity.as_str(), "alert"),
        }
        let alert = self.sink.emit(NewAlert {
            execution_id: execution_id.map(String::from),
            kind,
            severity,
            title: title.to_string(),
            message: message.to_string(),
            component: component.map(String::from),
            step_name: None,
            payload,
        })?;
        Ok(alert.id)
    }

    /// Stage-processor failure: severity high, tagged with the step name.
    pub fn stage_failed(
        &self,
        execution_id: &str,
        step_name: &str,
        message: &str,
    ) -> Result<String, StoreError> {
        tracing::error!(execution_id, step_name, message, "stage failed");
        let alert = self.sink.emit(NewAlert {
            execution_id: Some(execution_id.to_string()),
            kind: AlertKind::Error,
            severity: AlertSeverity::High,
            title: format!("Stage '{}' failed", step_name),
            message: message.to_string(),
            component: Some("orchestrator".to_string()),
            step_name: Some(step_name.to_string()),
            payload: None,
        })?;
        Ok(alert.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        alerts: Mutex<Vec<Alert>>,
    }

    impl AlertSink for RecordingSink {
        fn emit(&self, alert: NewAlert) -> Result<Alert, StoreError> {
            let alert = alert.into_alert();
            self.alerts.lock().unwrap().push(alert.clone());
            Ok(alert)
        }
    }

    #[test]
    fn emit_assigns_id_and_timestamp() {
        let sink = Arc::new(RecordingSink::default());
        let emitter = AlertEmitter::new(sink.clone());
        let id = emitter
            .emit(
                Some("wf-1"),
                AlertKind::Warning,
                AlertSeverity::Medium,
                "Slow stage",
                "processing below expected rate",
                Some("progress_tracker"),
                None,
            )
            .unwrap();
        let alerts = sink.alerts.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].id, id);
        assert_eq!(alerts[0].execution_id.as_deref(), Some("wf-1"));
        assert!(!alerts[0].is_acknowledged());
    }

    #[test]
    fn stage_failed_is_high_severity() {
        let sink = Arc::new(RecordingSink::default());
        let emitter = AlertEmitter::new(sink.clone());
        emitter.stage_failed("wf-1", "ai_sourcing", "boom").unwrap();
        let alerts = sink.alerts.lock().unwrap();
        assert_eq!(alerts[0].severity, AlertSeverity::High);
        assert_eq!(alerts[0].step_name.as_deref(), Some("ai_sourcing"));
    }

    #[test]
    fn severity_ordering() {
        assert!(AlertSeverity::Critical > AlertSeverity::High);
        assert!(AlertSeverity::High > AlertSeverity::Medium);
        assert!(AlertSeverity::Medium > AlertSeverity::Low);
    }
}
