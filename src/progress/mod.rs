//! Real-time progress tracking and estimation.
//!
//! The tracker turns a stream of `(completed_items, timestamp)` observations
//! into three derived quantities: the current processing rate, an ETA with a
//! confidence score, and bottleneck signals for running steps.
//!
//! Per-execution state is two ring buffers (progress points and rate
//! samples) plus scalar aggregates. A single writer task feeds each
//! execution's buffers; readers snapshot them through `summary`.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{HashSet, VecDeque};

use crate::alerts::AlertSeverity;
use crate::config::PipelineConfig;
use crate::model::{ItemResult, StepRecord, StepStatus};

/// Window of points used for the instantaneous rate.
const RATE_WINDOW_POINTS: usize = 5;
/// A step is checked for slow processing after this long.
const SLOW_CHECK_AFTER_SECS: i64 = 300;
/// Expected throughput used by the slow-processing heuristic, items/min.
const EXPECTED_ITEMS_PER_MINUTE: f64 = 10.0;
/// A step with zero progress after this long is stuck.
const STUCK_AFTER_SECS: i64 = 1800;
/// Error-rate threshold over processed items.
const ERROR_RATE_THRESHOLD: f64 = 0.2;
/// Tracker state for executions older than this is swept.
const SWEEP_AFTER_SECS: i64 = 24 * 3600;

/// One observed progress measurement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressPoint {
    pub timestamp: DateTime<Utc>,
    pub completed: u32,
    pub total: u32,
    pub percentage: f64,
}

/// One computed rate sample, tagged with the stage that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateSample {
    pub timestamp: DateTime<Utc>,
    pub rate: f64,
    pub stage: Option<String>,
}

/// Latest completion estimate for an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Estimation {
    pub total_items: u32,
    pub start_time: DateTime<Utc>,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub confidence: f64,
    pub current_rate: f64,
    pub remaining_items: u32,
    pub estimated_minutes_remaining: f64,
}

/// Min/max/average/latest over the rate ring buffer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateStatistics {
    pub min: f64,
    pub max: f64,
    pub average: f64,
    pub latest: f64,
}

/// Timing aggregates for a tracked execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingStatistics {
    pub start_time: DateTime<Utc>,
    pub elapsed_seconds: f64,
    pub elapsed_minutes: f64,
    pub estimated_total_seconds: Option<f64>,
    pub progress_percentage: Option<f64>,
}

/// Snapshot returned to external readers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub execution_id: String,
    pub current: Option<ProgressPoint>,
    pub estimation: Estimation,
    pub rate_statistics: RateStatistics,
    pub timing: TimingStatistics,
    pub data_points: usize,
}

/// Bottleneck signal kinds, in rising severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BottleneckKind {
    SlowProcessing,
    HighErrorRate,
    Stuck,
}

impl BottleneckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SlowProcessing => "slow_processing",
            Self::HighErrorRate => "high_error_rate",
            Self::Stuck => "stuck",
        }
    }

    pub fn severity(&self) -> AlertSeverity {
        match self {
            Self::SlowProcessing => AlertSeverity::Medium,
            Self::HighErrorRate => AlertSeverity::High,
            Self::Stuck => AlertSeverity::Critical,
        }
    }
}

/// A detected bottleneck on a running step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BottleneckSignal {
    pub kind: BottleneckKind,
    pub step_name: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub details: Value,
}

struct TrackerState {
    points: VecDeque<ProgressPoint>,
    rates: VecDeque<RateSample>,
    estimation: Estimation,
    /// Signals already raised; cleared per (step, kind) when the condition
    /// no longer holds so a recurrence fires again.
    emitted: HashSet<(String, BottleneckKind)>,
}

/// Streaming progress aggregation for active executions.
pub struct ProgressTracker {
    states: DashMap<String, TrackerState>,
    history_points: usize,
    rate_points: usize,
}

impl ProgressTracker {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            states: DashMap::new(),
            history_points: config.progress_history_points,
            rate_points: config.progress_rate_points,
        }
    }

    /// Begin tracking an execution; records the initial zero point.
    pub fn start_tracking(&self, execution_id: &str, total_items: u32) {
        let now = Utc::now();
        let mut points = VecDeque::with_capacity(self.history_points);
        points.push_back(progress_point(0, total_items, now));
        self.states.insert(
            execution_id.to_string(),
            TrackerState {
                points,
                rates: VecDeque::with_capacity(self.rate_points),
                estimation: Estimation {
                    total_items,
                    start_time: now,
                    estimated_completion: None,
                    confidence: 0.0,
                    current_rate: 0.0,
                    remaining_items: total_items,
                    estimated_minutes_remaining: 0.0,
                },
                emitted: HashSet::new(),
            },
        );
    }

    /// Record an observation stamped with the current time.
    pub fn record(
        &self,
        execution_id: &str,
        completed_items: u32,
        stage: Option<&str>,
    ) -> Option<Estimation> {
        self.record_at(execution_id, completed_items, stage, Utc::now())
    }

    /// Record an observation with an explicit timestamp. Returns the updated
    /// estimation, or `None` for untracked executions.
    pub fn record_at(
        &self,
        execution_id: &str,
        completed_items: u32,
        stage: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> Option<Estimation> {
        let mut entry = self.states.get_mut(execution_id)?;
        let state = entry.value_mut();
        let total = state.estimation.total_items;

        state
            .points
            .push_back(progress_point(completed_items, total, timestamp));
        while state.points.len() > self.history_points {
            state.points.pop_front();
        }

        let rate = compute_rate(state.points.make_contiguous());
        if rate > 0.0 {
            let sample = RateSample {
                timestamp,
                rate,
                stage: stage.map(String::from),
            };
            state.rates.push_back(sample);
            while state.rates.len() > self.rate_points {
                state.rates.pop_front();
            }
        }

        update_estimation(&mut state.estimation, &state.rates, completed_items, timestamp);
        Some(state.estimation.clone())
    }

    /// Instantaneous rate over the recent window, items per minute.
    pub fn current_rate(&self, execution_id: &str) -> f64 {
        self.states
            .get_mut(execution_id)
            .map(|mut s| compute_rate(s.points.make_contiguous()))
            .unwrap_or(0.0)
    }

    /// Snapshot the tracker state for external readers.
    pub fn summary(&self, execution_id: &str) -> Option<ProgressSummary> {
        let state = self.states.get(execution_id)?;
        let estimation = state.estimation.clone();
        let now = Utc::now();
        let elapsed = (now - estimation.start_time).num_milliseconds() as f64 / 1000.0;

        let (estimated_total_seconds, progress_percentage) = match estimation.estimated_completion {
            Some(eta) => {
                let total = (eta - estimation.start_time).num_milliseconds() as f64 / 1000.0;
                let pct = if total > 0.0 {
                    Some((elapsed / total) * 100.0)
                } else {
                    None
                };
                (Some(total), pct)
            }
            None => (None, None),
        };

        Some(ProgressSummary {
            execution_id: execution_id.to_string(),
            current: state.points.back().cloned(),
            estimation,
            rate_statistics: rate_statistics(&state.rates),
            timing: TimingStatistics {
                start_time: state.estimation.start_time,
                elapsed_seconds: elapsed,
                elapsed_minutes: elapsed / 60.0,
                estimated_total_seconds,
                progress_percentage,
            },
            data_points: state.points.len(),
        })
    }

    /// Evaluate bottleneck conditions against the execution's running
    /// steps. Each (step, kind) pair fires once; it re-arms when a later
    /// check finds the condition no longer holds.
    pub fn detect_bottlenecks(
        &self,
        execution_id: &str,
        steps: &[StepRecord],
    ) -> Vec<BottleneckSignal> {
        let now = Utc::now();
        let mut state = match self.states.get_mut(execution_id) {
            Some(state) => state,
            None => return Vec::new(),
        };

        let mut signals = Vec::new();
        for step in steps {
            for kind in [
                BottleneckKind::SlowProcessing,
                BottleneckKind::HighErrorRate,
                BottleneckKind::Stuck,
            ] {
                let key = (step.name.clone(), kind);
                match check_step(step, kind, now) {
                    Some(signal) => {
                        if state.emitted.insert(key) {
                            signals.push(signal);
                        }
                    }
                    None => {
                        state.emitted.remove(&key);
                    }
                }
            }
        }
        signals
    }

    /// Drop all state for an execution.
    pub fn stop_tracking(&self, execution_id: &str) {
        self.states.remove(execution_id);
    }

    /// Purge executions that started more than 24 hours ago.
    pub fn sweep(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::seconds(SWEEP_AFTER_SECS);
        let before = self.states.len();
        self.states
            .retain(|_, state| state.estimation.start_time >= cutoff);
        before - self.states.len()
    }

    pub fn is_tracking(&self, execution_id: &str) -> bool {
        self.states.contains_key(execution_id)
    }
}

fn progress_point(completed: u32, total: u32, timestamp: DateTime<Utc>) -> ProgressPoint {
    ProgressPoint {
        timestamp,
        completed,
        total,
        percentage: if total > 0 {
            (completed as f64 / total as f64) * 100.0
        } else {
            0.0
        },
    }
}

/// Rate over the last `RATE_WINDOW_POINTS` points, items per minute.
/// Never negative; zero when fewer than two points exist.
pub fn compute_rate(points: &[ProgressPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let window = &points[points.len().saturating_sub(RATE_WINDOW_POINTS)..];
    let first = &window[0];
    let last = &window[window.len() - 1];

    let seconds = (last.timestamp - first.timestamp).num_milliseconds() as f64 / 1000.0;
    if seconds <= 0.0 {
        return 0.0;
    }
    let items = last.completed as f64 - first.completed as f64;
    ((items / seconds) * 60.0).max(0.0)
}

/// Linearly weighted average: the newest sample weighs `n`, the oldest 1.
pub fn weighted_average_rate(rates: &VecDeque<RateSample>) -> f64 {
    if rates.is_empty() {
        return 0.0;
    }
    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;
    for (i, sample) in rates.iter().enumerate() {
        let weight = (i + 1) as f64;
        weighted_sum += sample.rate * weight;
        total_weight += weight;
    }
    weighted_sum / total_weight
}

/// Confidence in the estimate, in [0, 1]. Below three samples the rate is
/// too noisy to score, so a flat 0.3 is returned. Otherwise confidence is
/// `1 − cv` (coefficient of variation) plus a data-density bonus of up to
/// 0.2 at fifty samples.
pub fn confidence(rates: &VecDeque<RateSample>) -> f64 {
    if rates.len() < 3 {
        return 0.3;
    }
    let values: Vec<f64> = rates.iter().map(|r| r.rate).collect();
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    if mean == 0.0 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    let cv = variance.sqrt() / mean;

    let base = (1.0 - cv).max(0.0);
    let bonus = (rates.len() as f64 / 50.0).min(0.2);
    (base + bonus).min(1.0)
}

fn update_estimation(
    estimation: &mut Estimation,
    rates: &VecDeque<RateSample>,
    completed_items: u32,
    now: DateTime<Utc>,
) {
    let remaining = estimation.total_items.saturating_sub(completed_items);
    estimation.remaining_items = remaining;

    if remaining == 0 {
        estimation.estimated_completion = Some(now);
        estimation.estimated_minutes_remaining = 0.0;
        estimation.confidence = 1.0;
        return;
    }
    if rates.is_empty() {
        return;
    }

    let rate = weighted_average_rate(rates);
    if rate <= 0.0 {
        return;
    }

    let minutes_remaining = remaining as f64 / rate;
    estimation.current_rate = rate;
    estimation.estimated_minutes_remaining = minutes_remaining;
    estimation.estimated_completion =
        Some(now + chrono::Duration::milliseconds((minutes_remaining * 60_000.0) as i64));
    estimation.confidence = confidence(rates);
}

fn rate_statistics(rates: &VecDeque<RateSample>) -> RateStatistics {
    if rates.is_empty() {
        return RateStatistics::default();
    }
    let values: Vec<f64> = rates.iter().map(|r| r.rate).collect();
    RateStatistics {
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        average: values.iter().sum::<f64>() / values.len() as f64,
        latest: *values.last().unwrap_or(&0.0),
    }
}

/// Evaluate one bottleneck condition for one step. Pure so the thresholds
/// are directly testable.
pub fn check_step(
    step: &StepRecord,
    kind: BottleneckKind,
    now: DateTime<Utc>,
) -> Option<BottleneckSignal> {
    if step.status != StepStatus::Running {
        return None;
    }
    let started_at = step.started_at?;
    let elapsed_secs = (now - started_at).num_seconds();

    match kind {
        BottleneckKind::SlowProcessing => {
            if step.total_items == 0 || elapsed_secs <= SLOW_CHECK_AFTER_SECS {
                return None;
            }
            let expected = (elapsed_secs as f64 / 60.0) * EXPECTED_ITEMS_PER_MINUTE;
            if (step.processed_items as f64) < expected * 0.5 {
                Some(BottleneckSignal {
                    kind,
                    step_name: step.name.clone(),
                    severity: kind.severity(),
                    message: format!("Step '{}' is processing slower than expected", step.name),
                    details: json!({
                        "elapsed_minutes": elapsed_secs as f64 / 60.0,
                        "items_processed": step.processed_items,
                        "expected_items": expected,
                        "processing_rate": step.processing_rate,
                    }),
                })
            } else {
                None
            }
        }
        BottleneckKind::HighErrorRate => {
            if step.processed_items <= 10 {
                return None;
            }
            let error_rate = step.failed_items as f64 / step.processed_items as f64;
            if error_rate > ERROR_RATE_THRESHOLD {
                Some(BottleneckSignal {
                    kind,
                    step_name: step.name.clone(),
                    severity: kind.severity(),
                    message: format!(
                        "Step '{}' has high error rate ({:.1}%)",
                        step.name,
                        error_rate * 100.0
                    ),
                    details: json!({
                        "error_rate": error_rate,
                        "failed_items": step.failed_items,
                        "processed_items": step.processed_items,
                    }),
                })
            } else {
                None
            }
        }
        BottleneckKind::Stuck => {
            if elapsed_secs > STUCK_AFTER_SECS && step.processed_items == 0 {
                Some(BottleneckSignal {
                    kind,
                    step_name: step.name.clone(),
                    severity: kind.severity(),
                    message: format!(
                        "Step '{}' has made no progress for {} minutes",
                        step.name,
                        elapsed_secs / 60
                    ),
                    details: json!({
                        "elapsed_minutes": elapsed_secs as f64 / 60.0,
                        "items_processed": 0,
                    }),
                })
            } else {
                None
            }
        }
    }
}

/// Per-step progress view derived from the persisted record.
pub fn step_progress(step: &StepRecord) -> Value {
    let percentage = if step.total_items > 0 {
        (step.processed_items as f64 / step.total_items as f64) * 100.0
    } else {
        0.0
    };
    json!({
        "step_name": step.name,
        "status": step.status.as_str(),
        "progress_percentage": percentage,
        "processed_items": step.processed_items,
        "total_items": step.total_items,
        "succeeded_items": step.succeeded_items,
        "failed_items": step.failed_items,
        "processing_rate": step.processing_rate,
        "duration_seconds": step.duration_seconds,
    })
}

/// Per-item progress over the three item-visible stage kinds.
pub fn item_progress(items: &[ItemResult]) -> Vec<Value> {
    items
        .iter()
        .map(|item| {
            let stages = [
                item.sourcing_status,
                item.processing_status,
                item.registration_status,
            ];
            let completed = stages
                .iter()
                .filter(|s| **s == StepStatus::Completed)
                .count();
            json!({
                "item_id": item.item_id,
                "item_code": item.item_code,
                "progress_percentage": (completed as f64 / stages.len() as f64) * 100.0,
                "final_status": item.final_status.as_str(),
                "sourcing_status": item.sourcing_status.as_str(),
                "processing_status": item.processing_status.as_str(),
                "registration_status": item.registration_status.as_str(),
                "total_processing_time": item.total_processing_time_secs,
                "error_message": item.last_error,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StageKind;
    use chrono::Duration;

    fn tracker() -> ProgressTracker {
        ProgressTracker::new(&PipelineConfig::default())
    }

    fn point(completed: u32, total: u32, at: DateTime<Utc>) -> ProgressPoint {
        progress_point(completed, total, at)
    }

    #[test]
    fn rate_is_zero_with_fewer_than_two_points() {
        let now = Utc::now();
        assert_eq!(compute_rate(&[]), 0.0);
        assert_eq!(compute_rate(&[point(5, 10, now)]), 0.0);
    }

    #[test]
    fn rate_uses_last_five_points() {
        let start = Utc::now();
        // 1 item/second over the window => 60/min.
        let points: Vec<ProgressPoint> = (0..10)
            .map(|i| point(i, 100, start + Duration::seconds(i as i64)))
            .collect();
        let rate = compute_rate(&points);
        assert!((rate - 60.0).abs() < 1e-6);
    }

    #[test]
    fn rate_never_negative() {
        let start = Utc::now();
        let points = vec![
            point(10, 100, start),
            point(4, 100, start + Duration::seconds(10)),
        ];
        assert_eq!(compute_rate(&points), 0.0);
    }

    #[test]
    fn weighted_average_prefers_recent_samples() {
        let now = Utc::now();
        let mut rates = VecDeque::new();
        rates.push_back(RateSample { timestamp: now, rate: 10.0, stage: None });
        rates.push_back(RateSample { timestamp: now, rate: 30.0, stage: None });
        // (10*1 + 30*2) / 3 = 23.33
        let avg = weighted_average_rate(&rates);
        assert!((avg - 70.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn confidence_bounds() {
        let now = Utc::now();
        let mut rates = VecDeque::new();
        assert_eq!(confidence(&rates), 0.3);

        for _ in 0..10 {
            rates.push_back(RateSample { timestamp: now, rate: 600.0, stage: None });
        }
        let c = confidence(&rates);
        assert!(c >= 0.7 && c <= 1.0);

        // Wildly varying rates drive confidence down.
        let mut noisy = VecDeque::new();
        for rate in [1.0, 500.0, 2.0, 400.0, 3.0] {
            noisy.push_back(RateSample { timestamp: now, rate, stage: None });
        }
        assert!(confidence(&noisy) < 0.5);
    }

    #[test]
    fn eta_converges_on_steady_rate() {
        let tracker = tracker();
        tracker.start_tracking("wf-1", 1000);

        // 600 items/min observed: +10 items per second.
        let start = Utc::now();
        let mut estimation = None;
        for i in 1..=20u32 {
            estimation = tracker.record_at(
                "wf-1",
                i * 10,
                Some("multi_platform_registration"),
                start + Duration::seconds(i as i64),
            );
        }
        let estimation = estimation.unwrap();
        let remaining = 1000.0 - 200.0;
        let expected_minutes = remaining / 600.0;
        assert!(
            (estimation.estimated_minutes_remaining - expected_minutes).abs() < 0.2,
            "estimated {} expected {}",
            estimation.estimated_minutes_remaining,
            expected_minutes
        );
        assert!(estimation.confidence >= 0.7);
        assert!(estimation.estimated_completion.is_some());
    }

    #[test]
    fn finished_execution_estimates_now_with_full_confidence() {
        let tracker = tracker();
        tracker.start_tracking("wf-1", 5);
        let estimation = tracker
            .record_at("wf-1", 5, None, Utc::now() + Duration::seconds(1))
            .unwrap();
        assert_eq!(estimation.remaining_items, 0);
        assert_eq!(estimation.confidence, 1.0);
    }

    #[test]
    fn record_on_untracked_execution_is_ignored() {
        let tracker = tracker();
        assert!(tracker.record("ghost", 5, None).is_none());
    }

    #[test]
    fn summary_snapshots_buffers() {
        let tracker = tracker();
        tracker.start_tracking("wf-1", 100);
        let start = Utc::now();
        for i in 1..=5u32 {
            tracker.record_at("wf-1", i * 2, None, start + Duration::seconds(i as i64));
        }
        let summary = tracker.summary("wf-1").unwrap();
        assert_eq!(summary.current.as_ref().unwrap().completed, 10);
        assert_eq!(summary.data_points, 6);
        assert!(summary.rate_statistics.latest > 0.0);
        assert!(tracker.summary("ghost").is_none());
    }

    #[test]
    fn stop_and_sweep_drop_state() {
        let tracker = tracker();
        tracker.start_tracking("wf-1", 10);
        assert!(tracker.is_tracking("wf-1"));
        tracker.stop_tracking("wf-1");
        assert!(!tracker.is_tracking("wf-1"));

        tracker.start_tracking("wf-2", 10);
        assert_eq!(tracker.sweep(), 0);
    }

    fn running_step(
        name: &str,
        started_secs_ago: i64,
        total: u32,
        processed: u32,
        failed: u32,
    ) -> StepRecord {
        StepRecord {
            id: "step".into(),
            execution_id: "exec".into(),
            ordinal: 0,
            name: name.into(),
            kind: StageKind::Registration,
            status: StepStatus::Running,
            started_at: Some(Utc::now() - Duration::seconds(started_secs_ago)),
            completed_at: None,
            duration_seconds: None,
            total_items: total,
            processed_items: processed,
            succeeded_items: processed - failed,
            failed_items: failed,
            config: json!({}),
            results: None,
            error_details: None,
            processing_rate: 0.0,
        }
    }

    #[test]
    fn slow_processing_detected_after_five_minutes() {
        let now = Utc::now();
        // 6 minutes in, 5 of an expected ~60 items processed.
        let step = running_step("s", 360, 100, 5, 0);
        let signal = check_step(&step, BottleneckKind::SlowProcessing, now).unwrap();
        assert_eq!(signal.severity, AlertSeverity::Medium);

        // Fast enough: no signal.
        let ok = running_step("s", 360, 100, 50, 0);
        assert!(check_step(&ok, BottleneckKind::SlowProcessing, now).is_none());

        // Too early to judge.
        let early = running_step("s", 60, 100, 0, 0);
        assert!(check_step(&early, BottleneckKind::SlowProcessing, now).is_none());
    }

    #[test]
    fn high_error_rate_detected_above_twenty_percent() {
        let now = Utc::now();
        let step = running_step("s", 120, 100, 20, 5);
        let signal = check_step(&step, BottleneckKind::HighErrorRate, now).unwrap();
        assert_eq!(signal.severity, AlertSeverity::High);

        // Not enough processed items to judge.
        let few = running_step("s", 120, 100, 10, 9);
        assert!(check_step(&few, BottleneckKind::HighErrorRate, now).is_none());
    }

    #[test]
    fn stuck_step_detected_after_thirty_minutes() {
        let now = Utc::now();
        let step = running_step("s", 1900, 100, 0, 0);
        let signal = check_step(&step, BottleneckKind::Stuck, now).unwrap();
        assert_eq!(signal.severity, AlertSeverity::Critical);

        let moving = running_step("s", 1900, 100, 1, 0);
        assert!(check_step(&moving, BottleneckKind::Stuck, now).is_none());
    }

    #[test]
    fn bottleneck_signals_fire_once_until_condition_changes() {
        let tracker = tracker();
        tracker.start_tracking("wf-1", 100);

        let slow = running_step("reg", 360, 100, 5, 0);
        let first = tracker.detect_bottlenecks("wf-1", std::slice::from_ref(&slow));
        assert_eq!(first.len(), 1);

        // Same condition again: deduplicated.
        let second = tracker.detect_bottlenecks("wf-1", std::slice::from_ref(&slow));
        assert!(second.is_empty());

        // Condition clears, then recurs: fires again.
        let recovered = running_step("reg", 360, 100, 90, 0);
        assert!(tracker
            .detect_bottlenecks("wf-1", std::slice::from_ref(&recovered))
            .is_empty());
        let relapsed = tracker.detect_bottlenecks("wf-1", std::slice::from_ref(&slow));
        assert_eq!(relapsed.len(), 1);
    }

    #[test]
    fn zero_item_step_emits_no_bottlenecks() {
        let tracker = tracker();
        tracker.start_tracking("wf-1", 0);
        let step = running_step("s", 360, 0, 0, 0);
        // Slow-processing requires items; stuck requires 30 minutes.
        assert!(tracker
            .detect_bottlenecks("wf-1", std::slice::from_ref(&step))
            .is_empty());
    }

    #[test]
    fn item_progress_counts_completed_stages() {
        let mut item = ItemResult {
            id: "ir".into(),
            execution_id: Some("e".into()),
            batch_id: None,
            item_id: "item-1".into(),
            item_code: None,
            item: None,
            sourcing_status: StepStatus::Completed,
            processing_status: StepStatus::Completed,
            registration_status: StepStatus::Pending,
            sourcing_completed_at: None,
            processing_completed_at: None,
            registration_completed_at: None,
            sourcing_artifacts: None,
            processing_artifacts: None,
            registration_artifacts: None,
            final_status: crate::model::RegistrationState::Pending,
            last_error: None,
            total_processing_time_secs: None,
        };
        let progress = item_progress(std::slice::from_ref(&item));
        assert!((progress[0]["progress_percentage"].as_f64().unwrap() - 66.66).abs() < 1.0);

        item.registration_status = StepStatus::Completed;
        let progress = item_progress(&[item]);
        assert_eq!(progress[0]["progress_percentage"].as_f64().unwrap(), 100.0);
    }
}
