//! Result artifact produced at the end of a run.
//!
//! [`RunSummary`] is the only thing report renderers and CI gates consume.
//! It is plain serde data written as JSON.

use crate::baseline::{BaselineComparison, BaselineSnapshot};
use crate::error::CoreResult;
use crate::gate::{GateCategory, GateVerdict, QualityGateResult};
use crate::metrics::{builtin, MetricSummary, MetricsSnapshot};
use crate::threshold::{ThresholdEvaluation, ThresholdSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

/// Metrics broken down per phase in the artifact.
pub const PHASE_METRICS: [&str; 3] = [
    builtin::HTTP_REQ_DURATION,
    builtin::HTTP_REQ_FAILED,
    builtin::HTTP_REQS,
];

/// Which threshold stopped the run, and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbortReason {
    /// Metric key of the threshold.
    pub threshold: String,
    /// Expression that failed.
    pub expression: String,
    /// Value observed by the failing check.
    pub observed: Option<f64>,
    /// Run time of the failing check, in seconds.
    pub elapsed_secs: f64,
}

/// Final outcome of one threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdReport {
    /// Metric key.
    pub metric: String,
    /// Expression.
    pub expression: String,
    /// Scoring category.
    pub category: GateCategory,
    /// Whether the threshold could stop the run.
    pub abort_on_fail: bool,
    /// Condition held (or vacuous).
    pub ok: bool,
    /// No sample matched the scope.
    pub vacuous: bool,
    /// Observed statistic.
    pub observed: Option<f64>,
    /// 0-100 score; absent when vacuous.
    pub score: Option<f64>,
}

impl ThresholdReport {
    /// Report line for a spec and its evaluation.
    #[must_use]
    pub fn new(spec: &ThresholdSpec, evaluation: &ThresholdEvaluation) -> Self {
        Self {
            metric: spec.key(),
            expression: spec.comparator.to_string(),
            category: evaluation.category,
            abort_on_fail: spec.abort_on_fail,
            ok: evaluation.ok,
            vacuous: evaluation.vacuous,
            observed: evaluation.observed,
            score: evaluation.score(&spec.comparator),
        }
    }
}

/// Signal a CI step reads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitSignal {
    /// Gate passed.
    pub passed: bool,
    /// Composite score.
    pub score: f64,
}

/// Structured summary of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run id.
    pub run_id: Uuid,
    /// Run name.
    pub name: String,
    /// Wall-clock start.
    pub started_at: DateTime<Utc>,
    /// Wall-clock end, after teardown.
    pub finished_at: DateTime<Utc>,
    /// Load phase duration in seconds (excludes baseline probes).
    pub duration_secs: f64,
    /// An abort-on-fail threshold stopped the run.
    pub aborted: bool,
    /// Details of the abort.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<AbortReason>,
    /// Last stage the scheduler reached.
    #[serde(default)]
    pub last_stage_index: Option<usize>,
    /// Final statistics per metric.
    pub metrics: BTreeMap<String, MetricSummary>,
    /// Request metrics per phase tag.
    #[serde(default)]
    pub phases: BTreeMap<String, BTreeMap<String, MetricSummary>>,
    /// Threshold outcomes in declaration order.
    pub thresholds: Vec<ThresholdReport>,
    /// Gate decision.
    pub gate: QualityGateResult,
    /// CI verdict.
    pub verdict: GateVerdict,
    /// This run's metrics as a reusable baseline.
    pub baseline: BaselineSnapshot,
    /// Pre-run probe compared with post-run probe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<BaselineComparison>,
    /// Prior run compared with this run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regression: Option<BaselineComparison>,
    /// Samples rejected as invalid or undeclared.
    pub dropped_samples: u64,
    /// Samples that arrived after the registry froze.
    #[serde(default)]
    pub late_samples: u64,
    /// CI exit signal.
    pub exit: ExitSignal,
}

impl RunSummary {
    /// Writes the summary as pretty JSON.
    ///
    /// # Errors
    ///
    /// Fails on I/O or serialization errors.
    pub fn write_json(&self, path: impl AsRef<Path>) -> CoreResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reads a summary written by [`write_json`](Self::write_json).
    ///
    /// # Errors
    ///
    /// Fails on I/O errors or malformed JSON.
    pub fn load_json(path: impl AsRef<Path>) -> CoreResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Per-phase summaries of [`PHASE_METRICS`], keyed by phase then metric.
#[must_use]
pub fn phase_breakdown(snapshot: &MetricsSnapshot) -> BTreeMap<String, BTreeMap<String, MetricSummary>> {
    let mut phases: BTreeMap<String, BTreeMap<String, MetricSummary>> = BTreeMap::new();
    for metric in PHASE_METRICS {
        for (phase, summary) in snapshot.summaries_by_tag(metric, "phase") {
            phases
                .entry(phase)
                .or_default()
                .insert(metric.to_string(), summary);
        }
    }
    phases
}
