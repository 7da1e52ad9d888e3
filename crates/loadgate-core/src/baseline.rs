//! Baseline snapshots and percentage-delta comparison.
//!
//! A comparison maps every metric present in both snapshots to
//! `(current - baseline) / baseline * 100`, using each metric's primary
//! statistic (see [`MetricSummary::primary`]). A zero baseline yields a null
//! delta instead of an error.
//!
//! Classification uses the delta's magnitude: a class names how far a metric
//! drifted, in either direction. Whether the drift is good or bad depends on
//! the metric (lower latency is better, more requests are better), so the
//! direction is read from the signed value in
//! [`BaselineComparison::deltas`].

use crate::error::ConfigError;
use crate::metrics::{MetricSummary, MetricsSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Reference statistics captured at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineSnapshot {
    /// Capture time.
    pub captured_at: DateTime<Utc>,
    /// Summary per metric name.
    pub metrics: BTreeMap<String, MetricSummary>,
}

impl BaselineSnapshot {
    /// Captures every metric with samples in `snapshot`.
    #[must_use]
    pub fn capture(snapshot: &MetricsSnapshot) -> Self {
        Self {
            captured_at: Utc::now(),
            metrics: snapshot.summaries(),
        }
    }

    /// Builds a snapshot from explicit summaries.
    #[must_use]
    pub fn from_metrics(metrics: BTreeMap<String, MetricSummary>) -> Self {
        Self {
            captured_at: Utc::now(),
            metrics,
        }
    }
}

/// Upper bounds, in percent, of each recovery class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryThresholds {
    /// Below this, "stable".
    pub stable: f64,
    /// Below this, "minor variation".
    pub minor: f64,
    /// Up to this, "moderate degradation"; above, "severe degradation".
    pub moderate: f64,
}

impl Default for RecoveryThresholds {
    fn default() -> Self {
        Self {
            stable: 10.0,
            minor: 25.0,
            moderate: 50.0,
        }
    }
}

impl RecoveryThresholds {
    /// Requires finite, non-negative, strictly ascending bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidRecovery`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bounds = [self.stable, self.minor, self.moderate];
        if bounds.iter().any(|b| !b.is_finite() || *b < 0.0) {
            return Err(ConfigError::InvalidRecovery(
                "bounds must be non-negative numbers".to_string(),
            ));
        }
        if !(self.stable < self.minor && self.minor < self.moderate) {
            return Err(ConfigError::InvalidRecovery(format!(
                "expected stable < minor < moderate, got {} / {} / {}",
                self.stable, self.minor, self.moderate
            )));
        }
        Ok(())
    }

    /// Class of a percent delta; `-60.0` and `+60.0` land in the same class.
    #[must_use]
    pub fn classify(&self, percent_delta: f64) -> RecoveryClass {
        let magnitude = percent_delta.abs();
        if magnitude < self.stable {
            RecoveryClass::Stable
        } else if magnitude < self.minor {
            RecoveryClass::MinorVariation
        } else if magnitude <= self.moderate {
            RecoveryClass::ModerateDegradation
        } else {
            RecoveryClass::SevereDegradation
        }
    }
}

/// Severity of the drift between two snapshots, mildest first.
///
/// Labels describe magnitude only; the "degradation" classes also cover
/// large improvements. Pair a class with its signed delta before judging it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecoveryClass {
    /// Within noise.
    #[serde(rename = "stable")]
    Stable,
    /// Small drift.
    #[serde(rename = "minor variation")]
    MinorVariation,
    /// Noticeable drift.
    #[serde(rename = "moderate degradation")]
    ModerateDegradation,
    /// Large drift.
    #[serde(rename = "severe degradation")]
    SevereDegradation,
}

impl fmt::Display for RecoveryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stable => "stable",
            Self::MinorVariation => "minor variation",
            Self::ModerateDegradation => "moderate degradation",
            Self::SevereDegradation => "severe degradation",
        })
    }
}

/// Per-metric deltas and their classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineComparison {
    /// Signed percent delta per metric; `None` when the baseline value is 0.
    /// Negative means the current value is lower than the baseline.
    pub deltas: BTreeMap<String, Option<f64>>,
    /// Class per metric with a defined delta.
    pub classes: BTreeMap<String, RecoveryClass>,
    /// Worst class over all metrics, `None` when no delta is defined.
    pub overall: Option<RecoveryClass>,
}

/// Compares snapshots under configurable class bounds.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaselineComparator {
    thresholds: RecoveryThresholds,
}

impl BaselineComparator {
    /// Creates a comparator with the given bounds.
    #[must_use]
    pub fn new(thresholds: RecoveryThresholds) -> Self {
        Self { thresholds }
    }

    /// Bounds in use.
    #[must_use]
    pub fn thresholds(&self) -> &RecoveryThresholds {
        &self.thresholds
    }

    /// Delta of every metric present in both snapshots.
    #[must_use]
    pub fn compare(&self, baseline: &BaselineSnapshot, current: &BaselineSnapshot) -> BaselineComparison {
        let mut deltas = BTreeMap::new();
        let mut classes = BTreeMap::new();

        for (name, before) in &baseline.metrics {
            let Some(after) = current.metrics.get(name) else {
                continue;
            };
            let (Some(before), Some(after)) = (before.primary(), after.primary()) else {
                continue;
            };

            let delta = percent_delta(before, after);
            if let Some(delta) = delta {
                classes.insert(name.clone(), self.thresholds.classify(delta));
            }
            deltas.insert(name.clone(), delta);
        }

        let overall = classes.values().copied().max();
        BaselineComparison {
            deltas,
            classes,
            overall,
        }
    }
}

/// `(current - baseline) / baseline * 100`, or `None` for a zero baseline.
#[must_use]
pub fn percent_delta(baseline: f64, current: f64) -> Option<f64> {
    if baseline == 0.0 {
        return None;
    }
    Some((current - baseline) / baseline * 100.0)
}
