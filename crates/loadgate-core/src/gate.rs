//! Quality gate aggregation: per-threshold outcomes to verdict, score and grade.

use crate::error::ConfigError;
use crate::metrics::MetricKind;
use crate::threshold::{Comparator, ThresholdEvaluation, ThresholdSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Scoring bucket of a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateCategory {
    /// Response time.
    Latency,
    /// Failure fraction.
    ErrorRate,
    /// Work completed per unit of time.
    Throughput,
    /// Everything else.
    Availability,
}

impl GateCategory {
    /// All categories in weight order.
    pub const ALL: [GateCategory; 4] = [
        Self::Latency,
        Self::ErrorRate,
        Self::Throughput,
        Self::Availability,
    ];

    /// Category implied by a metric's name and kind.
    #[must_use]
    pub fn infer(metric: &str, kind: Option<MetricKind>) -> Self {
        let lower = metric.to_ascii_lowercase();
        let sounds_like_errors = lower.contains("fail") || lower.contains("error");
        match kind {
            Some(MetricKind::Trend) => Self::Latency,
            Some(MetricKind::Counter) => Self::Throughput,
            Some(MetricKind::Rate) | None if sounds_like_errors => Self::ErrorRate,
            _ => Self::Availability,
        }
    }
}

impl fmt::Display for GateCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Latency => "latency",
            Self::ErrorRate => "error_rate",
            Self::Throughput => "throughput",
            Self::Availability => "availability",
        })
    }
}

/// Relative weight of each category in the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateWeights {
    /// Latency weight.
    pub latency: f64,
    /// Error rate weight.
    pub error_rate: f64,
    /// Throughput weight.
    pub throughput: f64,
    /// Availability weight.
    pub availability: f64,
}

impl Default for GateWeights {
    fn default() -> Self {
        Self {
            latency: 0.4,
            error_rate: 0.3,
            throughput: 0.2,
            availability: 0.1,
        }
    }
}

impl GateWeights {
    /// Weight of one category.
    #[must_use]
    pub fn get(&self, category: GateCategory) -> f64 {
        match category {
            GateCategory::Latency => self.latency,
            GateCategory::ErrorRate => self.error_rate,
            GateCategory::Throughput => self.throughput,
            GateCategory::Availability => self.availability,
        }
    }

    /// Rejects negative or non-finite weights and an all-zero set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidWeights`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        for category in GateCategory::ALL {
            let weight = self.get(category);
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::InvalidWeights(format!(
                    "{category} weight must be a non-negative number, got {weight}"
                )));
            }
        }
        if GateCategory::ALL.iter().map(|c| self.get(*c)).sum::<f64>() <= 0.0 {
            return Err(ConfigError::InvalidWeights(
                "at least one weight must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Letter grade of a composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    /// 90 and above.
    A,
    /// 80 to 90.
    B,
    /// 70 to 80.
    C,
    /// 60 to 70.
    D,
    /// Below 60.
    F,
}

impl Grade {
    /// Buckets a 0-100 score.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 90.0 => Self::A,
            s if s >= 80.0 => Self::B,
            s if s >= 70.0 => Self::C,
            s if s >= 60.0 => Self::D,
            _ => Self::F,
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Normalised 0-100 score of `observed` against a comparator.
///
/// Satisfied conditions score 100. A violated upper bound loses one point per
/// percent of overshoot; a violated lower bound scores the achieved fraction
/// of the bound. Non-positive bounds that are violated score 0.
#[must_use]
pub fn score(comparator: &Comparator, observed: f64) -> f64 {
    if comparator.holds(observed) {
        return 100.0;
    }
    let bound = comparator.bound;
    if bound <= 0.0 {
        return 0.0;
    }

    let raw = if comparator.operator.is_upper_bound() {
        100.0 * (1.0 - (observed - bound) / bound)
    } else {
        100.0 * observed / bound
    };
    raw.clamp(0.0, 100.0)
}

/// Overall decision derived from every threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGateResult {
    /// No threshold was violated and the run was not aborted.
    pub passed: bool,
    /// An abort-on-fail threshold stopped the run.
    pub aborted: bool,
    /// Violated thresholds, in declaration order.
    pub violations: Vec<ThresholdSpec>,
    /// Weighted 0-100 score.
    pub composite_score: f64,
    /// Letter grade of the composite score.
    pub grade: Grade,
    /// Mean score of each category that had at least one observation.
    pub category_scores: BTreeMap<GateCategory, f64>,
}

/// Combines evaluations (index-aligned with `specs`) into a gate result.
///
/// `aborted_by` is the index of the spec that stopped the run, if any; it is
/// reported as a violation even when the final evaluation passes.
#[must_use]
pub fn aggregate(
    specs: &[ThresholdSpec],
    evaluations: &[ThresholdEvaluation],
    aborted_by: Option<usize>,
    weights: &GateWeights,
) -> QualityGateResult {
    let mut violations = Vec::new();
    let mut per_category: BTreeMap<GateCategory, Vec<f64>> = BTreeMap::new();

    for (index, (spec, evaluation)) in specs.iter().zip(evaluations).enumerate() {
        if !evaluation.ok || aborted_by == Some(index) {
            violations.push(spec.clone());
        }
        if let Some(score) = evaluation.score(&spec.comparator) {
            per_category
                .entry(evaluation.category)
                .or_default()
                .push(score);
        }
    }

    let category_scores: BTreeMap<GateCategory, f64> = per_category
        .into_iter()
        .map(|(category, scores)| {
            let mean = scores.iter().sum::<f64>() / scores.len() as f64;
            (category, mean)
        })
        .collect();

    let composite_score = composite(&category_scores, weights);

    QualityGateResult {
        passed: violations.is_empty(),
        aborted: aborted_by.is_some(),
        violations,
        composite_score,
        grade: Grade::from_score(composite_score),
        category_scores,
    }
}

fn composite(category_scores: &BTreeMap<GateCategory, f64>, weights: &GateWeights) -> f64 {
    if category_scores.is_empty() {
        return 100.0;
    }

    let total_weight: f64 = category_scores.keys().map(|c| weights.get(*c)).sum();
    if total_weight <= 0.0 {
        // Only zero-weight categories were observed.
        return category_scores.values().sum::<f64>() / category_scores.len() as f64;
    }

    let weighted: f64 = category_scores
        .iter()
        .map(|(category, score)| weights.get(*category) * score)
        .sum();
    (weighted / total_weight).clamp(0.0, 100.0)
}

/// CI-facing outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateVerdict {
    /// Every threshold held.
    Pass,
    /// Some thresholds failed but the run completed with a passing grade.
    Unstable,
    /// Aborted, or graded F.
    Fail,
}

impl GateVerdict {
    /// Verdict of a gate result.
    #[must_use]
    pub fn of(result: &QualityGateResult) -> Self {
        if result.passed {
            Self::Pass
        } else if result.aborted || result.grade == Grade::F {
            Self::Fail
        } else {
            Self::Unstable
        }
    }

    /// Process exit code for CI.
    #[must_use]
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Pass => 0,
            Self::Fail => 1,
            Self::Unstable => 2,
        }
    }
}

impl fmt::Display for GateVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pass => "pass",
            Self::Unstable => "unstable",
            Self::Fail => "fail",
        })
    }
}
