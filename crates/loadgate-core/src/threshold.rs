//! Threshold expressions and their evaluation against metric snapshots.
//!
//! A threshold pairs a metric key with a comparator:
//!
//! ```text
//! http_req_duration                 p(95)<500
//! http_req_failed{phase:spike}      rate<0.05
//! ```
//!
//! The optional `{k:v,...}` suffix scopes the threshold to samples whose tags
//! contain every listed pair. A scope that matched no samples evaluates as a
//! vacuous pass.

use crate::duration;
use crate::error::ConfigError;
use crate::gate::GateCategory;
use crate::metrics::{MetricKind, MetricsSnapshot, Statistic};
use crate::sample::TagSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Comparison operator of a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl Operator {
    /// Whether `observed <op> bound` holds.
    #[must_use]
    pub fn holds(self, observed: f64, bound: f64) -> bool {
        match self {
            Self::Lt => observed < bound,
            Self::Le => observed <= bound,
            Self::Gt => observed > bound,
            Self::Ge => observed >= bound,
        }
    }

    /// Returns true for `<` and `<=`.
    #[must_use]
    pub fn is_upper_bound(self) -> bool {
        matches!(self, Self::Lt | Self::Le)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        })
    }
}

/// `statistic operator bound`, e.g. `p(95)<500`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Comparator {
    /// Statistic read from the metric.
    pub statistic: Statistic,
    /// Comparison.
    pub operator: Operator,
    /// Right-hand side.
    pub bound: f64,
}

impl Comparator {
    /// Whether `observed` satisfies the comparator.
    #[must_use]
    pub fn holds(&self, observed: f64) -> bool {
        self.operator.holds(observed, self.bound)
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.statistic, self.operator, self.bound)
    }
}

impl FromStr for Comparator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let position = s
            .find(['<', '>'])
            .ok_or_else(|| "expected one of `<`, `<=`, `>`, `>=`".to_string())?;
        let (lhs, rest) = s.split_at(position);

        let (operator, rhs) = if let Some(rhs) = rest.strip_prefix("<=") {
            (Operator::Le, rhs)
        } else if let Some(rhs) = rest.strip_prefix(">=") {
            (Operator::Ge, rhs)
        } else if let Some(rhs) = rest.strip_prefix('<') {
            (Operator::Lt, rhs)
        } else {
            (Operator::Gt, &rest[1..])
        };

        let lhs = lhs.trim();
        if lhs.is_empty() {
            return Err("missing statistic before operator".to_string());
        }
        let statistic: Statistic = lhs.parse()?;

        let rhs = rhs.trim();
        let bound: f64 = rhs
            .parse()
            .map_err(|_| format!("bound `{rhs}` is not a number"))?;
        if !bound.is_finite() {
            return Err(format!("bound `{rhs}` must be finite"));
        }

        Ok(Self {
            statistic,
            operator,
            bound,
        })
    }
}

impl From<Comparator> for String {
    fn from(comparator: Comparator) -> Self {
        comparator.to_string()
    }
}

impl TryFrom<String> for Comparator {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Splits `name{k:v,k2:v2}` into the metric name and its scope.
///
/// # Errors
///
/// Returns a description of the problem for empty names, unbalanced braces
/// or tag entries without a `:`.
pub fn parse_metric_key(key: &str) -> Result<(String, TagSet), String> {
    let key = key.trim();
    let (name, scope) = match key.find('{') {
        None => (key, None),
        Some(open) => {
            let inner = key[open + 1..]
                .strip_suffix('}')
                .ok_or_else(|| "tag scope must end with `}`".to_string())?;
            (&key[..open], Some(inner))
        }
    };

    let name = name.trim();
    if name.is_empty() {
        return Err("metric name is empty".to_string());
    }
    if name.contains(['{', '}']) {
        return Err("unbalanced braces in metric name".to_string());
    }

    let mut tags = TagSet::new();
    for entry in scope.into_iter().flat_map(|s| s.split(',')) {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (k, v) = entry
            .split_once(':')
            .ok_or_else(|| format!("tag `{entry}` must be written as key:value"))?;
        let k = k.trim();
        if k.is_empty() {
            return Err(format!("tag `{entry}` has an empty key"));
        }
        tags.insert(k, v.trim());
    }

    Ok((name.to_string(), tags))
}

/// One declarative pass/fail condition on a metric statistic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSpec {
    /// Bare metric name.
    pub metric: String,
    /// Tags a sample must carry to be considered.
    #[serde(default, skip_serializing_if = "TagSet::is_empty")]
    pub scope: TagSet,
    /// Condition.
    pub comparator: Comparator,
    /// Stop the run as soon as a mid-run check fails.
    #[serde(default)]
    pub abort_on_fail: bool,
    /// Run time before mid-run checks of this spec start.
    #[serde(default, with = "duration::human")]
    pub delay_abort_eval: Duration,
    /// Explicit gate category; inferred from the metric when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<GateCategory>,
}

impl ThresholdSpec {
    /// Parses a metric key and an expression into a spec.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidThreshold`] for malformed keys or
    /// expressions, [`ConfigError::UnknownStatistic`] for unknown statistics
    /// and [`ConfigError::PercentileOutOfRange`] for `p(N)` outside (0, 100).
    pub fn parse(metric_key: &str, expression: &str) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidThreshold {
            metric_key: metric_key.to_string(),
            expression: expression.to_string(),
            message,
        };

        let (metric, scope) = parse_metric_key(metric_key).map_err(invalid)?;
        let comparator: Comparator = expression.parse().map_err(|message: String| {
            if message.starts_with("unknown statistic") {
                let statistic = expression
                    .split(['<', '>'])
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_string();
                ConfigError::UnknownStatistic {
                    metric_key: metric_key.to_string(),
                    statistic,
                }
            } else {
                invalid(message)
            }
        })?;

        if let Statistic::Percentile(value) = comparator.statistic {
            if !(value > 0.0 && value < 100.0) {
                return Err(ConfigError::PercentileOutOfRange {
                    metric_key: metric_key.to_string(),
                    value,
                });
            }
        }

        Ok(Self {
            metric,
            scope,
            comparator,
            abort_on_fail: false,
            delay_abort_eval: Duration::ZERO,
            category: None,
        })
    }

    /// Marks the spec as abort-on-fail.
    #[must_use]
    pub fn abort_on_fail(mut self, abort: bool) -> Self {
        self.abort_on_fail = abort;
        self
    }

    /// Postpones mid-run checks.
    #[must_use]
    pub fn delay_abort_eval(mut self, delay: Duration) -> Self {
        self.delay_abort_eval = delay;
        self
    }

    /// Pins the gate category.
    #[must_use]
    pub fn with_category(mut self, category: GateCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Metric key as written, e.g. `http_req_failed{phase:spike}`.
    #[must_use]
    pub fn key(&self) -> String {
        if self.scope.is_empty() {
            self.metric.clone()
        } else {
            format!("{}{}", self.metric, self.scope)
        }
    }

    /// `key: expression`, for messages.
    #[must_use]
    pub fn describe(&self) -> String {
        format!("{}: {}", self.key(), self.comparator)
    }

    /// Checks the spec against the declared kind of its metric.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownMetric`] when the metric is undeclared
    /// and [`ConfigError::IncompatibleStatistic`] when the kind cannot
    /// provide the statistic.
    pub fn validate(&self, kind: Option<MetricKind>) -> Result<MetricKind, ConfigError> {
        let kind = kind.ok_or_else(|| ConfigError::UnknownMetric {
            metric_key: self.key(),
            metric: self.metric.clone(),
        })?;
        if !kind.supports(&self.comparator.statistic) {
            return Err(ConfigError::IncompatibleStatistic {
                metric_key: self.key(),
                metric: self.metric.clone(),
                kind: kind.to_string(),
                statistic: self.comparator.statistic.to_string(),
            });
        }
        Ok(kind)
    }

    /// Category used for scoring.
    #[must_use]
    pub fn category_for(&self, kind: Option<MetricKind>) -> GateCategory {
        self.category
            .unwrap_or_else(|| GateCategory::infer(&self.metric, kind))
    }

    /// Whether a mid-run check may run at `elapsed`.
    #[must_use]
    pub fn abort_check_due(&self, elapsed: Duration) -> bool {
        self.abort_on_fail && elapsed >= self.delay_abort_eval
    }
}

/// Result of evaluating one spec.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdEvaluation {
    /// Whether the condition held (always true when vacuous).
    pub ok: bool,
    /// Observed statistic; absent when no sample matched the scope.
    pub observed: Option<f64>,
    /// No sample matched the scope.
    pub vacuous: bool,
    /// Category the spec is scored under.
    pub category: GateCategory,
}

impl ThresholdEvaluation {
    /// Normalised 0-100 score of this evaluation, `None` when vacuous.
    #[must_use]
    pub fn score(&self, comparator: &Comparator) -> Option<f64> {
        self.observed
            .map(|observed| crate::gate::score(comparator, observed))
    }
}

/// Evaluates `spec` over the samples of `snapshot` that match its scope.
#[must_use]
pub fn evaluate(spec: &ThresholdSpec, snapshot: &MetricsSnapshot) -> ThresholdEvaluation {
    let kind = snapshot.kind(&spec.metric);
    let category = spec.category_for(kind);

    match snapshot.query(&spec.metric, &spec.comparator.statistic, &spec.scope) {
        Some(observed) => ThresholdEvaluation {
            ok: spec.comparator.holds(observed),
            observed: Some(observed),
            vacuous: false,
            category,
        },
        None => ThresholdEvaluation {
            ok: true,
            observed: None,
            vacuous: true,
            category,
        },
    }
}

/// Evaluates every spec, in order.
#[must_use]
pub fn evaluate_all(specs: &[ThresholdSpec], snapshot: &MetricsSnapshot) -> Vec<ThresholdEvaluation> {
    specs.iter().map(|spec| evaluate(spec, snapshot)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{builtin, MetricRegistry};
    use crate::sample::Sample;

    #[test]
    fn test_parse_comparators() {
        let c: Comparator = "p(95)<500".parse().unwrap();
        assert_eq!(c.statistic, Statistic::Percentile(95.0));
        assert_eq!(c.operator, Operator::Lt);
        assert_eq!(c.bound, 500.0);

        let c: Comparator = " rate >= 0.95 ".parse().unwrap();
        assert_eq!(c.operator, Operator::Ge);
        assert_eq!(c.bound, 0.95);

        let c: Comparator = "avg<=1e3".parse().unwrap();
        assert_eq!(c.operator, Operator::Le);
        assert_eq!(c.bound, 1000.0);

        assert!("avg == 3".parse::<Comparator>().is_err());
        assert!("<5".parse::<Comparator>().is_err());
        assert!("avg<fast".parse::<Comparator>().is_err());
    }

    #[test]
    fn test_comparator_display() {
        let c: Comparator = "p(99.9) > 2.5".parse().unwrap();
        assert_eq!(c.to_string(), "p(99.9)>2.5");
    }

    #[test]
    fn test_parse_metric_key() {
        let (name, scope) = parse_metric_key("http_req_failed{phase:spike, behavior:power}").unwrap();
        assert_eq!(name, "http_req_failed");
        assert_eq!(scope.get("phase"), Some("spike"));
        assert_eq!(scope.get("behavior"), Some("power"));

        let (name, scope) = parse_metric_key("iterations").unwrap();
        assert_eq!(name, "iterations");
        assert!(scope.is_empty());

        assert!(parse_metric_key("{phase:spike}").is_err());
        assert!(parse_metric_key("latency{phase}").is_err());
        assert!(parse_metric_key("latency{phase:spike").is_err());
    }

    #[test]
    fn test_spec_errors_are_actionable() {
        let err = ThresholdSpec::parse("http_req_duration", "p95<500").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownStatistic { ref statistic, .. } if statistic == "p95"));

        let err = ThresholdSpec::parse("http_req_duration", "p(100)<500").unwrap_err();
        assert!(matches!(err, ConfigError::PercentileOutOfRange { .. }));

        let err = ThresholdSpec::parse("http_req_duration", "avg ~ 3").unwrap_err();
        assert!(err.to_string().contains("http_req_duration"));
        assert!(err.to_string().contains("avg ~ 3"));
    }

    #[test]
    fn test_validate_against_kind() {
        let spec = ThresholdSpec::parse("http_req_failed", "p(95)<1").unwrap();
        assert!(matches!(
            spec.validate(Some(MetricKind::Rate)),
            Err(ConfigError::IncompatibleStatistic { .. })
        ));
        assert!(matches!(spec.validate(None), Err(ConfigError::UnknownMetric { .. })));

        let spec = ThresholdSpec::parse("http_req_failed", "rate<0.05").unwrap();
        assert_eq!(spec.validate(Some(MetricKind::Rate)).unwrap(), MetricKind::Rate);
    }

    #[test]
    fn test_key_round_trip() {
        let spec = ThresholdSpec::parse("http_req_failed{phase:spike}", "rate<0.05").unwrap();
        assert_eq!(spec.key(), "http_req_failed{phase:spike}");
        assert_eq!(spec.describe(), "http_req_failed{phase:spike}: rate<0.05");
    }

    #[test]
    fn test_empty_scope_is_vacuous_pass() {
        let registry = MetricRegistry::new();
        registry.record(&Sample::flag(builtin::HTTP_REQ_FAILED, true).with_tag("phase", "baseline"));

        let spec = ThresholdSpec::parse("http_req_failed{phase:spike}", "rate<0.05").unwrap();
        let eval = evaluate(&spec, &registry.snapshot(Duration::from_secs(1)));

        assert!(eval.ok);
        assert!(eval.vacuous);
        assert_eq!(eval.observed, None);
        assert_eq!(eval.category, GateCategory::ErrorRate);
    }

    #[test]
    fn test_evaluate_observes_scoped_statistic() {
        let registry = MetricRegistry::new();
        for (phase, latency) in [("baseline", 100.0), ("spike", 900.0), ("spike", 700.0)] {
            registry.record(&Sample::new(builtin::HTTP_REQ_DURATION, latency).with_tag("phase", phase));
        }
        let snapshot = registry.snapshot(Duration::from_secs(10));

        let all = ThresholdSpec::parse("http_req_duration", "max<1000").unwrap();
        let spike = ThresholdSpec::parse("http_req_duration{phase:spike}", "avg<500").unwrap();

        let evals = evaluate_all(&[all, spike], &snapshot);
        assert!(evals[0].ok);
        assert_eq!(evals[0].observed, Some(900.0));
        assert!(!evals[1].ok);
        assert_eq!(evals[1].observed, Some(800.0));
        assert_eq!(evals[1].category, GateCategory::Latency);
    }

    #[test]
    fn test_abort_check_delay() {
        let spec = ThresholdSpec::parse("http_req_failed", "rate<0.05")
            .unwrap()
            .abort_on_fail(true)
            .delay_abort_eval(Duration::from_secs(10));
        assert!(!spec.abort_check_due(Duration::from_secs(9)));
        assert!(spec.abort_check_due(Duration::from_secs(10)));

        let passive = ThresholdSpec::parse("http_req_failed", "rate<0.05").unwrap();
        assert!(!passive.abort_check_due(Duration::from_secs(100)));
    }
}
