//! Immutable metric views and per-metric summaries.

use super::store::MetricStore;
use super::{MetricKind, Statistic};
use crate::sample::TagSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Point-in-time copy of a registry, safe to evaluate while the run continues.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    store: MetricStore,
    elapsed: Duration,
}

impl MetricsSnapshot {
    /// Wraps a store copy taken at `elapsed` run time.
    #[must_use]
    pub fn new(store: MetricStore, elapsed: Duration) -> Self {
        Self { store, elapsed }
    }

    /// Run time this snapshot represents.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Kind of a declared metric.
    #[must_use]
    pub fn kind(&self, metric: &str) -> Option<MetricKind> {
        self.store.kind(metric)
    }

    /// Statistic computed only over samples whose tags contain `scope`.
    ///
    /// `None` when no sample matches.
    #[must_use]
    pub fn query(&self, metric: &str, statistic: &Statistic, scope: &TagSet) -> Option<f64> {
        self.store.query(metric, statistic, scope, self.elapsed)
    }

    /// Summary of `metric` over samples matching `scope`.
    #[must_use]
    pub fn summary(&self, metric: &str, scope: &TagSet) -> Option<MetricSummary> {
        let value = self.store.scoped(metric, scope)?;
        let stat = |s: Statistic| value.statistic(&s, self.elapsed);

        Some(MetricSummary {
            kind: value.kind(),
            samples: value.samples(),
            count: stat(Statistic::Count),
            rate: stat(Statistic::Rate),
            avg: stat(Statistic::Avg),
            min: stat(Statistic::Min),
            max: stat(Statistic::Max),
            med: stat(Statistic::Med),
            p90: stat(Statistic::Percentile(90.0)),
            p95: stat(Statistic::Percentile(95.0)),
            p99: stat(Statistic::Percentile(99.0)),
            value: stat(Statistic::Value),
        })
    }

    /// Unscoped summaries of every metric that received samples.
    #[must_use]
    pub fn summaries(&self) -> BTreeMap<String, MetricSummary> {
        let scope = TagSet::new();
        self.store
            .declarations()
            .filter_map(|(name, _)| self.summary(name, &scope).map(|s| (name.to_string(), s)))
            .collect()
    }

    /// Summaries of `metric` split by each value of tag `key`.
    #[must_use]
    pub fn summaries_by_tag(&self, metric: &str, key: &str) -> BTreeMap<String, MetricSummary> {
        self.store
            .tag_values(metric, key)
            .into_iter()
            .filter_map(|value| {
                let scope = TagSet::new().with(key, value.clone());
                self.summary(metric, &scope).map(|s| (value, s))
            })
            .collect()
    }

    /// Samples rejected during the run up to this snapshot.
    #[must_use]
    pub fn dropped_samples(&self) -> u64 {
        self.store.dropped()
    }

    /// Returns true when nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

/// Final statistics of one metric, as exposed in the result artifact.
///
/// Fields that do not apply to the metric kind are omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    /// Metric kind.
    pub kind: MetricKind,
    /// Samples folded into the summary.
    pub samples: u64,
    /// Counter sum, rate true count, or trend sample count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<f64>,
    /// Rate fraction, or counter sum per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    /// Trend mean.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg: Option<f64>,
    /// Trend or gauge minimum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Trend or gauge maximum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Trend median.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub med: Option<f64>,
    /// Trend 90th percentile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p90: Option<f64>,
    /// Trend 95th percentile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p95: Option<f64>,
    /// Trend 99th percentile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p99: Option<f64>,
    /// Gauge last value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl MetricSummary {
    /// Headline statistic used for baseline comparison: trend avg, rate
    /// fraction, counter sum, gauge value.
    #[must_use]
    pub fn primary(&self) -> Option<f64> {
        match self.kind {
            MetricKind::Trend => self.avg,
            MetricKind::Rate => self.rate,
            MetricKind::Counter => self.count,
            MetricKind::Gauge => self.value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{builtin, MetricRegistry};
    use crate::sample::Sample;

    #[test]
    fn test_summary_fields_follow_kind() {
        let registry = MetricRegistry::new();
        registry.record(&Sample::new(builtin::HTTP_REQ_DURATION, 40.0));
        registry.record(&Sample::flag(builtin::HTTP_REQ_FAILED, false));

        let snapshot = registry.snapshot(Duration::from_secs(2));
        let summaries = snapshot.summaries();

        let latency = &summaries[builtin::HTTP_REQ_DURATION];
        assert_eq!(latency.kind, MetricKind::Trend);
        assert_eq!(latency.p95, Some(40.0));
        assert_eq!(latency.rate, None);

        let failed = &summaries[builtin::HTTP_REQ_FAILED];
        assert_eq!(failed.rate, Some(0.0));
        assert_eq!(failed.avg, None);

        assert!(!summaries.contains_key(builtin::VUS));
    }

    #[test]
    fn test_summaries_by_phase() {
        let registry = MetricRegistry::new();
        registry.record(&Sample::new(builtin::HTTP_REQ_DURATION, 10.0).with_tag("phase", "baseline"));
        registry.record(&Sample::new(builtin::HTTP_REQ_DURATION, 90.0).with_tag("phase", "spike"));

        let snapshot = registry.snapshot(Duration::ZERO);
        let by_phase = snapshot.summaries_by_tag(builtin::HTTP_REQ_DURATION, "phase");

        assert_eq!(by_phase.len(), 2);
        assert_eq!(by_phase["spike"].avg, Some(90.0));
        assert_eq!(by_phase["spike"].primary(), Some(90.0));
    }
}
