//! Tag-partitioned metric storage shared by shards, the registry and snapshots.

use super::value::MetricValue;
use super::{MetricKind, Statistic};
use crate::error::ConfigError;
use crate::sample::{Sample, TagSet};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Metric declarations plus one [`MetricValue`] per distinct tag set.
///
/// Keeping one series per exact tag set lets scoped queries combine only the
/// series whose tags contain the requested scope.
#[derive(Debug, Clone, Default)]
pub struct MetricStore {
    kinds: BTreeMap<String, MetricKind>,
    series: BTreeMap<String, BTreeMap<TagSet, MetricValue>>,
    dropped: u64,
}

impl MetricStore {
    /// Creates an empty store with no declarations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store sharing this store's declarations.
    #[must_use]
    pub fn empty_like(&self) -> Self {
        Self {
            kinds: self.kinds.clone(),
            series: BTreeMap::new(),
            dropped: 0,
        }
    }

    /// Declares a metric. Redeclaring with the same kind is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MetricKindConflict`] when the name is bound to
    /// another kind.
    pub fn declare(&mut self, name: &str, kind: MetricKind) -> Result<(), ConfigError> {
        match self.kinds.get(name) {
            Some(existing) if *existing != kind => Err(ConfigError::MetricKindConflict {
                name: name.to_string(),
                existing: existing.to_string(),
                requested: kind.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.kinds.insert(name.to_string(), kind);
                Ok(())
            }
        }
    }

    /// Kind a metric was declared with.
    #[must_use]
    pub fn kind(&self, name: &str) -> Option<MetricKind> {
        self.kinds.get(name).copied()
    }

    /// Declared metrics in name order.
    pub fn declarations(&self) -> impl Iterator<Item = (&str, MetricKind)> {
        self.kinds.iter().map(|(name, kind)| (name.as_str(), *kind))
    }

    /// Records a sample into the series for its exact tag set.
    ///
    /// Samples for undeclared metrics and non-finite values are dropped and
    /// counted; they never touch existing state. Returns false on drop.
    pub fn record(&mut self, sample: &Sample) -> bool {
        let Some(kind) = self.kinds.get(&sample.metric).copied() else {
            self.dropped += 1;
            return false;
        };

        let series = self.series.entry(sample.metric.clone()).or_default();
        let accepted = match series.get_mut(&sample.tags) {
            Some(value) => value.record(sample.value, sample.timestamp),
            None => {
                let mut value = MetricValue::empty(kind);
                let accepted = value.record(sample.value, sample.timestamp);
                if accepted {
                    series.insert(sample.tags.clone(), value);
                }
                accepted
            }
        };

        if !accepted {
            self.dropped += 1;
        }
        accepted
    }

    /// Samples rejected so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Samples held across every series.
    #[must_use]
    pub fn sample_count(&self) -> u64 {
        self.series
            .values()
            .flat_map(BTreeMap::values)
            .map(MetricValue::samples)
            .sum()
    }

    /// Returns true when no series holds any sample.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.series.values().all(BTreeMap::is_empty)
    }

    /// Folds `other` into this store.
    ///
    /// # Errors
    ///
    /// Fails on conflicting declarations or state that cannot be combined.
    /// Series merged before the failure stay merged.
    pub fn merge(&mut self, other: &MetricStore) -> Result<(), String> {
        for (name, kind) in &other.kinds {
            self.declare(name, *kind).map_err(|e| e.to_string())?;
        }

        for (name, other_series) in &other.series {
            let series = self.series.entry(name.clone()).or_default();
            for (tags, value) in other_series {
                match series.get_mut(tags) {
                    Some(existing) => existing.merge(value)?,
                    None => {
                        series.insert(tags.clone(), value.clone());
                    }
                }
            }
        }

        self.dropped += other.dropped;
        Ok(())
    }

    /// Clears recorded series and the drop counter, keeping declarations.
    pub fn clear(&mut self) {
        self.series.clear();
        self.dropped = 0;
    }

    /// Combined state of every series of `metric` whose tags contain `scope`.
    ///
    /// Returns `None` when the metric is unknown or no series matches.
    #[must_use]
    pub fn scoped(&self, metric: &str, scope: &TagSet) -> Option<MetricValue> {
        let kind = self.kind(metric)?;
        let series = self.series.get(metric)?;

        let mut combined = MetricValue::empty(kind);
        let mut matched = false;
        for (tags, value) in series {
            if tags.is_superset_of(scope) {
                // Same-kind merges only fail if histogram buckets overflow,
                // which the auto-resizing digests rule out.
                if combined.merge(value).is_ok() {
                    matched = true;
                }
            }
        }

        (matched && combined.samples() > 0).then_some(combined)
    }

    /// Statistic over the series of `metric` matching `scope`.
    ///
    /// `None` means there were no matching samples (or the statistic does not
    /// apply to the metric kind).
    #[must_use]
    pub fn query(
        &self,
        metric: &str,
        statistic: &Statistic,
        scope: &TagSet,
        elapsed: Duration,
    ) -> Option<f64> {
        self.scoped(metric, scope)?.statistic(statistic, elapsed)
    }

    /// Distinct values of tag `key` seen on `metric`.
    #[must_use]
    pub fn tag_values(&self, metric: &str, key: &str) -> BTreeSet<String> {
        self.series
            .get(metric)
            .map(|series| {
                series
                    .keys()
                    .filter_map(|tags| tags.get(key).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}
