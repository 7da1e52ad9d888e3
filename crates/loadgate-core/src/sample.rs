//! Measurement samples and the tag sets that scope them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Ordered set of `key -> value` tags attached to a sample or a threshold scope.
///
/// Ordering is stable so a tag set can key a map of metric series.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeMap<String, String>);

impl TagSet {
    /// Creates an empty tag set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tag, replacing any previous value for the key.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts a tag in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Value for a tag key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// True when every tag of `scope` is present here with the same value.
    ///
    /// The empty scope is contained in every tag set.
    #[must_use]
    pub fn is_superset_of(&self, scope: &TagSet) -> bool {
        scope
            .0
            .iter()
            .all(|(key, value)| self.0.get(key) == Some(value))
    }

    /// Returns true when no tags are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates tags in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Renders as `{key:value,key:value}`, the form used in threshold metric keys.
impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (idx, (key, value)) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{key}:{value}")?;
        }
        f.write_str("}")
    }
}

/// One measurement emitted by a worker.
///
/// `timestamp` is the offset from run start at which the value was observed.
/// Samples are immutable once recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Metric the sample feeds.
    pub metric: String,
    /// Observed value. Rate metrics treat any non-zero value as `true`.
    pub value: f64,
    /// Tags scoping the sample (phase, behavior, status, ...).
    pub tags: TagSet,
    /// Offset from run start.
    pub timestamp: Duration,
}

impl Sample {
    /// Creates an untagged sample at offset zero.
    #[must_use]
    pub fn new(metric: impl Into<String>, value: f64) -> Self {
        Self {
            metric: metric.into(),
            value,
            tags: TagSet::new(),
            timestamp: Duration::ZERO,
        }
    }

    /// Creates a boolean sample for a rate metric.
    #[must_use]
    pub fn flag(metric: impl Into<String>, value: bool) -> Self {
        Self::new(metric, if value { 1.0 } else { 0.0 })
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key, value);
        self
    }

    /// Replaces the whole tag set.
    #[must_use]
    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags = tags;
        self
    }

    /// Sets the observation offset.
    #[must_use]
    pub fn at(mut self, timestamp: Duration) -> Self {
        self.timestamp = timestamp;
        self
    }
}
