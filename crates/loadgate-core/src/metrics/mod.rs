//! Metric accumulation for a single load test run.
//!
//! Provides:
//! - four metric kinds (counter, rate, trend, gauge) with mergeable state
//! - per-worker [`MetricShard`] buffers folded into a shared [`MetricRegistry`]
//! - immutable [`MetricsSnapshot`] views for threshold evaluation and reporting
//! - tag-scoped statistic queries over series whose tags contain a scope

pub mod registry;
pub mod snapshot;
pub mod store;
pub mod trend;
pub mod value;

pub use registry::{MetricRegistry, MetricShard};
pub use snapshot::{MetricSummary, MetricsSnapshot};
pub use store::MetricStore;
pub use trend::TrendDigest;
pub use value::MetricValue;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Names of the metrics every registry declares up front.
pub mod builtin {
    /// Counter: requests issued.
    pub const HTTP_REQS: &str = "http_reqs";
    /// Trend: request latency in milliseconds.
    pub const HTTP_REQ_DURATION: &str = "http_req_duration";
    /// Rate: fraction of requests that failed.
    pub const HTTP_REQ_FAILED: &str = "http_req_failed";
    /// Counter: response bytes.
    pub const DATA_RECEIVED: &str = "data_received";
    /// Counter: request bytes.
    pub const DATA_SENT: &str = "data_sent";
    /// Counter: completed iterations.
    pub const ITERATIONS: &str = "iterations";
    /// Trend: iteration wall time in milliseconds.
    pub const ITERATION_DURATION: &str = "iteration_duration";
    /// Gauge: live virtual workers.
    pub const VUS: &str = "vus";
    /// Counter: iterations lost to forced cancellation.
    pub const DROPPED_ITERATIONS: &str = "dropped_iterations";
}

/// The four supported metric kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Monotonically increasing sum.
    Counter,
    /// Fraction of boolean samples that are true.
    Rate,
    /// Distribution with avg/min/max/percentiles.
    Trend,
    /// Last written value.
    Gauge,
}

impl MetricKind {
    /// Returns whether `statistic` can be computed for this kind.
    #[must_use]
    pub fn supports(&self, statistic: &Statistic) -> bool {
        match self {
            Self::Counter => matches!(statistic, Statistic::Count | Statistic::Rate),
            Self::Rate => matches!(statistic, Statistic::Rate | Statistic::Count),
            Self::Trend => matches!(
                statistic,
                Statistic::Avg
                    | Statistic::Min
                    | Statistic::Max
                    | Statistic::Med
                    | Statistic::Count
                    | Statistic::Percentile(_)
            ),
            Self::Gauge => matches!(statistic, Statistic::Value | Statistic::Min | Statistic::Max),
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Counter => f.write_str("counter"),
            Self::Rate => f.write_str("rate"),
            Self::Trend => f.write_str("trend"),
            Self::Gauge => f.write_str("gauge"),
        }
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "counter" => Ok(Self::Counter),
            "rate" => Ok(Self::Rate),
            "trend" => Ok(Self::Trend),
            "gauge" => Ok(Self::Gauge),
            other => Err(format!("unknown metric kind `{other}`")),
        }
    }
}

/// Statistic a threshold can be evaluated against.
///
/// Meaning depends on the metric kind:
/// - counter: `count` is the sum, `rate` is the sum per second of run time
/// - rate: `rate` is the true fraction, `count` the number of true samples
/// - trend: `avg`, `min`, `max`, `med`, `count`, `p(N)`
/// - gauge: `value` (last written), `min`, `max`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Statistic {
    /// Arithmetic mean.
    Avg,
    /// Smallest value.
    Min,
    /// Largest value.
    Max,
    /// Median, identical to `p(50)`.
    Med,
    /// Count (see type docs for per-kind meaning).
    Count,
    /// Rate (see type docs for per-kind meaning).
    Rate,
    /// Last written gauge value.
    Value,
    /// Percentile in the open interval (0, 100).
    Percentile(f64),
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Avg => f.write_str("avg"),
            Self::Min => f.write_str("min"),
            Self::Max => f.write_str("max"),
            Self::Med => f.write_str("med"),
            Self::Count => f.write_str("count"),
            Self::Rate => f.write_str("rate"),
            Self::Value => f.write_str("value"),
            Self::Percentile(p) => write!(f, "p({p})"),
        }
    }
}

impl FromStr for Statistic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "avg" => return Ok(Self::Avg),
            "min" => return Ok(Self::Min),
            "max" => return Ok(Self::Max),
            "med" => return Ok(Self::Med),
            "count" => return Ok(Self::Count),
            "rate" => return Ok(Self::Rate),
            "value" => return Ok(Self::Value),
            _ => {}
        }

        let inner = s
            .strip_prefix("p(")
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(|| format!("unknown statistic `{s}`"))?;
        let pct: f64 = inner
            .trim()
            .parse()
            .map_err(|_| format!("unknown statistic `{s}`"))?;
        Ok(Self::Percentile(pct))
    }
}

impl From<Statistic> for String {
    fn from(statistic: Statistic) -> Self {
        statistic.to_string()
    }
}

impl TryFrom<String> for Statistic {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
