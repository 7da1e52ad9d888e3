//! Mergeable state behind a single metric series.

use super::trend::TrendDigest;
use super::{MetricKind, Statistic};
use std::time::Duration;

/// Resolution of counter sums: values are accumulated in millionths.
const COUNTER_SCALE: f64 = 1_000_000.0;

/// Fixed-point form of a counter increment, `None` beyond the `i128` range.
fn counter_micros(value: f64) -> Option<i128> {
    let scaled = (value * COUNTER_SCALE).round();
    (scaled.abs() < i128::MAX as f64).then(|| scaled as i128)
}

/// Accumulated state for one metric series.
///
/// Every variant merges associatively and commutatively.
#[derive(Debug, Clone)]
pub enum MetricValue {
    /// Fixed-point sum plus the number of samples that produced it.
    Counter {
        /// Sum in millionths.
        sum_micros: i128,
        /// Samples recorded.
        samples: u64,
    },
    /// True and total sample counts.
    Rate {
        /// Samples with a non-zero value.
        trues: u64,
        /// All samples.
        total: u64,
    },
    /// Streaming distribution.
    Trend(TrendDigest),
    /// Last written value, resolved by timestamp.
    Gauge {
        /// Most recent value.
        value: f64,
        /// Offset at which `value` was written.
        at: Duration,
        /// Smallest value ever written.
        min: f64,
        /// Largest value ever written.
        max: f64,
        /// Samples recorded.
        samples: u64,
    },
}

impl MetricValue {
    /// Creates empty state for `kind`.
    #[must_use]
    pub fn empty(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Self::Counter {
                sum_micros: 0,
                samples: 0,
            },
            MetricKind::Rate => Self::Rate { trues: 0, total: 0 },
            MetricKind::Trend => Self::Trend(TrendDigest::new()),
            MetricKind::Gauge => Self::Gauge {
                value: 0.0,
                at: Duration::ZERO,
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
                samples: 0,
            },
        }
    }

    /// Kind of this state.
    #[must_use]
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Counter { .. } => MetricKind::Counter,
            Self::Rate { .. } => MetricKind::Rate,
            Self::Trend(_) => MetricKind::Trend,
            Self::Gauge { .. } => MetricKind::Gauge,
        }
    }

    /// Number of samples folded into this state.
    #[must_use]
    pub fn samples(&self) -> u64 {
        match self {
            Self::Counter { samples, .. } | Self::Gauge { samples, .. } => *samples,
            Self::Rate { total, .. } => *total,
            Self::Trend(digest) => digest.count(),
        }
    }

    /// Records one finite value observed at offset `at`.
    ///
    /// Returns false, leaving the state untouched, when the value was
    /// rejected. Counter increments that would overflow the fixed-point sum
    /// are rejected too.
    pub fn record(&mut self, value: f64, at: Duration) -> bool {
        if !value.is_finite() {
            return false;
        }
        match self {
            Self::Counter {
                sum_micros,
                samples,
            } => {
                let Some(next) =
                    counter_micros(value).and_then(|micros| sum_micros.checked_add(micros))
                else {
                    return false;
                };
                *sum_micros = next;
                *samples += 1;
                true
            }
            Self::Rate { trues, total } => {
                if value != 0.0 {
                    *trues += 1;
                }
                *total += 1;
                true
            }
            Self::Trend(digest) => digest.record(value),
            Self::Gauge {
                value: last,
                at: last_at,
                min,
                max,
                samples,
            } => {
                if *samples == 0 || supersedes(at, value, *last_at, *last) {
                    *last = value;
                    *last_at = at;
                }
                *min = min.min(value);
                *max = max.max(value);
                *samples += 1;
                true
            }
        }
    }

    /// Folds `other` into this state.
    ///
    /// # Errors
    ///
    /// Fails when the kinds differ, trend buckets cannot be combined or a
    /// counter sum would overflow. The state is unchanged on failure.
    pub fn merge(&mut self, other: &MetricValue) -> Result<(), String> {
        match (self, other) {
            (
                Self::Counter {
                    sum_micros,
                    samples,
                },
                Self::Counter {
                    sum_micros: other_sum,
                    samples: other_samples,
                },
            ) => {
                *sum_micros = sum_micros
                    .checked_add(*other_sum)
                    .ok_or_else(|| "counter sum overflow".to_string())?;
                *samples += other_samples;
                Ok(())
            }
            (
                Self::Rate { trues, total },
                Self::Rate {
                    trues: other_trues,
                    total: other_total,
                },
            ) => {
                *trues += other_trues;
                *total += other_total;
                Ok(())
            }
            (Self::Trend(digest), Self::Trend(other_digest)) => digest.merge(other_digest),
            (
                Self::Gauge {
                    value,
                    at,
                    min,
                    max,
                    samples,
                },
                Self::Gauge {
                    value: other_value,
                    at: other_at,
                    min: other_min,
                    max: other_max,
                    samples: other_samples,
                },
            ) => {
                if *other_samples == 0 {
                    return Ok(());
                }
                if *samples == 0 || supersedes(*other_at, *other_value, *at, *value) {
                    *value = *other_value;
                    *at = *other_at;
                }
                *min = min.min(*other_min);
                *max = max.max(*other_max);
                *samples += other_samples;
                Ok(())
            }
            (this, other) => Err(format!(
                "cannot merge {} state into {} state",
                other.kind(),
                this.kind()
            )),
        }
    }

    /// Computes `statistic`, `None` when the state is empty or the
    /// statistic does not apply to this kind.
    ///
    /// `elapsed` is the run time used for per-second counter rates.
    #[must_use]
    pub fn statistic(&self, statistic: &Statistic, elapsed: Duration) -> Option<f64> {
        if self.samples() == 0 {
            return None;
        }
        match (self, statistic) {
            (Self::Counter { sum_micros, .. }, Statistic::Count) => {
                Some(*sum_micros as f64 / COUNTER_SCALE)
            }
            (Self::Counter { sum_micros, .. }, Statistic::Rate) => {
                let secs = elapsed.as_secs_f64();
                (secs > 0.0).then(|| *sum_micros as f64 / COUNTER_SCALE / secs)
            }
            (Self::Rate { trues, total }, Statistic::Rate) => {
                Some(*trues as f64 / *total as f64)
            }
            (Self::Rate { trues, .. }, Statistic::Count) => Some(*trues as f64),
            (Self::Trend(digest), Statistic::Avg) => digest.avg(),
            (Self::Trend(digest), Statistic::Min) => digest.min(),
            (Self::Trend(digest), Statistic::Max) => digest.max(),
            (Self::Trend(digest), Statistic::Med) => digest.percentile(50.0),
            (Self::Trend(digest), Statistic::Count) => Some(digest.count() as f64),
            (Self::Trend(digest), Statistic::Percentile(p)) => digest.percentile(*p),
            (Self::Gauge { value, .. }, Statistic::Value) => Some(*value),
            (Self::Gauge { min, .. }, Statistic::Min) => Some(*min),
            (Self::Gauge { max, .. }, Statistic::Max) => Some(*max),
            _ => None,
        }
    }
}

/// Whether a gauge write `(at, value)` replaces `(last_at, last)`.
///
/// Later writes win; simultaneous writes resolve to the larger value so the
/// outcome does not depend on merge order.
fn supersedes(at: Duration, value: f64, last_at: Duration, last: f64) -> bool {
    at > last_at || (at == last_at && value.total_cmp(&last).is_gt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_sum_and_rate() {
        let mut counter = MetricValue::empty(MetricKind::Counter);
        for _ in 0..10 {
            counter.record(1.0, Duration::ZERO);
        }

        let elapsed = Duration::from_secs(5);
        assert_eq!(counter.statistic(&Statistic::Count, elapsed), Some(10.0));
        assert_eq!(counter.statistic(&Statistic::Rate, elapsed), Some(2.0));
        assert_eq!(counter.statistic(&Statistic::Rate, Duration::ZERO), None);
    }

    #[test]
    fn test_rate_fraction() {
        let mut rate = MetricValue::empty(MetricKind::Rate);
        for i in 0..10 {
            rate.record(if i < 6 { 1.0 } else { 0.0 }, Duration::ZERO);
        }

        assert_eq!(rate.statistic(&Statistic::Rate, Duration::ZERO), Some(0.6));
        assert_eq!(rate.statistic(&Statistic::Count, Duration::ZERO), Some(6.0));
    }

    #[test]
    fn test_gauge_last_write_wins() {
        let mut gauge = MetricValue::empty(MetricKind::Gauge);
        gauge.record(5.0, Duration::from_secs(2));
        gauge.record(9.0, Duration::from_secs(1));

        assert_eq!(gauge.statistic(&Statistic::Value, Duration::ZERO), Some(5.0));
        assert_eq!(gauge.statistic(&Statistic::Max, Duration::ZERO), Some(9.0));
    }

    #[test]
    fn test_gauge_merge_is_order_independent() {
        let mut a = MetricValue::empty(MetricKind::Gauge);
        a.record(3.0, Duration::from_secs(4));
        let mut b = MetricValue::empty(MetricKind::Gauge);
        b.record(7.0, Duration::from_secs(4));

        let mut ab = a.clone();
        ab.merge(&b).unwrap();
        let mut ba = b.clone();
        ba.merge(&a).unwrap();

        assert_eq!(
            ab.statistic(&Statistic::Value, Duration::ZERO),
            ba.statistic(&Statistic::Value, Duration::ZERO)
        );
    }

    #[test]
    fn test_merge_kind_mismatch() {
        let mut counter = MetricValue::empty(MetricKind::Counter);
        let rate = MetricValue::empty(MetricKind::Rate);
        assert!(counter.merge(&rate).is_err());
    }

    #[test]
    fn test_counter_rejects_overflowing_values() {
        let mut counter = MetricValue::empty(MetricKind::Counter);
        assert!(counter.record(2.0, Duration::ZERO));
        assert!(!counter.record(1e300, Duration::ZERO));
        assert!(!counter.record(-1e300, Duration::ZERO));

        for _ in 0..3 {
            assert!(counter.record(5e31, Duration::ZERO));
        }
        assert!(!counter.record(5e31, Duration::ZERO));

        assert_eq!(counter.samples(), 4);
        let count = counter.statistic(&Statistic::Count, Duration::ZERO).unwrap();
        assert!((count - 1.5e32).abs() / 1.5e32 < 1e-9);
    }

    #[test]
    fn test_counter_merge_overflow_leaves_state() {
        let mut a = MetricValue::empty(MetricKind::Counter);
        a.record(1.2e32, Duration::ZERO);
        let b = a.clone();

        assert!(a.merge(&b).is_err());
        assert_eq!(a.samples(), 1);
        let count = a.statistic(&Statistic::Count, Duration::ZERO).unwrap();
        assert!((count - 1.2e32).abs() / 1.2e32 < 1e-9);
    }

    #[test]
    fn test_empty_state_has_no_statistics() {
        let trend = MetricValue::empty(MetricKind::Trend);
        assert_eq!(trend.statistic(&Statistic::Avg, Duration::ZERO), None);
    }
}
