//! Streaming distribution used by trend metrics.
//!
//! Values are scaled to thousandths and recorded into two HDR histograms
//! (non-negative values and magnitudes of negative values) with three
//! significant digits. Percentile queries therefore carry a relative error of
//! at most 0.1% for |value| >= 1, and every result is clamped into the exact
//! `[min, max]` range so a constant series reports its value exactly.
//!
//! `count`, `min`, `max` and the fixed-point sum are exact. All of them merge
//! associatively and commutatively, which makes the digest independent of the
//! order in which shards are combined.

use hdrhistogram::Histogram;

/// Resolution of the histograms: values are stored in thousandths.
const VALUE_SCALE: f64 = 1_000.0;

/// Resolution of the exact sum: values are accumulated in millionths.
const SUM_SCALE: f64 = 1_000_000.0;

/// Significant decimal digits kept by the histograms.
const SIGNIFICANT_DIGITS: u8 = 3;

fn new_histogram() -> Option<Histogram<u64>> {
    Histogram::new(SIGNIFICANT_DIGITS).ok()
}

fn merge_into(target: &mut Option<Histogram<u64>>, source: &Option<Histogram<u64>>) -> Result<(), String> {
    match (target.as_mut(), source) {
        (_, None) => Ok(()),
        (Some(target), Some(source)) => target.add(source).map_err(|e| format!("{e:?}")),
        (None, Some(source)) => {
            *target = Some(source.clone());
            Ok(())
        }
    }
}

/// Walks a histogram to the bucket holding the `rank`-th smallest value (1-based).
fn nth_smallest(hist: &Histogram<u64>, rank: u64) -> Option<u64> {
    let mut seen = 0u64;
    for step in hist.iter_recorded() {
        seen += step.count_at_value();
        if seen >= rank {
            return Some(step.value_iterated_to());
        }
    }
    None
}

/// Mergeable distribution summary for a trend metric.
///
/// Histograms are allocated on first use, so empty series stay cheap.
#[derive(Debug, Clone)]
pub struct TrendDigest {
    positive: Option<Histogram<u64>>,
    negative: Option<Histogram<u64>>,
    count: u64,
    sum_micros: i128,
    min: f64,
    max: f64,
}

impl Default for TrendDigest {
    fn default() -> Self {
        Self::new()
    }
}

impl TrendDigest {
    /// Creates an empty digest.
    #[must_use]
    pub fn new() -> Self {
        Self {
            positive: None,
            negative: None,
            count: 0,
            sum_micros: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    /// Records one value.
    ///
    /// Returns false, leaving the digest untouched, when the value is not
    /// finite or lies beyond the histogram's trackable range.
    pub fn record(&mut self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }

        let scaled = (value.abs() * VALUE_SCALE).round();
        if scaled >= i64::MAX as f64 {
            return false;
        }
        let scaled = scaled as u64;

        let slot = if value < 0.0 {
            &mut self.negative
        } else {
            &mut self.positive
        };
        if slot.is_none() {
            *slot = new_histogram();
        }
        let recorded = slot.as_mut().map_or(false, |hist| hist.record(scaled).is_ok());
        if !recorded {
            return false;
        }

        self.count += 1;
        self.sum_micros += (value * SUM_SCALE).round() as i128;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        true
    }

    /// Folds another digest into this one.
    ///
    /// # Errors
    ///
    /// Returns the histogram error text if the buckets cannot be combined.
    pub fn merge(&mut self, other: &TrendDigest) -> Result<(), String> {
        if other.count == 0 {
            return Ok(());
        }
        merge_into(&mut self.positive, &other.positive)?;
        merge_into(&mut self.negative, &other.negative)?;
        self.count += other.count;
        self.sum_micros += other.sum_micros;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        Ok(())
    }

    /// Number of recorded values.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Arithmetic mean, `None` when empty.
    #[must_use]
    pub fn avg(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some(self.sum_micros as f64 / SUM_SCALE / self.count as f64)
    }

    /// Exact minimum, `None` when empty.
    #[must_use]
    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    /// Exact maximum, `None` when empty.
    #[must_use]
    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    /// Nearest-rank percentile for `pct` in (0, 100], `None` when empty.
    ///
    /// The result is non-decreasing in `pct` and never exceeds [`max`](Self::max).
    #[must_use]
    pub fn percentile(&self, pct: f64) -> Option<f64> {
        if self.count == 0 || !pct.is_finite() {
            return None;
        }

        let fraction = (pct / 100.0).clamp(0.0, 1.0);
        let rank = ((fraction * self.count as f64).ceil() as u64).clamp(1, self.count);

        let negatives = self.negative.as_ref().map_or(0, Histogram::len);
        let raw = if rank <= negatives {
            // The rank-th smallest value overall is the rank-th largest
            // negative magnitude.
            let magnitude = nth_smallest(self.negative.as_ref()?, negatives - rank + 1)?;
            -(magnitude as f64) / VALUE_SCALE
        } else {
            nth_smallest(self.positive.as_ref()?, rank - negatives)? as f64 / VALUE_SCALE
        };

        Some(raw.clamp(self.min, self.max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_digest() {
        let digest = TrendDigest::new();
        assert_eq!(digest.count(), 0);
        assert_eq!(digest.avg(), None);
        assert_eq!(digest.percentile(95.0), None);
    }

    #[test]
    fn test_constant_series_is_exact() {
        let mut digest = TrendDigest::new();
        for _ in 0..100 {
            assert!(digest.record(200.0));
        }

        assert_eq!(digest.avg(), Some(200.0));
        assert_eq!(digest.min(), Some(200.0));
        assert_eq!(digest.max(), Some(200.0));
        assert_eq!(digest.percentile(95.0), Some(200.0));
    }

    #[test]
    fn test_percentiles_within_error_bound() {
        let mut digest = TrendDigest::new();
        for i in 1..=1000 {
            digest.record(f64::from(i));
        }

        let p50 = digest.percentile(50.0).unwrap();
        let p99 = digest.percentile(99.0).unwrap();
        assert!((p50 - 500.0).abs() / 500.0 < 0.001, "p50 = {p50}");
        assert!((p99 - 990.0).abs() / 990.0 < 0.001, "p99 = {p99}");
    }

    #[test]
    fn test_negative_values() {
        let mut digest = TrendDigest::new();
        for v in [-30.0, -20.0, -10.0, 10.0, 20.0] {
            digest.record(v);
        }

        assert_eq!(digest.min(), Some(-30.0));
        assert_eq!(digest.percentile(20.0), Some(-30.0));
        let p40 = digest.percentile(40.0).unwrap();
        assert!((p40 + 20.0).abs() < 0.05, "p40 = {p40}");
        assert_eq!(digest.avg(), Some(-6.0));
    }

    #[test]
    fn test_rejects_non_finite() {
        let mut digest = TrendDigest::new();
        assert!(!digest.record(f64::NAN));
        assert!(!digest.record(f64::INFINITY));
        assert_eq!(digest.count(), 0);
    }

    #[test]
    fn test_merge_matches_single_stream() {
        let mut left = TrendDigest::new();
        let mut right = TrendDigest::new();
        let mut whole = TrendDigest::new();
        for i in 0..500 {
            let v = f64::from(i) * 1.5;
            whole.record(v);
            if i % 2 == 0 {
                left.record(v);
            } else {
                right.record(v);
            }
        }

        left.merge(&right).unwrap();
        assert_eq!(left.count(), whole.count());
        assert_eq!(left.avg(), whole.avg());
        assert_eq!(left.percentile(95.0), whole.percentile(95.0));
    }
}
