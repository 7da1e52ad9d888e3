//! Per-run metric registry shared by every worker.
//!
//! Workers record into a private [`MetricShard`] and periodically fold it into
//! the registry with [`MetricRegistry::absorb`], so the shared lock is taken
//! once per iteration rather than once per sample.

use super::snapshot::MetricsSnapshot;
use super::store::MetricStore;
use super::{builtin, MetricKind};
use crate::error::ConfigError;
use crate::sample::Sample;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Concurrency-safe, append-only statistics store for one run.
///
/// Created empty at run start, written by all workers, and frozen once the
/// run's final stage completes or an abort fires. Writes after
/// [`freeze`](Self::freeze) are discarded and counted as late.
#[derive(Debug)]
pub struct MetricRegistry {
    store: RwLock<MetricStore>,
    frozen: AtomicBool,
    late_samples: AtomicU64,
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricRegistry {
    /// Creates a registry with the built-in metrics declared.
    #[must_use]
    pub fn new() -> Self {
        let mut store = MetricStore::new();
        for (name, kind) in [
            (builtin::HTTP_REQS, MetricKind::Counter),
            (builtin::HTTP_REQ_DURATION, MetricKind::Trend),
            (builtin::HTTP_REQ_FAILED, MetricKind::Rate),
            (builtin::DATA_RECEIVED, MetricKind::Counter),
            (builtin::DATA_SENT, MetricKind::Counter),
            (builtin::ITERATIONS, MetricKind::Counter),
            (builtin::ITERATION_DURATION, MetricKind::Trend),
            (builtin::VUS, MetricKind::Gauge),
            (builtin::DROPPED_ITERATIONS, MetricKind::Counter),
        ] {
            // Fresh store, names are distinct.
            let _ = store.declare(name, kind);
        }

        Self {
            store: RwLock::new(store),
            frozen: AtomicBool::new(false),
            late_samples: AtomicU64::new(0),
        }
    }

    /// Declares a custom metric.
    ///
    /// # Errors
    ///
    /// Fails when the name is already bound to a different kind.
    pub fn declare(&self, name: &str, kind: MetricKind) -> Result<(), ConfigError> {
        self.store.write().declare(name, kind)
    }

    /// Kind of a declared metric.
    #[must_use]
    pub fn kind(&self, name: &str) -> Option<MetricKind> {
        self.store.read().kind(name)
    }

    /// Records a single sample directly into the shared store.
    ///
    /// Returns false when the sample was dropped.
    pub fn record(&self, sample: &Sample) -> bool {
        if self.is_frozen() {
            self.late_samples.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let accepted = self.store.write().record(sample);
        if !accepted {
            tracing::warn!(metric = %sample.metric, value = sample.value, "Dropped invalid sample");
        }
        accepted
    }

    /// Creates an empty worker-local shard with the current declarations.
    #[must_use]
    pub fn shard(&self) -> MetricShard {
        MetricShard {
            store: self.store.read().empty_like(),
        }
    }

    /// Folds a shard into the shared store and clears it.
    ///
    /// Returns false when the registry is frozen or the merge failed; the
    /// shard is cleared either way so stale samples are never re-applied.
    pub fn absorb(&self, shard: &mut MetricShard) -> bool {
        if shard.store.is_empty() && shard.store.dropped() == 0 {
            return true;
        }
        if self.is_frozen() {
            self.late_samples
                .fetch_add(shard.store.sample_count(), Ordering::Relaxed);
            shard.store.clear();
            return false;
        }

        let merged = self.store.write().merge(&shard.store);
        shard.store.clear();
        match merged {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to merge worker shard");
                false
            }
        }
    }

    /// Immutable view of everything recorded so far.
    ///
    /// `elapsed` is the run time the snapshot represents; it drives per-second
    /// counter rates.
    #[must_use]
    pub fn snapshot(&self, elapsed: Duration) -> MetricsSnapshot {
        MetricsSnapshot::new(self.store.read().clone(), elapsed)
    }

    /// Stops accepting writes.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    /// Whether [`freeze`](Self::freeze) was called.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Samples rejected as invalid or undeclared.
    #[must_use]
    pub fn dropped_samples(&self) -> u64 {
        self.store.read().dropped()
    }

    /// Writes discarded because they arrived after the freeze.
    #[must_use]
    pub fn late_samples(&self) -> u64 {
        self.late_samples.load(Ordering::Relaxed)
    }
}

/// Worker-local sample buffer, merged into a [`MetricRegistry`] on absorb.
#[derive(Debug, Clone)]
pub struct MetricShard {
    store: MetricStore,
}

impl MetricShard {
    /// Records a sample locally. Returns false when it was dropped.
    pub fn record(&mut self, sample: &Sample) -> bool {
        self.store.record(sample)
    }

    /// Declares a metric on the shard only, so it can be recorded before the
    /// next absorb carries the declaration to the registry.
    ///
    /// # Errors
    ///
    /// Fails when the name is already bound to a different kind.
    pub fn declare(&mut self, name: &str, kind: MetricKind) -> Result<(), ConfigError> {
        self.store.declare(name, kind)
    }

    /// Returns true when nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}
