//! Prometheus self-telemetry of the engine.
//!
//! These gauges describe the load generator, not the system under test. Each
//! run owns its own [`prometheus::Registry`], so concurrent runs in one
//! process never share counters.

use crate::error::RunResult;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Engine counters for one run.
#[derive(Clone)]
pub struct EngineTelemetry {
    registry: Registry,
    /// Workers currently alive.
    pub active_workers: IntGauge,
    /// Iterations completed across all workers.
    pub iterations: IntCounter,
    /// Workers cancelled after the grace period.
    pub forced_cancellations: IntCounter,
    /// Samples rejected by the metric registry.
    pub dropped_samples: IntCounter,
}

impl std::fmt::Debug for EngineTelemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineTelemetry")
            .field("active_workers", &self.active_workers.get())
            .field("iterations", &self.iterations.get())
            .field("forced_cancellations", &self.forced_cancellations.get())
            .finish()
    }
}

impl EngineTelemetry {
    /// Builds and registers the engine metrics.
    ///
    /// # Errors
    ///
    /// Fails if a metric descriptor is invalid.
    pub fn new() -> RunResult<Self> {
        let registry = Registry::new();

        let active_workers = IntGauge::new("loadgate_active_workers", "Virtual users currently running")?;
        let iterations = IntCounter::new("loadgate_iterations_total", "Iterations completed by all workers")?;
        let forced_cancellations = IntCounter::new(
            "loadgate_forced_cancellations_total",
            "Workers cancelled after the shutdown grace period",
        )?;
        let dropped_samples = IntCounter::new(
            "loadgate_dropped_samples_total",
            "Samples rejected as undeclared or non-finite",
        )?;

        registry.register(Box::new(active_workers.clone()))?;
        registry.register(Box::new(iterations.clone()))?;
        registry.register(Box::new(forced_cancellations.clone()))?;
        registry.register(Box::new(dropped_samples.clone()))?;

        Ok(Self {
            registry,
            active_workers,
            iterations,
            forced_cancellations,
            dropped_samples,
        })
    }

    /// Text exposition format of every engine metric.
    ///
    /// # Errors
    ///
    /// Fails if encoding fails or produces invalid UTF-8.
    pub fn encode(&self) -> RunResult<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| crate::error::RunError::Telemetry(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_lists_engine_metrics() {
        let telemetry = EngineTelemetry::new().unwrap();
        telemetry.active_workers.set(3);
        telemetry.iterations.inc_by(7);

        let text = telemetry.encode().unwrap();
        assert!(text.contains("loadgate_active_workers 3"));
        assert!(text.contains("loadgate_iterations_total 7"));
        assert!(text.contains("loadgate_forced_cancellations_total 0"));
    }

    #[test]
    fn test_runs_do_not_share_counters() {
        let first = EngineTelemetry::new().unwrap();
        let second = EngineTelemetry::new().unwrap();
        first.iterations.inc();
        assert_eq!(second.iterations.get(), 0);
    }
}
