//! Async execution engine for loadgate.
//!
//! A [`LoadTestOrchestrator`] turns a resolved [`loadgate_core::RunPlan`] into
//! a pool of tokio tasks, one per virtual user, sized every control-loop tick
//! from the stage scheduler. Requests go through a pluggable
//! [`RequestExecutor`]; every outcome becomes samples in a per-run
//! [`loadgate_core::MetricRegistry`], and the run ends with a
//! [`loadgate_core::RunSummary`].

pub mod behavior;
pub mod error;
pub mod executor;
pub mod orchestrator;
mod pool;
pub mod probe;
pub mod telemetry;
mod worker;

pub use behavior::{Behavior, BehaviorTable, IterationContext, ScriptedBehavior};
pub use error::{RunError, RunResult};
pub use executor::{HttpRequest, HttpResponse, RequestExecutor, TransportError};
pub use orchestrator::{LoadTestOrchestrator, RunProgress};
pub use probe::run_probe;
pub use telemetry::EngineTelemetry;
