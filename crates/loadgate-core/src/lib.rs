//! Core domain of the loadgate load-test engine.
//!
//! Everything here is synchronous and runtime-agnostic: load profiles, phase
//! tagging, metric accumulation, threshold evaluation, quality gate scoring,
//! baseline comparison, run configuration and the result artifact. The async
//! worker pool lives in `loadgate-runner`.

pub mod baseline;
pub mod config;
pub mod duration;
pub mod error;
pub mod gate;
pub mod metrics;
pub mod phase;
pub mod sample;
pub mod schedule;
pub mod summary;
pub mod threshold;

pub use baseline::{
    BaselineComparator, BaselineComparison, BaselineSnapshot, RecoveryClass, RecoveryThresholds,
};
pub use config::{
    BehaviorKind, BehaviorPlan, BehaviorSelection, BehaviorSpec, RequestTemplate, RunConfigFile,
    RunPlan,
};
pub use error::{ConfigError, CoreError, CoreResult};
pub use gate::{aggregate, GateCategory, GateVerdict, GateWeights, Grade, QualityGateResult};
pub use metrics::{
    builtin, MetricKind, MetricRegistry, MetricShard, MetricSummary, MetricsSnapshot, Statistic,
};
pub use phase::{PhaseClassifier, PhaseRule, UNCLASSIFIED};
pub use sample::{Sample, TagSet};
pub use schedule::{PhaseBoundary, Stage, StageScheduler};
pub use summary::{AbortReason, ExitSignal, RunSummary, ThresholdReport};
pub use threshold::{evaluate, evaluate_all, Comparator, Operator, ThresholdEvaluation, ThresholdSpec};
