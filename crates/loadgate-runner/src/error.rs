use loadgate_core::{ConfigError, CoreError};
use thiserror::Error;

/// Failures that end a run without a result artifact.
///
/// Transport errors and threshold violations are not here: they are absorbed
/// into metrics and the quality gate.
#[derive(Debug, Error)]
pub enum RunError {
    /// Core error (configuration, artifact I/O).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A worker or probe task panicked or could not be joined.
    #[error("task failed: {0}")]
    Task(String),

    /// Self-telemetry registry could not be built or encoded.
    #[error("telemetry error: {0}")]
    Telemetry(String),
}

impl From<ConfigError> for RunError {
    fn from(err: ConfigError) -> Self {
        Self::Core(CoreError::Config(err))
    }
}

impl From<prometheus::Error> for RunError {
    fn from(err: prometheus::Error) -> Self {
        Self::Telemetry(err.to_string())
    }
}

impl From<tokio::task::JoinError> for RunError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

impl RunError {
    /// Whether the run never started because the configuration is invalid.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Core(CoreError::Config(_)))
    }
}

/// Result alias for runner operations.
pub type RunResult<T> = Result<T, RunError>;
