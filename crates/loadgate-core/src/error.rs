use thiserror::Error;

/// Configuration problems detected while resolving a run plan.
///
/// Every variant is fatal before any worker is spawned; messages name the
/// offending stage, metric key or expression so the user can fix the file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A stage of the load profile is malformed.
    #[error("stage {index}: {message}")]
    InvalidStage {
        /// Zero-based position of the stage in the profile.
        index: usize,
        /// What is wrong with it.
        message: String,
    },

    /// A duration value could not be parsed or is negative.
    #[error("invalid duration `{value}`: {message}")]
    InvalidDuration {
        /// Raw value as written in the configuration.
        value: String,
        /// Parser explanation.
        message: String,
    },

    /// A threshold expression is syntactically invalid.
    #[error("threshold `{metric_key}`: cannot parse `{expression}`: {message}")]
    InvalidThreshold {
        /// Metric key the threshold belongs to (e.g. `http_req_failed{phase:spike}`).
        metric_key: String,
        /// Expression text (e.g. `p(95)<500`).
        expression: String,
        /// Parser explanation.
        message: String,
    },

    /// A threshold names a statistic that does not exist.
    #[error("threshold `{metric_key}`: unknown statistic `{statistic}`")]
    UnknownStatistic {
        /// Metric key the threshold belongs to.
        metric_key: String,
        /// Statistic as written.
        statistic: String,
    },

    /// A `p(N)` statistic with N outside the open interval (0, 100).
    #[error("threshold `{metric_key}`: percentile {value} must lie strictly between 0 and 100")]
    PercentileOutOfRange {
        /// Metric key the threshold belongs to.
        metric_key: String,
        /// Requested percentile.
        value: f64,
    },

    /// A threshold refers to a metric that was never declared.
    #[error("threshold `{metric_key}`: metric `{metric}` is not declared")]
    UnknownMetric {
        /// Metric key the threshold belongs to.
        metric_key: String,
        /// Bare metric name.
        metric: String,
    },

    /// A threshold asks for a statistic the metric kind cannot provide.
    #[error("threshold `{metric_key}`: statistic `{statistic}` is not available for {kind} metric `{metric}`")]
    IncompatibleStatistic {
        /// Metric key the threshold belongs to.
        metric_key: String,
        /// Bare metric name.
        metric: String,
        /// Metric kind name.
        kind: String,
        /// Statistic as displayed.
        statistic: String,
    },

    /// A metric name was declared twice with different kinds.
    #[error("metric `{name}` is already declared as {existing}, cannot redeclare it as {requested}")]
    MetricKindConflict {
        /// Metric name.
        name: String,
        /// Kind it was first declared with.
        existing: String,
        /// Kind of the conflicting declaration.
        requested: String,
    },

    /// Quality gate category weights are unusable.
    #[error("invalid gate weights: {0}")]
    InvalidWeights(String),

    /// A phase classification rule is malformed.
    #[error("phase rule {index} (`{tag}`): {message}")]
    InvalidPhaseRule {
        /// Zero-based position of the rule.
        index: usize,
        /// Tag the rule assigns.
        tag: String,
        /// What is wrong with it.
        message: String,
    },

    /// The behavior mix cannot drive any worker.
    #[error("invalid behavior mix: {0}")]
    InvalidBehavior(String),

    /// Recovery classification bounds are not ascending.
    #[error("invalid recovery thresholds: {0}")]
    InvalidRecovery(String),

    /// Error surfaced by the layered configuration loader.
    #[error("configuration error: {0}")]
    Load(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        Self::Load(err.to_string())
    }
}

/// Canonical error type for loadgate core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The run configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Metric state could not be combined.
    #[error("metric error: {0}")]
    Metric(String),

    /// I/O error while reading or writing artifacts.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error occurred.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error occurred.
    #[error("deserialization error: {0}")]
    DeserializationError(String),
}

impl CoreError {
    /// Creates a `Metric` variant.
    #[must_use]
    pub fn metric(message: impl Into<String>) -> Self {
        Self::Metric(message.into())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_eof() || err.is_syntax() || err.is_data() {
            Self::DeserializationError(err.to_string())
        } else {
            Self::SerializationError(err.to_string())
        }
    }
}

/// Convenient result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
