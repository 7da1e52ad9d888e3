//! Run configuration for loadgate.
//!
//! Supports:
//! - YAML, TOML or JSON files (format chosen by extension)
//! - Environment variable overrides (`LOADGATE__GRACE_PERIOD=10s`)
//! - Reasonable defaults
//! - Validation into an immutable [`RunPlan`]
//!
//! The file model ([`RunConfigFile`]) is what users write. [`RunConfigFile::resolve`]
//! checks it once and produces the [`RunPlan`] that every component of a run
//! receives by reference; nothing reads configuration after that point.

use crate::baseline::RecoveryThresholds;
use crate::duration::{self, HumanDuration};
use crate::error::ConfigError;
use crate::gate::{GateCategory, GateWeights};
use crate::metrics::{MetricKind, MetricRegistry};
use crate::phase::{PhaseClassifier, PhaseRule};
use crate::schedule::{Stage, StageScheduler};
use crate::threshold::ThresholdSpec;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Highest target concurrency a stage may request.
pub const MAX_STAGE_TARGET: u32 = 100_000;

/// Environment prefix for overrides.
pub const ENV_PREFIX: &str = "LOADGATE";

/// Run configuration as written in a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfigFile {
    /// Run name, used in logs and the artifact.
    pub name: Option<String>,
    /// Keep the last stage's target after the profile ends.
    pub hold: bool,
    /// Hard stop, independent of the profile.
    pub max_duration: Option<HumanDuration>,
    /// How long stopped workers may take to finish their iteration.
    pub grace_period: HumanDuration,
    /// Pool resize and abort-check cadence.
    pub control_loop_tick: HumanDuration,
    /// Load profile.
    pub stages: Vec<StageConfig>,
    /// Phase rules; one rule per stage window when empty.
    pub phases: Vec<PhaseRuleConfig>,
    /// Threshold declarations.
    pub thresholds: Vec<ThresholdConfig>,
    /// Composite score weights.
    pub weights: GateWeights,
    /// Baseline comparison class bounds.
    pub recovery: RecoveryThresholds,
    /// Custom metric declarations.
    pub metrics: Vec<MetricDeclaration>,
    /// Behavior mix.
    pub behaviors: BehaviorConfig,
    /// Optional pre/post baseline probe.
    pub baseline_probe: Option<BaselineProbeConfig>,
}

impl Default for RunConfigFile {
    fn default() -> Self {
        Self {
            name: None,
            hold: false,
            max_duration: None,
            grace_period: Duration::from_secs(30).into(),
            control_loop_tick: Duration::from_secs(1).into(),
            stages: Vec::new(),
            phases: Vec::new(),
            thresholds: Vec::new(),
            weights: GateWeights::default(),
            recovery: RecoveryThresholds::default(),
            metrics: Vec::new(),
            behaviors: BehaviorConfig::default(),
            baseline_probe: None,
        }
    }
}

/// One stage of the profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Stage length; `0s` is an instantaneous step.
    #[serde(default)]
    pub duration: HumanDuration,
    /// Concurrency at the end of the stage.
    pub target: u32,
    /// Phase name for the stage window.
    #[serde(default)]
    pub name: Option<String>,
}

/// Phase rule as written; exactly one of `concurrency` or `time` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRuleConfig {
    /// Tag assigned on match.
    pub tag: String,
    /// Concurrency range condition.
    #[serde(default)]
    pub concurrency: Option<ConcurrencyRange>,
    /// Time window condition.
    #[serde(default)]
    pub time: Option<TimeWindow>,
}

/// Inclusive concurrency range.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConcurrencyRange {
    /// Lower bound.
    #[serde(default)]
    pub min: u32,
    /// Upper bound; open when absent.
    #[serde(default)]
    pub max: Option<u32>,
}

/// Half-open time window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Window start.
    #[serde(default)]
    pub from: HumanDuration,
    /// Window end; open when absent.
    #[serde(default)]
    pub until: Option<HumanDuration>,
}

/// Thresholds attached to one metric key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// `name` or `name{tag:value,...}`.
    pub metric: String,
    /// Conditions on that metric.
    pub conditions: Vec<ThresholdCondition>,
}

/// A bare expression or an expression with options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdCondition {
    /// `"p(95)<500"`
    Expression(String),
    /// `{ threshold: "rate<0.05", abort_on_fail: true, ... }`
    Detailed {
        /// Expression.
        threshold: String,
        /// Stop the run on a failed mid-run check.
        #[serde(default)]
        abort_on_fail: bool,
        /// Run time before mid-run checks start.
        #[serde(default)]
        delay_abort_eval: HumanDuration,
        /// Explicit scoring category.
        #[serde(default)]
        category: Option<GateCategory>,
    },
}

/// Custom metric declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDeclaration {
    /// Metric name.
    pub name: String,
    /// Metric kind.
    pub kind: MetricKind,
}

/// Named behavior archetypes a worker can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorKind {
    /// Light browsing: one request per iteration, long pauses.
    Casual,
    /// Regular use: every request once per iteration.
    Active,
    /// Heavy use: every request twice per iteration, short pauses.
    Power,
    /// Periodic polling of the first request.
    Background,
}

impl BehaviorKind {
    /// Think time used when the mix entry does not set one.
    #[must_use]
    pub fn default_think_time(self) -> Duration {
        match self {
            Self::Casual => Duration::from_secs(3),
            Self::Active => Duration::from_secs(1),
            Self::Power => Duration::from_millis(250),
            Self::Background => Duration::from_secs(10),
        }
    }

    /// Tag value for samples.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Casual => "casual",
            Self::Active => "active",
            Self::Power => "power",
            Self::Background => "background",
        }
    }
}

impl fmt::Display for BehaviorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a worker picks its behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorSelection {
    /// `worker_id mod behavior_count`, fixed for the worker's lifetime.
    #[default]
    RoundRobin,
    /// Weighted random choice per iteration.
    Weighted,
}

/// Behavior mix as written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Selection strategy.
    pub selection: BehaviorSelection,
    /// Behaviors, in round-robin order.
    pub mix: Vec<BehaviorMixConfig>,
}

/// One entry of the behavior mix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorMixConfig {
    /// Archetype.
    pub kind: BehaviorKind,
    /// Relative weight for weighted selection.
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Pause between iterations; the archetype's default when absent.
    #[serde(default)]
    pub think_time: Option<HumanDuration>,
    /// Requests the behavior issues.
    #[serde(default)]
    pub requests: Vec<RequestTemplate>,
}

fn default_weight() -> u32 {
    1
}

/// Request issued by a behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTemplate {
    /// Name used for the `name` tag; the URL when absent.
    #[serde(default)]
    pub name: Option<String>,
    /// HTTP method.
    #[serde(default = "default_method")]
    pub method: String,
    /// Target URL.
    pub url: String,
    /// Request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Request body.
    #[serde(default)]
    pub body: Option<String>,
    /// Per-request timeout.
    #[serde(default = "default_request_timeout", with = "duration::human")]
    pub timeout: Duration,
}

impl RequestTemplate {
    /// `GET url` with default options.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            name: None,
            method: default_method(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout: default_request_timeout(),
        }
    }

    /// Value of the `name` tag.
    #[must_use]
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Pre/post baseline probe settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BaselineProbeConfig {
    /// Sequential passes over the behavior requests.
    #[serde(default = "default_probe_iterations")]
    pub iterations: u32,
}

fn default_probe_iterations() -> u32 {
    5
}

impl RunConfigFile {
    /// Loads a configuration file and applies `LOADGATE__*` overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] when the file cannot be read or does not
    /// match the model.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            // Example: LOADGATE__GRACE_PERIOD=10s
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Parses configuration text without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] on malformed input.
    pub fn parse(text: &str, format: FileFormat) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(text, format))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Validates the file and freezes it into a [`RunPlan`].
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found. Nothing is spawned before
    /// this succeeds.
    pub fn resolve(&self) -> Result<RunPlan, ConfigError> {
        let tick = self.control_loop_tick.into_inner();
        if tick.is_zero() {
            return Err(ConfigError::InvalidDuration {
                value: self.control_loop_tick.to_string(),
                message: "control_loop_tick must be positive".to_string(),
            });
        }
        let max_duration = self.max_duration.map(HumanDuration::into_inner);
        if max_duration.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::InvalidDuration {
                value: "0s".to_string(),
                message: "max_duration must be positive".to_string(),
            });
        }

        let scheduler = StageScheduler::new(self.resolve_stages()?, self.hold);
        let classifier = self.resolve_phases(&scheduler)?;

        self.weights.validate()?;
        self.recovery.validate()?;

        // Threshold validation needs every metric kind, so declare the
        // custom metrics on a scratch registry first.
        let registry = MetricRegistry::new();
        let mut metrics = Vec::with_capacity(self.metrics.len());
        for declaration in &self.metrics {
            let name = declaration.name.trim();
            if name.is_empty() || name.contains(['{', '}']) {
                return Err(ConfigError::Load(format!(
                    "invalid custom metric name `{}`",
                    declaration.name
                )));
            }
            registry.declare(name, declaration.kind)?;
            metrics.push((name.to_string(), declaration.kind));
        }

        let thresholds = self.resolve_thresholds(&registry)?;
        let behaviors = self.behaviors.resolve()?;

        let baseline_probe = match self.baseline_probe {
            Some(probe) if probe.iterations == 0 => {
                return Err(ConfigError::InvalidBehavior(
                    "baseline_probe.iterations must be at least 1".to_string(),
                ));
            }
            Some(probe) => Some(probe.iterations),
            None => None,
        };

        Ok(RunPlan {
            name: self
                .name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| "loadgate".to_string()),
            scheduler,
            classifier,
            thresholds,
            weights: self.weights,
            recovery: self.recovery,
            metrics,
            behaviors,
            grace_period: self.grace_period.into_inner(),
            control_loop_tick: tick,
            max_duration,
            baseline_probe,
        })
    }

    fn resolve_stages(&self) -> Result<Vec<Stage>, ConfigError> {
        let mut total = Duration::ZERO;
        let mut stages = Vec::with_capacity(self.stages.len());

        for (index, stage) in self.stages.iter().enumerate() {
            let invalid = |message: String| ConfigError::InvalidStage { index, message };

            if stage.target > MAX_STAGE_TARGET {
                return Err(invalid(format!(
                    "target {} exceeds the maximum of {MAX_STAGE_TARGET}",
                    stage.target
                )));
            }
            let duration = stage.duration.into_inner();
            total = total
                .checked_add(duration)
                .ok_or_else(|| invalid("profile duration overflows".to_string()))?;

            let mut resolved = Stage::new(duration, stage.target);
            match stage.name.as_deref().map(str::trim) {
                Some("") => return Err(invalid("name must not be empty".to_string())),
                Some(name) => resolved = resolved.named(name),
                None => {}
            }
            stages.push(resolved);
        }
        Ok(stages)
    }

    fn resolve_phases(&self, scheduler: &StageScheduler) -> Result<PhaseClassifier, ConfigError> {
        if self.phases.is_empty() {
            return Ok(PhaseClassifier::from_boundaries(&scheduler.phase_boundaries()));
        }

        let rules = self
            .phases
            .iter()
            .enumerate()
            .map(|(index, rule)| match (rule.concurrency, rule.time) {
                (Some(range), None) => Ok(PhaseRule::concurrency(&rule.tag, range.min, range.max)),
                (None, Some(window)) => Ok(PhaseRule::time(
                    &rule.tag,
                    window.from.into_inner(),
                    window.until.map(HumanDuration::into_inner),
                )),
                _ => Err(ConfigError::InvalidPhaseRule {
                    index,
                    tag: rule.tag.clone(),
                    message: "set exactly one of `concurrency` or `time`".to_string(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        PhaseClassifier::new(rules)
    }

    fn resolve_thresholds(&self, registry: &MetricRegistry) -> Result<Vec<ThresholdSpec>, ConfigError> {
        let mut specs = Vec::new();
        for entry in &self.thresholds {
            for condition in &entry.conditions {
                let spec = match condition {
                    ThresholdCondition::Expression(expression) => {
                        ThresholdSpec::parse(&entry.metric, expression)?
                    }
                    ThresholdCondition::Detailed {
                        threshold,
                        abort_on_fail,
                        delay_abort_eval,
                        category,
                    } => {
                        let spec = ThresholdSpec::parse(&entry.metric, threshold)?
                            .abort_on_fail(*abort_on_fail)
                            .delay_abort_eval(delay_abort_eval.into_inner());
                        match category {
                            Some(category) => spec.with_category(*category),
                            None => spec,
                        }
                    }
                };

                let kind = spec.validate(registry.kind(&spec.metric))?;
                let category = spec.category_for(Some(kind));
                specs.push(spec.with_category(category));
            }
        }
        Ok(specs)
    }
}

impl BehaviorConfig {
    fn resolve(&self) -> Result<BehaviorPlan, ConfigError> {
        if self.mix.is_empty() {
            return Err(ConfigError::InvalidBehavior(
                "behaviors.mix must list at least one behavior".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let mut mix = Vec::with_capacity(self.mix.len());
        for entry in &self.mix {
            if !seen.insert(entry.kind) {
                return Err(ConfigError::InvalidBehavior(format!(
                    "behavior `{}` is listed more than once",
                    entry.kind
                )));
            }
            if entry.requests.is_empty() {
                return Err(ConfigError::InvalidBehavior(format!(
                    "behavior `{}` has no requests",
                    entry.kind
                )));
            }
            for request in &entry.requests {
                if request.url.trim().is_empty() {
                    return Err(ConfigError::InvalidBehavior(format!(
                        "behavior `{}` has a request without a url",
                        entry.kind
                    )));
                }
                if request.method.is_empty()
                    || !request.method.bytes().all(|b| b.is_ascii_alphabetic())
                {
                    return Err(ConfigError::InvalidBehavior(format!(
                        "behavior `{}`: invalid method `{}`",
                        entry.kind, request.method
                    )));
                }
            }

            mix.push(BehaviorSpec {
                kind: entry.kind,
                weight: entry.weight,
                think_time: entry
                    .think_time
                    .map_or_else(|| entry.kind.default_think_time(), HumanDuration::into_inner),
                requests: entry
                    .requests
                    .iter()
                    .cloned()
                    .map(|mut request| {
                        request.method = request.method.to_ascii_uppercase();
                        request
                    })
                    .collect(),
            });
        }

        if self.selection == BehaviorSelection::Weighted && mix.iter().all(|b| b.weight == 0) {
            return Err(ConfigError::InvalidBehavior(
                "weighted selection needs at least one positive weight".to_string(),
            ));
        }

        Ok(BehaviorPlan {
            selection: self.selection,
            mix,
        })
    }
}

/// Resolved behavior mix.
#[derive(Debug, Clone)]
pub struct BehaviorPlan {
    /// Selection strategy.
    pub selection: BehaviorSelection,
    /// Behaviors in declaration order.
    pub mix: Vec<BehaviorSpec>,
}

/// Resolved behavior.
#[derive(Debug, Clone)]
pub struct BehaviorSpec {
    /// Archetype.
    pub kind: BehaviorKind,
    /// Weight for weighted selection.
    pub weight: u32,
    /// Pause between iterations.
    pub think_time: Duration,
    /// Requests, methods upper-cased.
    pub requests: Vec<RequestTemplate>,
}

/// Immutable, validated configuration of one run.
#[derive(Debug, Clone)]
pub struct RunPlan {
    /// Run name.
    pub name: String,
    /// Concurrency schedule.
    pub scheduler: StageScheduler,
    /// Phase tagging rules.
    pub classifier: PhaseClassifier,
    /// Thresholds, categories resolved.
    pub thresholds: Vec<ThresholdSpec>,
    /// Composite score weights.
    pub weights: GateWeights,
    /// Baseline class bounds.
    pub recovery: RecoveryThresholds,
    /// Custom metrics declared on every run registry.
    pub metrics: Vec<(String, MetricKind)>,
    /// Behavior mix.
    pub behaviors: BehaviorPlan,
    /// Grace period for stopped workers.
    pub grace_period: Duration,
    /// Control loop tick.
    pub control_loop_tick: Duration,
    /// Hard stop.
    pub max_duration: Option<Duration>,
    /// Baseline probe passes, when enabled.
    pub baseline_probe: Option<u32>,
}

impl RunPlan {
    /// Fresh registry with the built-in and custom metrics declared.
    ///
    /// # Errors
    ///
    /// Fails only if a custom metric conflicts with a built-in, which
    /// [`RunConfigFile::resolve`] already rules out.
    pub fn registry(&self) -> Result<MetricRegistry, ConfigError> {
        let registry = MetricRegistry::new();
        for (name, kind) in &self.metrics {
            registry.declare(name, *kind)?;
        }
        Ok(registry)
    }

    /// Whether any threshold may stop the run early.
    #[must_use]
    pub fn has_abort_thresholds(&self) -> bool {
        self.thresholds.iter().any(|t| t.abort_on_fail)
    }
}
