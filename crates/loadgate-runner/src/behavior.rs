//! Worker behaviors and the dispatch table that selects them.
//!
//! Each [`BehaviorKind`] maps to exactly one [`Behavior`] in a
//! [`BehaviorTable`] built once per run. Adding an archetype means adding a
//! variant and its script; nothing else switches on the kind.

use crate::executor::{HttpRequest, HttpResponse, RequestExecutor, TransportError};
use async_trait::async_trait;
use loadgate_core::{
    builtin, BehaviorKind, BehaviorPlan, BehaviorSelection, BehaviorSpec, ConfigError, MetricShard,
    RequestTemplate, Sample, TagSet,
};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Per-iteration handle given to a behavior.
///
/// Every request made through it becomes samples in the worker's shard,
/// tagged with the iteration's phase and behavior.
pub struct IterationContext<'a> {
    executor: &'a dyn RequestExecutor,
    shard: &'a mut MetricShard,
    tags: TagSet,
    run_started: Instant,
    worker_id: u64,
    iteration: u64,
}

impl<'a> IterationContext<'a> {
    /// Creates a context recording into `shard`.
    pub fn new(
        executor: &'a dyn RequestExecutor,
        shard: &'a mut MetricShard,
        tags: TagSet,
        run_started: Instant,
        worker_id: u64,
        iteration: u64,
    ) -> Self {
        Self {
            executor,
            shard,
            tags,
            run_started,
            worker_id,
            iteration,
        }
    }

    /// Id of the worker running the iteration.
    pub fn worker_id(&self) -> u64 {
        self.worker_id
    }

    /// Zero-based iteration number within the worker.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Tags applied to every sample of this iteration.
    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    /// Issues one request and records its samples.
    ///
    /// Transport failures are recorded as failed requests and returned for
    /// inspection; they never abort the iteration on their own.
    pub async fn request(&mut self, template: &RequestTemplate) -> Result<HttpResponse, TransportError> {
        let request = HttpRequest::from(template);
        let started = Instant::now();

        let outcome = match tokio::time::timeout(request.timeout, self.executor.execute(&request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(request.timeout)),
        };

        let tags = self
            .tags
            .clone()
            .with("method", request.method.as_str())
            .with("name", template.label());

        match &outcome {
            Ok(response) => {
                let tags = tags.with("status", response.status.to_string());
                self.record_request(
                    tags,
                    response.latency,
                    response.is_failure(),
                    response.bytes_received,
                    response.bytes_sent,
                );
            }
            Err(err) => {
                tracing::debug!(
                    worker = self.worker_id,
                    url = %request.url,
                    error = %err,
                    "Request failed"
                );
                let tags = tags.with("status", "0").with("error", err.tag());
                self.record_request(tags, started.elapsed(), true, 0, request.body_len());
            }
        }

        outcome
    }

    /// Records a custom sample, adding the iteration tags it does not set.
    pub fn record(&mut self, mut sample: Sample) -> bool {
        for (key, value) in self.tags.iter() {
            if sample.tags.get(key).is_none() {
                sample.tags.insert(key, value);
            }
        }
        if sample.timestamp.is_zero() {
            sample.timestamp = self.run_started.elapsed();
        }
        self.shard.record(&sample)
    }

    fn record_request(&mut self, tags: TagSet, latency: Duration, failed: bool, received: u64, sent: u64) {
        let at = self.run_started.elapsed();
        let latency_ms = latency.as_secs_f64() * 1_000.0;

        for sample in [
            Sample::new(builtin::HTTP_REQS, 1.0),
            Sample::new(builtin::HTTP_REQ_DURATION, latency_ms),
            Sample::flag(builtin::HTTP_REQ_FAILED, failed),
            Sample::new(builtin::DATA_RECEIVED, received as f64),
            Sample::new(builtin::DATA_SENT, sent as f64),
        ] {
            self.shard.record(&sample.with_tags(tags.clone()).at(at));
        }
    }
}

/// Something a worker does once per iteration.
#[async_trait]
pub trait Behavior: Send + Sync {
    /// Archetype this behavior implements.
    fn kind(&self) -> BehaviorKind;

    /// Pause after each iteration.
    fn think_time(&self) -> Duration;

    /// Runs one iteration.
    async fn iterate(&self, ctx: &mut IterationContext<'_>);
}

/// Picks the requests of one iteration.
type Script = fn(&[RequestTemplate], u64) -> Vec<&RequestTemplate>;

fn casual(requests: &[RequestTemplate], iteration: u64) -> Vec<&RequestTemplate> {
    let index = (iteration % requests.len().max(1) as u64) as usize;
    requests.get(index).into_iter().collect()
}

fn active(requests: &[RequestTemplate], _iteration: u64) -> Vec<&RequestTemplate> {
    requests.iter().collect()
}

fn power(requests: &[RequestTemplate], _iteration: u64) -> Vec<&RequestTemplate> {
    requests.iter().chain(requests.iter()).collect()
}

fn background(requests: &[RequestTemplate], _iteration: u64) -> Vec<&RequestTemplate> {
    requests.first().into_iter().collect()
}

fn script_for(kind: BehaviorKind) -> Script {
    match kind {
        BehaviorKind::Casual => casual,
        BehaviorKind::Active => active,
        BehaviorKind::Power => power,
        BehaviorKind::Background => background,
    }
}

/// Behavior that replays configured requests following its kind's script.
pub struct ScriptedBehavior {
    spec: BehaviorSpec,
    script: Script,
}

impl ScriptedBehavior {
    /// Wraps a resolved behavior spec.
    pub fn new(spec: BehaviorSpec) -> Self {
        Self {
            script: script_for(spec.kind),
            spec,
        }
    }

    /// Requests an iteration with the given number would issue.
    pub fn requests_for(&self, iteration: u64) -> Vec<&RequestTemplate> {
        (self.script)(&self.spec.requests, iteration)
    }
}

#[async_trait]
impl Behavior for ScriptedBehavior {
    fn kind(&self) -> BehaviorKind {
        self.spec.kind
    }

    fn think_time(&self) -> Duration {
        self.spec.think_time
    }

    async fn iterate(&self, ctx: &mut IterationContext<'_>) {
        for template in self.requests_for(ctx.iteration()) {
            // Failures are already recorded as samples.
            let _ = ctx.request(template).await;
        }
    }
}

/// Dispatch table from behavior kind to behavior, fixed at run start.
pub struct BehaviorTable {
    entries: Vec<Arc<dyn Behavior>>,
    index: HashMap<BehaviorKind, usize>,
    selection: BehaviorSelection,
    weights: Option<WeightedIndex<u32>>,
}

impl std::fmt::Debug for BehaviorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BehaviorTable")
            .field("kinds", &self.kinds())
            .field("selection", &self.selection)
            .finish()
    }
}

impl BehaviorTable {
    /// Builds scripted behaviors for every entry of the plan.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBehavior`] for an empty mix, repeated
    /// kinds or unusable weights.
    pub fn from_plan(plan: &BehaviorPlan) -> Result<Self, ConfigError> {
        if plan.mix.is_empty() {
            return Err(ConfigError::InvalidBehavior(
                "behavior mix is empty".to_string(),
            ));
        }

        let mut entries: Vec<Arc<dyn Behavior>> = Vec::with_capacity(plan.mix.len());
        let mut index = HashMap::with_capacity(plan.mix.len());
        for spec in &plan.mix {
            if index.insert(spec.kind, entries.len()).is_some() {
                return Err(ConfigError::InvalidBehavior(format!(
                    "behavior `{}` is listed more than once",
                    spec.kind
                )));
            }
            entries.push(Arc::new(ScriptedBehavior::new(spec.clone())));
        }

        let weights = match plan.selection {
            BehaviorSelection::RoundRobin => None,
            BehaviorSelection::Weighted => Some(
                WeightedIndex::new(plan.mix.iter().map(|spec| spec.weight))
                    .map_err(|e| ConfigError::InvalidBehavior(format!("behavior weights: {e}")))?,
            ),
        };

        Ok(Self {
            entries,
            index,
            selection: plan.selection,
            weights,
        })
    }

    /// Swaps in a custom implementation for a kind already in the mix.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBehavior`] when the kind is not part of
    /// the plan.
    pub fn replace(&mut self, behavior: Arc<dyn Behavior>) -> Result<(), ConfigError> {
        let kind = behavior.kind();
        let slot = self.index.get(&kind).copied().ok_or_else(|| {
            ConfigError::InvalidBehavior(format!("behavior `{kind}` is not in the mix"))
        })?;
        self.entries[slot] = behavior;
        Ok(())
    }

    /// Kinds in declaration order.
    pub fn kinds(&self) -> Vec<BehaviorKind> {
        self.entries.iter().map(|b| b.kind()).collect()
    }

    /// Behavior registered for `kind`.
    pub fn get(&self, kind: BehaviorKind) -> Option<&Arc<dyn Behavior>> {
        self.index.get(&kind).map(|slot| &self.entries[*slot])
    }

    /// Behavior for the next iteration of `worker_id`.
    ///
    /// Round-robin selection is a pure function of the worker id; weighted
    /// selection draws from `rng`.
    pub fn select<R: Rng + ?Sized>(&self, worker_id: u64, rng: &mut R) -> &Arc<dyn Behavior> {
        let slot = match &self.weights {
            Some(weights) => weights.sample(rng),
            None => (worker_id % self.entries.len() as u64) as usize,
        };
        &self.entries[slot]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn spec(kind: BehaviorKind, weight: u32, urls: &[&str]) -> BehaviorSpec {
        BehaviorSpec {
            kind,
            weight,
            think_time: kind.default_think_time(),
            requests: urls.iter().map(|u| RequestTemplate::get(*u)).collect(),
        }
    }

    fn urls(requests: Vec<&RequestTemplate>) -> Vec<&str> {
        requests.into_iter().map(|r| r.url.as_str()).collect()
    }

    #[test]
    fn test_scripts_per_kind() {
        let casual = ScriptedBehavior::new(spec(BehaviorKind::Casual, 1, &["a", "b"]));
        assert_eq!(urls(casual.requests_for(0)), vec!["a"]);
        assert_eq!(urls(casual.requests_for(1)), vec!["b"]);
        assert_eq!(urls(casual.requests_for(2)), vec!["a"]);

        let power = ScriptedBehavior::new(spec(BehaviorKind::Power, 1, &["a", "b"]));
        assert_eq!(urls(power.requests_for(0)), vec!["a", "b", "a", "b"]);

        let background = ScriptedBehavior::new(spec(BehaviorKind::Background, 1, &["a", "b"]));
        assert_eq!(urls(background.requests_for(7)), vec!["a"]);
        assert_eq!(background.think_time(), Duration::from_secs(10));
    }

    #[test]
    fn test_round_robin_by_worker_id() {
        let plan = BehaviorPlan {
            selection: BehaviorSelection::RoundRobin,
            mix: vec![
                spec(BehaviorKind::Casual, 1, &["a"]),
                spec(BehaviorKind::Active, 1, &["b"]),
                spec(BehaviorKind::Power, 1, &["c"]),
            ],
        };
        let table = BehaviorTable::from_plan(&plan).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        let picked: Vec<_> = (0..6).map(|id| table.select(id, &mut rng).kind()).collect();
        assert_eq!(
            picked,
            vec![
                BehaviorKind::Casual,
                BehaviorKind::Active,
                BehaviorKind::Power,
                BehaviorKind::Casual,
                BehaviorKind::Active,
                BehaviorKind::Power,
            ]
        );
    }

    #[test]
    fn test_weighted_selection_skips_zero_weight() {
        let plan = BehaviorPlan {
            selection: BehaviorSelection::Weighted,
            mix: vec![
                spec(BehaviorKind::Casual, 0, &["a"]),
                spec(BehaviorKind::Background, 5, &["b"]),
            ],
        };
        let table = BehaviorTable::from_plan(&plan).unwrap();
        let mut rng = StdRng::seed_from_u64(42);

        for id in 0..100 {
            assert_eq!(table.select(id, &mut rng).kind(), BehaviorKind::Background);
        }
    }

    #[test]
    fn test_empty_and_duplicate_mix_rejected() {
        let empty = BehaviorPlan {
            selection: BehaviorSelection::RoundRobin,
            mix: Vec::new(),
        };
        assert!(BehaviorTable::from_plan(&empty).is_err());

        let duplicate = BehaviorPlan {
            selection: BehaviorSelection::RoundRobin,
            mix: vec![
                spec(BehaviorKind::Casual, 1, &["a"]),
                spec(BehaviorKind::Casual, 1, &["b"]),
            ],
        };
        assert!(BehaviorTable::from_plan(&duplicate).is_err());
    }

    #[test]
    fn test_replace_requires_known_kind() {
        let plan = BehaviorPlan {
            selection: BehaviorSelection::RoundRobin,
            mix: vec![spec(BehaviorKind::Casual, 1, &["a"])],
        };
        let mut table = BehaviorTable::from_plan(&plan).unwrap();

        let power: Arc<dyn Behavior> = Arc::new(ScriptedBehavior::new(spec(BehaviorKind::Power, 1, &["x"])));
        assert!(table.replace(power).is_err());

        let casual: Arc<dyn Behavior> = Arc::new(ScriptedBehavior::new(spec(BehaviorKind::Casual, 1, &["z"])));
        table.replace(casual).unwrap();
        assert_eq!(table.kinds(), vec![BehaviorKind::Casual]);
        assert!(table.get(BehaviorKind::Casual).is_some());
    }
}
