//! Run orchestration: control loop, abort-on-fail and result assembly.

use crate::behavior::{Behavior, BehaviorTable};
use crate::error::RunResult;
use crate::executor::RequestExecutor;
use crate::pool::WorkerPool;
use crate::probe::run_probe;
use crate::telemetry::EngineTelemetry;
use crate::worker::WorkerShared;
use chrono::Utc;
use loadgate_core::summary::phase_breakdown;
use loadgate_core::{
    aggregate, builtin, evaluate, evaluate_all, AbortReason, BaselineComparator, BaselineSnapshot,
    ExitSignal, GateVerdict, MetricRegistry, RunPlan, RunSummary, Sample, TagSet, ThresholdReport,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};
use uuid::Uuid;

/// Live view of a run, published every control-loop tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunProgress {
    /// Run time so far.
    pub elapsed: Duration,
    /// Profile length, `None` when the last stage holds.
    pub total: Option<Duration>,
    /// Scheduler target at `elapsed`.
    pub target: u32,
    /// Workers alive.
    pub active: usize,
    /// Stage the scheduler is in.
    pub stage_index: Option<usize>,
    /// Phase tag at `elapsed`.
    pub phase: String,
}

/// Why the control loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopCause {
    ProfileComplete,
    MaxDuration,
    External,
    Aborted,
}

/// Drives one run of a [`RunPlan`] against a request executor.
pub struct LoadTestOrchestrator {
    plan: Arc<RunPlan>,
    executor: Arc<dyn RequestExecutor>,
    behaviors: BehaviorTable,
    prior: Option<BaselineSnapshot>,
    telemetry: EngineTelemetry,
    progress: watch::Sender<RunProgress>,
}

impl LoadTestOrchestrator {
    /// Prepares a run. No worker is spawned until [`run`](Self::run).
    ///
    /// # Errors
    ///
    /// Fails with a configuration error when the behavior mix is unusable.
    pub fn new(plan: RunPlan, executor: Arc<dyn RequestExecutor>) -> RunResult<Self> {
        let behaviors = BehaviorTable::from_plan(&plan.behaviors)?;
        let telemetry = EngineTelemetry::new()?;
        let (progress, _) = watch::channel(RunProgress::default());

        Ok(Self {
            plan: Arc::new(plan),
            executor,
            behaviors,
            prior: None,
            telemetry,
            progress,
        })
    }

    /// Replaces the scripted behavior of one kind with a custom one.
    ///
    /// # Errors
    ///
    /// Fails when the kind is not part of the configured mix.
    pub fn with_behavior(mut self, behavior: Arc<dyn Behavior>) -> RunResult<Self> {
        self.behaviors.replace(behavior)?;
        Ok(self)
    }

    /// Compares the run against a prior run's snapshot.
    #[must_use]
    pub fn with_baseline(mut self, prior: BaselineSnapshot) -> Self {
        self.prior = Some(prior);
        self
    }

    /// Receiver of per-tick progress.
    pub fn subscribe(&self) -> watch::Receiver<RunProgress> {
        self.progress.subscribe()
    }

    /// Engine self-telemetry of this run.
    pub fn telemetry(&self) -> &EngineTelemetry {
        &self.telemetry
    }

    /// The resolved plan.
    pub fn plan(&self) -> &RunPlan {
        &self.plan
    }

    /// Runs the full profile.
    ///
    /// # Errors
    ///
    /// See [`run_until`](Self::run_until).
    pub async fn run(self) -> RunResult<RunSummary> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Runs the profile until it completes, an abort-on-fail threshold fails
    /// or `stop` resolves, whichever comes first.
    ///
    /// The summary is produced in every case; threshold failures and request
    /// errors are reported in it rather than returned as errors.
    ///
    /// # Errors
    ///
    /// Fails only when the plan's metric declarations are inconsistent.
    pub async fn run_until<F>(self, stop: F) -> RunResult<RunSummary>
    where
        F: Future<Output = ()>,
    {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let plan = Arc::clone(&self.plan);
        let comparator = BaselineComparator::new(plan.recovery);

        tracing::info!(
            run_id = %run_id,
            name = %plan.name,
            stages = plan.scheduler.stages().len(),
            thresholds = plan.thresholds.len(),
            "Starting load test"
        );

        let pre_probe = match plan.baseline_probe {
            Some(iterations) => {
                tracing::info!(iterations, "Capturing pre-run baseline");
                Some(run_probe(&plan, self.executor.as_ref(), iterations).await?)
            }
            None => None,
        };

        let registry = Arc::new(plan.registry()?);
        let run_started = Instant::now();
        let shared = Arc::new(WorkerShared {
            plan: Arc::clone(&plan),
            behaviors: Arc::new(self.behaviors),
            executor: Arc::clone(&self.executor),
            registry: Arc::clone(&registry),
            telemetry: self.telemetry.clone(),
            run_started,
        });
        let mut pool = WorkerPool::new(shared);

        let mut ticker = interval(plan.control_loop_tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(stop);

        let total = (!plan.scheduler.holds()).then(|| plan.scheduler.total_duration());
        let mut last_stage_index = None;
        let mut abort: Option<(usize, AbortReason)> = None;

        let cause = loop {
            tokio::select! {
                biased;
                _ = &mut stop => break StopCause::External,
                _ = ticker.tick() => {}
            }

            let elapsed = run_started.elapsed();
            if plan.max_duration.is_some_and(|max| elapsed >= max) {
                break StopCause::MaxDuration;
            }
            if plan.scheduler.is_complete(elapsed) {
                break StopCause::ProfileComplete;
            }

            let target = plan.scheduler.concurrency_at(elapsed);
            pool.scale_to(target);

            let stage_index = plan.scheduler.stage_index_at(elapsed);
            if stage_index.is_some() {
                last_stage_index = stage_index;
            }

            let phase = plan.classifier.classify(elapsed, target).to_string();
            registry.record(
                &Sample::new(builtin::VUS, pool.live() as f64)
                    .with_tags(TagSet::new().with("phase", phase.clone()))
                    .at(elapsed),
            );
            self.progress.send_replace(RunProgress {
                elapsed,
                total,
                target,
                active: pool.live(),
                stage_index,
                phase,
            });

            if let Some(found) = check_abort(&plan, &registry, elapsed) {
                abort = Some(found);
                break StopCause::Aborted;
            }
        };

        let grace = if cause == StopCause::Aborted {
            plan.grace_period.min(plan.control_loop_tick)
        } else {
            plan.grace_period
        };
        tracing::info!(cause = ?cause, grace = ?grace, vus = pool.live(), "Ramping down");
        pool.shutdown(grace).await;

        let duration = run_started.elapsed();
        registry.freeze();
        self.telemetry.dropped_samples.inc_by(registry.dropped_samples());

        let recovery = match (plan.baseline_probe, &pre_probe) {
            (Some(iterations), Some(pre)) => {
                tracing::info!(iterations, "Capturing post-run baseline");
                let post = run_probe(&plan, self.executor.as_ref(), iterations).await?;
                Some(comparator.compare(pre, &post))
            }
            _ => None,
        };

        let snapshot = registry.snapshot(duration);
        let evaluations = evaluate_all(&plan.thresholds, &snapshot);
        for (spec, evaluation) in plan.thresholds.iter().zip(&evaluations) {
            if evaluation.vacuous {
                tracing::warn!(threshold = %spec.describe(), "No samples matched threshold scope");
            }
        }

        let aborted_by = abort.as_ref().map(|(index, _)| *index);
        let gate = aggregate(&plan.thresholds, &evaluations, aborted_by, &plan.weights);
        let verdict = GateVerdict::of(&gate);
        let baseline = BaselineSnapshot::capture(&snapshot);
        let regression = self
            .prior
            .as_ref()
            .map(|prior| comparator.compare(prior, &baseline));

        let summary = RunSummary {
            run_id,
            name: plan.name.clone(),
            started_at,
            finished_at: Utc::now(),
            duration_secs: duration.as_secs_f64(),
            aborted: abort.is_some(),
            abort_reason: abort.map(|(_, reason)| reason),
            last_stage_index,
            metrics: snapshot.summaries(),
            phases: phase_breakdown(&snapshot),
            thresholds: plan
                .thresholds
                .iter()
                .zip(&evaluations)
                .map(|(spec, evaluation)| ThresholdReport::new(spec, evaluation))
                .collect(),
            exit: ExitSignal {
                passed: gate.passed,
                score: gate.composite_score,
            },
            gate,
            verdict,
            baseline,
            recovery,
            regression,
            dropped_samples: registry.dropped_samples(),
            late_samples: registry.late_samples(),
        };

        tracing::info!(
            run_id = %run_id,
            verdict = %summary.verdict,
            score = summary.gate.composite_score,
            grade = %summary.gate.grade,
            duration_secs = summary.duration_secs,
            forced_cancellations = pool.forced_cancellations(),
            "Load test finished"
        );

        Ok(summary)
    }
}

/// First abort-on-fail threshold failing at `elapsed`, if any.
fn check_abort(plan: &RunPlan, registry: &MetricRegistry, elapsed: Duration) -> Option<(usize, AbortReason)> {
    if !plan.thresholds.iter().any(|spec| spec.abort_check_due(elapsed)) {
        return None;
    }

    let snapshot = registry.snapshot(elapsed);
    plan.thresholds
        .iter()
        .enumerate()
        .filter(|(_, spec)| spec.abort_check_due(elapsed))
        .find_map(|(index, spec)| {
            let evaluation = evaluate(spec, &snapshot);
            if evaluation.ok || evaluation.vacuous {
                return None;
            }
            tracing::error!(
                threshold = %spec.describe(),
                observed = ?evaluation.observed,
                elapsed = ?elapsed,
                "Abort-on-fail threshold failed, stopping run"
            );
            Some((
                index,
                AbortReason {
                    threshold: spec.key(),
                    expression: spec.comparator.to_string(),
                    observed: evaluation.observed,
                    elapsed_secs: elapsed.as_secs_f64(),
                },
            ))
        })
}
