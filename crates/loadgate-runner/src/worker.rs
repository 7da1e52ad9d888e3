//! Virtual user loop.

use crate::behavior::{BehaviorTable, IterationContext};
use crate::executor::RequestExecutor;
use crate::telemetry::EngineTelemetry;
use loadgate_core::{builtin, MetricRegistry, RunPlan, Sample, TagSet};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;

/// State every worker of a run reads.
pub(crate) struct WorkerShared {
    pub plan: Arc<RunPlan>,
    pub behaviors: Arc<BehaviorTable>,
    pub executor: Arc<dyn RequestExecutor>,
    pub registry: Arc<MetricRegistry>,
    pub telemetry: EngineTelemetry,
    pub run_started: Instant,
}

/// Runs iterations until `stop` flips or the registry freezes.
///
/// The stop flag is only observed between iterations and during think time,
/// so an in-flight iteration always finishes unless the task is aborted.
pub(crate) async fn run_worker(id: u64, shared: Arc<WorkerShared>, mut stop: watch::Receiver<bool>) {
    let mut rng = StdRng::seed_from_u64(id);
    let mut shard = shared.registry.shard();
    let mut iteration = 0u64;

    tracing::trace!(worker = id, "Worker started");

    loop {
        if *stop.borrow() {
            break;
        }

        let elapsed = shared.run_started.elapsed();
        let concurrency = shared.plan.scheduler.concurrency_at(elapsed);
        let phase = shared.plan.classifier.classify(elapsed, concurrency);
        let behavior = Arc::clone(shared.behaviors.select(id, &mut rng));
        let tags = TagSet::new()
            .with("phase", phase)
            .with("behavior", behavior.kind().as_str());

        let started = Instant::now();
        {
            let mut ctx = IterationContext::new(
                shared.executor.as_ref(),
                &mut shard,
                tags.clone(),
                shared.run_started,
                id,
                iteration,
            );
            behavior.iterate(&mut ctx).await;
        }

        let at = shared.run_started.elapsed();
        shard.record(&Sample::new(builtin::ITERATIONS, 1.0).with_tags(tags.clone()).at(at));
        shard.record(
            &Sample::new(
                builtin::ITERATION_DURATION,
                started.elapsed().as_secs_f64() * 1_000.0,
            )
            .with_tags(tags)
            .at(at),
        );

        if !shared.registry.absorb(&mut shard) && shared.registry.is_frozen() {
            break;
        }
        shared.telemetry.iterations.inc();
        iteration += 1;

        let think_time = behavior.think_time();
        tokio::select! {
            _ = tokio::time::sleep(think_time) => {}
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }

        if think_time.is_zero() {
            // Cancellation point for workers that never sleep.
            tokio::task::yield_now().await;
        }
    }

    tracing::trace!(worker = id, iterations = iteration, "Worker stopped");
}
