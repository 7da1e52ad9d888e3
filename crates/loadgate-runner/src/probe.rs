//! Low-load baseline probe run before and after the load phase.

use crate::behavior::IterationContext;
use crate::error::RunResult;
use crate::executor::RequestExecutor;
use loadgate_core::{BaselineSnapshot, RunPlan, TagSet};
use tokio::time::Instant;

/// Tag value probe samples carry under `phase`.
pub const PROBE_PHASE: &str = "probe";

/// Issues every configured request `iterations` times, one at a time, and
/// captures the result as a baseline.
///
/// # Errors
///
/// Fails only if the plan's metric declarations are inconsistent.
pub async fn run_probe(
    plan: &RunPlan,
    executor: &dyn RequestExecutor,
    iterations: u32,
) -> RunResult<BaselineSnapshot> {
    let registry = plan.registry()?;
    let mut shard = registry.shard();
    let started = Instant::now();

    for iteration in 0..u64::from(iterations) {
        for spec in &plan.behaviors.mix {
            let tags = TagSet::new()
                .with("phase", PROBE_PHASE)
                .with("behavior", spec.kind.as_str());
            let mut ctx = IterationContext::new(executor, &mut shard, tags, started, 0, iteration);
            for template in &spec.requests {
                let _ = ctx.request(template).await;
            }
        }
    }

    registry.absorb(&mut shard);
    let snapshot = registry.snapshot(started.elapsed());
    tracing::debug!(iterations, "Baseline probe finished");
    Ok(BaselineSnapshot::capture(&snapshot))
}
