//! Orchestrator behavior under virtual time.
//!
//! Every test runs with a paused clock, so minute-long profiles complete
//! instantly and timings are exact.

use async_trait::async_trait;
use loadgate_core::{
    builtin, BehaviorKind, BehaviorPlan, BehaviorSelection, BehaviorSpec, GateVerdict, GateWeights,
    MetricKind, PhaseClassifier, RecoveryClass, RecoveryThresholds, RequestTemplate, RunPlan,
    Sample, Stage, StageScheduler, ThresholdSpec,
};
use loadgate_runner::{
    Behavior, HttpRequest, HttpResponse, IterationContext, LoadTestOrchestrator, RequestExecutor,
    TransportError,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

/// Executor answering every request after a fixed delay.
struct MockExecutor {
    latency: Duration,
    outcome: Result<u16, TransportError>,
    calls: AtomicU64,
}

impl MockExecutor {
    fn ok(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            outcome: Ok(200),
            calls: AtomicU64::new(0),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            latency: Duration::ZERO,
            outcome: Err(TransportError::Connect("connection refused".to_string())),
            calls: AtomicU64::new(0),
        })
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RequestExecutor for MockExecutor {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let status = self.outcome.clone()?;
        Ok(HttpResponse {
            status,
            latency: self.latency,
            bytes_received: 512,
            bytes_sent: request.body_len(),
        })
    }
}

fn plan(stages: Vec<Stage>, thresholds: Vec<ThresholdSpec>) -> RunPlan {
    let scheduler = StageScheduler::new(stages, false);
    let classifier = PhaseClassifier::from_boundaries(&scheduler.phase_boundaries());
    RunPlan {
        name: "orchestrator-test".to_string(),
        scheduler,
        classifier,
        thresholds,
        weights: GateWeights::default(),
        recovery: RecoveryThresholds::default(),
        metrics: Vec::new(),
        behaviors: BehaviorPlan {
            selection: BehaviorSelection::RoundRobin,
            mix: vec![BehaviorSpec {
                kind: BehaviorKind::Active,
                weight: 1,
                think_time: secs(1),
                requests: vec![RequestTemplate::get("http://target/api/items")],
            }],
        },
        grace_period: secs(30),
        control_loop_tick: secs(1),
        max_duration: None,
        baseline_probe: None,
    }
}

#[tokio::test(start_paused = true)]
async fn completes_profile_and_passes_gate() {
    let executor = MockExecutor::ok(Duration::from_millis(100));
    let plan = plan(
        vec![Stage::new(secs(10), 4).named("ramp")],
        vec![ThresholdSpec::parse("http_req_duration", "p(95)<500").unwrap()],
    );

    let summary = LoadTestOrchestrator::new(plan, executor.clone())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert!(!summary.aborted);
    assert_eq!(summary.verdict, GateVerdict::Pass);
    assert_eq!(summary.last_stage_index, Some(0));
    assert!(summary.duration_secs >= 10.0);

    let duration = &summary.metrics[builtin::HTTP_REQ_DURATION];
    assert!((duration.avg.unwrap() - 100.0).abs() < 1e-6);
    let requests = &summary.metrics[builtin::HTTP_REQS];
    assert_eq!(requests.count, Some(executor.calls() as f64));
    assert_eq!(summary.metrics[builtin::HTTP_REQ_FAILED].rate, Some(0.0));

    assert!(summary.phases.contains_key("ramp"));
    assert_eq!(summary.thresholds.len(), 1);
    assert!(summary.thresholds[0].ok);
    assert!(summary.exit.passed);
    assert_eq!(summary.dropped_samples, 0);
}

#[tokio::test(start_paused = true)]
async fn pool_size_follows_schedule() {
    let executor = MockExecutor::ok(Duration::from_millis(50));
    let plan = plan(
        vec![Stage::new(secs(10), 10), Stage::new(secs(10), 2)],
        Vec::new(),
    );

    let orchestrator = LoadTestOrchestrator::new(plan, executor).unwrap();
    let mut progress = orchestrator.subscribe();
    let run = tokio::spawn(orchestrator.run());

    let mut observed = Vec::new();
    while progress.changed().await.is_ok() {
        let current = progress.borrow_and_update().clone();
        observed.push(current);
    }
    let summary = run.await.unwrap().unwrap();

    assert!(!observed.is_empty());
    for tick in &observed {
        assert_eq!(tick.active, tick.target as usize, "at {:?}", tick.elapsed);
    }
    assert!(observed.iter().any(|tick| tick.target == 10));
    assert_eq!(observed.last().map(|tick| tick.target), Some(2));
    assert_eq!(summary.metrics[builtin::VUS].max, Some(10.0));
}

#[tokio::test(start_paused = true)]
async fn transport_errors_become_failed_samples() {
    let executor = MockExecutor::failing();
    let plan = plan(
        vec![Stage::new(secs(0), 3), Stage::new(secs(5), 3)],
        vec![ThresholdSpec::parse("http_req_failed", "rate<0.05").unwrap()],
    );

    let summary = LoadTestOrchestrator::new(plan, executor.clone())
        .unwrap()
        .run()
        .await
        .unwrap();

    // Workers kept iterating after every failure.
    assert!(executor.calls() > 3);
    assert!(!summary.aborted);
    assert_eq!(summary.metrics[builtin::HTTP_REQ_FAILED].rate, Some(1.0));
    assert!(!summary.gate.passed);
    assert_eq!(summary.gate.violations.len(), 1);
    assert_eq!(summary.verdict, GateVerdict::Fail);
    assert_eq!(summary.exit.score, 0.0);
}

#[tokio::test(start_paused = true)]
async fn abort_on_fail_stops_within_one_tick() {
    let executor = MockExecutor::failing();
    let plan = plan(
        vec![Stage::new(secs(20), 10), Stage::new(secs(40), 50)],
        vec![ThresholdSpec::parse("http_req_failed", "rate<0.05")
            .unwrap()
            .abort_on_fail(true)
            .delay_abort_eval(secs(10))],
    );

    let summary = LoadTestOrchestrator::new(plan, executor)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert!(summary.aborted);
    let reason = summary.abort_reason.as_ref().unwrap();
    assert_eq!(reason.threshold, "http_req_failed");
    assert!(reason.elapsed_secs >= 10.0 && reason.elapsed_secs <= 11.0, "{reason:?}");
    assert_eq!(reason.observed, Some(1.0));

    // Stage 2 never started.
    assert_eq!(summary.last_stage_index, Some(0));
    assert!(summary.duration_secs < 20.0);
    assert!(summary.gate.aborted);
    assert_eq!(summary.verdict, GateVerdict::Fail);
    assert!(!summary.exit.passed);
}

#[tokio::test(start_paused = true)]
async fn graceful_stop_lets_iteration_finish() {
    let executor = MockExecutor::ok(secs(2));
    let mut plan = plan(vec![Stage::new(secs(1), 1)], Vec::new());
    plan.grace_period = secs(30);

    let orchestrator = LoadTestOrchestrator::new(plan, executor).unwrap();
    let telemetry = orchestrator.telemetry().clone();
    let summary = orchestrator.run().await.unwrap();

    assert_eq!(telemetry.forced_cancellations.get(), 0);
    assert_eq!(summary.metrics[builtin::HTTP_REQS].count, Some(1.0));
    assert!(!summary.metrics.contains_key(builtin::DROPPED_ITERATIONS));
    assert_eq!(summary.late_samples, 0);
}

#[tokio::test(start_paused = true)]
async fn workers_past_grace_are_cancelled() {
    let executor = MockExecutor::ok(secs(5));
    let mut plan = plan(vec![Stage::new(secs(1), 2)], Vec::new());
    plan.grace_period = secs(1);

    let orchestrator = LoadTestOrchestrator::new(plan, executor).unwrap();
    let telemetry = orchestrator.telemetry().clone();
    let summary = orchestrator.run().await.unwrap();

    assert_eq!(telemetry.forced_cancellations.get(), 2);
    assert_eq!(telemetry.active_workers.get(), 0);
    assert_eq!(summary.metrics[builtin::DROPPED_ITERATIONS].count, Some(2.0));
    assert!(!summary.metrics.contains_key(builtin::HTTP_REQS));
    assert!(telemetry.encode().unwrap().contains("loadgate_forced_cancellations_total 2"));
}

#[tokio::test(start_paused = true)]
async fn external_stop_still_produces_summary() {
    let executor = MockExecutor::ok(Duration::from_millis(100));
    let plan = plan(vec![Stage::new(secs(60), 5)], Vec::new());

    let summary = LoadTestOrchestrator::new(plan, executor)
        .unwrap()
        .run_until(tokio::time::sleep(secs(5)))
        .await
        .unwrap();

    assert!(!summary.aborted);
    assert!(summary.duration_secs < 10.0);
    assert_eq!(summary.verdict, GateVerdict::Pass);
    assert!(summary.metrics.contains_key(builtin::HTTP_REQS));
}

#[tokio::test(start_paused = true)]
async fn max_duration_caps_holding_profile() {
    let executor = MockExecutor::ok(Duration::from_millis(100));
    let mut plan = plan(vec![Stage::new(secs(2), 2)], Vec::new());
    plan.scheduler = StageScheduler::new(vec![Stage::new(secs(2), 2)], true);
    plan.max_duration = Some(secs(8));

    let summary = LoadTestOrchestrator::new(plan, executor)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert!(summary.duration_secs >= 8.0);
    assert!(summary.duration_secs < 10.0);
    assert_eq!(summary.last_stage_index, Some(0));
}

#[tokio::test(start_paused = true)]
async fn probe_and_prior_baseline_are_compared() {
    let first = {
        let mut plan = plan(vec![Stage::new(secs(5), 2)], Vec::new());
        plan.baseline_probe = Some(3);
        LoadTestOrchestrator::new(plan, MockExecutor::ok(Duration::from_millis(100)))
            .unwrap()
            .run()
            .await
            .unwrap()
    };

    let recovery = first.recovery.as_ref().unwrap();
    assert_eq!(recovery.deltas[builtin::HTTP_REQ_DURATION], Some(0.0));
    assert_eq!(recovery.overall, Some(RecoveryClass::Stable));
    assert!(first.regression.is_none());

    // Same load, latency up 75%.
    let second = LoadTestOrchestrator::new(
        plan(vec![Stage::new(secs(5), 2)], Vec::new()),
        MockExecutor::ok(Duration::from_millis(175)),
    )
    .unwrap()
    .with_baseline(first.baseline.clone())
    .run()
    .await
    .unwrap();

    let regression = second.regression.as_ref().unwrap();
    let delta = regression.deltas[builtin::HTTP_REQ_DURATION].unwrap();
    assert!((delta - 75.0).abs() < 1e-6, "{delta}");
    assert_eq!(
        regression.classes[builtin::HTTP_REQ_DURATION],
        RecoveryClass::SevereDegradation
    );
    assert_eq!(regression.overall, Some(RecoveryClass::SevereDegradation));
    assert!(second.recovery.is_none());
}

/// Behavior that records a custom counter alongside its request.
struct CheckoutBehavior;

#[async_trait]
impl Behavior for CheckoutBehavior {
    fn kind(&self) -> BehaviorKind {
        BehaviorKind::Active
    }

    fn think_time(&self) -> Duration {
        secs(1)
    }

    async fn iterate(&self, ctx: &mut IterationContext<'_>) {
        let _ = ctx.request(&RequestTemplate::get("http://target/api/checkout")).await;
        ctx.record(Sample::new("checkouts", 1.0));
    }
}

#[tokio::test(start_paused = true)]
async fn custom_behavior_records_declared_metric() {
    let mut plan = plan(
        vec![Stage::new(secs(0), 1), Stage::new(secs(3), 1)],
        vec![ThresholdSpec::parse("checkouts", "count>0").unwrap()],
    );
    plan.metrics.push(("checkouts".to_string(), MetricKind::Counter));

    let summary = LoadTestOrchestrator::new(plan, MockExecutor::ok(Duration::from_millis(10)))
        .unwrap()
        .with_behavior(Arc::new(CheckoutBehavior))
        .unwrap()
        .run()
        .await
        .unwrap();

    let checkouts = &summary.metrics["checkouts"];
    assert_eq!(checkouts.count, summary.metrics[builtin::ITERATIONS].count);
    assert!(summary.thresholds[0].ok);
    assert!(summary.phases.values().all(|metrics| metrics.contains_key(builtin::HTTP_REQS)));
}
