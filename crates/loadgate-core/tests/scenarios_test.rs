//! End-to-end checks of the synchronous pipeline: schedule, record,
//! evaluate thresholds, aggregate the gate and compare baselines.

use loadgate_core::{
    aggregate, builtin, evaluate_all, BaselineComparator, BaselineSnapshot, GateVerdict,
    GateWeights, Grade, MetricRegistry, MetricsSnapshot, PhaseClassifier, RecoveryClass, Sample,
    Stage, StageScheduler, Statistic, TagSet, ThresholdSpec,
};
use std::time::Duration;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn request(latency_ms: f64, failed: bool) -> [Sample; 2] {
    [
        Sample::new(builtin::HTTP_REQ_DURATION, latency_ms),
        Sample::flag(builtin::HTTP_REQ_FAILED, failed),
    ]
}

fn gate(specs: &[ThresholdSpec], snapshot: &MetricsSnapshot) -> loadgate_core::QualityGateResult {
    let evaluations = evaluate_all(specs, snapshot);
    aggregate(specs, &evaluations, None, &GateWeights::default())
}

#[test]
fn step_profile_with_constant_latency_grades_a() {
    let scheduler = StageScheduler::new(vec![Stage::new(secs(0), 10)], false);
    assert_eq!(scheduler.concurrency_at(Duration::ZERO), 10);

    let registry = MetricRegistry::new();
    for _ in 0..100 {
        for sample in request(200.0, false) {
            assert!(registry.record(&sample));
        }
    }
    let snapshot = registry.snapshot(secs(1));
    let all = TagSet::new();

    assert_eq!(snapshot.query(builtin::HTTP_REQ_DURATION, &Statistic::Avg, &all), Some(200.0));
    assert_eq!(
        snapshot.query(builtin::HTTP_REQ_DURATION, &Statistic::Percentile(95.0), &all),
        Some(200.0)
    );
    assert_eq!(snapshot.query(builtin::HTTP_REQ_FAILED, &Statistic::Rate, &all), Some(0.0));

    let specs = vec![ThresholdSpec::parse("http_req_duration", "p(95)<500").unwrap()];
    let result = gate(&specs, &snapshot);
    assert!(result.passed);
    assert!(result.violations.is_empty());
    assert_eq!(result.grade, Grade::A);
    assert_eq!(GateVerdict::of(&result), GateVerdict::Pass);
}

#[test]
fn two_stage_profile_interpolates_per_stage() {
    let scheduler = StageScheduler::new(vec![Stage::new(secs(30), 10), Stage::new(secs(30), 100)], false);

    // Stage 1 ramps 0 -> 10 over 30s: half way is 5.
    assert_eq!(scheduler.concurrency_at(secs(15)), 5);
    assert_eq!(scheduler.concurrency_at(secs(30)), 10);
    // Stage 2 ramps 10 -> 100 over 30s: half way is 55.
    assert_eq!(scheduler.concurrency_at(secs(45)), 55);
    assert_eq!(scheduler.concurrency_at(secs(60)), 100);
    assert_eq!(scheduler.concurrency_at(secs(90)), 0);
}

#[test]
fn sixty_percent_errors_fail_rate_threshold() {
    let registry = MetricRegistry::new();
    for i in 0..1000 {
        let [latency, failed] = request(50.0, i % 5 < 3);
        registry.record(&latency);
        registry.record(&failed);
    }
    let snapshot = registry.snapshot(secs(10));

    let rate = snapshot
        .query(builtin::HTTP_REQ_FAILED, &Statistic::Rate, &TagSet::new())
        .unwrap();
    assert!((rate - 0.6).abs() < 1e-12);

    let spec = ThresholdSpec::parse("http_req_failed", "rate<0.05").unwrap();
    let result = gate(std::slice::from_ref(&spec), &snapshot);
    assert!(!result.passed);
    assert_eq!(result.violations, vec![spec]);
    assert_eq!(GateVerdict::of(&result), GateVerdict::Fail);
}

#[test]
fn baseline_latency_growth_is_severe() {
    let before = MetricRegistry::new();
    let after = MetricRegistry::new();
    for _ in 0..20 {
        before.record(&Sample::new(builtin::HTTP_REQ_DURATION, 100.0));
        after.record(&Sample::new(builtin::HTTP_REQ_DURATION, 175.0));
    }

    let baseline = BaselineSnapshot::capture(&before.snapshot(secs(1)));
    let current = BaselineSnapshot::capture(&after.snapshot(secs(1)));
    let comparison = BaselineComparator::default().compare(&baseline, &current);

    let delta = comparison.deltas[builtin::HTTP_REQ_DURATION].unwrap();
    assert!((delta - 75.0).abs() < 1e-9);
    assert_eq!(
        comparison.classes[builtin::HTTP_REQ_DURATION],
        RecoveryClass::SevereDegradation
    );
    assert_eq!(comparison.overall, Some(RecoveryClass::SevereDegradation));
}

#[test]
fn phase_scoped_threshold_only_sees_its_phase() {
    let scheduler = StageScheduler::new(
        vec![
            Stage::new(secs(30), 10).named("baseline"),
            Stage::new(secs(30), 100).named("spike"),
        ],
        false,
    );
    let classifier = PhaseClassifier::from_boundaries(&scheduler.phase_boundaries());
    let registry = MetricRegistry::new();

    for t in 0..60 {
        let elapsed = secs(t);
        let phase = classifier.classify(elapsed, scheduler.concurrency_at(elapsed));
        // Failures only while spiking.
        let failed = phase == "spike";
        registry.record(&Sample::flag(builtin::HTTP_REQ_FAILED, failed).with_tag("phase", phase).at(elapsed));
    }
    let snapshot = registry.snapshot(secs(60));

    let specs = vec![
        ThresholdSpec::parse("http_req_failed{phase:baseline}", "rate<0.01").unwrap(),
        ThresholdSpec::parse("http_req_failed{phase:spike}", "rate<0.5").unwrap(),
        ThresholdSpec::parse("http_req_failed{phase:recovery}", "rate<0.01").unwrap(),
    ];
    let evaluations = evaluate_all(&specs, &snapshot);

    assert!(evaluations[0].ok);
    assert!(!evaluations[1].ok);
    assert_eq!(evaluations[1].observed, Some(1.0));
    assert!(evaluations[2].ok && evaluations[2].vacuous);
}
