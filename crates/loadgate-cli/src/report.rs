//! Console rendering of run summaries and baseline comparisons.

use loadgate_core::{builtin, BaselineComparison, GateVerdict, MetricSummary, RunPlan, RunSummary};
use std::fmt::Write;

fn ms(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.2}ms"))
}

fn num(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"))
}

fn status(ok: bool) -> &'static str {
    if ok {
        "✅"
    } else {
        "❌"
    }
}

fn metric_line(name: &str, summary: &MetricSummary) -> String {
    match (summary.avg, summary.value) {
        (Some(_), _) => format!(
            "  {name:<22} avg={} min={} med={} p90={} p95={} p99={} max={}",
            ms(summary.avg),
            ms(summary.min),
            ms(summary.med),
            ms(summary.p90),
            ms(summary.p95),
            ms(summary.p99),
            ms(summary.max),
        ),
        (None, Some(value)) => format!(
            "  {name:<22} value={value:.0} min={} max={}",
            num(summary.min),
            num(summary.max)
        ),
        (None, None) => format!(
            "  {name:<22} count={} rate={}",
            num(summary.count),
            summary.rate.map_or_else(|| "-".to_string(), |r| format!("{r:.4}"))
        ),
    }
}

/// Human summary printed after every run.
pub fn render_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    let verdict = match summary.verdict {
        GateVerdict::Pass => "✅ PASS",
        GateVerdict::Unstable => "⚠️  UNSTABLE",
        GateVerdict::Fail => "❌ FAIL",
    };

    let _ = writeln!(out, "\n📊 Load test: {} ({})", summary.name, summary.run_id);
    let _ = writeln!(out, "   Duration: {:.1}s", summary.duration_secs);
    if let Some(reason) = &summary.abort_reason {
        let _ = writeln!(
            out,
            "   Aborted at {:.1}s: {} {} (observed {})",
            reason.elapsed_secs,
            reason.threshold,
            reason.expression,
            num(reason.observed)
        );
    }

    let _ = writeln!(out, "\nMetrics:");
    for (name, metric) in &summary.metrics {
        let _ = writeln!(out, "{}", metric_line(name, metric));
    }

    if summary.phases.len() > 1 {
        let _ = writeln!(out, "\nPhases:");
        for (phase, metrics) in &summary.phases {
            let requests = metrics
                .get(builtin::HTTP_REQS)
                .and_then(|m| m.count)
                .unwrap_or(0.0);
            let p95 = metrics.get(builtin::HTTP_REQ_DURATION).and_then(|m| m.p95);
            let failed = metrics.get(builtin::HTTP_REQ_FAILED).and_then(|m| m.rate);
            let _ = writeln!(
                out,
                "  {phase:<16} reqs={requests:.0} p95={} failed={}",
                ms(p95),
                failed.map_or_else(|| "-".to_string(), |r| format!("{:.2}%", r * 100.0))
            );
        }
    }

    if !summary.thresholds.is_empty() {
        let _ = writeln!(out, "\nThresholds:");
        for report in &summary.thresholds {
            let observed = if report.vacuous {
                "no samples".to_string()
            } else {
                num(report.observed)
            };
            let _ = writeln!(
                out,
                "  {} {}: {} [{}] observed={}",
                status(report.ok),
                report.metric,
                report.expression,
                report.category,
                observed
            );
        }
    }

    for (label, comparison) in [
        ("Recovery (pre → post probe)", &summary.recovery),
        ("Regression (prior run → this run)", &summary.regression),
    ] {
        if let Some(comparison) = comparison {
            let _ = writeln!(out, "\n{label}:");
            out.push_str(&render_comparison(comparison));
        }
    }

    let _ = writeln!(
        out,
        "\nQuality gate: {verdict}  score {:.1} grade {}",
        summary.gate.composite_score, summary.gate.grade
    );
    for (category, score) in &summary.gate.category_scores {
        let _ = writeln!(out, "  {category:<14} {score:.1}");
    }
    if summary.dropped_samples > 0 {
        let _ = writeln!(out, "  dropped samples: {}", summary.dropped_samples);
    }

    out
}

/// Per-metric deltas and the overall class.
pub fn render_comparison(comparison: &BaselineComparison) -> String {
    let mut out = String::new();
    for (metric, delta) in &comparison.deltas {
        let line = match (delta, comparison.classes.get(metric)) {
            (Some(delta), Some(class)) => format!("  {metric:<22} {delta:+.1}% {class}"),
            _ => format!("  {metric:<22} n/a (zero baseline)"),
        };
        let _ = writeln!(out, "{line}");
    }
    let overall = comparison
        .overall
        .map_or_else(|| "n/a".to_string(), |class| class.to_string());
    let _ = writeln!(out, "  overall: {overall}");
    out
}

/// Resolved plan, printed by `validate`.
pub fn render_plan(plan: &RunPlan) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "✅ Configuration valid: {}", plan.name);

    let _ = writeln!(
        out,
        "\nStages ({:.0}s total{}):",
        plan.scheduler.total_duration().as_secs_f64(),
        if plan.scheduler.holds() { ", hold" } else { "" }
    );
    for (index, stage) in plan.scheduler.stages().iter().enumerate() {
        let _ = writeln!(
            out,
            "  {index}: {:>6.1}s → {} vus{}",
            stage.duration.as_secs_f64(),
            stage.target,
            stage
                .name
                .as_ref()
                .map_or_else(String::new, |name| format!(" ({name})"))
        );
    }

    let _ = writeln!(out, "\nPhases:");
    for rule in plan.classifier.rules() {
        let _ = writeln!(out, "  {rule}");
    }

    let _ = writeln!(out, "\nThresholds:");
    for spec in &plan.thresholds {
        let category = spec
            .category
            .map_or_else(|| "inferred".to_string(), |c| c.to_string());
        let abort = if spec.abort_on_fail {
            format!(", abort after {:?}", spec.delay_abort_eval)
        } else {
            String::new()
        };
        let _ = writeln!(out, "  {} [{category}{abort}]", spec.describe());
    }

    let _ = writeln!(out, "\nBehaviors ({:?}):", plan.behaviors.selection);
    for behavior in &plan.behaviors.mix {
        let _ = writeln!(
            out,
            "  {} weight={} think={:?} requests={}",
            behavior.kind,
            behavior.weight,
            behavior.think_time,
            behavior.requests.len()
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadgate_core::{BaselineComparator, BaselineSnapshot, MetricRegistry, Sample};
    use std::time::Duration;

    fn snapshot_with_avg(avg: f64) -> BaselineSnapshot {
        let registry = MetricRegistry::new();
        registry.record(&Sample::new(builtin::HTTP_REQ_DURATION, avg));
        BaselineSnapshot::capture(&registry.snapshot(Duration::from_secs(1)))
    }

    #[test]
    fn test_comparison_lists_delta_and_class() {
        let comparison =
            BaselineComparator::default().compare(&snapshot_with_avg(100.0), &snapshot_with_avg(175.0));
        let text = render_comparison(&comparison);

        assert!(text.contains("http_req_duration"));
        assert!(text.contains("+75.0% severe degradation"));
        assert!(text.contains("overall: severe degradation"));
    }

    #[test]
    fn test_metric_line_per_kind() {
        let registry = MetricRegistry::new();
        registry.record(&Sample::new(builtin::HTTP_REQ_DURATION, 120.0));
        registry.record(&Sample::new(builtin::VUS, 4.0));
        registry.record(&Sample::flag(builtin::HTTP_REQ_FAILED, false));
        let summaries = registry.snapshot(Duration::from_secs(1)).summaries();

        let trend = metric_line(builtin::HTTP_REQ_DURATION, &summaries[builtin::HTTP_REQ_DURATION]);
        assert!(trend.contains("avg=120.00ms"));
        let gauge = metric_line(builtin::VUS, &summaries[builtin::VUS]);
        assert!(gauge.contains("value=4"));
        let rate = metric_line(builtin::HTTP_REQ_FAILED, &summaries[builtin::HTTP_REQ_FAILED]);
        assert!(rate.contains("rate=0.0000"));
    }
}
