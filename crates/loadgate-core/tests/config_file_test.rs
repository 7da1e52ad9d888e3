//! Configuration loading from files on disk.

use loadgate_core::config::BehaviorSelection;
use loadgate_core::{BehaviorKind, ConfigError, GateCategory, RunConfigFile};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(contents: &str, suffix: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

const FULL_YAML: &str = r#"
name: checkout-spike
max_duration: 10m
control_loop_tick: 500ms
stages:
  - { duration: 30s, target: 10, name: warmup }
  - { duration: 0s, target: 100 }
  - { duration: 1m, target: 100, name: spike }
thresholds:
  - metric: http_req_duration
    conditions: ["p(95)<500", "avg<200"]
  - metric: "http_req_failed{phase:spike}"
    conditions:
      - threshold: "rate<0.05"
        abort_on_fail: true
        delay_abort_eval: 10s
  - metric: checkout_errors
    conditions:
      - { threshold: "count<5", category: availability }
weights: { latency: 0.5, error_rate: 0.5, throughput: 0.0, availability: 0.0 }
metrics:
  - { name: checkout_errors, kind: counter }
behaviors:
  selection: weighted
  mix:
    - kind: casual
      weight: 3
      think_time: 2s
      requests:
        - { name: list, method: get, url: "http://localhost:8080/api/items", timeout: 5s }
    - kind: power
      requests:
        - { url: "http://localhost:8080/api/cart", method: POST, body: "{}" }
baseline_probe: { iterations: 3 }
"#;

#[test]
fn loads_full_yaml_file() {
    let file = write_config(FULL_YAML, ".yaml");
    let plan = RunConfigFile::load(file.path()).unwrap().resolve().unwrap();

    assert_eq!(plan.name, "checkout-spike");
    assert_eq!(plan.max_duration, Some(Duration::from_secs(600)));
    assert_eq!(plan.control_loop_tick, Duration::from_millis(500));
    assert_eq!(plan.scheduler.stages().len(), 3);
    assert_eq!(plan.scheduler.concurrency_at(Duration::from_secs(30)), 100);
    assert_eq!(plan.classifier.classify(Duration::from_secs(45), 100), "spike");

    assert_eq!(plan.thresholds.len(), 4);
    assert!(plan.thresholds[2].abort_on_fail);
    assert_eq!(plan.thresholds[3].category, Some(GateCategory::Availability));
    assert_eq!(plan.metrics, vec![("checkout_errors".to_string(), loadgate_core::MetricKind::Counter)]);

    assert_eq!(plan.behaviors.selection, BehaviorSelection::Weighted);
    let casual = &plan.behaviors.mix[0];
    assert_eq!(casual.kind, BehaviorKind::Casual);
    assert_eq!(casual.weight, 3);
    assert_eq!(casual.think_time, Duration::from_secs(2));
    assert_eq!(casual.requests[0].method, "GET");
    assert_eq!(casual.requests[0].label(), "list");
    let power = &plan.behaviors.mix[1];
    assert_eq!(power.think_time, Duration::from_millis(250));
    assert_eq!(power.requests[0].label(), "http://localhost:8080/api/cart");
    assert_eq!(plan.baseline_probe, Some(3));
}

#[test]
fn loads_json_and_toml() {
    let json = r#"{
        "stages": [{ "duration": 5, "target": 2 }],
        "behaviors": { "mix": [{ "kind": "active", "requests": [{ "url": "http://a" }] }] }
    }"#;
    let file = write_config(json, ".json");
    let plan = RunConfigFile::load(file.path()).unwrap().resolve().unwrap();
    assert_eq!(plan.scheduler.total_duration(), Duration::from_secs(5));

    let toml = r#"
hold = true

[[stages]]
duration = "10s"
target = 4

[[behaviors.mix]]
kind = "background"

[[behaviors.mix.requests]]
url = "http://b"
"#;
    let file = write_config(toml, ".toml");
    let plan = RunConfigFile::load(file.path()).unwrap().resolve().unwrap();
    assert!(plan.scheduler.holds());
    assert_eq!(plan.behaviors.mix[0].think_time, Duration::from_secs(10));
}

#[test]
fn environment_overrides_file_values() {
    let file = write_config(FULL_YAML, ".yaml");
    std::env::set_var("LOADGATE__GRACE_PERIOD", "5s");
    let loaded = RunConfigFile::load(file.path());
    std::env::remove_var("LOADGATE__GRACE_PERIOD");

    let plan = loaded.unwrap().resolve().unwrap();
    assert_eq!(plan.grace_period, Duration::from_secs(5));
}

#[test]
fn missing_file_is_a_load_error() {
    let err = RunConfigFile::load("/nonexistent/loadgate.yaml").unwrap_err();
    assert!(matches!(err, ConfigError::Load(_)));
}

#[test]
fn bad_threshold_names_the_key() {
    let broken = FULL_YAML.replace("p(95)<500", "p(95)<fast");
    let file = write_config(&broken, ".yaml");
    let err = RunConfigFile::load(file.path()).unwrap().resolve().unwrap_err();

    let message = err.to_string();
    assert!(message.contains("http_req_duration"), "{message}");
    assert!(message.contains("p(95)<fast"), "{message}");
}
