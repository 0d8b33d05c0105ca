use std::fs;

use dispatch_headless::{run, RunMode, RunReport, ScenarioConfig};

#[test]
fn scenario_file_drives_a_fast_run_and_report_round_trips() {
    let dir = tempfile::tempdir().expect("tempdir");
    let scenario_path = dir.path().join("scenario.toml");
    fs::write(
        &scenario_path,
        r#"
        seed = 5
        vehicles = 6
        calls_per_hour = 40.0
        duration_ms = 3600000.0

        [scheduler]
        burst_limit = 100
        "#,
    )
    .expect("write scenario");

    let config = ScenarioConfig::load(&scenario_path).expect("load scenario");
    assert_eq!(config.vehicles, 6);

    let report = run(&config, RunMode::Fast).expect("run");
    assert_eq!(report.mode, RunMode::Fast);
    assert_eq!(report.seed, 5);
    assert!(report.calls_received > 0);
    assert_eq!(report.missions_completed, report.calls_received);
    assert_eq!(
        report.events_by_kind.get("CallReceived").copied(),
        Some(report.calls_received)
    );

    let report_path = dir.path().join("report.json");
    report.write_json(&report_path).expect("write report");
    let text = fs::read_to_string(&report_path).expect("read report");
    assert!(text.contains("\"mode\": \"fast\""));
    let parsed: RunReport = serde_json::from_str(&text).expect("parse report");
    assert_eq!(parsed.calls_received, report.calls_received);
    assert_eq!(parsed.events_by_kind, report.events_by_kind);
    assert_eq!(parsed.mode, RunMode::Fast);
}

#[test]
fn missing_scenario_file_is_an_io_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = ScenarioConfig::load(dir.path().join("absent.toml")).expect_err("missing file");
    assert!(err.to_string().contains("absent.toml"));
}

#[test]
fn zero_call_rate_produces_an_empty_report() {
    let config = ScenarioConfig::default().with_calls_per_hour(0.0);
    let report = run(&config, RunMode::Fast).expect("run");
    assert_eq!(report.calls_received, 0);
    assert_eq!(report.events_fired, 0);
    assert_eq!(report.mean_response_ms, None);
}
