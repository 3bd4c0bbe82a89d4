use std::path::PathBuf;
use std::time::Duration;

use xpthread_harness::{SmokeConfig, run_smoke, summarize_log};

fn scratch_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("xpthread-harness-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create scratch dir");
    dir.join(name)
}

#[test]
fn reference_run_passes_every_check() {
    let report = run_smoke(&SmokeConfig::default()).expect("smoke run");
    assert!(report.ok, "{report:?}");
    assert_eq!(report.once_runs, 1);
    assert_eq!(report.counter, 4);
    assert_eq!(report.return_values, vec![10, 20, 30, 40]);
    let names: Vec<_> = report.checks.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        names,
        [
            "xpthread_once",
            "xpthread_create",
            "xpthread_mutex_timedlock",
            "xpthread_mutex_trylock"
        ]
    );
}

#[test]
fn wide_run_keeps_counter_exact() {
    let cfg = SmokeConfig {
        threads: 32,
        timed_lock: Duration::from_millis(200),
        log: None,
    };
    let report = run_smoke(&cfg).expect("smoke run");
    assert!(report.ok, "{report:?}");
    assert_eq!(report.counter, 32);
    assert_eq!(report.return_values.last(), Some(&320));
}

#[test]
fn evidence_log_has_one_valid_line_per_check() {
    let path = scratch_path("smoke.log.jsonl");
    let cfg = SmokeConfig {
        log: Some(path.clone()),
        ..SmokeConfig::default()
    };
    let report = run_smoke(&cfg).expect("smoke run");

    let summary = summarize_log(&path).expect("read log");
    assert!(summary.ok, "{:?}", summary.errors);
    assert_eq!(summary.lines, report.checks.len());

    let body = std::fs::read_to_string(&path).unwrap();
    for line in body.lines() {
        let v: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(v["event"], "smoke.check");
        assert_eq!(v["outcome"], "pass");
        assert!(v["trace_id"].as_str().unwrap().contains("::smoke::"));
    }
}

#[test]
fn malformed_log_is_reported() {
    let path = scratch_path("broken.log.jsonl");
    std::fs::write(&path, "{\"event\":\"x\"}\nnot json\n").unwrap();
    let summary = summarize_log(&path).expect("read log");
    assert!(!summary.ok);
    assert_eq!(summary.lines, 2);
    assert!(summary.errors.iter().any(|e| e.contains("timestamp")));
    assert!(summary.errors.iter().any(|e| e.contains("invalid JSON")));
}

#[test]
fn unopenable_log_path_is_an_error() {
    let cfg = SmokeConfig {
        log: Some(PathBuf::from("/nonexistent-dir/xpthread/smoke.jsonl")),
        ..SmokeConfig::default()
    };
    let err = run_smoke(&cfg).unwrap_err();
    assert!(err.to_string().contains("cannot open log"), "{err}");
}
