//! End-to-end runs of the `migrator` binary.

use std::path::Path;
use std::process::Command;

use cluster::{codec, WorkerEvent};

fn migrator() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_migrator"));
    command.env_remove("RUST_LOG").arg("--quiet");
    command
}

fn write_config(dir: &Path, implementation: &str, count: usize, page_size: usize) -> std::path::PathBuf {
    let out = dir.join("out");
    let config = format!(
        r#"
[cluster]
implementation = "{implementation}"
size = 3
startup_timeout_secs = 20

[source]
source_type = "mock"
page_size = {page_size}
params = {{ count = "{count}" }}

[sink]
name = "users"
sink_type = "file"
params = {{ dir = "{}" }}
"#,
        out.display()
    );
    let path = dir.join("migrator.toml");
    std::fs::write(&path, config).unwrap();
    path
}

fn lines_per_file(dir: &Path) -> Vec<(String, usize)> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| {
            let path = entry.unwrap().path();
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            let lines = std::fs::read_to_string(&path).unwrap().lines().count();
            (name, lines)
        })
        .collect();
    files.sort();
    files
}

#[test]
fn test_process_pool_run_writes_every_record() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "process_pool", 1000, 100);

    let output = migrator()
        .args(["run", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    // 10 batches over 3 workers: 4, 3, 3
    let files = lines_per_file(&dir.path().join("out"));
    assert_eq!(
        files,
        vec![
            ("users-worker-0.jsonl".to_string(), 400),
            ("users-worker-1.jsonl".to_string(), 300),
            ("users-worker-2.jsonl".to_string(), 300),
        ]
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("process_pool"));
    assert!(stdout.contains("10 of 10 dispatched batches processed, 1000 records"));
}

#[test]
fn test_cli_override_switches_substrate() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "process_pool", 90, 10);

    let output = migrator()
        .args(["run", "--implementation", "threading", "--max-batches", "6", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert!(output.status.success());

    let total: usize = lines_per_file(&dir.path().join("out"))
        .iter()
        .map(|(_, lines)| lines)
        .sum();
    assert_eq!(total, 60);
    assert!(String::from_utf8_lossy(&output.stdout).contains("thread_pool"));
}

#[test]
fn test_dry_run_does_not_touch_the_sink() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "cooperative", 10, 5);

    let status = migrator()
        .args(["run", "--dry-run", "--config"])
        .arg(&config)
        .status()
        .unwrap();

    assert!(status.success());
    assert!(!dir.path().join("out").exists());
}

#[test]
fn test_worker_reports_startup_failure_on_its_pipe() {
    let dir = tempfile::tempdir().unwrap();

    let output = migrator()
        .args(["worker", "--config"])
        .arg(dir.path().join("missing.toml"))
        .env("MIGRATOR_WORKER_INDEX", "2")
        .output()
        .unwrap();

    assert!(!output.status.success());

    let (header, payload) = output.stdout.split_at(codec::FRAME_HEADER_LEN);
    let len = u32::from_le_bytes(header.try_into().unwrap()) as usize;
    assert_eq!(len, payload.len());

    let event: WorkerEvent = codec::decode(payload).unwrap();
    assert!(matches!(event, WorkerEvent::StartupFailed { .. }));
}

#[test]
fn test_validate_json_output() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "asyncio", 10, 5);

    let output = migrator()
        .args(["validate", "--json", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert!(output.status.success());

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["valid"], true);
    assert_eq!(result["summary"]["implementation"], "cooperative");
    assert_eq!(result["summary"]["cluster_size"], 3);
}

#[test]
fn test_benchmark_compares_every_implementation() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "cooperative", 300, 30);
    let saved = dir.path().join("benchmark.json");

    let output = migrator()
        .args(["benchmark", "--json", "--config"])
        .arg(&config)
        .arg("--output")
        .arg(&saved)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["cluster_size"], 3);
    assert_eq!(report["page_size"], 30);
    assert_eq!(report["interrupted"], false);

    let results = report["results"].as_array().unwrap();
    let implementations: Vec<_> = results
        .iter()
        .map(|r| r["implementation"].as_str().unwrap())
        .collect();
    assert_eq!(implementations, vec!["cooperative", "thread_pool", "process_pool"]);
    for result in results {
        assert_eq!(result["records_processed"], 300);
        assert_eq!(result["pages_read"], 10);
        assert!(result.get("error").is_none());
    }

    let on_disk: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&saved).unwrap()).unwrap();
    assert_eq!(on_disk["results"].as_array().unwrap().len(), 3);
}
