use std::fs;

use lib_common::loggers::setup_logging;
use tempfile::tempdir;
use tokio::time::{Duration, sleep};

// Installs the global subscriber, so this file holds a single test.
#[tokio::test]
async fn test_setup_logging_writes_json_file() {
    let temp_dir = tempdir().expect("Failed to create temporary directory");
    let log_dir = temp_dir.path().join("logs");

    let guard = setup_logging(&log_dir, "info", "test_buffer").expect("Failed to set up logging");

    tracing::info!(query_id = "4242", "Buffer refreshed successfully");

    sleep(Duration::from_millis(100)).await;
    drop(guard);

    let log_files: Vec<_> = fs::read_dir(&log_dir)
        .expect("Failed to read log directory")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("test_buffer"))
        })
        .collect();
    assert_eq!(log_files.len(), 1, "expected one daily log file");

    let contents = fs::read_to_string(&log_files[0]).expect("Failed to read log file");
    let lines: Vec<serde_json::Value> = contents
        .lines()
        .map(|line| serde_json::from_str(line).expect("log line is JSON"))
        .collect();

    assert!(lines.iter().any(|l| {
        l["fields"]["message"] == "Buffer refreshed successfully" && l["fields"]["query_id"] == "4242"
    }));

    // A second global subscriber is refused.
    assert!(setup_logging(&log_dir, "info", "test_buffer").is_err());
}
