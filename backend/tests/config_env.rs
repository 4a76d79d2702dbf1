//! Configuration loading from files and the process environment.

mod support;

use std::time::Duration;

use stamp_rust::config::StampConfig;
use support::with_scoped_env;

const CLEARED: [(&str, Option<&str>); 6] = [
    ("HOST", None),
    ("PORT", None),
    ("STAMP_CACHE_ENABLED", None),
    ("STAMP_JOB_RETENTION_SECS", None),
    ("STAMP_STALL_TIMEOUT_SECS", None),
    ("STAMP_GAP_THRESHOLD_HOURS", None),
];

#[test]
fn test_load_from_stamp_config_then_env() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("custom.toml");
    std::fs::write(
        &path,
        "[server]\nport = 9100\nmax_upload_mb = 64\n\n[jobs]\nretention_secs = 120\n",
    )
    .unwrap();
    let path_str = path.to_string_lossy().to_string();

    let mut changes = CLEARED.to_vec();
    changes.push(("STAMP_CONFIG", Some(path_str.as_str())));
    changes.push(("HOST", Some("127.0.0.1")));
    changes.push(("STAMP_STALL_TIMEOUT_SECS", Some("45")));

    let config = with_scoped_env(&changes, StampConfig::load).unwrap();
    assert_eq!(config.bind_address(), "127.0.0.1:9100");
    assert_eq!(config.max_upload_bytes(), 64 * 1024 * 1024);
    let runner = config.runner_config();
    assert_eq!(runner.retention, Duration::from_secs(120));
    assert_eq!(runner.stall_timeout, Some(Duration::from_secs(45)));
}

#[test]
fn test_missing_config_file_is_an_error() {
    let mut changes = CLEARED.to_vec();
    changes.push(("STAMP_CONFIG", Some("/nonexistent/stamp.toml")));
    let err = with_scoped_env(&changes, StampConfig::load).unwrap_err();
    assert!(format!("{:#}", err).contains("/nonexistent/stamp.toml"));
}

#[test]
fn test_bad_env_value_names_variable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.toml");
    std::fs::write(&path, "").unwrap();
    let path_str = path.to_string_lossy().to_string();

    let mut changes = CLEARED.to_vec();
    changes.push(("STAMP_CONFIG", Some(path_str.as_str())));
    changes.push(("STAMP_GAP_THRESHOLD_HOURS", Some("soon")));
    let err = with_scoped_env(&changes, StampConfig::load).unwrap_err();
    assert!(err.to_string().contains("STAMP_GAP_THRESHOLD_HOURS"));
}
