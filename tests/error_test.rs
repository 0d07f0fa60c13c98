//! Tests for error types

use std::path::PathBuf;
use std::time::Duration;

use exds::{Error, Phase};

#[test]
fn test_invalid_state_error() {
    let error = Error::InvalidState("DatasetMatrix 'dataset' already finalized".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Invalid state"));
    assert!(error_str.contains("already finalized"));
}

#[test]
fn test_label_not_found_error() {
    let error = Error::LabelNotFound {
        axis: "X".to_string(),
        label: "f9".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Label not found"));
    assert!(error_str.contains("'f9'"));
    assert!(error_str.contains("in X"));
}

#[test]
fn test_row_not_found_error() {
    let error = Error::RowNotFound("r42".to_string());
    assert!(format!("{error}").contains("Row not found: r42"));
}

#[test]
fn test_already_locked_error() {
    let error = Error::AlreadyLocked {
        path: PathBuf::from("/data/exds/rcv1/locked_exds"),
        holder: "exds:rcv1 (pid 17 on worker-3)".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("/data/exds/rcv1/locked_exds"));
    assert!(error_str.contains("already locked"));
    assert!(error_str.contains("pid 17 on worker-3"));
}

#[test]
fn test_not_locked_error() {
    let error = Error::NotLocked(PathBuf::from("/data/exds/rcv1/locked_exds"));
    let error_str = format!("{error}");
    assert!(error_str.contains("not held by this process"));
    assert!(error_str.contains("locked_exds"));
}

#[test]
fn test_lock_timeout_error() {
    let error = Error::LockTimeout {
        path: PathBuf::from("/data/exds/rcv1/locked_exds"),
        waited: Duration::from_secs(30),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Timed out after 30s"));
}

#[test]
fn test_configuration_error_lists_violations() {
    let error = Error::Configuration(vec![
        "random_seed must be set".to_string(),
        "lock_name must not be empty".to_string(),
    ]);
    let error_str = format!("{error}");
    assert!(error_str.starts_with("Configuration error"));
    assert!(error_str.contains("random_seed must be set; lock_name must not be empty"));
}

#[test]
fn test_experimental_dataset_error_names_phase() {
    let error = Error::in_phase(Phase::Load, Error::RowNotFound("r1".to_string()));
    let error_str = format!("{error}");
    assert!(error_str.contains("Experimental dataset load failed"));
    assert!(error_str.contains("Row not found: r1"));
    assert!(std::error::Error::source(&error).is_some());
}

#[test]
fn test_io_error_conversion() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "X.parquet");
    let error: Error = io_error.into();
    let error_str = format!("{error}");
    assert!(error_str.contains("IO error"));
    assert!(error_str.contains("X.parquet"));
}

#[test]
fn test_json_error_conversion() {
    let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let error: Error = json_error.into();
    assert!(format!("{error}").contains("JSON error"));
}

#[test]
fn test_phase_display() {
    let phases = [
        Phase::Build,
        Phase::Process,
        Phase::Split,
        Phase::Finalize,
        Phase::Save,
        Phase::Load,
    ];
    let names: Vec<String> = phases.iter().map(ToString::to_string).collect();
    assert_eq!(names, ["build", "process", "split", "finalize", "save", "load"]);
}

#[test]
fn test_error_debug() {
    let error = Error::StorageError("manifest missing".to_string());
    let debug_str = format!("{error:?}");
    assert!(debug_str.contains("StorageError"));
}
