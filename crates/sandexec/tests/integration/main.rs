//! Integration tests for sandexec
//!
//! These tests require a `python3` interpreter on the PATH.
//! Run with: cargo test -p sandexec --features integration-tests
//!
//! Tests that require root or a `sandbox` account are marked `#[ignore]`. To include them:
//!    cargo test -p sandexec --features integration-tests -- --include-ignored

#![cfg(feature = "integration-tests")]

use std::fs;
use std::path::Path;

use sandexec::{Config, Executor, Keywords};
use serde_json::Value;
use tempfile::TempDir;

mod config_loading;
mod environment;
mod hygiene;

const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Helper to get fixture file content
pub(crate) fn fixture_source(name: &str) -> String {
    let path = format!("{FIXTURES_PATH}/functions/{name}");
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read fixture {path}: {e}"))
}

pub(crate) fn fixture_config_path(name: &str) -> String {
    format!("{FIXTURES_PATH}/configs/{name}")
}

/// Config rooted in a throwaway directory, with a short deadline
pub(crate) fn test_config(tmp: &Path) -> Config {
    Config {
        sandbox_root: tmp.join("sandbox"),
        work_dir: Some(tmp.to_path_buf()),
        timeout: Some(20.0),
        ..Config::default()
    }
}

pub(crate) fn test_executor() -> (TempDir, Executor) {
    executor_with(|_| {})
}

pub(crate) fn executor_with(adjust: impl FnOnce(&mut Config)) -> (TempDir, Executor) {
    let tmp = tempfile::tempdir().expect("Failed to create temp dir");
    let mut config = test_config(tmp.path());
    adjust(&mut config);
    let executor = Executor::new(config).expect("Failed to create executor");
    (tmp, executor)
}

/// Build keyword arguments from a JSON object literal
pub(crate) fn keywords(value: Value) -> Keywords {
    match value {
        Value::Object(map) => map,
        other => panic!("keywords must be a JSON object, got {other}"),
    }
}

pub(crate) fn assert_no_artifacts(executor: &Executor) {
    for dir in [executor.store().script_dir(), executor.store().result_dir()] {
        let leftovers: Vec<_> = fs::read_dir(dir)
            .expect("Failed to list sandbox directory")
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert!(
            leftovers.is_empty(),
            "{} still holds {leftovers:?}",
            dir.display()
        );
    }
}
