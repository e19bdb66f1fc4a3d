use std::process::Command;

use sandexec::{CodePackager, EntryPolicy, ExecutionRequest, ResultEnvelope};
use serde_json::json;

use super::{executor_with, fixture_source, keywords, test_executor};

/// Run a packaged unit directly, with extra variables in its environment
fn run_unit_with_env(
    packager: &CodePackager,
    request: &ExecutionRequest,
    env: &[(&str, &str)],
) -> ResultEnvelope {
    let tmp = tempfile::tempdir().expect("Failed to create temp dir");
    let script = tmp.path().join("unit.py");
    let result = tmp.path().join("unit.result");

    let unit = packager.package(request, &result).expect("Failed to package");
    std::fs::write(&script, unit).unwrap();

    let status = Command::new("python3")
        .arg(&script)
        .envs(env.iter().copied())
        .status()
        .expect("Failed to run python3");
    assert!(status.success());

    ResultEnvelope::from_slice(&std::fs::read(&result).unwrap()).expect("Malformed envelope")
}

#[test]
fn test_unit_strips_sensitive_variables() {
    let packager = CodePackager::new(vec!["SECRET".to_string()], EntryPolicy::Last);
    let request = ExecutionRequest::new(fixture_source("read_environment.py"))
        .with_keyword("names", json!(["SECRET_TOKEN", "VISIBLE_TOKEN"]));

    let envelope = run_unit_with_env(
        &packager,
        &request,
        &[("SECRET_TOKEN", "xyz"), ("VISIBLE_TOKEN", "abc")],
    );

    assert_eq!(
        envelope.into_result(),
        Ok(json!({"SECRET_TOKEN": null, "VISIBLE_TOKEN": "abc"}))
    );
}

#[test]
fn test_unit_records_failures_with_exit_status_zero() {
    let packager = CodePackager::new(Vec::new(), EntryPolicy::Last);
    let request = ExecutionRequest::new(fixture_source("divide_by_zero.py")).with_keyword("a", 1);

    let envelope = run_unit_with_env(&packager, &request, &[]);

    assert!(!envelope.is_success());
    assert_eq!(envelope.into_result(), Err("division by zero".to_string()));
}

#[tokio::test]
async fn test_executor_withholds_configured_prefixes() {
    // HOME is present in practically every environment; treat it as a secret.
    if std::env::var_os("HOME").is_none() {
        return;
    }
    let (_tmp, executor) =
        executor_with(|config| config.sensitive_env_prefixes = vec!["HOM".to_string()]);

    let value = executor
        .execute(
            &fixture_source("read_environment.py"),
            &keywords(json!({"names": ["HOME"]})),
        )
        .await
        .expect("Execution failed");

    assert_eq!(value, json!({"HOME": null}));
}

#[tokio::test]
async fn test_non_sensitive_variables_reach_the_code() {
    if std::env::var_os("PATH").is_none() {
        return;
    }
    let (_tmp, executor) = test_executor();

    let value = executor
        .execute(
            &fixture_source("read_environment.py"),
            &keywords(json!({"names": ["PATH"]})),
        )
        .await
        .expect("Execution failed");

    assert!(value["PATH"].is_string());
}

#[tokio::test]
async fn test_child_runs_in_configured_work_dir() {
    let (tmp, executor) = test_executor();

    let value = executor
        .execute("import os\n\ndef cwd():\n    return os.getcwd()", &Default::default())
        .await
        .expect("Execution failed");

    let expected = tmp.path().canonicalize().unwrap();
    assert_eq!(value, json!(expected.to_str().unwrap()));
}
