use std::fs;

use sandexec::{ExecuteError, Keywords};
use serde_json::json;

use super::{assert_no_artifacts, executor_with, fixture_source, keywords, test_executor};

#[tokio::test]
async fn test_no_artifacts_after_success() {
    let (_tmp, executor) = test_executor();

    executor
        .execute(&fixture_source("add.py"), &keywords(json!({"a": 2, "b": 3})))
        .await
        .expect("Execution failed");

    assert_no_artifacts(&executor);
}

#[tokio::test]
async fn test_no_artifacts_after_business_failure() {
    let (_tmp, executor) = test_executor();

    let result = executor
        .execute(&fixture_source("divide_by_zero.py"), &keywords(json!({"a": 1})))
        .await;

    assert!(result.is_err());
    assert_no_artifacts(&executor);
}

#[tokio::test]
async fn test_no_artifacts_after_interpreter_fault() {
    let (_tmp, executor) = test_executor();

    let result = executor
        .execute(&fixture_source("exit_with_status.py"), &Keywords::new())
        .await;

    assert!(matches!(result, Err(ExecuteError::Interpreter { .. })));
    assert_no_artifacts(&executor);
}

#[tokio::test]
async fn test_no_artifacts_after_missing_result() {
    let (_tmp, executor) = test_executor();

    let result = executor
        .execute(&fixture_source("exit_silently.py"), &Keywords::new())
        .await;

    assert!(matches!(result, Err(ExecuteError::ResultMissing(_))));
    assert_no_artifacts(&executor);
}

#[tokio::test]
async fn test_no_artifacts_after_timeout() {
    let (_tmp, executor) = executor_with(|config| config.timeout = Some(0.5));

    let result = executor
        .execute(&fixture_source("sleep_forever.py"), &Keywords::new())
        .await;

    assert!(result.is_err_and(|err| err.is_timeout()));
    assert_no_artifacts(&executor);
}

#[tokio::test]
async fn test_no_artifacts_after_cancellation() {
    let (_tmp, executor) = test_executor();

    let cancelled = tokio::time::timeout(
        std::time::Duration::from_millis(500),
        executor.execute(&fixture_source("sleep_forever.py"), &Keywords::new()),
    )
    .await;

    assert!(cancelled.is_err());
    assert_no_artifacts(&executor);
}

#[tokio::test]
async fn test_other_invocations_files_are_untouched() {
    let (_tmp, executor) = test_executor();
    let foreign = executor.store().result_dir().join("someone-else.result");
    fs::write(&foreign, br#"{"code": 200, "data": 1}"#).unwrap();

    executor
        .execute(&fixture_source("add.py"), &keywords(json!({"a": 1, "b": 1})))
        .await
        .expect("Execution failed");

    assert!(foreign.exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_sandbox_directories_are_private() {
    use std::os::unix::fs::PermissionsExt;

    let (_tmp, executor) = test_executor();
    let store = executor.store();

    for dir in [store.root(), store.script_dir(), store.result_dir()] {
        let mode = fs::metadata(dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700, "{} has mode {mode:o}", dir.display());
    }
}
