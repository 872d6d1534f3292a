/// Integration tests for container-backed grading
///
/// These tests verify that the Docker backend behaves like the local one:
/// 1. Files land in the container and toolchains can see them
/// 2. Compile failures surface as attempt errors
/// 3. Runaway processes are killed at the deadline
/// 4. Whole suites grade end to end

use crate::config::LanguageConfigManager;
use crate::registry::ExecutorRegistry;
use crate::sandbox::{CommandSpec, DockerSandbox, Sandbox};
use crate::suite::{SuiteRequest, SuiteRunner};
use crate::error::AttemptError;
use dojo_common::types::{Language, TestCase};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn docker_runner() -> SuiteRunner {
    let config = LanguageConfigManager::builtin();
    let sandbox = DockerSandbox::connect(&config).expect("Failed to connect to Docker");
    let registry = ExecutorRegistry::with_sandbox(&config, Arc::new(sandbox))
        .expect("Failed to build registry");
    SuiteRunner::new(Arc::new(registry))
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_workspace_write_and_run() {
    let config = LanguageConfigManager::builtin();
    let sandbox = DockerSandbox::connect(&config).unwrap();
    let workspace = sandbox
        .open_workspace(Uuid::new_v4(), Language::Python)
        .await
        .unwrap();

    workspace
        .write_file("hello.py", "import sys\nprint(sys.stdin.read().upper())\n")
        .await
        .unwrap();

    let cmd = CommandSpec::tool("python3").arg("hello.py").stdin("it's fine");
    let output = workspace.run(&cmd, Duration::from_secs(10)).await.unwrap();
    assert_eq!(output.exit_code, Some(0));
    assert_eq!(output.stdout.trim(), "IT'S FINE");
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_deadline_inside_container() {
    let config = LanguageConfigManager::builtin();
    let sandbox = DockerSandbox::connect(&config).unwrap();
    let workspace = sandbox
        .open_workspace(Uuid::new_v4(), Language::Python)
        .await
        .unwrap();

    let cmd = CommandSpec::tool("python3").arg("-c").arg("while True: pass");
    let output = workspace.run(&cmd, Duration::from_millis(500)).await.unwrap();
    assert!(output.timed_out);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_python_suite_in_container() {
    let runner = docker_runner();
    let tests = vec![
        TestCase::new(vec![json!(2), json!(3)], json!(5)),
        TestCase::new(vec![json!(-1), json!(1)], json!(0)),
        TestCase::new(vec![json!(0), json!(0)], json!(1)),
    ];
    let request = SuiteRequest {
        attempt_id: Uuid::new_v4(),
        language: "python",
        code: "def solution(a, b):\n    return a + b\n",
        tests: &tests,
        per_test_timeout: Duration::from_secs(5),
    };

    let verdict = runner
        .run_all(&request, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(verdict.passed, 2);
    assert_eq!(verdict.total, 3);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_cpp_compile_error_in_container() {
    let runner = docker_runner();
    let tests = vec![TestCase::new(vec![], json!(1))];
    let request = SuiteRequest {
        attempt_id: Uuid::new_v4(),
        language: "cpp",
        code: "int main() { return undefined_symbol; }",
        tests: &tests,
        per_test_timeout: Duration::from_secs(5),
    };

    let err = runner
        .run_all(&request, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AttemptError::CompileError { .. }));
}
