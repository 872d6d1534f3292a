/// Test-Suite Runner - Grade One Attempt
///
/// **Core Responsibility:**
/// Run every test of an attempt against its language's executor, strictly
/// in order, and fold the results into a `Verdict`.
///
/// **Order of checks:**
/// 1. Language must parse; unknown languages fail before any executor is touched
/// 2. No tests means an empty verdict, not an error
/// 3. The submission is prepared once (load / compile); failure aborts the attempt
/// 4. Tests run one at a time; the cancellation token is checked between them

use crate::error::AttemptError;
use crate::evaluator::{describe_test, evaluate_test, TestStatus};
use crate::registry::ExecutorRegistry;
use dojo_common::types::{AttemptStatus, Language, TestCase};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub const DEFAULT_PER_TEST_TIMEOUT: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone)]
pub struct SuiteRequest<'a> {
    pub attempt_id: Uuid,
    pub code: &'a str,
    /// Raw language name as submitted; aliases accepted
    pub language: &'a str,
    pub tests: &'a [TestCase],
    pub per_test_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub passed: u32,
    pub total: u32,
    pub logs: Vec<String>,
    pub runtime_ms: u64,
}

impl Verdict {
    pub fn empty() -> Self {
        Self {
            passed: 0,
            total: 0,
            logs: Vec::new(),
            runtime_ms: 0,
        }
    }

    pub fn status(&self) -> AttemptStatus {
        if self.passed == self.total {
            AttemptStatus::Passed
        } else {
            AttemptStatus::Failed
        }
    }
}

pub struct SuiteRunner {
    registry: Arc<ExecutorRegistry>,
}

impl SuiteRunner {
    pub fn new(registry: Arc<ExecutorRegistry>) -> Self {
        Self { registry }
    }

    #[instrument(
        skip_all,
        fields(
            attempt_id = %request.attempt_id,
            language = %request.language,
            test_count = request.tests.len()
        )
    )]
    pub async fn run_all(
        &self,
        request: &SuiteRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Verdict, AttemptError> {
        let language: Language = request.language.parse()?;

        if request.tests.is_empty() {
            debug!("No tests to run");
            return Ok(Verdict::empty());
        }

        let executor = self.registry.resolve(language)?;
        let total = request.tests.len();
        let timeout_ms = request.per_test_timeout.as_millis() as u64;
        let started = Instant::now();

        let mut prepared = match executor.prepare(request.attempt_id, request.code).await {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "Attempt could not be prepared");
                return Err(e);
            }
        };

        let mut passed: u32 = 0;
        let mut logs = Vec::with_capacity(total);

        for (idx, test) in request.tests.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(completed = idx, total, "Suite cancelled");
                return Err(AttemptError::Cancelled {
                    completed: idx,
                    total,
                });
            }

            let test_num = idx + 1;
            let result = prepared.execute(test, request.per_test_timeout).await;
            let status = evaluate_test(&result, test);

            match status {
                TestStatus::Passed => passed += 1,
                TestStatus::TimeLimitExceeded => {
                    warn!(test_num, timeout_ms, "Test timed out")
                }
                TestStatus::RuntimeError => warn!(test_num, "Test raised a runtime error"),
                TestStatus::WrongAnswer => {}
            }
            debug!(
                test_num,
                elapsed_ms = result.elapsed.as_millis() as u64,
                status = ?status,
                "Test finished"
            );

            logs.extend(describe_test(test_num, status, &result, test, timeout_ms));
        }

        // Releases the workspace (scratch dir or container)
        drop(prepared);

        let verdict = Verdict {
            passed,
            total: total as u32,
            logs,
            runtime_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            passed = verdict.passed,
            total = verdict.total,
            runtime_ms = verdict.runtime_ms,
            "Suite finished"
        );

        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LanguageConfigManager;
    use crate::executor::{ExecutionResult, Executor, PreparedSubmission};
    use crate::executor::JavascriptExecutor;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns its first argument; counts prepares and executions
    struct EchoExecutor {
        language: Language,
        prepares: Arc<AtomicUsize>,
        executions: Arc<AtomicUsize>,
    }

    struct PreparedEcho {
        executions: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Executor for EchoExecutor {
        fn language(&self) -> Language {
            self.language
        }

        async fn prepare(
            &self,
            _attempt_id: Uuid,
            code: &str,
        ) -> Result<Box<dyn PreparedSubmission>, AttemptError> {
            self.prepares.fetch_add(1, Ordering::SeqCst);
            if code.contains("syntax error") {
                return Err(AttemptError::CompileError {
                    stderr: "expected ';'".into(),
                });
            }
            Ok(Box::new(PreparedEcho {
                executions: self.executions.clone(),
            }))
        }
    }

    #[async_trait]
    impl PreparedSubmission for PreparedEcho {
        async fn execute(&mut self, test: &TestCase, _timeout: Duration) -> ExecutionResult {
            self.executions.fetch_add(1, Ordering::SeqCst);
            let value = test.input.first().cloned().unwrap_or(Value::Null);
            ExecutionResult::returned(value, Duration::from_millis(1))
        }
    }

    struct Counters {
        prepares: Arc<AtomicUsize>,
        executions: Arc<AtomicUsize>,
    }

    fn echo_runner() -> (SuiteRunner, Counters) {
        let prepares = Arc::new(AtomicUsize::new(0));
        let executions = Arc::new(AtomicUsize::new(0));
        let mut builder = ExecutorRegistry::builder();
        for language in Language::ALL {
            builder = builder.register(Arc::new(EchoExecutor {
                language,
                prepares: prepares.clone(),
                executions: executions.clone(),
            }));
        }
        let runner = SuiteRunner::new(Arc::new(builder.build().unwrap()));
        (runner, Counters { prepares, executions })
    }

    fn request<'a>(language: &'a str, code: &'a str, tests: &'a [TestCase]) -> SuiteRequest<'a> {
        SuiteRequest {
            attempt_id: Uuid::new_v4(),
            code,
            language,
            tests,
            per_test_timeout: DEFAULT_PER_TEST_TIMEOUT,
        }
    }

    #[tokio::test]
    async fn test_unsupported_language_touches_no_executor() {
        let (runner, counters) = echo_runner();
        let tests = vec![TestCase::new(vec![json!(1)], json!(1))];
        let err = runner
            .run_all(&request("ruby", "", &tests), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "UNSUPPORTED_LANGUAGE");
        assert_eq!(counters.prepares.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_suite_is_empty_verdict() {
        let (runner, counters) = echo_runner();
        let verdict = runner
            .run_all(&request("js", "anything at all", &[]), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::empty());
        assert_eq!(verdict.status(), AttemptStatus::Passed);
        assert_eq!(counters.prepares.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_counts_and_one_line_per_test() {
        let (runner, counters) = echo_runner();
        let tests = vec![
            TestCase::new(vec![json!(1)], json!(1)),
            TestCase::new(vec![json!(2)], json!(3)),
            TestCase::new(vec![json!({"b": 2, "a": 1})], json!({"a": 1, "b": 2})),
        ];
        let verdict = runner
            .run_all(&request("python", "", &tests), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(verdict.passed, 2);
        assert_eq!(verdict.total, 3);
        assert_eq!(verdict.status(), AttemptStatus::Failed);
        assert_eq!(verdict.logs.len(), 3);
        assert_eq!(verdict.logs[0], "Test 1 passed in 1ms");
        assert_eq!(verdict.logs[1], "Test 2 failed: expected 3, got 2 (1ms)");
        assert_eq!(counters.prepares.load(Ordering::SeqCst), 1);
        assert_eq!(counters.executions.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_prepare_failure_aborts_whole_attempt() {
        let (runner, counters) = echo_runner();
        let tests = vec![TestCase::new(vec![json!(1)], json!(1)); 4];
        let err = runner
            .run_all(&request("cpp", "syntax error", &tests), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "COMPILE_ERROR");
        assert_eq!(counters.executions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_test() {
        let (runner, counters) = echo_runner();
        let tests = vec![TestCase::new(vec![json!(1)], json!(1)); 2];
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = runner
            .run_all(&request("cpp", "", &tests), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AttemptError::Cancelled {
                completed: 0,
                total: 2
            }
        ));
        assert_eq!(counters.executions.load(Ordering::SeqCst), 0);
    }

    fn js_runner() -> SuiteRunner {
        let config = LanguageConfigManager::builtin();
        let scratch = std::env::temp_dir();
        let registry = ExecutorRegistry::from_config(
            &config,
            dojo_common::config::RunnerBackend::Local,
            &scratch,
        )
        .unwrap();
        SuiteRunner::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_js_timeout_does_not_stop_later_tests() {
        let runner = js_runner();
        let code = "module.exports = (n) => { while (n < 0) {} return n * 2; };";
        let tests = vec![
            TestCase::new(vec![json!(-1)], json!(0)),
            TestCase::new(vec![json!(4)], json!(8)),
        ];
        let mut req = request("javascript", code, &tests);
        req.per_test_timeout = Duration::from_millis(500);

        let verdict = runner.run_all(&req, &CancellationToken::new()).await.unwrap();
        assert_eq!(verdict.passed, 1);
        assert_eq!(verdict.total, 2);
        assert_eq!(verdict.logs[0], "Test 1 timed out after 500ms");
        assert!(verdict.logs[1].starts_with("Test 2 passed in "));
    }

    #[tokio::test]
    async fn test_same_input_same_verdict() {
        let runner = js_runner();
        let code = r#"
module.exports = (n) => {
  if (n < 0) throw new RangeError("negative");
  return n % 2 === 0 ? "even" : "odd";
};
"#;
        let tests = vec![
            TestCase::new(vec![json!(2)], json!("even")),
            TestCase::new(vec![json!(3)], json!("even")),
            TestCase::new(vec![json!(-1)], json!("odd")),
            TestCase::new(vec![json!(7)], json!("odd")),
        ];
        let req = request("javascript", code, &tests);

        let first = runner.run_all(&req, &CancellationToken::new()).await.unwrap();
        let second = runner.run_all(&req, &CancellationToken::new()).await.unwrap();
        assert_eq!((first.passed, first.total), (2, 4));
        assert_eq!((first.passed, first.total), (second.passed, second.total));
        assert_eq!(first.status(), second.status());
        assert_eq!(first.logs.len(), second.logs.len());
        for (a, b) in first.logs.iter().zip(&second.logs) {
            // Timings may differ between runs, outcomes may not
            let outcome = |line: &str| line.split(" in ").next().unwrap_or(line).to_string();
            assert_eq!(outcome(a), outcome(b));
        }
    }

    #[tokio::test]
    async fn test_cpp_timeout_does_not_stop_later_tests() {
        if which::which("g++").is_err() {
            eprintln!("g++ not found, skipping");
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let registry = ExecutorRegistry::from_config(
            &LanguageConfigManager::builtin(),
            dojo_common::config::RunnerBackend::Local,
            root.path(),
        )
        .unwrap();
        let runner = SuiteRunner::new(Arc::new(registry));
        let code = r#"
#include <iostream>
int main(int argc, char** argv) {
    volatile unsigned long ticks = 0;
    if (argc > 1 && argv[1][1] == '0') {
        for (;;) {
            ticks = ticks + 1;
        }
    }
    std::cout << 1 << std::endl;
    return 0;
}
"#;
        let tests = vec![
            TestCase::new(vec![json!(0)], json!(1)),
            TestCase::new(vec![json!(1)], json!(1)),
        ];
        let mut req = request("cpp", code, &tests);
        req.per_test_timeout = Duration::from_millis(500);

        let verdict = runner.run_all(&req, &CancellationToken::new()).await.unwrap();
        assert_eq!((verdict.passed, verdict.total), (1, 2));
        assert_eq!(verdict.logs[0], "Test 1 timed out after 500ms");
        assert!(verdict.logs[1].starts_with("Test 2 passed in "));
    }

    #[tokio::test]
    async fn test_js_malformed_export() {
        let runner = js_runner();
        let tests = vec![TestCase::new(vec![], json!(1))];
        let err = runner
            .run_all(&request("js", "var x = 1;", &tests), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "MALFORMED_EXPORT");
    }

    #[tokio::test]
    async fn test_registry_swap_keeps_control_flow() {
        // Real JS executor registered by hand next to test doubles
        let config = LanguageConfigManager::builtin();
        let prepares = Arc::new(AtomicUsize::new(0));
        let executions = Arc::new(AtomicUsize::new(0));
        let registry = ExecutorRegistry::builder()
            .register(Arc::new(JavascriptExecutor::new(
                config.get_config(&Language::Javascript).unwrap(),
            )))
            .register(Arc::new(EchoExecutor {
                language: Language::Python,
                prepares: prepares.clone(),
                executions: executions.clone(),
            }))
            .register(Arc::new(EchoExecutor {
                language: Language::Cpp,
                prepares,
                executions,
            }))
            .build()
            .unwrap();
        let runner = SuiteRunner::new(Arc::new(registry));
        let tests = vec![TestCase::new(vec![json!("a"), json!("b")], json!("ab"))];
        let verdict = runner
            .run_all(
                &request("JS", "module.exports = (a, b) => a + b;", &tests),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(verdict.passed, 1);
    }
}
