/// Language Executors - Run One Submission Against One Test
///
/// **Core Responsibility:**
/// Turn source code plus a test's positional arguments into an observed
/// return value, a timeout, or a runtime error.
///
/// **Lifecycle:**
/// 1. `Executor::prepare` loads or compiles the submission once per attempt.
///    Failures here make the whole attempt ungradeable (`AttemptError`).
/// 2. `PreparedSubmission::execute` runs one test. It never fails: every
///    problem is folded into the returned `ExecutionResult`.
/// 3. Dropping the prepared submission releases its workspace.

mod cpp;
mod javascript;
mod python;

pub use cpp::CppExecutor;
pub use javascript::JavascriptExecutor;
pub use python::PythonExecutor;

use crate::error::AttemptError;
use crate::sandbox::check_input_size;
use async_trait::async_trait;
use dojo_common::types::{Language, TestCase};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

/// Most incidental output lines kept per test
const MAX_DIAGNOSTIC_LINES: usize = 20;

/// What a single run produced
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The entry point returned this value
    Returned(Value),
    /// The per-test deadline fired
    TimedOut,
    /// The submission raised, crashed or exited non-zero
    RuntimeError(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub outcome: ExecutionOutcome,
    pub elapsed: Duration,
    /// Incidental output (console logs, stray prints, stderr) for the transcript
    pub diagnostics: Vec<String>,
}

impl ExecutionResult {
    pub fn returned(value: Value, elapsed: Duration) -> Self {
        Self::new(ExecutionOutcome::Returned(value), elapsed)
    }

    pub fn timed_out(elapsed: Duration) -> Self {
        Self::new(ExecutionOutcome::TimedOut, elapsed)
    }

    pub fn runtime_error(message: impl Into<String>, elapsed: Duration) -> Self {
        Self::new(ExecutionOutcome::RuntimeError(message.into()), elapsed)
    }

    fn new(outcome: ExecutionOutcome, elapsed: Duration) -> Self {
        Self {
            outcome,
            elapsed,
            diagnostics: Vec::new(),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Vec<String>) -> Self {
        self.diagnostics.extend(diagnostics);
        self
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    fn language(&self) -> Language;

    /// Load or compile `code` so tests can run against it
    async fn prepare(
        &self,
        attempt_id: Uuid,
        code: &str,
    ) -> Result<Box<dyn PreparedSubmission>, AttemptError>;
}

#[async_trait]
pub trait PreparedSubmission: Send {
    /// Invoke the entry point with the test's arguments under `timeout`
    async fn execute(&mut self, test: &TestCase, timeout: Duration) -> ExecutionResult;
}

/// The test's positional arguments as a JSON array
pub(crate) fn encode_arguments(test: &TestCase) -> Result<String, String> {
    let encoded = serde_json::to_string(&test.input)
        .map_err(|e| format!("Failed to encode test input: {}", e))?;
    check_input_size(&encoded).map_err(|e| e.to_string())?;
    Ok(encoded)
}

/// JSON when it parses, the raw text otherwise
pub(crate) fn parse_json_or_raw(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Prefix and cap incidental output lines
pub(crate) fn incidental_lines<'a>(
    label: &str,
    lines: impl IntoIterator<Item = &'a str>,
) -> Vec<String> {
    let lines: Vec<&str> = lines
        .into_iter()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect();
    let mut out: Vec<String> = lines
        .iter()
        .take(MAX_DIAGNOSTIC_LINES)
        .map(|l| format!("{}: {}", label, l))
        .collect();
    if lines.len() > MAX_DIAGNOSTIC_LINES {
        out.push(format!(
            "{}: ... ({} more lines)",
            label,
            lines.len() - MAX_DIAGNOSTIC_LINES
        ));
    }
    out
}
