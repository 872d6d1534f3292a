/// Test Evaluator - Language-Agnostic Scoring Logic
///
/// **Core Responsibility:**
/// Decide whether an observed result matches the expected value, and turn
/// each test's execution into transcript lines.
///
/// **Critical Properties:**
/// - Knows nothing about processes, containers or script engines
/// - Every language is scored by the same structural comparison
///
/// **Equality Rules:**
/// - null, booleans, strings: exact
/// - numbers: exact by value (`2` equals `2.0`), no floating-point tolerance
/// - arrays: same length, element-wise equal, order matters
/// - objects: same key set, values equal per key, key order ignored

use crate::executor::{ExecutionOutcome, ExecutionResult};
use dojo_common::types::{truncate_chars, TestCase};
use serde_json::{Number, Value};

/// Maximum characters of any single transcript line payload
pub const MAX_LOG_EXCERPT_CHARS: usize = 500;

/// Structural equality over JSON values
pub fn structurally_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => numbers_equal(a, b),
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| structurally_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| structurally_equal(x, y)))
        }
        _ => false,
    }
}

fn numbers_equal(a: &Number, b: &Number) -> bool {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x == y;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Compact serialization used in mismatch messages
pub fn render(value: &Value) -> String {
    truncate_chars(&value.to_string(), MAX_LOG_EXCERPT_CHARS)
}

/// Per-test status derived from one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    Passed,
    WrongAnswer,
    TimeLimitExceeded,
    RuntimeError,
}

/// Evaluate a single test execution
///
/// Timeouts and runtime errors never pass, whatever was observed before them.
pub fn evaluate_test(result: &ExecutionResult, test_case: &TestCase) -> TestStatus {
    match &result.outcome {
        ExecutionOutcome::TimedOut => TestStatus::TimeLimitExceeded,
        ExecutionOutcome::RuntimeError(_) => TestStatus::RuntimeError,
        ExecutionOutcome::Returned(actual) => {
            if structurally_equal(actual, &test_case.expected) {
                TestStatus::Passed
            } else {
                TestStatus::WrongAnswer
            }
        }
    }
}

/// Transcript lines for one test: the headline first, diagnostics after
pub fn describe_test(
    test_num: usize,
    status: TestStatus,
    result: &ExecutionResult,
    test_case: &TestCase,
    timeout_ms: u64,
) -> Vec<String> {
    let elapsed_ms = result.elapsed.as_millis();
    let headline = match (&result.outcome, status) {
        (_, TestStatus::Passed) => format!("Test {} passed in {}ms", test_num, elapsed_ms),
        (ExecutionOutcome::Returned(actual), _) => format!(
            "Test {} failed: expected {}, got {} ({}ms)",
            test_num,
            render(&test_case.expected),
            render(actual),
            elapsed_ms
        ),
        (ExecutionOutcome::TimedOut, _) => {
            format!("Test {} timed out after {}ms", test_num, timeout_ms)
        }
        (ExecutionOutcome::RuntimeError(message), _) => format!(
            "Test {} runtime error: {} ({}ms)",
            test_num,
            truncate_chars(message.trim(), MAX_LOG_EXCERPT_CHARS),
            elapsed_ms
        ),
    };

    let mut lines = Vec::with_capacity(1 + result.diagnostics.len());
    lines.push(headline);
    lines.extend(
        result
            .diagnostics
            .iter()
            .map(|line| format!("  {}", truncate_chars(line, MAX_LOG_EXCERPT_CHARS))),
    );
    lines
}
