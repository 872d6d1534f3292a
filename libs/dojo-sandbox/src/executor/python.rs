// Python executor: one interpreter process per test, arguments on stdin

use super::{
    encode_arguments, incidental_lines, parse_json_or_raw, ExecutionResult, Executor,
    PreparedSubmission,
};
use crate::config::{LanguageConfig, ToolInvocation};
use crate::error::AttemptError;
use crate::sandbox::{check_source_size, CommandSpec, ProcessOutput, Sandbox, Workspace};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dojo_common::types::{Language, TestCase};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const DEFAULT_SOURCE_FILE: &str = "solution.py";

/// Appended to every submission. Reads the JSON argument array from stdin,
/// calls `solution`, and prints the JSON result as the last stdout line.
/// Exceptions become `{"__error__": "..."}` so the host can tell them apart.
const DRIVER: &str = r#"

if __name__ == "__main__":
    import sys as _dojo_sys
    import json as _dojo_json
    try:
        _dojo_raw = _dojo_sys.stdin.read()
        _dojo_args = _dojo_json.loads(_dojo_raw) if _dojo_raw.strip() else []
        _dojo_out = solution(*_dojo_args)
        print(_dojo_json.dumps(_dojo_out))
    except Exception as _dojo_exc:
        print(_dojo_json.dumps({"__error__": type(_dojo_exc).__name__ + ": " + str(_dojo_exc)}))
"#;

const ERROR_KEY: &str = "__error__";

pub struct PythonExecutor {
    sandbox: Arc<dyn Sandbox>,
    run: ToolInvocation,
    source_file: String,
}

impl PythonExecutor {
    pub fn new(config: &LanguageConfig, sandbox: Arc<dyn Sandbox>) -> Result<Self> {
        let run = config
            .run
            .clone()
            .ok_or_else(|| anyhow!("python requires a 'run' interpreter invocation"))?;
        Ok(Self {
            sandbox,
            run,
            source_file: config
                .source_file
                .clone()
                .unwrap_or_else(|| DEFAULT_SOURCE_FILE.to_string()),
        })
    }
}

#[async_trait]
impl Executor for PythonExecutor {
    fn language(&self) -> Language {
        Language::Python
    }

    async fn prepare(
        &self,
        attempt_id: Uuid,
        code: &str,
    ) -> Result<Box<dyn PreparedSubmission>, AttemptError> {
        check_source_size(code)?;

        let workspace = self
            .sandbox
            .open_workspace(attempt_id, Language::Python)
            .await?;

        let mut script = String::with_capacity(code.len() + DRIVER.len());
        script.push_str(code);
        script.push_str(DRIVER);
        workspace.write_file(&self.source_file, &script).await?;

        debug!(attempt_id = %attempt_id, "Python submission staged");

        Ok(Box::new(PreparedPython {
            workspace,
            command: CommandSpec::tool(&self.run.command)
                .args(self.run.args.iter().cloned())
                .arg(&self.source_file)
                .env("PYTHONDONTWRITEBYTECODE", "1")
                .env("PYTHONUNBUFFERED", "1"),
        }))
    }
}

struct PreparedPython {
    workspace: Box<dyn Workspace>,
    command: CommandSpec,
}

#[async_trait]
impl PreparedSubmission for PreparedPython {
    async fn execute(&mut self, test: &TestCase, timeout: Duration) -> ExecutionResult {
        let args = match encode_arguments(test) {
            Ok(args) => args,
            Err(message) => return ExecutionResult::runtime_error(message, Duration::ZERO),
        };

        let command = self.command.clone().stdin(args);
        match self.workspace.run(&command, timeout).await {
            Ok(output) => interpret_output(output),
            Err(e) => {
                ExecutionResult::runtime_error(format!("Sandbox error: {}", e), Duration::ZERO)
            }
        }
    }
}

/// Map a finished interpreter run to a test outcome
fn interpret_output(output: ProcessOutput) -> ExecutionResult {
    if output.timed_out {
        return ExecutionResult::timed_out(output.elapsed);
    }
    if output.exit_code != Some(0) {
        // Prints made before the crash stay visible in the test log
        return ExecutionResult::runtime_error(output.failure_reason(), output.elapsed)
            .with_diagnostics(incidental_lines("stdout", output.stdout.lines()));
    }

    let lines: Vec<&str> = output
        .stdout
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .collect();

    // Output before the result line is the submission's own printing
    let (result_line, printed) = match lines.split_last() {
        Some((last, rest)) => (last.trim(), rest),
        None => ("", &[][..]),
    };

    let mut diagnostics = incidental_lines("stdout", printed.iter().copied());
    // A clean exit with stderr output is reported but not failed
    diagnostics.extend(incidental_lines("stderr", output.stderr.lines()));

    let result = match parse_json_or_raw(result_line) {
        Value::Object(map) if map.len() == 1 && map.contains_key(ERROR_KEY) => {
            let message = match &map[ERROR_KEY] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            ExecutionResult::runtime_error(message, output.elapsed)
        }
        value => ExecutionResult::returned(value, output.elapsed),
    };
    result.with_diagnostics(diagnostics)
}
