// C++ executor: compile once per attempt, run the binary once per test

use super::{
    encode_arguments, incidental_lines, parse_json_or_raw, ExecutionResult, Executor,
    PreparedSubmission,
};
use crate::config::{CompileStep, LanguageConfig};
use crate::error::AttemptError;
use crate::sandbox::{check_source_size, CommandSpec, ProcessOutput, Sandbox, Workspace};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dojo_common::types::{truncate_chars, Language, TestCase, MAX_ERROR_MESSAGE_CHARS};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const DEFAULT_SOURCE_FILE: &str = "solution.cpp";
const BINARY_NAME: &str = "solution";

pub struct CppExecutor {
    sandbox: Arc<dyn Sandbox>,
    compile: CompileStep,
    source_file: String,
}

impl CppExecutor {
    pub fn new(config: &LanguageConfig, sandbox: Arc<dyn Sandbox>) -> Result<Self> {
        let compile = config
            .compile
            .clone()
            .ok_or_else(|| anyhow!("cpp requires a 'compile' step"))?;
        Ok(Self {
            sandbox,
            compile,
            source_file: config
                .source_file
                .clone()
                .unwrap_or_else(|| DEFAULT_SOURCE_FILE.to_string()),
        })
    }

    fn compile_command(&self) -> CommandSpec {
        CommandSpec::tool(&self.compile.command)
            .args(self.compile.args.iter().cloned())
            .arg(&self.source_file)
            .arg("-o")
            .arg(BINARY_NAME)
    }
}

#[async_trait]
impl Executor for CppExecutor {
    fn language(&self) -> Language {
        Language::Cpp
    }

    #[tracing::instrument(skip_all, fields(attempt_id = %attempt_id))]
    async fn prepare(
        &self,
        attempt_id: Uuid,
        code: &str,
    ) -> Result<Box<dyn PreparedSubmission>, AttemptError> {
        check_source_size(code)?;

        let workspace = self.sandbox.open_workspace(attempt_id, Language::Cpp).await?;
        workspace.write_file(&self.source_file, code).await?;

        let budget = Duration::from_millis(self.compile.timeout_ms);
        let output = workspace.run(&self.compile_command(), budget).await?;

        if output.timed_out {
            warn!(budget_ms = self.compile.timeout_ms, "Compilation timed out");
            return Err(AttemptError::CompileError {
                stderr: format!("Compilation timed out after {}ms", self.compile.timeout_ms),
            });
        }
        if !output.success() {
            let stderr = compiler_message(&output);
            warn!(
                compilation_time_ms = output.elapsed.as_millis() as u64,
                error_preview = stderr.lines().next().unwrap_or(""),
                "Compilation failed"
            );
            return Err(AttemptError::CompileError { stderr });
        }

        info!(
            compilation_time_ms = output.elapsed.as_millis() as u64,
            "Compilation succeeded"
        );

        Ok(Box::new(CompiledBinary { workspace }))
    }
}

fn compiler_message(output: &ProcessOutput) -> String {
    let text = if output.stderr.trim().is_empty() {
        output.stdout.trim()
    } else {
        output.stderr.trim()
    };
    if text.is_empty() {
        output.failure_reason()
    } else {
        truncate_chars(text, MAX_ERROR_MESSAGE_CHARS)
    }
}

struct CompiledBinary {
    workspace: Box<dyn Workspace>,
}

#[async_trait]
impl PreparedSubmission for CompiledBinary {
    async fn execute(&mut self, test: &TestCase, timeout: Duration) -> ExecutionResult {
        let args = match encode_arguments(test) {
            Ok(args) => args,
            Err(message) => return ExecutionResult::runtime_error(message, Duration::ZERO),
        };

        let command = CommandSpec::artifact(BINARY_NAME).arg(args);
        match self.workspace.run(&command, timeout).await {
            Ok(output) => interpret_output(output),
            Err(e) => {
                ExecutionResult::runtime_error(format!("Sandbox error: {}", e), Duration::ZERO)
            }
        }
    }
}

/// The whole trimmed stdout is the result
fn interpret_output(output: ProcessOutput) -> ExecutionResult {
    if output.timed_out {
        return ExecutionResult::timed_out(output.elapsed);
    }
    if output.exit_code != Some(0) {
        return ExecutionResult::runtime_error(output.failure_reason(), output.elapsed);
    }

    let diagnostics = incidental_lines("stderr", output.stderr.lines());
    ExecutionResult::returned(parse_json_or_raw(output.stdout.trim()), output.elapsed)
        .with_diagnostics(diagnostics)
}
