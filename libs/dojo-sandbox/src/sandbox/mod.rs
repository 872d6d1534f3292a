//! Isolation backends for process-based executors.
//!
//! A [`Sandbox`] hands out one [`Workspace`] per attempt. Executors only ever
//! write files into a workspace and run commands inside it, so the backend
//! (local processes, containers, a remote service) can be swapped without
//! touching executor or suite logic.

mod docker;
mod local;

#[cfg(test)]
mod docker_tests;

pub use docker::DockerSandbox;
pub use local::LocalSandbox;

use crate::error::SandboxError;
use async_trait::async_trait;
use dojo_common::types::Language;
use std::time::Duration;
use uuid::Uuid;

/// Safety limits to keep pathological inputs away from the backend
pub const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_TEST_INPUT_BYTES: usize = 10 * 1024 * 1024; // 10MB
/// Per stream; bytes past this are read and discarded so the child never blocks
pub const MAX_CAPTURE_BYTES: usize = 1024 * 1024; // 1MB

#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Create an isolated scratch area for one attempt.
    /// Dropping the returned workspace releases it.
    async fn open_workspace(
        &self,
        attempt_id: Uuid,
        language: Language,
    ) -> Result<Box<dyn Workspace>, SandboxError>;
}

#[async_trait]
pub trait Workspace: Send + Sync {
    /// Write a file at the workspace root
    async fn write_file(&self, name: &str, contents: &str) -> Result<(), SandboxError>;

    /// Run a command with the workspace root as working directory.
    /// The process is killed once `timeout` elapses.
    async fn run(
        &self,
        command: &CommandSpec,
        timeout: Duration,
    ) -> Result<ProcessOutput, SandboxError>;
}

/// What to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Program {
    /// A toolchain binary looked up on PATH
    Tool(String),
    /// A file produced inside the workspace
    Artifact(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: Program,
    pub args: Vec<String>,
    pub stdin: Option<String>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn tool(name: impl Into<String>) -> Self {
        Self::new(Program::Tool(name.into()))
    }

    pub fn artifact(name: impl Into<String>) -> Self {
        Self::new(Program::Artifact(name.into()))
    }

    fn new(program: Program) -> Self {
        Self {
            program,
            args: Vec::new(),
            stdin: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Program name as shown in logs
    pub fn display_name(&self) -> &str {
        match &self.program {
            Program::Tool(name) | Program::Artifact(name) => name,
        }
    }
}

/// Captured result of one process run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// None when the process was killed by a signal or by the deadline
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Human-readable reason for an unsuccessful run
    pub fn failure_reason(&self) -> String {
        let stderr = self.stderr.trim();
        let status = match self.exit_code {
            Some(code) => format!("exited with status {}", code),
            None => "terminated by signal".to_string(),
        };
        if stderr.is_empty() {
            format!("Process {}", status)
        } else {
            format!("Process {}: {}", status, stderr)
        }
    }
}

/// Bounded buffer for one output stream of a child process
#[derive(Debug, Default)]
pub(crate) struct CapturedStream {
    bytes: Vec<u8>,
    dropped: usize,
}

impl CapturedStream {
    pub(crate) fn push(&mut self, chunk: &[u8]) {
        let room = MAX_CAPTURE_BYTES.saturating_sub(self.bytes.len());
        let kept = chunk.len().min(room);
        self.bytes.extend_from_slice(&chunk[..kept]);
        self.dropped += chunk.len() - kept;
    }

    pub(crate) fn into_text(self) -> String {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.dropped > 0 {
            text.push_str(&format!(
                "\n[output truncated: {} bytes dropped]",
                self.dropped
            ));
        }
        text
    }
}

pub fn check_source_size(source: &str) -> Result<(), SandboxError> {
    if source.len() > MAX_SOURCE_CODE_BYTES {
        return Err(SandboxError::InputTooLarge {
            what: "Source code",
            limit: MAX_SOURCE_CODE_BYTES,
        });
    }
    Ok(())
}

pub fn check_input_size(input: &str) -> Result<(), SandboxError> {
    if input.len() > MAX_TEST_INPUT_BYTES {
        return Err(SandboxError::InputTooLarge {
            what: "Test input",
            limit: MAX_TEST_INPUT_BYTES,
        });
    }
    Ok(())
}

/// Workspace files are flat: no separators, no parent references
pub(crate) fn check_file_name(name: &str) -> Result<&str, SandboxError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0');
    if valid {
        Ok(name)
    } else {
        Err(SandboxError::Workspace(format!(
            "Invalid workspace file name: {:?}",
            name
        )))
    }
}
