use thiserror::Error;

/// Failures of the isolation backend itself, never of the submitted code
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("I/O error in sandbox: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Docker operation failed: {0}")]
    Docker(#[from] bollard::errors::Error),
    #[error("Workspace error: {0}")]
    Workspace(String),
    #[error("{what} exceeds maximum size of {limit} bytes")]
    InputTooLarge { what: &'static str, limit: usize },
}

/// Failures that make a whole attempt ungradeable.
/// Raised before any test runs, and kept distinct from "ran but failed".
#[derive(Error, Debug)]
pub enum AttemptError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("Compilation failed:\n{stderr}")]
    CompileError { stderr: String },
    #[error("{0}")]
    MalformedExport(String),
    #[error("Script failed to load: {0}")]
    ScriptLoad(String),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error("Cancelled after {completed} of {total} tests")]
    Cancelled { completed: usize, total: usize },
}

impl AttemptError {
    /// Stable tag recorded next to the message in storage and logs
    pub fn kind(&self) -> &'static str {
        match self {
            AttemptError::UnsupportedLanguage(_) => "UNSUPPORTED_LANGUAGE",
            AttemptError::CompileError { .. } => "COMPILE_ERROR",
            AttemptError::MalformedExport(_) => "MALFORMED_EXPORT",
            AttemptError::ScriptLoad(_) => "SCRIPT_LOAD",
            AttemptError::Sandbox(_) => "SANDBOX",
            AttemptError::Cancelled { .. } => "CANCELLED",
        }
    }
}

impl From<dojo_common::types::UnsupportedLanguage> for AttemptError {
    fn from(err: dojo_common::types::UnsupportedLanguage) -> Self {
        AttemptError::UnsupportedLanguage(err.0)
    }
}
