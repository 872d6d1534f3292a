//! Grading core: executes untrusted submissions in JavaScript, Python and C++
//! against JSON test cases and folds the results into a verdict.

pub mod config;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod registry;
pub mod sandbox;
pub mod suite;

pub use error::{AttemptError, SandboxError};
pub use registry::ExecutorRegistry;
pub use suite::{SuiteRequest, SuiteRunner, Verdict, DEFAULT_PER_TEST_TIMEOUT};
