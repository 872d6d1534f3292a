// Process-level worker settings, read from the environment

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("{name} must be {expected}, got '{value}'")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Which queue/store implementation the worker talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueImpl {
    Redis,
    Memory,
}

/// Which isolation backend runs the process-based executors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerBackend {
    Local,
    Docker,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    pub redis_url: String,
    pub concurrency: usize,
    pub per_test_timeout: Duration,
    pub queue_impl: QueueImpl,
    pub backend: RunnerBackend,
    pub scratch_dir: PathBuf,
    pub queue_wait: Duration,
    pub languages_config: PathBuf,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            concurrency: 1,
            per_test_timeout: Duration::from_millis(2000),
            queue_impl: QueueImpl::Redis,
            backend: RunnerBackend::Local,
            scratch_dir: std::env::temp_dir(),
            queue_wait: Duration::from_millis(1000),
            languages_config: PathBuf::from("config/languages.json"),
        }
    }
}

impl WorkerSettings {
    /// Load settings from the process environment
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load settings through an arbitrary lookup; unset variables keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(url) = lookup("REDIS_URL") {
            settings.redis_url = url;
        }
        if let Some(raw) = lookup("WORKER_CONCURRENCY") {
            let concurrency: usize = parse_number("WORKER_CONCURRENCY", &raw)?;
            if concurrency == 0 {
                return Err(invalid("WORKER_CONCURRENCY", "a positive integer", raw));
            }
            settings.concurrency = concurrency;
        }
        if let Some(raw) = lookup("ATTEMPT_PER_TEST_MS") {
            settings.per_test_timeout =
                Duration::from_millis(parse_number("ATTEMPT_PER_TEST_MS", &raw)?);
        }
        if let Some(raw) = lookup("QUEUE_WAIT_MS") {
            settings.queue_wait = Duration::from_millis(parse_number("QUEUE_WAIT_MS", &raw)?);
        }
        if let Some(raw) = lookup("QUEUE_IMPL") {
            settings.queue_impl = match raw.to_lowercase().as_str() {
                "redis" => QueueImpl::Redis,
                "memory" => QueueImpl::Memory,
                _ => return Err(invalid("QUEUE_IMPL", "one of redis, memory", raw)),
            };
        }
        if let Some(raw) = lookup("RUNNER_BACKEND") {
            settings.backend = match raw.to_lowercase().as_str() {
                "local" => RunnerBackend::Local,
                "docker" => RunnerBackend::Docker,
                _ => return Err(invalid("RUNNER_BACKEND", "one of local, docker", raw)),
            };
        }
        if let Some(dir) = lookup("DOJO_SCRATCH_DIR") {
            settings.scratch_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("DOJO_LANGUAGES_CONFIG") {
            settings.languages_config = PathBuf::from(path);
        }

        Ok(settings)
    }
}

fn parse_number<T: FromStr>(name: &'static str, raw: &str) -> Result<T, SettingsError> {
    raw.trim()
        .parse()
        .map_err(|_| invalid(name, "a non-negative integer", raw.to_string()))
}

fn invalid(name: &'static str, expected: &'static str, value: String) -> SettingsError {
    SettingsError::Invalid {
        name,
        expected,
        value,
    }
}
