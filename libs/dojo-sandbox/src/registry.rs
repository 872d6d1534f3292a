/// Runner Façade - Language to Executor Mapping
///
/// **Core Responsibility:**
/// Hold exactly one executor per `Language`, built once at process start.
/// After `build()` the registry is immutable; `resolve` is a pure lookup.
///
/// This is the single place where isolation backends are chosen, so the
/// suite runner never needs to know which sandbox sits underneath.

use crate::config::LanguageConfigManager;
use crate::error::AttemptError;
use crate::executor::{CppExecutor, Executor, JavascriptExecutor, PythonExecutor};
use crate::sandbox::{DockerSandbox, LocalSandbox, Sandbox};
use anyhow::{bail, Context, Result};
use dojo_common::config::RunnerBackend;
use dojo_common::types::Language;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub struct ExecutorRegistry {
    executors: HashMap<Language, Arc<dyn Executor>>,
}

#[derive(Default)]
pub struct RegistryBuilder {
    executors: HashMap<Language, Arc<dyn Executor>>,
    duplicates: Vec<Language>,
}

impl RegistryBuilder {
    pub fn register(mut self, executor: Arc<dyn Executor>) -> Self {
        let language = executor.language();
        if self.executors.insert(language, executor).is_some() {
            self.duplicates.push(language);
        }
        self
    }

    /// Fails unless every language has exactly one executor
    pub fn build(self) -> Result<ExecutorRegistry> {
        if let Some(language) = self.duplicates.first() {
            bail!("More than one executor registered for {}", language);
        }
        for language in Language::ALL {
            if !self.executors.contains_key(&language) {
                bail!("No executor registered for {}", language);
            }
        }
        Ok(ExecutorRegistry {
            executors: self.executors,
        })
    }
}

impl ExecutorRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Standard executors with the process-based ones on the selected backend
    pub fn from_config(
        config: &LanguageConfigManager,
        backend: RunnerBackend,
        scratch_dir: &Path,
    ) -> Result<Self> {
        let sandbox: Arc<dyn Sandbox> = match backend {
            RunnerBackend::Local => Arc::new(LocalSandbox::new(scratch_dir)),
            RunnerBackend::Docker => Arc::new(
                DockerSandbox::connect(config).context("Failed to connect to Docker daemon")?,
            ),
        };
        Self::with_sandbox(config, sandbox)
    }

    /// Standard executors on an explicit sandbox
    pub fn with_sandbox(
        config: &LanguageConfigManager,
        sandbox: Arc<dyn Sandbox>,
    ) -> Result<Self> {
        info!(backend = sandbox.name(), "Building executor registry");

        Self::builder()
            .register(Arc::new(JavascriptExecutor::new(
                config.get_config(&Language::Javascript)?,
            )))
            .register(Arc::new(PythonExecutor::new(
                config.get_config(&Language::Python)?,
                sandbox.clone(),
            )?))
            .register(Arc::new(CppExecutor::new(
                config.get_config(&Language::Cpp)?,
                sandbox,
            )?))
            .build()
    }

    pub fn resolve(&self, language: Language) -> Result<Arc<dyn Executor>, AttemptError> {
        self.executors
            .get(&language)
            .cloned()
            .ok_or_else(|| AttemptError::UnsupportedLanguage(language.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn js() -> Arc<dyn Executor> {
        let config = LanguageConfigManager::builtin();
        Arc::new(JavascriptExecutor::new(
            config.get_config(&Language::Javascript).unwrap(),
        ))
    }

    #[test]
    fn test_local_registry_is_total() {
        let scratch = tempfile::tempdir().unwrap();
        let registry = ExecutorRegistry::from_config(
            &LanguageConfigManager::builtin(),
            RunnerBackend::Local,
            scratch.path(),
        )
        .unwrap();
        for language in Language::ALL {
            assert_eq!(registry.resolve(language).unwrap().language(), language);
        }
    }

    #[test]
    fn test_incomplete_registry_is_rejected() {
        let err = ExecutorRegistry::builder().register(js()).build().err().unwrap();
        assert!(err.to_string().contains("No executor registered for"));
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let err = ExecutorRegistry::builder()
            .register(js())
            .register(js())
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("More than one executor"));
    }
}
