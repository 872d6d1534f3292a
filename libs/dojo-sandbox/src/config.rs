// Language configuration management for the grading sandbox
use anyhow::{bail, Context, Result};
use dojo_common::types::Language;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::warn;

/// A toolchain invocation: program plus fixed leading arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Compiler invocation for languages with a build step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileStep {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_compile_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_compile_timeout_ms() -> u64 {
    10_000
}

fn default_load_timeout_ms() -> u64 {
    1_000
}

fn default_memory_limit_mb() -> u32 {
    256
}

fn default_cpu_limit() -> f32 {
    0.5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: String,
    pub version: String,
    /// Container image used by the Docker backend
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub run: Option<ToolInvocation>,
    #[serde(default)]
    pub compile: Option<CompileStep>,
    #[serde(default)]
    pub source_file: Option<String>,
    /// Budget for evaluating top-level script code (in-process engine only)
    #[serde(default = "default_load_timeout_ms")]
    pub load_timeout_ms: u64,
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u32,
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageConfig>,
}

/// Language configuration manager
#[derive(Debug, Clone)]
pub struct LanguageConfigManager {
    configs: HashMap<Language, LanguageConfig>,
}

impl LanguageConfigManager {
    /// Load language configurations from a languages.json file
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Language config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        Self::from_json(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))
    }

    /// Load from `config_path`, falling back to the built-in toolchain defaults
    /// when the file does not exist
    pub fn load_or_builtin(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            Self::load(config_path)
        } else {
            warn!(
                path = %config_path.display(),
                "Language config not found, using built-in defaults"
            );
            Ok(Self::builtin())
        }
    }

    /// Parse a languages.json document
    pub fn from_json(content: &str) -> Result<Self> {
        let languages_json: LanguagesJson = serde_json::from_str(content)?;

        let mut configs = HashMap::new();
        for lang in languages_json.languages {
            let language: Language = lang.name.parse()?;
            if configs.insert(language, lang).is_some() {
                bail!("Language '{}' is configured more than once", language);
            }
        }

        for language in Language::ALL {
            if !configs.contains_key(&language) {
                bail!("No configuration found for language: {}", language);
            }
        }

        let manager = Self { configs };
        manager.validate()?;
        Ok(manager)
    }

    /// Built-in configuration matching config/languages.json
    pub fn builtin() -> Self {
        let configs = [
            LanguageConfig {
                name: "javascript".to_string(),
                version: "es2023".to_string(),
                image: None,
                run: None,
                compile: None,
                source_file: None,
                load_timeout_ms: default_load_timeout_ms(),
                memory_limit_mb: default_memory_limit_mb(),
                cpu_limit: default_cpu_limit(),
            },
            LanguageConfig {
                name: "python".to_string(),
                version: "3".to_string(),
                image: Some("python:3.12-slim".to_string()),
                run: Some(ToolInvocation {
                    command: "python3".to_string(),
                    args: vec!["-u".to_string()],
                }),
                compile: None,
                source_file: Some("solution.py".to_string()),
                load_timeout_ms: default_load_timeout_ms(),
                memory_limit_mb: default_memory_limit_mb(),
                cpu_limit: default_cpu_limit(),
            },
            LanguageConfig {
                name: "cpp".to_string(),
                version: "17".to_string(),
                image: Some("gcc:13".to_string()),
                run: None,
                compile: Some(CompileStep {
                    command: "g++".to_string(),
                    args: vec!["-O2".to_string(), "-std=c++17".to_string()],
                    timeout_ms: default_compile_timeout_ms(),
                }),
                source_file: Some("solution.cpp".to_string()),
                load_timeout_ms: default_load_timeout_ms(),
                memory_limit_mb: 512,
                cpu_limit: 1.0,
            },
        ];

        Self {
            configs: configs
                .into_iter()
                .zip(Language::ALL)
                .map(|(config, language)| (language, config))
                .collect(),
        }
    }

    fn validate(&self) -> Result<()> {
        let python = self.get_config(&Language::Python)?;
        if python.run.is_none() {
            bail!("python requires a 'run' interpreter invocation");
        }
        let cpp = self.get_config(&Language::Cpp)?;
        if cpp.compile.is_none() {
            bail!("cpp requires a 'compile' step");
        }
        Ok(())
    }

    /// Get configuration for a specific language
    pub fn get_config(&self, language: &Language) -> Result<&LanguageConfig> {
        self.configs
            .get(language)
            .ok_or_else(|| anyhow::anyhow!("No configuration found for language: {}", language))
    }

    /// Get Docker image for a language
    pub fn get_image(&self, language: &Language) -> Option<String> {
        self.configs.get(language).and_then(|c| c.image.clone())
    }

    /// Get memory limit for a language
    pub fn get_memory_limit_mb(&self, language: &Language) -> Result<u32> {
        Ok(self.get_config(language)?.memory_limit_mb)
    }

    /// Get CPU limit for a language
    pub fn get_cpu_limit(&self, language: &Language) -> Result<f32> {
        Ok(self.get_config(language)?.cpu_limit)
    }

    /// List all configured languages
    pub fn list_languages(&self) -> Vec<Language> {
        let mut languages: Vec<Language> = self.configs.keys().copied().collect();
        languages.sort_by_key(|l| l.as_str());
        languages
    }
}
