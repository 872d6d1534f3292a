use anyhow::{Context, Result};
use dojo_common::config::RunnerBackend;
use dojo_common::types::{AttemptStatus, TestCase};
use dojo_sandbox::config::LanguageConfigManager;
use dojo_sandbox::{ExecutorRegistry, SuiteRequest, SuiteRunner, Verdict};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct RunArgs {
    pub config: PathBuf,
    pub language: String,
    pub code: PathBuf,
    pub tests: PathBuf,
    pub timeout_ms: u64,
    pub backend: RunnerBackend,
    pub json: bool,
}

/// Grade one local attempt; returns whether every test passed
pub async fn run(args: RunArgs) -> Result<bool> {
    let code = fs::read_to_string(&args.code)
        .with_context(|| format!("Failed to read source file {}", args.code.display()))?;
    let tests = read_tests(&args.tests)?;

    let config = LanguageConfigManager::load_or_builtin(&args.config)?;
    let scratch = std::env::temp_dir();
    let registry = ExecutorRegistry::from_config(&config, args.backend, &scratch)?;
    let runner = SuiteRunner::new(Arc::new(registry));

    let attempt_id = Uuid::new_v4();
    let request = SuiteRequest {
        attempt_id,
        code: &code,
        language: &args.language,
        tests: &tests,
        per_test_timeout: Duration::from_millis(args.timeout_ms),
    };

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        });
    }

    match runner.run_all(&request, &shutdown).await {
        Ok(verdict) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&verdict)?);
            } else {
                print_verdict(attempt_id, &verdict);
            }
            Ok(verdict.status() == AttemptStatus::Passed)
        }
        Err(e) => {
            println!("❌ {}: {}", e.kind(), e);
            Ok(false)
        }
    }
}

pub fn languages(config_path: &Path) -> Result<()> {
    let config = LanguageConfigManager::load_or_builtin(config_path)?;
    println!("📋 Configured languages:");
    for language in config.list_languages() {
        let entry = config.get_config(&language)?;
        let image = entry.image.as_deref().unwrap_or("-");
        println!(
            "  {:<12} version {:<8} image {:<28} memory {}MB  cpu {}",
            language.as_str(),
            entry.version,
            image,
            entry.memory_limit_mb,
            entry.cpu_limit
        );
    }
    Ok(())
}

fn read_tests(path: &Path) -> Result<Vec<TestCase>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read test file {}", path.display()))?;
    parse_tests(&content).with_context(|| format!("Invalid test file {}", path.display()))
}

fn parse_tests(content: &str) -> Result<Vec<TestCase>> {
    Ok(serde_json::from_str(content)?)
}

fn print_verdict(attempt_id: Uuid, verdict: &Verdict) {
    println!("🧪 Attempt {}", attempt_id);
    for line in &verdict.logs {
        println!("  {}", line);
    }
    let icon = match verdict.status() {
        AttemptStatus::Passed => "✅",
        _ => "❌",
    };
    println!(
        "{} {}/{} passed in {}ms",
        icon, verdict.passed, verdict.total, verdict.runtime_ms
    );
}
