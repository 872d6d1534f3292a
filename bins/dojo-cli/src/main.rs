mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use dojo_common::config::RunnerBackend;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dojo-cli")]
#[command(
    about = "Dojo CLI - Grade solutions locally and inspect language setup",
    long_about = None
)]
struct Cli {
    /// Path to languages.json (built-in defaults when missing)
    #[arg(long, global = true, default_value = "config/languages.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade a source file against a JSON test file, without a queue
    Run {
        /// Language name (e.g., javascript, js, python, py, cpp, c++)
        #[arg(short, long)]
        language: String,

        /// Source file holding the solution
        #[arg(short, long)]
        code: PathBuf,

        /// JSON file with an array of {"input": [...], "expected": ...}
        #[arg(short, long)]
        tests: PathBuf,

        /// Per-test time limit in milliseconds
        #[arg(long, default_value = "2000")]
        timeout_ms: u64,

        /// Where process-based languages run
        #[arg(short, long, value_enum, default_value = "local")]
        backend: Backend,

        /// Print the verdict as JSON instead of a summary
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// List configured languages
    Languages,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Local,
    Docker,
}

impl From<Backend> for RunnerBackend {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Local => RunnerBackend::Local,
            Backend::Docker => RunnerBackend::Docker,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            language,
            code,
            tests,
            timeout_ms,
            backend,
            json,
        } => {
            let all_passed = commands::run(commands::RunArgs {
                config: cli.config,
                language,
                code,
                tests,
                timeout_ms,
                backend: backend.into(),
                json,
            })
            .await?;
            if !all_passed {
                std::process::exit(1);
            }
        }
        Commands::Languages => {
            commands::languages(&cli.config)?;
        }
    }

    Ok(())
}
