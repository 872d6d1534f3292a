mod queue;
mod store;
mod worker;

use anyhow::Context;
use dojo_common::config::{QueueImpl, WorkerSettings};
use dojo_sandbox::config::LanguageConfigManager;
use dojo_sandbox::{ExecutorRegistry, SuiteRunner};
use queue::{JobQueue, MemoryJobQueue, RedisJobQueue};
use std::sync::Arc;
use store::{AttemptStore, MemoryAttemptStore, RedisAttemptStore};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use worker::Worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Dojo worker booting...");

    let settings = WorkerSettings::from_env().context("Invalid worker settings")?;

    let config_manager = LanguageConfigManager::load_or_builtin(&settings.languages_config)
        .map_err(|e| {
            error!("Failed to load language configurations: {:#}", e);
            e
        })?;
    info!(languages = ?config_manager.list_languages(), "Loaded language configurations");

    // Built once and shared by every loop
    let registry = ExecutorRegistry::from_config(
        &config_manager,
        settings.backend,
        &settings.scratch_dir,
    )?;
    let runner = Arc::new(SuiteRunner::new(Arc::new(registry)));

    let (queue, store): (Arc<dyn JobQueue>, Arc<dyn AttemptStore>) = match settings.queue_impl {
        QueueImpl::Redis => {
            let client = ::redis::Client::open(settings.redis_url.as_str())
                .context("Invalid REDIS_URL")?;
            let queue = RedisJobQueue::connect(client.clone()).await?;
            let conn = ::redis::aio::ConnectionManager::new(client)
                .await
                .context("Failed to connect to Redis")?;
            info!(redis_url = %settings.redis_url, "Connected to Redis");
            (Arc::new(queue), Arc::new(RedisAttemptStore::new(conn)))
        }
        QueueImpl::Memory => {
            warn!("Using in-memory queue and store: nothing outside this process can submit");
            (
                Arc::new(MemoryJobQueue::new()),
                Arc::new(MemoryAttemptStore::new()),
            )
        }
    };

    let worker = Arc::new(Worker::new(
        queue,
        store,
        runner,
        settings.per_test_timeout,
        settings.queue_wait,
    ));

    // Setup graceful shutdown
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    warn!("Received shutdown signal, finishing in-flight tests...");
                    shutdown.cancel();
                }
                Err(e) => error!(error = %e, "Failed to install CTRL+C signal handler"),
            }
        });
    }

    info!(
        concurrency = settings.concurrency,
        per_test_timeout_ms = settings.per_test_timeout.as_millis() as u64,
        "Worker ready"
    );
    worker.run(settings.concurrency, shutdown).await;

    info!("Worker shutdown complete");
    Ok(())
}

fn init_tracing() {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
