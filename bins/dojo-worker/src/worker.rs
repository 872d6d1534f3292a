/// Worker Loop - Queue to Verdict to Storage
///
/// **Core Responsibility:**
/// Pull attempt jobs, grade them through the suite runner, and persist the
/// outcome. Runs N independent loops that share one queue, one store and
/// one runner.
///
/// **Outcome rules:**
/// - Attempt missing from storage: ERROR "Attempt not found", acked
/// - Attempt without tests: ERROR "No tests found", acked
/// - Suite ran: PASSED iff every test passed, else FAILED, acked
/// - Attempt-level error: ERROR "<KIND>: <message>", failed
/// - Shutdown mid-suite: job re-enqueued for another worker

use crate::queue::{JobQueue, QueueMessage};
use crate::store::AttemptStore;
use anyhow::{Context, Result};
use dojo_common::types::{AttemptOutcome, AttemptStatus};
use dojo_sandbox::{AttemptError, SuiteRequest, SuiteRunner};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Pause after an infrastructure error before polling again
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

pub struct Worker {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn AttemptStore>,
    runner: Arc<SuiteRunner>,
    per_test_timeout: Duration,
    queue_wait: Duration,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn AttemptStore>,
        runner: Arc<SuiteRunner>,
        per_test_timeout: Duration,
        queue_wait: Duration,
    ) -> Self {
        Self {
            queue,
            store,
            runner,
            per_test_timeout,
            queue_wait,
        }
    }

    /// Run `concurrency` loops until `shutdown` fires
    pub async fn run(self: Arc<Self>, concurrency: usize, shutdown: CancellationToken) {
        info!(concurrency, "Worker starting");

        let mut handles = Vec::with_capacity(concurrency);
        for slot in 0..concurrency {
            let worker = self.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                worker.slot_loop(slot, shutdown).await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker slot panicked");
            }
        }
    }

    async fn slot_loop(&self, slot: usize, shutdown: CancellationToken) {
        while !shutdown.is_cancelled() {
            if let Err(e) = self.process_one(&shutdown).await {
                error!(slot, error = %e, "Worker error");
                tokio::select! {
                    _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                    _ = shutdown.cancelled() => {}
                }
            }
        }
        info!(slot, "Worker slot stopped");
    }

    /// Receive and grade at most one attempt.
    /// Returns the recorded status, or None when the queue stayed empty.
    #[instrument(skip(self, cancel))]
    pub async fn process_one(&self, cancel: &CancellationToken) -> Result<Option<AttemptStatus>> {
        let Some(message) = self
            .queue
            .receive(self.queue_wait)
            .await
            .context("Failed to receive from queue")?
        else {
            return Ok(None);
        };

        let attempt_id = message.job.attempt_id;
        info!(attempt_id = %attempt_id, language = %message.job.language, "Received attempt");

        match self.grade(&message, cancel).await {
            Ok(status) => Ok(Some(status)),
            Err(e) => {
                // Storage or runner infrastructure failed: best-effort ERROR, then park the job
                let reason = format!("{:#}", e);
                error!(attempt_id = %attempt_id, error = %reason, "Attempt processing failed");
                let outcome = AttemptOutcome::errored(&reason);
                if let Err(save_err) = self.store.save_outcome(attempt_id, &outcome).await {
                    warn!(
                        attempt_id = %attempt_id,
                        error = %save_err,
                        "Failed to record ERROR outcome"
                    );
                }
                self.queue
                    .fail(&message, &outcome.error_message.unwrap_or(reason))
                    .await?;
                Ok(Some(AttemptStatus::Error))
            }
        }
    }

    async fn grade(
        &self,
        message: &QueueMessage,
        cancel: &CancellationToken,
    ) -> Result<AttemptStatus> {
        let attempt_id = message.job.attempt_id;

        let Some(record) = self
            .store
            .load(attempt_id)
            .await
            .context("Failed to load attempt")?
        else {
            warn!(attempt_id = %attempt_id, "Attempt not found");
            return self
                .finish(message, AttemptOutcome::errored("Attempt not found"))
                .await;
        };

        if record.tests.is_empty() {
            warn!(attempt_id = %attempt_id, "No tests found");
            return self
                .finish(message, AttemptOutcome::errored("No tests found"))
                .await;
        }

        self.store
            .mark_running(attempt_id)
            .await
            .context("Failed to mark attempt running")?;

        let request = SuiteRequest {
            attempt_id,
            code: &record.code,
            language: &record.language,
            tests: &record.tests,
            per_test_timeout: self.per_test_timeout,
        };

        match self.runner.run_all(&request, cancel).await {
            Ok(verdict) => {
                let mut logs = Vec::with_capacity(verdict.logs.len() + 1);
                logs.push(format!(
                    "[attempt {}] ran {} tests in {}ms",
                    attempt_id, verdict.total, verdict.runtime_ms
                ));
                logs.extend(verdict.logs);

                let outcome = AttemptOutcome::graded(
                    verdict.passed,
                    verdict.total,
                    verdict.runtime_ms,
                    &logs,
                );
                info!(
                    attempt_id = %attempt_id,
                    status = ?outcome.status,
                    passed = verdict.passed,
                    total = verdict.total,
                    runtime_ms = verdict.runtime_ms,
                    "Attempt graded"
                );
                self.finish(message, outcome).await
            }
            Err(AttemptError::Cancelled { completed, total }) => {
                warn!(
                    attempt_id = %attempt_id,
                    completed,
                    total,
                    "Shutdown interrupted grading, re-enqueueing"
                );
                self.queue
                    .enqueue(message.job.clone())
                    .await
                    .context("Failed to re-enqueue interrupted attempt")?;
                self.queue.ack(message).await?;
                Ok(AttemptStatus::Running)
            }
            Err(e) => {
                let reason = format!("{}: {}", e.kind(), e);
                warn!(attempt_id = %attempt_id, kind = e.kind(), error = %e, "Attempt errored");
                let outcome = AttemptOutcome::errored(&reason);
                self.store
                    .save_outcome(attempt_id, &outcome)
                    .await
                    .context("Failed to save outcome")?;
                self.queue
                    .fail(message, outcome.error_message.as_deref().unwrap_or(&reason))
                    .await?;
                Ok(AttemptStatus::Error)
            }
        }
    }

    async fn finish(
        &self,
        message: &QueueMessage,
        outcome: AttemptOutcome,
    ) -> Result<AttemptStatus> {
        let attempt_id = message.job.attempt_id;
        self.store
            .save_outcome(attempt_id, &outcome)
            .await
            .context("Failed to save outcome")?;
        self.queue.ack(message).await?;
        Ok(outcome.status)
    }
}
