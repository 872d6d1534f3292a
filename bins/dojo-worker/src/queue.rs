// Attempt job queue: Redis list in production, in-process deque for development and tests

use anyhow::{Context, Result};
use async_trait::async_trait;
use dojo_common::redis as redis_keys;
use dojo_common::types::AttemptJob;
use redis::aio::ConnectionManager;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

/// A received job plus a queue-specific handle
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub id: String,
    pub job: AttemptJob,
}

impl QueueMessage {
    fn new(job: AttemptJob) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job,
        }
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: AttemptJob) -> Result<()>;

    /// Next job, or None once `wait` elapses with nothing queued
    async fn receive(&self, wait: Duration) -> Result<Option<QueueMessage>>;

    /// Processing finished; the message must not be redelivered
    async fn ack(&self, message: &QueueMessage) -> Result<()>;

    /// Processing failed; park the job with a reason
    async fn fail(&self, message: &QueueMessage, reason: &str) -> Result<()>;
}

/// RPUSH/BLPOP on `dojo:queue:attempts`
///
/// BLPOP removes the job, so delivery is at-most-once and `ack` has nothing to do.
pub struct RedisJobQueue {
    conn: ConnectionManager,
    /// Blocking pops get their own connection so they never stall other commands
    blocking: Mutex<ConnectionManager>,
}

impl RedisJobQueue {
    pub async fn connect(client: redis::Client) -> Result<Self> {
        let conn = ConnectionManager::new(client.clone())
            .await
            .context("Failed to connect to Redis")?;
        let blocking = ConnectionManager::new(client)
            .await
            .context("Failed to open blocking Redis connection")?;
        Ok(Self {
            conn,
            blocking: Mutex::new(blocking),
        })
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: AttemptJob) -> Result<()> {
        let mut conn = self.conn.clone();
        redis_keys::push_job(&mut conn, &job).await?;
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> Result<Option<QueueMessage>> {
        let mut conn = self.blocking.lock().await;
        let job = redis_keys::pop_job(&mut conn, wait.as_secs_f64()).await?;
        Ok(job.map(QueueMessage::new))
    }

    async fn ack(&self, message: &QueueMessage) -> Result<()> {
        debug!(message_id = %message.id, "Acked");
        Ok(())
    }

    async fn fail(&self, message: &QueueMessage, reason: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis_keys::push_failed(&mut conn, &message.job, reason).await?;
        warn!(
            attempt_id = %message.job.attempt_id,
            queue = redis_keys::FAILED_QUEUE_KEY,
            "Job moved to failed queue"
        );
        Ok(())
    }
}

/// In-process FIFO; only useful when producer and worker share a process
#[derive(Default)]
pub struct MemoryJobQueue {
    jobs: Mutex<VecDeque<AttemptJob>>,
    ready: Notify,
    /// Settled messages are only kept for assertions; a long-running dev worker drops them
    #[cfg(test)]
    acked: Mutex<Vec<QueueMessage>>,
    #[cfg(test)]
    failed: Mutex<Vec<(QueueMessage, String)>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    #[cfg(test)]
    pub async fn acked(&self) -> Vec<QueueMessage> {
        self.acked.lock().await.clone()
    }

    #[cfg(test)]
    pub async fn failed(&self) -> Vec<(QueueMessage, String)> {
        self.failed.lock().await.clone()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: AttemptJob) -> Result<()> {
        self.jobs.lock().await.push_back(job);
        // Stores a permit when nobody is waiting yet
        self.ready.notify_one();
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> Result<Option<QueueMessage>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(job) = self.jobs.lock().await.pop_front() {
                return Ok(Some(QueueMessage::new(job)));
            }
            if tokio::time::timeout_at(deadline, self.ready.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, message: &QueueMessage) -> Result<()> {
        debug!(message_id = %message.id, attempt_id = %message.job.attempt_id, "Job acknowledged");
        #[cfg(test)]
        self.acked.lock().await.push(message.clone());
        Ok(())
    }

    async fn fail(&self, message: &QueueMessage, reason: &str) -> Result<()> {
        warn!(
            message_id = %message.id,
            attempt_id = %message.job.attempt_id,
            reason,
            "Job failed"
        );
        #[cfg(test)]
        self.failed
            .lock()
            .await
            .push((message.clone(), reason.to_string()));
        Ok(())
    }
}
