// Attempt storage as seen by the worker: load the record, write back status and outcome

use anyhow::Result;
use async_trait::async_trait;
use dojo_common::redis as redis_keys;
use dojo_common::types::{AttemptOutcome, AttemptRecord, AttemptStatus};
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn load(&self, attempt_id: Uuid) -> Result<Option<AttemptRecord>>;

    async fn mark_running(&self, attempt_id: Uuid) -> Result<()>;

    async fn save_outcome(&self, attempt_id: Uuid, outcome: &AttemptOutcome) -> Result<()>;
}

/// Records under `dojo:attempt:<id>`, outcomes and statuses with a 24h TTL
pub struct RedisAttemptStore {
    conn: ConnectionManager,
}

impl RedisAttemptStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl AttemptStore for RedisAttemptStore {
    async fn load(&self, attempt_id: Uuid) -> Result<Option<AttemptRecord>> {
        let mut conn = self.conn.clone();
        Ok(redis_keys::load_attempt(&mut conn, &attempt_id).await?)
    }

    async fn mark_running(&self, attempt_id: Uuid) -> Result<()> {
        let mut conn = self.conn.clone();
        redis_keys::set_status(&mut conn, &attempt_id, AttemptStatus::Running).await?;
        Ok(())
    }

    async fn save_outcome(&self, attempt_id: Uuid, outcome: &AttemptOutcome) -> Result<()> {
        let mut conn = self.conn.clone();
        redis_keys::store_outcome(&mut conn, &attempt_id, outcome).await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryAttemptStore {
    records: Mutex<HashMap<Uuid, AttemptRecord>>,
    statuses: Mutex<HashMap<Uuid, AttemptStatus>>,
    outcomes: Mutex<HashMap<Uuid, AttemptOutcome>>,
}

impl MemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn insert(&self, record: AttemptRecord) {
        let id = record.id;
        self.records.lock().await.insert(id, record);
        self.statuses.lock().await.insert(id, AttemptStatus::Submitted);
    }

    #[cfg(test)]
    pub async fn status(&self, attempt_id: Uuid) -> Option<AttemptStatus> {
        self.statuses.lock().await.get(&attempt_id).copied()
    }

    #[cfg(test)]
    pub async fn outcome(&self, attempt_id: Uuid) -> Option<AttemptOutcome> {
        self.outcomes.lock().await.get(&attempt_id).cloned()
    }
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    async fn load(&self, attempt_id: Uuid) -> Result<Option<AttemptRecord>> {
        Ok(self.records.lock().await.get(&attempt_id).cloned())
    }

    async fn mark_running(&self, attempt_id: Uuid) -> Result<()> {
        self.statuses
            .lock()
            .await
            .insert(attempt_id, AttemptStatus::Running);
        Ok(())
    }

    async fn save_outcome(&self, attempt_id: Uuid, outcome: &AttemptOutcome) -> Result<()> {
        self.statuses.lock().await.insert(attempt_id, outcome.status);
        self.outcomes
            .lock()
            .await
            .insert(attempt_id, outcome.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dojo_common::types::TestCase;
    use serde_json::json;

    fn record() -> AttemptRecord {
        AttemptRecord {
            id: Uuid::new_v4(),
            language: "js".to_string(),
            code: "module.exports = () => 1;".to_string(),
            tests: vec![TestCase::new(vec![], json!(1))],
        }
    }

    #[tokio::test]
    async fn test_memory_store_status_transitions() {
        let store = MemoryAttemptStore::new();
        let rec = record();
        let id = rec.id;
        store.insert(rec).await;
        assert_eq!(store.status(id).await, Some(AttemptStatus::Submitted));

        store.mark_running(id).await.unwrap();
        assert_eq!(store.status(id).await, Some(AttemptStatus::Running));

        let outcome = AttemptOutcome::graded(1, 1, 5, &["Test 1 passed in 1ms".to_string()]);
        store.save_outcome(id, &outcome).await.unwrap();
        assert_eq!(store.status(id).await, Some(AttemptStatus::Passed));
        assert_eq!(store.outcome(id).await, Some(outcome));
    }

    #[tokio::test]
    async fn test_unknown_attempt_loads_none() {
        let store = MemoryAttemptStore::new();
        assert!(store.load(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_redis_store_round_trip() {
        let client = redis::Client::open("redis://127.0.0.1:6379").unwrap();
        let mut conn = ConnectionManager::new(client).await.unwrap();
        let rec = record();
        redis_keys::store_attempt(&mut conn, &rec).await.unwrap();

        let store = RedisAttemptStore::new(conn.clone());
        let loaded = store.load(rec.id).await.unwrap().unwrap();
        assert_eq!(loaded.code, rec.code);

        let outcome = AttemptOutcome::errored("COMPILE_ERROR: boom");
        store.save_outcome(rec.id, &outcome).await.unwrap();
        let stored = redis_keys::get_outcome(&mut conn, &rec.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AttemptStatus::Error);
    }
}
