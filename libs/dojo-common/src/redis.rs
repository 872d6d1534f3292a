use crate::types::{AttemptJob, AttemptOutcome, AttemptRecord, AttemptStatus};
use redis::{AsyncCommands, RedisResult};
use uuid::Uuid;

// Redis key scheme shared by every component that touches attempts.
// Keys are deterministic so producers, workers and readers never drift.

pub const QUEUE_KEY: &str = "dojo:queue:attempts";
pub const FAILED_QUEUE_KEY: &str = "dojo:queue:failed";
pub const ATTEMPT_PREFIX: &str = "dojo:attempt";
pub const RESULT_PREFIX: &str = "dojo:result";
pub const STATUS_PREFIX: &str = "dojo:status";

/// Results and status entries expire after 24 hours
pub const RESULT_TTL_SECONDS: u64 = 86_400;

/// Key holding the stored attempt record
pub fn attempt_key(attempt_id: &Uuid) -> String {
    format!("{}:{}", ATTEMPT_PREFIX, attempt_id)
}

/// Key holding the graded outcome
pub fn result_key(attempt_id: &Uuid) -> String {
    format!("{}:{}", RESULT_PREFIX, attempt_id)
}

/// Key holding the bare status, for quick lookup
pub fn status_key(attempt_id: &Uuid) -> String {
    format!("{}:{}", STATUS_PREFIX, attempt_id)
}

fn encode<T: serde::Serialize>(value: &T) -> RedisResult<String> {
    serde_json::to_string(value).map_err(|e| {
        redis::RedisError::from((
            redis::ErrorKind::TypeError,
            "serialization error",
            e.to_string(),
        ))
    })
}

fn decode<T: serde::de::DeserializeOwned>(payload: &str) -> RedisResult<T> {
    serde_json::from_str(payload).map_err(|e| {
        redis::RedisError::from((
            redis::ErrorKind::TypeError,
            "deserialization error",
            e.to_string(),
        ))
    })
}

/// Push an attempt onto the work queue.
/// Uses RPUSH for FIFO semantics
pub async fn push_job(
    conn: &mut redis::aio::ConnectionManager,
    job: &AttemptJob,
) -> RedisResult<()> {
    let payload = encode(job)?;
    conn.rpush(QUEUE_KEY, payload).await
}

/// Pop the next attempt, waiting up to `timeout_seconds`.
/// Uses BLPOP so an idle worker wakes up regularly to observe shutdown
pub async fn pop_job(
    conn: &mut redis::aio::ConnectionManager,
    timeout_seconds: f64,
) -> RedisResult<Option<AttemptJob>> {
    let result: Option<(String, String)> = conn.blpop(QUEUE_KEY, timeout_seconds).await?;

    match result {
        Some((_key, payload)) => Ok(Some(decode(&payload)?)),
        None => Ok(None),
    }
}

/// Park a job that could not be graded on the dead-letter list
pub async fn push_failed(
    conn: &mut redis::aio::ConnectionManager,
    job: &AttemptJob,
    reason: &str,
) -> RedisResult<()> {
    let payload = encode(&serde_json::json!({
        "job": job,
        "reason": reason,
    }))?;
    conn.rpush(FAILED_QUEUE_KEY, payload).await
}

/// Store an attempt record so a worker can pick it up
pub async fn store_attempt(
    conn: &mut redis::aio::ConnectionManager,
    record: &AttemptRecord,
) -> RedisResult<()> {
    let payload = encode(record)?;
    let _: () = conn.set(attempt_key(&record.id), payload).await?;
    set_status(conn, &record.id, AttemptStatus::Submitted).await
}

/// Load an attempt record
pub async fn load_attempt(
    conn: &mut redis::aio::ConnectionManager,
    attempt_id: &Uuid,
) -> RedisResult<Option<AttemptRecord>> {
    let payload: Option<String> = conn.get(attempt_key(attempt_id)).await?;
    payload.map(|data| decode(&data)).transpose()
}

/// Record the current status of an attempt
pub async fn set_status(
    conn: &mut redis::aio::ConnectionManager,
    attempt_id: &Uuid,
    status: AttemptStatus,
) -> RedisResult<()> {
    let status_str = encode(&status)?;
    conn.set_ex(status_key(attempt_id), status_str, RESULT_TTL_SECONDS as _)
        .await
}

/// Store the graded outcome, plus its status separately for quick lookup
pub async fn store_outcome(
    conn: &mut redis::aio::ConnectionManager,
    attempt_id: &Uuid,
    outcome: &AttemptOutcome,
) -> RedisResult<()> {
    let payload = encode(outcome)?;
    let _: () = conn
        .set_ex(result_key(attempt_id), payload, RESULT_TTL_SECONDS as _)
        .await?;
    set_status(conn, attempt_id, outcome.status).await
}

/// Retrieve a graded outcome
pub async fn get_outcome(
    conn: &mut redis::aio::ConnectionManager,
    attempt_id: &Uuid,
) -> RedisResult<Option<AttemptOutcome>> {
    let payload: Option<String> = conn.get(result_key(attempt_id)).await?;
    payload.map(|data| decode(&data)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_deterministic() {
        let id = Uuid::new_v4();
        assert_eq!(attempt_key(&id), attempt_key(&id));
        assert_eq!(result_key(&id), format!("dojo:result:{}", id));
        assert!(status_key(&id).starts_with("dojo:status:"));
        assert!(status_key(&id).contains(&id.to_string()));
    }

    #[test]
    fn test_job_payload_round_trip() {
        let job = AttemptJob {
            attempt_id: Uuid::new_v4(),
            language: "python".to_string(),
        };
        let decoded: AttemptJob = decode(&encode(&job).unwrap()).unwrap();
        assert_eq!(decoded, job);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode::<AttemptJob>("not json").unwrap_err();
        assert_eq!(err.kind(), redis::ErrorKind::TypeError);
    }
}
