use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use uuid::Uuid;

use ocr_queue::job::{Document, DocumentKind, Expected, JobEntry, JobId, JobPolicy, JobState, Transition, TransitionError};
use ocr_queue::{ExtractionResult, JobStore, StoreError};

const COLUMNS: &str = "id, kind, payload, state, attempt, policy, result, error, \
                       enqueued_at, eligible_at, started_at, finished_at";

/// Durable job store using SQLite.
///
/// Timestamps are integer milliseconds since the epoch so eligibility and
/// expiry comparisons are numeric rather than lexical.
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Backend(format!("Invalid timestamp: {}", ms)))
}

fn opt_from_millis(ms: Option<i64>) -> Result<Option<DateTime<Utc>>, StoreError> {
    ms.map(from_millis).transpose()
}

fn row_to_job(row: &SqliteRow) -> Result<JobEntry, StoreError> {
    let id_str: String = row.try_get("id").map_err(backend)?;
    let id = Uuid::parse_str(&id_str).map_err(|_| StoreError::Backend("Invalid UUID".into()))?;

    let kind: String = row.try_get("kind").map_err(backend)?;
    let kind: DocumentKind = kind.parse().map_err(StoreError::Backend)?;
    let bytes: Vec<u8> = row.try_get("payload").map_err(backend)?;

    let state: String = row.try_get("state").map_err(backend)?;
    let state: JobState = state.parse().map_err(StoreError::Backend)?;
    let attempt: i64 = row.try_get("attempt").map_err(backend)?;

    let policy: String = row.try_get("policy").map_err(backend)?;
    let policy: JobPolicy = serde_json::from_str(&policy)?;

    let result: Option<String> = row.try_get("result").map_err(backend)?;
    let result: Option<ExtractionResult> = result.map(|s| serde_json::from_str(&s)).transpose()?;
    let error: Option<String> = row.try_get("error").map_err(backend)?;

    Ok(JobEntry {
        id,
        document: Document { kind, bytes },
        state,
        attempt: attempt as u32,
        policy,
        result,
        error,
        enqueued_at: from_millis(row.try_get("enqueued_at").map_err(backend)?)?,
        eligible_at: from_millis(row.try_get("eligible_at").map_err(backend)?)?,
        started_at: opt_from_millis(row.try_get("started_at").map_err(backend)?)?,
        finished_at: opt_from_millis(row.try_get("finished_at").map_err(backend)?)?,
    })
}

#[async_trait]
impl JobStore for SqliteJobStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn is_healthy(&self) -> bool {
        !self.pool.is_closed() && sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    async fn enqueue(&self, job: JobEntry) -> Result<(), StoreError> {
        let policy = serde_json::to_string(&job.policy)?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, kind, payload, state, attempt, policy, result_ttl_ms, failure_ttl_ms,
                              seq, enqueued_at, eligible_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM jobs), ?, ?)
            "#,
        )
        .bind(job.id.to_string())
        .bind(job.document.kind.as_str())
        .bind(&job.document.bytes)
        .bind(job.state.as_str())
        .bind(job.attempt as i64)
        .bind(policy)
        .bind(millis(job.policy.result_ttl))
        .bind(millis(job.policy.failure_ttl))
        .bind(job.enqueued_at.timestamp_millis())
        .bind(job.eligible_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db) if db.is_unique_violation() => StoreError::Duplicate(job.id),
            _ => backend(e),
        })?;

        Ok(())
    }

    async fn claim_next(&self) -> Result<Option<JobEntry>, StoreError> {
        let now = Utc::now().timestamp_millis();

        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET state = 'started', attempt = attempt + 1, started_at = ?1
            WHERE state = 'queued' AND id = (
                SELECT id FROM jobs
                WHERE state = 'queued' AND eligible_at <= ?1
                ORDER BY eligible_at ASC, seq ASC
                LIMIT 1
            )
            RETURNING {COLUMNS}
            "#
        ))
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.as_ref().map(row_to_job).transpose()
    }

    async fn get(&self, id: JobId) -> Result<Option<JobEntry>, StoreError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM jobs WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        row.as_ref().map(row_to_job).transpose()
    }

    async fn compare_and_swap(
        &self,
        id: JobId,
        expected: Expected,
        transition: Transition,
    ) -> Result<bool, StoreError> {
        let target = transition.target();
        if !expected.state.can_transition_to(target) {
            return Err(TransitionError {
                from: expected.state,
                to: target,
            }
            .into());
        }

        let now = Utc::now().timestamp_millis();
        let query = match transition {
            Transition::Finish(result) => sqlx::query(
                r#"
                UPDATE jobs
                SET state = 'finished', result = ?, error = NULL, finished_at = ?,
                    expires_at = ? + result_ttl_ms
                WHERE id = ? AND state = ? AND attempt = ?
                "#,
            )
            .bind(serde_json::to_string(&result)?)
            .bind(now)
            .bind(now),
            Transition::Retry { error, eligible_at } => sqlx::query(
                r#"
                UPDATE jobs
                SET state = 'queued', error = ?, eligible_at = ?,
                    seq = (SELECT COALESCE(MAX(seq), 0) + 1 FROM jobs)
                WHERE id = ? AND state = ? AND attempt = ?
                "#,
            )
            .bind(error)
            .bind(eligible_at.timestamp_millis()),
            Transition::Fail(error) => sqlx::query(
                r#"
                UPDATE jobs
                SET state = 'failed', error = ?, finished_at = ?,
                    expires_at = ? + failure_ttl_ms
                WHERE id = ? AND state = ? AND attempt = ?
                "#,
            )
            .bind(error)
            .bind(now)
            .bind(now),
        };

        let done = query
            .bind(id.to_string())
            .bind(expected.state.as_str())
            .bind(expected.attempt as i64)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(done.rows_affected() == 1)
    }

    async fn started(&self) -> Result<Vec<JobEntry>, StoreError> {
        let rows = sqlx::query(&format!("SELECT {COLUMNS} FROM jobs WHERE state = 'started'"))
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        rows.iter().map(row_to_job).collect()
    }

    async fn expire(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let done = sqlx::query(
            "DELETE FROM jobs WHERE state IN ('finished', 'failed') AND expires_at IS NOT NULL AND expires_at <= ?",
        )
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(done.rows_affected() as usize)
    }
}
