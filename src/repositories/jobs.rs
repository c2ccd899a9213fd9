use serde_json::Value;
use sqlx::types::Json;
use time::PrimitiveDateTime;

use crate::db::models::BackgroundJob;
use crate::db::types::{JobKind, JobStatus};

pub(crate) const COLUMNS: &str = "\
    id, kind, payload, status, attempts, max_attempts, run_after, last_error, \
    created_at, updated_at";

pub(crate) async fn enqueue(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    kind: JobKind,
    payload: Value,
    max_attempts: i32,
    now: PrimitiveDateTime,
) -> Result<BackgroundJob, sqlx::Error> {
    sqlx::query_as::<_, BackgroundJob>(&format!(
        "INSERT INTO background_jobs (
            id, kind, payload, status, attempts, max_attempts, run_after, created_at, updated_at
         ) VALUES ($1, $2, $3, $4, 0, $5, $6, $6, $6)
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(kind)
    .bind(Json(payload))
    .bind(JobStatus::Queued)
    .bind(max_attempts)
    .bind(now)
    .fetch_one(executor)
    .await
}

/// Claims the oldest runnable job and bumps its attempt counter.
pub(crate) async fn claim_next(
    executor: impl sqlx::PgExecutor<'_>,
    now: PrimitiveDateTime,
) -> Result<Option<BackgroundJob>, sqlx::Error> {
    sqlx::query_as::<_, BackgroundJob>(
        "WITH candidate AS (
            SELECT id FROM background_jobs
            WHERE status = $1 AND run_after <= $2
            ORDER BY run_after, created_at
            FOR UPDATE SKIP LOCKED
            LIMIT 1
        )
        UPDATE background_jobs
        SET status = $3,
            attempts = background_jobs.attempts + 1,
            updated_at = $2
        FROM candidate
        WHERE background_jobs.id = candidate.id
        RETURNING background_jobs.*",
    )
    .bind(JobStatus::Queued)
    .bind(now)
    .bind(JobStatus::Running)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn mark_done(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE background_jobs SET status = $2, last_error = NULL, updated_at = $3 WHERE id = $1",
    )
    .bind(id)
    .bind(JobStatus::Done)
    .bind(now)
    .execute(executor)
    .await?;
    Ok(())
}

pub(crate) async fn reschedule(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    error: &str,
    run_after: PrimitiveDateTime,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE background_jobs
         SET status = $2, last_error = $3, run_after = $4, updated_at = $5
         WHERE id = $1",
    )
    .bind(id)
    .bind(JobStatus::Queued)
    .bind(error)
    .bind(run_after)
    .bind(now)
    .execute(executor)
    .await?;
    Ok(())
}

pub(crate) async fn mark_failed(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    error: &str,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE background_jobs SET status = $2, last_error = $3, updated_at = $4 WHERE id = $1",
    )
    .bind(id)
    .bind(JobStatus::Failed)
    .bind(error)
    .bind(now)
    .execute(executor)
    .await?;
    Ok(())
}

/// Puts jobs left `running` by a crashed worker back in the queue.
pub(crate) async fn requeue_stale(
    executor: impl sqlx::PgExecutor<'_>,
    stale_before: PrimitiveDateTime,
    now: PrimitiveDateTime,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE background_jobs
         SET status = $1, run_after = $3, updated_at = $3
         WHERE status = $2 AND updated_at < $4",
    )
    .bind(JobStatus::Queued)
    .bind(JobStatus::Running)
    .bind(now)
    .bind(stale_before)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
pub(crate) async fn find_by_id(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<Option<BackgroundJob>, sqlx::Error> {
    sqlx::query_as::<_, BackgroundJob>(&format!(
        "SELECT {COLUMNS} FROM background_jobs WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await
}
