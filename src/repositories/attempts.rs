use time::PrimitiveDateTime;

use crate::db::models::{ExamAttempt, ExamAttemptHistory};
use crate::db::types::AttemptStatus;

pub(crate) const COLUMNS: &str = "\
    id, exam_id, student_id, status, started_at, completed_at, last_poll_timestamp, \
    review_status, is_passing, created_at, updated_at";

const HISTORY_COLUMNS: &str = "\
    id, attempt_id, exam_id, student_id, status, started_at, completed_at, last_poll_timestamp, \
    review_status, is_passing, reason, archived_at";

pub(crate) async fn find(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
    student_id: &str,
) -> Result<Option<ExamAttempt>, sqlx::Error> {
    sqlx::query_as::<_, ExamAttempt>(&format!(
        "SELECT {COLUMNS} FROM exam_attempts WHERE exam_id = $1 AND student_id = $2"
    ))
    .bind(exam_id)
    .bind(student_id)
    .fetch_optional(executor)
    .await
}

/// Row-locks the attempt so the request path and the lazy timeout path serialize.
pub(crate) async fn find_for_update(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
    student_id: &str,
) -> Result<Option<ExamAttempt>, sqlx::Error> {
    sqlx::query_as::<_, ExamAttempt>(&format!(
        "SELECT {COLUMNS} FROM exam_attempts WHERE exam_id = $1 AND student_id = $2 FOR UPDATE"
    ))
    .bind(exam_id)
    .bind(student_id)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn find_by_id(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<Option<ExamAttempt>, sqlx::Error> {
    sqlx::query_as::<_, ExamAttempt>(&format!("SELECT {COLUMNS} FROM exam_attempts WHERE id = $1"))
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub(crate) async fn find_live(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
    student_id: &str,
) -> Result<Option<ExamAttempt>, sqlx::Error> {
    sqlx::query_as::<_, ExamAttempt>(&format!(
        "SELECT {COLUMNS} FROM exam_attempts
         WHERE exam_id = $1 AND student_id = $2 AND status IN ($3, $4)"
    ))
    .bind(exam_id)
    .bind(student_id)
    .bind(AttemptStatus::Started)
    .bind(AttemptStatus::ReadyToSubmit)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn list_by_exam(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
) -> Result<Vec<ExamAttempt>, sqlx::Error> {
    sqlx::query_as::<_, ExamAttempt>(&format!(
        "SELECT {COLUMNS} FROM exam_attempts WHERE exam_id = $1 ORDER BY created_at, id"
    ))
    .bind(exam_id)
    .fetch_all(executor)
    .await
}

pub(crate) async fn insert(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    exam_id: &str,
    student_id: &str,
    status: AttemptStatus,
    now: PrimitiveDateTime,
) -> Result<ExamAttempt, sqlx::Error> {
    sqlx::query_as::<_, ExamAttempt>(&format!(
        "INSERT INTO exam_attempts (id, exam_id, student_id, status, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $5)
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(exam_id)
    .bind(student_id)
    .bind(status)
    .bind(now)
    .fetch_one(executor)
    .await
}

pub(crate) async fn apply_status(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    status: AttemptStatus,
    started_at: Option<PrimitiveDateTime>,
    completed_at: Option<PrimitiveDateTime>,
    now: PrimitiveDateTime,
) -> Result<ExamAttempt, sqlx::Error> {
    sqlx::query_as::<_, ExamAttempt>(&format!(
        "UPDATE exam_attempts
         SET status = $2, started_at = $3, completed_at = $4, updated_at = $5
         WHERE id = $1
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(status)
    .bind(started_at)
    .bind(completed_at)
    .bind(now)
    .fetch_one(executor)
    .await
}

pub(crate) async fn apply_review(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    status: AttemptStatus,
    review_status: &str,
    is_passing: bool,
    now: PrimitiveDateTime,
) -> Result<ExamAttempt, sqlx::Error> {
    sqlx::query_as::<_, ExamAttempt>(&format!(
        "UPDATE exam_attempts
         SET status = $2, review_status = $3, is_passing = $4, updated_at = $5
         WHERE id = $1
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(status)
    .bind(review_status)
    .bind(is_passing)
    .bind(now)
    .fetch_one(executor)
    .await
}

pub(crate) async fn record_poll(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE exam_attempts SET last_poll_timestamp = $2 WHERE id = $1")
        .bind(id)
        .bind(now)
        .execute(executor)
        .await?;
    Ok(())
}

/// Appends the pre-image of `attempt` to the history table.
pub(crate) async fn archive(
    executor: impl sqlx::PgExecutor<'_>,
    attempt: &ExamAttempt,
    reason: &str,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO exam_attempt_history (
            attempt_id, exam_id, student_id, status, started_at, completed_at,
            last_poll_timestamp, review_status, is_passing, reason, archived_at
         ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(&attempt.id)
    .bind(&attempt.exam_id)
    .bind(&attempt.student_id)
    .bind(attempt.status)
    .bind(attempt.started_at)
    .bind(attempt.completed_at)
    .bind(attempt.last_poll_timestamp)
    .bind(attempt.review_status.as_deref())
    .bind(attempt.is_passing)
    .bind(reason)
    .bind(now)
    .execute(executor)
    .await?;
    Ok(())
}

pub(crate) async fn delete(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM exam_attempts WHERE id = $1").bind(id).execute(executor).await?;
    Ok(())
}

pub(crate) async fn list_history(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
    student_id: &str,
) -> Result<Vec<ExamAttemptHistory>, sqlx::Error> {
    sqlx::query_as::<_, ExamAttemptHistory>(&format!(
        "SELECT {HISTORY_COLUMNS} FROM exam_attempt_history
         WHERE exam_id = $1 AND student_id = $2
         ORDER BY id"
    ))
    .bind(exam_id)
    .bind(student_id)
    .fetch_all(executor)
    .await
}
