use time::PrimitiveDateTime;

use crate::db::models::TimedOutNotice;

/// Returns `false` when the notice was already pending.
pub(crate) async fn insert(
    executor: impl sqlx::PgExecutor<'_>,
    exam_key: &str,
    student_id: &str,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO exam_timed_out_notices (exam_key, student_id, created_at)
         VALUES ($1, $2, $3)
         ON CONFLICT (exam_key, student_id) DO NOTHING",
    )
    .bind(exam_key)
    .bind(student_id)
    .bind(now)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn find(
    executor: impl sqlx::PgExecutor<'_>,
    exam_key: &str,
    student_id: &str,
) -> Result<Option<TimedOutNotice>, sqlx::Error> {
    sqlx::query_as::<_, TimedOutNotice>(
        "SELECT exam_key, student_id, created_at
         FROM exam_timed_out_notices
         WHERE exam_key = $1 AND student_id = $2",
    )
    .bind(exam_key)
    .bind(student_id)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn delete(
    executor: impl sqlx::PgExecutor<'_>,
    exam_key: &str,
    student_id: &str,
) -> Result<bool, sqlx::Error> {
    let result =
        sqlx::query("DELETE FROM exam_timed_out_notices WHERE exam_key = $1 AND student_id = $2")
            .bind(exam_key)
            .bind(student_id)
            .execute(executor)
            .await?;
    Ok(result.rows_affected() > 0)
}
