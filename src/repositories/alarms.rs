use time::PrimitiveDateTime;

use crate::db::models::{AlarmConfiguration, ExamAlarm};

pub(crate) const COLUMNS: &str = "\
    id, exam_id, student_id, attempt_id, offset_minutes, alarm_time, is_active, created_at";

pub(crate) async fn list_active_offsets(
    executor: impl sqlx::PgExecutor<'_>,
) -> Result<Vec<i32>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT alarm_minutes FROM alarm_configurations WHERE is_active ORDER BY alarm_minutes",
    )
    .fetch_all(executor)
    .await
}

pub(crate) async fn deactivate_configuration(
    executor: impl sqlx::PgExecutor<'_>,
) -> Result<u64, sqlx::Error> {
    let result =
        sqlx::query("UPDATE alarm_configurations SET is_active = FALSE WHERE is_active")
            .execute(executor)
            .await?;
    Ok(result.rows_affected())
}

pub(crate) async fn insert_configuration(
    executor: impl sqlx::PgExecutor<'_>,
    alarm_minutes: i32,
    now: PrimitiveDateTime,
) -> Result<AlarmConfiguration, sqlx::Error> {
    sqlx::query_as::<_, AlarmConfiguration>(
        "INSERT INTO alarm_configurations (alarm_minutes, is_active, created_at)
         VALUES ($1, TRUE, $2)
         RETURNING id, alarm_minutes, is_active, created_at",
    )
    .bind(alarm_minutes)
    .bind(now)
    .fetch_one(executor)
    .await
}

pub(crate) async fn exists_for_pair(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
    student_id: &str,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM exam_alarms WHERE exam_id = $1 AND student_id = $2)",
    )
    .bind(exam_id)
    .bind(student_id)
    .fetch_one(executor)
    .await
}

pub(crate) async fn insert(
    executor: impl sqlx::PgExecutor<'_>,
    alarm: &ExamAlarm,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO exam_alarms (
            id, exam_id, student_id, attempt_id, offset_minutes, alarm_time, is_active, created_at
         ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT DO NOTHING",
    )
    .bind(&alarm.id)
    .bind(&alarm.exam_id)
    .bind(&alarm.student_id)
    .bind(&alarm.attempt_id)
    .bind(alarm.offset_minutes)
    .bind(alarm.alarm_time)
    .bind(alarm.is_active)
    .bind(alarm.created_at)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
pub(crate) async fn list_for_pair(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
    student_id: &str,
) -> Result<Vec<ExamAlarm>, sqlx::Error> {
    sqlx::query_as::<_, ExamAlarm>(&format!(
        "SELECT {COLUMNS} FROM exam_alarms
         WHERE exam_id = $1 AND student_id = $2
         ORDER BY alarm_time"
    ))
    .bind(exam_id)
    .bind(student_id)
    .fetch_all(executor)
    .await
}

pub(crate) async fn list_active_for_update(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
    student_id: &str,
) -> Result<Vec<ExamAlarm>, sqlx::Error> {
    sqlx::query_as::<_, ExamAlarm>(&format!(
        "SELECT {COLUMNS} FROM exam_alarms
         WHERE exam_id = $1 AND student_id = $2 AND is_active
         ORDER BY alarm_time
         FOR UPDATE"
    ))
    .bind(exam_id)
    .bind(student_id)
    .fetch_all(executor)
    .await
}

pub(crate) async fn deactivate_through(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
    student_id: &str,
    alarm_time: PrimitiveDateTime,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE exam_alarms SET is_active = FALSE
         WHERE exam_id = $1 AND student_id = $2 AND is_active AND alarm_time <= $3",
    )
    .bind(exam_id)
    .bind(student_id)
    .bind(alarm_time)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// Set difference: pending alarms whose offset left the active configuration.
pub(crate) async fn deactivate_unconfigured_pending(
    executor: impl sqlx::PgExecutor<'_>,
    now: PrimitiveDateTime,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE exam_alarms SET is_active = FALSE
         WHERE is_active
           AND alarm_time > $1
           AND offset_minutes NOT IN (
               SELECT alarm_minutes FROM alarm_configurations WHERE is_active
           )",
    )
    .bind(now)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

pub(crate) async fn delete_for_attempt(
    executor: impl sqlx::PgExecutor<'_>,
    attempt_id: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM exam_alarms WHERE attempt_id = $1")
        .bind(attempt_id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}
