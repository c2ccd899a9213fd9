use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::Enrollment;
use crate::db::types::EnrollmentMode;

pub(crate) const COLUMNS: &str =
    "id, exam_id, student_id, mode, is_active, created_at, updated_at";

/// Inserts or reactivates the enrollment, switching it to `mode`.
pub(crate) async fn upsert(
    pool: &PgPool,
    id: &str,
    exam_id: &str,
    student_id: &str,
    mode: EnrollmentMode,
    now: PrimitiveDateTime,
) -> Result<Enrollment, sqlx::Error> {
    sqlx::query_as::<_, Enrollment>(&format!(
        "INSERT INTO exam_enrollments (
            id, exam_id, student_id, mode, is_active, created_at, updated_at
         )
         VALUES ($1, $2, $3, $4, TRUE, $5, $5)
         ON CONFLICT (exam_id, student_id)
         DO UPDATE SET mode = EXCLUDED.mode, is_active = TRUE, updated_at = EXCLUDED.updated_at
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(exam_id)
    .bind(student_id)
    .bind(mode)
    .bind(now)
    .fetch_one(pool)
    .await
}

pub(crate) async fn deactivate(
    pool: &PgPool,
    exam_id: &str,
    student_id: &str,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE exam_enrollments SET is_active = FALSE, updated_at = $3
         WHERE exam_id = $1 AND student_id = $2 AND is_active",
    )
    .bind(exam_id)
    .bind(student_id)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn list_active_student_ids(
    pool: &PgPool,
    exam_id: &str,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT student_id FROM exam_enrollments
         WHERE exam_id = $1 AND is_active
         ORDER BY created_at, student_id",
    )
    .bind(exam_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_active_timed_student_ids(
    pool: &PgPool,
    exam_id: &str,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT student_id FROM exam_enrollments
         WHERE exam_id = $1 AND is_active AND mode = $2
         ORDER BY created_at, student_id",
    )
    .bind(exam_id)
    .bind(EnrollmentMode::Timed)
    .fetch_all(pool)
    .await
}
