use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::PersistedGrade;

pub(crate) const COLUMNS: &str = "id, exam_id, student_id, percent_grade, created_at, updated_at";

pub(crate) async fn find(
    pool: &PgPool,
    exam_id: &str,
    student_id: &str,
) -> Result<Option<PersistedGrade>, sqlx::Error> {
    sqlx::query_as::<_, PersistedGrade>(&format!(
        "SELECT {COLUMNS} FROM persisted_grades WHERE exam_id = $1 AND student_id = $2"
    ))
    .bind(exam_id)
    .bind(student_id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn upsert(
    pool: &PgPool,
    id: &str,
    exam_id: &str,
    student_id: &str,
    percent_grade: f64,
    now: PrimitiveDateTime,
) -> Result<PersistedGrade, sqlx::Error> {
    sqlx::query_as::<_, PersistedGrade>(&format!(
        "INSERT INTO persisted_grades (
            id, exam_id, student_id, percent_grade, created_at, updated_at
         )
         VALUES ($1, $2, $3, $4, $5, $5)
         ON CONFLICT (exam_id, student_id) DO UPDATE SET
            percent_grade = EXCLUDED.percent_grade,
            updated_at = EXCLUDED.updated_at
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(exam_id)
    .bind(student_id)
    .bind(percent_grade)
    .bind(now)
    .fetch_one(pool)
    .await
}
