use time::PrimitiveDateTime;

use crate::db::models::QuestionSet;
use crate::db::types::EnrollmentMode;

pub(crate) const COLUMNS: &str = "\
    id, exam_id, student_id, easy_indices, moderate_indices, hard_indices, created_at, updated_at";

pub(crate) struct QuestionSetColumns<'a> {
    pub(crate) easy: &'a str,
    pub(crate) moderate: &'a str,
    pub(crate) hard: &'a str,
}

pub(crate) async fn find(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
    student_id: &str,
) -> Result<Option<QuestionSet>, sqlx::Error> {
    sqlx::query_as::<_, QuestionSet>(&format!(
        "SELECT {COLUMNS} FROM question_sets WHERE exam_id = $1 AND student_id = $2"
    ))
    .bind(exam_id)
    .bind(student_id)
    .fetch_optional(executor)
    .await
}

/// The template row for non-randomized exams: the oldest set held by another active
/// timed enrollee. Sets of unenrolled students are skipped since exam edits never
/// re-derive them.
pub(crate) async fn find_template_for_exam(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
    excluding_student_id: &str,
) -> Result<Option<QuestionSet>, sqlx::Error> {
    sqlx::query_as::<_, QuestionSet>(
        "SELECT qs.id, qs.exam_id, qs.student_id, qs.easy_indices, qs.moderate_indices,
                qs.hard_indices, qs.created_at, qs.updated_at
         FROM question_sets qs
         JOIN exam_enrollments e ON e.exam_id = qs.exam_id AND e.student_id = qs.student_id
         WHERE qs.exam_id = $1 AND qs.student_id <> $2 AND e.is_active AND e.mode = $3
         ORDER BY qs.created_at, qs.id
         LIMIT 1",
    )
    .bind(exam_id)
    .bind(excluding_student_id)
    .bind(EnrollmentMode::Timed)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn upsert(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    exam_id: &str,
    student_id: &str,
    columns: QuestionSetColumns<'_>,
    now: PrimitiveDateTime,
) -> Result<QuestionSet, sqlx::Error> {
    sqlx::query_as::<_, QuestionSet>(&format!(
        "INSERT INTO question_sets (
            id, exam_id, student_id, easy_indices, moderate_indices, hard_indices,
            created_at, updated_at
         ) VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
         ON CONFLICT (student_id, exam_id) DO UPDATE SET
            easy_indices = EXCLUDED.easy_indices,
            moderate_indices = EXCLUDED.moderate_indices,
            hard_indices = EXCLUDED.hard_indices,
            updated_at = EXCLUDED.updated_at
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(exam_id)
    .bind(student_id)
    .bind(columns.easy)
    .bind(columns.moderate)
    .bind(columns.hard)
    .bind(now)
    .fetch_one(executor)
    .await
}

#[cfg(test)]
pub(crate) async fn list_by_exam(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
) -> Result<Vec<QuestionSet>, sqlx::Error> {
    sqlx::query_as::<_, QuestionSet>(&format!(
        "SELECT {COLUMNS} FROM question_sets WHERE exam_id = $1 ORDER BY created_at, id"
    ))
    .bind(exam_id)
    .fetch_all(executor)
    .await
}
