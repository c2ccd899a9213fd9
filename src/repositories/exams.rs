use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::ProctoredExam;

pub(crate) const COLUMNS: &str = "\
    id, course_id, exam_key, title, release_date, due_date, allotted_time_minutes, \
    disconnection_window_minutes, is_randomized, is_proctored, is_active, \
    easy_mandatory, easy_optional, moderate_mandatory, moderate_optional, \
    hard_mandatory, hard_optional, num_easy_pulled, num_moderate_pulled, num_hard_pulled, \
    created_at, updated_at";

pub(crate) struct ExamFields<'a> {
    pub(crate) course_id: &'a str,
    pub(crate) exam_key: &'a str,
    pub(crate) title: &'a str,
    pub(crate) release_date: Option<PrimitiveDateTime>,
    pub(crate) due_date: Option<PrimitiveDateTime>,
    pub(crate) allotted_time_minutes: i32,
    pub(crate) disconnection_window_minutes: i32,
    pub(crate) is_randomized: bool,
    pub(crate) is_proctored: bool,
    pub(crate) is_active: bool,
    pub(crate) mandatory: [i32; 3],
    pub(crate) optional: [i32; 3],
    pub(crate) pulled: [i32; 3],
}

pub(crate) async fn find_by_id(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<Option<ProctoredExam>, sqlx::Error> {
    sqlx::query_as::<_, ProctoredExam>(&format!(
        "SELECT {COLUMNS} FROM proctored_exams WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn find_by_key(
    pool: &PgPool,
    course_id: &str,
    exam_key: &str,
) -> Result<Option<ProctoredExam>, sqlx::Error> {
    sqlx::query_as::<_, ProctoredExam>(&format!(
        "SELECT {COLUMNS} FROM proctored_exams WHERE course_id = $1 AND exam_key = $2"
    ))
    .bind(course_id)
    .bind(exam_key)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn create(
    pool: &PgPool,
    id: &str,
    fields: ExamFields<'_>,
    now: PrimitiveDateTime,
) -> Result<ProctoredExam, sqlx::Error> {
    sqlx::query_as::<_, ProctoredExam>(&format!(
        "INSERT INTO proctored_exams (
            id, course_id, exam_key, title, release_date, due_date, allotted_time_minutes,
            disconnection_window_minutes, is_randomized, is_proctored, is_active,
            easy_mandatory, moderate_mandatory, hard_mandatory,
            easy_optional, moderate_optional, hard_optional,
            num_easy_pulled, num_moderate_pulled, num_hard_pulled,
            created_at, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,$21)
        RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(fields.course_id)
    .bind(fields.exam_key)
    .bind(fields.title)
    .bind(fields.release_date)
    .bind(fields.due_date)
    .bind(fields.allotted_time_minutes)
    .bind(fields.disconnection_window_minutes)
    .bind(fields.is_randomized)
    .bind(fields.is_proctored)
    .bind(fields.is_active)
    .bind(fields.mandatory[0])
    .bind(fields.mandatory[1])
    .bind(fields.mandatory[2])
    .bind(fields.optional[0])
    .bind(fields.optional[1])
    .bind(fields.optional[2])
    .bind(fields.pulled[0])
    .bind(fields.pulled[1])
    .bind(fields.pulled[2])
    .bind(now)
    .fetch_one(pool)
    .await
}

pub(crate) async fn update(
    pool: &PgPool,
    id: &str,
    fields: ExamFields<'_>,
    now: PrimitiveDateTime,
) -> Result<Option<ProctoredExam>, sqlx::Error> {
    sqlx::query_as::<_, ProctoredExam>(&format!(
        "UPDATE proctored_exams SET
            course_id = $2, exam_key = $3, title = $4, release_date = $5, due_date = $6,
            allotted_time_minutes = $7, disconnection_window_minutes = $8,
            is_randomized = $9, is_proctored = $10, is_active = $11,
            easy_mandatory = $12, moderate_mandatory = $13, hard_mandatory = $14,
            easy_optional = $15, moderate_optional = $16, hard_optional = $17,
            num_easy_pulled = $18, num_moderate_pulled = $19, num_hard_pulled = $20,
            updated_at = $21
         WHERE id = $1
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(fields.course_id)
    .bind(fields.exam_key)
    .bind(fields.title)
    .bind(fields.release_date)
    .bind(fields.due_date)
    .bind(fields.allotted_time_minutes)
    .bind(fields.disconnection_window_minutes)
    .bind(fields.is_randomized)
    .bind(fields.is_proctored)
    .bind(fields.is_active)
    .bind(fields.mandatory[0])
    .bind(fields.mandatory[1])
    .bind(fields.mandatory[2])
    .bind(fields.optional[0])
    .bind(fields.optional[1])
    .bind(fields.optional[2])
    .bind(fields.pulled[0])
    .bind(fields.pulled[1])
    .bind(fields.pulled[2])
    .bind(now)
    .fetch_optional(pool)
    .await
}
