use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::ProblemScore;
use crate::db::types::DifficultyTier;

pub(crate) const COLUMNS: &str = "\
    id, exam_id, student_id, problem_key, tier, earned, possible, updated_at";

pub(crate) async fn list_for_student(
    pool: &PgPool,
    exam_id: &str,
    student_id: &str,
) -> Result<Vec<ProblemScore>, sqlx::Error> {
    sqlx::query_as::<_, ProblemScore>(&format!(
        "SELECT {COLUMNS}
         FROM problem_scores
         WHERE exam_id = $1 AND student_id = $2
         ORDER BY problem_key"
    ))
    .bind(exam_id)
    .bind(student_id)
    .fetch_all(pool)
    .await
}

pub(crate) struct ScoreInput<'a> {
    pub(crate) problem_key: &'a str,
    pub(crate) tier: DifficultyTier,
    pub(crate) earned: f64,
    pub(crate) possible: f64,
}

pub(crate) async fn upsert(
    pool: &PgPool,
    id: &str,
    exam_id: &str,
    student_id: &str,
    input: ScoreInput<'_>,
    now: PrimitiveDateTime,
) -> Result<ProblemScore, sqlx::Error> {
    sqlx::query_as::<_, ProblemScore>(&format!(
        "INSERT INTO problem_scores (
            id, exam_id, student_id, problem_key, tier, earned, possible, updated_at
         ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (exam_id, student_id, problem_key) DO UPDATE SET
            tier = EXCLUDED.tier,
            earned = EXCLUDED.earned,
            possible = EXCLUDED.possible,
            updated_at = EXCLUDED.updated_at
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(exam_id)
    .bind(student_id)
    .bind(input.problem_key)
    .bind(input.tier)
    .bind(input.earned)
    .bind(input.possible)
    .bind(now)
    .fetch_one(pool)
    .await
}
