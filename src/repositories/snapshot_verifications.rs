use time::PrimitiveDateTime;

use crate::db::models::SnapshotVerification;

pub(crate) struct VerificationOutcome<'a> {
    pub(crate) matched: Option<bool>,
    pub(crate) confidence: Option<f64>,
    pub(crate) error: Option<&'a str>,
}

pub(crate) async fn insert(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    attempt_id: &str,
    outcome: VerificationOutcome<'_>,
    now: PrimitiveDateTime,
) -> Result<SnapshotVerification, sqlx::Error> {
    sqlx::query_as::<_, SnapshotVerification>(
        "INSERT INTO snapshot_verifications (id, attempt_id, matched, confidence, error, created_at)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING id, attempt_id, matched, confidence, error, created_at",
    )
    .bind(id)
    .bind(attempt_id)
    .bind(outcome.matched)
    .bind(outcome.confidence)
    .bind(outcome.error)
    .bind(now)
    .fetch_one(executor)
    .await
}
