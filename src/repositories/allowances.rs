use time::PrimitiveDateTime;

use crate::db::models::Allowance;
use crate::db::types::AllowanceKey;

pub(crate) const COLUMNS: &str = "id, exam_id, user_id, key, value, created_at, updated_at";

pub(crate) async fn find_for_update(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
    user_id: &str,
    key: AllowanceKey,
) -> Result<Option<Allowance>, sqlx::Error> {
    sqlx::query_as::<_, Allowance>(&format!(
        "SELECT {COLUMNS} FROM exam_allowances
         WHERE exam_id = $1 AND user_id = $2 AND key = $3
         FOR UPDATE"
    ))
    .bind(exam_id)
    .bind(user_id)
    .bind(key)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn list_for_user(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
    user_id: &str,
) -> Result<Vec<Allowance>, sqlx::Error> {
    sqlx::query_as::<_, Allowance>(&format!(
        "SELECT {COLUMNS} FROM exam_allowances WHERE exam_id = $1 AND user_id = $2 ORDER BY key"
    ))
    .bind(exam_id)
    .bind(user_id)
    .fetch_all(executor)
    .await
}

pub(crate) async fn insert(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    exam_id: &str,
    user_id: &str,
    key: AllowanceKey,
    value: &str,
    now: PrimitiveDateTime,
) -> Result<Allowance, sqlx::Error> {
    sqlx::query_as::<_, Allowance>(&format!(
        "INSERT INTO exam_allowances (id, exam_id, user_id, key, value, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $6)
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(exam_id)
    .bind(user_id)
    .bind(key)
    .bind(value)
    .bind(now)
    .fetch_one(executor)
    .await
}

pub(crate) async fn update_value(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    value: &str,
    now: PrimitiveDateTime,
) -> Result<Allowance, sqlx::Error> {
    sqlx::query_as::<_, Allowance>(&format!(
        "UPDATE exam_allowances SET value = $2, updated_at = $3 WHERE id = $1 RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(value)
    .bind(now)
    .fetch_one(executor)
    .await
}

pub(crate) async fn archive(
    executor: impl sqlx::PgExecutor<'_>,
    allowance: &Allowance,
    reason: &str,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO exam_allowance_history (
            allowance_id, exam_id, user_id, key, value, reason, archived_at
         )
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(&allowance.id)
    .bind(&allowance.exam_id)
    .bind(&allowance.user_id)
    .bind(allowance.key)
    .bind(&allowance.value)
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
    sqlx::query("DELETE FROM exam_allowances WHERE id = $1").bind(id).execute(executor).await?;
    Ok(())
}
