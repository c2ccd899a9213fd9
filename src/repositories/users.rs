use sqlx::PgPool;

use crate::db::models::User;

pub(crate) const COLUMNS: &str = "id, username, email, is_active, created_at";

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!("SELECT {COLUMNS} FROM users WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Resolves a user by id, username or email, in that order.
pub(crate) async fn find_by_identifier(
    pool: &PgPool,
    identifier: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        "SELECT {COLUMNS} FROM users
         WHERE id = $1 OR username = $1 OR lower(email) = lower($1)
         ORDER BY CASE WHEN id = $1 THEN 0 WHEN username = $1 THEN 1 ELSE 2 END
         LIMIT 1"
    ))
    .bind(identifier)
    .fetch_optional(pool)
    .await
}

#[cfg(test)]
pub(crate) async fn create(
    pool: &PgPool,
    id: &str,
    username: &str,
    email: &str,
    now: time::PrimitiveDateTime,
) -> Result<User, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        "INSERT INTO users (id, username, email, is_active, created_at)
         VALUES ($1, $2, $3, TRUE, $4)
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(username)
    .bind(email)
    .bind(now)
    .fetch_one(pool)
    .await
}
