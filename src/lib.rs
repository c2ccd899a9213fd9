pub mod core;
pub mod db;
pub(crate) mod repositories;
pub mod schemas;
pub mod services;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use anyhow::Context;

use crate::core::{config::Settings, redis::RedisHandle, state::AppState, telemetry};
use crate::services::notifications::NotificationDispatcher;

/// Connects the process-wide dependencies. Redis is optional: without it heartbeat
/// writes are simply not throttled.
pub async fn connect(settings: Settings) -> anyhow::Result<AppState> {
    let db_pool = db::init_pool(&settings).await.context("Failed to connect to Postgres")?;
    db::run_migrations(&db_pool).await.context("Failed to run migrations")?;
    repositories::health::ping(&db_pool).await.context("Postgres health check failed")?;

    let redis = RedisHandle::new(settings.redis().redis_url());
    if let Err(err) = redis.connect().await {
        tracing::error!(error = %err, "Failed to connect to Redis; continuing without throttling");
    } else {
        tracing::info!("Redis connected successfully");
    }

    let notifier = NotificationDispatcher::from_settings(&settings)?;
    if !notifier.is_configured() {
        tracing::warn!("NOTIFICATION_WEBHOOK_URL not configured; notifications are skipped");
    }

    Ok(AppState::new(settings, db_pool, redis, notifier))
}

pub async fn run_worker() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let state = connect(settings).await?;
    let result = tasks::scheduler::run(state.clone()).await;

    state.redis().disconnect().await;
    tracing::info!("Redis disconnected");

    result?;

    Ok(())
}
