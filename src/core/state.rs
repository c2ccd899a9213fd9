use std::sync::Arc;

use sqlx::PgPool;

use crate::core::{config::Settings, redis::RedisHandle};
use crate::services::notifications::NotificationDispatcher;

/// Process-wide handle passed to every operation. Built once at startup.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    db: PgPool,
    redis: RedisHandle,
    notifier: NotificationDispatcher,
}

impl AppState {
    pub fn new(
        settings: Settings,
        db: PgPool,
        redis: RedisHandle,
        notifier: NotificationDispatcher,
    ) -> Self {
        Self { inner: Arc::new(InnerState { settings, db, redis, notifier }) }
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn db(&self) -> &PgPool {
        &self.inner.db
    }

    pub fn redis(&self) -> &RedisHandle {
        &self.inner.redis
    }

    pub fn notifier(&self) -> &NotificationDispatcher {
        &self.inner.notifier
    }
}
