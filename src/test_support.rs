use std::sync::{Arc, OnceLock};

use sqlx::PgPool;
use time::PrimitiveDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::core::{config::Settings, redis::RedisHandle, state::AppState, time::primitive_now_utc};
use crate::db::models::{ProctoredExam, User};
use crate::repositories;
use crate::schemas::exam::{ExamDefinition, TierDefinition};
use crate::services::exams::create_exam;
use crate::services::notifications::NotificationDispatcher;

/// Database-backed tests run only when this points at a disposable database.
const TEST_DATABASE_URL_VAR: &str = "PROCTORING_TEST_DATABASE_URL";

pub(crate) struct TestContext {
    pub(crate) state: AppState,
    _guard: OwnedMutexGuard<()>,
}

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn set_test_env() {
    std::env::set_var("PROCTORING_ENV", "test");
    std::env::set_var("PROCTORING_STRICT_CONFIG", "0");
    std::env::set_var("PROMETHEUS_ENABLED", "0");
    std::env::remove_var("NOTIFICATION_WEBHOOK_URL");
    std::env::remove_var("FACE_VERIFICATION_URL");
    match std::env::var(TEST_DATABASE_URL_VAR) {
        Ok(url) => std::env::set_var("DATABASE_URL", url),
        Err(_) => std::env::remove_var("DATABASE_URL"),
    }
}

impl TestContext {
    /// Returns `None` (and the test passes vacuously) without a test database.
    pub(crate) async fn connect() -> Option<Self> {
        let guard = env_lock().await;
        if std::env::var(TEST_DATABASE_URL_VAR).is_err() {
            eprintln!("{TEST_DATABASE_URL_VAR} not set; skipping database test");
            return None;
        }
        set_test_env();

        let settings = Settings::load().expect("settings");
        let db = prepare_db(&settings).await;
        let notifier = NotificationDispatcher::from_settings(&settings).expect("notifier");
        let state = AppState::new(settings, db, RedisHandle::disconnected(), notifier);

        Some(Self { state, _guard: guard })
    }

    pub(crate) fn db(&self) -> &PgPool {
        self.state.db()
    }

    pub(crate) async fn insert_user(&self, username: &str) -> User {
        repositories::users::create(
            self.db(),
            &Uuid::new_v4().to_string(),
            username,
            &format!("{username}@example.com"),
            primitive_now_utc(),
        )
        .await
        .expect("insert user")
    }

    pub(crate) async fn insert_exam(&self, definition: ExamDefinition) -> ProctoredExam {
        create_exam(&self.state, &definition).await.expect("create exam")
    }

    /// Moves the start of an attempt into the past.
    pub(crate) async fn set_started_at(&self, attempt_id: &str, started_at: PrimitiveDateTime) {
        sqlx::query("UPDATE exam_attempts SET started_at = $2 WHERE id = $1")
            .bind(attempt_id)
            .bind(started_at)
            .execute(self.db())
            .await
            .expect("backdate attempt");
    }
}

async fn prepare_db(settings: &Settings) -> PgPool {
    let db = crate::db::init_pool(settings).await.expect("db pool");
    reset_public_schema(&db).await.expect("reset schema");
    ensure_schema(&db).await.expect("schema");
    reset_db(&db).await.expect("reset db");
    db
}

async fn reset_public_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("DROP SCHEMA IF EXISTS public CASCADE").execute(pool).await?;
    sqlx::query("CREATE SCHEMA public").execute(pool).await?;
    Ok(())
}

async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    let migrations_dir =
        std::env::var("PROCTORING_MIGRATIONS_DIR").unwrap_or_else(|_| "migrations".to_string());
    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(&migrations_dir))
        .await
        .map_err(|error| sqlx::Error::Migrate(Box::new(error)))?;
    migrator.run(pool).await.map_err(|error| sqlx::Error::Migrate(Box::new(error)))?;
    Ok(())
}

async fn reset_db(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "TRUNCATE background_jobs, snapshot_verifications, exam_timed_out_notices, \
         persisted_grades, problem_scores, exam_alarms, alarm_configurations, \
         exam_allowance_history, exam_allowances, exam_attempt_history, exam_attempts, \
         question_sets, exam_enrollments, proctored_exams, users RESTART IDENTITY CASCADE",
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub(crate) fn exam_definition(exam_key: &str, allotted_time_minutes: i32) -> ExamDefinition {
    ExamDefinition {
        course_id: "course-v1:Org+CS101+2025".to_string(),
        exam_key: exam_key.to_string(),
        title: format!("Exam {exam_key}"),
        release_date: None,
        due_date: None,
        allotted_time_minutes,
        disconnection_window_minutes: 5,
        is_randomized: true,
        is_proctored: true,
        is_active: true,
        easy: TierDefinition { mandatory: 2, optional: 1, pool_size: 10 },
        moderate: TierDefinition { mandatory: 1, optional: 1, pool_size: 6 },
        hard: TierDefinition { mandatory: 1, optional: 0, pool_size: 4 },
    }
}

pub(crate) fn sample_exam() -> ProctoredExam {
    let now = time::macros::datetime!(2025-03-01 09:00:00);
    ProctoredExam {
        id: "exam-1".to_string(),
        course_id: "course-v1:Org+CS101+2025".to_string(),
        exam_key: "midterm".to_string(),
        title: "Midterm".to_string(),
        release_date: None,
        due_date: None,
        allotted_time_minutes: 60,
        disconnection_window_minutes: 5,
        is_randomized: true,
        is_proctored: true,
        is_active: true,
        easy_mandatory: 2,
        easy_optional: 1,
        moderate_mandatory: 1,
        moderate_optional: 1,
        hard_mandatory: 1,
        hard_optional: 0,
        num_easy_pulled: 10,
        num_moderate_pulled: 6,
        num_hard_pulled: 4,
        created_at: now,
        updated_at: now,
    }
}
