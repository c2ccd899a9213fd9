use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::core::config::Settings;
use crate::core::state::AppState;
use crate::core::time::{primitive_now_utc, seconds_as_duration};
use crate::db::models::BackgroundJob;
use crate::db::types::JobKind;
use crate::repositories;
use crate::services::errors::ProctoringResult;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct StudentExamPayload {
    pub(crate) exam_id: String,
    pub(crate) student_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct ExamPayload {
    pub(crate) exam_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct ReviewerNoticePayload {
    pub(crate) attempt_id: String,
    pub(crate) exam_id: String,
    pub(crate) student_id: String,
    pub(crate) status: String,
    pub(crate) timed_out: bool,
}

/// Both images travel base64 encoded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct SnapshotPayload {
    pub(crate) attempt_id: String,
    pub(crate) reference_image: String,
    pub(crate) snapshot_image: String,
}

/// Queues a job on `executor`, usually the transaction that caused it.
pub(crate) async fn enqueue_in(
    executor: impl sqlx::PgExecutor<'_>,
    settings: &Settings,
    kind: JobKind,
    payload: Value,
) -> Result<BackgroundJob, sqlx::Error> {
    let max_attempts = i32::try_from(settings.worker().job_max_attempts).unwrap_or(i32::MAX);
    let job = repositories::jobs::enqueue(
        executor,
        &Uuid::new_v4().to_string(),
        kind,
        payload,
        max_attempts,
        primitive_now_utc(),
    )
    .await?;

    metrics::counter!("background_jobs_enqueued_total", "kind" => kind.as_str()).increment(1);
    tracing::debug!(job_id = %job.id, kind = kind.as_str(), "Job queued");
    Ok(job)
}

pub async fn enqueue(
    state: &AppState,
    kind: JobKind,
    payload: Value,
) -> ProctoringResult<BackgroundJob> {
    Ok(enqueue_in(state.db(), state.settings(), kind, payload).await?)
}

pub(crate) fn retry_at(settings: &Settings, now: PrimitiveDateTime) -> PrimitiveDateTime {
    now + seconds_as_duration(settings.worker().job_retry_delay_seconds)
}

/// Whether a failed job still has attempts left.
pub(crate) fn should_retry(job: &BackgroundJob) -> bool {
    job.attempts < job.max_attempts
}
