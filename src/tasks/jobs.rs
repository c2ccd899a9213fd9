use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::json;
use sqlx::PgPool;

use crate::core::state::AppState;
use crate::core::time::{primitive_now_utc as now_primitive, seconds_as_duration};
use crate::db::models::BackgroundJob;
use crate::db::types::{AllowanceKey, JobKind};
use crate::repositories;
use crate::services::face_verification::{run_snapshot_verification, FaceVerificationClient};
use crate::services::jobs::{
    retry_at, should_retry, ExamPayload, ReviewerNoticePayload, SnapshotPayload,
    StudentExamPayload,
};
use crate::services::notifications::Notification;
use crate::services::{alarm_schedule, allowances, grade_aggregation, question_allocation};

/// Jobs left `running` longer than this are assumed orphaned by a dead worker.
pub(crate) const STALE_JOB_AFTER_SECONDS: u64 = 900;

pub(crate) async fn claim_next_job(pool: &PgPool) -> Result<Option<BackgroundJob>> {
    repositories::jobs::claim_next(pool, now_primitive()).await.context("Failed to claim job")
}

fn decode<T: DeserializeOwned>(job: &BackgroundJob) -> Result<T> {
    serde_json::from_value(job.payload.0.clone())
        .with_context(|| format!("Malformed {} payload", job.kind.as_str()))
}

async fn run_job(
    state: &AppState,
    face: &FaceVerificationClient,
    job: &BackgroundJob,
) -> Result<()> {
    match job.kind {
        JobKind::RecomputeGrade => {
            let payload: StudentExamPayload = decode(job)?;
            grade_aggregation::recompute_grade(state, &payload.exam_id, &payload.student_id).await?;
        }
        JobKind::RecomputeExamGrades => {
            let payload: ExamPayload = decode(job)?;
            grade_aggregation::recompute_exam_grades(state, &payload.exam_id).await?;
        }
        JobKind::DeactivateRemovedAlarms => {
            alarm_schedule::deactivate_removed_alarms(state).await?;
        }
        JobKind::ReallocateQuestionSets => {
            let payload: ExamPayload = decode(job)?;
            question_allocation::reallocate_exam_question_sets(state, &payload.exam_id).await?;
        }
        JobKind::VerifySnapshot => {
            let payload: SnapshotPayload = decode(job)?;
            run_snapshot_verification(state, face, &payload).await?;
        }
        JobKind::NotifyReviewers => {
            let payload: ReviewerNoticePayload = decode(job)?;
            notify_reviewers(state, &payload).await?;
        }
    }
    Ok(())
}

/// Delivery failures are logged by the dispatcher and never fail the job.
async fn notify_reviewers(state: &AppState, payload: &ReviewerNoticePayload) -> Result<()> {
    let exception =
        allowances::list_allowances(state, &payload.exam_id, &payload.student_id)
            .await?
            .into_iter()
            .find(|allowance| allowance.key == AllowanceKey::ReviewPolicyException)
            .map(|allowance| allowance.value);

    let notification = Notification {
        user_id: payload.student_id.clone(),
        message: if payload.timed_out {
            format!("Attempt for exam {} was submitted when time ran out", payload.exam_id)
        } else {
            format!("Attempt for exam {} is {}", payload.exam_id, payload.status)
        },
        data: json!({
            "attempt_id": payload.attempt_id,
            "exam_id": payload.exam_id,
            "student_id": payload.student_id,
            "status": payload.status,
            "timed_out": payload.timed_out,
            "review_policy_exception": exception,
        }),
    };

    if !state.notifier().send(&notification).await {
        tracing::warn!(attempt_id = %payload.attempt_id, "Reviewer notification not delivered");
    }
    Ok(())
}

/// Runs a claimed job and records the outcome. Failures are rescheduled after a
/// fixed delay until the attempt budget is spent, then marked failed.
pub(crate) async fn process_job(
    state: &AppState,
    face: &FaceVerificationClient,
    job: BackgroundJob,
) {
    let kind = job.kind.as_str();
    let result = run_job(state, face, &job).await;
    let now = now_primitive();

    let recorded = match &result {
        Ok(()) => {
            metrics::counter!("background_jobs_total", "kind" => kind, "status" => "done")
                .increment(1);
            repositories::jobs::mark_done(state.db(), &job.id, now).await
        }
        Err(err) if should_retry(&job) => {
            metrics::counter!("background_jobs_total", "kind" => kind, "status" => "retried")
                .increment(1);
            tracing::warn!(
                job_id = %job.id,
                kind,
                attempt = job.attempts,
                max_attempts = job.max_attempts,
                error = %err,
                "Job failed; rescheduling"
            );
            let error = format!("{err:#}");
            let run_after = retry_at(state.settings(), now);
            repositories::jobs::reschedule(state.db(), &job.id, &error, run_after, now).await
        }
        Err(err) => {
            metrics::counter!("background_jobs_total", "kind" => kind, "status" => "failed")
                .increment(1);
            tracing::error!(
                job_id = %job.id,
                kind,
                attempts = job.attempts,
                error = %err,
                "Job failed permanently"
            );
            repositories::jobs::mark_failed(state.db(), &job.id, &format!("{err:#}"), now).await
        }
    };

    if let Err(err) = recorded {
        tracing::error!(job_id = %job.id, kind, error = %err, "Failed to record job outcome");
    }
}

pub(crate) async fn requeue_stale_jobs(state: &AppState) -> Result<u64> {
    let now = now_primitive();
    let stale_before = now - seconds_as_duration(STALE_JOB_AFTER_SECONDS);
    let requeued = repositories::jobs::requeue_stale(state.db(), stale_before, now)
        .await
        .context("Failed to requeue stale jobs")?;

    if requeued > 0 {
        tracing::warn!(requeued, "Requeued jobs abandoned by a previous worker");
    }
    Ok(requeued)
}

/// Runs every runnable job in order.
#[cfg(test)]
pub(crate) async fn drain(state: &AppState, face: &FaceVerificationClient) -> Result<usize> {
    let mut processed = 0;
    while let Some(job) = claim_next_job(state.db()).await? {
        process_job(state, face, job).await;
        processed += 1;
    }
    Ok(processed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::types::JobStatus;
    use crate::services::jobs as job_service;
    use crate::test_support::TestContext;

    #[tokio::test]
    async fn malformed_payload_is_retried_then_failed() {
        let Some(ctx) = TestContext::connect().await else { return };
        let job = job_service::enqueue(&ctx.state, JobKind::RecomputeGrade, json!({ "nope": 1 }))
            .await
            .expect("enqueue");

        let face = FaceVerificationClient::from_settings(ctx.state.settings()).expect("client");
        let claimed = claim_next_job(ctx.state.db()).await.expect("claim").expect("job");
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.attempts, 1);
        process_job(&ctx.state, &face, claimed).await;

        let stored = repositories::jobs::find_by_id(ctx.state.db(), &job.id)
            .await
            .expect("find")
            .expect("job");
        if stored.max_attempts > 1 {
            assert_eq!(stored.status, JobStatus::Queued);
            assert!(stored.last_error.as_deref().unwrap_or_default().contains("Malformed"));
        } else {
            assert_eq!(stored.status, JobStatus::Failed);
        }
    }

    #[tokio::test]
    async fn removed_offsets_deactivate_only_pending_alarms() {
        use crate::schemas::exam::AlarmConfigurationInput;
        use crate::services::attempts::{create_attempt, start_attempt};
        use crate::test_support::exam_definition;

        let Some(ctx) = TestContext::connect().await else { return };
        let face = FaceVerificationClient::from_settings(ctx.state.settings()).expect("client");
        alarm_schedule::save_alarm_configuration(
            &ctx.state,
            AlarmConfigurationInput { alarm_minutes: vec![10, 20, 30] },
        )
        .await
        .expect("configuration");
        drain(&ctx.state, &face).await.expect("drain");

        let exam = ctx.insert_exam(exam_definition("reconfigured", 60)).await;
        let student = ctx.insert_user("judy").await;
        create_attempt(&ctx.state, &exam.id, &student.id).await.expect("create");
        let attempt = start_attempt(&ctx.state, &exam.id, &student.id).await.expect("start");
        let started_at = (now_primitive() - time::Duration::minutes(35))
            .replace_nanosecond(0)
            .expect("nanos");
        ctx.set_started_at(&attempt.id, started_at).await;
        let attempt = repositories::attempts::find(ctx.db(), &exam.id, &student.id)
            .await
            .expect("find")
            .expect("attempt");
        let scheduled =
            alarm_schedule::schedule_alarms(&ctx.state, &attempt, 60).await.expect("schedule");
        assert_eq!(scheduled, 3);

        alarm_schedule::save_alarm_configuration(
            &ctx.state,
            AlarmConfigurationInput { alarm_minutes: vec![10] },
        )
        .await
        .expect("reconfigure");
        assert_eq!(drain(&ctx.state, &face).await.expect("drain"), 1);

        let alarms = repositories::alarms::list_for_pair(ctx.db(), &exam.id, &student.id)
            .await
            .expect("alarms");
        let state: Vec<(i32, bool)> =
            alarms.iter().map(|alarm| (alarm.offset_minutes, alarm.is_active)).collect();
        // 30 fell due before the change and is left for the next poll
        assert_eq!(state, vec![(30, true), (20, false), (10, true)]);

        let jobs: Vec<JobStatus> = sqlx::query_scalar(
            "SELECT status FROM background_jobs WHERE kind = $1 ORDER BY created_at",
        )
        .bind(JobKind::DeactivateRemovedAlarms)
        .fetch_all(ctx.db())
        .await
        .expect("jobs");
        assert_eq!(jobs, vec![JobStatus::Done, JobStatus::Done]);
    }
}
