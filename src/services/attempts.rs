use serde::Serialize;
use sqlx::{Postgres, Transaction};
use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::is_unique_violation;
use crate::db::models::{ExamAlarm, ExamAttempt, ExamAttemptHistory, ProctoredExam, TimedOutNotice};
use crate::db::types::{AttemptStatus, JobKind};
use crate::repositories;
use crate::services::alarm_schedule;
use crate::services::allowances::time_allowance;
use crate::services::attempt_rules::{
    plan_start, plan_status_change, review_target, StatusChange,
};
use crate::services::attempt_timing::{
    classify_liveness, effective_allotted_minutes, has_time_expired, remaining_seconds, LiveStatus,
};
use crate::services::errors::{ProctoringError, ProctoringResult};
use crate::services::jobs::{self, ReviewerNoticePayload};

#[derive(Debug, Clone, Serialize)]
pub struct AttemptView {
    pub attempt: ExamAttempt,
    pub remaining_seconds: Option<i64>,
    pub live_status: Option<LiveStatus>,
    /// Set when this inspection force-submitted the attempt.
    pub timed_out_notice: bool,
}

#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub attempt: ExamAttempt,
    pub due_alarm: Option<ExamAlarm>,
    pub timed_out: bool,
}

async fn load_exam(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
) -> ProctoringResult<ProctoredExam> {
    repositories::exams::find_by_id(executor, exam_id)
        .await?
        .ok_or_else(|| ProctoringError::ExamNotFound(exam_id.to_string()))
}

async fn allotted_minutes(
    executor: impl sqlx::PgExecutor<'_>,
    exam: &ProctoredExam,
    student_id: &str,
) -> Result<i32, sqlx::Error> {
    let allowance = time_allowance(executor, &exam.id, student_id).await?;
    Ok(effective_allotted_minutes(exam.allotted_time_minutes, allowance))
}

async fn lock_attempt(
    tx: &mut Transaction<'_, Postgres>,
    exam_id: &str,
    student_id: &str,
) -> ProctoringResult<ExamAttempt> {
    repositories::attempts::find_for_update(&mut **tx, exam_id, student_id)
        .await?
        .ok_or_else(|| ProctoringError::attempt_missing(exam_id, student_id))
}

/// Archives the pre-image, writes the planned status and queues the reviewer
/// notice when the attempt just completed. Runs inside the caller's transaction.
async fn apply_change(
    tx: &mut Transaction<'_, Postgres>,
    state: &AppState,
    attempt: &ExamAttempt,
    change: &StatusChange,
    reason: &str,
    now: PrimitiveDateTime,
) -> ProctoringResult<ExamAttempt> {
    repositories::attempts::archive(&mut **tx, attempt, reason, now).await?;
    let updated = repositories::attempts::apply_status(
        &mut **tx,
        &attempt.id,
        change.to,
        change.started_at,
        change.completed_at,
        now,
    )
    .await?;

    if change.completes() {
        let payload = ReviewerNoticePayload {
            attempt_id: updated.id.clone(),
            exam_id: updated.exam_id.clone(),
            student_id: updated.student_id.clone(),
            status: updated.status.as_str().to_string(),
            timed_out: change.timed_out,
        };
        jobs::enqueue_in(
            &mut **tx,
            state.settings(),
            JobKind::NotifyReviewers,
            serde_json::json!(payload),
        )
        .await?;
    }

    metrics::counter!("attempt_transitions_total", "to" => change.to.as_str()).increment(1);
    tracing::info!(
        exam_id = %updated.exam_id,
        student_id = %updated.student_id,
        from = change.from.as_str(),
        to = change.to.as_str(),
        timed_out = change.timed_out,
        "Attempt status changed"
    );
    Ok(updated)
}

/// Creates the attempt of `student_id`. Past the due date it is born expired.
pub async fn create_attempt(
    state: &AppState,
    exam_id: &str,
    student_id: &str,
) -> ProctoringResult<ExamAttempt> {
    let exam = load_exam(state.db(), exam_id).await?;
    if repositories::users::find_by_id(state.db(), student_id).await?.is_none() {
        return Err(ProctoringError::UserNotFound(student_id.to_string()));
    }

    let already_exists = || ProctoringError::AlreadyExists {
        exam_id: exam_id.to_string(),
        student_id: student_id.to_string(),
    };

    if repositories::attempts::find(state.db(), exam_id, student_id).await?.is_some() {
        return Err(already_exists());
    }

    let now = primitive_now_utc();
    let status = match exam.due_date {
        Some(due) if now > due => AttemptStatus::Expired,
        _ => AttemptStatus::Created,
    };

    let attempt = repositories::attempts::insert(
        state.db(),
        &Uuid::new_v4().to_string(),
        exam_id,
        student_id,
        status,
        now,
    )
    .await
    .map_err(|err| if is_unique_violation(&err) { already_exists() } else { err.into() })?;

    tracing::info!(exam_id, student_id, status = status.as_str(), "Attempt created");
    Ok(attempt)
}

pub async fn start_attempt(
    state: &AppState,
    exam_id: &str,
    student_id: &str,
) -> ProctoringResult<ExamAttempt> {
    let exam = load_exam(state.db(), exam_id).await?;
    let now = primitive_now_utc();

    let mut tx = state.db().begin().await?;
    let attempt = lock_attempt(&mut tx, exam_id, student_id).await?;
    let allotted = allotted_minutes(&mut *tx, &exam, student_id).await?;
    let change = plan_start(&attempt, allotted, now)?;
    let updated = apply_change(&mut tx, state, &attempt, &change, "start", now).await?;
    tx.commit().await?;

    Ok(updated)
}

/// Moves the attempt to `to`. `timed_out` is folded into `submitted` stamped at the
/// expiry instant.
pub async fn update_attempt_status(
    state: &AppState,
    exam_id: &str,
    student_id: &str,
    to: AttemptStatus,
) -> ProctoringResult<ExamAttempt> {
    let exam = load_exam(state.db(), exam_id).await?;
    let now = primitive_now_utc();

    let mut tx = state.db().begin().await?;
    let attempt = lock_attempt(&mut tx, exam_id, student_id).await?;
    let allotted = allotted_minutes(&mut *tx, &exam, student_id).await?;
    let change = plan_status_change(&attempt, to, allotted, now)?;
    let updated = apply_change(&mut tx, state, &attempt, &change, "status_update", now).await?;
    tx.commit().await?;

    Ok(updated)
}

/// Archives the attempt and deletes it along with its alarms.
pub async fn remove_attempt(
    state: &AppState,
    exam_id: &str,
    student_id: &str,
) -> ProctoringResult<()> {
    let now = primitive_now_utc();

    let mut tx = state.db().begin().await?;
    let attempt = lock_attempt(&mut tx, exam_id, student_id).await?;
    repositories::attempts::archive(&mut *tx, &attempt, "removed", now).await?;
    repositories::alarms::delete_for_attempt(&mut *tx, &attempt.id).await?;
    repositories::attempts::delete(&mut *tx, &attempt.id).await?;
    tx.commit().await?;

    tracing::info!(exam_id, student_id, attempt_id = %attempt.id, "Attempt removed");
    Ok(())
}

/// Applies the verdict of the review backend to a completed attempt.
pub async fn record_review_outcome(
    state: &AppState,
    attempt_id: &str,
    review_status: &str,
) -> ProctoringResult<ExamAttempt> {
    let attempt = repositories::attempts::find_by_id(state.db(), attempt_id)
        .await?
        .ok_or_else(|| {
            ProctoringError::DoesNotExist(format!("attempt {attempt_id} does not exist"))
        })?;
    let exam = load_exam(state.db(), &attempt.exam_id).await?;
    let is_passing = state.settings().proctoring().is_passing_review_status(review_status);
    let now = primitive_now_utc();

    let mut tx = state.db().begin().await?;
    let attempt = lock_attempt(&mut tx, &attempt.exam_id, &attempt.student_id).await?;
    let change =
        plan_status_change(&attempt, review_target(is_passing), exam.allotted_time_minutes, now)?;
    repositories::attempts::archive(&mut *tx, &attempt, "review", now).await?;
    let updated = repositories::attempts::apply_review(
        &mut *tx,
        &attempt.id,
        change.to,
        review_status.trim(),
        is_passing,
        now,
    )
    .await?;
    tx.commit().await?;

    metrics::counter!(
        "attempt_reviews_total",
        "outcome" => if is_passing { "passing" } else { "failing" }
    )
    .increment(1);
    tracing::info!(
        attempt_id,
        review_status = review_status.trim(),
        is_passing,
        "Review outcome recorded"
    );
    Ok(updated)
}

/// Lazy timeout path: folds an overdue incomplete attempt into `submitted`.
async fn expire_if_overdue(
    state: &AppState,
    exam: &ProctoredExam,
    student_id: &str,
    now: PrimitiveDateTime,
) -> ProctoringResult<Option<ExamAttempt>> {
    let mut tx = state.db().begin().await?;
    let attempt = lock_attempt(&mut tx, &exam.id, student_id).await?;

    let Some(started_at) = attempt.started_at else {
        return Ok(None);
    };
    if !attempt.status.is_incomplete() {
        return Ok(None);
    }

    let allotted = allotted_minutes(&mut *tx, exam, student_id).await?;
    if !has_time_expired(started_at, allotted, now) {
        return Ok(None);
    }

    let change = plan_status_change(&attempt, AttemptStatus::TimedOut, allotted, now)?;
    let updated = apply_change(&mut tx, state, &attempt, &change, "timeout", now).await?;
    tx.commit().await?;

    metrics::counter!("attempt_timeouts_total").increment(1);
    Ok(Some(updated))
}

/// Returns the updated attempt when it had run out of time.
pub async fn check_for_attempt_timeout(
    state: &AppState,
    exam_id: &str,
    student_id: &str,
) -> ProctoringResult<Option<ExamAttempt>> {
    let exam = load_exam(state.db(), exam_id).await?;
    expire_if_overdue(state, &exam, student_id, primitive_now_utc()).await
}

/// Heartbeat liveness of the in-progress attempt, if there is one.
pub async fn live_status(
    state: &AppState,
    exam_id: &str,
    student_id: &str,
) -> ProctoringResult<Option<LiveStatus>> {
    let exam = load_exam(state.db(), exam_id).await?;
    let Some(attempt) = repositories::attempts::find_live(state.db(), exam_id, student_id).await?
    else {
        return Ok(None);
    };

    Ok(Some(classify_liveness(
        attempt.last_poll_timestamp,
        attempt.started_at,
        exam.disconnection_window_minutes,
        primitive_now_utc(),
    )))
}

/// Client-facing read of an attempt. An in-progress attempt with no time left is
/// force-submitted and a one-shot timed-out notice is recorded.
pub async fn inspect_attempt(
    state: &AppState,
    exam_id: &str,
    student_id: &str,
) -> ProctoringResult<AttemptView> {
    let exam = load_exam(state.db(), exam_id).await?;
    let now = primitive_now_utc();

    let mut tx = state.db().begin().await?;
    let attempt = lock_attempt(&mut tx, exam_id, student_id).await?;

    let (Some(started_at), true) = (attempt.started_at, attempt.status.is_live()) else {
        tx.commit().await?;
        return Ok(AttemptView {
            attempt,
            remaining_seconds: None,
            live_status: None,
            timed_out_notice: false,
        });
    };

    let allotted = allotted_minutes(&mut *tx, &exam, student_id).await?;
    let remaining = remaining_seconds(started_at, allotted, now);
    if remaining > 0 {
        tx.commit().await?;
        let live = classify_liveness(
            attempt.last_poll_timestamp,
            attempt.started_at,
            exam.disconnection_window_minutes,
            now,
        );
        return Ok(AttemptView {
            attempt,
            remaining_seconds: Some(remaining),
            live_status: Some(live),
            timed_out_notice: false,
        });
    }

    let change = plan_status_change(&attempt, AttemptStatus::TimedOut, allotted, now)?;
    let updated = apply_change(&mut tx, state, &attempt, &change, "timeout", now).await?;
    repositories::notices::insert(&mut *tx, &exam.exam_key, student_id, now).await?;
    tx.commit().await?;

    metrics::counter!("attempt_timeouts_total").increment(1);
    tracing::info!(exam_id, student_id, "Attempt force-submitted on inspection");

    Ok(AttemptView {
        attempt: updated,
        remaining_seconds: Some(0),
        live_status: None,
        timed_out_notice: true,
    })
}

pub async fn find_timed_out_notice(
    state: &AppState,
    exam_key: &str,
    student_id: &str,
) -> ProctoringResult<Option<TimedOutNotice>> {
    Ok(repositories::notices::find(state.db(), exam_key, student_id).await?)
}

/// Acknowledges the notice. Returns `false` when there was nothing to dismiss.
pub async fn dismiss_timed_out_notice(
    state: &AppState,
    exam_key: &str,
    student_id: &str,
) -> ProctoringResult<bool> {
    Ok(repositories::notices::delete(state.db(), exam_key, student_id).await?)
}

/// Handles a client heartbeat: writes the poll timestamp of a live attempt (rate
/// limited), schedules alarms on the first poll, runs the lazy timeout check and
/// returns any due alarm.
pub async fn record_poll(
    state: &AppState,
    exam_id: &str,
    student_id: &str,
) -> ProctoringResult<PollOutcome> {
    let exam = load_exam(state.db(), exam_id).await?;
    let mut attempt = repositories::attempts::find(state.db(), exam_id, student_id)
        .await?
        .ok_or_else(|| ProctoringError::attempt_missing(exam_id, student_id))?;
    let now = primitive_now_utc();

    // Heartbeats only move last_poll_timestamp and are not archived; history keeps
    // status changes. Attempts that are not in progress keep their last heartbeat.
    let write_heartbeat = attempt.status.is_live() && {
        let throttle_key = format!("attempt_heartbeat:{}", attempt.id);
        let window = state.settings().proctoring().heartbeat_write_interval_seconds;
        match state.redis().throttle(&throttle_key, window).await {
            Ok(allowed) => allowed,
            Err(err) => {
                tracing::warn!(error = %err, "Heartbeat throttle unavailable; writing anyway");
                true
            }
        }
    };
    if write_heartbeat {
        repositories::attempts::record_poll(state.db(), &attempt.id, now).await?;
        attempt.last_poll_timestamp = Some(now);
    }

    if attempt.status.is_live() {
        let allotted = allotted_minutes(state.db(), &exam, student_id).await?;
        alarm_schedule::schedule_alarms(state, &attempt, allotted).await?;
    }

    let timed_out = match expire_if_overdue(state, &exam, student_id, now).await? {
        Some(updated) => {
            attempt = updated;
            true
        }
        None => false,
    };

    let due_alarm = alarm_schedule::poll_due_alarm(state, exam_id, student_id, now).await?;

    Ok(PollOutcome { attempt, due_alarm, timed_out })
}

/// Lists every attempt of the exam, timing out overdue ones on the way.
pub async fn list_exam_attempts(
    state: &AppState,
    exam_id: &str,
) -> ProctoringResult<Vec<ExamAttempt>> {
    let exam = load_exam(state.db(), exam_id).await?;
    let now = primitive_now_utc();
    let mut attempts = repositories::attempts::list_by_exam(state.db(), exam_id).await?;

    for attempt in attempts.iter_mut() {
        if attempt.started_at.is_none() || !attempt.status.is_incomplete() {
            continue;
        }
        let expired = expire_if_overdue(state, &exam, &attempt.student_id, now).await?;
        if let Some(updated) = expired {
            *attempt = updated;
        }
    }

    Ok(attempts)
}

pub async fn attempt_history(
    state: &AppState,
    exam_id: &str,
    student_id: &str,
) -> ProctoringResult<Vec<ExamAttemptHistory>> {
    Ok(repositories::attempts::list_history(state.db(), exam_id, student_id).await?)
}
