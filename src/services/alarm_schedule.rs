use std::collections::BTreeSet;

use anyhow::Context;
use time::PrimitiveDateTime;
use uuid::Uuid;
use validator::Validate;

use crate::core::state::AppState;
use crate::core::time::{minutes, primitive_now_utc};
use crate::db::models::{ExamAlarm, ExamAttempt};
use crate::db::types::JobKind;
use crate::repositories;
use crate::schemas::exam::AlarmConfigurationInput;
use crate::services::errors::{ProctoringError, ProctoringResult};
use crate::services::jobs;

pub const MIN_ALARM_MINUTES: i32 = 5;
pub const MAX_ALARM_MINUTES: i32 = 60;

/// Checks range and uniqueness and returns the offsets in ascending order.
pub fn validate_offsets(offsets: &[i32]) -> ProctoringResult<Vec<i32>> {
    let mut unique = BTreeSet::new();
    for &offset in offsets {
        if !(MIN_ALARM_MINUTES..=MAX_ALARM_MINUTES).contains(&offset) {
            return Err(ProctoringError::InvalidConfiguration(format!(
                "alarm offset {offset} is outside {MIN_ALARM_MINUTES}..={MAX_ALARM_MINUTES} minutes"
            )));
        }
        if !unique.insert(offset) {
            return Err(ProctoringError::InvalidConfiguration(format!(
                "alarm offset {offset} is configured twice"
            )));
        }
    }
    Ok(unique.into_iter().collect())
}

/// Absolute fire instants for every offset shorter than the allotted window.
pub fn plan_alarm_times(
    started_at: PrimitiveDateTime,
    allotted_minutes: i32,
    offsets: &[i32],
) -> Vec<(i32, PrimitiveDateTime)> {
    offsets
        .iter()
        .filter(|offset| **offset < allotted_minutes)
        .map(|offset| (*offset, started_at + minutes(allotted_minutes - offset)))
        .collect()
}

/// The most recent active alarm that is already due.
pub fn select_due_alarm(alarms: &[ExamAlarm], now: PrimitiveDateTime) -> Option<&ExamAlarm> {
    alarms
        .iter()
        .filter(|alarm| alarm.is_active && alarm.alarm_time <= now)
        .max_by_key(|alarm| alarm.alarm_time)
}

/// Writes the alarms of a freshly polled attempt. Does nothing once the pair has alarms,
/// so instants stay anchored to the deadline known at the first poll even if a time
/// allowance is granted later.
pub(crate) async fn schedule_alarms(
    state: &AppState,
    attempt: &ExamAttempt,
    allotted_minutes: i32,
) -> ProctoringResult<usize> {
    let Some(started_at) = attempt.started_at else {
        return Ok(0);
    };

    if repositories::alarms::exists_for_pair(state.db(), &attempt.exam_id, &attempt.student_id)
        .await?
    {
        return Ok(0);
    }

    let offsets = repositories::alarms::list_active_offsets(state.db()).await?;
    let now = primitive_now_utc();
    let mut inserted = 0;

    for (offset, alarm_time) in plan_alarm_times(started_at, allotted_minutes, &offsets) {
        let alarm = ExamAlarm {
            id: Uuid::new_v4().to_string(),
            exam_id: attempt.exam_id.clone(),
            student_id: attempt.student_id.clone(),
            attempt_id: attempt.id.clone(),
            offset_minutes: offset,
            alarm_time,
            is_active: true,
            created_at: now,
        };
        if repositories::alarms::insert(state.db(), &alarm).await? {
            inserted += 1;
        }
    }

    tracing::debug!(
        exam_id = %attempt.exam_id,
        student_id = %attempt.student_id,
        inserted,
        "Alarms scheduled"
    );
    Ok(inserted)
}

/// Returns the latest due alarm of a live attempt and consumes it together with
/// every earlier alarm of the same pair.
pub async fn poll_due_alarm(
    state: &AppState,
    exam_id: &str,
    student_id: &str,
    now: PrimitiveDateTime,
) -> ProctoringResult<Option<ExamAlarm>> {
    let mut tx = state.db().begin().await?;

    if repositories::attempts::find_live(&mut *tx, exam_id, student_id).await?.is_none() {
        return Ok(None);
    }

    let alarms = repositories::alarms::list_active_for_update(&mut *tx, exam_id, student_id).await?;
    let Some(due) = select_due_alarm(&alarms, now).cloned() else {
        return Ok(None);
    };

    let consumed =
        repositories::alarms::deactivate_through(&mut *tx, exam_id, student_id, due.alarm_time)
            .await?;
    tx.commit().await?;

    metrics::counter!("exam_alarms_fired_total").increment(1);
    tracing::info!(
        exam_id,
        student_id,
        offset_minutes = due.offset_minutes,
        consumed,
        "Alarm fired"
    );

    Ok(Some(due))
}

pub async fn active_alarm_offsets(state: &AppState) -> ProctoringResult<Vec<i32>> {
    Ok(repositories::alarms::list_active_offsets(state.db()).await?)
}

/// Replaces the active offset set and queues deactivation of pending alarms
/// whose offset disappeared.
pub async fn save_alarm_configuration(
    state: &AppState,
    input: AlarmConfigurationInput,
) -> ProctoringResult<Vec<i32>> {
    input.validate().map_err(|e| ProctoringError::InvalidConfiguration(e.to_string()))?;
    let offsets = validate_offsets(&input.alarm_minutes)?;
    let now = primitive_now_utc();

    let mut tx = state.db().begin().await?;
    repositories::alarms::deactivate_configuration(&mut *tx).await?;
    for offset in &offsets {
        repositories::alarms::insert_configuration(&mut *tx, *offset, now).await?;
    }
    jobs::enqueue_in(
        &mut *tx,
        state.settings(),
        JobKind::DeactivateRemovedAlarms,
        serde_json::json!({}),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(offsets = ?offsets, "Alarm configuration saved");
    Ok(offsets)
}

pub(crate) async fn deactivate_removed_alarms(state: &AppState) -> anyhow::Result<u64> {
    let deactivated =
        repositories::alarms::deactivate_unconfigured_pending(state.db(), primitive_now_utc())
            .await
            .context("Failed to deactivate alarms for removed offsets")?;

    metrics::counter!("exam_alarms_deactivated_total").increment(deactivated);
    tracing::info!(deactivated, "Pending alarms for removed offsets deactivated");
    Ok(deactivated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn alarm(offset: i32, alarm_time: PrimitiveDateTime, is_active: bool) -> ExamAlarm {
        ExamAlarm {
            id: format!("alarm-{offset}"),
            exam_id: "exam-1".to_string(),
            student_id: "student-1".to_string(),
            attempt_id: "attempt-1".to_string(),
            offset_minutes: offset,
            alarm_time,
            is_active,
            created_at: datetime!(2025-03-01 10:00:00),
        }
    }

    #[test]
    fn offsets_are_range_checked_and_unique() {
        assert_eq!(validate_offsets(&[20, 10]).expect("valid"), vec![10, 20]);
        assert!(validate_offsets(&[4]).is_err());
        assert!(validate_offsets(&[61]).is_err());
        assert!(matches!(
            validate_offsets(&[10, 10]),
            Err(ProctoringError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn alarm_times_count_back_from_allotted_end() {
        let started = datetime!(2025-03-01 10:00:00);
        let planned = plan_alarm_times(started, 60, &[10, 20]);
        assert_eq!(
            planned,
            vec![(10, datetime!(2025-03-01 10:50:00)), (20, datetime!(2025-03-01 10:40:00))]
        );
    }

    #[test]
    fn offsets_not_shorter_than_allotted_are_skipped() {
        let started = datetime!(2025-03-01 10:00:00);
        assert_eq!(plan_alarm_times(started, 30, &[30, 45]), Vec::new());
        assert_eq!(plan_alarm_times(started, 30, &[5]).len(), 1);
    }

    #[test]
    fn latest_due_alarm_wins() {
        let alarms = vec![
            alarm(20, datetime!(2025-03-01 10:40:00), true),
            alarm(10, datetime!(2025-03-01 10:50:00), true),
            alarm(5, datetime!(2025-03-01 10:55:00), true),
        ];

        assert_eq!(select_due_alarm(&alarms, datetime!(2025-03-01 10:39:59)), None);
        assert_eq!(
            select_due_alarm(&alarms, datetime!(2025-03-01 10:41:00)).map(|a| a.offset_minutes),
            Some(20)
        );
        assert_eq!(
            select_due_alarm(&alarms, datetime!(2025-03-01 10:52:00)).map(|a| a.offset_minutes),
            Some(10)
        );
    }

    #[test]
    fn inactive_alarms_are_never_selected() {
        let alarms = vec![
            alarm(20, datetime!(2025-03-01 10:40:00), false),
            alarm(10, datetime!(2025-03-01 10:50:00), true),
        ];
        assert_eq!(select_due_alarm(&alarms, datetime!(2025-03-01 10:45:00)), None);
    }
}
