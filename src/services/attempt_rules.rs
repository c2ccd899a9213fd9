//! Transition planning for exam attempts. Nothing here touches storage; the
//! orchestration layer applies the returned plan inside a transaction.

use time::PrimitiveDateTime;

use crate::db::models::ExamAttempt;
use crate::db::types::AttemptStatus;
use crate::services::attempt_timing::expiry_instant;
use crate::services::errors::ProctoringError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub from: AttemptStatus,
    pub to: AttemptStatus,
    pub started_at: Option<PrimitiveDateTime>,
    pub completed_at: Option<PrimitiveDateTime>,
    /// The request arrived as `timed_out` and was folded into `submitted`.
    pub timed_out: bool,
}

impl StatusChange {
    /// Moves the attempt from the incomplete group into the completed group.
    pub fn completes(&self) -> bool {
        self.from.is_incomplete() && self.to.is_completed()
    }
}

pub fn plan_status_change(
    attempt: &ExamAttempt,
    requested: AttemptStatus,
    allotted_minutes: i32,
    now: PrimitiveDateTime,
) -> Result<StatusChange, ProctoringError> {
    let timed_out = requested == AttemptStatus::TimedOut;
    let to = if timed_out { AttemptStatus::Submitted } else { requested };
    let from = attempt.status;

    let illegal = || ProctoringError::IllegalStatusTransition { from, to };

    if from == AttemptStatus::Expired && to != AttemptStatus::Expired {
        return Err(illegal());
    }
    if from.is_completed() && to.is_incomplete() {
        return Err(illegal());
    }
    if to == AttemptStatus::Expired && !(from.is_pre_start() || from == AttemptStatus::Expired) {
        return Err(illegal());
    }
    if matches!(to, AttemptStatus::Verified | AttemptStatus::Rejected) && !from.is_completed() {
        return Err(illegal());
    }

    let mut started_at = attempt.started_at;
    if to == AttemptStatus::Started && started_at.is_none() {
        started_at = Some(now);
    }

    let mut completed_at = attempt.completed_at;
    if to == AttemptStatus::Submitted && completed_at.is_none() {
        completed_at = Some(match (timed_out, started_at) {
            (true, Some(started)) => expiry_instant(started, allotted_minutes),
            _ => now,
        });
    }

    Ok(StatusChange { from, to, started_at, completed_at, timed_out })
}

pub fn plan_start(
    attempt: &ExamAttempt,
    allotted_minutes: i32,
    now: PrimitiveDateTime,
) -> Result<StatusChange, ProctoringError> {
    if attempt.status == AttemptStatus::Started && attempt.started_at.is_some() {
        return Err(ProctoringError::AlreadyStarted {
            exam_id: attempt.exam_id.clone(),
            student_id: attempt.student_id.clone(),
        });
    }
    plan_status_change(attempt, AttemptStatus::Started, allotted_minutes, now)
}

/// Target status for a completed attempt once the review backend reports back.
pub fn review_target(is_passing: bool) -> AttemptStatus {
    if is_passing {
        AttemptStatus::Verified
    } else {
        AttemptStatus::Rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const ALL: [AttemptStatus; 9] = [
        AttemptStatus::Created,
        AttemptStatus::ReadyToStart,
        AttemptStatus::Started,
        AttemptStatus::ReadyToSubmit,
        AttemptStatus::TimedOut,
        AttemptStatus::Submitted,
        AttemptStatus::Verified,
        AttemptStatus::Rejected,
        AttemptStatus::Expired,
    ];

    fn attempt(status: AttemptStatus) -> ExamAttempt {
        let created = datetime!(2025-03-01 09:00:00);
        ExamAttempt {
            id: "attempt-1".to_string(),
            exam_id: "exam-1".to_string(),
            student_id: "student-1".to_string(),
            status,
            started_at: None,
            completed_at: None,
            last_poll_timestamp: None,
            review_status: None,
            is_passing: None,
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn completed_attempts_never_move_back() {
        let now = datetime!(2025-03-01 10:00:00);
        for from in [AttemptStatus::Submitted, AttemptStatus::Verified, AttemptStatus::Rejected] {
            for to in [
                AttemptStatus::Created,
                AttemptStatus::ReadyToStart,
                AttemptStatus::Started,
                AttemptStatus::ReadyToSubmit,
            ] {
                let result = plan_status_change(&attempt(from), to, 60, now);
                assert!(
                    matches!(result, Err(ProctoringError::IllegalStatusTransition { .. })),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn expired_is_terminal() {
        let now = datetime!(2025-03-01 10:00:00);
        for to in ALL.into_iter().filter(|status| *status != AttemptStatus::Expired) {
            assert!(plan_status_change(&attempt(AttemptStatus::Expired), to, 60, now).is_err());
        }
        assert!(plan_status_change(
            &attempt(AttemptStatus::Expired),
            AttemptStatus::Expired,
            60,
            now
        )
        .is_ok());
    }

    #[test]
    fn expired_only_reachable_before_start() {
        let now = datetime!(2025-03-01 10:00:00);
        for from in ALL {
            let allowed = from.is_pre_start() || from == AttemptStatus::Expired;
            let result = plan_status_change(&attempt(from), AttemptStatus::Expired, 60, now);
            assert_eq!(result.is_ok(), allowed, "{from} -> expired");
        }
    }

    #[test]
    fn timed_out_folds_into_submitted_at_expiry_instant() {
        let mut started = attempt(AttemptStatus::Started);
        started.started_at = Some(datetime!(2025-03-01 10:00:00));

        let now = datetime!(2025-03-01 11:01:00);
        let change = plan_status_change(&started, AttemptStatus::TimedOut, 60, now).expect("plan");

        assert_eq!(change.to, AttemptStatus::Submitted);
        assert!(change.timed_out);
        assert!(change.completes());
        assert_eq!(change.completed_at, Some(datetime!(2025-03-01 11:00:00)));
    }

    #[test]
    fn genuine_submit_stamps_now() {
        let mut started = attempt(AttemptStatus::ReadyToSubmit);
        started.started_at = Some(datetime!(2025-03-01 10:00:00));
        let now = datetime!(2025-03-01 10:20:00);

        let change = plan_status_change(&started, AttemptStatus::Submitted, 60, now).expect("plan");

        assert!(!change.timed_out);
        assert_eq!(change.completed_at, Some(now));
    }

    #[test]
    fn timestamps_are_stamped_once() {
        let mut submitted = attempt(AttemptStatus::Submitted);
        submitted.started_at = Some(datetime!(2025-03-01 10:00:00));
        submitted.completed_at = Some(datetime!(2025-03-01 10:30:00));

        let change = plan_status_change(
            &submitted,
            AttemptStatus::Submitted,
            60,
            datetime!(2025-03-01 12:00:00),
        )
        .expect("plan");

        assert_eq!(change.started_at, Some(datetime!(2025-03-01 10:00:00)));
        assert_eq!(change.completed_at, Some(datetime!(2025-03-01 10:30:00)));
        assert!(!change.completes());
    }

    #[test]
    fn start_stamps_started_at_and_rejects_restart() {
        let now = datetime!(2025-03-01 10:00:00);
        let change = plan_start(&attempt(AttemptStatus::ReadyToStart), 60, now).expect("plan");
        assert_eq!(change.to, AttemptStatus::Started);
        assert_eq!(change.started_at, Some(now));

        let mut running = attempt(AttemptStatus::Started);
        running.started_at = Some(now);
        assert!(matches!(
            plan_start(&running, 60, now),
            Err(ProctoringError::AlreadyStarted { .. })
        ));
    }

    #[test]
    fn review_outcomes_require_completion() {
        let now = datetime!(2025-03-01 10:00:00);
        assert!(plan_status_change(&attempt(AttemptStatus::Started), review_target(true), 60, now)
            .is_err());
        assert!(
            plan_status_change(&attempt(AttemptStatus::Submitted), review_target(false), 60, now)
                .is_ok()
        );
    }
}
