use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "attemptstatus", rename_all = "snake_case")]
pub enum AttemptStatus {
    Created,
    ReadyToStart,
    Started,
    ReadyToSubmit,
    /// Request-only alias. Folded into `Submitted` before anything is written.
    TimedOut,
    Submitted,
    Verified,
    Rejected,
    Expired,
}

impl AttemptStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::ReadyToStart => "ready_to_start",
            Self::Started => "started",
            Self::ReadyToSubmit => "ready_to_submit",
            Self::TimedOut => "timed_out",
            Self::Submitted => "submitted",
            Self::Verified => "verified",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }

    pub fn is_incomplete(self) -> bool {
        matches!(self, Self::Created | Self::ReadyToStart | Self::Started | Self::ReadyToSubmit)
    }

    pub fn is_completed(self) -> bool {
        matches!(self, Self::TimedOut | Self::Submitted | Self::Verified | Self::Rejected)
    }

    pub fn is_pre_start(self) -> bool {
        matches!(self, Self::Created | Self::ReadyToStart)
    }

    /// Statuses in which the client is expected to be polling.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Started | Self::ReadyToSubmit)
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "allowancekey", rename_all = "snake_case")]
pub enum AllowanceKey {
    AdditionalTimeGranted,
    TimeMultiplier,
    ReviewPolicyException,
}

impl AllowanceKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AdditionalTimeGranted => "additional_time_granted",
            Self::TimeMultiplier => "time_multiplier",
            Self::ReviewPolicyException => "review_policy_exception",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Self::AdditionalTimeGranted | Self::TimeMultiplier)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "difficultytier", rename_all = "lowercase")]
pub enum DifficultyTier {
    Easy,
    Moderate,
    Hard,
}

impl DifficultyTier {
    pub const ALL: [DifficultyTier; 3] = [Self::Easy, Self::Moderate, Self::Hard];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "enrollmentmode", rename_all = "lowercase")]
pub enum EnrollmentMode {
    Timed,
    Audit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "jobkind", rename_all = "snake_case")]
pub enum JobKind {
    RecomputeGrade,
    RecomputeExamGrades,
    DeactivateRemovedAlarms,
    ReallocateQuestionSets,
    VerifySnapshot,
    NotifyReviewers,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RecomputeGrade => "recompute_grade",
            Self::RecomputeExamGrades => "recompute_exam_grades",
            Self::DeactivateRemovedAlarms => "deactivate_removed_alarms",
            Self::ReallocateQuestionSets => "reallocate_question_sets",
            Self::VerifySnapshot => "verify_snapshot",
            Self::NotifyReviewers => "notify_reviewers",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "jobstatus", rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_groups_are_disjoint() {
        let all = [
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

        for status in all {
            assert!(!(status.is_incomplete() && status.is_completed()), "{status}");
        }
        assert!(!AttemptStatus::Expired.is_incomplete());
        assert!(!AttemptStatus::Expired.is_completed());
    }

    #[test]
    fn status_serializes_as_snake_case() {
        let value = serde_json::to_value(AttemptStatus::ReadyToSubmit).expect("serialize");
        assert_eq!(value, serde_json::json!("ready_to_submit"));
        assert_eq!(AttemptStatus::ReadyToSubmit.as_str(), "ready_to_submit");
    }

    #[test]
    fn only_time_allowances_are_numeric() {
        assert!(AllowanceKey::AdditionalTimeGranted.is_numeric());
        assert!(AllowanceKey::TimeMultiplier.is_numeric());
        assert!(!AllowanceKey::ReviewPolicyException.is_numeric());
    }
}
