use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::{
    AllowanceKey, AttemptStatus, DifficultyTier, EnrollmentMode, JobKind, JobStatus,
};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub is_active: bool,
    pub created_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProctoredExam {
    pub id: String,
    pub course_id: String,
    pub exam_key: String,
    pub title: String,
    pub release_date: Option<PrimitiveDateTime>,
    pub due_date: Option<PrimitiveDateTime>,
    pub allotted_time_minutes: i32,
    pub disconnection_window_minutes: i32,
    pub is_randomized: bool,
    pub is_proctored: bool,
    pub is_active: bool,
    pub easy_mandatory: i32,
    pub easy_optional: i32,
    pub moderate_mandatory: i32,
    pub moderate_optional: i32,
    pub hard_mandatory: i32,
    pub hard_optional: i32,
    pub num_easy_pulled: i32,
    pub num_moderate_pulled: i32,
    pub num_hard_pulled: i32,
    pub created_at: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
}

impl ProctoredExam {
    pub fn pool_size(&self, tier: DifficultyTier) -> i32 {
        match tier {
            DifficultyTier::Easy => self.num_easy_pulled,
            DifficultyTier::Moderate => self.num_moderate_pulled,
            DifficultyTier::Hard => self.num_hard_pulled,
        }
    }

    pub fn mandatory_count(&self, tier: DifficultyTier) -> i32 {
        match tier {
            DifficultyTier::Easy => self.easy_mandatory,
            DifficultyTier::Moderate => self.moderate_mandatory,
            DifficultyTier::Hard => self.hard_mandatory,
        }
    }

    pub fn optional_count(&self, tier: DifficultyTier) -> i32 {
        match tier {
            DifficultyTier::Easy => self.easy_optional,
            DifficultyTier::Moderate => self.moderate_optional,
            DifficultyTier::Hard => self.hard_optional,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Enrollment {
    pub id: String,
    pub exam_id: String,
    pub student_id: String,
    pub mode: EnrollmentMode,
    pub is_active: bool,
    pub created_at: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
}

/// Stored draw; each list is comma-joined pool indices in draw order.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QuestionSet {
    pub id: String,
    pub exam_id: String,
    pub student_id: String,
    pub easy_indices: String,
    pub moderate_indices: String,
    pub hard_indices: String,
    pub created_at: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExamAttempt {
    pub id: String,
    pub exam_id: String,
    pub student_id: String,
    pub status: AttemptStatus,
    pub started_at: Option<PrimitiveDateTime>,
    pub completed_at: Option<PrimitiveDateTime>,
    pub last_poll_timestamp: Option<PrimitiveDateTime>,
    pub review_status: Option<String>,
    pub is_passing: Option<bool>,
    pub created_at: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExamAttemptHistory {
    pub id: i64,
    pub attempt_id: String,
    pub exam_id: String,
    pub student_id: String,
    pub status: AttemptStatus,
    pub started_at: Option<PrimitiveDateTime>,
    pub completed_at: Option<PrimitiveDateTime>,
    pub last_poll_timestamp: Option<PrimitiveDateTime>,
    pub review_status: Option<String>,
    pub is_passing: Option<bool>,
    pub reason: String,
    pub archived_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Allowance {
    pub id: String,
    pub exam_id: String,
    pub user_id: String,
    pub key: AllowanceKey,
    pub value: String,
    pub created_at: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AlarmConfiguration {
    pub id: i64,
    pub alarm_minutes: i32,
    pub is_active: bool,
    pub created_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ExamAlarm {
    pub id: String,
    pub exam_id: String,
    pub student_id: String,
    pub attempt_id: String,
    pub offset_minutes: i32,
    pub alarm_time: PrimitiveDateTime,
    pub is_active: bool,
    pub created_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProblemScore {
    pub id: String,
    pub exam_id: String,
    pub student_id: String,
    pub problem_key: String,
    pub tier: DifficultyTier,
    pub earned: f64,
    pub possible: f64,
    pub updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PersistedGrade {
    pub id: String,
    pub exam_id: String,
    pub student_id: String,
    pub percent_grade: f64,
    pub created_at: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TimedOutNotice {
    pub exam_key: String,
    pub student_id: String,
    pub created_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BackgroundJob {
    pub id: String,
    pub kind: JobKind,
    pub payload: Json<serde_json::Value>,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub run_after: PrimitiveDateTime,
    pub last_error: Option<String>,
    pub created_at: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SnapshotVerification {
    pub id: String,
    pub attempt_id: String,
    pub matched: Option<bool>,
    pub confidence: Option<f64>,
    pub error: Option<String>,
    pub created_at: PrimitiveDateTime,
}
