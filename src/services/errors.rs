use thiserror::Error;

use crate::db::types::{AllowanceKey, AttemptStatus};

/// Failures raised synchronously by the attempt, allowance and configuration paths.
/// None of them are retried; the calling layer turns them into user-facing messages.
#[derive(Debug, Error)]
pub enum ProctoringError {
    #[error("an attempt already exists for exam {exam_id} and user {student_id}")]
    AlreadyExists { exam_id: String, student_id: String },
    #[error("{0}")]
    DoesNotExist(String),
    #[error("attempt for exam {exam_id} and user {student_id} has already been started")]
    AlreadyStarted { exam_id: String, student_id: String },
    #[error("illegal status transition from {from} to {to}")]
    IllegalStatusTransition { from: AttemptStatus, to: AttemptStatus },
    #[error("value {value:?} is not valid for allowance {key:?}")]
    InvalidAllowanceValue { key: AllowanceKey, value: String },
    #[error("cannot find user {0}")]
    UserNotFound(String),
    #[error("exam {0} not found")]
    ExamNotFound(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type ProctoringResult<T> = Result<T, ProctoringError>;

impl ProctoringError {
    pub(crate) fn attempt_missing(exam_id: &str, student_id: &str) -> Self {
        Self::DoesNotExist(format!(
            "no attempt exists for exam {exam_id} and user {student_id}"
        ))
    }
}
