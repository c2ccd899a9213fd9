use uuid::Uuid;
use validator::Validate;

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::is_unique_violation;
use crate::db::models::ProctoredExam;
use crate::db::types::{DifficultyTier, JobKind};
use crate::repositories;
use crate::repositories::exams::ExamFields;
use crate::schemas::exam::ExamDefinition;
use crate::services::errors::{ProctoringError, ProctoringResult};
use crate::services::jobs::{self, ExamPayload};

fn validate_definition(definition: &ExamDefinition) -> ProctoringResult<()> {
    definition.validate().map_err(|e| ProctoringError::InvalidConfiguration(e.to_string()))?;

    if let (Some(release), Some(due)) = (definition.release_date, definition.due_date) {
        if due <= release {
            return Err(ProctoringError::InvalidConfiguration(
                "due_date must be after release_date".to_string(),
            ));
        }
    }
    Ok(())
}

fn fields(definition: &ExamDefinition) -> ExamFields<'_> {
    ExamFields {
        course_id: &definition.course_id,
        exam_key: &definition.exam_key,
        title: &definition.title,
        release_date: definition.release_date,
        due_date: definition.due_date,
        allotted_time_minutes: definition.allotted_time_minutes,
        disconnection_window_minutes: definition.disconnection_window_minutes,
        is_randomized: definition.is_randomized,
        is_proctored: definition.is_proctored,
        is_active: definition.is_active,
        mandatory: [
            definition.easy.mandatory,
            definition.moderate.mandatory,
            definition.hard.mandatory,
        ],
        optional: [
            definition.easy.optional,
            definition.moderate.optional,
            definition.hard.optional,
        ],
        pulled: [
            definition.easy.pool_size,
            definition.moderate.pool_size,
            definition.hard.pool_size,
        ],
    }
}

/// Whether stored question sets were drawn under different pool parameters.
pub(crate) fn draw_parameters_changed(before: &ProctoredExam, after: &ProctoredExam) -> bool {
    before.is_randomized != after.is_randomized
        || DifficultyTier::ALL.into_iter().any(|tier| {
            before.pool_size(tier) != after.pool_size(tier)
                || before.mandatory_count(tier) != after.mandatory_count(tier)
                || before.optional_count(tier) != after.optional_count(tier)
        })
}

pub async fn create_exam(
    state: &AppState,
    definition: &ExamDefinition,
) -> ProctoringResult<ProctoredExam> {
    validate_definition(definition)?;

    let exam = repositories::exams::create(
        state.db(),
        &Uuid::new_v4().to_string(),
        fields(definition),
        primitive_now_utc(),
    )
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            ProctoringError::InvalidConfiguration(format!(
                "exam {} already exists in course {}",
                definition.exam_key, definition.course_id
            ))
        } else {
            ProctoringError::Database(err)
        }
    })?;

    tracing::info!(exam_id = %exam.id, exam_key = %exam.exam_key, "Exam created");
    Ok(exam)
}

/// Updates an exam and queues question set re-derivation when the draw parameters moved.
pub async fn update_exam(
    state: &AppState,
    exam_id: &str,
    definition: &ExamDefinition,
) -> ProctoringResult<ProctoredExam> {
    validate_definition(definition)?;

    let before = repositories::exams::find_by_id(state.db(), exam_id)
        .await?
        .ok_or_else(|| ProctoringError::ExamNotFound(exam_id.to_string()))?;

    let exam =
        repositories::exams::update(state.db(), exam_id, fields(definition), primitive_now_utc())
            .await?
            .ok_or_else(|| ProctoringError::ExamNotFound(exam_id.to_string()))?;

    if draw_parameters_changed(&before, &exam) {
        let payload = ExamPayload { exam_id: exam.id.clone() };
        jobs::enqueue(state, JobKind::ReallocateQuestionSets, serde_json::json!(payload)).await?;
        tracing::info!(exam_id, "Question pool changed; re-derivation queued");
    }

    if DifficultyTier::ALL
        .into_iter()
        .any(|tier| before.mandatory_count(tier) != exam.mandatory_count(tier))
    {
        let payload = ExamPayload { exam_id: exam.id.clone() };
        jobs::enqueue(state, JobKind::RecomputeExamGrades, serde_json::json!(payload)).await?;
        tracing::info!(exam_id, "Mandatory counts changed; grade recompute queued");
    }

    Ok(exam)
}

pub async fn find_exam(state: &AppState, exam_id: &str) -> ProctoringResult<ProctoredExam> {
    repositories::exams::find_by_id(state.db(), exam_id)
        .await?
        .ok_or_else(|| ProctoringError::ExamNotFound(exam_id.to_string()))
}

pub async fn find_exam_by_key(
    state: &AppState,
    course_id: &str,
    exam_key: &str,
) -> ProctoringResult<ProctoredExam> {
    repositories::exams::find_by_key(state.db(), course_id, exam_key)
        .await?
        .ok_or_else(|| ProctoringError::ExamNotFound(format!("{course_id}/{exam_key}")))
}
