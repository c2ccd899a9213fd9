use anyhow::Context;
use uuid::Uuid;

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::{PersistedGrade, ProblemScore, ProctoredExam};
use crate::db::types::{DifficultyTier, JobKind};
use crate::repositories;
use crate::repositories::scores::ScoreInput;
use crate::services::errors::{ProctoringError, ProctoringResult};
use crate::services::jobs::{self, StudentExamPayload};

/// earned / possible clamped to [0, 1]; a problem worth nothing scores 0.
pub fn score_fraction(earned: f64, possible: f64) -> f64 {
    if possible <= 0.0 || !earned.is_finite() || !possible.is_finite() {
        return 0.0;
    }
    (earned / possible).clamp(0.0, 1.0)
}

/// Keeps the best `mandatory` fractions of every tier and averages them as a percentage.
/// Returns `None` when nothing was selected.
pub fn aggregate_grade(
    scores: &[(DifficultyTier, f64)],
    mandatory: impl Fn(DifficultyTier) -> usize,
) -> Option<f64> {
    let mut selected = Vec::new();

    for tier in DifficultyTier::ALL {
        let mut tier_scores: Vec<f64> = scores
            .iter()
            .filter(|(score_tier, _)| *score_tier == tier)
            .map(|(_, value)| value.clamp(0.0, 1.0))
            .collect();
        tier_scores.sort_by(|a, b| b.total_cmp(a));
        tier_scores.truncate(mandatory(tier));
        selected.extend(tier_scores);
    }

    if selected.is_empty() {
        return None;
    }

    let mean = selected.iter().sum::<f64>() / selected.len() as f64;
    Some(round_to_hundredths(mean * 100.0))
}

fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn grade_for_exam(exam: &ProctoredExam, scores: &[ProblemScore]) -> Option<f64> {
    let fractions: Vec<(DifficultyTier, f64)> = scores
        .iter()
        .map(|score| (score.tier, score_fraction(score.earned, score.possible)))
        .collect();
    aggregate_grade(&fractions, |tier| usize::try_from(exam.mandatory_count(tier)).unwrap_or(0))
}

/// Recomputes and stores the grade of one student. An empty selection leaves
/// any previously stored grade untouched.
pub async fn recompute_grade(
    state: &AppState,
    exam_id: &str,
    student_id: &str,
) -> anyhow::Result<Option<f64>> {
    let exam = repositories::exams::find_by_id(state.db(), exam_id)
        .await
        .context("Failed to load exam")?
        .with_context(|| format!("Exam {exam_id} not found"))?;

    let scores = repositories::scores::list_for_student(state.db(), exam_id, student_id)
        .await
        .context("Failed to load problem scores")?;

    let Some(percent) = grade_for_exam(&exam, &scores) else {
        tracing::debug!(exam_id, student_id, "No scores selected; stored grade left as is");
        return Ok(None);
    };

    repositories::grades::upsert(
        state.db(),
        &Uuid::new_v4().to_string(),
        exam_id,
        student_id,
        percent,
        primitive_now_utc(),
    )
    .await
    .context("Failed to persist grade")?;

    metrics::counter!("grades_recomputed_total").increment(1);
    tracing::debug!(exam_id, student_id, percent, "Grade recomputed");
    Ok(Some(percent))
}

pub async fn recompute_exam_grades(state: &AppState, exam_id: &str) -> anyhow::Result<usize> {
    let students = repositories::enrollments::list_active_student_ids(state.db(), exam_id)
        .await
        .context("Failed to list active enrollments")?;

    let mut written = 0;
    for student_id in &students {
        if recompute_grade(state, exam_id, student_id).await?.is_some() {
            written += 1;
        }
    }

    tracing::info!(exam_id, students = students.len(), written, "Exam grades recomputed");
    Ok(written)
}

pub struct ProblemScoreInput {
    pub problem_key: String,
    pub tier: DifficultyTier,
    pub earned: f64,
    pub possible: f64,
}

/// Stores one per-problem score and queues a grade recompute for the student.
pub async fn record_problem_score(
    state: &AppState,
    exam_id: &str,
    student_id: &str,
    input: ProblemScoreInput,
) -> ProctoringResult<ProblemScore> {
    if !input.earned.is_finite() || !input.possible.is_finite() {
        return Err(ProctoringError::InvalidConfiguration(format!(
            "score for problem {} must be finite",
            input.problem_key
        )));
    }

    let score = repositories::scores::upsert(
        state.db(),
        &Uuid::new_v4().to_string(),
        exam_id,
        student_id,
        ScoreInput {
            problem_key: &input.problem_key,
            tier: input.tier,
            earned: input.earned,
            possible: input.possible,
        },
        primitive_now_utc(),
    )
    .await?;

    let payload =
        StudentExamPayload { exam_id: exam_id.to_string(), student_id: student_id.to_string() };
    jobs::enqueue(state, JobKind::RecomputeGrade, serde_json::json!(payload)).await?;

    Ok(score)
}

pub async fn find_grade(
    state: &AppState,
    exam_id: &str,
    student_id: &str,
) -> ProctoringResult<Option<PersistedGrade>> {
    Ok(repositories::grades::find(state.db(), exam_id, student_id).await?)
}
