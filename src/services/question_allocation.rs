use std::collections::HashSet;

use anyhow::Context;
use rand::seq::SliceRandom;
use rand::Rng;
use uuid::Uuid;

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::{ProctoredExam, QuestionSet};
use crate::db::types::DifficultyTier;
use crate::repositories;
use crate::repositories::question_sets::QuestionSetColumns;
use crate::services::errors::{ProctoringError, ProctoringResult};

/// Pool indices drawn for one student, in draw order, one list per tier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuestionDraw {
    pub easy: Vec<u32>,
    pub moderate: Vec<u32>,
    pub hard: Vec<u32>,
}

impl QuestionDraw {
    fn from_stored(set: &QuestionSet) -> Self {
        Self {
            easy: parse_indices(&set.easy_indices),
            moderate: parse_indices(&set.moderate_indices),
            hard: parse_indices(&set.hard_indices),
        }
    }
}

/// Draws `pick` distinct indices from `offset..offset + pool_size`.
///
/// Picking the whole pool (or more) yields a shuffled permutation of the range.
/// Smaller picks rejection-sample uniformly until enough distinct indices are found.
/// An empty pool contributes nothing.
pub fn draw_tier<R: Rng>(rng: &mut R, offset: u32, pool_size: u32, pick: u32) -> Vec<u32> {
    if pool_size == 0 || pick == 0 {
        return Vec::new();
    }

    if pick >= pool_size {
        let mut indices: Vec<u32> = (offset..offset + pool_size).collect();
        indices.shuffle(rng);
        return indices;
    }

    let mut seen = HashSet::with_capacity(pick as usize);
    let mut indices = Vec::with_capacity(pick as usize);
    while indices.len() < pick as usize {
        let candidate = rng.gen_range(offset..offset + pool_size);
        if seen.insert(candidate) {
            indices.push(candidate);
        }
    }
    indices
}

pub fn draw_question_set<R: Rng>(rng: &mut R, exam: &ProctoredExam) -> QuestionDraw {
    let mut draw = QuestionDraw::default();
    let mut offset = 0_u32;

    for tier in DifficultyTier::ALL {
        let pool_size = non_negative(exam.pool_size(tier));
        let pick = non_negative(exam.mandatory_count(tier))
            .saturating_add(non_negative(exam.optional_count(tier)));

        if pool_size == 0 && pick > 0 {
            tracing::warn!(
                exam_id = %exam.id,
                tier = ?tier,
                pick,
                "Question pool is empty; tier contributes no questions"
            );
        }

        let indices = draw_tier(rng, offset, pool_size, pick);
        match tier {
            DifficultyTier::Easy => draw.easy = indices,
            DifficultyTier::Moderate => draw.moderate = indices,
            DifficultyTier::Hard => draw.hard = indices,
        }
        offset = offset.saturating_add(pool_size);
    }

    draw
}

pub fn join_indices(indices: &[u32]) -> String {
    indices.iter().map(u32::to_string).collect::<Vec<_>>().join(",")
}

pub fn parse_indices(raw: &str) -> Vec<u32> {
    raw.split(',').filter_map(|item| item.trim().parse::<u32>().ok()).collect()
}

fn non_negative(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn fresh_draw(exam: &ProctoredExam) -> QuestionDraw {
    let mut rng = rand::thread_rng();
    draw_question_set(&mut rng, exam)
}

async fn store_draw(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
    student_id: &str,
    draw: &QuestionDraw,
) -> Result<QuestionSet, sqlx::Error> {
    let easy = join_indices(&draw.easy);
    let moderate = join_indices(&draw.moderate);
    let hard = join_indices(&draw.hard);

    repositories::question_sets::upsert(
        executor,
        &Uuid::new_v4().to_string(),
        exam_id,
        student_id,
        QuestionSetColumns { easy: &easy, moderate: &moderate, hard: &hard },
        primitive_now_utc(),
    )
    .await
}

/// Creates or overwrites the question set of `student_id` for `exam_id`.
///
/// Non-randomized exams hand every student a copy of the set already held by the other
/// active timed enrollees.
pub async fn allocate_question_set(
    state: &AppState,
    student_id: &str,
    exam_id: &str,
) -> ProctoringResult<QuestionSet> {
    let exam = repositories::exams::find_by_id(state.db(), exam_id)
        .await?
        .ok_or_else(|| ProctoringError::ExamNotFound(exam_id.to_string()))?;

    let draw = if exam.is_randomized {
        fresh_draw(&exam)
    } else {
        match repositories::question_sets::find_template_for_exam(state.db(), exam_id, student_id)
            .await?
        {
            Some(template) => QuestionDraw::from_stored(&template),
            None => fresh_draw(&exam),
        }
    };

    let set = store_draw(state.db(), exam_id, student_id, &draw).await?;

    metrics::counter!("question_sets_allocated_total").increment(1);
    tracing::debug!(exam_id, student_id, randomized = exam.is_randomized, "Question set allocated");

    Ok(set)
}

/// Re-derives the sets of every active timed enrollment after an exam edit.
pub async fn reallocate_exam_question_sets(
    state: &AppState,
    exam_id: &str,
) -> anyhow::Result<usize> {
    let exam = repositories::exams::find_by_id(state.db(), exam_id)
        .await
        .context("Failed to load exam")?
        .with_context(|| format!("Exam {exam_id} not found"))?;

    let students = repositories::enrollments::list_active_timed_student_ids(state.db(), exam_id)
        .await
        .context("Failed to list timed enrollments")?;

    let shared = (!exam.is_randomized).then(|| fresh_draw(&exam));

    let mut tx = state.db().begin().await.context("Failed to begin transaction")?;
    for student_id in &students {
        let draw = match &shared {
            Some(draw) => draw.clone(),
            None => fresh_draw(&exam),
        };
        store_draw(&mut *tx, exam_id, student_id, &draw)
            .await
            .with_context(|| format!("Failed to store question set for {student_id}"))?;
    }
    tx.commit().await.context("Failed to commit question sets")?;

    metrics::counter!("question_sets_allocated_total").increment(students.len() as u64);
    tracing::info!(exam_id, count = students.len(), "Question sets re-derived");

    Ok(students.len())
}
