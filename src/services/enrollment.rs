use uuid::Uuid;

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::Enrollment;
use crate::db::types::EnrollmentMode;
use crate::repositories;
use crate::services::allowances::resolve_user;
use crate::services::errors::{ProctoringError, ProctoringResult};
use crate::services::question_allocation::allocate_question_set;

/// Enrolls a user. Timed enrollments get their question set allocated synchronously.
pub async fn enroll_student(
    state: &AppState,
    exam_id: &str,
    user_identifier: &str,
    mode: EnrollmentMode,
) -> ProctoringResult<Enrollment> {
    let user = resolve_user(state, user_identifier).await?;
    if repositories::exams::find_by_id(state.db(), exam_id).await?.is_none() {
        return Err(ProctoringError::ExamNotFound(exam_id.to_string()));
    }

    let enrollment = repositories::enrollments::upsert(
        state.db(),
        &Uuid::new_v4().to_string(),
        exam_id,
        &user.id,
        mode,
        primitive_now_utc(),
    )
    .await?;

    if mode == EnrollmentMode::Timed {
        allocate_question_set(state, &user.id, exam_id).await?;
    }

    tracing::info!(exam_id, student_id = %user.id, mode = ?mode, "Student enrolled");
    Ok(enrollment)
}

pub async fn unenroll_student(
    state: &AppState,
    exam_id: &str,
    student_id: &str,
) -> ProctoringResult<bool> {
    let removed =
        repositories::enrollments::deactivate(state.db(), exam_id, student_id, primitive_now_utc())
            .await?;
    if removed {
        tracing::info!(exam_id, student_id, "Student unenrolled");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::types::AllowanceKey;
    use crate::services::allowances::{remove_allowance, set_allowance, time_allowance};
    use crate::test_support::{exam_definition, TestContext};

    #[tokio::test]
    async fn fixed_exams_share_one_question_set() {
        let Some(ctx) = TestContext::connect().await else { return };
        let mut definition = exam_definition("fixed", 60);
        definition.is_randomized = false;
        let exam = ctx.insert_exam(definition).await;

        for username in ["ann", "ben", "cid"] {
            ctx.insert_user(username).await;
            enroll_student(&ctx.state, &exam.id, username, EnrollmentMode::Timed)
                .await
                .expect("enroll");
        }
        ctx.insert_user("dot").await;
        enroll_student(&ctx.state, &exam.id, "dot@example.com", EnrollmentMode::Audit)
            .await
            .expect("audit enroll");

        let sets =
            repositories::question_sets::list_by_exam(ctx.db(), &exam.id).await.expect("sets");
        assert_eq!(sets.len(), 3);
        for set in &sets[1..] {
            assert_eq!(set.easy_indices, sets[0].easy_indices);
            assert_eq!(set.moderate_indices, sets[0].moderate_indices);
            assert_eq!(set.hard_indices, sets[0].hard_indices);
        }
    }

    #[tokio::test]
    async fn fixed_exam_edit_ignores_sets_of_unenrolled_students() {
        use crate::services::exams::update_exam;
        use crate::services::face_verification::FaceVerificationClient;
        use crate::services::question_allocation::parse_indices;
        use crate::tasks::jobs::drain;

        let Some(ctx) = TestContext::connect().await else { return };
        let mut definition = exam_definition("fixed-edit", 60);
        definition.is_randomized = false;
        let exam = ctx.insert_exam(definition.clone()).await;

        let ann = ctx.insert_user("ann").await;
        let ben = ctx.insert_user("ben").await;
        let cid = ctx.insert_user("cid").await;
        enroll_student(&ctx.state, &exam.id, "ann", EnrollmentMode::Timed).await.expect("ann");
        enroll_student(&ctx.state, &exam.id, "ben", EnrollmentMode::Timed).await.expect("ben");
        assert!(unenroll_student(&ctx.state, &exam.id, &ann.id).await.expect("unenroll"));

        definition.easy.pool_size = 3;
        definition.easy.mandatory = 3;
        definition.easy.optional = 0;
        update_exam(&ctx.state, &exam.id, &definition).await.expect("update");
        let face = FaceVerificationClient::from_settings(ctx.state.settings()).expect("client");
        drain(&ctx.state, &face).await.expect("drain");

        enroll_student(&ctx.state, &exam.id, "cid", EnrollmentMode::Timed).await.expect("cid");

        let ben_set = repositories::question_sets::find(ctx.db(), &exam.id, &ben.id)
            .await
            .expect("ben set")
            .expect("row");
        let cid_set = repositories::question_sets::find(ctx.db(), &exam.id, &cid.id)
            .await
            .expect("cid set")
            .expect("row");
        assert_eq!(cid_set.easy_indices, ben_set.easy_indices);
        assert_eq!(cid_set.moderate_indices, ben_set.moderate_indices);
        assert_eq!(cid_set.hard_indices, ben_set.hard_indices);

        let mut easy = parse_indices(&cid_set.easy_indices);
        easy.sort_unstable();
        assert_eq!(easy, vec![0, 1, 2]);
        assert!(parse_indices(&cid_set.moderate_indices).iter().all(|i| (3..9).contains(i)));
        assert!(parse_indices(&cid_set.hard_indices).iter().all(|i| (9..13).contains(i)));
    }

    #[tokio::test]
    async fn unknown_user_cannot_enroll() {
        let Some(ctx) = TestContext::connect().await else { return };
        let exam = ctx.insert_exam(exam_definition("ghost", 60)).await;

        let err = enroll_student(&ctx.state, &exam.id, "nobody", EnrollmentMode::Timed)
            .await
            .expect_err("missing user");
        assert!(matches!(err, ProctoringError::UserNotFound(_)));
    }

    #[tokio::test]
    async fn allowances_extend_the_allotted_time() {
        let Some(ctx) = TestContext::connect().await else { return };
        let exam = ctx.insert_exam(exam_definition("extra", 60)).await;
        let student = ctx.insert_user("eve").await;

        set_allowance(&ctx.state, &exam.id, "eve", AllowanceKey::AdditionalTimeGranted, "15")
            .await
            .expect("set");
        set_allowance(&ctx.state, &exam.id, "eve", AllowanceKey::AdditionalTimeGranted, "20")
            .await
            .expect("replace");

        let allowance = time_allowance(ctx.db(), &exam.id, &student.id).await.expect("allowance");
        assert_eq!(allowance.additional_minutes, 20);

        remove_allowance(&ctx.state, &exam.id, "eve", AllowanceKey::AdditionalTimeGranted)
            .await
            .expect("remove");
        let err = remove_allowance(&ctx.state, &exam.id, "eve", AllowanceKey::AdditionalTimeGranted)
            .await
            .expect_err("already removed");
        assert!(matches!(err, ProctoringError::DoesNotExist(_)));

        let history: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM exam_allowance_history")
            .fetch_one(ctx.db())
            .await
            .expect("history");
        assert_eq!(history, 2);
    }
}
