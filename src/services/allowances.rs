use uuid::Uuid;

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::{Allowance, User};
use crate::db::types::AllowanceKey;
use crate::repositories;
use crate::services::attempt_timing::TimeAllowance;
use crate::services::errors::{ProctoringError, ProctoringResult};

/// Normalizes an allowance value, rejecting non-numeric input for the time keys.
pub fn validate_allowance_value(key: AllowanceKey, value: &str) -> ProctoringResult<String> {
    let trimmed = value.trim();
    let invalid =
        || ProctoringError::InvalidAllowanceValue { key, value: value.to_string() };

    match key {
        AllowanceKey::AdditionalTimeGranted => match trimmed.parse::<i32>() {
            Ok(minutes) if minutes >= 0 => Ok(minutes.to_string()),
            _ => Err(invalid()),
        },
        AllowanceKey::TimeMultiplier => match trimmed.parse::<f64>() {
            Ok(multiplier) if multiplier.is_finite() && multiplier > 0.0 => Ok(trimmed.to_string()),
            _ => Err(invalid()),
        },
        AllowanceKey::ReviewPolicyException => Ok(trimmed.to_string()),
    }
}

pub(crate) async fn resolve_user(state: &AppState, identifier: &str) -> ProctoringResult<User> {
    repositories::users::find_by_identifier(state.db(), identifier)
        .await?
        .filter(|user| user.is_active)
        .ok_or_else(|| ProctoringError::UserNotFound(identifier.to_string()))
}

/// Creates or replaces one allowance. The previous value goes to history first.
pub async fn set_allowance(
    state: &AppState,
    exam_id: &str,
    user_identifier: &str,
    key: AllowanceKey,
    value: &str,
) -> ProctoringResult<Allowance> {
    let value = validate_allowance_value(key, value)?;
    let user = resolve_user(state, user_identifier).await?;
    if repositories::exams::find_by_id(state.db(), exam_id).await?.is_none() {
        return Err(ProctoringError::ExamNotFound(exam_id.to_string()));
    }

    let now = primitive_now_utc();
    let mut tx = state.db().begin().await?;
    let allowance =
        match repositories::allowances::find_for_update(&mut *tx, exam_id, &user.id, key).await? {
            Some(existing) => {
                repositories::allowances::archive(&mut *tx, &existing, "updated", now).await?;
                repositories::allowances::update_value(&mut *tx, &existing.id, &value, now).await?
            }
            None => {
                repositories::allowances::insert(
                    &mut *tx,
                    &Uuid::new_v4().to_string(),
                    exam_id,
                    &user.id,
                    key,
                    &value,
                    now,
                )
                .await?
            }
        };
    tx.commit().await?;

    tracing::info!(exam_id, user_id = %user.id, key = key.as_str(), "Allowance set");
    Ok(allowance)
}

pub async fn remove_allowance(
    state: &AppState,
    exam_id: &str,
    user_identifier: &str,
    key: AllowanceKey,
) -> ProctoringResult<()> {
    let user = resolve_user(state, user_identifier).await?;
    let now = primitive_now_utc();

    let mut tx = state.db().begin().await?;
    let existing = repositories::allowances::find_for_update(&mut *tx, exam_id, &user.id, key)
        .await?
        .ok_or_else(|| {
            ProctoringError::DoesNotExist(format!(
                "no {} allowance for user {} on exam {exam_id}",
                key.as_str(),
                user.id
            ))
        })?;
    repositories::allowances::archive(&mut *tx, &existing, "removed", now).await?;
    repositories::allowances::delete(&mut *tx, &existing.id).await?;
    tx.commit().await?;

    tracing::info!(exam_id, user_id = %user.id, key = key.as_str(), "Allowance removed");
    Ok(())
}

pub async fn list_allowances(
    state: &AppState,
    exam_id: &str,
    user_id: &str,
) -> ProctoringResult<Vec<Allowance>> {
    Ok(repositories::allowances::list_for_user(state.db(), exam_id, user_id).await?)
}

pub(crate) async fn time_allowance(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
    user_id: &str,
) -> Result<TimeAllowance, sqlx::Error> {
    let rows = repositories::allowances::list_for_user(executor, exam_id, user_id).await?;
    Ok(TimeAllowance::from_allowances(&rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn additional_time_must_be_whole_minutes() {
        assert_eq!(
            validate_allowance_value(AllowanceKey::AdditionalTimeGranted, " 30 ").expect("valid"),
            "30"
        );
        assert!(matches!(
            validate_allowance_value(AllowanceKey::AdditionalTimeGranted, "thirty"),
            Err(ProctoringError::InvalidAllowanceValue {
                key: AllowanceKey::AdditionalTimeGranted,
                ..
            })
        ));
        assert!(validate_allowance_value(AllowanceKey::AdditionalTimeGranted, "-5").is_err());
    }

    #[test]
    fn multiplier_must_be_positive() {
        assert!(validate_allowance_value(AllowanceKey::TimeMultiplier, "1.25").is_ok());
        assert!(validate_allowance_value(AllowanceKey::TimeMultiplier, "0").is_err());
        assert!(validate_allowance_value(AllowanceKey::TimeMultiplier, "inf").is_err());
    }

    #[test]
    fn policy_exception_accepts_free_text() {
        assert_eq!(
            validate_allowance_value(AllowanceKey::ReviewPolicyException, " second monitor ok ")
                .expect("valid"),
            "second monitor ok"
        );
    }
}
