use serde::Serialize;
use time::PrimitiveDateTime;

use crate::core::time::minutes;
use crate::db::models::Allowance;
use crate::db::types::AllowanceKey;

/// Time-related allowances granted to one user for one exam.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeAllowance {
    pub additional_minutes: i32,
    pub multiplier: Option<f64>,
}

impl TimeAllowance {
    pub(crate) fn from_allowances(allowances: &[Allowance]) -> Self {
        let mut allowance = Self::default();
        for row in allowances {
            match row.key {
                AllowanceKey::AdditionalTimeGranted => match row.value.trim().parse::<i32>() {
                    Ok(value) => allowance.additional_minutes = value,
                    Err(_) => tracing::warn!(
                        exam_id = %row.exam_id,
                        user_id = %row.user_id,
                        value = %row.value,
                        "Ignoring malformed additional time allowance"
                    ),
                },
                AllowanceKey::TimeMultiplier => match row.value.trim().parse::<f64>() {
                    Ok(value) if value.is_finite() && value > 0.0 => {
                        allowance.multiplier = Some(value)
                    }
                    _ => tracing::warn!(
                        exam_id = %row.exam_id,
                        user_id = %row.user_id,
                        value = %row.value,
                        "Ignoring malformed time multiplier allowance"
                    ),
                },
                AllowanceKey::ReviewPolicyException => {}
            }
        }
        allowance
    }
}

/// A multiplier supersedes granted minutes; otherwise the minutes are added on top.
pub fn effective_allotted_minutes(allotted_minutes: i32, allowance: TimeAllowance) -> i32 {
    match allowance.multiplier {
        Some(multiplier) => (f64::from(allotted_minutes) * multiplier).ceil() as i32,
        None => allotted_minutes.saturating_add(allowance.additional_minutes.max(0)),
    }
}

pub fn expiry_instant(started_at: PrimitiveDateTime, allotted_minutes: i32) -> PrimitiveDateTime {
    started_at + minutes(allotted_minutes)
}

pub fn has_time_expired(
    started_at: PrimitiveDateTime,
    allotted_minutes: i32,
    now: PrimitiveDateTime,
) -> bool {
    now > expiry_instant(started_at, allotted_minutes)
}

/// Seconds left before expiry rounded up, never negative. Zero only once the
/// deadline has been reached, so a fraction of a second still counts as one.
pub fn remaining_seconds(
    started_at: PrimitiveDateTime,
    allotted_minutes: i32,
    now: PrimitiveDateTime,
) -> i64 {
    let left = expiry_instant(started_at, allotted_minutes) - now;
    if !left.is_positive() {
        return 0;
    }
    left.whole_seconds() + i64::from(left.subsec_nanoseconds() > 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveStatus {
    Attempting,
    Dangling,
}

impl LiveStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Attempting => "attempting",
            Self::Dangling => "dangling",
        }
    }
}

/// Heartbeat liveness of an in-progress attempt. An attempt that never polled is
/// measured from its start instead.
pub fn classify_liveness(
    last_poll: Option<PrimitiveDateTime>,
    started_at: Option<PrimitiveDateTime>,
    disconnection_window_minutes: i32,
    now: PrimitiveDateTime,
) -> LiveStatus {
    let Some(reference) = last_poll.or(started_at) else {
        return LiveStatus::Dangling;
    };

    if now - reference <= minutes(disconnection_window_minutes) {
        LiveStatus::Attempting
    } else {
        LiveStatus::Dangling
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn allowance(key: AllowanceKey, value: &str) -> Allowance {
        Allowance {
            id: "allowance-1".to_string(),
            exam_id: "exam-1".to_string(),
            user_id: "user-1".to_string(),
            key,
            value: value.to_string(),
            created_at: datetime!(2025-01-01 00:00:00),
            updated_at: datetime!(2025-01-01 00:00:00),
        }
    }

    #[test]
    fn expiry_is_strictly_after_the_deadline() {
        let started = datetime!(2025-03-01 10:00:00);
        assert!(!has_time_expired(started, 60, datetime!(2025-03-01 11:00:00)));
        assert!(has_time_expired(started, 60, datetime!(2025-03-01 11:00:01)));
        assert!(has_time_expired(started, 60, datetime!(2025-03-01 11:01:00)));
    }

    #[test]
    fn remaining_seconds_clamps_at_zero() {
        let started = datetime!(2025-03-01 10:00:00);
        assert_eq!(remaining_seconds(started, 60, datetime!(2025-03-01 10:59:30)), 30);
        assert_eq!(remaining_seconds(started, 60, datetime!(2025-03-01 11:00:00)), 0);
        assert_eq!(remaining_seconds(started, 60, datetime!(2025-03-01 12:00:00)), 0);
    }

    #[test]
    fn sub_second_remainder_rounds_up() {
        let started = datetime!(2025-03-01 10:00:00);
        let almost = datetime!(2025-03-01 10:59:59.100);
        assert_eq!(remaining_seconds(started, 60, almost), 1);
        assert!(!has_time_expired(started, 60, almost));
        assert_eq!(remaining_seconds(started, 60, datetime!(2025-03-01 10:59:58.999)), 2);
        assert_eq!(remaining_seconds(started, 60, datetime!(2025-03-01 11:00:00.001)), 0);
    }

    #[test]
    fn liveness_uses_disconnection_window_inclusively() {
        let poll = datetime!(2025-03-01 10:30:00);
        let started = Some(datetime!(2025-03-01 10:00:00));
        assert_eq!(
            classify_liveness(Some(poll), started, 5, datetime!(2025-03-01 10:35:00)),
            LiveStatus::Attempting
        );
        assert_eq!(
            classify_liveness(Some(poll), started, 5, datetime!(2025-03-01 10:35:01)),
            LiveStatus::Dangling
        );
    }

    #[test]
    fn liveness_falls_back_to_start_without_heartbeat() {
        let started = Some(datetime!(2025-03-01 10:00:00));
        assert_eq!(
            classify_liveness(None, started, 5, datetime!(2025-03-01 10:04:00)),
            LiveStatus::Attempting
        );
        assert_eq!(
            classify_liveness(None, None, 5, datetime!(2025-03-01 10:04:00)),
            LiveStatus::Dangling
        );
    }

    #[test]
    fn additional_minutes_extend_allotted_time() {
        let granted = TimeAllowance::from_allowances(&[allowance(
            AllowanceKey::AdditionalTimeGranted,
            "15",
        )]);
        assert_eq!(effective_allotted_minutes(60, granted), 75);
    }

    #[test]
    fn multiplier_supersedes_additional_minutes() {
        let granted = TimeAllowance::from_allowances(&[
            allowance(AllowanceKey::AdditionalTimeGranted, "15"),
            allowance(AllowanceKey::TimeMultiplier, "1.5"),
        ]);
        assert_eq!(effective_allotted_minutes(45, granted), 68);
    }

    #[test]
    fn malformed_allowances_are_ignored() {
        let granted = TimeAllowance::from_allowances(&[
            allowance(AllowanceKey::AdditionalTimeGranted, "soon"),
            allowance(AllowanceKey::TimeMultiplier, "-2"),
            allowance(AllowanceKey::ReviewPolicyException, "camera off allowed"),
        ]);
        assert_eq!(granted, TimeAllowance::default());
        assert_eq!(effective_allotted_minutes(60, granted), 60);
    }
}
