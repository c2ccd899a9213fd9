use serde::{Deserialize, Serialize};
use time::PrimitiveDateTime;
use validator::Validate;

/// Administrator-supplied exam definition. Pool sizes and counts are per tier.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ExamDefinition {
    #[validate(length(min = 1, message = "course_id must not be empty"))]
    pub course_id: String,
    #[validate(length(min = 1, message = "exam_key must not be empty"))]
    pub exam_key: String,
    #[validate(length(min = 1, message = "title must not be empty"))]
    pub title: String,
    #[serde(default)]
    pub release_date: Option<PrimitiveDateTime>,
    #[serde(default)]
    pub due_date: Option<PrimitiveDateTime>,
    #[validate(range(min = 1, message = "allotted_time_minutes must be positive"))]
    pub allotted_time_minutes: i32,
    #[serde(default = "default_disconnection_window")]
    #[validate(range(min = 0, message = "disconnection_window_minutes must be non-negative"))]
    pub disconnection_window_minutes: i32,
    #[serde(default = "default_true")]
    pub is_randomized: bool,
    #[serde(default)]
    pub is_proctored: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    #[validate(nested)]
    pub easy: TierDefinition,
    #[serde(default)]
    #[validate(nested)]
    pub moderate: TierDefinition,
    #[serde(default)]
    #[validate(nested)]
    pub hard: TierDefinition,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, Validate)]
pub struct TierDefinition {
    #[serde(default)]
    #[validate(range(min = 0, message = "mandatory must be non-negative"))]
    pub mandatory: i32,
    #[serde(default)]
    #[validate(range(min = 0, message = "optional must be non-negative"))]
    pub optional: i32,
    #[serde(default)]
    #[validate(range(min = 0, message = "pool_size must be non-negative"))]
    pub pool_size: i32,
}

/// Global reminder offsets, in minutes before the allotted time runs out.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AlarmConfigurationInput {
    #[validate(length(max = 5, message = "at most 5 alarm offsets may be configured"))]
    pub alarm_minutes: Vec<i32>,
}

fn default_disconnection_window() -> i32 {
    5
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exam_definition_defaults_and_validation() {
        let definition: ExamDefinition = serde_json::from_value(serde_json::json!({
            "course_id": "course-v1:Org+CS101+2025",
            "exam_key": "midterm",
            "title": "Midterm",
            "allotted_time_minutes": 90,
            "easy": { "mandatory": 3, "pool_size": 10 }
        }))
        .expect("deserialize");

        assert!(definition.is_randomized);
        assert!(definition.is_active);
        assert_eq!(definition.disconnection_window_minutes, 5);
        assert_eq!(definition.moderate.pool_size, 0);
        assert!(definition.validate().is_ok());
    }

    #[test]
    fn exam_definition_rejects_nonpositive_duration() {
        let definition: ExamDefinition = serde_json::from_value(serde_json::json!({
            "course_id": "c",
            "exam_key": "k",
            "title": "t",
            "allotted_time_minutes": 0,
            "hard": { "mandatory": -1 }
        }))
        .expect("deserialize");

        let errors = definition.validate().expect_err("invalid");
        let rendered = errors.to_string();
        assert!(rendered.contains("allotted_time_minutes"));
        assert!(rendered.contains("mandatory"));
    }

    #[test]
    fn alarm_configuration_caps_entry_count() {
        let input = AlarmConfigurationInput { alarm_minutes: vec![5, 10, 15, 20, 25, 30] };
        assert!(input.validate().is_err());
    }
}
