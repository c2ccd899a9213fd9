pub mod alarm_schedule;
pub mod allowances;
pub mod attempt_rules;
pub mod attempt_timing;
pub mod attempts;
pub mod enrollment;
pub mod errors;
pub mod exams;
pub mod face_verification;
pub mod grade_aggregation;
pub mod jobs;
pub mod notifications;
pub mod question_allocation;
