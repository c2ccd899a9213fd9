pub(crate) mod alarms;
pub(crate) mod allowances;
pub(crate) mod attempts;
pub(crate) mod enrollments;
pub(crate) mod exams;
pub(crate) mod grades;
pub(crate) mod health;
pub(crate) mod jobs;
pub(crate) mod notices;
pub(crate) mod question_sets;
pub(crate) mod scores;
pub(crate) mod snapshot_verifications;
pub(crate) mod users;
