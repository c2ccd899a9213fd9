mod parsing;
mod settings;
mod types;

pub use types::{
    ConfigError, DatabaseSettings, Environment, NotificationSettings, ProctoringSettings,
    RedisSettings, RuntimeSettings, Settings, TelemetrySettings, VerificationSettings,
    WorkerSettings,
};
