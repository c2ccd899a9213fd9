use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Settings {
    pub(super) runtime: RuntimeSettings,
    pub(super) database: DatabaseSettings,
    pub(super) redis: RedisSettings,
    pub(super) proctoring: ProctoringSettings,
    pub(super) notifications: NotificationSettings,
    pub(super) verification: VerificationSettings,
    pub(super) worker: WorkerSettings,
    pub(super) telemetry: TelemetrySettings,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub postgres_server: String,
    pub postgres_port: u16,
    pub postgres_user: String,
    pub postgres_password: String,
    pub postgres_db: String,
    pub database_url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub db: u16,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct ProctoringSettings {
    /// Review statuses that count as a pass when a review backend reports back.
    pub passing_review_statuses: Vec<String>,
    /// Minimum spacing between two persisted heartbeats of one attempt.
    pub heartbeat_write_interval_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct NotificationSettings {
    pub webhook_url: String,
    pub max_attempts: u32,
    pub retry_delay_seconds: u64,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct VerificationSettings {
    pub service_url: String,
    pub api_key: String,
    pub max_attempts: u32,
    pub retry_delay_seconds: u64,
    pub task_time_limit_seconds: u64,
    pub match_threshold: f64,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub poll_interval_seconds: u64,
    pub job_max_attempts: u32,
    pub job_retry_delay_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    pub log_level: String,
    pub json: bool,
    pub prometheus_enabled: bool,
    pub metrics_addr: String,
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub environment: Environment,
    pub strict_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Staging,
    Test,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Test => "test",
        }
    }

    pub(super) fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("missing required secret for {0}")]
    MissingSecret(&'static str),
}

impl DatabaseSettings {
    pub fn database_url(&self) -> String {
        if let Some(url) = &self.database_url {
            return url.clone();
        }

        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.postgres_user,
            self.postgres_password,
            self.postgres_server,
            self.postgres_port,
            self.postgres_db
        )
    }
}

impl RedisSettings {
    pub fn redis_url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}:{}/{}", self.host, self.port, self.db)
        } else {
            format!("redis://:{}@{}:{}/{}", self.password, self.host, self.port, self.db)
        }
    }
}

impl ProctoringSettings {
    pub fn is_passing_review_status(&self, review_status: &str) -> bool {
        let status = review_status.trim();
        self.passing_review_statuses.iter().any(|allowed| allowed.eq_ignore_ascii_case(status))
    }
}
