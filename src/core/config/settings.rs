use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_environment, parse_f64, parse_string_list,
    parse_u16, parse_u32, parse_u64,
};
use super::types::{
    ConfigError, DatabaseSettings, NotificationSettings, ProctoringSettings, RedisSettings,
    RuntimeSettings, Settings, TelemetrySettings, VerificationSettings, WorkerSettings,
};

const DEFAULT_PASSING_REVIEW_STATUSES: &[&str] = &["Clean", "Rules Violation"];

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let environment = parse_environment(
            env_optional("PROCTORING_ENV").or_else(|| env_optional("ENVIRONMENT")),
        );
        let strict_config = env_optional("PROCTORING_STRICT_CONFIG")
            .map(|value| parse_bool(&value))
            .unwrap_or(false)
            || environment.is_production();

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "proctoring");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "proctoring_db");
        let database_url = env_optional("DATABASE_URL");
        let max_connections =
            parse_u32("DB_MAX_CONNECTIONS", env_or_default("DB_MAX_CONNECTIONS", "20"))?;

        let redis_host = env_or_default("REDIS_HOST", "localhost");
        let redis_port = parse_u16("REDIS_PORT", env_or_default("REDIS_PORT", "6379"))?;
        let redis_db = parse_u16("REDIS_DB", env_or_default("REDIS_DB", "0"))?;
        let redis_password = env_or_default("REDIS_PASSWORD", "");

        let passing_review_statuses = parse_string_list(
            env_optional("PASSING_REVIEW_STATUSES"),
            DEFAULT_PASSING_REVIEW_STATUSES,
        );
        let heartbeat_write_interval_seconds = parse_u64(
            "HEARTBEAT_WRITE_INTERVAL_SECONDS",
            env_or_default("HEARTBEAT_WRITE_INTERVAL_SECONDS", "15"),
        )?;

        let notification_webhook_url = env_or_default("NOTIFICATION_WEBHOOK_URL", "");
        let notification_max_attempts = parse_u32(
            "NOTIFICATION_MAX_ATTEMPTS",
            env_or_default("NOTIFICATION_MAX_ATTEMPTS", "3"),
        )?;
        let notification_retry_delay_seconds = parse_u64(
            "NOTIFICATION_RETRY_DELAY_SECONDS",
            env_or_default("NOTIFICATION_RETRY_DELAY_SECONDS", "5"),
        )?;
        let notification_request_timeout_seconds = parse_u64(
            "NOTIFICATION_REQUEST_TIMEOUT_SECONDS",
            env_or_default("NOTIFICATION_REQUEST_TIMEOUT_SECONDS", "10"),
        )?;

        let verification_service_url = env_or_default("FACE_VERIFICATION_URL", "");
        let verification_api_key = env_or_default("FACE_VERIFICATION_API_KEY", "");
        let verification_max_attempts = parse_u32(
            "FACE_VERIFICATION_MAX_ATTEMPTS",
            env_or_default("FACE_VERIFICATION_MAX_ATTEMPTS", "3"),
        )?;
        let verification_retry_delay_seconds = parse_u64(
            "FACE_VERIFICATION_RETRY_DELAY_SECONDS",
            env_or_default("FACE_VERIFICATION_RETRY_DELAY_SECONDS", "10"),
        )?;
        let verification_task_time_limit_seconds = parse_u64(
            "FACE_VERIFICATION_TIME_LIMIT_SECONDS",
            env_or_default("FACE_VERIFICATION_TIME_LIMIT_SECONDS", "120"),
        )?;
        let verification_match_threshold = parse_f64(
            "FACE_VERIFICATION_MATCH_THRESHOLD",
            env_or_default("FACE_VERIFICATION_MATCH_THRESHOLD", "0.8"),
        )?;

        let worker_concurrency =
            parse_u64("WORKER_CONCURRENCY", env_or_default("WORKER_CONCURRENCY", "3"))? as usize;
        let worker_poll_interval_seconds = parse_u64(
            "WORKER_POLL_INTERVAL_SECONDS",
            env_or_default("WORKER_POLL_INTERVAL_SECONDS", "2"),
        )?;
        let job_max_attempts =
            parse_u32("JOB_MAX_ATTEMPTS", env_or_default("JOB_MAX_ATTEMPTS", "5"))?;
        let job_retry_delay_seconds = parse_u64(
            "JOB_RETRY_DELAY_SECONDS",
            env_or_default("JOB_RETRY_DELAY_SECONDS", "30"),
        )?;

        let log_level = env_or_default("PROCTORING_LOG_LEVEL", "info");
        let json =
            env_optional("PROCTORING_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);
        let metrics_addr = env_or_default("METRICS_ADDR", "0.0.0.0:9100");

        let settings = Self {
            runtime: RuntimeSettings { environment, strict_config },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
                max_connections,
            },
            redis: RedisSettings {
                host: redis_host,
                port: redis_port,
                db: redis_db,
                password: redis_password,
            },
            proctoring: ProctoringSettings {
                passing_review_statuses,
                heartbeat_write_interval_seconds,
            },
            notifications: NotificationSettings {
                webhook_url: notification_webhook_url,
                max_attempts: notification_max_attempts,
                retry_delay_seconds: notification_retry_delay_seconds,
                request_timeout_seconds: notification_request_timeout_seconds,
            },
            verification: VerificationSettings {
                service_url: verification_service_url,
                api_key: verification_api_key,
                max_attempts: verification_max_attempts,
                retry_delay_seconds: verification_retry_delay_seconds,
                task_time_limit_seconds: verification_task_time_limit_seconds,
                match_threshold: verification_match_threshold,
            },
            worker: WorkerSettings {
                concurrency: worker_concurrency,
                poll_interval_seconds: worker_poll_interval_seconds,
                job_max_attempts,
                job_retry_delay_seconds,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled, metrics_addr },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub fn redis(&self) -> &RedisSettings {
        &self.redis
    }

    pub fn proctoring(&self) -> &ProctoringSettings {
        &self.proctoring
    }

    pub fn notifications(&self) -> &NotificationSettings {
        &self.notifications
    }

    pub fn verification(&self) -> &VerificationSettings {
        &self.verification
    }

    pub fn worker(&self) -> &WorkerSettings {
        &self.worker
    }

    pub fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.proctoring.passing_review_statuses.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "PASSING_REVIEW_STATUSES",
                value: String::from("<empty>"),
            });
        }

        if self.notifications.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "NOTIFICATION_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        if self.verification.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "FACE_VERIFICATION_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.verification.match_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "FACE_VERIFICATION_MATCH_THRESHOLD",
                value: self.verification.match_threshold.to_string(),
            });
        }

        if self.worker.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "WORKER_CONCURRENCY",
                value: "0".to_string(),
            });
        }

        if self.worker.job_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "JOB_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        if !self.runtime.strict_config {
            return Ok(());
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }
        if self.notifications.webhook_url.is_empty() {
            return Err(ConfigError::MissingSecret("NOTIFICATION_WEBHOOK_URL"));
        }
        if !self.verification.service_url.is_empty() && self.verification.api_key.is_empty() {
            return Err(ConfigError::MissingSecret("FACE_VERIFICATION_API_KEY"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[tokio::test]
    async fn load_uses_defaults_in_test_environment() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::remove_var("PASSING_REVIEW_STATUSES");

        let settings = Settings::load().expect("settings");

        assert!(!settings.runtime().strict_config);
        assert_eq!(settings.worker().job_max_attempts, 5);
        assert!(settings.proctoring().is_passing_review_status("clean"));
        assert!(settings.proctoring().is_passing_review_status(" Rules Violation "));
        assert!(!settings.proctoring().is_passing_review_status("Suspicious"));
    }

    #[tokio::test]
    async fn load_rejects_zero_job_attempts() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::set_var("JOB_MAX_ATTEMPTS", "0");

        let result = Settings::load();
        std::env::remove_var("JOB_MAX_ATTEMPTS");

        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field: "JOB_MAX_ATTEMPTS", .. })
        ));
    }

    #[tokio::test]
    async fn strict_mode_requires_notification_webhook() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::set_var("PROCTORING_STRICT_CONFIG", "1");
        std::env::set_var("DATABASE_URL", "postgresql://u:p@localhost/db");
        std::env::remove_var("NOTIFICATION_WEBHOOK_URL");

        let result = Settings::load();
        std::env::set_var("PROCTORING_STRICT_CONFIG", "0");

        assert!(matches!(result, Err(ConfigError::MissingSecret("NOTIFICATION_WEBHOOK_URL"))));
    }
}
