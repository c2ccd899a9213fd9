use std::time::Duration;

use anyhow::Context;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use crate::core::config::Settings;
use crate::core::retry::retry_fixed;

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub user_id: String,
    pub message: String,
    pub data: Value,
}

/// Posts notifications to the configured webhook. Delivery is best effort: callers
/// only learn whether sending failed.
#[derive(Debug, Clone)]
pub struct NotificationDispatcher {
    client: Client,
    webhook_url: String,
    max_attempts: u32,
    retry_delay: Duration,
}

impl NotificationDispatcher {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let notifications = settings.notifications();
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(notifications.request_timeout_seconds))
            .build()
            .context("Failed to build notification HTTP client")?;

        Ok(Self {
            client,
            webhook_url: notifications.webhook_url.trim().to_string(),
            max_attempts: notifications.max_attempts,
            retry_delay: Duration::from_secs(notifications.retry_delay_seconds),
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.webhook_url.is_empty()
    }

    /// Returns `false` once every attempt failed.
    pub async fn send(&self, notification: &Notification) -> bool {
        if !self.is_configured() {
            tracing::debug!(user_id = %notification.user_id, "No notification webhook configured");
            return true;
        }

        let client = &self.client;
        let url = self.webhook_url.as_str();
        let result =
            retry_fixed("notification", self.max_attempts, self.retry_delay, |_| async move {
                let response = client
                    .post(url)
                    .json(notification)
                    .send()
                    .await
                    .context("Failed to call notification webhook")?;

                let status = response.status();
                if status.is_success() {
                    Ok(())
                } else {
                    Err(anyhow::anyhow!("Notification webhook returned status {status}"))
                }
            })
            .await;

        match result {
            Ok(()) => {
                metrics::counter!("notifications_total", "status" => "sent").increment(1);
                true
            }
            Err(err) => {
                metrics::counter!("notifications_total", "status" => "failed").increment(1);
                tracing::error!(
                    user_id = %notification.user_id,
                    error = %err,
                    "Notification dropped after retries"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[tokio::test]
    async fn unconfigured_webhook_is_a_silent_success() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::remove_var("NOTIFICATION_WEBHOOK_URL");
        let settings = Settings::load().expect("settings");

        let dispatcher = NotificationDispatcher::from_settings(&settings).expect("dispatcher");
        assert!(!dispatcher.is_configured());

        let delivered = dispatcher
            .send(&Notification {
                user_id: "reviewer".to_string(),
                message: "attempt submitted".to_string(),
                data: serde_json::json!({ "attempt_id": "a-1" }),
            })
            .await;
        assert!(delivered);
    }

    #[tokio::test]
    async fn unreachable_webhook_reports_failure() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::set_var("NOTIFICATION_WEBHOOK_URL", "http://127.0.0.1:9/hook");
        std::env::set_var("NOTIFICATION_MAX_ATTEMPTS", "2");
        std::env::set_var("NOTIFICATION_RETRY_DELAY_SECONDS", "0");
        let settings = Settings::load().expect("settings");
        std::env::remove_var("NOTIFICATION_WEBHOOK_URL");
        std::env::remove_var("NOTIFICATION_MAX_ATTEMPTS");
        std::env::remove_var("NOTIFICATION_RETRY_DELAY_SECONDS");

        let dispatcher = NotificationDispatcher::from_settings(&settings).expect("dispatcher");
        let delivered = dispatcher
            .send(&Notification {
                user_id: "reviewer".to_string(),
                message: "attempt submitted".to_string(),
                data: Value::Null,
            })
            .await;
        assert!(!delivered);
    }
}
