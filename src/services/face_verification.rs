use std::time::Duration;

use anyhow::{anyhow, Context};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::core::config::Settings;
use crate::core::retry::retry_fixed;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::types::JobKind;
use crate::repositories;
use crate::repositories::snapshot_verifications::VerificationOutcome;
use crate::services::errors::{ProctoringError, ProctoringResult};
use crate::services::jobs::{self, SnapshotPayload};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceMatch {
    pub matched: bool,
    pub confidence: f64,
}

/// Client of the external face recognition service.
#[derive(Debug, Clone)]
pub struct FaceVerificationClient {
    client: Client,
    service_url: String,
    api_key: String,
    max_attempts: u32,
    retry_delay: Duration,
    time_limit: Duration,
    match_threshold: f64,
}

impl FaceVerificationClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let verification = settings.verification();
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(verification.task_time_limit_seconds.max(1)))
            .build()
            .context("Failed to build face verification HTTP client")?;

        Ok(Self {
            client,
            service_url: verification.service_url.trim_end_matches('/').to_string(),
            api_key: verification.api_key.clone(),
            max_attempts: verification.max_attempts,
            retry_delay: Duration::from_secs(verification.retry_delay_seconds),
            time_limit: Duration::from_secs(verification.task_time_limit_seconds),
            match_threshold: verification.match_threshold,
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.service_url.is_empty()
    }

    /// Compares two base64 encoded images. Retries with a fixed delay and gives up
    /// once the overall time limit is spent.
    pub async fn verify(
        &self,
        reference_image: &str,
        snapshot_image: &str,
    ) -> anyhow::Result<FaceMatch> {
        if !self.is_configured() {
            return Err(anyhow!("Face verification service is not configured"));
        }

        let endpoint = format!("{}/verify", self.service_url);
        let body = json!({
            "reference_image": reference_image,
            "snapshot_image": snapshot_image,
        });
        let (endpoint, body) = (endpoint.as_str(), &body);

        let attempts =
            retry_fixed("face_verification", self.max_attempts, self.retry_delay, move |attempt| {
                self.request_confidence(endpoint, body, attempt)
            });

        let confidence = tokio::time::timeout(self.time_limit, attempts)
            .await
            .map_err(|_| anyhow!("Face verification exceeded {:?}", self.time_limit))??;

        Ok(FaceMatch { matched: confidence >= self.match_threshold, confidence })
    }

    async fn request_confidence(
        &self,
        endpoint: &str,
        body: &Value,
        attempt: u32,
    ) -> anyhow::Result<f64> {
        let response = self
            .client
            .post(endpoint)
            .header("X-Api-Key", &self.api_key)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Face verification request {attempt} failed"))?;

        let status = response.status();
        let parsed: Value =
            response.json().await.context("Face verification returned non-JSON body")?;
        if !status.is_success() {
            return Err(anyhow!(
                "Face verification failed (status {status}): {}",
                parsed.get("error").and_then(Value::as_str).unwrap_or("unknown error")
            ));
        }
        parse_confidence(&parsed)
    }
}

fn parse_confidence(body: &Value) -> anyhow::Result<f64> {
    let confidence = body
        .get("confidence")
        .and_then(Value::as_f64)
        .ok_or_else(|| anyhow!("Face verification response missing confidence"))?;
    Ok(confidence.clamp(0.0, 1.0))
}

/// Queues a comparison of a proctoring snapshot against the reference photo.
pub async fn enqueue_snapshot_verification(
    state: &AppState,
    attempt_id: &str,
    reference_image: &[u8],
    snapshot_image: &[u8],
) -> ProctoringResult<()> {
    if reference_image.is_empty() || snapshot_image.is_empty() {
        return Err(ProctoringError::InvalidConfiguration(
            "snapshot verification needs both images".to_string(),
        ));
    }
    if repositories::attempts::find_by_id(state.db(), attempt_id).await?.is_none() {
        return Err(ProctoringError::DoesNotExist(format!("attempt {attempt_id} does not exist")));
    }

    let payload = SnapshotPayload {
        attempt_id: attempt_id.to_string(),
        reference_image: BASE64.encode(reference_image),
        snapshot_image: BASE64.encode(snapshot_image),
    };
    jobs::enqueue(state, JobKind::VerifySnapshot, json!(payload)).await?;
    Ok(())
}

/// Runs one queued comparison and stores the outcome. Exhausted retries are
/// recorded as an error row and dropped.
pub(crate) async fn run_snapshot_verification(
    state: &AppState,
    client: &FaceVerificationClient,
    payload: &SnapshotPayload,
) -> anyhow::Result<()> {
    let verified = client.verify(&payload.reference_image, &payload.snapshot_image).await;
    let (outcome, error) = match verified {
        Ok(face) => {
            metrics::counter!(
                "snapshot_verifications_total",
                "status" => if face.matched { "matched" } else { "mismatched" }
            )
            .increment(1);
            (Some(face), None)
        }
        Err(err) => {
            metrics::counter!("snapshot_verifications_total", "status" => "failed").increment(1);
            tracing::error!(
                attempt_id = %payload.attempt_id,
                error = %err,
                "Snapshot verification dropped"
            );
            (None, Some(format!("{err:#}")))
        }
    };

    repositories::snapshot_verifications::insert(
        state.db(),
        &Uuid::new_v4().to_string(),
        &payload.attempt_id,
        VerificationOutcome {
            matched: outcome.map(|face| face.matched),
            confidence: outcome.map(|face| face.confidence),
            error: error.as_deref(),
        },
        primitive_now_utc(),
    )
    .await
    .context("Failed to store snapshot verification")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn confidence_is_read_and_clamped() {
        assert_eq!(parse_confidence(&json!({ "confidence": 0.91 })).expect("confidence"), 0.91);
        assert_eq!(parse_confidence(&json!({ "confidence": 1.7 })).expect("confidence"), 1.0);
        assert!(parse_confidence(&json!({ "score": 0.5 })).is_err());
    }

    #[tokio::test]
    async fn unconfigured_service_fails_fast() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::remove_var("FACE_VERIFICATION_URL");
        let settings = Settings::load().expect("settings");

        let client = FaceVerificationClient::from_settings(&settings).expect("client");
        assert!(!client.is_configured());
        assert!(client.verify("aGVsbG8=", "aGVsbG8=").await.is_err());
    }

    #[test]
    fn snapshot_payload_carries_base64_images() {
        let payload = SnapshotPayload {
            attempt_id: "attempt-1".to_string(),
            reference_image: BASE64.encode(b"ref"),
            snapshot_image: BASE64.encode(b"snap"),
        };
        assert_eq!(payload.reference_image, "cmVm");
        assert_eq!(BASE64.decode(&payload.snapshot_image).expect("decode"), b"snap");
    }
}
