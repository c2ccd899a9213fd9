use anyhow::Result;
use tokio::sync::watch;
use tokio::time::{interval, sleep, Duration};

use crate::core::state::AppState;
use crate::services::face_verification::FaceVerificationClient;
use crate::tasks::jobs;

const STALE_SWEEP_INTERVAL_SECONDS: u64 = 300;

pub(crate) async fn run(state: AppState) -> Result<()> {
    let face = FaceVerificationClient::from_settings(state.settings())?;
    if !face.is_configured() {
        tracing::warn!("FACE_VERIFICATION_URL not configured; snapshot jobs will record errors");
    }

    let concurrency = state.settings().worker().concurrency.max(1);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::with_capacity(concurrency + 1);

    for worker_id in 0..concurrency {
        handles.push(tokio::spawn(job_worker(
            worker_id,
            state.clone(),
            face.clone(),
            shutdown_rx.clone(),
        )));
    }
    handles.push(tokio::spawn(requeue_stale_loop(state.clone(), shutdown_rx.clone())));

    tracing::info!(
        concurrency,
        environment = state.settings().runtime().environment.as_str(),
        "Proctoring worker started"
    );

    crate::core::shutdown::shutdown_signal().await;
    if shutdown_tx.send(true).is_err() {
        tracing::warn!("Failed to broadcast shutdown signal to background tasks");
    }

    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Background task join failed");
        }
    }

    Ok(())
}

async fn job_worker(
    worker_id: usize,
    state: AppState,
    face: FaceVerificationClient,
    mut shutdown: watch::Receiver<bool>,
) {
    let idle = Duration::from_secs(state.settings().worker().poll_interval_seconds.max(1));

    loop {
        if *shutdown.borrow() {
            break;
        }

        match jobs::claim_next_job(state.db()).await {
            Ok(Some(job)) => {
                tracing::debug!(
                    worker_id,
                    job_id = %job.id,
                    kind = job.kind.as_str(),
                    "Job claimed"
                );
                jobs::process_job(&state, &face, job).await;
                continue;
            }
            Ok(None) => {}
            Err(err) => tracing::error!(worker_id, error = %err, "Failed to claim job"),
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep(idle) => {}
        }
    }

    tracing::debug!(worker_id, "Job worker stopped");
}

async fn requeue_stale_loop(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let mut tick = interval(Duration::from_secs(STALE_SWEEP_INTERVAL_SECONDS));
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                if let Err(err) = jobs::requeue_stale_jobs(&state).await {
                    tracing::error!(error = %err, "requeue_stale_jobs failed");
                }
            }
        }
    }
}
