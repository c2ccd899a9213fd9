use std::future::Future;
use std::time::Duration;

/// Runs `op` up to `max_attempts` times, sleeping `delay` between failures.
/// Returns the last error once attempts are exhausted.
pub(crate) async fn retry_fixed<T, E, F, Fut>(
    label: &'static str,
    max_attempts: u32,
    delay: Duration,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts => {
                tracing::warn!(task = label, attempt, max_attempts, error = %err, "Retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
