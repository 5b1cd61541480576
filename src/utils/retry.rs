//! Async retry with a fixed backoff schedule

use std::time::Duration;

/// Retry an async operation over a delay schedule.
///
/// The operation runs once plus once per schedule entry, sleeping the
/// scheduled delay before each retry. Only errors for which
/// `is_transient` returns true are retried; the final (or first
/// non-transient) error is returned with the attempt count.
pub async fn retry_with_schedule<F, Fut, T, E>(
    delays_ms: &[u64],
    mut is_transient: impl FnMut(&E) -> bool,
    mut operation: F,
) -> Result<(T, u32), (E, u32)>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match operation().await {
            Ok(value) => return Ok((value, attempts)),
            Err(e) => {
                let delay_idx = (attempts - 1) as usize;
                if delay_idx >= delays_ms.len() || !is_transient(&e) {
                    return Err((e, attempts));
                }
                let delay = Duration::from_millis(delays_ms[delay_idx]);
                tracing::warn!(
                    error = %e,
                    attempt = attempts,
                    delay_ms = delay.as_millis(),
                    "Retrying after transient error"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
