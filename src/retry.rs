use std::future::Future;

use crate::config::RetryPolicy;
use crate::error::GatewayError;

/// Runs `op` up to `policy.max_attempts` times, sleeping `policy.delay`
/// between attempts. Only retryable errors trigger another attempt; the last
/// error is returned once the budget is spent.
pub async fn retry_with<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                log::warn!(
                    "[FETCH] {} failed (attempt {}/{}): {}",
                    label,
                    attempt,
                    max_attempts,
                    err
                );
                attempt += 1;
                tokio::time::sleep(policy.delay).await;
            }
            Err(err) => {
                if err.is_retryable() {
                    log::error!(
                        "[FETCH] {} giving up after {} attempts: {}",
                        label,
                        max_attempts,
                        err
                    );
                }
                return Err(err);
            }
        }
    }
}
