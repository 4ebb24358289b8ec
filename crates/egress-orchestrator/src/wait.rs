//! Resource waiting with exponential backoff and cancellation support.
//!
//! Every "wait until available/running/stopped" in the orchestrator goes
//! through [`wait_for_resource`]: poll a check, back off exponentially with
//! jitter, give up at the timeout or when the token is cancelled.

use anyhow::Result;
use backon::{BackoffBuilder, ExponentialBuilder};
use egress_common::classify_anyhow_error;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Configuration for resource waiting with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitConfig {
    /// Initial delay between checks
    pub initial_delay: Duration,
    /// Maximum delay between checks (cap for exponential growth)
    pub max_delay: Duration,
    /// Maximum total time to wait before timeout
    pub timeout: Duration,
}

impl WaitConfig {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(15),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Poll `check` until it yields a value.
///
/// `check` returns `Ok(Some(v))` when the resource is ready, `Ok(None)` to
/// keep waiting, and `Err` to abort immediately. Throttling errors count
/// as not ready.
///
/// # Example
/// ```ignore
/// let ip = wait_for_resource(
///     WaitConfig::default(),
///     Some(&cancel_token),
///     || async { Ok(lookup_ip().await?) },
///     "instance public IP",
/// ).await?;
/// ```
pub async fn wait_for_resource<T, F, Fut>(
    config: WaitConfig,
    cancel: Option<&CancellationToken>,
    check: F,
    resource_name: &str,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let start = Instant::now();
    let mut attempts = 0u32;

    let mut delays = ExponentialBuilder::default()
        .with_min_delay(config.initial_delay)
        .with_max_delay(config.max_delay)
        .with_factor(2.0)
        .with_jitter()
        .build();

    loop {
        attempts += 1;

        if cancel.is_some_and(|token| token.is_cancelled()) {
            anyhow::bail!("Wait for {} cancelled", resource_name);
        }

        if start.elapsed() >= config.timeout {
            anyhow::bail!(
                "Timeout waiting for {} after {:?} ({} attempts)",
                resource_name,
                config.timeout,
                attempts
            );
        }

        match check().await {
            Ok(Some(value)) => {
                debug!(resource = %resource_name, attempts, "Resource ready");
                return Ok(value);
            }
            Ok(None) => {}
            Err(e) if classify_anyhow_error(&e).is_retryable() => {
                debug!(resource = %resource_name, attempt = attempts, error = %e, "Resource check throttled");
            }
            Err(e) => {
                warn!(resource = %resource_name, error = %e, "Resource check failed");
                return Err(e);
            }
        }

        let delay = delays.next().unwrap_or(config.max_delay);
        debug!(
            resource = %resource_name,
            attempt = attempts,
            delay_ms = delay.as_millis(),
            "Resource not ready, retrying"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = async {
                match cancel {
                    Some(token) => token.cancelled().await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                anyhow::bail!("Wait for {} cancelled", resource_name);
            }
        }
    }
}
