//! Retry-with-exponential-backoff around a single generation call.
//!
//! [`execute_with_backoff`] keeps calling the generator until it succeeds,
//! the configured attempt cap is reached, or the [`CancellationToken`] fires.
//! Cancellation is only observed while waiting between attempts: a request
//! that is already in flight is always allowed to settle.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{BackoffConfig, ControlSettings};
use crate::error::{GenerationError, Result};
use crate::normalize;
use crate::types::{Credential, GeneratedFields, GenerationRequest};
use crate::MetadataGenerator;

/// Calculate the next backoff delay, clamped to [`BackoffConfig::max_delay`].
pub fn next_delay(current: Duration, config: &BackoffConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Run one generation attempt for `label` with backoff.
///
/// `on_retry` is called with the upcoming delay after every failed call,
/// before sleeping. On success the fields are normalized with `controls`.
#[allow(clippy::too_many_arguments)]
pub async fn execute_with_backoff<G, F>(
    generator: &G,
    request: &GenerationRequest,
    credential: &Credential,
    controls: &ControlSettings,
    config: &BackoffConfig,
    cancel: &CancellationToken,
    label: &str,
    mut on_retry: F,
) -> Result<GeneratedFields>
where
    G: MetadataGenerator,
    F: FnMut(Duration),
{
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let err = match generator.generate(request, credential).await {
            Ok(fields) => {
                if attempt > 1 {
                    tracing::info!(item = label, attempt, "Generation succeeded after retry");
                }
                return Ok(normalize::finalize(fields, controls));
            }
            Err(e) => e,
        };

        if !err.is_retryable() {
            return Err(err);
        }

        if let Some(max) = config.max_attempts {
            if attempt >= max {
                tracing::warn!(item = label, attempt, error = %err, "Giving up on this attempt");
                return Err(err);
            }
        }

        match &err {
            GenerationError::SafetyBlocked => tracing::warn!(
                item = label,
                attempt,
                "Response blocked by safety settings, retrying in {}s",
                delay.as_secs_f64()
            ),
            other => tracing::warn!(
                item = label,
                attempt,
                error = %other,
                "API call failed, retrying in {}s",
                delay.as_secs_f64()
            ),
        }

        on_retry(delay);

        tokio::select! {
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, config);
    }
}
