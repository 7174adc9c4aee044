//! Transport-level retry with jittered exponential backoff.
//!
//! Only transport-class errors (HTTP, timeout, rate limit) are retried.
//! Rate limits honour a server-provided reset hint when present. Parse and
//! backend errors surface immediately — the caller owns any softer fallback.

use tb_domain::error::{Error, Result};
use tb_domain::trace::TraceEvent;

use crate::traits::{BackendReply, BackendRequest, ModelBackend};

const BASE_DELAY_MS: u64 = 500;
const MAX_DELAY_MS: u64 = 30_000;

/// Call a backend, retrying transport faults up to `max_retries` times.
///
/// Returns the reply of the first successful attempt together with the
/// number of attempts made, so callers can account every API call.
pub async fn call_with_retry(
    backend: &dyn ModelBackend,
    req: &BackendRequest,
    max_retries: u32,
) -> Result<(BackendReply, u32)> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match backend.call(req.clone()).await {
            Ok(reply) => return Ok((reply, attempt)),
            Err(err) if err.is_retryable() && attempt <= max_retries => {
                let delay_ms = retry_delay_ms(&err, attempt);
                TraceEvent::BackendRetry {
                    provider: backend.provider_id().to_owned(),
                    model: req.model.clone(),
                    reason: err.to_string(),
                    delay_ms,
                }
                .emit();
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Delay before the given retry attempt (1-based).
///
/// Rate limits use the server hint when one was provided; everything else
/// backs off exponentially with up to 25% random jitter.
fn retry_delay_ms(err: &Error, attempt: u32) -> u64 {
    if let Error::RateLimit {
        retry_after_ms: Some(hint),
        ..
    } = err
    {
        return (*hint).min(MAX_DELAY_MS);
    }
    let base = BASE_DELAY_MS.saturating_mul(1u64 << (attempt - 1).min(6));
    let jitter = (base / 4).max(1);
    (base + rand::random::<u64>() % jitter).min(MAX_DELAY_MS)
}
