//! Uniform retry policy for provider requests
//!
//! The policy (shared by every dialect):
//! - 401: refresh credentials once, rebuild the transport, retry with the
//!   attempt counter unchanged; a second 401 is fatal for the turn.
//! - 429/529/overloaded bodies: wait `max(Retry-After, backoff(k))`.
//! - Context-limit overrun: recompute `max_tokens` and retry with the
//!   counter unchanged. The request is rebuilt from the unchanged message
//!   log each attempt, reading the adjusted budget from [`RetryState`] —
//!   a captured request object is never mutated.
//! - Unpaired `tool_use` complaints and other 4xx: fail immediately.

use super::ProviderError;
use crate::cancel::RunContext;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Margin subtracted from the recomputed token budget
const CONTEXT_LIMIT_BUFFER: u64 = 1000;

/// Floor for the recomputed token budget
const MIN_SAFE_MAX_TOKENS: u64 = 1000;

/// Retry tuning
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

/// Per-call retry state, handed to the request builder on every attempt
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryState {
    /// Transient-failure count so far (auth refresh and budget adjustment
    /// do not advance it)
    pub attempt: usize,
    /// Budget recomputed after a context-limit overrun
    pub max_tokens_override: Option<u32>,
}

/// `min(base·2^(k−1) + jitter, cap)`
pub fn backoff_delay(attempt: usize, config: &RetryConfig) -> Duration {
    let shift = (attempt.saturating_sub(1)).min(10) as u32;
    let exp = 1_u64.checked_shl(shift).unwrap_or(u64::MAX);
    let base = config.base_delay_ms.saturating_mul(exp);
    let jitter = rand::thread_rng().gen_range(0..=config.base_delay_ms / 2);
    Duration::from_millis(base.saturating_add(jitter).min(config.max_delay_ms))
}

/// The adjusted budget after `input + requested > limit`
pub fn adjusted_max_tokens(input: u64, limit: u64) -> u32 {
    limit
        .saturating_sub(input)
        .saturating_sub(CONTEXT_LIMIT_BUFFER)
        .max(MIN_SAFE_MAX_TOKENS)
        .min(u32::MAX as u64) as u32
}

/// Drive `op` to completion under the uniform retry policy.
///
/// `op` receives the current [`RetryState`] and must rebuild its request
/// from scratch (the state carries the adjusted token budget). `refresh`
/// is invoked at most once, on the first authentication failure.
pub async fn with_retry<T, Op, OpFut, Refresh, RefreshFut>(
    ctx: &RunContext,
    config: &RetryConfig,
    mut op: Op,
    mut refresh: Refresh,
) -> Result<T, ProviderError>
where
    Op: FnMut(RetryState) -> OpFut,
    OpFut: Future<Output = Result<T, ProviderError>>,
    Refresh: FnMut() -> RefreshFut,
    RefreshFut: Future<Output = Result<(), ProviderError>>,
{
    let mut state = RetryState::default();
    let mut refreshed = false;

    loop {
        if ctx.is_canceled() {
            return Err(ProviderError::Canceled);
        }

        let result = tokio::select! {
            _ = ctx.canceled() => return Err(ProviderError::Canceled),
            result = op(state) => result,
        };

        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        match err {
            ProviderError::Authentication(msg) => {
                if refreshed {
                    return Err(ProviderError::Authentication(msg));
                }
                refreshed = true;
                log::debug!("credentials rejected, refreshing: {}", msg);
                refresh().await?;
            }
            ProviderError::ContextLimit {
                input,
                requested,
                limit,
            } => {
                let adjusted = adjusted_max_tokens(input, limit);
                if state.max_tokens_override == Some(adjusted) {
                    // The provider rejected the adjusted budget too.
                    return Err(ProviderError::ContextLimit {
                        input,
                        requested,
                        limit,
                    });
                }
                log::debug!(
                    "context limit overrun ({} + {} > {}), adjusting max_tokens to {}",
                    input,
                    requested,
                    limit,
                    adjusted
                );
                state.max_tokens_override = Some(adjusted);
            }
            ProviderError::RateLimited { .. }
            | ProviderError::Overloaded(_)
            | ProviderError::Network(_) => {
                state.attempt += 1;
                if state.attempt >= config.max_attempts {
                    return Err(ProviderError::RetriesExhausted(err.to_string()));
                }
                let retry_after = match &err {
                    ProviderError::RateLimited {
                        retry_after: Some(after),
                        ..
                    } => *after,
                    _ => Duration::ZERO,
                };
                let delay = retry_after.max(backoff_delay(state.attempt, config));
                log::debug!(
                    "transient provider error (attempt {}/{}), retrying in {:?}: {}",
                    state.attempt,
                    config.max_attempts,
                    delay,
                    err
                );
                tokio::select! {
                    _ = ctx.canceled() => return Err(ProviderError::Canceled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            other => return Err(other),
        }
    }
}
