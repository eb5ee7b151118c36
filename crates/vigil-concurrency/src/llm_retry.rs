//! §4.I + §7: "transient is retried, permanent degrades immediately,
//! cancellation propagates untouched." Every outbound LLM call in
//! `vigil-extractor` and `vigil-consolidate` goes through this one
//! function so that rule lives in one place instead of at each call site.

use tokio_util::sync::CancellationToken;
use vigil_core::error::LlmError;
use vigil_core::llm::{CompletionRequest, CompletionResponse, LlmBackend};

use crate::backoff::{run_with_retries, BackoffPolicy};

/// A turn handler is latency-bound, so retries here stay short: a couple
/// hundred milliseconds, not the minute-scale ceiling a background job
/// could tolerate.
pub const INTERACTIVE_BACKOFF: BackoffPolicy =
    BackoffPolicy { base_delay_ms: 150, max_delay_ms: 2_000, min_delay_ms: 0, jitter_fraction: 0.2 };
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Calls `llm.complete(req, cancel)`, retrying with jittered backoff on
/// `LlmError::Transient` up to `DEFAULT_MAX_ATTEMPTS` times. `Permanent`
/// and `Cancelled` return immediately on the first attempt.
pub async fn complete_with_retries(
    llm: &dyn LlmBackend,
    req: CompletionRequest,
    cancel: CancellationToken,
) -> Result<CompletionResponse, LlmError> {
    complete_with_policy(llm, req, cancel, &INTERACTIVE_BACKOFF, DEFAULT_MAX_ATTEMPTS).await
}

/// Same as [`complete_with_retries`] but with an explicit policy and
/// attempt ceiling, for callers (and tests) that need to tune either.
pub async fn complete_with_policy(
    llm: &dyn LlmBackend,
    req: CompletionRequest,
    cancel: CancellationToken,
    policy: &BackoffPolicy,
    max_attempts: u32,
) -> Result<CompletionResponse, LlmError> {
    run_with_retries(
        || {
            let req = req.clone();
            let cancel = cancel.clone();
            async move { llm.complete(req, cancel).await }
        },
        max_attempts,
        |err: &LlmError| matches!(err, LlmError::Transient(_)),
        policy,
        None::<fn(u32, &LlmError) -> u64>,
        Some(|attempt, err: &LlmError, delay_ms| {
            tracing::warn!(attempt, %err, delay_ms, "retrying transient LLM failure");
        }),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use vigil_core::llm::{ChatMessage, ModelRole};

    struct FlakyThenOk(AtomicU32);

    #[async_trait::async_trait]
    impl LlmBackend for FlakyThenOk {
        async fn complete(&self, _req: CompletionRequest, _cancel: CancellationToken) -> Result<CompletionResponse, LlmError> {
            if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(LlmError::Transient("rate limited".into()))
            } else {
                Ok(CompletionResponse { text: "ok".into() })
            }
        }
    }

    fn req() -> CompletionRequest {
        CompletionRequest { role: ModelRole::Fast, messages: vec![ChatMessage { role: "user".into(), content: "hi".into() }], max_steps: 1 }
    }

    fn fast_policy() -> BackoffPolicy {
        BackoffPolicy { base_delay_ms: 1, max_delay_ms: 2, min_delay_ms: 0, jitter_fraction: 0.0 }
    }

    #[tokio::test]
    async fn transient_failure_is_retried_until_success() {
        let llm = FlakyThenOk(AtomicU32::new(0));
        let result = complete_with_policy(&llm, req(), CancellationToken::new(), &fast_policy(), 3).await;
        assert_eq!(result.unwrap().text, "ok");
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        struct Counting(Arc<AtomicU32>);
        #[async_trait::async_trait]
        impl LlmBackend for Counting {
            async fn complete(&self, _req: CompletionRequest, _cancel: CancellationToken) -> Result<CompletionResponse, LlmError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::Permanent("bad request".into()))
            }
        }
        let backend = Counting(calls.clone());
        let result = complete_with_policy(&backend, req(), CancellationToken::new(), &fast_policy(), 3).await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1, "a permanent error must not be retried");
    }

    struct AlwaysTransient;
    #[async_trait::async_trait]
    impl LlmBackend for AlwaysTransient {
        async fn complete(&self, _req: CompletionRequest, _cancel: CancellationToken) -> Result<CompletionResponse, LlmError> {
            Err(LlmError::Transient("down".into()))
        }
    }

    #[tokio::test]
    async fn transient_failure_exhausts_attempts_and_returns_the_error() {
        let result = complete_with_policy(&AlwaysTransient, req(), CancellationToken::new(), &fast_policy(), 1).await;
        assert!(matches!(result, Err(LlmError::Transient(_))));
    }
}
