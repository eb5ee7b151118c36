//! `vigil-concurrency` — the per-chat serialization layer (§4.H) and the
//! reliability primitives (§4.I) that sit underneath every outbound call:
//! exclusive per-key execution, short-lived update dedupe, a single
//! pending reconnect timer per adapter, a refcounted typing-indicator
//! heartbeat, and jittered retry with backoff.

pub mod backoff;
pub mod dedupe;
pub mod llm_retry;
pub mod per_key_lock;
pub mod reconnect;
pub mod typing;

pub use backoff::{
    compute_backoff_delay_ms, is_transient_http_status, parse_retry_after_ms, run_with_retries,
    BackoffPolicy,
};
pub use dedupe::ShortLivedDedupeCache;
pub use llm_retry::{complete_with_policy, complete_with_retries, INTERACTIVE_BACKOFF};
pub use per_key_lock::PerKeyLock;
pub use reconnect::ReconnectGuard;
pub use typing::{TypingGuard, TypingSink, TypingTracker};
