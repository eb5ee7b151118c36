//! Reliability primitives (§4.I): jittered exponential backoff and a
//! generic retry driver. Grounded on `skynet-channels/src/manager.rs`'s
//! `connect_with_backoff` (exponential delay capped at a ceiling, ±jitter,
//! bounded attempt count), generalized into a reusable policy object
//! instead of a one-off loop, and swapping its home-rolled
//! nanosecond-derived jitter for the `rand` crate.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// HTTP statuses worth retrying without inspecting the body.
pub fn is_transient_http_status(status: u16) -> bool {
    matches!(status, 408 | 409 | 425 | 429) || status >= 500
}

/// Parses a `Retry-After` header's decimal-seconds form, falling back to
/// `fallback_ms` when absent or unparsable.
pub fn parse_retry_after_ms(header: Option<&str>, fallback_ms: u64) -> u64 {
    header
        .and_then(|h| h.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(|secs| (secs * 1000.0).round() as u64)
        .unwrap_or(fallback_ms)
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub min_delay_ms: u64,
    pub jitter_fraction: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { base_delay_ms: 1_000, max_delay_ms: 60_000, min_delay_ms: 0, jitter_fraction: 0.1 }
    }
}

/// `clamp(min, base·2^attempt, max) + floor(exp·jitterFraction·rand())`.
pub fn compute_backoff_delay_ms(attempt: u32, policy: &BackoffPolicy) -> u64 {
    let exp = (policy.base_delay_ms as f64) * 2f64.powi(attempt as i32);
    let clamped = exp.clamp(policy.min_delay_ms as f64, policy.max_delay_ms as f64);
    let jitter = (clamped * policy.jitter_fraction * rand::thread_rng().gen::<f64>()).floor();
    (clamped + jitter) as u64
}

/// Retries `action` while `should_retry(&err)` holds and attempts remain.
/// `compute_retry_delay_ms` may override the default backoff delay (e.g.
/// to honor a `Retry-After` header); `on_retry` observes each retry before
/// the sleep.
pub async fn run_with_retries<T, E, F, Fut>(
    mut action: F,
    max_attempts: u32,
    should_retry: impl Fn(&E) -> bool,
    backoff: &BackoffPolicy,
    mut compute_retry_delay_ms: Option<impl FnMut(u32, &E) -> u64>,
    mut on_retry: Option<impl FnMut(u32, &E, u64)>,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        match action().await {
            Ok(v) => return Ok(v),
            Err(err) => {
                attempt += 1;
                if attempt >= max_attempts || !should_retry(&err) {
                    return Err(err);
                }
                let delay_ms = compute_retry_delay_ms
                    .as_mut()
                    .map(|f| f(attempt, &err))
                    .unwrap_or_else(|| compute_backoff_delay_ms(attempt, backoff));
                if let Some(cb) = on_retry.as_mut() {
                    cb(attempt, &err, delay_ms);
                }
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_clamps_to_max_delay() {
        let policy = BackoffPolicy { base_delay_ms: 1_000, max_delay_ms: 5_000, min_delay_ms: 0, jitter_fraction: 0.0 };
        let delay = compute_backoff_delay_ms(10, &policy);
        assert_eq!(delay, 5_000);
    }

    #[test]
    fn backoff_clamps_to_min_delay() {
        let policy = BackoffPolicy { base_delay_ms: 1, max_delay_ms: 60_000, min_delay_ms: 2_000, jitter_fraction: 0.0 };
        let delay = compute_backoff_delay_ms(0, &policy);
        assert_eq!(delay, 2_000);
    }

    #[test]
    fn transient_status_set_matches_spec() {
        assert!(is_transient_http_status(429));
        assert!(is_transient_http_status(500));
        assert!(is_transient_http_status(503));
        assert!(!is_transient_http_status(404));
        assert!(!is_transient_http_status(400));
    }

    #[test]
    fn retry_after_parses_decimal_seconds() {
        assert_eq!(parse_retry_after_ms(Some("2.5"), 1_000), 2_500);
        assert_eq!(parse_retry_after_ms(Some("not-a-number"), 1_000), 1_000);
        assert_eq!(parse_retry_after_ms(None, 1_000), 1_000);
    }

    #[tokio::test]
    async fn run_with_retries_stops_on_non_retriable_error() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), &'static str> = run_with_retries(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err("permanent") }
            },
            5,
            |_e: &&str| false,
            &BackoffPolicy::default(),
            None::<fn(u32, &&str) -> u64>,
            None::<fn(u32, &&str, u64)>,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_with_retries_stops_after_max_attempts() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), &'static str> = run_with_retries(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err("transient") }
            },
            3,
            |_e: &&str| true,
            &BackoffPolicy { base_delay_ms: 1, max_delay_ms: 2, min_delay_ms: 0, jitter_fraction: 0.0 },
            None::<fn(u32, &&str) -> u64>,
            None::<fn(u32, &&str, u64)>,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn run_with_retries_succeeds_on_a_later_attempt() {
        let attempts = AtomicU32::new(0);
        let result = run_with_retries(
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err("transient") } else { Ok::<_, &'static str>(42) } }
            },
            5,
            |_e: &&str| true,
            &BackoffPolicy { base_delay_ms: 1, max_delay_ms: 2, min_delay_ms: 0, jitter_fraction: 0.0 },
            None::<fn(u32, &&str) -> u64>,
            None::<fn(u32, &&str, u64)>,
        )
        .await;
        assert_eq!(result, Ok(42));
    }
}
