//! Cross-provider failover: an ordered candidate chain walked with
//! classify-and-retry semantics and bounded total attempts.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use llmgate_provider_core::{UpstreamError, UpstreamErrorKind};

/// Static fallback priority. The primary gateway always goes first; these
/// follow in order, filtered to gateways that can serve the model.
pub const FALLBACK_CHAIN: &[&str] = &[
    "huggingface",
    "featherless",
    "fireworks",
    "together",
    "deepinfra",
    "groq",
    "alibaba-cloud",
    "google-vertex",
    "openrouter",
];

/// Total upstream attempts per request, across all candidates.
pub const MAX_ATTEMPTS: u32 = 4;

const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_secs(2);
const JITTER_FRACTION: f64 = 0.2;

/// Candidate order for one request: primary first, then every fallback
/// gateway that is registered and can serve the model.
pub fn candidate_gateways(
    primary: &str,
    registered: impl Fn(&str) -> bool,
    supports_model: impl Fn(&str) -> bool,
) -> Vec<String> {
    let mut out = vec![primary.to_string()];
    for gateway in FALLBACK_CHAIN {
        if *gateway != primary && registered(gateway) && supports_model(gateway) {
            out.push(gateway.to_string());
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Caller mistakes and auth problems are never retried.
    Fatal,
    /// Skip straight to the next candidate.
    NextImmediately,
    /// Back off, then move on.
    NextAfterBackoff,
}

pub fn classify_failure(err: &UpstreamError) -> FailureAction {
    match err.kind {
        UpstreamErrorKind::Auth | UpstreamErrorKind::Validation | UpstreamErrorKind::NotFound => {
            FailureAction::Fatal
        }
        UpstreamErrorKind::RateLimit => FailureAction::NextImmediately,
        UpstreamErrorKind::BadGateway | UpstreamErrorKind::Timeout => {
            FailureAction::NextAfterBackoff
        }
        UpstreamErrorKind::Unknown => {
            if err.retryable {
                FailureAction::NextAfterBackoff
            } else {
                FailureAction::NextImmediately
            }
        }
    }
}

/// Exponential backoff `base · 2^attempt`, capped, with ±20% jitter.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE.saturating_mul(1u32 << attempt.min(16));
    let capped = exp.min(BACKOFF_CAP).as_secs_f64();
    let jitter = rand::rng().random_range(-JITTER_FRACTION..=JITTER_FRACTION);
    Duration::from_secs_f64(capped * (1.0 + jitter))
}

#[derive(Debug)]
pub struct FailoverOutcome<T> {
    pub value: T,
    pub gateway: String,
    pub attempts: u32,
}

/// Walk the candidate list, classifying each failure. Surfaces fatal
/// errors immediately and the last error on exhaustion.
pub async fn run_with_failover<T, F, Fut>(
    candidates: &[String],
    mut invoke: F,
) -> Result<FailoverOutcome<T>, UpstreamError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let mut attempts = 0u32;
    let mut last_error: Option<UpstreamError> = None;

    for gateway in candidates {
        if attempts >= MAX_ATTEMPTS {
            break;
        }
        attempts += 1;
        match invoke(gateway.clone()).await {
            Ok(value) => {
                return Ok(FailoverOutcome {
                    value,
                    gateway: gateway.clone(),
                    attempts,
                });
            }
            Err(err) => match classify_failure(&err) {
                FailureAction::Fatal => return Err(err),
                FailureAction::NextImmediately => {
                    tracing::debug!(gateway, error = %err, "skipping to next candidate");
                    last_error = Some(err);
                }
                FailureAction::NextAfterBackoff => {
                    tracing::debug!(gateway, error = %err, "backing off before next candidate");
                    tokio::time::sleep(backoff_delay(attempts - 1)).await;
                    last_error = Some(err);
                }
            },
        }
    }

    Err(last_error.unwrap_or_else(|| UpstreamError {
        provider: "gateway".to_string(),
        kind: UpstreamErrorKind::Unknown,
        http_status: None,
        retryable: false,
        message: "no candidate provider available".to_string(),
        retry_after: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn err(kind: UpstreamErrorKind, retryable: bool) -> UpstreamError {
        UpstreamError {
            provider: "p".into(),
            kind,
            http_status: None,
            retryable,
            message: "x".into(),
            retry_after: None,
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn candidates_start_with_primary_and_skip_duplicates() {
        let out = candidate_gateways("fireworks", |_| true, |_| true);
        assert_eq!(out[0], "fireworks");
        assert_eq!(out.iter().filter(|g| g.as_str() == "fireworks").count(), 1);
        assert!(out.len() == FALLBACK_CHAIN.len());
    }

    #[test]
    fn candidates_filter_unsupported() {
        let out = candidate_gateways("cerebras", |_| true, |g| g == "groq");
        assert_eq!(out, names(&["cerebras", "groq"]));
    }

    #[tokio::test]
    async fn auth_failures_stop_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result = run_with_failover(&names(&["a", "b", "c"]), move |_| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(err(UpstreamErrorKind::Auth, false))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn validation_failures_stop_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let _ = run_with_failover(&names(&["a", "b"]), move |_| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(err(UpstreamErrorKind::Validation, false))
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn bad_gateway_advances_to_next_candidate() {
        let result = run_with_failover(&names(&["fireworks", "together"]), |gateway| async move {
            if gateway == "fireworks" {
                Err(err(UpstreamErrorKind::BadGateway, true))
            } else {
                Ok(gateway)
            }
        })
        .await
        .unwrap();
        assert_eq!(result.gateway, "together");
        assert_eq!(result.value, "together");
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test]
    async fn rate_limit_skips_without_backoff() {
        let started = std::time::Instant::now();
        let result = run_with_failover(&names(&["a", "b"]), |gateway| async move {
            if gateway == "a" {
                Err(err(UpstreamErrorKind::RateLimit, true))
            } else {
                Ok(gateway)
            }
        })
        .await
        .unwrap();
        assert_eq!(result.gateway, "b");
        // No backoff sleep on the rate-limit path.
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let many: Vec<String> = (0..10).map(|i| format!("g{i}")).collect();
        let result = run_with_failover(&many, move |_| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(err(UpstreamErrorKind::BadGateway, true))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[test]
    fn backoff_respects_cap_and_jitter() {
        for attempt in 0..10 {
            let delay = backoff_delay(attempt);
            assert!(delay <= Duration::from_secs_f64(2.0 * 1.2 + f64::EPSILON));
        }
        let first = backoff_delay(0);
        assert!(first >= Duration::from_millis(200));
        assert!(first <= Duration::from_millis(300));
    }
}
