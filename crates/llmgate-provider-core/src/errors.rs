//! Upstream error taxonomy. Every provider failure is classified into one
//! of a small set of kinds that drive the failover engine's retry policy.

use std::time::Duration;

use crate::client::TransportErrorKind;
use crate::provider::Headers;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamErrorKind {
    Auth,
    RateLimit,
    BadGateway,
    NotFound,
    Timeout,
    Validation,
    Unknown,
}

impl UpstreamErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamErrorKind::Auth => "auth",
            UpstreamErrorKind::RateLimit => "rate_limit",
            UpstreamErrorKind::BadGateway => "bad_gateway",
            UpstreamErrorKind::NotFound => "not_found",
            UpstreamErrorKind::Timeout => "timeout",
            UpstreamErrorKind::Validation => "validation",
            UpstreamErrorKind::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("upstream {provider} failed ({}): {message}", kind.as_str())]
pub struct UpstreamError {
    pub provider: String,
    pub kind: UpstreamErrorKind,
    pub http_status: Option<u16>,
    pub retryable: bool,
    pub message: String,
    /// Upstream-supplied cooldown, when a 429 carried `Retry-After`.
    pub retry_after: Option<Duration>,
}

impl UpstreamError {
    /// Classify an HTTP error response from an upstream.
    pub fn from_status(provider: &str, status: u16, headers: &Headers, body: &[u8]) -> Self {
        let message = error_message_from_body(body);
        let (kind, retryable) = match status {
            401 | 403 => (UpstreamErrorKind::Auth, false),
            404 => (UpstreamErrorKind::NotFound, false),
            400 | 422 => (UpstreamErrorKind::Validation, false),
            429 => (UpstreamErrorKind::RateLimit, true),
            502 | 503 | 504 => (UpstreamErrorKind::BadGateway, true),
            500..=599 => (UpstreamErrorKind::Unknown, true),
            _ => (UpstreamErrorKind::Unknown, false),
        };
        let retry_after = (status == 429)
            .then(|| parse_retry_after(headers))
            .flatten();
        Self {
            provider: provider.to_string(),
            kind,
            http_status: Some(status),
            retryable,
            message,
            retry_after,
        }
    }

    /// Classify a transport-level failure (no HTTP response): socket, DNS,
    /// TLS, and timeouts are all retryable.
    pub fn from_transport(provider: &str, kind: TransportErrorKind, message: String) -> Self {
        let error_kind = match kind {
            TransportErrorKind::Timeout | TransportErrorKind::ReadTimeout => {
                UpstreamErrorKind::Timeout
            }
            _ => UpstreamErrorKind::BadGateway,
        };
        Self {
            provider: provider.to_string(),
            kind: error_kind,
            http_status: None,
            retryable: true,
            message,
            retry_after: None,
        }
    }

    pub fn decode(provider: &str, message: impl Into<String>) -> Self {
        Self {
            provider: provider.to_string(),
            kind: UpstreamErrorKind::Unknown,
            http_status: None,
            retryable: false,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Mid-stream termination without a final frame.
    pub fn stream_interrupted(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            kind: UpstreamErrorKind::Unknown,
            http_status: None,
            retryable: true,
            message: "upstream stream ended unexpectedly".to_string(),
            retry_after: None,
        }
    }
}

/// Pull a human-readable message out of an upstream error body without
/// echoing the whole payload (which may include request content).
fn error_message_from_body(body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        for path in [&["error", "message"][..], &["message"][..], &["detail"][..]] {
            let mut cursor = &value;
            let mut found = true;
            for key in path {
                match cursor.get(key) {
                    Some(next) => cursor = next,
                    None => {
                        found = false;
                        break;
                    }
                }
            }
            if found && let Some(text) = cursor.as_str() {
                return truncate(text, 512);
            }
        }
    }
    match std::str::from_utf8(body) {
        Ok(text) if !text.trim().is_empty() => truncate(text.trim(), 512),
        _ => "upstream error".to_string(),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// Parse `Retry-After` as either delta-seconds or an HTTP date.
pub fn parse_retry_after(headers: &Headers) -> Option<Duration> {
    let value = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
        .map(|(_, value)| value.trim())?;
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = httpdate::parse_http_date(value).ok()?;
    at.duration_since(std::time::SystemTime::now()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        let cases = [
            (401, UpstreamErrorKind::Auth, false),
            (404, UpstreamErrorKind::NotFound, false),
            (400, UpstreamErrorKind::Validation, false),
            (429, UpstreamErrorKind::RateLimit, true),
            (502, UpstreamErrorKind::BadGateway, true),
            (503, UpstreamErrorKind::BadGateway, true),
            (504, UpstreamErrorKind::BadGateway, true),
            (500, UpstreamErrorKind::Unknown, true),
        ];
        for (status, kind, retryable) in cases {
            let err = UpstreamError::from_status("groq", status, &Vec::new(), b"{}");
            assert_eq!(err.kind, kind, "status {status}");
            assert_eq!(err.retryable, retryable, "status {status}");
            assert_eq!(err.http_status, Some(status));
        }
    }

    #[test]
    fn transport_failures_are_retryable() {
        let err = UpstreamError::from_transport("together", TransportErrorKind::Dns, "no host".into());
        assert!(err.retryable);
        assert_eq!(err.kind, UpstreamErrorKind::BadGateway);

        let err = UpstreamError::from_transport("together", TransportErrorKind::Timeout, "t".into());
        assert_eq!(err.kind, UpstreamErrorKind::Timeout);
    }

    #[test]
    fn message_extraction_prefers_nested_error() {
        let body = br#"{"error":{"message":"model overloaded","type":"server_error"}}"#;
        let err = UpstreamError::from_status("fireworks", 503, &Vec::new(), body);
        assert_eq!(err.message, "model overloaded");
    }

    #[test]
    fn retry_after_seconds() {
        let headers = vec![("Retry-After".to_string(), "12".to_string())];
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(12)));
        let err = UpstreamError::from_status("groq", 429, &headers, b"");
        assert_eq!(err.retry_after, Some(Duration::from_secs(12)));
    }
}
