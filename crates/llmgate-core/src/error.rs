//! Gateway-level error taxonomy and its HTTP mapping.

use llmgate_protocol::openai::ErrorBody;
use llmgate_provider_core::{UpstreamError, UpstreamErrorKind};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{0}")]
    Auth(String),
    #[error("{0}")]
    Quota(String),
    #[error("{message}")]
    RateLimited { message: String, retry_after_secs: u64 },
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Auth(_) => 401,
            GatewayError::Quota(_) => 402,
            GatewayError::RateLimited { .. } => 429,
            GatewayError::Validation(_) => 400,
            GatewayError::NotFound(_) => 404,
            GatewayError::Upstream(err) => match err.kind {
                UpstreamErrorKind::Timeout => 504,
                _ => 502,
            },
            GatewayError::Internal(_) => 500,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::Auth(_) => "authentication_error",
            GatewayError::Quota(_) => "insufficient_quota",
            GatewayError::RateLimited { .. } => "rate_limit_error",
            GatewayError::Validation(_) => "invalid_request_error",
            GatewayError::NotFound(_) => "not_found_error",
            GatewayError::Upstream(_) => "upstream_error",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            GatewayError::RateLimited { retry_after_secs, .. } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// The wire body. Internal errors are collapsed to a fixed message so
    /// upstream credentials and stack contents never leak.
    pub fn body(&self) -> ErrorBody {
        let code = match self {
            GatewayError::Upstream(err) => Some(err.kind.as_str()),
            _ => None,
        };
        let message = match self {
            GatewayError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        ErrorBody::new(message, self.error_type(), code)
    }
}

impl From<llmgate_storage::StorageError> for GatewayError {
    fn from(err: llmgate_storage::StorageError) -> Self {
        tracing::error!(error = %err, "storage failure");
        GatewayError::Internal("storage failure".to_string())
    }
}

impl From<llmgate_catalog::CatalogError> for GatewayError {
    fn from(err: llmgate_catalog::CatalogError) -> Self {
        match err {
            llmgate_catalog::CatalogError::UnknownGateway(name) => {
                GatewayError::NotFound(format!("unknown gateway: {name}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_mapping() {
        assert_eq!(GatewayError::Auth("no".into()).status_code(), 401);
        assert_eq!(GatewayError::Quota("broke".into()).status_code(), 402);
        assert_eq!(
            GatewayError::RateLimited { message: "slow down".into(), retry_after_secs: 9 }
                .status_code(),
            429
        );
        assert_eq!(GatewayError::Validation("bad".into()).status_code(), 400);
        assert_eq!(GatewayError::NotFound("missing".into()).status_code(), 404);
        assert_eq!(GatewayError::Internal("boom".into()).status_code(), 500);
    }

    #[test]
    fn upstream_timeout_maps_to_504() {
        let err = UpstreamError {
            provider: "groq".into(),
            kind: UpstreamErrorKind::Timeout,
            http_status: None,
            retryable: true,
            message: "deadline".into(),
            retry_after: None,
        };
        assert_eq!(GatewayError::Upstream(err).status_code(), 504);
    }

    #[test]
    fn internal_body_hides_detail() {
        let body = GatewayError::Internal("secret dsn".into()).body();
        assert_eq!(body.error.message, "internal error");
    }
}
