//! Errors from the completion provider.

use thiserror::Error;

use crate::transport::FailureKind;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP 429. `retry_after_ms` comes from the `retry-after` header.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("credential rejected (status {status})")]
    Unauthorized { status: u16 },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("provider call timed out after {0}ms")]
    Timeout(u64),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Whether the same call could succeed if repeated later.
    ///
    /// Non-retryable failures still consume an attempt like any other; this
    /// only informs logging.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_) => true,
            Self::InvalidResponse(_) => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Unauthorized { .. } => false,
        }
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::RateLimited { .. } => FailureKind::RateLimited,
            Self::Unauthorized { .. } => FailureKind::Unauthorized,
            Self::Timeout(_) => FailureKind::Timeout,
            Self::Network(e) if e.is_timeout() => FailureKind::Timeout,
            Self::InvalidResponse(_) => FailureKind::InvalidResponse,
            Self::Api { .. } | Self::Network(_) => FailureKind::Provider,
        }
    }
}
