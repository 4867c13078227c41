#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {status} - {body}")]
    HttpError { status: u16, body: String },

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Rate limited. Retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Context window exceeded: {0}")]
    ContextOverflow(String),
}

impl ProviderError {
    /// Classify an HTTP failure. A `Retry-After` header value (seconds) is
    /// honored for 429s; otherwise the caller's backoff schedule applies.
    pub fn from_http(status: u16, body: String, retry_after: Option<&str>) -> Self {
        match status {
            429 => {
                let retry_after_ms = retry_after
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(|secs| secs * 1000)
                    .unwrap_or(0);
                ProviderError::RateLimited { retry_after_ms }
            }
            _ if body.contains("context_length") || body.contains("token count exceeds") => {
                ProviderError::ContextOverflow(body)
            }
            _ => ProviderError::HttpError { status, body },
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. } | ProviderError::Timeout(_) => true,
            ProviderError::HttpError { status, .. } => {
                *status >= 500 || *status == 408 || *status == 409
            }
            _ => false,
        }
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimited { retry_after_ms } if *retry_after_ms > 0 => {
                Some(*retry_after_ms)
            }
            _ => None,
        }
    }
}
