use guardian_provider::ProviderError;

/// Error taxonomy for the pipeline. Tool-layer errors never escape
/// [`Orchestrator::run`](crate::orchestrator::Orchestrator::run); they are
/// recorded as `tool_failed` observations with the `kind()` label.
#[derive(Debug, thiserror::Error)]
pub enum GuardianError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unparseable model output: {0}")]
    Parse(String),

    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("ingest error: {0}")]
    Ingest(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl GuardianError {
    /// Stable label used in `tool_failed` events and failure markers.
    pub fn kind(&self) -> &'static str {
        match self {
            GuardianError::Configuration(_) => "configuration",
            GuardianError::Transport(_) => "transport",
            GuardianError::Parse(_) => "parse",
            GuardianError::RateLimit(_) => "rate_limit",
            GuardianError::Ingest(_) => "ingest",
            GuardianError::Cancelled => "cancelled",
        }
    }

    /// Collapse an arbitrary tool error into the taxonomy, preserving the
    /// provider classification where one exists.
    pub fn from_tool_error(err: &anyhow::Error) -> Self {
        if let Some(g) = err.downcast_ref::<GuardianError>() {
            return match g {
                GuardianError::Configuration(m) => GuardianError::Configuration(m.clone()),
                GuardianError::Transport(m) => GuardianError::Transport(m.clone()),
                GuardianError::Parse(m) => GuardianError::Parse(m.clone()),
                GuardianError::RateLimit(m) => GuardianError::RateLimit(m.clone()),
                GuardianError::Ingest(m) => GuardianError::Ingest(m.clone()),
                GuardianError::Cancelled => GuardianError::Cancelled,
            };
        }
        if let Some(p) = err.downcast_ref::<ProviderError>() {
            return match p {
                ProviderError::RateLimited { .. } => GuardianError::RateLimit(p.to_string()),
                _ => GuardianError::Transport(p.to_string()),
            };
        }
        GuardianError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(GuardianError::Cancelled.kind(), "cancelled");
        assert_eq!(GuardianError::Parse("x".into()).kind(), "parse");
        assert_eq!(GuardianError::Ingest("x".into()).kind(), "ingest");
    }

    #[test]
    fn provider_rate_limit_maps_to_rate_limit() {
        let err = anyhow::Error::new(ProviderError::RateLimited { retry_after_ms: 0 });
        assert_eq!(GuardianError::from_tool_error(&err).kind(), "rate_limit");
    }

    #[test]
    fn unknown_errors_become_transport() {
        let err = anyhow::anyhow!("connection reset");
        assert_eq!(GuardianError::from_tool_error(&err).kind(), "transport");
    }
}
