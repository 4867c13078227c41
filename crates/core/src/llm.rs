use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use guardian_config::RetrySettings;
use guardian_provider::{ChatRequest, Message, Provider, ProviderError};
use rand::Rng;

/// Temperature for planning and synthesis calls.
pub const TEMP_DETERMINISTIC: f32 = 0.0;
/// Temperature for auditor analysis calls.
pub const TEMP_ANALYSIS: f32 = 0.1;

/// Output cap sized to hold a JSON array of roughly fifty violation
/// records in one chunk response.
pub const MAX_OUTPUT_TOKENS: u32 = 8192;

/// The pipeline's only path to the model: pins temperatures, applies the
/// per-call timeout, and retries retryable transport failures with
/// exponential backoff (`base * 2^attempt`, jittered, honoring any
/// server-provided retry-after).
pub struct LlmClient {
    provider: Arc<dyn Provider>,
    retry: RetrySettings,
    model_override: Option<String>,
}

impl LlmClient {
    pub fn new(provider: Arc<dyn Provider>, retry: RetrySettings) -> Self {
        Self {
            provider,
            retry,
            model_override: None,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model_override = model;
        self
    }

    pub fn model_name(&self) -> String {
        self.model_override
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }

    pub fn provider(&self) -> Arc<dyn Provider> {
        self.provider.clone()
    }

    pub async fn chat(
        &self,
        system: Option<&str>,
        prompt: &str,
        temperature: f32,
    ) -> Result<String> {
        let request = ChatRequest {
            model: self.model_override.clone().unwrap_or_default(),
            messages: vec![Message::user(prompt)],
            system: system.map(String::from),
            max_tokens: Some(MAX_OUTPUT_TOKENS),
            temperature: Some(temperature),
        };
        self.chat_request(&request).await
    }

    pub async fn chat_request(&self, request: &ChatRequest) -> Result<String> {
        let timeout = Duration::from_secs(self.retry.request_timeout_secs.max(1));
        let mut attempt: u32 = 0;

        loop {
            let outcome = match tokio::time::timeout(timeout, self.provider.chat(request)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(timeout.as_secs()).into()),
            };

            match outcome {
                Ok(response) => return Ok(response.text),
                Err(err) => {
                    let retryable = err
                        .downcast_ref::<ProviderError>()
                        .map(|p| p.is_retryable())
                        .unwrap_or(false);
                    if !retryable || attempt >= self.retry.max_retries {
                        return Err(err);
                    }
                    let wait = self.backoff_delay(&err, attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.retry.max_retries,
                        wait_ms = wait.as_millis() as u64,
                        "retrying model call: {err}"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }

    fn backoff_delay(&self, err: &anyhow::Error, attempt: u32) -> Duration {
        let server_hint = err
            .downcast_ref::<ProviderError>()
            .and_then(|p| p.retry_after_ms());
        let base_ms = (self.retry.backoff_base_secs * 1000.0) as u64;
        let exp_ms = base_ms.saturating_mul(1u64 << attempt.min(16));
        let mut wait_ms = server_hint.unwrap_or(exp_ms).min(self.retry.max_backoff_ms);
        // Jitter up to 10% keeps parallel workers from retrying in lockstep.
        let jitter = rand::rng().random_range(0..=wait_ms / 10 + 1);
        wait_ms += jitter;
        Duration::from_millis(wait_ms)
    }
}
