//! Scripted provider for exercising LLM-dependent paths without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use guardian_provider::{ChatRequest, ChatResponse, ModelInfo, Provider, ProviderError};

enum Scripted {
    Text(String),
    RateLimited,
    HttpError(u16, String),
}

pub struct MockProvider {
    script: Mutex<VecDeque<Scripted>>,
    default_text: Mutex<String>,
    calls: Arc<AtomicUsize>,
}

static MOCK_MODELS: &[ModelInfo] = &[ModelInfo {
    id: "mock-1",
    name: "Mock Model",
    context_window: 128_000,
    max_output_tokens: 8192,
}];

impl MockProvider {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_text: Mutex::new("{}".to_string()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue a literal text response.
    pub fn then_text(self, text: impl Into<String>) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Text(text.into()));
        self
    }

    /// Queue `n` consecutive 429 responses.
    pub fn rate_limited(self, n: usize) -> Self {
        {
            let mut script = self.script.lock().unwrap();
            for _ in 0..n {
                script.push_back(Scripted::RateLimited);
            }
        }
        self
    }

    pub fn http_error(self, status: u16, body: impl Into<String>) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::HttpError(status, body.into()));
        self
    }

    /// Response used once the script runs dry. Useful when many parallel
    /// chunk calls should all see the same answer.
    pub fn with_default_text(self, text: impl Into<String>) -> Self {
        *self.default_text.lock().unwrap() = text.into();
        self
    }

    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn supported_models(&self) -> &[ModelInfo] {
        MOCK_MODELS
    }

    fn default_model(&self) -> &str {
        "mock-1"
    }

    fn embedding_dimensions(&self) -> usize {
        8
    }

    async fn chat(&self, _request: &ChatRequest) -> Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Text(text)) => Ok(ChatResponse {
                text,
                usage: None,
                finish_reason: Some("stop".into()),
            }),
            Some(Scripted::RateLimited) => {
                Err(ProviderError::RateLimited { retry_after_ms: 0 }.into())
            }
            Some(Scripted::HttpError(status, body)) => {
                Err(ProviderError::from_http(status, body, None).into())
            }
            None => Ok(ChatResponse {
                text: self.default_text.lock().unwrap().clone(),
                usage: None,
                finish_reason: Some("stop".into()),
            }),
        }
    }

    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| cheap_embed(t)).collect())
    }
}

fn cheap_embed(text: &str) -> Vec<f32> {
    let mut vec = vec![0.0f32; 8];
    for (i, b) in text.bytes().enumerate() {
        vec[(i + b as usize) % 8] += (b % 17) as f32;
    }
    let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 1e-10 {
        for v in &mut vec {
            *v /= norm;
        }
    }
    vec
}
