pub mod types;

pub mod gemini;
pub mod openai;

mod error;

pub use error::ProviderError;
pub use types::*;

use anyhow::Result;
use async_trait::async_trait;

/// The only place that knows about a concrete LLM transport. `chat` and
/// `embed` are the whole surface the rest of the pipeline sees.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    fn supported_models(&self) -> &[ModelInfo];
    fn default_model(&self) -> &str;
    fn embedding_dimensions(&self) -> usize;

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;
}

pub fn create_provider(
    name: &str,
    config: &guardian_config::Config,
) -> Result<Box<dyn Provider>> {
    let entry = config.provider.entry(name);
    let def = guardian_config::find_provider_def(name)
        .ok_or_else(|| guardian_config::ConfigError::UnknownProvider(name.to_string()))?;

    let api_key = guardian_config::resolve_api_key(name, entry).ok_or(
        guardian_config::ConfigError::MissingCredential {
            provider: name.to_string(),
            env_var: def.env_var,
        },
    )?;

    let base_url = entry
        .and_then(|e| e.base_url.clone())
        .or_else(|| Some(def.default_base_url.to_string()));
    let model = entry.and_then(|e| e.model.clone());
    let embedding_model = entry.and_then(|e| e.embedding_model.clone());
    tracing::debug!(provider = name, style = def.api_style, "creating provider");

    match def.api_style {
        "gemini" => Ok(Box::new(
            gemini::GeminiProvider::new(api_key, base_url, model)
                .with_embedding_model(embedding_model),
        )),
        "openai" => Ok(Box::new(
            openai::OpenAIProvider::new(api_key, base_url, model)
                .with_embedding_model(embedding_model),
        )),
        other => anyhow::bail!("Unsupported api_style '{other}' for provider '{name}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gemini_is_default_model_source() {
        let provider = gemini::GeminiProvider::new("k".into(), None, None);
        assert_eq!(provider.name(), "gemini");
        assert_eq!(provider.default_model(), "gemini-2.5-flash");
        assert_eq!(provider.embedding_dimensions(), 768);
        assert!(!provider.supported_models().is_empty());
    }

    #[test]
    fn openai_model_override() {
        let provider =
            openai::OpenAIProvider::new("k".into(), None, Some("gpt-4.1".into()));
        assert_eq!(provider.default_model(), "gpt-4.1");
        assert_eq!(provider.embedding_dimensions(), 1536);
    }

    #[test]
    fn create_provider_requires_credentials() {
        let config = guardian_config::Config::default();
        // No key in config; only fails when the env var is also absent.
        if std::env::var("GOOGLE_API_KEY").is_err() {
            assert!(create_provider("gemini", &config).is_err());
        }
        assert!(create_provider("unknown", &config).is_err());
    }
}
