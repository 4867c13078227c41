use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing API key for provider '{provider}': set {env_var} or provider.{provider}.api_key")]
    MissingCredential {
        provider: String,
        env_var: &'static str,
    },

    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("invalid option: {0}")]
    InvalidOption(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub audit: AuditSettings,
    #[serde(default)]
    pub index: IndexSettings,
    #[serde(default)]
    pub corpus: CorpusSettings,
}

#[derive(Debug, Clone)]
pub struct ProviderDef {
    pub id: &'static str,
    pub name: &'static str,
    pub env_var: &'static str,
    pub default_base_url: &'static str,
    pub api_style: &'static str,
}

pub const BUILT_IN_PROVIDERS: &[ProviderDef] = &[
    ProviderDef {
        id: "gemini",
        name: "Google Gemini",
        env_var: "GOOGLE_API_KEY",
        default_base_url: "https://generativelanguage.googleapis.com/v1beta",
        api_style: "gemini",
    },
    ProviderDef {
        id: "openai",
        name: "OpenAI",
        env_var: "OPENAI_API_KEY",
        default_base_url: "https://api.openai.com/v1",
        api_style: "openai",
    },
];

pub fn find_provider_def(id: &str) -> Option<&'static ProviderDef> {
    BUILT_IN_PROVIDERS.iter().find(|p| p.id == id)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider")]
    pub default: String,
    #[serde(default, flatten)]
    pub providers: HashMap<String, ProviderEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub embedding_model: Option<String>,
    pub max_tokens: Option<u32>,
}

impl ProviderConfig {
    pub fn entry(&self, name: &str) -> Option<&ProviderEntry> {
        self.providers.get(name)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            default: default_provider(),
            providers: HashMap::new(),
        }
    }
}

/// Resolve the API key for a provider: explicit config wins, then the
/// provider's environment variable.
pub fn resolve_api_key(provider: &str, entry: Option<&ProviderEntry>) -> Option<String> {
    if let Some(key) = entry.and_then(|e| e.api_key.clone()) {
        return Some(key);
    }
    find_provider_def(provider).and_then(|def| std::env::var(def.env_var).ok())
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_secs() -> f64 {
    1.0
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_request_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: f64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_secs: default_backoff_base_secs(),
            max_backoff_ms: default_max_backoff_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_chunk_lines() -> usize {
    30
}

fn default_workers() -> usize {
    3
}

fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

fn default_candidate_cap() -> usize {
    50
}

fn default_retrieval_k() -> usize {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSettings {
    /// Lines per chunk for the exhaustive scan. Clamped to 20..=40.
    #[serde(default = "default_chunk_lines")]
    pub chunk_lines: usize,
    /// Parallel analysis workers. Free-tier quotas want the default of 3.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Hybrid pass-2 candidate file cap.
    #[serde(default = "default_candidate_cap")]
    pub candidate_cap: usize,
    #[serde(default = "default_retrieval_k")]
    pub retrieval_k: usize,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            chunk_lines: default_chunk_lines(),
            workers: default_workers(),
            max_file_bytes: default_max_file_bytes(),
            candidate_cap: default_candidate_cap(),
            retrieval_k: default_retrieval_k(),
        }
    }
}

impl AuditSettings {
    pub fn effective_chunk_lines(&self) -> usize {
        self.chunk_lines.clamp(20, 40)
    }

    pub fn effective_workers(&self) -> usize {
        self.workers.clamp(1, 20)
    }
}

fn default_chunk_chars() -> usize {
    1000
}

fn default_overlap_chars() -> usize {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSettings {
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
    /// Embedding backend: "api", "hash", or "auto" (api when a key exists).
    #[serde(default)]
    pub embedding: String,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            chunk_chars: default_chunk_chars(),
            overlap_chars: default_overlap_chars(),
            embedding: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusSettings {
    /// Persist ingested regulatory documents across runs. Off by default;
    /// callers opt in explicitly.
    #[serde(default)]
    pub persist: bool,
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for CorpusSettings {
    fn default() -> Self {
        Self {
            persist: false,
            dir: None,
        }
    }
}

impl CorpusSettings {
    pub fn effective_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| Config::data_dir().join("corpus"))
    }
}

fn default_provider() -> String {
    "gemini".to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Environment variables override file values.
    fn apply_env(&mut self) {
        if let Ok(model) = std::env::var("GUARDIAN_MODEL") {
            if !model.trim().is_empty() {
                tracing::debug!(%model, "model override from GUARDIAN_MODEL");
                let entry = self
                    .provider
                    .providers
                    .entry(self.provider.default.clone())
                    .or_default();
                entry.model = Some(model);
            }
        }
    }

    pub fn verbose_from_env() -> bool {
        std::env::var("GUARDIAN_VERBOSE")
            .map(|v| matches!(v.trim(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false)
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("guardian")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("guardian")
    }

    pub fn ensure_dirs() -> Result<()> {
        std::fs::create_dir_all(Self::config_dir())?;
        std::fs::create_dir_all(Self::data_dir())?;
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();
        Self::ensure_dirs()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&path, content).context("Failed to write config file")?;
        Ok(())
    }

    pub fn load_project(project_root: &std::path::Path) -> Result<Option<Self>> {
        let path = project_root.join(".guardian").join("config.toml");
        if path.exists() {
            let content =
                std::fs::read_to_string(&path).context("Failed to read project config")?;
            let config: Config =
                toml::from_str(&content).context("Failed to parse project config")?;
            Ok(Some(config))
        } else {
            Ok(None)
        }
    }
}
