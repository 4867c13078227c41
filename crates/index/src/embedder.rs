use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;
    fn dimensions(&self) -> usize;
    fn model_id(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Provider-backed embedder
// ---------------------------------------------------------------------------

pub struct ProviderEmbedder {
    provider: Arc<dyn guardian_provider::Provider>,
    model_id: String,
}

impl ProviderEmbedder {
    pub fn new(provider: Arc<dyn guardian_provider::Provider>) -> Self {
        let model_id = format!("{}-embeddings", provider.name());
        Self { provider, model_id }
    }
}

#[async_trait]
impl Embedder for ProviderEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.provider.embed(texts).await
    }

    fn dimensions(&self) -> usize {
        self.provider.embedding_dimensions()
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ---------------------------------------------------------------------------
// Feature-hashing embedder (no API needed; deterministic)
// ---------------------------------------------------------------------------

const HASH_DIMS: usize = 384;

pub struct HashEmbedder;

impl HashEmbedder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_embed(t)).collect())
    }

    fn dimensions(&self) -> usize {
        HASH_DIMS
    }

    fn model_id(&self) -> &str {
        "feature-hash-384"
    }
}

fn hash_embed(text: &str) -> Vec<f32> {
    let mut vec = vec![0.0f32; HASH_DIMS];
    let tokens = tokenize(text);
    if tokens.is_empty() {
        return vec;
    }

    let mut tf: HashMap<String, f32> = HashMap::new();
    for tok in &tokens {
        *tf.entry(tok.clone()).or_default() += 1.0;
    }
    let total = tokens.len() as f32;
    for val in tf.values_mut() {
        *val /= total;
    }

    for (tok, weight) in &tf {
        let h = simple_hash(tok);
        let idx = (h as usize) % HASH_DIMS;
        let sign = if (h >> 16) & 1 == 0 { 1.0 } else { -1.0 };
        vec[idx] += sign * weight;

        let idx2 = ((h >> 8) as usize) % HASH_DIMS;
        let sign2 = if (h >> 24) & 1 == 0 { 1.0 } else { -1.0 };
        vec[idx2] += sign2 * weight * 0.5;
    }

    let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 1e-10 {
        for v in &mut vec {
            *v /= norm;
        }
    }

    vec
}

pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            current.push(ch.to_ascii_lowercase());
        } else if !current.is_empty() {
            split_camel(&current, &mut tokens);
            current.clear();
        }
    }
    if !current.is_empty() {
        split_camel(&current, &mut tokens);
    }

    tokens.retain(|t| t.len() >= 2 && !is_stop(t));
    tokens
}

fn split_camel(word: &str, out: &mut Vec<String>) {
    out.push(word.to_string());
    let chars: Vec<char> = word.chars().collect();
    let mut start = 0;
    for i in 1..chars.len() {
        if chars[i].is_uppercase() && !chars[i - 1].is_uppercase() {
            let part: String = chars[start..i].iter().collect();
            if part.len() >= 2 {
                out.push(part.to_lowercase());
            }
            start = i;
        }
    }
    if start > 0 && start < chars.len() {
        let part: String = chars[start..].iter().collect();
        if part.len() >= 2 {
            out.push(part.to_lowercase());
        }
    }
}

fn simple_hash(s: &str) -> u32 {
    let mut h: u32 = 5381;
    for b in s.bytes() {
        h = h.wrapping_mul(33).wrapping_add(b as u32);
    }
    h
}

fn is_stop(word: &str) -> bool {
    matches!(
        word,
        "the"
            | "is"
            | "at"
            | "in"
            | "of"
            | "on"
            | "to"
            | "and"
            | "or"
            | "an"
            | "it"
            | "if"
            | "do"
            | "no"
            | "as"
            | "be"
            | "by"
            | "we"
            | "so"
            | "up"
            | "for"
            | "not"
            | "but"
            | "you"
            | "all"
            | "can"
            | "has"
            | "this"
            | "that"
            | "with"
            | "from"
            | "they"
            | "been"
            | "have"
            | "will"
            | "shall"
            | "must"
            | "use"
            | "new"
            | "get"
            | "set"
            | "let"
            | "var"
            | "mut"
            | "pub"
            | "fn"
            | "mod"
            | "return"
            | "true"
            | "false"
            | "self"
            | "none"
            | "type"
            | "default"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_embed_is_normalized() {
        let vec = hash_embed("def authenticate(user, password): return check(password)");
        assert_eq!(vec.len(), HASH_DIMS);
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01 || norm < 0.01);
    }

    #[test]
    fn hash_embed_is_deterministic() {
        let a = hash_embed("hardcoded credentials in source");
        let b = hash_embed("hardcoded credentials in source");
        assert_eq!(a, b);
    }

    #[test]
    fn related_texts_score_closer() {
        let a = hash_embed("API_KEY = \"secret\" # hardcoded credential");
        let b = hash_embed("SECRET_KEY = \"abc\" # credential in source");
        let c = hash_embed("render the navigation sidebar component");
        let sim_ab = cosine(&a, &b);
        let sim_ac = cosine(&a, &c);
        assert!(
            sim_ab > sim_ac,
            "related texts should score higher: {sim_ab} vs {sim_ac}"
        );
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if na < 1e-10 || nb < 1e-10 {
            0.0
        } else {
            dot / (na * nb)
        }
    }
}
