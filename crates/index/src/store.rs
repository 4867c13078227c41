use std::collections::HashMap;

use crate::embedder::tokenize;

#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub file_path: String,
    pub file_name: String,
    pub extension: String,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub score: f32,
    pub text: String,
}

const MIN_SCORE: f32 = 0.05;
const PER_FILE_CAP: usize = 3;
const KEYWORD_BOOST: f32 = 0.15;

/// Single-writer in-memory vector store. One instance backs one repository
/// index; it is built once and then only read.
#[derive(Default)]
pub struct VectorStore {
    records: Vec<ChunkRecord>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ChunkRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn file_count(&self) -> usize {
        let mut files: Vec<&str> = self.records.iter().map(|r| r.file_path.as_str()).collect();
        files.sort_unstable();
        files.dedup();
        files.len()
    }

    pub fn contains_file(&self, file_path: &str) -> bool {
        self.records.iter().any(|r| r.file_path == file_path)
    }

    /// Cosine similarity with a keyword boost for query tokens appearing in
    /// the chunk text. At most [`PER_FILE_CAP`] results per file; ties broken
    /// by path then line for deterministic output.
    pub fn search(&self, query_vec: &[f32], query_text: &str, limit: usize) -> Vec<SearchResult> {
        if self.records.is_empty() || limit == 0 {
            return vec![];
        }

        let query_tokens = tokenize(query_text);

        let mut scored: Vec<(usize, f32)> = self
            .records
            .iter()
            .enumerate()
            .map(|(i, rec)| {
                let mut score = cosine_similarity(query_vec, &rec.embedding);
                if !query_tokens.is_empty() {
                    let text_lower = rec.text.to_lowercase();
                    let hits = query_tokens
                        .iter()
                        .filter(|t| text_lower.contains(t.as_str()))
                        .count();
                    score += (hits as f32 / query_tokens.len() as f32) * KEYWORD_BOOST;
                }
                (i, score)
            })
            .filter(|(_, s)| *s > MIN_SCORE)
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let ra = &self.records[a.0];
                    let rb = &self.records[b.0];
                    ra.file_path
                        .cmp(&rb.file_path)
                        .then(ra.start_line.cmp(&rb.start_line))
                })
        });

        let mut results = Vec::new();
        let mut seen_files: HashMap<&str, usize> = HashMap::new();

        for (idx, score) in scored {
            let rec = &self.records[idx];
            let count = seen_files.entry(rec.file_path.as_str()).or_insert(0);
            if *count >= PER_FILE_CAP {
                continue;
            }
            *count += 1;

            results.push(SearchResult {
                file_path: rec.file_path.clone(),
                start_line: rec.start_line,
                end_line: rec.end_line,
                score,
                text: rec.text.clone(),
            });

            if results.len() >= limit {
                break;
            }
        }

        results
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        0.0
    } else {
        dot / denom
    }
}
