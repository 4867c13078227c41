pub mod chunker;
pub mod corpus;
pub mod embedder;
pub mod store;
pub mod walker;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

pub use chunker::TextChunk;
pub use corpus::{CorpusChunk, CorpusHit, CorpusStore};
pub use embedder::{Embedder, HashEmbedder, ProviderEmbedder};
pub use store::{ChunkRecord, SearchResult, VectorStore};
pub use walker::FileEntry;

#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub chunk_chars: usize,
    pub overlap_chars: usize,
    pub max_file_bytes: u64,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            chunk_chars: chunker::DEFAULT_CHUNK_CHARS,
            overlap_chars: chunker::DEFAULT_OVERLAP_CHARS,
            max_file_bytes: walker::DEFAULT_MAX_FILE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IndexStats {
    pub doc_count: usize,
    pub chunk_count: usize,
}

/// A built-once semantic index over one repository checkout. Chunk metadata
/// carries `{file_path, file_name, extension}` and 1-based line spans.
pub struct RepoIndex {
    store: VectorStore,
    embedder: Arc<dyn Embedder>,
    root: PathBuf,
    stats: IndexStats,
}

impl RepoIndex {
    pub async fn build(
        root: &Path,
        embedder: Arc<dyn Embedder>,
        options: &IndexOptions,
    ) -> Result<Self> {
        let entries = walker::walk_repository(root, options.max_file_bytes)?;
        let mut store = VectorStore::new();
        let mut doc_count = 0usize;

        for entry in &entries {
            let bytes = match std::fs::read(&entry.abs_path) {
                Ok(b) => b,
                Err(_) => continue,
            };
            let content = String::from_utf8_lossy(&bytes);
            let chunks = chunker::chunk_text(&content, options.chunk_chars, options.overlap_chars);
            if chunks.is_empty() {
                continue;
            }

            let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
            let embeddings = embedder.embed(&texts).await?;

            let file_name = entry
                .rel_path
                .rsplit('/')
                .next()
                .unwrap_or(&entry.rel_path)
                .to_string();
            let extension = Path::new(&entry.rel_path)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_string();

            for (chunk, embedding) in chunks.into_iter().zip(embeddings) {
                store.push(ChunkRecord {
                    file_path: entry.rel_path.clone(),
                    file_name: file_name.clone(),
                    extension: extension.clone(),
                    start_line: chunk.start_line,
                    end_line: chunk.end_line,
                    text: chunk.text,
                    embedding,
                });
            }
            doc_count += 1;
        }

        let stats = IndexStats {
            doc_count,
            chunk_count: store.len(),
        };
        tracing::debug!(
            docs = stats.doc_count,
            chunks = stats.chunk_count,
            root = %root.display(),
            "repository index built"
        );

        Ok(Self {
            store,
            embedder,
            root: root.to_path_buf(),
            stats,
        })
    }

    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let query_embedding = self.embedder.embed(&[query]).await?;
        let Some(query_vec) = query_embedding.first() else {
            return Ok(vec![]);
        };
        Ok(self.store.search(query_vec, query, limit))
    }

    pub fn stats(&self) -> IndexStats {
        self.stats
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn contains_file(&self, file_path: &str) -> bool {
        self.store.contains_file(file_path)
    }
}
