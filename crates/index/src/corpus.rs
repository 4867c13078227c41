use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use anyhow::Result;
use rusqlite::{params, Connection};

use crate::store::cosine_similarity;

#[derive(Debug, Clone)]
pub struct CorpusChunk {
    pub hash: String,
    pub source_pdf: String,
    /// 1-based page number within the source document.
    pub page: usize,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct CorpusHit {
    pub source_pdf: String,
    pub page: usize,
    pub text: String,
    pub score: f32,
}

struct CorpusCache {
    hashes: Vec<String>,
    sources: Vec<String>,
    pages: Vec<usize>,
    texts: Vec<String>,
    embeddings: Vec<Vec<f32>>,
}

impl Default for CorpusCache {
    fn default() -> Self {
        Self {
            hashes: Vec::new(),
            sources: Vec::new(),
            pages: Vec::new(),
            texts: Vec::new(),
            embeddings: Vec::new(),
        }
    }
}

/// Append-only store of regulatory-document chunks keyed by content hash.
/// Re-ingesting the same document inserts nothing new. Reads run against an
/// in-memory cache; SQLite WAL makes concurrent ingest from separate
/// processes safe.
pub struct CorpusStore {
    conn: Mutex<Connection>,
    cache: RwLock<CorpusCache>,
    db_path: Option<PathBuf>,
}

impl CorpusStore {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let db_path = dir.join("corpus.db");
        let conn = Connection::open(&db_path)?;
        Self::init(conn, Some(db_path))
    }

    /// Ephemeral corpus for the default non-persistent configuration.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, db_path: Option<PathBuf>) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS chunks (
                hash TEXT PRIMARY KEY,
                source_pdf TEXT NOT NULL,
                page INTEGER NOT NULL,
                text TEXT NOT NULL,
                embedding BLOB,
                dims INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source_pdf);",
        )?;

        let store = Self {
            conn: Mutex::new(conn),
            cache: RwLock::new(CorpusCache::default()),
            db_path,
        };
        store.reload()?;
        Ok(store)
    }

    /// Insert chunks, skipping any whose content hash is already present.
    /// Returns the number actually inserted.
    pub fn add_chunks(&self, chunks: &[CorpusChunk], embeddings: &[Vec<f32>]) -> Result<usize> {
        let mut inserted = 0usize;
        {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "INSERT OR IGNORE INTO chunks (hash, source_pdf, page, text, embedding, dims)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (i, chunk) in chunks.iter().enumerate() {
                let embedding = embeddings.get(i);
                let blob: Option<Vec<u8>> =
                    embedding.map(|emb| emb.iter().flat_map(|f| f.to_le_bytes()).collect());
                let dims = embedding.map(|e| e.len()).unwrap_or(0);
                let n = stmt.execute(params![
                    chunk.hash,
                    chunk.source_pdf,
                    chunk.page as i64,
                    chunk.text,
                    blob,
                    dims as i64,
                ])?;
                inserted += n;
            }
        }
        if inserted > 0 {
            self.reload()?;
        }
        Ok(inserted)
    }

    fn reload(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT hash, source_pdf, page, text, embedding, dims FROM chunks
             WHERE embedding IS NOT NULL ORDER BY source_pdf, page, hash",
        )?;

        let mut cache = CorpusCache::default();
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)? as usize,
                row.get::<_, String>(3)?,
                row.get::<_, Vec<u8>>(4)?,
                row.get::<_, i64>(5)? as usize,
            ))
        })?;

        for row in rows {
            let (hash, source, page, text, blob, dims) = row?;
            if dims == 0 || blob.len() != dims * 4 {
                continue;
            }
            let embedding: Vec<f32> = blob
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            cache.hashes.push(hash);
            cache.sources.push(source);
            cache.pages.push(page);
            cache.texts.push(text);
            cache.embeddings.push(embedding);
        }

        *self.cache.write().unwrap() = cache;
        Ok(())
    }

    /// Top-k by cosine similarity, optionally restricted to one source
    /// document.
    pub fn search(
        &self,
        query_vec: &[f32],
        limit: usize,
        source_filter: Option<&str>,
    ) -> Vec<CorpusHit> {
        let cache = self.cache.read().unwrap();
        let mut scored: Vec<(usize, f32)> = cache
            .embeddings
            .iter()
            .enumerate()
            .filter(|(i, _)| source_filter.map(|s| cache.sources[*i] == s).unwrap_or(true))
            .map(|(i, emb)| (i, cosine_similarity(query_vec, emb)))
            .filter(|(_, s)| *s > 0.0)
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| cache.hashes[a.0].cmp(&cache.hashes[b.0]))
        });
        scored.truncate(limit);

        scored
            .into_iter()
            .map(|(i, score)| CorpusHit {
                source_pdf: cache.sources[i].clone(),
                page: cache.pages[i],
                text: cache.texts[i].clone(),
                score,
            })
            .collect()
    }

    pub fn chunk_count(&self) -> usize {
        self.cache.read().unwrap().hashes.len()
    }

    pub fn count_for_source(&self, source_pdf: &str) -> usize {
        let cache = self.cache.read().unwrap();
        cache.sources.iter().filter(|s| *s == source_pdf).count()
    }

    pub fn sources(&self) -> Vec<String> {
        let cache = self.cache.read().unwrap();
        let mut sources = cache.sources.clone();
        sources.sort();
        sources.dedup();
        sources
    }

    pub fn distribution_by_source(&self) -> HashMap<String, usize> {
        let cache = self.cache.read().unwrap();
        let mut dist = HashMap::new();
        for s in &cache.sources {
            *dist.entry(s.clone()).or_insert(0) += 1;
        }
        dist
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }
}
