use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use guardian_index::{Embedder, IndexOptions, RepoIndex};

use crate::events::{EventBus, Stage};
use crate::llm::{LlmClient, TEMP_DETERMINISTIC};
use crate::repo::RepoCheckout;

const RETRIEVAL_K: usize = 5;

pub const NO_CONTEXT_ANSWER: &str = "no relevant context found in repository";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaAnswer {
    pub answer: String,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QaSessionInfo {
    pub session_id: String,
    pub repo_url: String,
    pub repo_local_path: PathBuf,
    pub chunk_count: usize,
    pub doc_count: usize,
    pub created_at: DateTime<Utc>,
}

/// One repository's clone plus its index, built once and reused across
/// questions. The local path is owned exclusively by this session and is
/// removed when the session is closed or dropped.
pub struct QaSession {
    info: QaSessionInfo,
    checkout: RepoCheckout,
    index: RepoIndex,
}

impl QaSession {
    pub fn info(&self) -> &QaSessionInfo {
        &self.info
    }

    pub fn matches(&self, repo_url: &str) -> bool {
        self.info.repo_url == repo_url
    }

    pub fn close(self) {
        self.checkout.close();
    }
}

/// Builds sessions and answers questions against them. Session ownership
/// lives with the orchestrator; this engine is stateless.
pub struct QaEngine {
    pub llm: Arc<LlmClient>,
    pub embedder: Arc<dyn Embedder>,
    pub index_options: IndexOptions,
    pub events: EventBus,
}

impl QaEngine {
    pub async fn open_session(&self, repo_url: &str) -> Result<QaSession> {
        self.events
            .emit(Stage::RepoFetchStart, format!("cloning {repo_url}"));
        let checkout = RepoCheckout::clone(repo_url).await?;
        self.events
            .emit(Stage::RepoFetchDone, format!("cloned {repo_url}"));
        self.index_checkout(checkout).await
    }

    /// Session over an existing directory; cleanup stays with the caller.
    pub async fn open_session_local(&self, repo_url: &str, path: &Path) -> Result<QaSession> {
        let checkout = RepoCheckout::local(repo_url, path);
        self.index_checkout(checkout).await
    }

    async fn index_checkout(&self, checkout: RepoCheckout) -> Result<QaSession> {
        let index = RepoIndex::build(
            checkout.path(),
            self.embedder.clone(),
            &self.index_options,
        )
        .await?;
        let stats = index.stats();
        self.events.emit_with(
            Stage::IndexBuildDone,
            format!(
                "indexed {} files into {} chunks",
                stats.doc_count, stats.chunk_count
            ),
            Some(serde_json::json!({
                "doc_count": stats.doc_count,
                "chunk_count": stats.chunk_count,
            })),
        );

        let info = QaSessionInfo {
            session_id: uuid::Uuid::new_v4().to_string(),
            repo_url: checkout.url.clone(),
            repo_local_path: checkout.path().to_path_buf(),
            chunk_count: stats.chunk_count,
            doc_count: stats.doc_count,
            created_at: Utc::now(),
        };
        Ok(QaSession {
            info,
            checkout,
            index,
        })
    }

    /// Retrieval then one synthesis call. The answer may only cite retrieved
    /// files; `sources` is exactly the retrieved file set, stable-sorted.
    pub async fn ask(&self, session: &QaSession, question: &str) -> Result<QaAnswer> {
        let hits = session.index.search(question, RETRIEVAL_K).await?;
        if hits.is_empty() {
            return Ok(QaAnswer {
                answer: NO_CONTEXT_ANSWER.to_string(),
                sources: vec![],
            });
        }

        let mut context = String::new();
        for hit in &hits {
            context.push_str(&format!(
                "--- {} (lines {}-{}) ---\n{}\n\n",
                hit.file_path, hit.start_line, hit.end_line, hit.text
            ));
        }

        let prompt = format!(
            "Repository: {}\n\nRetrieved code context:\n{context}\
             Question: {question}\n\n\
             Answer from the context above only. When you reference code, name the file it \
             came from; never cite a file that is not in the context.",
            session.info.repo_url
        );
        let answer = self
            .llm
            .chat(
                Some("You answer questions about one repository from retrieved context only."),
                &prompt,
                TEMP_DETERMINISTIC,
            )
            .await?;

        let mut sources: Vec<String> = hits.iter().map(|h| h.file_path.clone()).collect();
        sources.sort();
        sources.dedup();

        Ok(QaAnswer { answer, sources })
    }
}
