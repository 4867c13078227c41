pub mod pdf;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use guardian_index::walker::hash_content;
use guardian_index::{chunker, CorpusChunk, CorpusStore, Embedder};

use crate::llm::{LlmClient, TEMP_DETERMINISTIC};

const BRIEF_K: usize = 5;
const SOURCES_K: usize = 10;

pub const EMPTY_DOCUMENT_BRIEF: &str =
    "The document yielded no extractable text; no requirements could be derived.";

#[derive(Debug, Clone)]
pub struct IngestStats {
    pub source: String,
    pub pages: usize,
    pub chunks_added: usize,
    /// Chunks stored for this source after the ingest (dedup included).
    pub chunk_count: usize,
}

#[derive(Debug, Clone)]
pub enum QueryScope {
    /// Retrieval filtered to one ingested document.
    SinglePdf(String),
    AllPdfs,
    /// Corpus-wide with a larger k and per-source attribution.
    AllPdfsWithSources,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegalAnswer {
    pub answer: String,
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_distribution_by_source: Option<HashMap<String, usize>>,
}

/// RAG over regulatory documents: ingest PDFs into the corpus, answer
/// questions against it, and distill technical briefs for the auditor.
pub struct LegalAnalyst {
    llm: Arc<LlmClient>,
    embedder: Arc<dyn Embedder>,
    corpus: CorpusStore,
    chunk_chars: usize,
    overlap_chars: usize,
}

impl LegalAnalyst {
    pub fn new(llm: Arc<LlmClient>, embedder: Arc<dyn Embedder>, corpus: CorpusStore) -> Self {
        Self {
            llm,
            embedder,
            corpus,
            chunk_chars: chunker::DEFAULT_CHUNK_CHARS,
            overlap_chars: chunker::DEFAULT_OVERLAP_CHARS,
        }
    }

    pub fn corpus(&self) -> &CorpusStore {
        &self.corpus
    }

    /// Parse, chunk, embed, and store one PDF. Chunks are keyed by content
    /// hash, so re-ingesting the same file adds nothing.
    pub async fn ingest(&self, pdf_path: &Path) -> Result<IngestStats> {
        let source = pdf::source_name(pdf_path);
        let pages = pdf::extract_pages(pdf_path)?;
        let page_count = pages.len();

        let mut chunks: Vec<CorpusChunk> = Vec::new();
        for page in &pages {
            for chunk in chunker::chunk_text(&page.text, self.chunk_chars, self.overlap_chars) {
                let hash =
                    hash_content(format!("{source}\u{1}{}\u{1}{}", page.number, chunk.text).as_bytes());
                chunks.push(CorpusChunk {
                    hash,
                    source_pdf: source.clone(),
                    page: page.number,
                    text: chunk.text,
                });
            }
        }

        let chunks_added = if chunks.is_empty() {
            0
        } else {
            let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
            let embeddings = self.embedder.embed(&texts).await?;
            self.corpus.add_chunks(&chunks, &embeddings)?
        };

        let stats = IngestStats {
            chunk_count: self.corpus.count_for_source(&source),
            source,
            pages: page_count,
            chunks_added,
        };
        tracing::info!(
            source = %stats.source,
            pages = stats.pages,
            added = stats.chunks_added,
            "document ingested"
        );
        Ok(stats)
    }

    /// Produce the technical brief for one regulatory document: ingest it
    /// (idempotent), then distill developer-checkable requirements from the
    /// most relevant chunks.
    pub async fn brief(&self, pdf_path: &Path) -> Result<String> {
        let stats = self.ingest(pdf_path).await?;
        if stats.chunk_count == 0 {
            return Ok(EMPTY_DOCUMENT_BRIEF.to_string());
        }
        self.brief_for_source(&stats.source).await
    }

    pub async fn brief_for_source(&self, source: &str) -> Result<String> {
        if self.corpus.count_for_source(source) == 0 {
            return Ok(EMPTY_DOCUMENT_BRIEF.to_string());
        }

        let question =
            "All technical requirements, obligations, and prohibitions a software developer must verify in a codebase";
        let hits = self.retrieve(question, BRIEF_K, Some(source)).await?;
        let context = render_context(&hits);

        let prompt = format!(
            "Regulatory excerpts from {source}:\n\n{context}\n\
             Distill these excerpts into a technical brief for a code auditor: a concise \
             bulleted list of concrete, developer-checkable requirements. One requirement per \
             bullet, starting with \"- \". Use plain English, name specific artifacts \
             (credentials, logs, encryption, consent flows) where the text implies them, and \
             include nothing that cannot be checked in source code."
        );

        self.llm
            .chat(
                Some("You turn regulatory text into checkable engineering requirements."),
                &prompt,
                TEMP_DETERMINISTIC,
            )
            .await
    }

    /// Answer a free-form question against the corpus.
    pub async fn query(&self, question: &str, scope: QueryScope) -> Result<LegalAnswer> {
        let (k, filter, with_distribution) = match &scope {
            QueryScope::SinglePdf(source) => (BRIEF_K, Some(source.as_str()), false),
            QueryScope::AllPdfs => (BRIEF_K, None, false),
            QueryScope::AllPdfsWithSources => (SOURCES_K, None, true),
        };

        let hits = self.retrieve(question, k, filter).await?;
        if hits.is_empty() {
            return Ok(LegalAnswer {
                answer: "No relevant passages were found in the ingested documents.".to_string(),
                sources: vec![],
                chunk_distribution_by_source: None,
            });
        }

        let context = render_context(&hits);
        let prompt = format!(
            "Excerpts from regulatory documents:\n\n{context}\n\
             Question: {question}\n\n\
             Answer concisely in bullet form, grounded only in the excerpts above."
        );
        let answer = self
            .llm
            .chat(
                Some("You answer questions about regulatory documents from provided excerpts only."),
                &prompt,
                TEMP_DETERMINISTIC,
            )
            .await?;

        let mut sources: Vec<String> = hits.iter().map(|h| h.source_pdf.clone()).collect();
        sources.sort();
        sources.dedup();

        let chunk_distribution_by_source = with_distribution.then(|| {
            let mut dist: HashMap<String, usize> = HashMap::new();
            for hit in &hits {
                *dist.entry(hit.source_pdf.clone()).or_insert(0) += 1;
            }
            dist
        });

        Ok(LegalAnswer {
            answer,
            sources,
            chunk_distribution_by_source,
        })
    }

    async fn retrieve(
        &self,
        question: &str,
        k: usize,
        filter: Option<&str>,
    ) -> Result<Vec<guardian_index::CorpusHit>> {
        let query_embedding = self.embedder.embed(&[question]).await?;
        let Some(query_vec) = query_embedding.first() else {
            return Ok(vec![]);
        };
        Ok(self.corpus.search(query_vec, k, filter))
    }
}

fn render_context(hits: &[guardian_index::CorpusHit]) -> String {
    let mut out = String::new();
    for hit in hits {
        out.push_str(&format!(
            "--- {} (page {}) ---\n{}\n\n",
            hit.source_pdf, hit.page, hit.text
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;
    use guardian_config::RetrySettings;
    use guardian_index::HashEmbedder;

    async fn analyst_with_chunks(
        provider: MockProvider,
        chunks: &[(&str, usize, &str)],
    ) -> LegalAnalyst {
        let llm = Arc::new(LlmClient::new(Arc::new(provider), RetrySettings::default()));
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new());
        let corpus = CorpusStore::open_in_memory().unwrap();

        let corpus_chunks: Vec<CorpusChunk> = chunks
            .iter()
            .map(|(source, page, text)| CorpusChunk {
                hash: hash_content(format!("{source}\u{1}{page}\u{1}{text}").as_bytes()),
                source_pdf: source.to_string(),
                page: *page,
                text: text.to_string(),
            })
            .collect();
        let texts: Vec<&str> = corpus_chunks.iter().map(|c| c.text.as_str()).collect();
        let embeddings = embedder.embed(&texts).await.unwrap();
        corpus.add_chunks(&corpus_chunks, &embeddings).unwrap();

        LegalAnalyst::new(llm, embedder, corpus)
    }

    #[tokio::test]
    async fn brief_for_unknown_source_reports_empty_document() {
        let analyst = analyst_with_chunks(MockProvider::new(), &[]).await;
        let brief = analyst.brief_for_source("ghost.pdf").await.unwrap();
        assert_eq!(brief, EMPTY_DOCUMENT_BRIEF);
    }

    #[tokio::test]
    async fn brief_distills_bullets_from_corpus() {
        let provider = MockProvider::new()
            .then_text("- No hardcoded credentials\n- Encrypt personal data at rest");
        let analyst = analyst_with_chunks(
            provider,
            &[
                ("rules.pdf", 1, "Systems must not embed credentials in source."),
                ("rules.pdf", 2, "Personal data shall be encrypted at rest."),
            ],
        )
        .await;

        let brief = analyst.brief_for_source("rules.pdf").await.unwrap();
        assert!(brief.contains("- No hardcoded credentials"));
    }

    #[tokio::test]
    async fn single_pdf_scope_filters_sources() {
        let provider = MockProvider::new().with_default_text("- answer");
        let analyst = analyst_with_chunks(
            provider,
            &[
                ("a.pdf", 1, "encryption requirements for stored data"),
                ("b.pdf", 1, "encryption requirements for transit"),
            ],
        )
        .await;

        let answer = analyst
            .query(
                "what are the encryption requirements",
                QueryScope::SinglePdf("a.pdf".into()),
            )
            .await
            .unwrap();
        assert_eq!(answer.sources, vec!["a.pdf"]);
        assert!(answer.chunk_distribution_by_source.is_none());
    }

    #[tokio::test]
    async fn with_sources_scope_reports_distribution() {
        let provider = MockProvider::new().with_default_text("- answer");
        let analyst = analyst_with_chunks(
            provider,
            &[
                ("a.pdf", 1, "data retention limits for user records"),
                ("b.pdf", 3, "retention of records and deletion duties"),
            ],
        )
        .await;

        let answer = analyst
            .query("what about data retention", QueryScope::AllPdfsWithSources)
            .await
            .unwrap();
        assert_eq!(answer.sources.len(), 2);
        let dist = answer.chunk_distribution_by_source.unwrap();
        assert_eq!(dist.values().sum::<usize>(), 2);
    }

    #[tokio::test]
    async fn empty_corpus_query_reports_no_passages() {
        let analyst = analyst_with_chunks(MockProvider::new(), &[]).await;
        let answer = analyst.query("anything", QueryScope::AllPdfs).await.unwrap();
        assert!(answer.answer.contains("No relevant passages"));
        assert!(answer.sources.is_empty());
    }
}
