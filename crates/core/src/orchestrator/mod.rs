pub mod executor;
pub mod planner;
pub mod synthesis;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use guardian_config::Config;
use guardian_index::{CorpusStore, Embedder, HashEmbedder, IndexOptions, ProviderEmbedder};
use guardian_provider::Provider;

use crate::error::GuardianError;
use crate::events::{EventBus, EventSink, Stage};
use crate::legal::LegalAnalyst;
use crate::llm::LlmClient;
use crate::plan::AuditMode;
use crate::qa::{QaEngine, QaSession, QaSessionInfo};
use crate::report::Report;

pub use planner::SessionView;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Caller-supplied technical brief; skips the legal analyst requirement
    /// for audit plans.
    pub technical_brief: Option<String>,
    /// Overrides the planner's audit mode.
    pub mode_hint: Option<AuditMode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub query: String,
    pub final_answer: String,
}

/// The only stateful component of the pipeline: owns the single QA session,
/// the legal corpus, and the run history. Tools are pure given their inputs
/// except for the QA index they borrow from here.
pub struct Orchestrator {
    pub(crate) llm: Arc<LlmClient>,
    pub(crate) embedder: Arc<dyn Embedder>,
    pub(crate) events: EventBus,
    pub(crate) legal: LegalAnalyst,
    pub(crate) qa_engine: QaEngine,
    pub(crate) qa_session: Option<QaSession>,
    pub(crate) config: Config,
    pub(crate) cancel: CancellationToken,
    history: Vec<HistoryEntry>,
}

impl Orchestrator {
    pub fn new(config: Config, provider: Arc<dyn Provider>) -> Result<Self> {
        let provider_entry = config.provider.entry(&config.provider.default);
        let model = provider_entry.and_then(|e| e.model.clone());
        let llm = Arc::new(
            LlmClient::new(provider.clone(), config.retry.clone()).with_model(model),
        );

        let embedder: Arc<dyn Embedder> =
            match config.index.embedding.trim().to_ascii_lowercase().as_str() {
                "hash" | "local" => Arc::new(HashEmbedder::new()),
                _ => Arc::new(ProviderEmbedder::new(provider)),
            };

        let corpus = if config.corpus.persist {
            CorpusStore::open(&config.corpus.effective_dir())?
        } else {
            CorpusStore::open_in_memory()?
        };

        let events = EventBus::new();
        let index_options = IndexOptions {
            chunk_chars: config.index.chunk_chars,
            overlap_chars: config.index.overlap_chars,
            max_file_bytes: config.audit.max_file_bytes,
        };

        Ok(Self {
            legal: LegalAnalyst::new(llm.clone(), embedder.clone(), corpus),
            qa_engine: QaEngine {
                llm: llm.clone(),
                embedder: embedder.clone(),
                index_options,
                events: events.clone(),
            },
            qa_session: None,
            llm,
            embedder,
            events,
            config,
            cancel: CancellationToken::new(),
            history: Vec::new(),
        })
    }

    /// Register a listener for session events; the streaming shell is a
    /// thin translator on top of this.
    pub fn add_event_sink(&self, sink: Arc<dyn EventSink>) {
        self.events.add_sink(sink);
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn model_name(&self) -> String {
        self.llm.model_name()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&mut self, query: &str) -> Report {
        self.run_with(query, RunOptions::default()).await
    }

    /// Plan, execute, synthesize. Tool failures never escape; the returned
    /// report always carries a final answer.
    pub async fn run_with(&mut self, query: &str, options: RunOptions) -> Report {
        self.events
            .emit(Stage::Planning, format!("planning: {query}"));

        let session_view = self.session_view();
        let mut plan = planner::plan_query(
            &self.llm,
            query,
            session_view.as_ref(),
            options.technical_brief.is_some(),
        )
        .await;
        if let Some(mode) = options.mode_hint {
            plan.audit_mode = Some(mode);
        }
        tracing::info!(
            tools = ?plan.execution_order,
            reasoning = %plan.reasoning,
            "plan ready"
        );

        let tool_results = self.execute_plan(&plan, query, &options).await;

        let final_answer = if plan.is_empty() {
            format!(
                "I could not determine what to do with this request. Mention a regulatory PDF, \
                 a repository URL, or start a QA session first. ({})",
                plan.reasoning
            )
        } else {
            synthesis::synthesize(&self.llm, query, &plan, &tool_results).await
        };

        let report = Report::new(
            query,
            self.model_name(),
            plan,
            tool_results,
            final_answer,
        );
        self.history.push(HistoryEntry {
            timestamp: report.timestamp,
            query: report.query.clone(),
            final_answer: report.final_answer.clone(),
        });
        self.events.emit(Stage::Done, "run complete");
        report
    }

    /// Idempotent: a session for the same URL is reused untouched; anything
    /// else is destroyed and rebuilt.
    pub async fn ensure_qa_session(&mut self, repo_url: &str) -> Result<&QaSessionInfo> {
        let reusable = self
            .qa_session
            .as_ref()
            .is_some_and(|s| s.matches(repo_url));
        if !reusable {
            self.end_qa_session();
            let session = self.qa_engine.open_session(repo_url).await?;
            self.qa_session = Some(session);
        }
        match self.qa_session.as_ref() {
            Some(session) => Ok(session.info()),
            None => Err(GuardianError::Configuration("QA session unavailable".into()).into()),
        }
    }

    /// Session over a local directory; used for local audits and tests.
    pub async fn ensure_qa_session_local(
        &mut self,
        repo_url: &str,
        path: &Path,
    ) -> Result<&QaSessionInfo> {
        let reusable = self
            .qa_session
            .as_ref()
            .is_some_and(|s| s.matches(repo_url));
        if !reusable {
            self.end_qa_session();
            let session = self.qa_engine.open_session_local(repo_url, path).await?;
            self.qa_session = Some(session);
        }
        match self.qa_session.as_ref() {
            Some(session) => Ok(session.info()),
            None => Err(GuardianError::Configuration("QA session unavailable".into()).into()),
        }
    }

    pub fn end_qa_session(&mut self) {
        if let Some(session) = self.qa_session.take() {
            tracing::info!(repo = %session.info().repo_url, "closing QA session");
            session.close();
        }
    }

    pub fn session_info(&self) -> Option<&QaSessionInfo> {
        self.qa_session.as_ref().map(|s| s.info())
    }

    pub fn session_history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
        self.events.clear_history();
    }

    fn session_view(&self) -> Option<SessionView> {
        self.qa_session.as_ref().map(|s| SessionView {
            repo_url: s.info().repo_url.clone(),
        })
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.end_qa_session();
    }
}
