pub mod compliance;
pub mod hybrid;
pub mod linescan;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use guardian_config::AuditSettings;
use guardian_index::{Embedder, IndexOptions, RepoIndex};

use crate::error::GuardianError;
use crate::events::{EventBus, Stage};
use crate::llm::LlmClient;
use crate::plan::AuditMode;
use crate::repo::RepoCheckout;
use compliance::ComplianceChecker;
use hybrid::HybridEngine;
use linescan::LineScanner;
use types::{AuditResult, ComplianceAssessment, JobState, ScanStatistics};

#[derive(Debug)]
pub struct AuditOutcome {
    pub audit: AuditResult,
    pub compliance: Option<Vec<ComplianceAssessment>>,
    pub summary: Option<String>,
}

/// Front door for the three audit modes. Owns the repository checkout for
/// the duration of one job and guarantees its removal on every exit path.
pub struct CodeAuditor<'a> {
    pub llm: &'a LlmClient,
    pub embedder: Arc<dyn Embedder>,
    pub events: &'a EventBus,
    pub cancel: CancellationToken,
    pub settings: AuditSettings,
    pub index_options: IndexOptions,
}

impl<'a> CodeAuditor<'a> {
    pub async fn audit(
        &self,
        repo_url: &str,
        brief: &str,
        mode: AuditMode,
    ) -> Result<AuditOutcome> {
        self.transition(JobState::Idle, JobState::Fetching);
        self.events
            .emit(Stage::RepoFetchStart, format!("cloning {repo_url}"));

        let checkout = match RepoCheckout::clone(repo_url).await {
            Ok(c) => c,
            Err(err) => {
                self.transition(JobState::Fetching, JobState::Failed);
                return Err(err);
            }
        };
        self.events
            .emit(Stage::RepoFetchDone, format!("cloned {repo_url}"));

        let outcome = self.audit_checkout(&checkout, brief, mode).await;
        checkout.close();
        outcome
    }

    /// Audit an already-present checkout. Split out so local directories and
    /// tests skip the network clone.
    pub async fn audit_checkout(
        &self,
        checkout: &RepoCheckout,
        brief: &str,
        mode: AuditMode,
    ) -> Result<AuditOutcome> {
        let root = checkout.path();
        let files = guardian_index::walker::walk_repository(root, self.settings.max_file_bytes)
            .map_err(|e| GuardianError::Ingest(format!("repository walk failed: {e}")))?;
        let files_scanned = files.len();

        match mode {
            AuditMode::Audit => {
                self.transition(JobState::Fetching, JobState::Scanning);
                let scanner = LineScanner {
                    llm: self.llm,
                    events: self.events,
                    cancel: self.cancel.clone(),
                    chunk_lines: self.settings.effective_chunk_lines(),
                    workers: self.settings.effective_workers(),
                };
                let scan = scanner.scan(root, &files, brief).await;
                self.transition(JobState::Scanning, JobState::Done);

                Ok(AuditOutcome {
                    audit: AuditResult::new(
                        mode,
                        &checkout.url,
                        scan.violations,
                        files_scanned,
                        scan.files_analyzed,
                        scan.statistics,
                    ),
                    compliance: None,
                    summary: None,
                })
            }
            AuditMode::Compliance => {
                let index = self.build_index(root).await?;
                let guidelines = self.guidelines_from(brief)?;

                self.transition(JobState::Indexing, JobState::Scanning);
                let checker = ComplianceChecker {
                    llm: self.llm,
                    retrieval_k: self.settings.retrieval_k,
                };
                let assessments = checker.assess_all(&index, &guidelines).await;
                self.transition(JobState::Scanning, JobState::Done);

                let summary = compliance::summarize(&assessments);
                Ok(AuditOutcome {
                    audit: AuditResult::new(
                        mode,
                        &checkout.url,
                        vec![],
                        files_scanned,
                        0,
                        ScanStatistics::default(),
                    ),
                    compliance: Some(assessments),
                    summary: Some(summary),
                })
            }
            AuditMode::Hybrid => {
                let index = self.build_index(root).await?;
                let guidelines = self.guidelines_from(brief)?;

                self.transition(JobState::Indexing, JobState::Scanning);
                let engine = HybridEngine {
                    llm: self.llm,
                    events: self.events,
                    cancel: self.cancel.clone(),
                    chunk_lines: self.settings.effective_chunk_lines(),
                    workers: self.settings.effective_workers(),
                    candidate_cap: self.settings.candidate_cap,
                    retrieval_k: self.settings.retrieval_k,
                };
                let outcome = engine
                    .run(root, &files, &index, &guidelines, brief)
                    .await;
                self.transition(JobState::Scanning, JobState::Merging);

                let summary = compliance::summarize(&outcome.assessments);
                self.transition(JobState::Merging, JobState::Done);

                Ok(AuditOutcome {
                    audit: AuditResult::new(
                        mode,
                        &checkout.url,
                        outcome.scan.violations,
                        files_scanned,
                        outcome.scan.files_analyzed,
                        outcome.scan.statistics,
                    ),
                    compliance: Some(outcome.assessments),
                    summary: Some(summary),
                })
            }
        }
    }

    async fn build_index(&self, root: &Path) -> Result<RepoIndex> {
        self.transition(JobState::Fetching, JobState::Indexing);
        let index = RepoIndex::build(root, self.embedder.clone(), &self.index_options)
            .await
            .map_err(|e| GuardianError::Ingest(format!("index build failed: {e}")))?;
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
        Ok(index)
    }

    fn guidelines_from(&self, brief: &str) -> Result<Vec<String>> {
        let guidelines = compliance::extract_guidelines(brief);
        if guidelines.is_empty() {
            return Err(
                GuardianError::Ingest("technical brief contains no checkable guidelines".into())
                    .into(),
            );
        }
        Ok(guidelines)
    }

    fn transition(&self, from: JobState, to: JobState) {
        tracing::debug!(%from, %to, "audit job state change");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;
    use guardian_config::RetrySettings;
    use guardian_index::HashEmbedder;

    fn fixture_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("app.py"),
            "import os\n\nDEBUG = True\nAPI_KEY = \"abc123\"\n",
        )
        .unwrap();
        dir
    }

    fn auditor<'a>(llm: &'a LlmClient, events: &'a EventBus) -> CodeAuditor<'a> {
        CodeAuditor {
            llm,
            embedder: Arc::new(HashEmbedder::new()),
            events,
            cancel: CancellationToken::new(),
            settings: AuditSettings::default(),
            index_options: IndexOptions::default(),
        }
    }

    #[tokio::test]
    async fn audit_mode_scans_every_file() {
        let repo = fixture_repo();
        let provider = MockProvider::new().with_default_text(
            r#"[{"line": 4, "code": "API_KEY = \"abc123\"", "explanation": "credential in source", "rule_violated": "No hardcoded credentials", "severity": "critical"}]"#,
        );
        let llm = LlmClient::new(Arc::new(provider), RetrySettings::default());
        let events = EventBus::new();
        let auditor = auditor(&llm, &events);

        let checkout = RepoCheckout::local("https://example.test/tiny-repo", repo.path());
        let outcome = auditor
            .audit_checkout(&checkout, "- No hardcoded credentials", AuditMode::Audit)
            .await
            .unwrap();

        assert_eq!(outcome.audit.mode, AuditMode::Audit);
        assert_eq!(outcome.audit.total_violations, outcome.audit.violations.len());
        assert_eq!(outcome.audit.total_violations, 1);
        assert_eq!(outcome.audit.files_scanned, 1);
        assert!(outcome.compliance.is_none());
    }

    #[tokio::test]
    async fn compliance_mode_returns_assessments_not_violations() {
        let repo = fixture_repo();
        let provider = MockProvider::new().with_default_text(
            r#"{"status": "fail", "assessment": "credential committed", "confidence": "high", "evidence": [{"file_path": "app.py", "line_number": 4, "snippet": "API_KEY", "relevance": "hardcoded"}]}"#,
        );
        let llm = LlmClient::new(Arc::new(provider), RetrySettings::default());
        let events = EventBus::new();
        let auditor = auditor(&llm, &events);

        let checkout = RepoCheckout::local("https://example.test/tiny-repo", repo.path());
        let outcome = auditor
            .audit_checkout(&checkout, "- No hardcoded credentials", AuditMode::Compliance)
            .await
            .unwrap();

        assert!(outcome.audit.violations.is_empty());
        let assessments = outcome.compliance.unwrap();
        assert_eq!(assessments.len(), 1);
        assert!(outcome.summary.unwrap().contains("1 fail"));
        assert_eq!(events.count(Stage::IndexBuildDone), 1);
    }

    #[tokio::test]
    async fn empty_brief_is_an_ingest_error() {
        let repo = fixture_repo();
        let provider = MockProvider::new();
        let llm = LlmClient::new(Arc::new(provider), RetrySettings::default());
        let events = EventBus::new();
        let auditor = auditor(&llm, &events);

        let checkout = RepoCheckout::local("https://example.test/tiny-repo", repo.path());
        let err = auditor
            .audit_checkout(&checkout, "   ", AuditMode::Hybrid)
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<GuardianError>().unwrap().kind(),
            "ingest"
        );
    }
}
