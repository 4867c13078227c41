use std::path::Path;

use crate::audit::{AuditOutcome, CodeAuditor};
use crate::error::GuardianError;
use crate::events::Stage;
use crate::orchestrator::{Orchestrator, RunOptions};
use crate::plan::{Plan, ToolKind};
use crate::repo::RepoCheckout;
use crate::report::ToolResults;

impl Orchestrator {
    /// Run the plan's steps in order, passing derived artifacts forward: the
    /// analyst's brief feeds the auditor, and the QA session opened by one
    /// step persists for later ones. A failing step becomes an observation,
    /// never an abort; independent steps still run.
    pub(crate) async fn execute_plan(
        &mut self,
        plan: &Plan,
        query: &str,
        options: &RunOptions,
    ) -> ToolResults {
        let mut results = ToolResults::default();
        let mut brief = options.technical_brief.clone();

        for tool in &plan.execution_order {
            match tool {
                ToolKind::LegalAnalyst => {
                    self.run_legal_step(plan, &mut results, &mut brief).await;
                }
                ToolKind::CodeAuditor => {
                    self.run_audit_step(plan, &brief, &mut results).await;
                }
                ToolKind::RepositoryQa => {
                    self.run_qa_step(plan, query, &mut results).await;
                }
            }
        }

        results
    }

    async fn run_legal_step(
        &mut self,
        plan: &Plan,
        results: &mut ToolResults,
        brief: &mut Option<String>,
    ) {
        let tool = ToolKind::LegalAnalyst.to_string();
        let Some(pdf_path) = plan.pdf_path.as_deref() else {
            self.record_failure(
                results,
                &tool,
                &GuardianError::Configuration("no document path in plan".into()),
            );
            return;
        };

        match self.legal.brief(Path::new(pdf_path)).await {
            Ok(text) => {
                self.events.emit_with(
                    Stage::LegalBriefReady,
                    format!("technical brief derived from {pdf_path}"),
                    Some(serde_json::json!({ "pdf_path": pdf_path })),
                );
                results.legal_brief = Some(text.clone());
                *brief = Some(text);
            }
            Err(err) => {
                let kind = GuardianError::from_tool_error(&err);
                self.record_failure(results, &tool, &kind);
            }
        }
    }

    async fn run_audit_step(
        &mut self,
        plan: &Plan,
        brief: &Option<String>,
        results: &mut ToolResults,
    ) {
        let tool = ToolKind::CodeAuditor.to_string();
        let Some(repo_url) = plan.repo_url.as_deref() else {
            self.record_failure(
                results,
                &tool,
                &GuardianError::Configuration("no repository URL in plan".into()),
            );
            return;
        };
        let Some(brief_text) = brief.as_deref() else {
            self.record_failure(
                results,
                &tool,
                &GuardianError::Configuration(
                    "no technical brief available for the audit".into(),
                ),
            );
            return;
        };
        let mode = plan.audit_mode.unwrap_or_default();

        let auditor = CodeAuditor {
            llm: self.llm.as_ref(),
            embedder: self.embedder.clone(),
            events: &self.events,
            cancel: self.cancel.clone(),
            settings: self.config.audit.clone(),
            index_options: self.qa_engine.index_options.clone(),
        };

        // A repo_url naming an existing directory is audited in place;
        // anything else goes through the clone path.
        let outcome = if Path::new(repo_url).is_dir() {
            let checkout = RepoCheckout::local(repo_url, Path::new(repo_url));
            auditor.audit_checkout(&checkout, brief_text, mode).await
        } else {
            auditor.audit(repo_url, brief_text, mode).await
        };

        match outcome {
            Ok(AuditOutcome {
                audit,
                compliance,
                summary,
            }) => {
                if let Some(summary) = summary {
                    tracing::info!("{summary}");
                }
                results.audit = Some(audit);
                if let Some(checks) = compliance {
                    results.compliance_checks = Some(checks);
                }
            }
            Err(err) => {
                let kind = GuardianError::from_tool_error(&err);
                let kind = match kind {
                    GuardianError::Ingest(msg) => {
                        GuardianError::Ingest(format!("repository unreachable: {msg}"))
                    }
                    other => other,
                };
                self.record_failure(results, &tool, &kind);
            }
        }
    }

    async fn run_qa_step(&mut self, plan: &Plan, query: &str, results: &mut ToolResults) {
        let tool = ToolKind::RepositoryQa.to_string();
        let repo_url = plan
            .repo_url
            .clone()
            .or_else(|| self.session_info().map(|i| i.repo_url.clone()));
        let Some(repo_url) = repo_url else {
            self.record_failure(
                results,
                &tool,
                &GuardianError::Configuration("no repository for the question".into()),
            );
            return;
        };

        if let Err(err) = self.ensure_qa_session(&repo_url).await {
            let kind = GuardianError::from_tool_error(&err);
            let kind = match kind {
                GuardianError::Ingest(msg) => {
                    GuardianError::Ingest(format!("repository unreachable: {msg}"))
                }
                other => other,
            };
            self.record_failure(results, &tool, &kind);
            return;
        }

        let question = plan.question.as_deref().unwrap_or(query);
        let Some(session) = self.qa_session.as_ref() else {
            self.record_failure(
                results,
                &tool,
                &GuardianError::Configuration("QA session missing after setup".into()),
            );
            return;
        };
        match self.qa_engine.ask(session, question).await {
            Ok(answer) => {
                results.qa_answer = Some(answer);
            }
            Err(err) => {
                let kind = GuardianError::from_tool_error(&err);
                self.record_failure(results, &tool, &kind);
            }
        }
    }

    fn record_failure(&self, results: &mut ToolResults, tool: &str, err: &GuardianError) {
        let message = err.to_string();
        self.events.tool_failed(tool, err.kind(), &message);
        results.record_failure(tool, err.kind(), message);
    }
}
