use regex::Regex;
use serde::Deserialize;

use crate::jsonx;
use crate::llm::{LlmClient, TEMP_DETERMINISTIC};
use crate::plan::{AuditMode, Plan, ToolKind};

/// Read-only view of the live QA session handed to the planner. The planner
/// reads session state; only the orchestrator writes it.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub repo_url: String,
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    #[serde(default)]
    tools_needed: Vec<String>,
    #[serde(default)]
    execution_order: Vec<String>,
    #[serde(default)]
    pdf_path: Option<String>,
    #[serde(default)]
    repo_url: Option<String>,
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    audit_mode: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Translate a natural-language request into a tool plan. Unparseable model
/// output falls back to the deterministic rule-based planner; the returned
/// plan is always normalized.
pub async fn plan_query(
    llm: &LlmClient,
    query: &str,
    session: Option<&SessionView>,
    has_external_brief: bool,
) -> Plan {
    let prompt = build_planner_prompt(query, session);
    let mut plan = match llm.chat(None, &prompt, TEMP_DETERMINISTIC).await {
        Ok(response) => match jsonx::parse_llm_json::<RawPlan>(&response) {
            Ok(raw) => from_raw(raw),
            Err(err) => {
                tracing::warn!("planner output unparseable, using fallback: {err}");
                fallback_plan(query, session)
            }
        },
        Err(err) => {
            tracing::warn!("planner call failed, using fallback: {err}");
            fallback_plan(query, session)
        }
    };

    // A query with no extracted repo falls back to the session repository.
    if plan.repo_url.is_none() {
        if let Some(view) = session {
            if plan
                .execution_order
                .iter()
                .any(|t| matches!(t, ToolKind::RepositoryQa | ToolKind::CodeAuditor))
            {
                plan.repo_url = Some(view.repo_url.clone());
            }
        }
    }

    plan.normalize(has_external_brief);
    plan
}

fn from_raw(raw: RawPlan) -> Plan {
    let parse_tools = |names: &[String]| -> Vec<ToolKind> {
        names.iter().filter_map(|n| parse_tool(n)).collect()
    };
    Plan {
        tools_needed: parse_tools(&raw.tools_needed),
        execution_order: parse_tools(&raw.execution_order),
        pdf_path: raw.pdf_path.filter(|p| !p.trim().is_empty()),
        repo_url: raw.repo_url.filter(|u| !u.trim().is_empty()),
        question: raw.question.filter(|q| !q.trim().is_empty()),
        audit_mode: raw
            .audit_mode
            .and_then(|m| m.parse::<AuditMode>().ok()),
        reasoning: raw.reasoning.unwrap_or_default(),
    }
}

fn parse_tool(name: &str) -> Option<ToolKind> {
    match name.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
        "legal_analyst" | "legalanalyst" | "legal" => Some(ToolKind::LegalAnalyst),
        "code_auditor" | "codeauditor" | "auditor" | "audit" => Some(ToolKind::CodeAuditor),
        "repository_qa" | "repo_qa" | "qa" => Some(ToolKind::RepositoryQa),
        _ => None,
    }
}

/// Rule-based planner used whenever the model's plan cannot be parsed.
pub fn fallback_plan(query: &str, session: Option<&SessionView>) -> Plan {
    let github_re = Regex::new(r"https?://github\.com/[\w.-]+/[\w.-]+").unwrap();
    let pdf_re = Regex::new(r"[\w~./\\-]+\.pdf\b").unwrap();

    let repo_url = github_re
        .find(query)
        .map(|m| m.as_str().to_string())
        .or_else(|| session.map(|s| s.repo_url.clone()));
    let pdf_path = pdf_re.find(query).map(|m| m.as_str().to_string());

    let mut plan = Plan::empty("deterministic fallback plan");
    plan.pdf_path = pdf_path.clone();

    match (pdf_path.is_some(), repo_url.is_some()) {
        (true, true) => {
            plan.execution_order = vec![ToolKind::LegalAnalyst, ToolKind::CodeAuditor];
            plan.audit_mode = Some(AuditMode::Hybrid);
            plan.repo_url = repo_url;
            plan.reasoning = "fallback: document and repository detected, full audit".into();
        }
        (true, false) => {
            plan.execution_order = vec![ToolKind::LegalAnalyst];
            plan.reasoning = "fallback: document detected, analysis only".into();
        }
        (false, true) => {
            plan.execution_order = vec![ToolKind::RepositoryQa];
            plan.repo_url = repo_url;
            plan.question = Some(query.to_string());
            plan.reasoning = "fallback: repository question".into();
        }
        (false, false) => {
            plan.reasoning = "cannot determine intent".into();
        }
    }

    plan.tools_needed = plan.execution_order.clone();
    plan.normalize(false);
    plan
}

fn build_planner_prompt(query: &str, session: Option<&SessionView>) -> String {
    let session_note = match session {
        Some(view) => format!(
            "A repository QA session is active for {url}. The user's phrases like \"the repo\", \
             \"this project\", or \"it\" refer to {url}; set repo_url accordingly.\n\n",
            url = view.repo_url
        ),
        None => String::new(),
    };

    format!(
        "You are the planner of a compliance-audit assistant with three tools:\n\
         - legal_analyst: ingests a regulatory PDF and produces a technical brief\n\
         - code_auditor: audits a repository against a brief \
         (modes: audit = exhaustive line scan, compliance = semantic per-guideline check, \
         hybrid = semantic triage plus targeted line scan; hybrid is the default)\n\
         - repository_qa: answers questions about a repository\n\n\
         {session_note}\
         User request:\n{query}\n\n\
         Respond with JSON only:\n\
         {{\"tools_needed\": [\"legal_analyst\"|\"code_auditor\"|\"repository_qa\"],\n\
          \"execution_order\": [...],\n\
          \"pdf_path\": \"<path or null>\",\n\
          \"repo_url\": \"<url or null>\",\n\
          \"question\": \"<question or null>\",\n\
          \"audit_mode\": \"audit\"|\"compliance\"|\"hybrid\",\n\
          \"reasoning\": \"<one sentence>\"}}"
    )
}
