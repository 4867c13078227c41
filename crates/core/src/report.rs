use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::types::{AuditResult, ComplianceAssessment};
use crate::plan::Plan;
use crate::qa::QaAnswer;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFailure {
    pub tool: String,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolResults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legal_brief: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit: Option<AuditResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compliance_checks: Option<Vec<ComplianceAssessment>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qa_answer: Option<QaAnswer>,
    /// Failure markers for tools that did not produce a result.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ToolFailure>,
}

impl ToolResults {
    pub fn record_failure(&mut self, tool: &str, kind: &str, message: impl Into<String>) {
        self.failures.push(ToolFailure {
            tool: tool.to_string(),
            kind: kind.to_string(),
            message: message.into(),
        });
    }

    pub fn failed(&self, tool: &str) -> bool {
        self.failures.iter().any(|f| f.tool == tool)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub version: String,
    pub mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub timestamp: DateTime<Utc>,
    pub query: String,
    pub model: String,
    pub plan: Plan,
    pub tool_results: ToolResults,
    pub final_answer: String,
    pub metadata: Metadata,
}

impl Report {
    pub fn new(
        query: impl Into<String>,
        model: impl Into<String>,
        plan: Plan,
        tool_results: ToolResults,
        final_answer: impl Into<String>,
    ) -> Self {
        let mode = plan
            .audit_mode
            .map(|m| m.to_string())
            .unwrap_or_else(|| "qa".to_string());
        Self {
            timestamp: Utc::now(),
            query: query.into(),
            model: model.into(),
            plan,
            tool_results,
            final_answer: final_answer.into(),
            metadata: Metadata {
                version: VERSION.to_string(),
                mode,
            },
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
