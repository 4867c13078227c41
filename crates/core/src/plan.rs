use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    LegalAnalyst,
    CodeAuditor,
    RepositoryQa,
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolKind::LegalAnalyst => write!(f, "legal_analyst"),
            ToolKind::CodeAuditor => write!(f, "code_auditor"),
            ToolKind::RepositoryQa => write!(f, "repository_qa"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditMode {
    Audit,
    Compliance,
    #[default]
    Hybrid,
}

impl std::fmt::Display for AuditMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditMode::Audit => write!(f, "audit"),
            AuditMode::Compliance => write!(f, "compliance"),
            AuditMode::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl std::str::FromStr for AuditMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "audit" => Ok(AuditMode::Audit),
            "compliance" => Ok(AuditMode::Compliance),
            "hybrid" => Ok(AuditMode::Hybrid),
            other => Err(format!("unknown audit mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub tools_needed: Vec<ToolKind>,
    #[serde(default)]
    pub execution_order: Vec<ToolKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_mode: Option<AuditMode>,
    #[serde(default)]
    pub reasoning: String,
}

impl Plan {
    pub fn empty(reasoning: impl Into<String>) -> Self {
        Self {
            reasoning: reasoning.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.execution_order.is_empty()
    }

    /// Enforce the plan invariants: the execution order falls back to
    /// `tools_needed`; an auditor step without a caller-supplied brief needs
    /// the legal analyst to run first; the auditor always has a mode.
    pub fn normalize(&mut self, has_external_brief: bool) {
        if self.execution_order.is_empty() {
            self.execution_order = self.tools_needed.clone();
        }
        if self.tools_needed.is_empty() {
            self.tools_needed = self.execution_order.clone();
        }
        dedup_keeping_order(&mut self.execution_order);
        dedup_keeping_order(&mut self.tools_needed);

        let auditor_pos = self
            .execution_order
            .iter()
            .position(|t| *t == ToolKind::CodeAuditor);
        if let Some(pos) = auditor_pos {
            if self.audit_mode.is_none() {
                self.audit_mode = Some(AuditMode::default());
            }
            let analyst_pos = self
                .execution_order
                .iter()
                .position(|t| *t == ToolKind::LegalAnalyst);
            if !has_external_brief {
                match analyst_pos {
                    Some(ap) if ap < pos => {}
                    Some(ap) => {
                        self.execution_order.remove(ap);
                        let pos = self
                            .execution_order
                            .iter()
                            .position(|t| *t == ToolKind::CodeAuditor)
                            .unwrap_or(0);
                        self.execution_order.insert(pos, ToolKind::LegalAnalyst);
                    }
                    None if self.pdf_path.is_some() => {
                        self.execution_order.insert(pos, ToolKind::LegalAnalyst);
                        if !self.tools_needed.contains(&ToolKind::LegalAnalyst) {
                            self.tools_needed.push(ToolKind::LegalAnalyst);
                        }
                    }
                    None => {}
                }
            }
        }
    }
}

fn dedup_keeping_order(tools: &mut Vec<ToolKind>) {
    let mut seen = Vec::new();
    tools.retain(|t| {
        if seen.contains(t) {
            false
        } else {
            seen.push(*t);
            true
        }
    });
}
