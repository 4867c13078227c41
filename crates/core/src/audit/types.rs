use serde::{Deserialize, Serialize};

use crate::plan::AuditMode;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Severity {
    /// Tolerant parse for model output; anything unrecognized is `Medium`.
    pub fn parse_lossy(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "low" => Severity::Low,
            _ => Severity::Medium,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub file_path: String,
    /// 1-based; `None` when the model could not pin a line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    pub rule_violated: String,
    pub explanation: String,
    pub code_snippet: String,
    #[serde(default)]
    pub severity: Severity,
}

impl Violation {
    pub fn dedup_key(&self) -> (String, Option<u32>, String) {
        (
            self.file_path.clone(),
            self.line_number,
            self.rule_violated.clone(),
        )
    }
}

/// Reject absolute paths and any `..` traversal; normalize separators.
pub fn sanitize_rel_path(path: &str) -> Option<String> {
    let normalized = path.trim().replace('\\', "/");
    let normalized = normalized.trim_start_matches("./").to_string();
    if normalized.is_empty()
        || normalized.starts_with('/')
        || normalized.contains(':')
        || normalized.split('/').any(|seg| seg == "..")
    {
        return None;
    }
    Some(normalized)
}

/// Deterministic emission order: `(file_path, line_number, rule_violated)`,
/// duplicates on that tuple removed.
pub fn sort_and_dedup(violations: &mut Vec<Violation>) {
    violations.sort_by(|a, b| {
        a.file_path
            .cmp(&b.file_path)
            .then(a.line_number.unwrap_or(0).cmp(&b.line_number.unwrap_or(0)))
            .then(a.rule_violated.cmp(&b.rule_violated))
    });
    violations.dedup_by(|a, b| a.dedup_key() == b.dedup_key());
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanStatistics {
    pub chunks_scanned: usize,
    pub chunks_failed: usize,
    pub files_skipped: usize,
    pub llm_calls: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditResult {
    pub mode: AuditMode,
    pub repository: String,
    pub total_violations: usize,
    pub violations: Vec<Violation>,
    pub files_scanned: usize,
    pub files_analyzed: usize,
    pub scan_statistics: ScanStatistics,
}

impl AuditResult {
    /// The only constructor; keeps `total_violations` equal to the list
    /// length by construction.
    pub fn new(
        mode: AuditMode,
        repository: impl Into<String>,
        mut violations: Vec<Violation>,
        files_scanned: usize,
        files_analyzed: usize,
        scan_statistics: ScanStatistics,
    ) -> Self {
        sort_and_dedup(&mut violations);
        Self {
            mode,
            repository: repository.into(),
            total_violations: violations.len(),
            violations,
            files_scanned,
            files_analyzed,
            scan_statistics,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    Pass,
    Fail,
    Inconclusive,
    NotApplicable,
}

impl ComplianceStatus {
    pub fn parse_lossy(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "pass" | "passed" | "compliant" => ComplianceStatus::Pass,
            "fail" | "failed" | "violation" | "non_compliant" => ComplianceStatus::Fail,
            "not_applicable" | "n/a" | "na" => ComplianceStatus::NotApplicable,
            _ => ComplianceStatus::Inconclusive,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    #[default]
    Medium,
    Low,
}

impl Confidence {
    pub fn parse_lossy(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "high" => Confidence::High,
            "low" => Confidence::Low,
            _ => Confidence::Medium,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    pub snippet: String,
    pub relevance: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceAssessment {
    pub guideline: String,
    pub status: ComplianceStatus,
    pub assessment: String,
    pub confidence: Confidence,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

/// States of one audit job. `Indexing` is skipped in pure audit mode;
/// `Failed` is reachable from anywhere and still yields partial results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Fetching,
    Indexing,
    Scanning,
    Merging,
    Done,
    Failed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Idle => "idle",
            JobState::Fetching => "fetching",
            JobState::Indexing => "indexing",
            JobState::Scanning => "scanning",
            JobState::Merging => "merging",
            JobState::Done => "done",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}
