use serde::Deserialize;

use guardian_index::{RepoIndex, SearchResult};

use crate::audit::types::{
    sanitize_rel_path, ComplianceAssessment, ComplianceStatus, Confidence, Evidence,
};
use crate::jsonx;
use crate::llm::{LlmClient, TEMP_ANALYSIS};

/// Pull checkable guidelines out of a technical brief: bullet lines first,
/// falling back to bare non-empty lines when the brief has no bullets.
pub fn extract_guidelines(brief: &str) -> Vec<String> {
    let mut bullets = Vec::new();
    for line in brief.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(text) = strip_bullet(trimmed) {
            if !text.is_empty() {
                bullets.push(text.to_string());
            }
        }
    }
    if !bullets.is_empty() {
        return bullets;
    }
    brief
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

fn strip_bullet(line: &str) -> Option<&str> {
    for marker in ["- ", "* ", "• "] {
        if let Some(rest) = line.strip_prefix(marker) {
            return Some(rest.trim());
        }
    }
    // Numbered bullets: "1. text" or "2) text".
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return Some(rest.trim());
        }
    }
    None
}

#[derive(Debug, Deserialize)]
struct RawAssessment {
    #[serde(default)]
    status: String,
    #[serde(default)]
    assessment: String,
    #[serde(default)]
    confidence: String,
    #[serde(default)]
    evidence: Vec<RawEvidence>,
}

#[derive(Debug, Deserialize)]
struct RawEvidence {
    #[serde(default)]
    file_path: String,
    line_number: Option<u32>,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    relevance: String,
}

pub struct ComplianceChecker<'a> {
    pub llm: &'a LlmClient,
    pub retrieval_k: usize,
}

impl<'a> ComplianceChecker<'a> {
    /// Guideline-wise semantic check: retrieve the most relevant chunks for
    /// each guideline, then ask for a verdict grounded in those chunks only.
    pub async fn assess_all(
        &self,
        index: &RepoIndex,
        guidelines: &[String],
    ) -> Vec<ComplianceAssessment> {
        let mut assessments = Vec::with_capacity(guidelines.len());
        for guideline in guidelines {
            assessments.push(self.assess_one(index, guideline).await);
        }
        assessments
    }

    pub async fn assess_one(&self, index: &RepoIndex, guideline: &str) -> ComplianceAssessment {
        let retrieved = match index.search(guideline, self.retrieval_k).await {
            Ok(hits) => hits,
            Err(err) => {
                return inconclusive(guideline, format!("retrieval failed: {err}"));
            }
        };

        let prompt = build_assessment_prompt(guideline, &retrieved);
        let response = match self
            .llm
            .chat(Some(COMPLIANCE_SYSTEM_PROMPT), &prompt, TEMP_ANALYSIS)
            .await
        {
            Ok(text) => text,
            Err(err) => {
                return inconclusive(guideline, format!("analysis failed: {err}"));
            }
        };

        let raw: RawAssessment = match jsonx::parse_llm_json(&response) {
            Ok(raw) => raw,
            Err(err) => {
                return inconclusive(guideline, format!("unparseable verdict: {err}"));
            }
        };

        // Evidence must reference retrieved files only.
        let evidence = raw
            .evidence
            .into_iter()
            .filter_map(|e| {
                let file_path = sanitize_rel_path(&e.file_path)?;
                if !retrieved.iter().any(|r| r.file_path == file_path) {
                    return None;
                }
                Some(Evidence {
                    file_path,
                    line_number: e.line_number,
                    snippet: e.snippet,
                    relevance: e.relevance,
                })
            })
            .collect();

        ComplianceAssessment {
            guideline: guideline.to_string(),
            status: ComplianceStatus::parse_lossy(&raw.status),
            assessment: raw.assessment,
            confidence: Confidence::parse_lossy(&raw.confidence),
            evidence,
        }
    }
}

fn inconclusive(guideline: &str, note: String) -> ComplianceAssessment {
    ComplianceAssessment {
        guideline: guideline.to_string(),
        status: ComplianceStatus::Inconclusive,
        assessment: note,
        confidence: Confidence::Low,
        evidence: vec![],
    }
}

const COMPLIANCE_SYSTEM_PROMPT: &str = "You are a code compliance analyst. You judge one \
guideline at a time against retrieved code context. When the guideline's subject matter does \
not exist in the codebase at all, the status is not_applicable. You respond with raw JSON only.";

pub(crate) fn build_triage_context(retrieved: &[SearchResult]) -> String {
    if retrieved.is_empty() {
        return "(no relevant code was found in the repository for this guideline)\n".to_string();
    }
    let mut context = String::new();
    for hit in retrieved {
        context.push_str(&format!(
            "--- {} (lines {}-{}) ---\n{}\n",
            hit.file_path, hit.start_line, hit.end_line, hit.text
        ));
    }
    context
}

fn build_assessment_prompt(guideline: &str, retrieved: &[SearchResult]) -> String {
    let context = build_triage_context(retrieved);

    format!(
        "Guideline:\n{guideline}\n\n\
         Retrieved code context:\n{context}\n\
         Judge whether the codebase complies with this guideline, based only on the context \
         above. Respond with JSON:\n\
         {{\"status\": \"pass|fail|inconclusive|not_applicable\", \
         \"assessment\": \"<one-paragraph judgement>\", \
         \"confidence\": \"high|medium|low\", \
         \"evidence\": [{{\"file_path\": \"<path from context>\", \"line_number\": <number or null>, \
         \"snippet\": \"<code>\", \"relevance\": \"<why this matters>\"}}]}}\n\
         Use not_applicable when the guideline's subject matter is absent from the codebase. \
         Evidence entries may only cite files from the context."
    )
}

/// Share of definitive guidelines that pass; `not_applicable` is excluded
/// from the denominator.
pub fn pass_rate(assessments: &[ComplianceAssessment]) -> Option<f64> {
    let applicable = assessments
        .iter()
        .filter(|a| a.status != ComplianceStatus::NotApplicable)
        .count();
    if applicable == 0 {
        return None;
    }
    let passed = assessments
        .iter()
        .filter(|a| a.status == ComplianceStatus::Pass)
        .count();
    Some(passed as f64 / applicable as f64)
}

pub fn summarize(assessments: &[ComplianceAssessment]) -> String {
    let total = assessments.len();
    let count = |status: ComplianceStatus| {
        assessments.iter().filter(|a| a.status == status).count()
    };
    let mut summary = format!(
        "{total} guidelines checked: {} pass, {} fail, {} inconclusive, {} not applicable.",
        count(ComplianceStatus::Pass),
        count(ComplianceStatus::Fail),
        count(ComplianceStatus::Inconclusive),
        count(ComplianceStatus::NotApplicable),
    );
    if let Some(rate) = pass_rate(assessments) {
        summary.push_str(&format!(" Pass rate: {:.0}%.", rate * 100.0));
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;
    use guardian_config::RetrySettings;
    use guardian_index::{HashEmbedder, IndexOptions};
    use std::sync::Arc;

    #[test]
    fn guidelines_from_bullets() {
        let brief = "Intro line\n- No hardcoded credentials\n* Encrypt data at rest\n1. Log every access\n\n2) Validate inputs";
        let guidelines = extract_guidelines(brief);
        assert_eq!(
            guidelines,
            vec![
                "No hardcoded credentials",
                "Encrypt data at rest",
                "Log every access",
                "Validate inputs",
            ]
        );
    }

    #[test]
    fn guidelines_fall_back_to_lines() {
        let brief = "No bullets here\nJust two lines";
        assert_eq!(extract_guidelines(brief).len(), 2);
    }

    async fn fixture_index() -> (tempfile::TempDir, RepoIndex) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("auth.py"),
            "API_KEY = \"abc123\"\npassword = \"hunter2\"\n",
        )
        .unwrap();
        let index = RepoIndex::build(
            dir.path(),
            Arc::new(HashEmbedder::new()),
            &IndexOptions::default(),
        )
        .await
        .unwrap();
        (dir, index)
    }

    #[tokio::test]
    async fn assessment_keeps_only_retrieved_evidence() {
        let (_dir, index) = fixture_index().await;
        let provider = MockProvider::new().then_text(
            r#"{"status": "fail", "assessment": "credentials in source", "confidence": "high",
                "evidence": [
                  {"file_path": "auth.py", "line_number": 1, "snippet": "API_KEY = \"abc123\"", "relevance": "hardcoded"},
                  {"file_path": "not_retrieved.py", "line_number": 1, "snippet": "x", "relevance": "fabricated"},
                  {"file_path": "../escape.py", "line_number": 1, "snippet": "x", "relevance": "bad path"}
                ]}"#,
        );
        let llm = LlmClient::new(Arc::new(provider), RetrySettings::default());
        let checker = ComplianceChecker {
            llm: &llm,
            retrieval_k: 5,
        };

        let assessment = checker
            .assess_one(&index, "No hardcoded API_KEY or password values in source")
            .await;
        assert_eq!(assessment.status, ComplianceStatus::Fail);
        assert_eq!(assessment.evidence.len(), 1);
        assert_eq!(assessment.evidence[0].file_path, "auth.py");
    }

    #[tokio::test]
    async fn absent_subject_matter_is_not_applicable() {
        // Backend-only repo: accessibility guidelines have nothing to bind to.
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("worker.py"),
            "def process(queue):\n    for job in queue:\n        run(job)\n",
        )
        .unwrap();
        let index = RepoIndex::build(
            dir.path(),
            Arc::new(HashEmbedder::new()),
            &IndexOptions::default(),
        )
        .await
        .unwrap();

        let provider = MockProvider::new().with_default_text(
            r#"{"status": "not_applicable", "assessment": "no HTML or JSX in the codebase", "confidence": "high", "evidence": []}"#,
        );
        let llm = LlmClient::new(Arc::new(provider), RetrySettings::default());
        let checker = ComplianceChecker {
            llm: &llm,
            retrieval_k: 5,
        };

        let assessments = checker
            .assess_all(
                &index,
                &[
                    "Every img element carries an alt attribute".to_string(),
                    "Interactive targets are at least 24x24 pixels".to_string(),
                ],
            )
            .await;
        assert!(assessments
            .iter()
            .all(|a| a.status == ComplianceStatus::NotApplicable));
        let summary = summarize(&assessments);
        assert!(summary.contains("2 not applicable"));
        assert!(pass_rate(&assessments).is_none());
    }

    #[tokio::test]
    async fn unparseable_verdict_is_inconclusive() {
        let (_dir, index) = fixture_index().await;
        let provider = MockProvider::new().then_text("not json at all");
        let llm = LlmClient::new(Arc::new(provider), RetrySettings::default());
        let checker = ComplianceChecker {
            llm: &llm,
            retrieval_k: 5,
        };

        let assessment = checker.assess_one(&index, "Some guideline").await;
        assert_eq!(assessment.status, ComplianceStatus::Inconclusive);
        assert!(assessment.evidence.is_empty());
    }

    #[test]
    fn pass_rate_excludes_not_applicable() {
        let mk = |status| ComplianceAssessment {
            guideline: "g".into(),
            status,
            assessment: String::new(),
            confidence: Confidence::Medium,
            evidence: vec![],
        };
        let assessments = vec![
            mk(ComplianceStatus::Pass),
            mk(ComplianceStatus::Fail),
            mk(ComplianceStatus::NotApplicable),
        ];
        let rate = pass_rate(&assessments).unwrap();
        assert!((rate - 0.5).abs() < 1e-9);

        let all_na = vec![mk(ComplianceStatus::NotApplicable)];
        assert!(pass_rate(&all_na).is_none());

        let summary = summarize(&assessments);
        assert!(summary.contains("1 pass"));
        assert!(summary.contains("1 not applicable"));
    }
}
