use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use guardian_index::{embedder::tokenize, FileEntry, RepoIndex};

use crate::audit::compliance::build_triage_context;
use crate::audit::linescan::{LineScanner, ScanOutcome};
use crate::audit::types::{
    sanitize_rel_path, ComplianceAssessment, ComplianceStatus, Confidence, Evidence, Violation,
};
use crate::events::{EventBus, Stage};
use crate::jsonx;
use crate::llm::{LlmClient, TEMP_ANALYSIS, TEMP_DETERMINISTIC};

/// What evidence of a violation of one guideline looks like in a codebase.
#[derive(Debug, Clone, Default)]
pub struct SearchProfile {
    pub keywords: Vec<String>,
    pub code_patterns: Vec<String>,
    pub file_globs: Vec<String>,
}

impl SearchProfile {
    /// Degenerate translation used when the model's mapping cannot be
    /// parsed: the tokenized guideline itself.
    pub fn degenerate(guideline: &str) -> Self {
        Self {
            keywords: tokenize(guideline),
            code_patterns: vec![],
            file_globs: vec![],
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawProfile {
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    code_patterns: Vec<String>,
    #[serde(default)]
    file_globs: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawTriage {
    #[serde(default)]
    status: String,
    #[serde(default)]
    assessment: String,
    #[serde(default)]
    confidence: String,
    #[serde(default)]
    candidate_files: Vec<String>,
}

#[derive(Debug)]
pub struct HybridOutcome {
    pub assessments: Vec<ComplianceAssessment>,
    pub scan: ScanOutcome,
    pub candidate_count: usize,
}

/// Two-pass audit: semantic triage per guideline (fast, imprecise), then an
/// exhaustive line scan restricted to nominated candidate files (precise,
/// bounded cost), then a merge that reconciles the two verdicts.
pub struct HybridEngine<'a> {
    pub llm: &'a LlmClient,
    pub events: &'a EventBus,
    pub cancel: CancellationToken,
    pub chunk_lines: usize,
    pub workers: usize,
    pub candidate_cap: usize,
    pub retrieval_k: usize,
}

impl<'a> HybridEngine<'a> {
    pub async fn run(
        &self,
        root: &Path,
        files: &[FileEntry],
        index: &RepoIndex,
        guidelines: &[String],
        brief: &str,
    ) -> HybridOutcome {
        // Step 1: translate guidelines into searchable patterns.
        let profiles = self.translate_guidelines(guidelines).await;

        // Step 3: guideline-level triage over the index built in step 2.
        let mut assessments = Vec::with_capacity(guidelines.len());
        let mut nominations: HashMap<String, usize> = HashMap::new();
        for (guideline, profile) in guidelines.iter().zip(&profiles) {
            let (assessment, candidates) = self.triage(index, guideline, profile).await;
            for candidate in candidates {
                *nominations.entry(candidate).or_insert(0) += 1;
            }
            assessments.push(assessment);
        }
        self.events.emit_with(
            Stage::Pass1Complete,
            format!("triage complete across {} guidelines", guidelines.len()),
            Some(serde_json::json!({
                "guidelines": guidelines.len(),
                "candidate_files": nominations.len(),
            })),
        );

        // Step 4: candidate selection.
        let candidates = select_candidates(files, &nominations, &profiles, self.candidate_cap);
        let candidate_count = candidates.len();

        // Step 5: deep scan restricted to the candidates, rules from the
        // original brief.
        let scanner = LineScanner {
            llm: self.llm,
            events: self.events,
            cancel: self.cancel.clone(),
            chunk_lines: self.chunk_lines,
            workers: self.workers,
        };
        let scan = scanner.scan(root, &candidates, brief).await;
        self.events.emit_with(
            Stage::Pass2Complete,
            format!(
                "deep scan complete: {} candidate files, {} violations",
                candidate_count,
                scan.violations.len()
            ),
            Some(serde_json::json!({
                "candidates": candidate_count,
                "violations": scan.violations.len(),
            })),
        );

        // Step 6: merge pass-2 evidence into the pass-1 verdicts.
        merge_evidence(&mut assessments, &scan.violations);

        HybridOutcome {
            assessments,
            scan,
            candidate_count,
        }
    }

    /// One model call mapping every guideline to keywords, code patterns,
    /// and file globs. Any parse trouble degrades to tokenized guidelines.
    async fn translate_guidelines(&self, guidelines: &[String]) -> Vec<SearchProfile> {
        let bullet_list = guidelines
            .iter()
            .map(|g| format!("- {g}"))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "For each guideline below, describe what evidence of a violation looks like in \
             source code.\n\nGuidelines:\n{bullet_list}\n\n\
             Respond with a JSON object keyed by the exact guideline text, each value:\n\
             {{\"keywords\": [\"<search terms>\"], \"code_patterns\": [\"<telltale code>\"], \
             \"file_globs\": [\"<glob like *.py or src/**/*.ts>\"]}}\n\
             JSON only, no code fences."
        );

        let response = match self.llm.chat(None, &prompt, TEMP_DETERMINISTIC).await {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!("guideline translation failed, using degenerate profiles: {err}");
                return guidelines.iter().map(|g| SearchProfile::degenerate(g)).collect();
            }
        };

        let parsed: HashMap<String, RawProfile> = match jsonx::parse_llm_json(&response) {
            Ok(map) => map,
            Err(err) => {
                tracing::warn!("guideline translation unparseable: {err}");
                return guidelines.iter().map(|g| SearchProfile::degenerate(g)).collect();
            }
        };

        guidelines
            .iter()
            .map(|g| match parsed.get(g) {
                Some(raw) => SearchProfile {
                    keywords: raw.keywords.clone(),
                    code_patterns: raw.code_patterns.clone(),
                    file_globs: raw.file_globs.clone(),
                },
                None => SearchProfile::degenerate(g),
            })
            .collect()
    }

    /// Pass-1 verdict for one guideline plus the candidate files worth a
    /// deep scan.
    async fn triage(
        &self,
        index: &RepoIndex,
        guideline: &str,
        profile: &SearchProfile,
    ) -> (ComplianceAssessment, Vec<String>) {
        let query = if profile.keywords.is_empty() {
            guideline.to_string()
        } else {
            format!("{guideline} {}", profile.keywords.join(" "))
        };
        let retrieved = index.search(&query, self.retrieval_k).await.unwrap_or_default();

        let context = build_triage_context(&retrieved);
        let prompt = format!(
            "Guideline:\n{guideline}\n\nRetrieved code context:\n{context}\n\
             Give a first-pass verdict and name the repository files most worth a \
             line-by-line inspection for this guideline. Respond with JSON:\n\
             {{\"status\": \"pass|fail|inconclusive|not_applicable\", \
             \"assessment\": \"<short judgement>\", \"confidence\": \"high|medium|low\", \
             \"candidate_files\": [\"<repository-relative path>\"]}}\n\
             JSON only."
        );

        let fallback_candidates: Vec<String> =
            retrieved.iter().map(|r| r.file_path.clone()).collect();

        let response = match self.llm.chat(None, &prompt, TEMP_ANALYSIS).await {
            Ok(text) => text,
            Err(err) => {
                return (
                    triage_inconclusive(guideline, format!("triage failed: {err}")),
                    fallback_candidates,
                );
            }
        };

        match jsonx::parse_llm_json::<RawTriage>(&response) {
            Ok(raw) => {
                let candidates: Vec<String> = raw
                    .candidate_files
                    .iter()
                    .filter_map(|p| sanitize_rel_path(p))
                    .collect();
                let candidates = if candidates.is_empty() {
                    fallback_candidates
                } else {
                    candidates
                };
                (
                    ComplianceAssessment {
                        guideline: guideline.to_string(),
                        status: ComplianceStatus::parse_lossy(&raw.status),
                        assessment: raw.assessment,
                        confidence: Confidence::parse_lossy(&raw.confidence),
                        evidence: vec![],
                    },
                    candidates,
                )
            }
            Err(err) => (
                triage_inconclusive(guideline, format!("triage unparseable: {err}")),
                fallback_candidates,
            ),
        }
    }
}

fn triage_inconclusive(guideline: &str, note: String) -> ComplianceAssessment {
    ComplianceAssessment {
        guideline: guideline.to_string(),
        status: ComplianceStatus::Inconclusive,
        assessment: note,
        confidence: Confidence::Low,
        evidence: vec![],
    }
}

/// Step 4: union of nominated files, intersected with the translation's
/// file globs, capped and ordered by (nomination count desc, size asc).
pub fn select_candidates(
    files: &[FileEntry],
    nominations: &HashMap<String, usize>,
    profiles: &[SearchProfile],
    cap: usize,
) -> Vec<FileEntry> {
    let patterns: Vec<glob::Pattern> = profiles
        .iter()
        .flat_map(|p| p.file_globs.iter())
        .filter_map(|g| glob::Pattern::new(g).ok())
        .collect();

    let mut selected: Vec<(&FileEntry, usize)> = files
        .iter()
        .filter_map(|entry| {
            let count = *nominations.get(&entry.rel_path)?;
            if !patterns.is_empty() {
                let matches = patterns.iter().any(|p| {
                    p.matches(&entry.rel_path)
                        || Path::new(&entry.rel_path)
                            .file_name()
                            .and_then(|n| n.to_str())
                            .map(|n| p.matches(n))
                            .unwrap_or(false)
                });
                if !matches {
                    return None;
                }
            }
            Some((entry, count))
        })
        .collect();

    selected.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then(a.0.size.cmp(&b.0.size))
            .then(a.0.rel_path.cmp(&b.0.rel_path))
    });
    selected.truncate(cap);
    selected.into_iter().map(|(e, _)| e.clone()).collect()
}

/// Step 6: attach precise violations as evidence to the guideline they
/// answer to; promote and downgrade pass-1 verdicts accordingly. Violations
/// that match no guideline stay in the flat list untouched.
pub fn merge_evidence(assessments: &mut [ComplianceAssessment], violations: &[Violation]) {
    let guideline_tokens: Vec<Vec<String>> = assessments
        .iter()
        .map(|a| tokenize(&a.guideline))
        .collect();

    let mut attached: Vec<Vec<&Violation>> = vec![Vec::new(); assessments.len()];
    for violation in violations {
        if let Some(idx) = best_guideline(&guideline_tokens, assessments, violation) {
            attached[idx].push(violation);
        }
    }

    for (assessment, hits) in assessments.iter_mut().zip(attached) {
        if !hits.is_empty() {
            for v in &hits {
                assessment.evidence.push(Evidence {
                    file_path: v.file_path.clone(),
                    line_number: v.line_number,
                    snippet: v.code_snippet.clone(),
                    relevance: v.explanation.clone(),
                });
            }
            if assessment.status == ComplianceStatus::Inconclusive {
                assessment.status = ComplianceStatus::Fail;
            }
        } else if assessment.status == ComplianceStatus::Fail {
            assessment.status = ComplianceStatus::Inconclusive;
            if !assessment.assessment.contains("semantic only") {
                assessment.assessment.push_str(" (semantic only)");
            }
        }
    }
}

fn best_guideline(
    guideline_tokens: &[Vec<String>],
    assessments: &[ComplianceAssessment],
    violation: &Violation,
) -> Option<usize> {
    let rule_lower = violation.rule_violated.to_lowercase();
    let rule_tokens = tokenize(&violation.rule_violated);

    let mut best: Option<(usize, f32)> = None;
    for (idx, assessment) in assessments.iter().enumerate() {
        let guideline_lower = assessment.guideline.to_lowercase();
        if guideline_lower == rule_lower
            || guideline_lower.contains(&rule_lower)
            || rule_lower.contains(&guideline_lower)
        {
            return Some(idx);
        }
        let score = token_overlap(&guideline_tokens[idx], &rule_tokens);
        if score > best.map(|(_, s)| s).unwrap_or(0.0) {
            best = Some((idx, score));
        }
    }
    best.filter(|(_, score)| *score >= 0.3).map(|(idx, _)| idx)
}

fn token_overlap(a: &[String], b: &[String]) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let hits = b.iter().filter(|t| a.contains(t)).count();
    hits as f32 / b.len().min(a.len()) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::types::Severity;
    use crate::testing::MockProvider;
    use guardian_config::RetrySettings;
    use guardian_index::{HashEmbedder, IndexOptions};
    use std::sync::Arc;

    fn entry(path: &str, size: u64) -> FileEntry {
        FileEntry {
            rel_path: path.to_string(),
            abs_path: std::path::PathBuf::from(path),
            size,
        }
    }

    fn violation(path: &str, line: u32, rule: &str) -> Violation {
        Violation {
            file_path: path.to_string(),
            line_number: Some(line),
            rule_violated: rule.to_string(),
            explanation: "found it".to_string(),
            code_snippet: "bad()".to_string(),
            severity: Severity::High,
        }
    }

    fn assessment(guideline: &str, status: ComplianceStatus) -> ComplianceAssessment {
        ComplianceAssessment {
            guideline: guideline.to_string(),
            status,
            assessment: "first pass".to_string(),
            confidence: Confidence::Medium,
            evidence: vec![],
        }
    }

    #[test]
    fn candidates_ordered_by_nominations_then_size() {
        let files = vec![
            entry("big.py", 9000),
            entry("small.py", 100),
            entry("other.py", 500),
            entry("unnominated.py", 1),
        ];
        let mut nominations = HashMap::new();
        nominations.insert("big.py".to_string(), 2);
        nominations.insert("small.py".to_string(), 2);
        nominations.insert("other.py".to_string(), 1);

        let selected = select_candidates(&files, &nominations, &[], 10);
        let paths: Vec<&str> = selected.iter().map(|e| e.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["small.py", "big.py", "other.py"]);
    }

    #[test]
    fn candidates_respect_cap_and_globs() {
        let files = vec![
            entry("a.py", 10),
            entry("b.js", 10),
            entry("c.py", 20),
        ];
        let mut nominations = HashMap::new();
        for f in &files {
            nominations.insert(f.rel_path.clone(), 1);
        }
        let profiles = vec![SearchProfile {
            keywords: vec![],
            code_patterns: vec![],
            file_globs: vec!["*.py".to_string()],
        }];

        let selected = select_candidates(&files, &nominations, &profiles, 1);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].rel_path, "a.py");
    }

    #[test]
    fn merge_promotes_inconclusive_with_evidence() {
        let mut assessments = vec![assessment(
            "No hardcoded credentials",
            ComplianceStatus::Inconclusive,
        )];
        let violations = vec![violation("app.py", 4, "No hardcoded credentials")];
        merge_evidence(&mut assessments, &violations);
        assert_eq!(assessments[0].status, ComplianceStatus::Fail);
        assert_eq!(assessments[0].evidence.len(), 1);
        assert_eq!(assessments[0].evidence[0].file_path, "app.py");
    }

    #[test]
    fn merge_downgrades_fail_without_evidence() {
        let mut assessments = vec![assessment(
            "Encrypt data at rest",
            ComplianceStatus::Fail,
        )];
        merge_evidence(&mut assessments, &[]);
        assert_eq!(assessments[0].status, ComplianceStatus::Inconclusive);
        assert!(assessments[0].assessment.contains("semantic only"));
    }

    #[test]
    fn unmatched_violations_attach_nowhere() {
        let mut assessments = vec![assessment(
            "Provide alt text for images",
            ComplianceStatus::Pass,
        )];
        let violations = vec![violation("db.py", 2, "No plaintext database passwords")];
        merge_evidence(&mut assessments, &violations);
        assert!(assessments[0].evidence.is_empty());
        assert_eq!(assessments[0].status, ComplianceStatus::Pass);
    }

    #[tokio::test]
    async fn full_hybrid_run_over_fixture_repo() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("app.py"),
            "import os\n\nDEBUG = True\nAPI_KEY = \"abc123\"\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("README.md"), "# demo\n").unwrap();

        let files = guardian_index::walker::walk_repository(dir.path(), 1024 * 1024).unwrap();
        let index = RepoIndex::build(
            dir.path(),
            Arc::new(HashEmbedder::new()),
            &IndexOptions::default(),
        )
        .await
        .unwrap();

        // Script: translation, one triage, then the deep-scan default.
        let provider = MockProvider::new()
            .then_text(
                r#"{"No hardcoded credentials": {"keywords": ["api_key", "secret"], "code_patterns": ["API_KEY ="], "file_globs": ["*.py"]}}"#,
            )
            .then_text(
                r#"{"status": "inconclusive", "assessment": "suspicious constant", "confidence": "medium", "candidate_files": ["app.py"]}"#,
            )
            .with_default_text(
                r#"[{"line": 4, "code": "API_KEY = \"abc123\"", "explanation": "hardcoded credential", "rule_violated": "No hardcoded credentials", "severity": "critical"}]"#,
            );
        let llm = LlmClient::new(Arc::new(provider), RetrySettings::default());
        let events = EventBus::new();

        let engine = HybridEngine {
            llm: &llm,
            events: &events,
            cancel: CancellationToken::new(),
            chunk_lines: 30,
            workers: 2,
            candidate_cap: 50,
            retrieval_k: 5,
        };
        let guidelines = vec!["No hardcoded credentials".to_string()];
        let outcome = engine
            .run(
                dir.path(),
                &files,
                &index,
                &guidelines,
                "- No hardcoded credentials",
            )
            .await;

        assert_eq!(outcome.candidate_count, 1);
        assert_eq!(outcome.scan.violations.len(), 1);
        assert_eq!(outcome.scan.violations[0].line_number, Some(4));
        // Inconclusive triage + concrete evidence promotes to fail.
        assert_eq!(outcome.assessments[0].status, ComplianceStatus::Fail);
        assert_eq!(outcome.assessments[0].evidence.len(), 1);
        assert_eq!(events.count(Stage::Pass1Complete), 1);
        assert_eq!(events.count(Stage::Pass2Complete), 1);
    }
}
