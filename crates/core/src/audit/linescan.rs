use std::collections::HashMap;
use std::path::Path;

use futures::stream::{self, StreamExt};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::audit::types::{sanitize_rel_path, ScanStatistics, Severity, Violation};
use crate::events::{EventBus, Stage};
use crate::jsonx;
use crate::llm::{LlmClient, TEMP_ANALYSIS};

/// Overlap between consecutive line chunks so a violation spanning a chunk
/// boundary is seen by at least one whole chunk. Duplicates introduced by
/// the overlap are removed on `(file_path, line_number, rule_violated)`.
pub const CHUNK_OVERLAP_LINES: usize = 2;

#[derive(Debug, Clone)]
pub struct LineChunk {
    /// 1-based first line of the chunk within its file.
    pub start_line: usize,
    pub line_count: usize,
    pub text: String,
}

/// Split file content into overlapping windows of `chunk_lines` lines.
pub fn chunk_lines(content: &str, chunk_lines: usize) -> Vec<LineChunk> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return vec![];
    }
    let chunk_lines = chunk_lines.max(CHUNK_OVERLAP_LINES + 1);

    let mut chunks = Vec::new();
    let mut pos = 0usize;
    loop {
        let end = (pos + chunk_lines).min(lines.len());
        let text = lines[pos..end].join("\n");
        if !text.trim().is_empty() {
            chunks.push(LineChunk {
                start_line: pos + 1,
                line_count: end - pos,
                text,
            });
        }
        if end >= lines.len() {
            break;
        }
        pos = end - CHUNK_OVERLAP_LINES;
    }
    chunks
}

#[derive(Debug, Deserialize)]
struct RawViolation {
    line: Option<i64>,
    #[serde(default)]
    code: String,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    rule_violated: String,
    #[serde(default)]
    severity: Option<String>,
}

struct WorkItem {
    file_path: String,
    start_line: usize,
    file_lines: usize,
    text: String,
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub violations: Vec<Violation>,
    pub statistics: ScanStatistics,
    pub files_analyzed: usize,
}

/// Exhaustive chunked scan over a file set. Chunk analyses run on a bounded
/// worker pool; the collector below is the only owner of the growing
/// violation list, and emission order is made deterministic by the caller's
/// final sort.
pub struct LineScanner<'a> {
    pub llm: &'a LlmClient,
    pub events: &'a EventBus,
    pub cancel: CancellationToken,
    pub chunk_lines: usize,
    pub workers: usize,
}

impl<'a> LineScanner<'a> {
    pub async fn scan(
        &self,
        root: &Path,
        files: &[guardian_index::FileEntry],
        brief: &str,
    ) -> ScanOutcome {
        let mut statistics = ScanStatistics::default();
        let mut items: Vec<WorkItem> = Vec::new();
        let mut chunks_per_file: HashMap<String, usize> = HashMap::new();
        let mut files_analyzed = 0usize;

        for entry in files {
            let bytes = match std::fs::read(root.join(&entry.rel_path)) {
                Ok(b) => b,
                Err(_) => {
                    statistics.files_skipped += 1;
                    continue;
                }
            };
            let content = String::from_utf8_lossy(&bytes);
            let file_lines = content.lines().count();
            let chunks = chunk_lines(&content, self.chunk_lines);
            if chunks.is_empty() {
                files_analyzed += 1;
                self.emit_file_analyzed(&entry.rel_path, 0);
                continue;
            }
            chunks_per_file.insert(entry.rel_path.clone(), chunks.len());
            for chunk in chunks {
                items.push(WorkItem {
                    file_path: entry.rel_path.clone(),
                    start_line: chunk.start_line,
                    file_lines,
                    text: chunk.text,
                });
            }
        }

        let total_chunks = items.len();
        let mut results = stream::iter(items.into_iter().map(|item| {
            let cancel = self.cancel.clone();
            async move {
                if cancel.is_cancelled() {
                    return (item.file_path, ChunkResult::Cancelled);
                }
                let outcome = self.analyze_chunk(&item, brief).await;
                (item.file_path, outcome)
            }
        }))
        .buffer_unordered(self.workers.max(1));

        let mut violations: Vec<Violation> = Vec::new();
        let mut pending: HashMap<String, usize> = chunks_per_file.clone();
        let mut per_file_hits: HashMap<String, usize> = HashMap::new();

        while let Some((file_path, result)) = results.next().await {
            statistics.chunks_scanned += 1;
            match result {
                ChunkResult::Ok(mut found) => {
                    statistics.llm_calls += 1;
                    *per_file_hits.entry(file_path.clone()).or_insert(0) += found.len();
                    violations.append(&mut found);
                }
                ChunkResult::Failed(reason) => {
                    statistics.llm_calls += 1;
                    statistics.chunks_failed += 1;
                    tracing::debug!(file = %file_path, "chunk analysis failed: {reason}");
                }
                ChunkResult::Cancelled => {
                    statistics.chunks_failed += 1;
                }
            }

            if let Some(remaining) = pending.get_mut(&file_path) {
                *remaining -= 1;
                if *remaining == 0 {
                    pending.remove(&file_path);
                    files_analyzed += 1;
                    let hits = per_file_hits.get(&file_path).copied().unwrap_or(0);
                    self.emit_file_analyzed(&file_path, hits);
                }
            }
        }

        tracing::debug!(
            chunks = total_chunks,
            failed = statistics.chunks_failed,
            violations = violations.len(),
            "line scan complete"
        );

        ScanOutcome {
            violations,
            statistics,
            files_analyzed,
        }
    }

    fn emit_file_analyzed(&self, path: &str, violations_count: usize) {
        self.events.emit_with(
            Stage::FileAnalyzed,
            format!("analyzed {path}"),
            Some(serde_json::json!({
                "path": path,
                "violations_count": violations_count,
            })),
        );
    }

    async fn analyze_chunk(&self, item: &WorkItem, brief: &str) -> ChunkResult {
        let prompt = build_chunk_prompt(&item.file_path, item.start_line, &item.text, brief);
        let response = match self
            .llm
            .chat(Some(AUDITOR_SYSTEM_PROMPT), &prompt, TEMP_ANALYSIS)
            .await
        {
            Ok(text) => text,
            Err(err) => return ChunkResult::Failed(err.to_string()),
        };

        let raw: Vec<RawViolation> = match jsonx::parse_llm_json(&response) {
            Ok(list) => list,
            Err(err) => return ChunkResult::Failed(err.to_string()),
        };

        let violations = raw
            .into_iter()
            .filter_map(|r| to_violation(r, item))
            .collect();
        ChunkResult::Ok(violations)
    }
}

enum ChunkResult {
    Ok(Vec<Violation>),
    Failed(String),
    Cancelled,
}

const AUDITOR_SYSTEM_PROMPT: &str = "You are a meticulous code compliance auditor. \
You only report violations you can point to in the provided code. \
You respond with raw JSON and nothing else.";

fn build_chunk_prompt(file_path: &str, start_line: usize, chunk: &str, brief: &str) -> String {
    format!(
        "Technical requirements to audit against:\n{brief}\n\n\
         File: {file_path}\n\
         The excerpt below starts at line {start_line} of the file. Line numbers in your answer \
         are relative to the excerpt (the first excerpt line is line 1).\n\n\
         ```\n{chunk}\n```\n\n\
         Report every violation of the requirements visible in the excerpt as a JSON array:\n\
         [{{\"line\": <number>, \"code\": \"<offending line>\", \"explanation\": \"<why>\", \
         \"rule_violated\": \"<which requirement>\", \"severity\": \"critical|high|medium|low\"}}]\n\
         Respond with [] if the excerpt is clean. No prose, no code fences."
    )
}

fn to_violation(raw: RawViolation, item: &WorkItem) -> Option<Violation> {
    if raw.rule_violated.trim().is_empty() && raw.explanation.trim().is_empty() {
        return None;
    }
    let file_path = sanitize_rel_path(&item.file_path)?;

    let line_number = raw.line.and_then(|rel| {
        if rel < 1 {
            return None;
        }
        let absolute = item.start_line as i64 + rel - 1;
        if absolute < 1 {
            return None;
        }
        Some((absolute as u32).min(item.file_lines.max(1) as u32))
    });

    Some(Violation {
        file_path,
        line_number,
        rule_violated: raw.rule_violated,
        explanation: raw.explanation,
        code_snippet: raw.code,
        severity: raw
            .severity
            .as_deref()
            .map(Severity::parse_lossy)
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::types::sort_and_dedup;
    use crate::testing::MockProvider;
    use guardian_config::RetrySettings;
    use std::sync::Arc;

    fn scanner<'a>(llm: &'a LlmClient, events: &'a EventBus) -> LineScanner<'a> {
        LineScanner {
            llm,
            events,
            cancel: CancellationToken::new(),
            chunk_lines: 30,
            workers: 3,
        }
    }

    fn write_repo(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(path, content).unwrap();
        }
        dir
    }

    fn entries(root: &Path) -> Vec<guardian_index::FileEntry> {
        guardian_index::walker::walk_repository(root, 1024 * 1024).unwrap()
    }

    #[test]
    fn chunking_overlaps_by_two_lines() {
        let content = (1..=70)
            .map(|i| format!("line {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_lines(&content, 30);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[1].start_line, 29);
        assert_eq!(chunks[2].start_line, 57);
        assert_eq!(chunks[2].line_count, 14);
    }

    #[test]
    fn empty_content_has_no_chunks() {
        assert!(chunk_lines("", 30).is_empty());
        assert!(chunk_lines("\n\n\n", 30).is_empty());
    }

    #[tokio::test]
    async fn scan_finds_violation_with_absolute_line() {
        let repo = write_repo(&[(
            "app.py",
            "import os\n\nDEBUG = True\nAPI_KEY = \"abc123\"\n",
        )]);
        let provider = MockProvider::new().with_default_text(
            r#"[{"line": 4, "code": "API_KEY = \"abc123\"", "explanation": "hardcoded credential", "rule_violated": "No hardcoded credentials", "severity": "critical"}]"#,
        );
        let llm = LlmClient::new(Arc::new(provider), RetrySettings::default());
        let events = EventBus::new();

        let outcome = scanner(&llm, &events)
            .scan(repo.path(), &entries(repo.path()), "- No hardcoded credentials")
            .await;

        assert_eq!(outcome.violations.len(), 1);
        let v = &outcome.violations[0];
        assert_eq!(v.file_path, "app.py");
        assert_eq!(v.line_number, Some(4));
        assert_eq!(v.severity, Severity::Critical);
        assert_eq!(outcome.statistics.chunks_failed, 0);
        assert_eq!(outcome.files_analyzed, 1);
        assert_eq!(events.count(Stage::FileAnalyzed), 1);
    }

    #[tokio::test]
    async fn parse_failure_marks_chunk_failed_and_continues() {
        let repo = write_repo(&[("a.py", "x = 1\n"), ("b.py", "y = 2\n")]);
        let provider = MockProvider::new()
            .then_text("```json\n{not valid}\n```")
            .with_default_text("[]");
        let llm = LlmClient::new(Arc::new(provider), RetrySettings::default());
        let events = EventBus::new();

        let outcome = scanner(&llm, &events)
            .scan(repo.path(), &entries(repo.path()), "- rule")
            .await;

        assert_eq!(outcome.statistics.chunks_failed, 1);
        assert_eq!(outcome.statistics.chunks_scanned, 2);
        assert_eq!(outcome.files_analyzed, 2);
        assert!(outcome.violations.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limits_are_retried_without_failing_chunks() {
        let repo = write_repo(&[("a.py", "x = 1\n")]);
        let provider = MockProvider::new().rate_limited(2).with_default_text("[]");
        let calls = provider.call_counter();
        let llm = LlmClient::new(Arc::new(provider), RetrySettings::default());
        let events = EventBus::new();

        let outcome = scanner(&llm, &events)
            .scan(repo.path(), &entries(repo.path()), "- rule")
            .await;

        assert_eq!(outcome.statistics.chunks_failed, 0);
        assert!(calls.load(std::sync::atomic::Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn overlap_duplicates_collapse_after_sort() {
        // One violation reported by two overlapping chunks.
        let content = (1..=58)
            .map(|i| {
                if i == 29 {
                    "API_KEY = \"abc\"".to_string()
                } else {
                    format!("line {i}")
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        let repo = write_repo(&[("app.py", &content)]);
        // Chunk 1 covers 1..=30 (violation at relative 29); chunk 2 covers
        // 29..=58 (violation at relative 1).
        let provider = MockProvider::new()
            .then_text(r#"[{"line": 29, "code": "API_KEY", "explanation": "secret", "rule_violated": "no secrets", "severity": "high"}]"#)
            .then_text(r#"[{"line": 1, "code": "API_KEY", "explanation": "secret", "rule_violated": "no secrets", "severity": "high"}]"#)
            .with_default_text("[]");
        let llm = LlmClient::new(Arc::new(provider), RetrySettings::default());
        let events = EventBus::new();

        let scanner = LineScanner {
            llm: &llm,
            events: &events,
            cancel: CancellationToken::new(),
            chunk_lines: 30,
            workers: 1,
        };
        let mut outcome = scanner
            .scan(repo.path(), &entries(repo.path()), "- no secrets")
            .await;

        sort_and_dedup(&mut outcome.violations);
        assert_eq!(outcome.violations.len(), 1);
        assert_eq!(outcome.violations[0].line_number, Some(29));
    }

    #[tokio::test]
    async fn cancellation_drains_without_new_calls() {
        let repo = write_repo(&[("a.py", "x = 1\n"), ("b.py", "y = 2\n")]);
        let provider = MockProvider::new().with_default_text("[]");
        let calls = provider.call_counter();
        let llm = LlmClient::new(Arc::new(provider), RetrySettings::default());
        let events = EventBus::new();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let scanner = LineScanner {
            llm: &llm,
            events: &events,
            cancel,
            chunk_lines: 30,
            workers: 2,
        };
        let outcome = scanner
            .scan(repo.path(), &entries(repo.path()), "- rule")
            .await;

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(outcome.violations.is_empty());
        assert_eq!(outcome.statistics.chunks_failed, outcome.statistics.chunks_scanned);
    }
}
