use crate::llm::{LlmClient, TEMP_DETERMINISTIC};
use crate::plan::Plan;
use crate::report::ToolResults;

/// Per-field cap on tool output fed to the synthesizer.
const FIELD_LIMIT: usize = 6000;
/// Violations listed individually before the rest is summarized in bulk.
const VIOLATION_LIMIT: usize = 40;

/// One model call over the collected tool results. Any failure degrades to
/// a raw concatenation of the tool outputs with an explicit warning, so the
/// final answer always exists.
pub async fn synthesize(
    llm: &LlmClient,
    query: &str,
    plan: &Plan,
    results: &ToolResults,
) -> String {
    let prompt = build_synthesis_prompt(query, plan, results);
    match llm
        .chat(Some(SYNTHESIS_SYSTEM_PROMPT), &prompt, TEMP_DETERMINISTIC)
        .await
    {
        Ok(answer) if !answer.trim().is_empty() => answer,
        Ok(_) => raw_dump(results),
        Err(err) => {
            tracing::warn!("synthesis failed, returning raw tool output: {err}");
            format!(
                "Warning: answer synthesis failed ({err}); raw tool results follow.\n\n{}",
                raw_dump(results)
            )
        }
    }
}

const SYNTHESIS_SYSTEM_PROMPT: &str = "You summarize compliance-audit tool results for the \
user. Report only findings present in the tool results; never invent violations, files, or \
line numbers that are not listed. When a tool failed, say plainly what failed and what that \
means for the answer.";

fn build_synthesis_prompt(query: &str, plan: &Plan, results: &ToolResults) -> String {
    let mut sections = String::new();

    if let Some(brief) = &results.legal_brief {
        sections.push_str(&format!(
            "## Technical brief\n{}\n\n",
            truncate(brief, FIELD_LIMIT)
        ));
    }

    if let Some(audit) = &results.audit {
        sections.push_str(&format!(
            "## Audit ({} mode) of {}\n{} violations across {} files scanned / {} analyzed; \
             {} chunks failed analysis.\n",
            audit.mode,
            audit.repository,
            audit.total_violations,
            audit.files_scanned,
            audit.files_analyzed,
            audit.scan_statistics.chunks_failed,
        ));
        for v in audit.violations.iter().take(VIOLATION_LIMIT) {
            let line = v
                .line_number
                .map(|l| l.to_string())
                .unwrap_or_else(|| "?".into());
            sections.push_str(&format!(
                "- {}:{line} [{}] {} - {}\n",
                v.file_path, v.severity, v.rule_violated, v.explanation
            ));
        }
        if audit.violations.len() > VIOLATION_LIMIT {
            sections.push_str(&format!(
                "… and {} more violations.\n",
                audit.violations.len() - VIOLATION_LIMIT
            ));
        }
        sections.push('\n');
    }

    if let Some(checks) = &results.compliance_checks {
        sections.push_str("## Guideline assessments\n");
        for check in checks {
            sections.push_str(&format!(
                "- [{:?}/{:?}] {} - {}\n",
                check.status,
                check.confidence,
                check.guideline,
                truncate(&check.assessment, 400)
            ));
        }
        sections.push('\n');
    }

    if let Some(qa) = &results.qa_answer {
        sections.push_str(&format!(
            "## Repository answer\n{}\nSources: {}\n\n",
            truncate(&qa.answer, FIELD_LIMIT),
            qa.sources.join(", ")
        ));
    }

    for failure in &results.failures {
        sections.push_str(&format!(
            "## Tool failure\n{} failed ({}): {}\n\n",
            failure.tool, failure.kind, failure.message
        ));
    }

    if sections.is_empty() {
        sections.push_str("(no tool produced any output)\n");
    }

    format!(
        "User request:\n{query}\n\nPlan reasoning: {}\n\nTool results:\n\n{sections}\
         Write the final answer for the user.",
        truncate(&plan.reasoning, 600)
    )
}

/// Deterministic degradation path: concatenated tool outputs.
pub fn raw_dump(results: &ToolResults) -> String {
    let mut out = String::new();

    if let Some(brief) = &results.legal_brief {
        out.push_str("Technical brief:\n");
        out.push_str(brief);
        out.push_str("\n\n");
    }
    if let Some(audit) = &results.audit {
        out.push_str(&format!(
            "Audit of {}: {} violations.\n",
            audit.repository, audit.total_violations
        ));
        for v in &audit.violations {
            let line = v
                .line_number
                .map(|l| l.to_string())
                .unwrap_or_else(|| "?".into());
            out.push_str(&format!(
                "  {}:{line} [{}] {}\n",
                v.file_path, v.severity, v.rule_violated
            ));
        }
        out.push('\n');
    }
    if let Some(checks) = &results.compliance_checks {
        for check in checks {
            out.push_str(&format!("{:?}: {}\n", check.status, check.guideline));
        }
        out.push('\n');
    }
    if let Some(qa) = &results.qa_answer {
        out.push_str(&qa.answer);
        out.push('\n');
    }
    for failure in &results.failures {
        out.push_str(&format!(
            "{} failed ({}): {}\n",
            failure.tool, failure.kind, failure.message
        ));
    }

    if out.trim().is_empty() {
        out = "No tool produced any output for this request.".to_string();
    }
    out
}

fn truncate(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        return s.to_string();
    }
    let mut end = limit;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}… [truncated]", &s[..end])
}
