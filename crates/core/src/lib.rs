pub mod audit;
pub mod error;
pub mod events;
pub mod jsonx;
pub mod legal;
pub mod llm;
pub mod orchestrator;
pub mod plan;
pub mod qa;
pub mod repo;
pub mod report;

#[cfg(test)]
pub(crate) mod testing;

pub use audit::types::{
    AuditResult, ComplianceAssessment, ComplianceStatus, Confidence, Evidence, ScanStatistics,
    Severity, Violation,
};
pub use error::GuardianError;
pub use events::{EventBus, EventSink, SessionEvent, Stage};
pub use legal::{LegalAnalyst, LegalAnswer, QueryScope};
pub use llm::LlmClient;
pub use orchestrator::{HistoryEntry, Orchestrator, RunOptions};
pub use plan::{AuditMode, Plan, ToolKind};
pub use qa::{QaAnswer, QaSessionInfo};
pub use report::{Report, ToolFailure, ToolResults};
