use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Planning,
    LegalBriefReady,
    RepoFetchStart,
    RepoFetchDone,
    IndexBuildDone,
    FileAnalyzed,
    Pass1Complete,
    Pass2Complete,
    ToolFailed,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Planning => "planning",
            Stage::LegalBriefReady => "legal_brief_ready",
            Stage::RepoFetchStart => "repo_fetch_start",
            Stage::RepoFetchDone => "repo_fetch_done",
            Stage::IndexBuildDone => "index_build_done",
            Stage::FileAnalyzed => "file_analyzed",
            Stage::Pass1Complete => "pass1_complete",
            Stage::Pass2Complete => "pass2_complete",
            Stage::ToolFailed => "tool_failed",
            Stage::Done => "done",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub timestamp: DateTime<Utc>,
    pub stage: Stage,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// Receives every core event as it happens. The HTTP/SSE shell implements
/// this to translate events into frames; the CLI implements it for progress
/// output.
pub trait EventSink: Send + Sync {
    fn event(&self, event: &SessionEvent);
}

/// Fans events out to registered sinks and keeps the append-only session
/// log.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

struct EventBusInner {
    sinks: Mutex<Vec<Arc<dyn EventSink>>>,
    history: Mutex<Vec<SessionEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EventBusInner {
                sinks: Mutex::new(Vec::new()),
                history: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.inner.sinks.lock().unwrap().push(sink);
    }

    pub fn emit(&self, stage: Stage, message: impl Into<String>) {
        self.emit_with(stage, message, None);
    }

    pub fn emit_with(
        &self,
        stage: Stage,
        message: impl Into<String>,
        payload: Option<serde_json::Value>,
    ) {
        let event = SessionEvent {
            timestamp: Utc::now(),
            stage,
            message: message.into(),
            payload,
        };
        tracing::info!(stage = %event.stage, "{}", event.message);
        for sink in self.inner.sinks.lock().unwrap().iter() {
            sink.event(&event);
        }
        self.inner.history.lock().unwrap().push(event);
    }

    pub fn tool_failed(&self, tool: &str, kind: &str, message: &str) {
        self.emit_with(
            Stage::ToolFailed,
            format!("{tool} failed: {message}"),
            Some(serde_json::json!({
                "tool": tool,
                "kind": kind,
                "message": message,
            })),
        );
    }

    pub fn history(&self) -> Vec<SessionEvent> {
        self.inner.history.lock().unwrap().clone()
    }

    pub fn clear_history(&self) {
        self.inner.history.lock().unwrap().clear();
    }

    pub fn count(&self, stage: Stage) -> usize {
        self.inner
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.stage == stage)
            .count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    impl EventSink for Counter {
        fn event(&self, _event: &SessionEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn events_reach_sinks_and_history() {
        let bus = EventBus::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        bus.add_sink(counter.clone());

        bus.emit(Stage::Planning, "planning query");
        bus.tool_failed("code_auditor", "ingest", "clone failed");

        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
        let history = bus.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].stage, Stage::Planning);
        assert_eq!(history[1].stage, Stage::ToolFailed);
        let payload = history[1].payload.as_ref().unwrap();
        assert_eq!(payload["kind"], "ingest");
    }

    #[test]
    fn stage_labels_match_contract() {
        for (stage, label) in [
            (Stage::Planning, "planning"),
            (Stage::LegalBriefReady, "legal_brief_ready"),
            (Stage::RepoFetchStart, "repo_fetch_start"),
            (Stage::RepoFetchDone, "repo_fetch_done"),
            (Stage::IndexBuildDone, "index_build_done"),
            (Stage::FileAnalyzed, "file_analyzed"),
            (Stage::Pass1Complete, "pass1_complete"),
            (Stage::Pass2Complete, "pass2_complete"),
            (Stage::ToolFailed, "tool_failed"),
            (Stage::Done, "done"),
        ] {
            assert_eq!(stage.as_str(), label);
        }
    }

    #[test]
    fn count_by_stage() {
        let bus = EventBus::new();
        bus.emit(Stage::IndexBuildDone, "one");
        bus.emit(Stage::FileAnalyzed, "two");
        bus.emit(Stage::IndexBuildDone, "three");
        assert_eq!(bus.count(Stage::IndexBuildDone), 2);
        bus.clear_history();
        assert_eq!(bus.count(Stage::IndexBuildDone), 0);
    }
}
