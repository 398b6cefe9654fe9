//! Ingestion stage tracking and progress notification.
//!
//! The pipeline moves a document through a fixed stage sequence and notifies
//! a [`ProgressSink`] at each transition. Progress is emitted on **stderr**
//! so stdout remains parseable for scripts.
//!
//! [`StageTimer`] wraps each stage and logs its duration when dropped, so a
//! stage that fails mid-way still gets a timing record.

use std::io::Write;
use std::time::Instant;
use tracing::info;

/// Lifecycle stages of a document ingestion.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    Uploading,
    Extracting,
    Chunking,
    Embedding,
    Indexing,
    Completed,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Uploading => "uploading",
            Stage::Extracting => "extracting",
            Stage::Chunking => "chunking",
            Stage::Embedding => "embedding",
            Stage::Indexing => "indexing",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        }
    }

    /// Whether the stage ends a document's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives stage transitions from the ingestion pipeline.
pub trait ProgressSink: Send + Sync {
    fn notify(&self, document_id: &str, stage: Stage, detail: &str);
}

/// Human-friendly progress on stderr: "ingest 7f3a…  embedding  12 chunks".
pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn notify(&self, document_id: &str, stage: Stage, detail: &str) {
        let short: String = document_id.chars().take(8).collect();
        let line = if detail.is_empty() {
            format!("ingest {}  {}\n", short, stage)
        } else {
            format!("ingest {}  {}  {}\n", short, stage, detail)
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// No-op sink when progress is disabled.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn notify(&self, _document_id: &str, _stage: Stage, _detail: &str) {}
}

/// Scoped timer for one pipeline stage.
///
/// Logs the stage duration on drop. Dropping on the error path records the
/// time spent before the failure.
pub struct StageTimer {
    stage: Stage,
    document_id: String,
    started: Instant,
}

impl StageTimer {
    pub fn start(document_id: &str, stage: Stage) -> Self {
        info!(document_id, stage = stage.as_str(), "stage started");
        Self {
            stage,
            document_id: document_id.to_string(),
            started: Instant::now(),
        }
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        info!(
            document_id = self.document_id.as_str(),
            stage = self.stage.as_str(),
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "stage finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(Stage::Completed.is_terminal());
        assert!(Stage::Failed.is_terminal());
        for stage in [
            Stage::Uploading,
            Stage::Extracting,
            Stage::Chunking,
            Stage::Embedding,
            Stage::Indexing,
        ] {
            assert!(!stage.is_terminal(), "{} is not terminal", stage);
        }
    }

    #[test]
    fn stage_names_are_lowercase() {
        assert_eq!(Stage::Uploading.to_string(), "uploading");
        assert_eq!(Stage::Failed.to_string(), "failed");
    }
}
