//! Execution Records
//!
//! One [`ExecutionRecord`] describes one run: which workflow, the input it
//! started from, the evolving context, the current node and the status.
//!
//! Records can be saved to `.stackrunner/{execution_id}.json` so finished
//! runs can be inspected after the process exits.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::context::ExecutionContext;
use crate::execution::error::{EngineError, TaskError};
use crate::monitoring::ExecutionTimeline;

/// Default directory for saved records.
pub const DEFAULT_STATE_DIR: &str = ".stackrunner";

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::TimedOut => "TIMED_OUT",
        };
        f.write_str(text)
    }
}

/// State of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Unique id of this run
    pub execution_id: String,

    /// Name of the workflow being run
    pub workflow: String,

    /// Input exactly as supplied by the caller
    pub input: Value,

    /// Context as of the last completed node
    pub context: ExecutionContext,

    /// Node to execute next; `None` once terminal
    pub current_node: Option<String>,

    pub status: ExecutionStatus,

    /// Error that ended a failed run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Wall-clock budget in seconds
    pub budget_secs: u64,

    #[serde(default)]
    pub timeline: ExecutionTimeline,
}

impl ExecutionRecord {
    /// Creates a running record positioned at `start_node`.
    pub fn new(
        workflow: impl Into<String>,
        input: Value,
        context: ExecutionContext,
        start_node: impl Into<String>,
        budget: Duration,
    ) -> Self {
        Self {
            execution_id: Uuid::new_v4().to_string(),
            workflow: workflow.into(),
            input,
            context,
            current_node: Some(start_node.into()),
            status: ExecutionStatus::Running,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
            budget_secs: budget.as_secs(),
            timeline: ExecutionTimeline::new(),
        }
    }

    pub fn budget(&self) -> Duration {
        Duration::from_secs(self.budget_secs)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == ExecutionStatus::Succeeded
    }

    /// Wall-clock time since the run started (or until it finished).
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at.unwrap_or_else(Utc::now) - self.started_at
    }

    fn finish(&mut self, status: ExecutionStatus) {
        self.status = status;
        self.current_node = None;
        self.finished_at = Some(Utc::now());
    }

    /// Marks the run as succeeded.
    pub fn mark_succeeded(&mut self) {
        self.finish(ExecutionStatus::Succeeded);
    }

    /// Marks the run as failed with the error that ended it.
    pub fn mark_failed(&mut self, error: TaskError) {
        self.error = Some(error);
        self.finish(ExecutionStatus::Failed);
    }

    /// Marks the run as having exceeded its budget.
    pub fn mark_timed_out(&mut self) {
        self.error = Some(TaskError::timeout(format!(
            "execution exceeded its {} s budget",
            self.budget_secs
        )));
        self.finish(ExecutionStatus::TimedOut);
    }

    /// Saves the record as `{dir}/{execution_id}.json`.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<PathBuf, EngineError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let path = Self::record_file_path(dir, &self.execution_id);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)?;

        info!("Saved execution record to {}", path.display());
        Ok(path)
    }

    /// Loads a saved record.
    pub fn load(dir: impl AsRef<Path>, execution_id: &str) -> Result<Self, EngineError> {
        let path = Self::record_file_path(dir.as_ref(), execution_id);
        let content = fs::read_to_string(&path)?;
        let record: ExecutionRecord = serde_json::from_str(&content)?;

        info!("Loaded execution record from {}", path.display());
        Ok(record)
    }

    /// Deletes a saved record; missing files are not an error.
    pub fn delete(dir: impl AsRef<Path>, execution_id: &str) -> Result<(), EngineError> {
        let path = Self::record_file_path(dir.as_ref(), execution_id);
        if path.exists() {
            fs::remove_file(&path)?;
            info!("Deleted execution record: {}", path.display());
        }
        Ok(())
    }

    /// Returns the record file path for an execution id.
    pub fn record_file_path(dir: &Path, execution_id: &str) -> PathBuf {
        dir.join(format!("{}.json", execution_id))
    }
}
