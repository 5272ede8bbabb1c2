//! Error Types
//!
//! Two layers of failure exist while a workflow runs:
//!
//! - [`TaskError`]: a node failed. It is catchable by the node's catch
//!   clauses and is written into the context when caught.
//! - [`EngineError`]: the engine itself cannot proceed (bad input, unknown
//!   workflow, broken definition). These are never routed through catch
//!   clauses.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a node failure, used by catch clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The called operation itself errored.
    TaskFailed,
    /// The target resource does not exist.
    ResourceNotFound,
    /// A run or sub-run exceeded its wall-clock budget.
    Timeout,
    /// Malformed input or context; never retried.
    Validation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TaskFailed => "TaskFailed",
            Self::ResourceNotFound => "ResourceNotFound",
            Self::Timeout => "Timeout",
            Self::Validation => "Validation",
        };
        f.write_str(name)
    }
}

/// A catchable node failure.
///
/// Serializes as `{"error": "<kind>", "cause": "..."}`, the shape stored in
/// the context at a catch clause's result path.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {cause}")]
pub struct TaskError {
    #[serde(rename = "error")]
    pub kind: ErrorKind,
    pub cause: String,
}

impl TaskError {
    pub fn new(kind: ErrorKind, cause: impl Into<String>) -> Self {
        Self {
            kind,
            cause: cause.into(),
        }
    }

    pub fn task_failed(cause: impl Into<String>) -> Self {
        Self::new(ErrorKind::TaskFailed, cause)
    }

    pub fn not_found(cause: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceNotFound, cause)
    }

    pub fn timeout(cause: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, cause)
    }

    pub fn validation(cause: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, cause)
    }
}

/// Faults that stop the engine rather than a single node.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid workflow input: {0}")]
    InvalidInput(String),

    #[error("Unknown workflow: '{0}'")]
    UnknownWorkflow(String),

    #[error("Workflow '{workflow}' has no node '{node}'")]
    UnknownNode { workflow: String, node: String },

    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Execution '{0}' is not running")]
    NotRunning(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl EngineError {
    pub(crate) fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_error_display() {
        let err = TaskError::not_found("Stack with id api does not exist");
        assert_eq!(
            err.to_string(),
            "ResourceNotFound: Stack with id api does not exist"
        );
    }

    #[test]
    fn test_task_error_serialized_shape() {
        let err = TaskError::task_failed("boom");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["error"], "TaskFailed");
        assert_eq!(value["cause"], "boom");
    }

    #[test]
    fn test_engine_error_messages() {
        let err = EngineError::UnknownNode {
            workflow: "post-deployment".to_string(),
            node: "missing".to_string(),
        };
        assert!(err.to_string().contains("post-deployment"));
        assert!(err.to_string().contains("missing"));
    }
}
