//! External Services
//!
//! The engine never talks to cloud APIs directly. Every side effect goes
//! through one of the traits below, bundled into [`Services`] and injected
//! into the engine at construction.
//!
//! # Collaborators
//!
//! - [`PipelineTrigger`]: start a deployment pipeline and poll its status
//! - [`ComputeInvoker`]: call a compute function with a JSON payload
//! - [`ResourceDeleter`]: delete and describe infrastructure stacks
//! - [`NotificationSink`]: publish success/failure notifications
//! - [`SecurityFindingsSource`]: query open security findings
//! - [`SubWorkflowInvoker`]: run another workflow to completion
//!
//! [`simulated::SimulatedServices`] implements all of them in memory.

pub mod simulated;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::execution::error::TaskError;

pub use simulated::SimulatedServices;

/// Status of a pipeline execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStatus {
    InProgress,
    Stopping,
    Stopped,
    Succeeded,
    Superseded,
    Failed,
    Cancelled,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[async_trait]
pub trait PipelineTrigger: Send + Sync {
    /// Starts a pipeline and returns the execution id.
    async fn start(&self, pipeline: &str) -> Result<String, TaskError>;

    async fn get_status(&self, pipeline: &str, execution_id: &str) -> Result<PipelineStatus, TaskError>;
}

/// Status reported by a compute function.
///
/// Functions normally report a numeric code; some return only a raw
/// payload such as `"{}"` or `"null"`, which counts as success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusCode {
    Code(u16),
    Raw(String),
}

/// Result of a compute function call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub status_code: StatusCode,
    #[serde(default)]
    pub body: Value,
}

impl Invocation {
    pub fn with_status(code: u16) -> Self {
        Self {
            status_code: StatusCode::Code(code),
            body: Value::Null,
        }
    }

    pub fn ok() -> Self {
        Self::with_status(200)
    }

    pub fn raw(payload: impl Into<String>) -> Self {
        Self {
            status_code: StatusCode::Raw(payload.into()),
            body: Value::Null,
        }
    }
}

#[async_trait]
pub trait ComputeInvoker: Send + Sync {
    /// Calls a function. Failures to invoke surface as `TaskFailed`.
    async fn invoke(&self, function: &str, payload: Value) -> Result<Invocation, TaskError>;
}

/// Current state of a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackDescription {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl StackDescription {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            cause: None,
        }
    }
}

#[async_trait]
pub trait ResourceDeleter: Send + Sync {
    /// Requests deletion. Calling this on a stack already being deleted is safe.
    async fn delete_stack(&self, name: &str) -> Result<(), TaskError>;

    /// Describes a stack. A missing stack is a `ResourceNotFound` error whose
    /// cause matches `Stack with id * does not exist*`.
    async fn describe_stack(&self, name: &str) -> Result<StackDescription, TaskError>;
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, subject: &str, body: &Value) -> Result<(), TaskError>;
}

/// Query for open security findings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingsFilter {
    /// Only resources whose id starts with this prefix
    pub resource_prefix: String,
    pub severities: Vec<String>,
    pub record_state: String,
    pub max_results: usize,
}

impl FindingsFilter {
    pub fn matches(&self, finding: &Finding) -> bool {
        finding.resource_id.starts_with(&self.resource_prefix)
            && self.severities.iter().any(|s| s == &finding.severity)
            && finding.record_state == self.record_state
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub title: String,
    pub severity: String,
    pub resource_id: String,
    pub record_state: String,
}

#[async_trait]
pub trait SecurityFindingsSource: Send + Sync {
    async fn list_findings(&self, filter: &FindingsFilter) -> Result<Vec<Finding>, TaskError>;
}

/// Runs a registered workflow and waits for its terminal state.
#[async_trait]
pub trait SubWorkflowInvoker: Send + Sync {
    /// Returns the final context of a successful run; any other outcome is an error.
    async fn run_sync(&self, workflow: &str, input: Value) -> Result<Value, TaskError>;
}

/// The collaborators a workflow engine calls out to.
#[derive(Clone)]
pub struct Services {
    pub pipelines: Arc<dyn PipelineTrigger>,
    pub compute: Arc<dyn ComputeInvoker>,
    pub stacks: Arc<dyn ResourceDeleter>,
    pub notifications: Arc<dyn NotificationSink>,
    pub findings: Arc<dyn SecurityFindingsSource>,
}

impl Services {
    /// Uses one backend for every collaborator.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: PipelineTrigger
            + ComputeInvoker
            + ResourceDeleter
            + NotificationSink
            + SecurityFindingsSource
            + 'static,
    {
        Self {
            pipelines: backend.clone(),
            compute: backend.clone(),
            stacks: backend.clone(),
            notifications: backend.clone(),
            findings: backend,
        }
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_code_serialization() {
        assert_eq!(serde_json::to_value(StatusCode::Code(200)).unwrap(), json!(200));
        assert_eq!(serde_json::to_value(StatusCode::Raw("{}".into())).unwrap(), json!("{}"));
    }

    #[test]
    fn test_invocation_shape() {
        let value = serde_json::to_value(Invocation::with_status(500)).unwrap();
        assert_eq!(value, json!({"status_code": 500, "body": null}));
    }

    #[test]
    fn test_findings_filter() {
        let filter = FindingsFilter {
            resource_prefix: "arn:aws:ecr:myapp".into(),
            severities: vec!["CRITICAL".into(), "HIGH".into()],
            record_state: "ACTIVE".into(),
            max_results: 10,
        };
        let mut finding = Finding {
            id: "f-1".into(),
            title: "Outdated openssl".into(),
            severity: "HIGH".into(),
            resource_id: "arn:aws:ecr:myapp/api".into(),
            record_state: "ACTIVE".into(),
        };

        assert!(filter.matches(&finding));
        finding.severity = "LOW".into();
        assert!(!filter.matches(&finding));
        finding.severity = "CRITICAL".into();
        finding.record_state = "ARCHIVED".into();
        assert!(!filter.matches(&finding));
    }

    #[test]
    fn test_pipeline_status_display() {
        assert_eq!(PipelineStatus::InProgress.to_string(), "InProgress");
        assert_eq!(
            serde_json::to_value(PipelineStatus::Succeeded).unwrap(),
            json!("Succeeded")
        );
    }
}
