//! Simulated Services
//!
//! An in-memory backend implementing every collaborator trait. Responses
//! are scripted per function, stack and pipeline; anything unscripted
//! takes the happy path:
//!
//! - functions return status 200
//! - stacks are already gone (describe raises the not-found error)
//! - pipelines report `Succeeded`
//! - no security findings exist
//!
//! Every call is recorded so runs can be inspected afterwards.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use serde_json::Value;

use super::{
    ComputeInvoker, Finding, FindingsFilter, Invocation, NotificationSink, PipelineStatus,
    PipelineTrigger, ResourceDeleter, SecurityFindingsSource, StackDescription,
};
use crate::execution::error::TaskError;
use crate::workflow::deletion::not_found_message;

/// One recorded collaborator call.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceCall {
    Invoke { function: String, payload: Value },
    DeleteStack(String),
    DescribeStack(String),
    StartPipeline(String),
    PipelineStatus { pipeline: String, execution_id: String },
    ListFindings(FindingsFilter),
}

/// A published notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub topic: String,
    pub subject: String,
    pub body: Value,
}

#[derive(Default)]
struct State {
    invocations: HashMap<String, VecDeque<Result<Invocation, TaskError>>>,
    describes: HashMap<String, VecDeque<Result<StackDescription, TaskError>>>,
    failing_deletes: HashSet<String>,
    pipeline_statuses: HashMap<String, VecDeque<PipelineStatus>>,
    failing_pipelines: HashSet<String>,
    findings: Vec<Finding>,
    calls: Vec<ServiceCall>,
    notifications: Vec<Notification>,
    executions_started: usize,
}

/// Scriptable in-memory implementation of all external services.
#[derive(Default)]
pub struct SimulatedServices {
    state: Mutex<State>,
    topic: String,
    delete_latency: Duration,
    deletes_in_flight: AtomicUsize,
    max_deletes_in_flight: AtomicUsize,
}

impl SimulatedServices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the topic notifications are published to.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Makes each delete call take `latency` before returning.
    pub fn with_delete_latency(mut self, latency: Duration) -> Self {
        self.delete_latency = latency;
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues results for successive calls of a function.
    pub fn script_invocations(&self, function: &str, results: Vec<Result<Invocation, TaskError>>) {
        self.state()
            .invocations
            .entry(function.to_string())
            .or_default()
            .extend(results);
    }

    /// Queues describe results for a stack. Once exhausted the stack is gone.
    pub fn script_describes(&self, stack: &str, results: Vec<Result<StackDescription, TaskError>>) {
        self.state()
            .describes
            .entry(stack.to_string())
            .or_default()
            .extend(results);
    }

    /// Queues plain statuses for a stack.
    pub fn script_statuses(&self, stack: &str, statuses: &[&str]) {
        let results = statuses
            .iter()
            .map(|status| Ok(StackDescription::new(*status)))
            .collect();
        self.script_describes(stack, results);
    }

    /// Makes every delete of `stack` fail.
    pub fn fail_deletes(&self, stack: &str) {
        self.state().failing_deletes.insert(stack.to_string());
    }

    /// Queues statuses for successive polls of a pipeline. Once exhausted it reports `Succeeded`.
    pub fn script_pipeline(&self, pipeline: &str, statuses: Vec<PipelineStatus>) {
        self.state()
            .pipeline_statuses
            .entry(pipeline.to_string())
            .or_default()
            .extend(statuses);
    }

    /// Makes starting `pipeline` fail.
    pub fn fail_pipeline_start(&self, pipeline: &str) {
        self.state().failing_pipelines.insert(pipeline.to_string());
    }

    pub fn add_finding(&self, finding: Finding) {
        self.state().findings.push(finding);
    }

    pub fn calls(&self) -> Vec<ServiceCall> {
        self.state().calls.clone()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.state().notifications.clone()
    }

    /// Functions invoked, in call order.
    pub fn invoked_functions(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                ServiceCall::Invoke { function, .. } => Some(function.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn invocation_count(&self, function: &str) -> usize {
        self.invoked_functions().iter().filter(|f| *f == function).count()
    }

    pub fn delete_count(&self, stack: &str) -> usize {
        self.count_calls(|call| matches!(call, ServiceCall::DeleteStack(s) if s == stack))
    }

    pub fn describe_count(&self, stack: &str) -> usize {
        self.count_calls(|call| matches!(call, ServiceCall::DescribeStack(s) if s == stack))
    }

    /// Stacks passed to delete, in call order.
    pub fn deleted_stacks(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                ServiceCall::DeleteStack(stack) => Some(stack.clone()),
                _ => None,
            })
            .collect()
    }

    /// Highest number of delete calls observed running at once.
    pub fn max_concurrent_deletes(&self) -> usize {
        self.max_deletes_in_flight.load(Ordering::SeqCst)
    }

    fn count_calls(&self, predicate: impl Fn(&ServiceCall) -> bool) -> usize {
        self.state().calls.iter().filter(|call| predicate(call)).count()
    }

    fn record(&self, call: ServiceCall) {
        self.state().calls.push(call);
    }
}

#[async_trait]
impl ComputeInvoker for SimulatedServices {
    async fn invoke(&self, function: &str, payload: Value) -> Result<Invocation, TaskError> {
        debug!("[simulated] invoke {}", function);
        let mut state = self.state();
        state.calls.push(ServiceCall::Invoke {
            function: function.to_string(),
            payload,
        });
        state
            .invocations
            .get_mut(function)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(Invocation::ok()))
    }
}

#[async_trait]
impl ResourceDeleter for SimulatedServices {
    async fn delete_stack(&self, name: &str) -> Result<(), TaskError> {
        debug!("[simulated] delete stack {}", name);
        self.record(ServiceCall::DeleteStack(name.to_string()));

        let in_flight = self.deletes_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_deletes_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        if !self.delete_latency.is_zero() {
            tokio::time::sleep(self.delete_latency).await;
        }
        self.deletes_in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.state().failing_deletes.contains(name) {
            return Err(TaskError::task_failed(format!(
                "Stack [{}] cannot be deleted while TerminationProtection is enabled",
                name
            )));
        }
        Ok(())
    }

    async fn describe_stack(&self, name: &str) -> Result<StackDescription, TaskError> {
        debug!("[simulated] describe stack {}", name);
        let mut state = self.state();
        state.calls.push(ServiceCall::DescribeStack(name.to_string()));
        state
            .describes
            .get_mut(name)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(TaskError::not_found(not_found_message(name))))
    }
}

#[async_trait]
impl PipelineTrigger for SimulatedServices {
    async fn start(&self, pipeline: &str) -> Result<String, TaskError> {
        debug!("[simulated] start pipeline {}", pipeline);
        let mut state = self.state();
        state.calls.push(ServiceCall::StartPipeline(pipeline.to_string()));
        if state.failing_pipelines.contains(pipeline) {
            return Err(TaskError::task_failed(format!("Pipeline {} not found", pipeline)));
        }
        state.executions_started += 1;
        Ok(format!("{}-execution-{}", pipeline, state.executions_started))
    }

    async fn get_status(&self, pipeline: &str, execution_id: &str) -> Result<PipelineStatus, TaskError> {
        let mut state = self.state();
        state.calls.push(ServiceCall::PipelineStatus {
            pipeline: pipeline.to_string(),
            execution_id: execution_id.to_string(),
        });
        Ok(state
            .pipeline_statuses
            .get_mut(pipeline)
            .and_then(VecDeque::pop_front)
            .unwrap_or(PipelineStatus::Succeeded))
    }
}

#[async_trait]
impl NotificationSink for SimulatedServices {
    async fn publish(&self, subject: &str, body: &Value) -> Result<(), TaskError> {
        info!("[simulated] notification to '{}': {}", self.topic, subject);
        self.state().notifications.push(Notification {
            topic: self.topic.clone(),
            subject: subject.to_string(),
            body: body.clone(),
        });
        Ok(())
    }
}

#[async_trait]
impl SecurityFindingsSource for SimulatedServices {
    async fn list_findings(&self, filter: &FindingsFilter) -> Result<Vec<Finding>, TaskError> {
        let mut state = self.state();
        state.calls.push(ServiceCall::ListFindings(filter.clone()));
        Ok(state
            .findings
            .iter()
            .filter(|finding| filter.matches(finding))
            .take(filter.max_results)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::error::ErrorKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_unscripted_defaults() {
        let services = SimulatedServices::new();

        assert_eq!(services.invoke("fn", json!({})).await.unwrap(), Invocation::ok());
        let err = services.describe_stack("gone").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ResourceNotFound);
        assert!(err.cause.starts_with("Stack with id gone does not exist"));
        assert_eq!(
            services.get_status("p", "e").await.unwrap(),
            PipelineStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn test_scripted_responses_in_order() {
        let services = SimulatedServices::new();
        services.script_invocations(
            "loader",
            vec![Ok(Invocation::with_status(500)), Err(TaskError::task_failed("boom"))],
        );
        services.script_statuses("api", &["DELETE_IN_PROGRESS"]);

        assert_eq!(
            services.invoke("loader", json!(null)).await.unwrap(),
            Invocation::with_status(500)
        );
        assert!(services.invoke("loader", json!(null)).await.is_err());
        assert_eq!(services.invoke("loader", json!(null)).await.unwrap(), Invocation::ok());

        assert_eq!(services.describe_stack("api").await.unwrap().status, "DELETE_IN_PROGRESS");
        assert!(services.describe_stack("api").await.is_err());
        assert_eq!(services.describe_count("api"), 2);
        assert_eq!(services.invocation_count("loader"), 3);
    }

    #[tokio::test]
    async fn test_failing_delete_and_pipeline() {
        let services = SimulatedServices::new();
        services.fail_deletes("protected");
        services.fail_pipeline_start("missing");

        assert!(services.delete_stack("protected").await.is_err());
        assert!(services.delete_stack("other").await.is_ok());
        assert!(services.start("missing").await.is_err());
        assert_eq!(services.start("backend").await.unwrap(), "backend-execution-1");
        assert_eq!(services.deleted_stacks(), vec!["protected", "other"]);
    }

    #[tokio::test]
    async fn test_notifications_recorded() {
        let services = SimulatedServices::new().with_topic("myapp-dev-orchestration-notifications");
        services.publish("Success", &json!({"a": 1})).await.unwrap();

        let sent = services.notifications();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].topic, "myapp-dev-orchestration-notifications");
        assert_eq!(sent[0].subject, "Success");
        assert_eq!(sent[0].body, json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_findings_filtered_and_limited() {
        let services = SimulatedServices::new();
        for i in 0..3 {
            services.add_finding(Finding {
                id: format!("f-{}", i),
                title: "CVE".into(),
                severity: "CRITICAL".into(),
                resource_id: "myapp-api".into(),
                record_state: "ACTIVE".into(),
            });
        }
        let filter = FindingsFilter {
            resource_prefix: "myapp".into(),
            severities: vec!["CRITICAL".into()],
            record_state: "ACTIVE".into(),
            max_results: 2,
        };

        assert_eq!(services.list_findings(&filter).await.unwrap().len(), 2);
    }
}
