//! Task Execution
//!
//! Runs the external operation of a Task node against the injected
//! collaborators and turns its outcome into the JSON result the engine
//! writes into the context.

use log::{debug, info, warn};
use serde_json::{json, Value};

use super::error::{ErrorKind, TaskError};
use crate::services::{Services, SubWorkflowInvoker};
use crate::workflow::context::{ExecutionContext, JsonPath};
use crate::workflow::model::{Outcome, TaskAction};

/// What a task needs besides its action and the context.
pub struct TaskEnv<'a> {
    pub services: &'a Services,
    pub invoker: &'a dyn SubWorkflowInvoker,
    /// Tier named in notification subjects
    pub tier: &'a str,
    /// Workflow the task belongs to
    pub workflow: &'a str,
}

/// Subject line of a run's final notification.
pub fn notification_subject(outcome: Outcome, tier: &str, workflow: &str) -> String {
    match outcome {
        Outcome::Success => format!("Success: {} tier workflow {}", tier, workflow),
        Outcome::Failure => format!("FAILURE: {} tier workflow {}", tier, workflow),
    }
}

/// Executes one task action.
///
/// Returns the raw result; applying it to the context is the caller's job.
pub async fn execute_task(
    action: &TaskAction,
    context: &ExecutionContext,
    env: &TaskEnv<'_>,
) -> Result<Value, TaskError> {
    match action {
        TaskAction::InvokeFunction { function, payload } => {
            let payload = payload.resolve(context)?;
            debug!("Invoking function {}", function);
            let invocation = env.services.compute.invoke(function, payload).await?;
            to_result(&invocation)
        }

        TaskAction::DeleteStack { stack } => {
            let name = stack_name(context, stack)?;
            info!("Deleting stack {}", name);
            env.services.stacks.delete_stack(name).await?;
            Ok(Value::Null)
        }

        TaskAction::DescribeStack { stack } => {
            let name = stack_name(context, stack)?;
            let description = env.services.stacks.describe_stack(name).await?;
            debug!("Stack {} is {}", name, description.status);
            to_result(&description)
        }

        TaskAction::StartPipeline { pipeline } => {
            let execution_id = env.services.pipelines.start(pipeline).await?;
            info!("Started pipeline {} ({})", pipeline, execution_id);
            Ok(json!({ "execution_id": execution_id }))
        }

        TaskAction::PipelineStatus {
            pipeline,
            execution_id,
        } => {
            let id = context
                .get(execution_id)
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    TaskError::validation(format!("no pipeline execution id at {}", execution_id))
                })?;
            let status = env.services.pipelines.get_status(pipeline, id).await?;
            debug!("Pipeline {} execution {} is {}", pipeline, id, status);
            Ok(json!({ "status": status }))
        }

        TaskAction::ListFindings { filter } => {
            let findings = env.services.findings.list_findings(filter).await?;
            if !findings.is_empty() {
                warn!(
                    "{} open security finding(s) for resources under '{}'",
                    findings.len(),
                    filter.resource_prefix
                );
            }
            Ok(json!({ "findings": findings }))
        }

        TaskAction::Notify { outcome } => {
            let subject = notification_subject(*outcome, env.tier, env.workflow);
            env.services
                .notifications
                .publish(&subject, context.as_value())
                .await?;
            Ok(Value::Null)
        }

        TaskAction::RunWorkflow { workflow, input } => {
            let input = input.resolve(context)?;
            info!("Running sub-workflow {}", workflow);
            env.invoker.run_sync(workflow, input).await
        }
    }
}

fn stack_name<'c>(context: &'c ExecutionContext, path: &JsonPath) -> Result<&'c str, TaskError> {
    context
        .get(path)
        .and_then(Value::as_str)
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| TaskError::validation(format!("no stack name at {}", path)))
}

fn to_result<T: serde::Serialize>(value: &T) -> Result<Value, TaskError> {
    serde_json::to_value(value).map_err(|e| TaskError::new(ErrorKind::TaskFailed, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::services::{
        Finding, FindingsFilter, Invocation, PipelineStatus, SimulatedServices, StackDescription,
    };
    use crate::workflow::model::Payload;

    struct EchoInvoker;

    #[async_trait]
    impl SubWorkflowInvoker for EchoInvoker {
        async fn run_sync(&self, workflow: &str, input: Value) -> Result<Value, TaskError> {
            if workflow == "broken" {
                return Err(TaskError::task_failed("sub-run failed"));
            }
            Ok(json!({ "ran": workflow, "input": input }))
        }
    }

    fn path(expr: &str) -> JsonPath {
        JsonPath::parse(expr).unwrap()
    }

    async fn run(
        backend: &Arc<SimulatedServices>,
        action: TaskAction,
        context: Value,
    ) -> Result<Value, TaskError> {
        let services = Services::from_backend(backend.clone());
        let env = TaskEnv {
            services: &services,
            invoker: &EchoInvoker,
            tier: "dev",
            workflow: "post-deployment",
        };
        let context = ExecutionContext::from_value(context).unwrap();
        execute_task(&action, &context, &env).await
    }

    #[tokio::test]
    async fn test_invoke_function_result_shape() {
        let backend = Arc::new(SimulatedServices::new());
        backend.script_invocations("loader", vec![Ok(Invocation::with_status(500))]);

        let result = run(
            &backend,
            TaskAction::invoke("loader", Payload::Context),
            json!({"tier": "dev"}),
        )
        .await
        .unwrap();

        assert_eq!(result, json!({"status_code": 500, "body": null}));
        assert_eq!(backend.invocation_count("loader"), 1);
    }

    #[tokio::test]
    async fn test_describe_and_delete_read_stack_name() {
        let backend = Arc::new(SimulatedServices::new());
        backend.script_describes(
            "api",
            vec![Ok(StackDescription {
                status: "DELETE_FAILED".into(),
                cause: Some("resource in use".into()),
            })],
        );
        let ctx = json!({"stack_name": "api"});

        let described = run(
            &backend,
            TaskAction::DescribeStack { stack: path("$.stack_name") },
            ctx.clone(),
        )
        .await
        .unwrap();
        assert_eq!(described, json!({"status": "DELETE_FAILED", "cause": "resource in use"}));

        let deleted = run(&backend, TaskAction::DeleteStack { stack: path("$.stack_name") }, ctx)
            .await
            .unwrap();
        assert_eq!(deleted, Value::Null);
        assert_eq!(backend.deleted_stacks(), vec!["api"]);
    }

    #[tokio::test]
    async fn test_missing_stack_name_is_validation_error() {
        let backend = Arc::new(SimulatedServices::new());
        let err = run(&backend, TaskAction::DeleteStack { stack: path("$.stack_name") }, json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_pipeline_start_and_status() {
        let backend = Arc::new(SimulatedServices::new());
        backend.script_pipeline("backend", vec![PipelineStatus::InProgress]);

        let started = run(
            &backend,
            TaskAction::StartPipeline { pipeline: "backend".into() },
            json!({}),
        )
        .await
        .unwrap();
        assert_eq!(started, json!({"execution_id": "backend-execution-1"}));

        let status = run(
            &backend,
            TaskAction::PipelineStatus {
                pipeline: "backend".into(),
                execution_id: path("$.backend.execution_id"),
            },
            json!({"backend": started}),
        )
        .await
        .unwrap();
        assert_eq!(status, json!({"status": "InProgress"}));
    }

    #[tokio::test]
    async fn test_notify_publishes_context() {
        let backend = Arc::new(SimulatedServices::new());
        run(&backend, TaskAction::notify(Outcome::Failure), json!({"error": "x"}))
            .await
            .unwrap();

        let sent = backend.notifications();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "FAILURE: dev tier workflow post-deployment");
        assert_eq!(sent[0].body, json!({"error": "x"}));
    }

    #[tokio::test]
    async fn test_list_findings() {
        let backend = Arc::new(SimulatedServices::new());
        backend.add_finding(Finding {
            id: "f-1".into(),
            title: "CVE-2024-0001".into(),
            severity: "CRITICAL".into(),
            resource_id: "myapp-api".into(),
            record_state: "ACTIVE".into(),
        });
        let filter = FindingsFilter {
            resource_prefix: "myapp".into(),
            severities: vec!["CRITICAL".into()],
            record_state: "ACTIVE".into(),
            max_results: 10,
        };

        let result = run(&backend, TaskAction::ListFindings { filter }, json!({}))
            .await
            .unwrap();
        assert_eq!(result["findings"][0]["id"], "f-1");
    }

    #[tokio::test]
    async fn test_run_workflow_delegates_to_invoker() {
        let backend = Arc::new(SimulatedServices::new());
        let ok = run(
            &backend,
            TaskAction::run_workflow("cleanup-stacks", Payload::Path(path("$.payload"))),
            json!({"payload": {"a": 1}}),
        )
        .await
        .unwrap();
        assert_eq!(ok, json!({"ran": "cleanup-stacks", "input": {"a": 1}}));

        let err = run(&backend, TaskAction::run_workflow("broken", Payload::Context), json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::TaskFailed);
    }

    #[test]
    fn test_notification_subjects() {
        assert_eq!(
            notification_subject(Outcome::Success, "int", "cleanup-stacks"),
            "Success: int tier workflow cleanup-stacks"
        );
    }
}
