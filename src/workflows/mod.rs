//! Built-in Workflows
//!
//! The deployment and teardown workflows of a multi-tier application,
//! built from an [`OrchestratorConfig`]:
//!
//! | Name | Purpose |
//! |---|---|
//! | `post-deployment` | Database setup and data loads with bounded retries |
//! | `cleanup-stacks` | Flag-driven dispatcher for stack teardown |
//! | `one-click-end-to-end` | Cleanup, deploy, hydrate, deploy frontend, security gate |
//! | `delete-stacks-in-parallel` | Bounded-concurrency deletion of a stack list |
//! | `delete-stacks-in-sequence` | Ordered deletion of a stack list |
//!
//! `delete-stack-branch` and `delete-stack-in-sequence-step` handle one
//! stack each and are only run by the two deletion fan-outs.

pub mod cleanup_dispatcher;
pub mod one_click;
pub mod post_deployment;
pub mod stack_deletion;

use log::info;

use crate::config::OrchestratorConfig;
use crate::execution::error::EngineError;
use crate::execution::registry::WorkflowRegistry;
use crate::workflow::context::JsonPath;
use crate::workflow::model::{Node, Outcome, TaskAction, WorkflowDefinition};

pub const POST_DEPLOYMENT: &str = "post-deployment";
pub const CLEANUP_STACKS: &str = "cleanup-stacks";
pub const ONE_CLICK: &str = "one-click-end-to-end";
pub const DELETE_IN_PARALLEL: &str = "delete-stacks-in-parallel";
pub const DELETE_IN_SEQUENCE: &str = "delete-stacks-in-sequence";
pub const DELETE_BRANCH: &str = "delete-stack-branch";
pub const DELETE_SEQUENCE_STEP: &str = "delete-stack-in-sequence-step";

/// Node publishing the success notification.
pub const NOTIFY_SUCCESS: &str = "notify_success";
/// Node publishing the failure notification.
pub const NOTIFY_FAILURE: &str = "notify_failure";

const SUCCEEDED: &str = "succeeded";
const FAILED: &str = "failed";

/// Builds every built-in workflow.
pub fn builtin_definitions(config: &OrchestratorConfig) -> Result<Vec<WorkflowDefinition>, EngineError> {
    Ok(vec![
        post_deployment::definition(config)?,
        cleanup_dispatcher::definition(config)?,
        one_click::definition(config)?,
        stack_deletion::parallel_definition(config)?,
        stack_deletion::branch_definition(config)?,
        stack_deletion::sequential_definition(config)?,
        stack_deletion::sequence_step_definition(config)?,
    ])
}

/// Registers every built-in workflow and checks their cross references.
pub fn register_all(registry: &mut WorkflowRegistry, config: &OrchestratorConfig) -> Result<(), EngineError> {
    for definition in builtin_definitions(config)? {
        registry.register(definition)?;
    }
    registry.verify()?;
    info!("Registered {} built-in workflows", registry.len());
    Ok(())
}

/// `$.{name}`
pub(crate) fn field(name: &str) -> JsonPath {
    JsonPath::root().key(name)
}

/// Appends the two notification tasks and the terminal nodes they lead to.
pub(crate) fn with_notifications(definition: WorkflowDefinition) -> WorkflowDefinition {
    definition
        .with_node(Node::task(NOTIFY_SUCCESS, TaskAction::notify(Outcome::Success), SUCCEEDED))
        .with_node(Node::task(NOTIFY_FAILURE, TaskAction::notify(Outcome::Failure), FAILED))
        .with_node(Node::succeed(SUCCEEDED))
        .with_node(Node::fail(FAILED, "WorkflowFailed"))
}

/// An engine running every built-in workflow against a simulated backend.
#[cfg(test)]
pub(crate) fn test_engine(
    backend: crate::services::SimulatedServices,
) -> (crate::execution::WorkflowEngine, std::sync::Arc<crate::services::SimulatedServices>) {
    use std::sync::Arc;

    use crate::execution::{EngineConfig, WorkflowEngine};
    use crate::services::Services;

    let config = OrchestratorConfig::default().rendered();
    let mut registry = WorkflowRegistry::new();
    register_all(&mut registry, &config).unwrap();
    let backend = Arc::new(backend);
    let engine = WorkflowEngine::new(
        Arc::new(registry),
        Services::from_backend(backend.clone()),
        EngineConfig::from(&config),
    );
    (engine, backend)
}

/// Notifications whose subject names `workflow`.
#[cfg(test)]
pub(crate) fn subjects_for(
    backend: &crate::services::SimulatedServices,
    workflow: &str,
) -> Vec<String> {
    let suffix = format!(" workflow {}", workflow);
    backend
        .notifications()
        .into_iter()
        .map(|n| n.subject)
        .filter(|subject| subject.ends_with(&suffix))
        .collect()
}
