//! Stack Deletion Workflows
//!
//! Two entry points take a deletion list and hand each item to a per-stack
//! workflow; nested batches are routed back to the entry point for their
//! mode.
//!
//! - `delete-stacks-in-parallel` reads `$.deleteInParallel` and deletes every
//!   stack at once, at most `max_concurrency` in flight.
//! - `delete-stacks-in-sequence` reads `$.deleteInSequence` and handles one
//!   item at a time, stopping at the first failure.
//!
//! The parallel branch deletes unconditionally. The sequence step only
//! deletes a stack that is broken, waits out stacks still changing and
//! leaves healthy ones alone.

use super::{
    field, with_notifications, DELETE_BRANCH, DELETE_IN_PARALLEL, DELETE_IN_SEQUENCE,
    DELETE_SEQUENCE_STEP, NOTIFY_FAILURE, NOTIFY_SUCCESS,
};
use crate::config::OrchestratorConfig;
use crate::execution::error::EngineError;
use crate::workflow::condition::{ChoiceBranch, Condition, WildcardPattern};
use crate::workflow::context::{JsonPath, ResultPath};
use crate::workflow::deletion::{
    DELETE_COMPLETE, NOT_FOUND_PATTERN, PARALLEL_KEY, SEQUENTIAL_KEY, TERMINAL_FAILURE_STATUSES,
    TRANSITIONAL_STATUSES,
};
use crate::workflow::model::{
    BatchTargets, CatchClause, FanOutMode, FanOutSpec, Node, TaskAction, WorkflowDefinition,
    STACK_NAME_KEY,
};

/// Error name of a per-stack run that could not delete its stack.
pub const STACK_DELETION_FAILED: &str = "StackDeletionFailed";

fn batch_targets() -> BatchTargets {
    BatchTargets {
        parallel: DELETE_IN_PARALLEL.to_string(),
        sequential: DELETE_IN_SEQUENCE.to_string(),
    }
}

fn status() -> JsonPath {
    field("stack").key("status")
}

/// True when the last caught error says the stack does not exist.
fn already_gone() -> Result<Condition, EngineError> {
    let pattern = WildcardPattern::new(NOT_FOUND_PATTERN)
        .map_err(|e| EngineError::InvalidDefinition(format!("not-found pattern: {}", e)))?;
    Ok(Condition::string_matches(field("error").key("cause"), pattern))
}

fn describe_stack(next: &str, gone_check: &str) -> Node {
    Node::task(
        "describe_stack",
        TaskAction::DescribeStack {
            stack: field(STACK_NAME_KEY),
        },
        next,
    )
    .with_result(ResultPath::Merge(field("stack")))
    .with_catch(CatchClause::all(gone_check))
}

fn delete_stack(next: &str, on_error: &str) -> Node {
    Node::task(
        "delete_stack",
        TaskAction::DeleteStack {
            stack: field(STACK_NAME_KEY),
        },
        next,
    )
    .with_catch(CatchClause::all(on_error))
}

pub fn parallel_definition(config: &OrchestratorConfig) -> Result<WorkflowDefinition, EngineError> {
    let definition = WorkflowDefinition::new(DELETE_IN_PARALLEL, "has_stacks")
        .with_comment("Deletes every stack of a list at once, with bounded concurrency")
        .with_timeout_secs(config.timeout_secs)
        .with_node(Node::choice(
            "has_stacks",
            vec![ChoiceBranch::new(
                Condition::is_present(field(PARALLEL_KEY)),
                "delete_in_parallel",
            )],
            NOTIFY_SUCCESS,
        ))
        .with_node(Node::fan_out(
            "delete_in_parallel",
            FanOutSpec {
                items: field(PARALLEL_KEY),
                mode: FanOutMode::Parallel {
                    max_concurrency: config.max_concurrency,
                },
                leaf_workflow: DELETE_BRANCH.to_string(),
                batches: batch_targets(),
                result: ResultPath::Merge(field("deletion")),
                next: NOTIFY_SUCCESS.to_string(),
                catch: vec![CatchClause::all(NOTIFY_FAILURE)],
            },
        ));

    with_notifications(definition).build()
}

/// Deletes one stack and waits until it is gone.
pub fn branch_definition(config: &OrchestratorConfig) -> Result<WorkflowDefinition, EngineError> {
    let mut retry_statuses: Vec<&str> = TRANSITIONAL_STATUSES.to_vec();
    retry_statuses.extend_from_slice(TERMINAL_FAILURE_STATUSES);

    WorkflowDefinition::new(DELETE_BRANCH, "delete_stack")
        .with_comment("Deletes a single stack")
        .with_timeout_secs(config.timeout_secs)
        .with_node(delete_stack("wait_after_delete", "branch_failed"))
        .with_node(Node::wait(
            "wait_after_delete",
            config.waits.after_delete_secs,
            "describe_stack",
        ))
        .with_node(describe_stack("check_status", "is_already_gone"))
        .with_node(Node::choice(
            "check_status",
            vec![
                ChoiceBranch::new(Condition::string_in(&status(), &retry_statuses), "delete_stack"),
                ChoiceBranch::new(Condition::string_equals(status(), DELETE_COMPLETE), "branch_done"),
            ],
            "branch_failed",
        ))
        .with_node(Node::choice(
            "is_already_gone",
            vec![ChoiceBranch::new(already_gone()?, "branch_done")],
            "branch_failed",
        ))
        .with_node(Node::succeed("branch_done"))
        .with_node(Node::fail("branch_failed", STACK_DELETION_FAILED))
        .build()
}

pub fn sequential_definition(config: &OrchestratorConfig) -> Result<WorkflowDefinition, EngineError> {
    let definition = WorkflowDefinition::new(DELETE_IN_SEQUENCE, "has_stacks")
        .with_comment("Deletes the items of a list one after another")
        .with_timeout_secs(config.timeout_secs)
        .with_node(Node::choice(
            "has_stacks",
            vec![ChoiceBranch::new(
                Condition::is_present(field(SEQUENTIAL_KEY)),
                "delete_in_sequence",
            )],
            NOTIFY_FAILURE,
        ))
        .with_node(Node::fan_out(
            "delete_in_sequence",
            FanOutSpec {
                items: field(SEQUENTIAL_KEY),
                mode: FanOutMode::Sequential,
                leaf_workflow: DELETE_SEQUENCE_STEP.to_string(),
                batches: batch_targets(),
                result: ResultPath::merge_root(),
                next: NOTIFY_SUCCESS.to_string(),
                catch: vec![CatchClause::all(NOTIFY_FAILURE)],
            },
        ));

    with_notifications(definition).build()
}

/// Brings one stack of a sequence to a settled state.
pub fn sequence_step_definition(config: &OrchestratorConfig) -> Result<WorkflowDefinition, EngineError> {
    WorkflowDefinition::new(DELETE_SEQUENCE_STEP, "describe_stack")
        .with_comment("Deletes a broken stack, waits for a changing one, skips a healthy one")
        .with_timeout_secs(config.timeout_secs)
        .with_node(describe_stack("check_status", "is_already_gone"))
        .with_node(Node::choice(
            "check_status",
            vec![
                ChoiceBranch::new(
                    Condition::string_in(&status(), TRANSITIONAL_STATUSES),
                    "wait_for_transition",
                ),
                ChoiceBranch::new(
                    Condition::string_in(&status(), TERMINAL_FAILURE_STATUSES),
                    "delete_stack",
                ),
            ],
            "step_done",
        ))
        .with_node(Node::wait(
            "wait_for_transition",
            config.waits.status_poll_secs,
            "describe_stack",
        ))
        .with_node(delete_stack("wait_after_delete", "step_failed"))
        .with_node(Node::wait(
            "wait_after_delete",
            config.waits.after_delete_secs,
            "describe_stack",
        ))
        .with_node(Node::choice(
            "is_already_gone",
            vec![ChoiceBranch::new(already_gone()?, "step_done")],
            "step_failed",
        ))
        .with_node(Node::succeed("step_done"))
        .with_node(Node::fail("step_failed", STACK_DELETION_FAILED))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;

    use crate::execution::TaskError;
    use crate::services::{SimulatedServices, StackDescription};
    use crate::workflow::state::ExecutionStatus;
    use crate::workflows::{subjects_for, test_engine};

    fn stacks(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("myapp-stack-{:02}-dev", i)).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_deletion_respects_concurrency_cap() {
        let (engine, backend) = test_engine(
            SimulatedServices::new().with_delete_latency(Duration::from_secs(1)),
        );
        let names = stacks(20);

        let record = engine
            .run(DELETE_IN_PARALLEL, json!({ "deleteInParallel": names }))
            .await
            .unwrap();

        assert!(record.is_succeeded());
        assert!(backend.max_concurrent_deletes() <= 9);
        assert!(backend.max_concurrent_deletes() > 1);
        for name in &names {
            assert_eq!(backend.delete_count(name), 1, "{}", name);
        }
        assert_eq!(record.timeline.iterations("delete_in_parallel"), (0..20).collect::<Vec<_>>());
        assert_eq!(record.context.get(&field("deletion").key("branches")), Some(&json!(20)));
        assert_eq!(
            subjects_for(&backend, DELETE_IN_PARALLEL),
            vec!["Success: dev tier workflow delete-stacks-in-parallel"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_branch_waits_for_deletion() {
        let backend = SimulatedServices::new();
        backend.script_statuses("myapp-api-dev", &["DELETE_IN_PROGRESS", "DELETE_COMPLETE"]);
        let (engine, backend) = test_engine(backend);

        let record = engine
            .run(DELETE_IN_PARALLEL, json!({ "deleteInParallel": ["myapp-api-dev"] }))
            .await
            .unwrap();

        assert!(record.is_succeeded());
        assert_eq!(backend.delete_count("myapp-api-dev"), 2);
        assert_eq!(backend.describe_count("myapp-api-dev"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_deletion_is_idempotent() {
        let (engine, backend) = test_engine(SimulatedServices::new());
        let input = json!({ "deleteInParallel": ["myapp-vpc-dev", "myapp-devops-dev"] });

        let first = engine.run(DELETE_IN_PARALLEL, input.clone()).await.unwrap();
        let second = engine.run(DELETE_IN_PARALLEL, input).await.unwrap();

        assert!(first.is_succeeded());
        assert!(second.is_succeeded());
        assert_eq!(backend.delete_count("myapp-vpc-dev"), 2);
        assert_eq!(subjects_for(&backend, DELETE_IN_PARALLEL).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_parallel_list_succeeds_without_work() {
        let (engine, backend) = test_engine(SimulatedServices::new());

        let record = engine.run(DELETE_IN_PARALLEL, json!({})).await.unwrap();

        assert!(record.is_succeeded());
        assert!(backend.deleted_stacks().is_empty());
        assert_eq!(backend.notifications().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_describe_error_other_than_not_found_fails() {
        let backend = SimulatedServices::new();
        backend.script_describes(
            "myapp-locked-dev",
            vec![Err(TaskError::task_failed("Rate exceeded"))],
        );
        let (engine, backend) = test_engine(backend);

        let record = engine
            .run(
                DELETE_IN_PARALLEL,
                json!({ "deleteInParallel": ["myapp-locked-dev", "myapp-other-dev"] }),
            )
            .await
            .unwrap();

        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(backend.delete_count("myapp-other-dev"), 1);
        let cause = record.error.unwrap().cause;
        assert!(cause.contains("1 of 2 branch(es) failed"), "{}", cause);
        assert!(cause.contains("myapp-locked-dev"), "{}", cause);
        assert_eq!(
            subjects_for(&backend, DELETE_IN_PARALLEL),
            vec!["FAILURE: dev tier workflow delete-stacks-in-parallel"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_delete_fails_branch() {
        let backend = SimulatedServices::new();
        backend.fail_deletes("myapp-protected-dev");
        let (engine, _) = test_engine(backend);

        let record = engine
            .run(DELETE_IN_PARALLEL, json!({ "deleteInParallel": ["myapp-protected-dev"] }))
            .await
            .unwrap();

        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(record.error.unwrap().cause.contains("TerminationProtection"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_mixed_list() {
        let backend = SimulatedServices::new();
        backend.script_statuses("stackB", &["DELETE_FAILED"]);
        let (engine, backend) = test_engine(backend);

        let record = engine
            .run(
                DELETE_IN_SEQUENCE,
                json!({
                    "deleteInSequence": [
                        "stackA",
                        "stackB",
                        { "deleteInParallel": ["stackC", "stackD"] }
                    ]
                }),
            )
            .await
            .unwrap();

        assert!(record.is_succeeded());
        assert_eq!(record.timeline.iterations("delete_in_sequence"), vec![0, 1, 2]);
        assert_eq!(record.context.get_i64("counter"), Some(3));
        assert_eq!(record.context.get_i64("max_iterations"), Some(3));
        assert_eq!(backend.delete_count("stackA"), 0);
        assert_eq!(backend.delete_count("stackB"), 1);
        assert_eq!(backend.delete_count("stackC"), 1);
        assert_eq!(backend.delete_count("stackD"), 1);
        assert_eq!(subjects_for(&backend, DELETE_IN_SEQUENCE).len(), 1);
        assert_eq!(subjects_for(&backend, DELETE_IN_PARALLEL).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_order_is_kept() {
        let backend = SimulatedServices::new();
        for name in ["first", "second", "third"] {
            backend.script_statuses(name, &["ROLLBACK_COMPLETE"]);
        }
        let (engine, backend) = test_engine(backend);

        let record = engine
            .run(DELETE_IN_SEQUENCE, json!({ "deleteInSequence": ["first", "second", "third"] }))
            .await
            .unwrap();

        assert!(record.is_succeeded());
        assert_eq!(backend.deleted_stacks(), vec!["first", "second", "third"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_step_waits_out_transitions_and_skips_healthy() {
        let backend = SimulatedServices::new();
        backend.script_statuses("changing", &["UPDATE_IN_PROGRESS", "DELETE_IN_PROGRESS"]);
        backend.script_statuses("healthy", &["CREATE_COMPLETE"]);
        let (engine, backend) = test_engine(backend);

        let started = tokio::time::Instant::now();
        let record = engine
            .run(DELETE_IN_SEQUENCE, json!({ "deleteInSequence": ["changing", "healthy"] }))
            .await
            .unwrap();

        assert!(record.is_succeeded());
        assert!(backend.deleted_stacks().is_empty());
        assert_eq!(backend.describe_count("changing"), 3);
        assert_eq!(backend.describe_count("healthy"), 1);
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_stops_at_first_failure() {
        let backend = SimulatedServices::new();
        backend.script_describes(
            "broken",
            vec![Ok(StackDescription::new("DELETE_FAILED"))],
        );
        backend.fail_deletes("broken");
        let (engine, backend) = test_engine(backend);

        let record = engine
            .run(DELETE_IN_SEQUENCE, json!({ "deleteInSequence": ["broken", "after"] }))
            .await
            .unwrap();

        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.timeline.iterations("delete_in_sequence"), vec![0]);
        assert_eq!(backend.describe_count("after"), 0);
        assert_eq!(
            subjects_for(&backend, DELETE_IN_SEQUENCE),
            vec!["FAILURE: dev tier workflow delete-stacks-in-sequence"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_sequence_list_fails() {
        let (engine, _) = test_engine(SimulatedServices::new());

        let record = engine.run(DELETE_IN_SEQUENCE, json!({"stacks": []})).await.unwrap();

        assert_eq!(record.status, ExecutionStatus::Failed);
    }
}
