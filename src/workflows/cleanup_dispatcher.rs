//! Cleanup-Stacks Dispatcher
//!
//! Routes one teardown request to the right deletion run by looking at
//! which flag is present in the input. Only presence matters; the flag's
//! value is ignored. Flags are checked least destructive first:
//!
//! 1. frontend bucket wipe (any app, all or everything flag implies it)
//! 2. failed stacks, which then continues down the tree
//! 3. stateless stacks only
//! 4. application stacks only
//! 5. every stack except the pipelines
//! 6. every stack including the pipelines
//!
//! With no flag at all the orphan-resource sweep runs instead.

use serde_json::{Map, Value};

use super::{field, with_notifications, CLEANUP_STACKS, DELETE_IN_SEQUENCE, NOTIFY_FAILURE, NOTIFY_SUCCESS};
use crate::config::OrchestratorConfig;
use crate::execution::error::EngineError;
use crate::workflow::condition::{ChoiceBranch, Condition};
use crate::workflow::context::ResultPath;
use crate::workflow::model::{CatchClause, Node, PassAction, Payload, TaskAction, WorkflowDefinition};

pub const WIPE_BUCKET_FLAGS: &[&str] = &["wipe-frontend-bucket", "WipeFrontendBucket"];

pub const FAILED_STACKS_FLAGS: &[&str] = &[
    "cleanupfailedstack",
    "cleanupfailedstacks",
    "cleanup-failed-stack",
    "cleanup-failed-stacks",
    "Cleanup-Failed-Stacks",
    "cleanupFailedStack",
    "cleanupFailedStacks",
];

pub const STATELESS_FLAGS: &[&str] = &[
    "delete-stateless-stacks-only",
    "DeleteStateLESSStacksOnly",
    "destroy-stateless-stacks-only",
    "DestroyStateLESSStacksOnly",
];

pub const APP_STACKS_FLAGS: &[&str] = &[
    "delete-app-stacks-only",
    "DeleteAppStacksOnly",
    "destroy-app-stacks-only",
    "DestroyAppStacksOnly",
];

pub const ALL_EXCEPT_PIPELINES_FLAGS: &[&str] = &[
    "delete-all-stacks-NOT-pipelines",
    "DeleteAppStacksNOTPipelines",
    "destroy-all-stacks-NOT-pipelines",
    "DestroyAppStacksNOTPipelines",
];

pub const EVERYTHING_FLAGS: &[&str] = &[
    "delete-all-stacks-incl-pipelines",
    "delete-all-stacks-incl-pipepines",
    "DeleteAppStacksInclPipelines",
    "DeleteAppStacksInclPipelineStacks",
    "destroy-all-stacks-incl-pipelines",
    "destroy-all-stacks-incl-pipepines",
    "destroy-all-stacks-incl-pipepine-stacks",
    "DestroyAppStacksInclPipelines",
    "DestroyAppStacksInclPipelineStacks",
];

fn any_flag(flags: &[&[&str]]) -> Condition {
    Condition::any_present(flags.iter().flat_map(|set| set.iter()).map(|flag| field(flag)).collect())
}

fn run_deletion(id: &str, payload: &Value, next: &str) -> Node {
    Node::task(
        id,
        TaskAction::run_workflow(DELETE_IN_SEQUENCE, Payload::Literal(payload.clone())),
        next,
    )
    .with_catch(CatchClause::all(NOTIFY_FAILURE))
}

/// One Choice per flag set: matched flags run their deletion, the rest fall through.
fn dispatch(id: &str, flags: &[&str], on_match: &str, otherwise: &str) -> Node {
    Node::choice(id, vec![ChoiceBranch::new(any_flag(&[flags]), on_match)], otherwise)
}

pub fn definition(config: &OrchestratorConfig) -> Result<WorkflowDefinition, EngineError> {
    let payloads = &config.cleanup_payloads;
    let bucket_params = Map::from_iter([
        ("tier".to_string(), Value::from(config.tier.as_str())),
        ("bucket-name".to_string(), Value::from(config.frontend_bucket_pattern.as_str())),
        ("only-empty-the-bucket".to_string(), Value::from("yes")),
    ]);

    let definition = WorkflowDefinition::new(CLEANUP_STACKS, "merge_bucket_params")
        .with_comment("Dispatches a teardown request to the matching stack deletion")
        .with_timeout_secs(config.timeout_secs)
        .with_node(Node::pass(
            "merge_bucket_params",
            PassAction::Merge(bucket_params),
            "should_wipe_frontend_bucket",
        ))
        .with_node(Node::choice(
            "should_wipe_frontend_bucket",
            vec![ChoiceBranch::new(
                any_flag(&[
                    WIPE_BUCKET_FLAGS,
                    APP_STACKS_FLAGS,
                    ALL_EXCEPT_PIPELINES_FLAGS,
                    EVERYTHING_FLAGS,
                ]),
                "wipe_frontend_bucket",
            )],
            "should_cleanup_failed_stacks",
        ))
        .with_node(
            Node::task(
                "wipe_frontend_bucket",
                TaskAction::invoke(&config.functions.bucket_wipe, Payload::Context),
                "should_cleanup_failed_stacks",
            )
            .with_comment("Empties the frontend logging bucket; the bucket itself stays")
            .with_result(ResultPath::Merge(field("wipeout_bucket")))
            .with_catch(CatchClause::all(NOTIFY_FAILURE)),
        )
        .with_node(dispatch(
            "should_cleanup_failed_stacks",
            FAILED_STACKS_FLAGS,
            "cleanup_failed_stacks",
            "should_delete_stateless_stacks",
        ))
        .with_node(run_deletion(
            "cleanup_failed_stacks",
            &payloads.failed_stacks,
            "should_delete_stateless_stacks",
        ))
        .with_node(dispatch(
            "should_delete_stateless_stacks",
            STATELESS_FLAGS,
            "delete_stateless_stacks",
            "should_delete_app_stacks",
        ))
        .with_node(run_deletion(
            "delete_stateless_stacks",
            &payloads.stateless_stacks,
            NOTIFY_SUCCESS,
        ))
        .with_node(dispatch(
            "should_delete_app_stacks",
            APP_STACKS_FLAGS,
            "delete_app_stacks",
            "should_delete_all_except_pipelines",
        ))
        .with_node(run_deletion("delete_app_stacks", &payloads.app_stacks, NOTIFY_SUCCESS))
        .with_node(dispatch(
            "should_delete_all_except_pipelines",
            ALL_EXCEPT_PIPELINES_FLAGS,
            "delete_all_except_pipelines",
            "should_delete_everything",
        ))
        .with_node(run_deletion(
            "delete_all_except_pipelines",
            &payloads.all_except_pipelines,
            NOTIFY_SUCCESS,
        ))
        .with_node(dispatch(
            "should_delete_everything",
            EVERYTHING_FLAGS,
            "delete_everything",
            "cleanup_orphan_resources",
        ))
        .with_node(run_deletion("delete_everything", &payloads.everything, NOTIFY_SUCCESS))
        .with_node(
            Node::task(
                "cleanup_orphan_resources",
                TaskAction::invoke(&config.functions.orphan_cleanup, Payload::Context),
                NOTIFY_SUCCESS,
            )
            .with_result(ResultPath::Merge(field("orphan_cleanup")))
            .with_catch(CatchClause::all(NOTIFY_FAILURE)),
        );

    with_notifications(definition).build()
}
