//! Post-Deployment Workflow
//!
//! Prepares a freshly deployed backend: optional database setup and schema
//! initialisation, then two data-load functions. Failures are retried after
//! a pause under two counters seeded into the context:
//!
//! - `inner_loop_counter`: schema-init and first-load failures; retries the
//!   first load while it stays within `retry.inner_ceiling`
//! - `outer_loop_counter`: second-load failures; retries from the first load
//!   while it stays within `retry.outer_ceiling`
//!
//! Counters start at 1 and only grow after a failure. Exhausting either
//! ceiling publishes the failure notification.

use serde_json::{Map, Value};

use super::{field, with_notifications, NOTIFY_FAILURE, NOTIFY_SUCCESS, POST_DEPLOYMENT};
use crate::config::OrchestratorConfig;
use crate::execution::error::EngineError;
use crate::workflow::condition::{ChoiceBranch, Condition};
use crate::workflow::context::{JsonPath, ResultPath};
use crate::workflow::model::{CatchClause, Node, PassAction, Payload, TaskAction, WorkflowDefinition};

pub const INNER_COUNTER: &str = "inner_loop_counter";
pub const OUTER_COUNTER: &str = "outer_loop_counter";

/// Any of these input flags runs the database setup steps first.
pub const DB_SETUP_FLAGS: &[&str] = &["run-1st-lambda", "run-rds-init", "runRdsInit"];

/// A function result counts as success when its status is 200 or its raw
/// payload is `{}` or `null`.
pub fn status_ok(status: JsonPath) -> Condition {
    Condition::any_of(vec![
        Condition::numeric_equals(status.clone(), 200.0),
        Condition::string_equals(status.clone(), "{}"),
        Condition::string_equals(status, "null"),
    ])
}

pub fn definition(config: &OrchestratorConfig) -> Result<WorkflowDefinition, EngineError> {
    let functions = &config.functions;
    let retry_wait = config.waits.step_retry_secs;
    let counters = Map::from_iter([
        (INNER_COUNTER.to_string(), Value::from(1)),
        (OUTER_COUNTER.to_string(), Value::from(1)),
    ]);

    let definition = WorkflowDefinition::new(POST_DEPLOYMENT, "set_loop_counters")
        .with_comment("Database setup and data loads after a backend deployment")
        .with_timeout_secs(config.timeout_secs)
        .with_node(Node::pass(
            "set_loop_counters",
            PassAction::Merge(counters),
            "should_run_db_setup",
        ))
        .with_node(Node::choice(
            "should_run_db_setup",
            vec![ChoiceBranch::new(
                Condition::any_present(DB_SETUP_FLAGS.iter().map(|flag| field(flag)).collect()),
                "db_admin_setup",
            )],
            "data_load_initial",
        ))
        .with_node(
            Node::task(
                "db_admin_setup",
                TaskAction::invoke(&functions.db_admin_setup, Payload::Context),
                "schema_init",
            )
            .with_result(ResultPath::Merge(field("db_admin_setup")))
            .with_catch(CatchClause::all(NOTIFY_FAILURE)),
        )
        .with_node(
            Node::task(
                "schema_init",
                TaskAction::invoke(&functions.schema_init, Payload::Context),
                "check_schema_init",
            )
            .with_result(ResultPath::Merge(field("first_step")))
            .with_catch(CatchClause::all("wait_after_schema_init")),
        )
        .with_node(Node::choice(
            "check_schema_init",
            vec![ChoiceBranch::new(
                status_ok(field("first_step").key("status_code")),
                "data_load_initial",
            )],
            "wait_after_schema_init",
        ))
        .with_node(Node::wait(
            "wait_after_schema_init",
            retry_wait,
            "increment_inner_loop_counter",
        ))
        .with_node(
            Node::task(
                "data_load_initial",
                TaskAction::invoke(&functions.data_load_initial, Payload::Context),
                "check_data_load_initial",
            )
            .with_result(ResultPath::Merge(field("second_step")))
            .with_catch(CatchClause::all("wait_after_data_load_initial")),
        )
        .with_node(Node::choice(
            "check_data_load_initial",
            vec![ChoiceBranch::new(
                status_ok(field("second_step").key("status_code")),
                "data_load_more",
            )],
            "wait_after_data_load_initial",
        ))
        .with_node(Node::wait(
            "wait_after_data_load_initial",
            retry_wait,
            "increment_inner_loop_counter",
        ))
        .with_node(
            Node::task(
                "data_load_more",
                TaskAction::invoke(&functions.data_load_more, Payload::Context),
                "check_data_load_more",
            )
            .with_result(ResultPath::Merge(field("third_step")))
            .with_catch(CatchClause::all("wait_after_data_load_more")),
        )
        .with_node(Node::choice(
            "check_data_load_more",
            vec![ChoiceBranch::new(
                status_ok(field("third_step").key("status_code")),
                NOTIFY_SUCCESS,
            )],
            "wait_after_data_load_more",
        ))
        .with_node(Node::wait(
            "wait_after_data_load_more",
            retry_wait,
            "increment_outer_loop_counter",
        ))
        .with_node(Node::pass(
            "increment_inner_loop_counter",
            PassAction::Increment(INNER_COUNTER.to_string()),
            "retry_inner_loop",
        ))
        .with_node(Node::choice(
            "retry_inner_loop",
            vec![ChoiceBranch::new(
                Condition::numeric_less_than_equals(
                    field(INNER_COUNTER),
                    f64::from(config.retry.inner_ceiling),
                ),
                "data_load_initial",
            )],
            NOTIFY_FAILURE,
        ))
        .with_node(Node::pass(
            "increment_outer_loop_counter",
            PassAction::Increment(OUTER_COUNTER.to_string()),
            "retry_outer_loop",
        ))
        .with_node(Node::choice(
            "retry_outer_loop",
            vec![ChoiceBranch::new(
                Condition::numeric_less_than_equals(
                    field(OUTER_COUNTER),
                    f64::from(config.retry.outer_ceiling),
                ),
                "data_load_initial",
            )],
            NOTIFY_FAILURE,
        ));

    with_notifications(definition).build()
}
