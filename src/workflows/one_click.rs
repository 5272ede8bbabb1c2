//! 1-Click End-to-End Workflow
//!
//! Rebuilds a tier from scratch in one run:
//!
//! 1. pre-deploy cleanup (the dispatcher, given the run's own input), tried twice
//! 2. backend pipeline, polled until it leaves `InProgress`
//! 3. post-deployment, with the wipe-clean-db payload when asked for
//! 4. frontend pipeline unless `skipFrontendDeployment` is present
//! 5. security gate: any open finding for the app fails the run

use serde_json::Value;

use super::{field, with_notifications, CLEANUP_STACKS, NOTIFY_FAILURE, NOTIFY_SUCCESS, ONE_CLICK, POST_DEPLOYMENT};
use crate::config::OrchestratorConfig;
use crate::execution::error::EngineError;
use crate::services::PipelineStatus;
use crate::workflow::condition::{ChoiceBranch, Condition};
use crate::workflow::context::ResultPath;
use crate::workflow::model::{CatchClause, Node, Payload, TaskAction, WorkflowDefinition};

/// Flags selecting the wipe-clean-db post-deployment payload.
pub const WIPE_CLEAN_DB_FLAGS: &[&str] = &["run-rds-init", "runRdsInit"];

pub const SKIP_FRONTEND_FLAG: &str = "skipFrontendDeployment";

/// Start, wait, poll and check nodes for one pipeline. Nodes are prefixed
/// with `stage`; success continues at `next`.
fn pipeline_stage(stage: &str, pipeline: &str, poll_secs: u64, next: &str) -> Vec<Node> {
    let execution = format!("{}_pipeline", stage);
    let status = format!("{}_pipeline_status", stage);
    let deploy = format!("deploy_{}", stage);
    let wait = format!("wait_for_{}_pipeline", stage);
    let poll = format!("get_{}_pipeline_status", stage);
    let check = format!("check_{}_pipeline_status", stage);
    let status_path = field(&status).key("status");

    vec![
        Node::task(
            &deploy,
            TaskAction::StartPipeline {
                pipeline: pipeline.to_string(),
            },
            &wait,
        )
        .with_result(ResultPath::Merge(field(&execution)))
        .with_catch(CatchClause::all(NOTIFY_FAILURE)),
        Node::wait(&wait, poll_secs, &poll),
        Node::task(
            &poll,
            TaskAction::PipelineStatus {
                pipeline: pipeline.to_string(),
                execution_id: field(&execution).key("execution_id"),
            },
            &check,
        )
        .with_result(ResultPath::Merge(field(&status)))
        .with_catch(CatchClause::all(NOTIFY_FAILURE)),
        Node::choice(
            &check,
            vec![
                ChoiceBranch::new(
                    Condition::string_equals(status_path.clone(), PipelineStatus::InProgress.to_string()),
                    &wait,
                ),
                ChoiceBranch::new(
                    Condition::string_equals(status_path, PipelineStatus::Succeeded.to_string()),
                    next,
                ),
            ],
            NOTIFY_FAILURE,
        ),
    ]
}

fn post_deployment(id: &str, payload: &Value) -> Node {
    Node::task(
        id,
        TaskAction::run_workflow(POST_DEPLOYMENT, Payload::Literal(payload.clone())),
        "should_deploy_frontend",
    )
    .with_result(ResultPath::Merge(field("post_deployment")))
    .with_catch(CatchClause::all(NOTIFY_FAILURE))
}

pub fn definition(config: &OrchestratorConfig) -> Result<WorkflowDefinition, EngineError> {
    let poll_secs = config.waits.pipeline_poll_secs;
    let payloads = &config.post_deploy_payloads;

    let mut definition = WorkflowDefinition::new(ONE_CLICK, "pre_deploy_cleanup")
        .with_comment("Cleanup, deploy, hydrate and verify a whole tier")
        .with_timeout_secs(config.timeout_secs)
        .with_node(
            Node::task(
                "pre_deploy_cleanup",
                TaskAction::run_workflow(CLEANUP_STACKS, Payload::Context),
                "pre_deploy_cleanup_again",
            )
            .with_catch(CatchClause::all("pre_deploy_cleanup_again")),
        )
        .with_node(
            Node::task(
                "pre_deploy_cleanup_again",
                TaskAction::run_workflow(CLEANUP_STACKS, Payload::Context),
                "deploy_backend",
            )
            .with_comment("Stacks stuck mid-deletion on the first pass are usually gone by now")
            .with_catch(CatchClause::all(NOTIFY_FAILURE)),
        );

    for node in pipeline_stage("backend", &config.pipelines.backend, poll_secs, "should_wipe_clean_db") {
        definition = definition.with_node(node);
    }

    definition = definition
        .with_node(Node::choice(
            "should_wipe_clean_db",
            vec![ChoiceBranch::new(
                Condition::any_present(WIPE_CLEAN_DB_FLAGS.iter().map(|flag| field(flag)).collect()),
                "post_deployment_wipe_clean_db",
            )],
            "post_deployment",
        ))
        .with_node(post_deployment("post_deployment", &payloads.default))
        .with_node(post_deployment("post_deployment_wipe_clean_db", &payloads.wipe_clean_db))
        .with_node(Node::choice(
            "should_deploy_frontend",
            vec![ChoiceBranch::new(
                Condition::is_present(field(SKIP_FRONTEND_FLAG)),
                "list_security_findings",
            )],
            "deploy_frontend",
        ));

    for node in pipeline_stage("frontend", &config.pipelines.frontend, poll_secs, "list_security_findings") {
        definition = definition.with_node(node);
    }

    let definition = definition
        .with_node(
            Node::task(
                "list_security_findings",
                TaskAction::ListFindings {
                    filter: config.findings_filter(),
                },
                "check_security_findings",
            )
            .with_result(ResultPath::Merge(field("security_findings")))
            .with_catch(CatchClause::all(NOTIFY_FAILURE)),
        )
        .with_node(Node::choice(
            "check_security_findings",
            vec![ChoiceBranch::new(
                Condition::is_present(field("security_findings").key("findings").index(0)),
                NOTIFY_FAILURE,
            )],
            NOTIFY_SUCCESS,
        ));

    with_notifications(definition).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;

    use crate::services::simulated::ServiceCall;
    use crate::services::{Finding, SimulatedServices};
    use crate::workflow::state::ExecutionStatus;
    use crate::workflows::{subjects_for, test_engine};

    const BACKEND: &str = "myapp-backend-pipeline-dev";
    const FRONTEND: &str = "myapp-frontend-pipeline-dev";

    fn started_pipelines(backend: &SimulatedServices) -> Vec<String> {
        backend
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                ServiceCall::StartPipeline(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    fn finding(severity: &str) -> Finding {
        Finding {
            id: "finding-1".into(),
            title: "CVE-2024-0001 in base image".into(),
            severity: severity.into(),
            resource_id: "myapp-backend-api-dev".into(),
            record_state: "ACTIVE".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_run_succeeds() {
        let backend = SimulatedServices::new();
        backend.script_pipeline(BACKEND, vec![PipelineStatus::InProgress, PipelineStatus::InProgress]);
        let (engine, backend) = test_engine(backend);

        let started = tokio::time::Instant::now();
        let record = engine.run(ONE_CLICK, json!({})).await.unwrap();

        assert!(record.is_succeeded());
        assert_eq!(started_pipelines(&backend), vec![BACKEND, FRONTEND]);
        assert_eq!(record.timeline.visits("get_backend_pipeline_status"), 3);
        assert_eq!(record.timeline.visits("pre_deploy_cleanup_again"), 1);
        assert!(started.elapsed() >= Duration::from_secs(4 * 300));
        assert_eq!(
            subjects_for(&backend, ONE_CLICK),
            vec!["Success: dev tier workflow one-click-end-to-end"]
        );
        assert_eq!(subjects_for(&backend, CLEANUP_STACKS).len(), 2);
        assert_eq!(subjects_for(&backend, POST_DEPLOYMENT).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_backend_pipeline_aborts() {
        let backend = SimulatedServices::new();
        backend.script_pipeline(BACKEND, vec![PipelineStatus::Failed]);
        let (engine, backend) = test_engine(backend);

        let record = engine.run(ONE_CLICK, json!({})).await.unwrap();

        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(started_pipelines(&backend), vec![BACKEND]);
        assert_eq!(subjects_for(&backend, POST_DEPLOYMENT).len(), 0);
        assert_eq!(
            subjects_for(&backend, ONE_CLICK),
            vec!["FAILURE: dev tier workflow one-click-end-to-end"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pipeline_start_failure_aborts() {
        let backend = SimulatedServices::new();
        backend.fail_pipeline_start(BACKEND);
        let (engine, _) = test_engine(backend);

        let record = engine.run(ONE_CLICK, json!({})).await.unwrap();

        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(record.error.unwrap().cause.contains("not found"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_frontend_and_wipe_clean_db() {
        let (engine, backend) = test_engine(SimulatedServices::new());

        let record = engine
            .run(ONE_CLICK, json!({"skipFrontendDeployment": true, "runRdsInit": true}))
            .await
            .unwrap();

        assert!(record.is_succeeded());
        assert_eq!(started_pipelines(&backend), vec![BACKEND]);
        assert_eq!(backend.invocation_count("myapp-dev-db-admin-setup"), 1);
        assert_eq!(
            record.context.get(&field("post_deployment").key("run-rds-init")),
            Some(&json!(true))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_post_deployment_skips_db_setup() {
        let (engine, backend) = test_engine(SimulatedServices::new());

        let record = engine.run(ONE_CLICK, json!({})).await.unwrap();

        assert!(record.is_succeeded());
        assert_eq!(backend.invocation_count("myapp-dev-db-admin-setup"), 0);
        assert_eq!(backend.invocation_count("myapp-dev-data-loader-initial"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_security_findings_fail_the_run() {
        let backend = SimulatedServices::new();
        backend.add_finding(finding("CRITICAL"));
        let (engine, backend) = test_engine(backend);

        let record = engine.run(ONE_CLICK, json!({})).await.unwrap();

        assert_eq!(record.status, ExecutionStatus::Failed);
        let sent = backend.notifications();
        let last = sent.last().unwrap();
        assert_eq!(last.subject, "FAILURE: dev tier workflow one-click-end-to-end");
        assert_eq!(last.body["security_findings"]["findings"][0]["severity"], "CRITICAL");
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_severity_findings_pass() {
        let backend = SimulatedServices::new();
        backend.add_finding(finding("LOW"));
        let (engine, _) = test_engine(backend);

        let record = engine.run(ONE_CLICK, json!({})).await.unwrap();

        assert!(record.is_succeeded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_failing_twice_aborts() {
        let backend = SimulatedServices::new();
        backend.fail_deletes("myapp-frontend-dev");
        backend.script_statuses("myapp-frontend-dev", &["DELETE_FAILED", "DELETE_FAILED"]);
        let (engine, backend) = test_engine(backend);

        let record = engine
            .run(ONE_CLICK, json!({"cleanup-failed-stacks": true}))
            .await
            .unwrap();

        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.timeline.visits("pre_deploy_cleanup_again"), 1);
        assert!(started_pipelines(&backend).is_empty());
        assert_eq!(subjects_for(&backend, CLEANUP_STACKS).len(), 2);
    }
}
