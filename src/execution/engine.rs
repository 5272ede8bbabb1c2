//! Workflow Execution Engine
//!
//! Executes a [`WorkflowDefinition`] against an [`ExecutionContext`] until a
//! terminal node is reached or the run's wall-clock budget elapses:
//! - Node dispatch (Task, Choice, Wait, Pass, FanOut, Succeed, Fail)
//! - Catch clause routing for failed nodes
//! - Bounded-concurrency and sequential fan-out over deletion lists
//! - Synchronous sub-workflow runs, including recursive ones
//!
//! The engine holds no per-run state. Any number of runs may execute
//! concurrently on one engine; each owns its [`ExecutionRecord`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use log::{debug, error, info, warn};
use serde_json::{json, Map, Value};
use tokio::time::{sleep, timeout};

use super::error::{EngineError, ErrorKind, TaskError};
use super::registry::WorkflowRegistry;
use super::task::{execute_task, TaskEnv};
use crate::config::OrchestratorConfig;
use crate::monitoring::EventType;
use crate::services::{Services, SubWorkflowInvoker};
use crate::workflow::condition::route;
use crate::workflow::context::{ExecutionContext, JsonPath, ResultPath};
use crate::workflow::deletion::{list_to_value, BatchMode, StackDeletionItem};
use crate::workflow::model::{
    find_catch, FanOutMode, FanOutSpec, Node, NodeKind, PassAction, ITEM_INDEX_KEY,
    STACK_NAME_KEY,
};
use crate::workflow::state::{ExecutionRecord, ExecutionStatus};

/// Budget of a run whose definition sets none.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3 * 60 * 60);

/// Engine-wide settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Tier named in notification subjects
    pub tier: String,
    /// Default wall-clock budget per run
    pub timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tier: "dev".to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl From<&OrchestratorConfig> for EngineConfig {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            tier: config.tier.clone(),
            timeout: config.timeout(),
        }
    }
}

/// Workflow execution engine.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use serde_json::json;
/// use stackrunner::config::OrchestratorConfig;
/// use stackrunner::execution::{EngineConfig, WorkflowEngine, WorkflowRegistry};
/// use stackrunner::services::{Services, SimulatedServices};
/// use stackrunner::workflows::register_all;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = OrchestratorConfig::default().rendered();
/// let mut registry = WorkflowRegistry::new();
/// register_all(&mut registry, &config)?;
///
/// let services = Services::from_backend(Arc::new(SimulatedServices::new()));
/// let engine = WorkflowEngine::new(Arc::new(registry), services, EngineConfig::from(&config));
///
/// let record = engine.run("post-deployment", json!({"tier": "dev"})).await?;
/// println!("{}", record.status);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct WorkflowEngine {
    registry: Arc<WorkflowRegistry>,
    services: Services,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(registry: Arc<WorkflowRegistry>, services: Services, config: EngineConfig) -> Self {
        Self {
            registry,
            services,
            config,
        }
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Creates a running record for `workflow`, positioned at its start node.
    ///
    /// The input must be a JSON object; it becomes the initial context unchanged.
    pub fn start(&self, workflow: &str, input: Value) -> Result<ExecutionRecord, EngineError> {
        let definition = self.registry.get(workflow)?;
        let context = ExecutionContext::from_value(input.clone())?;
        let budget = definition
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.config.timeout);

        let record = ExecutionRecord::new(&definition.name, input, context, &definition.start, budget);
        info!(
            "Starting workflow '{}' [{}] at '{}'",
            record.workflow, record.execution_id, definition.start
        );
        Ok(record)
    }

    /// Runs a workflow to a terminal state.
    ///
    /// A run that outlives its budget ends `TimedOut`. Only engine faults
    /// (unknown workflow, bad input, broken definition) are returned as
    /// errors; a failed run is a record with status `Failed`.
    pub fn run<'a>(
        &'a self,
        workflow: &'a str,
        input: Value,
    ) -> BoxFuture<'a, Result<ExecutionRecord, EngineError>> {
        Box::pin(async move {
            let mut record = self.start(workflow, input)?;
            let budget = record.budget();

            let outcome = timeout(budget, self.drive(&mut record)).await;
            match outcome {
                Ok(result) => result?,
                Err(_) => {
                    let at = record.current_node.clone().unwrap_or_default();
                    record
                        .timeline
                        .add_event_with_detail(at, EventType::Failed, "run budget exceeded");
                    record.mark_timed_out();
                }
            }

            log_outcome(&record);
            Ok(record)
        })
    }

    /// Steps a record until it is terminal.
    async fn drive(&self, record: &mut ExecutionRecord) -> Result<(), EngineError> {
        while !record.is_terminal() {
            self.step(record).await?;
        }
        Ok(())
    }

    /// Executes the record's current node and moves it to the next one.
    pub fn step<'a>(&'a self, record: &'a mut ExecutionRecord) -> BoxFuture<'a, Result<(), EngineError>> {
        Box::pin(async move {
            let node_id = match (&record.current_node, record.status) {
                (Some(id), ExecutionStatus::Running) => id.clone(),
                _ => return Err(EngineError::NotRunning(record.execution_id.clone())),
            };
            let definition = self.registry.get(&record.workflow)?;
            let node = definition
                .node(&node_id)
                .ok_or_else(|| EngineError::UnknownNode {
                    workflow: definition.name.clone(),
                    node: node_id.clone(),
                })?;

            record.timeline.add_event(&node.id, EventType::Entered);
            debug!("{} [{}]: entering '{}'", record.workflow, record.execution_id, node.id);

            match &node.kind {
                NodeKind::Succeed => {
                    record.timeline.add_event(&node.id, EventType::Completed);
                    record.mark_succeeded();
                }

                NodeKind::Fail { error, cause } => {
                    let message = match (error, cause) {
                        (Some(error), Some(cause)) => format!("{}: {}", error, cause),
                        (Some(text), None) | (None, Some(text)) => text.clone(),
                        (None, None) => format!("reached fail node '{}'", node.id),
                    };
                    let last_error = JsonPath::root().key("error").key("cause");
                    let message = match record.context.get(&last_error).and_then(Value::as_str) {
                        Some(cause) => format!("{} (last error: {})", message, cause),
                        None => message,
                    };
                    record
                        .timeline
                        .add_event_with_detail(&node.id, EventType::Failed, &message);
                    record.mark_failed(TaskError::task_failed(message));
                }

                NodeKind::Choice { branches, otherwise } => {
                    let next = route(branches, otherwise, &record.context).to_string();
                    advance(record, node, &next);
                }

                NodeKind::Wait { seconds, next } => {
                    debug!("'{}' waiting {} s", node.id, seconds);
                    sleep(Duration::from_secs(*seconds)).await;
                    advance(record, node, next);
                }

                NodeKind::Pass { action, next } => {
                    let outcome = match action {
                        PassAction::Merge(fields) => {
                            record.context.merge(fields.clone());
                            Ok(())
                        }
                        PassAction::Increment(counter) => record
                            .context
                            .increment(counter)
                            .map(|value| debug!("'{}' = {}", counter, value)),
                    };
                    settle(record, node, outcome, next);
                }

                NodeKind::Task(spec) => {
                    let env = TaskEnv {
                        services: &self.services,
                        invoker: self,
                        tier: &self.config.tier,
                        workflow: &definition.name,
                    };
                    let outcome = execute_task(&spec.action, &record.context, &env).await;
                    let outcome = outcome.and_then(|value| store_result(record, &spec.result, value));
                    settle(record, node, outcome, &spec.next);
                }

                NodeKind::FanOut(spec) => {
                    let outcome = self.fan_out(record, node, spec).await;
                    let outcome = outcome.and_then(|value| store_result(record, &spec.result, value));
                    settle(record, node, outcome, &spec.next);
                }
            }

            Ok(())
        })
    }

    async fn fan_out(
        &self,
        record: &mut ExecutionRecord,
        node: &Node,
        spec: &FanOutSpec,
    ) -> Result<Value, TaskError> {
        let list = record
            .context
            .get(&spec.items)
            .ok_or_else(|| TaskError::validation(format!("no deletion list at {}", spec.items)))?;
        let items = StackDeletionItem::parse_list(list)?;

        match spec.mode {
            FanOutMode::Parallel { max_concurrency } => {
                self.fan_out_parallel(record, node, spec, &items, max_concurrency)
                    .await
            }
            FanOutMode::Sequential => self.fan_out_sequential(record, node, spec, &items).await,
        }
    }

    /// Runs every item with at most `max_concurrency` in flight, then fails
    /// if any branch failed.
    async fn fan_out_parallel(
        &self,
        record: &mut ExecutionRecord,
        node: &Node,
        spec: &FanOutSpec,
        items: &[StackDeletionItem],
        max_concurrency: usize,
    ) -> Result<Value, TaskError> {
        let limit = max_concurrency.max(1);
        info!(
            "'{}': deleting {} item(s), {} at a time",
            node.id,
            items.len(),
            limit
        );

        let mut outcomes: Vec<(usize, Result<Value, TaskError>)> = stream::iter(0..items.len())
            .map(|index| {
                self.run_item(spec, index, &items[index])
                    .map(move |outcome| (index, outcome))
            })
            .buffer_unordered(limit)
            .collect()
            .await;
        outcomes.sort_by_key(|(index, _)| *index);

        let mut failures = Vec::new();
        for (index, outcome) in &outcomes {
            let label = item_label(&items[*index]);
            match outcome {
                Ok(_) => record
                    .timeline
                    .add_event_with_detail(&node.id, EventType::Iteration(*index), label),
                Err(err) => {
                    warn!("'{}': branch {} ({}) failed: {}", node.id, index, label, err);
                    record.timeline.add_event_with_detail(
                        &node.id,
                        EventType::Iteration(*index),
                        format!("{} failed", label),
                    );
                    failures.push(format!("[{}] {}: {}", index, label, err.cause));
                }
            }
        }

        if failures.is_empty() {
            Ok(json!({ "branches": items.len() }))
        } else {
            Err(TaskError::task_failed(format!(
                "{} of {} branch(es) failed: {}",
                failures.len(),
                items.len(),
                failures.join("; ")
            )))
        }
    }

    /// Runs items one at a time in list order; the first failure stops the loop.
    async fn fan_out_sequential(
        &self,
        record: &mut ExecutionRecord,
        node: &Node,
        spec: &FanOutSpec,
        items: &[StackDeletionItem],
    ) -> Result<Value, TaskError> {
        let max_iterations = items.len();

        for (counter, item) in items.iter().enumerate() {
            let label = item_label(item);
            debug!("'{}': item {} of {} ({})", node.id, counter + 1, max_iterations, label);
            record
                .timeline
                .add_event_with_detail(&node.id, EventType::Iteration(counter), &label);

            if let Err(err) = self.run_item(spec, counter, item).await {
                return Err(TaskError::new(
                    err.kind,
                    format!("item {} ({}) failed: {}", counter, label, err.cause),
                ));
            }
        }

        Ok(json!({ "counter": max_iterations, "max_iterations": max_iterations }))
    }

    /// Runs the workflow responsible for one deletion item.
    fn run_item<'a>(
        &'a self,
        spec: &'a FanOutSpec,
        index: usize,
        item: &'a StackDeletionItem,
    ) -> BoxFuture<'a, Result<Value, TaskError>> {
        Box::pin(async move {
            let mut input = Map::new();
            let workflow = match item {
                StackDeletionItem::Leaf(name) => {
                    input.insert(STACK_NAME_KEY.to_string(), Value::String(name.clone()));
                    input.insert(ITEM_INDEX_KEY.to_string(), Value::from(index));
                    &spec.leaf_workflow
                }
                StackDeletionItem::Batch { mode, items } => {
                    input.insert(mode.items_key().to_string(), list_to_value(items));
                    match mode {
                        BatchMode::Parallel => &spec.batches.parallel,
                        BatchMode::Sequential => &spec.batches.sequential,
                    }
                }
            };
            self.run_sync(workflow, Value::Object(input)).await
        })
    }
}

#[async_trait]
impl SubWorkflowInvoker for WorkflowEngine {
    async fn run_sync(&self, workflow: &str, input: Value) -> Result<Value, TaskError> {
        let record = self
            .run(workflow, input)
            .await
            .map_err(|e| TaskError::validation(e.to_string()))?;

        match record.status {
            ExecutionStatus::Succeeded => Ok(record.context.into_value()),
            ExecutionStatus::TimedOut => Err(TaskError::timeout(format!(
                "sub-workflow '{}' [{}] timed out",
                workflow, record.execution_id
            ))),
            _ => {
                let cause = record
                    .error
                    .map(|e| e.cause)
                    .unwrap_or_else(|| "no cause recorded".to_string());
                Err(TaskError::task_failed(format!(
                    "sub-workflow '{}' [{}] failed: {}",
                    workflow, record.execution_id, cause
                )))
            }
        }
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("workflows", &self.registry.names())
            .field("config", &self.config)
            .finish()
    }
}

fn store_result(record: &mut ExecutionRecord, result: &ResultPath, value: Value) -> Result<(), TaskError> {
    record
        .context
        .apply_result(result, value)
        .map_err(|e| TaskError::validation(e.to_string()))
}

fn advance(record: &mut ExecutionRecord, node: &Node, next: &str) {
    record.timeline.add_event(&node.id, EventType::Completed);
    debug!("{}: '{}' -> '{}'", record.workflow, node.id, next);
    record.current_node = Some(next.to_string());
}

/// Moves on after a node that can fail: to `next` on success, to a matching
/// catch target on failure, or ends the run when nothing catches.
fn settle(record: &mut ExecutionRecord, node: &Node, outcome: Result<(), TaskError>, next: &str) {
    let err = match outcome {
        Ok(()) => return advance(record, node, next),
        Err(err) => err,
    };

    let Some(clause) = find_catch(node.catch_clauses(), &err) else {
        error!("{}: '{}' failed: {}", record.workflow, node.id, err);
        record
            .timeline
            .add_event_with_detail(&node.id, EventType::Failed, err.to_string());
        record.mark_failed(err);
        return;
    };

    warn!(
        "{}: '{}' failed ({}), continuing at '{}'",
        record.workflow, node.id, err, clause.next
    );
    record
        .timeline
        .add_event_with_detail(&node.id, EventType::Caught, err.to_string());

    if let Some(path) = &clause.result_path {
        let detail = json!({ "error": err.kind.to_string(), "cause": err.cause });
        if let Err(e) = record.context.set(path, detail) {
            error!("{}: cannot store error of '{}': {}", record.workflow, node.id, e);
            record.mark_failed(TaskError::new(ErrorKind::Validation, e.to_string()));
            return;
        }
    }
    record.current_node = Some(clause.next.clone());
}

fn item_label(item: &StackDeletionItem) -> String {
    match item {
        StackDeletionItem::Leaf(name) => name.clone(),
        StackDeletionItem::Batch { mode, items } => {
            format!("{} batch of {} stack(s)", mode.items_key(), items.len())
        }
    }
}

fn log_outcome(record: &ExecutionRecord) {
    let elapsed = record.elapsed().num_milliseconds();
    match (&record.status, &record.error) {
        (ExecutionStatus::Succeeded, _) => info!(
            "Workflow '{}' [{}] succeeded in {} ms",
            record.workflow, record.execution_id, elapsed
        ),
        (ExecutionStatus::TimedOut, _) => error!(
            "Workflow '{}' [{}] timed out after {} s",
            record.workflow, record.execution_id, record.budget_secs
        ),
        (_, Some(err)) => error!(
            "Workflow '{}' [{}] failed: {}",
            record.workflow, record.execution_id, err
        ),
        _ => {}
    }
}
