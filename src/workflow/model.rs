//! Workflow Data Model
//!
//! Core data structures describing a workflow as a directed graph of nodes
//! rooted at a start node.
//!
//! # Example YAML Format
//!
//! ```yaml
//! name: check-stack
//! start: describe
//! nodes:
//!   - id: describe
//!     type: task
//!     action: { op: describe_stack, stack: $.stack_name }
//!     result: { merge: $.stack }
//!     next: is_deleted
//!     catch:
//!       - errors: [all]
//!         result_path: $.error
//!         next: gone
//!
//!   - id: is_deleted
//!     type: choice
//!     branches:
//!       - when: { string_equals: { path: $.stack.status, value: DELETE_COMPLETE } }
//!         next: gone
//!     otherwise: still_there
//!
//!   - id: gone
//!     type: succeed
//!
//!   - id: still_there
//!     type: fail
//!     error: StackStillPresent
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::condition::ChoiceBranch;
use super::context::{ExecutionContext, JsonPath, ResultPath};
use super::validator::validate_definition;
use crate::execution::error::{EngineError, ErrorKind, TaskError};
use crate::services::FindingsFilter;

/// Key under which a fan-out leaf run receives its stack name.
pub const STACK_NAME_KEY: &str = "stack_name";

/// Key under which a fan-out leaf run receives its position in the list.
pub const ITEM_INDEX_KEY: &str = "item_index";

/// Which data a task sends to its collaborator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    /// The whole context.
    #[default]
    Context,
    /// The value at a path.
    Path(JsonPath),
    /// A fixed value.
    Literal(Value),
}

impl Payload {
    pub fn resolve(&self, context: &ExecutionContext) -> Result<Value, TaskError> {
        match self {
            Self::Context => Ok(context.as_value().clone()),
            Self::Path(path) => context
                .get(path)
                .cloned()
                .ok_or_else(|| TaskError::validation(format!("no value at {}", path))),
            Self::Literal(value) => Ok(value.clone()),
        }
    }
}

/// Outcome announced by a notification task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

/// The external operation a Task node performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TaskAction {
    /// Call a compute function; result is `{status_code, body}`.
    InvokeFunction {
        function: String,
        #[serde(default)]
        payload: Payload,
    },
    /// Request deletion of the stack named at `stack`; result is null.
    DeleteStack { stack: JsonPath },
    /// Read a stack's status; result is `{status, cause?}`.
    DescribeStack { stack: JsonPath },
    /// Start a pipeline; result is `{execution_id}`.
    StartPipeline { pipeline: String },
    /// Poll a pipeline execution; result is `{status}`.
    PipelineStatus {
        pipeline: String,
        execution_id: JsonPath,
    },
    /// Query security findings; result is `{findings: [...]}`.
    ListFindings { filter: FindingsFilter },
    /// Publish the whole context to the notification sink.
    Notify { outcome: Outcome },
    /// Run another registered workflow to completion; result is its final context.
    RunWorkflow {
        workflow: String,
        #[serde(default)]
        input: Payload,
    },
}

impl TaskAction {
    pub fn invoke(function: impl Into<String>, payload: Payload) -> Self {
        Self::InvokeFunction {
            function: function.into(),
            payload,
        }
    }

    pub fn run_workflow(workflow: impl Into<String>, input: Payload) -> Self {
        Self::RunWorkflow {
            workflow: workflow.into(),
            input,
        }
    }

    pub fn notify(outcome: Outcome) -> Self {
        Self::Notify { outcome }
    }
}

/// Context updates performed by a Pass node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassAction {
    /// Shallow-merge fixed fields into the context.
    Merge(Map<String, Value>),
    /// Add one to an integer counter, keeping every other field.
    Increment(String),
}

/// Error filter of a catch clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMatcher {
    All,
    TaskFailed,
    ResourceNotFound,
    Timeout,
    Validation,
}

impl ErrorMatcher {
    /// How specifically this matcher names `kind`; `None` when it does not match.
    pub fn specificity(self, kind: ErrorKind) -> Option<u8> {
        match (self, kind) {
            (Self::All, _) => Some(0),
            (Self::TaskFailed, ErrorKind::TaskFailed) => Some(2),
            (Self::TaskFailed, ErrorKind::ResourceNotFound) => Some(1),
            (Self::ResourceNotFound, ErrorKind::ResourceNotFound) => Some(2),
            (Self::Timeout, ErrorKind::Timeout) => Some(2),
            (Self::Validation, ErrorKind::Validation) => Some(2),
            _ => None,
        }
    }
}

/// Routes a node failure to a recovery node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchClause {
    pub errors: Vec<ErrorMatcher>,
    /// Where the error lands in the context; `None` discards it.
    #[serde(default)]
    pub result_path: Option<JsonPath>,
    pub next: String,
}

impl CatchClause {
    /// Catches everything and stores the error at `$.error`.
    pub fn all(next: impl Into<String>) -> Self {
        Self {
            errors: vec![ErrorMatcher::All],
            result_path: Some(JsonPath::root().key("error")),
            next: next.into(),
        }
    }

    /// Catches task failures and stores the error at `$.error`.
    pub fn task_failed(next: impl Into<String>) -> Self {
        Self {
            errors: vec![ErrorMatcher::TaskFailed],
            result_path: Some(JsonPath::root().key("error")),
            next: next.into(),
        }
    }

    pub fn with_result_path(mut self, path: Option<JsonPath>) -> Self {
        self.result_path = path;
        self
    }

    fn specificity(&self, kind: ErrorKind) -> Option<u8> {
        self.errors.iter().filter_map(|m| m.specificity(kind)).max()
    }
}

/// Picks the catch clause for an error: most specific match, first declared on ties.
pub fn find_catch<'a>(catch: &'a [CatchClause], error: &TaskError) -> Option<&'a CatchClause> {
    let mut best: Option<(u8, &CatchClause)> = None;
    for clause in catch {
        if let Some(score) = clause.specificity(error.kind) {
            if best.map_or(true, |(top, _)| score > top) {
                best = Some((score, clause));
            }
        }
    }
    best.map(|(_, clause)| clause)
}

/// Concurrency behaviour of a fan-out node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FanOutMode {
    /// All items at once, at most `max_concurrency` in flight; waits for all.
    Parallel { max_concurrency: usize },
    /// One item at a time in list order; the first failure stops the loop.
    Sequential,
}

/// Workflows that receive nested batches, by batch mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchTargets {
    pub parallel: String,
    pub sequential: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub action: TaskAction,
    #[serde(default)]
    pub result: ResultPath,
    pub next: String,
    #[serde(default)]
    pub catch: Vec<CatchClause>,
}

/// A node applying sub-workflows to every item of a deletion list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanOutSpec {
    /// Path of the item list in the context.
    pub items: JsonPath,
    pub mode: FanOutMode,
    /// Workflow run for each stack name.
    pub leaf_workflow: String,
    /// Workflows run for nested batches.
    pub batches: BatchTargets,
    #[serde(default)]
    pub result: ResultPath,
    pub next: String,
    #[serde(default)]
    pub catch: Vec<CatchClause>,
}

/// What a node does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Task(TaskSpec),
    Choice {
        branches: Vec<ChoiceBranch>,
        otherwise: String,
    },
    Wait {
        seconds: u64,
        next: String,
    },
    Pass {
        action: PassAction,
        next: String,
    },
    FanOut(FanOutSpec),
    Succeed,
    Fail {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        cause: Option<String>,
    },
}

/// A single node of a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    #[serde(flatten)]
    pub kind: NodeKind,
}

impl Node {
    fn with_kind(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into().trim().to_string(),
            comment: None,
            kind,
        }
    }

    /// Creates a Task node with no result and no catch clauses.
    ///
    /// # Example
    ///
    /// ```
    /// use stackrunner::workflow::{CatchClause, Node, Payload, ResultPath, TaskAction};
    ///
    /// let node = Node::task(
    ///     "data_load_initial",
    ///     TaskAction::invoke("myapp-data-loader-dev", Payload::Context),
    ///     "check_data_load_initial",
    /// )
    /// .with_result(ResultPath::at("$.second_step").unwrap())
    /// .with_catch(CatchClause::task_failed("wait_after_data_load_initial"));
    /// assert!(!node.is_terminal());
    /// ```
    pub fn task(id: impl Into<String>, action: TaskAction, next: impl Into<String>) -> Self {
        Self::with_kind(
            id,
            NodeKind::Task(TaskSpec {
                action,
                result: ResultPath::Discard,
                next: next.into(),
                catch: Vec::new(),
            }),
        )
    }

    pub fn choice(id: impl Into<String>, branches: Vec<ChoiceBranch>, otherwise: impl Into<String>) -> Self {
        Self::with_kind(
            id,
            NodeKind::Choice {
                branches,
                otherwise: otherwise.into(),
            },
        )
    }

    pub fn wait(id: impl Into<String>, seconds: u64, next: impl Into<String>) -> Self {
        Self::with_kind(
            id,
            NodeKind::Wait {
                seconds,
                next: next.into(),
            },
        )
    }

    pub fn pass(id: impl Into<String>, action: PassAction, next: impl Into<String>) -> Self {
        Self::with_kind(
            id,
            NodeKind::Pass {
                action,
                next: next.into(),
            },
        )
    }

    pub fn fan_out(id: impl Into<String>, spec: FanOutSpec) -> Self {
        Self::with_kind(id, NodeKind::FanOut(spec))
    }

    pub fn succeed(id: impl Into<String>) -> Self {
        Self::with_kind(id, NodeKind::Succeed)
    }

    pub fn fail(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::with_kind(
            id,
            NodeKind::Fail {
                error: Some(error.into()),
                cause: None,
            },
        )
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Sets the result path of a Task or FanOut node.
    pub fn with_result(mut self, result: ResultPath) -> Self {
        match &mut self.kind {
            NodeKind::Task(spec) => spec.result = result,
            NodeKind::FanOut(spec) => spec.result = result,
            _ => log::warn!("Node '{}' produces no result; result path ignored", self.id),
        }
        self
    }

    /// Appends a catch clause to a Task or FanOut node.
    pub fn with_catch(mut self, clause: CatchClause) -> Self {
        match &mut self.kind {
            NodeKind::Task(spec) => spec.catch.push(clause),
            NodeKind::FanOut(spec) => spec.catch.push(clause),
            _ => log::warn!("Node '{}' cannot fail; catch clause ignored", self.id),
        }
        self
    }

    pub fn catch_clauses(&self) -> &[CatchClause] {
        match &self.kind {
            NodeKind::Task(spec) => &spec.catch,
            NodeKind::FanOut(spec) => &spec.catch,
            _ => &[],
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, NodeKind::Succeed | NodeKind::Fail { .. })
    }

    /// Every node id this node can transition to, catch targets included.
    pub fn transitions(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = match &self.kind {
            NodeKind::Task(spec) => vec![spec.next.as_str()],
            NodeKind::FanOut(spec) => vec![spec.next.as_str()],
            NodeKind::Choice { branches, otherwise } => branches
                .iter()
                .map(|b| b.next.as_str())
                .chain(std::iter::once(otherwise.as_str()))
                .collect(),
            NodeKind::Wait { next, .. } | NodeKind::Pass { next, .. } => vec![next.as_str()],
            NodeKind::Succeed | NodeKind::Fail { .. } => Vec::new(),
        };
        targets.extend(self.catch_clauses().iter().map(|c| c.next.as_str()));
        targets
    }

    /// Other workflows this node runs.
    pub fn referenced_workflows(&self) -> Vec<&str> {
        match &self.kind {
            NodeKind::Task(TaskSpec {
                action: TaskAction::RunWorkflow { workflow, .. },
                ..
            }) => vec![workflow.as_str()],
            NodeKind::FanOut(spec) => vec![
                spec.leaf_workflow.as_str(),
                spec.batches.parallel.as_str(),
                spec.batches.sequential.as_str(),
            ],
            _ => Vec::new(),
        }
    }
}

/// A named, immutable graph of nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Id of the entry node
    pub start: String,

    /// Wall-clock budget for one run; the engine default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    pub nodes: Vec<Node>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, start: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            comment: None,
            start: start.into(),
            timeout_secs: None,
            nodes: Vec::new(),
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Appends a node.
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Validates the graph and returns it.
    pub fn build(self) -> Result<Self, EngineError> {
        validate_definition(&self)?;
        Ok(self)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Names of every workflow this one runs, deduplicated.
    pub fn referenced_workflows(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .nodes
            .iter()
            .flat_map(Node::referenced_workflows)
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}
