//! Workflow Definition Module
//!
//! Provides data structures and utilities for defining, parsing, and
//! validating orchestration workflows, and the context and records that
//! carry a run's state.
//!
//! # Structure
//!
//! - [`model`]: Core data structures (WorkflowDefinition, Node)
//! - [`context`]: ExecutionContext and `$.path` addressing
//! - [`condition`]: Choice conditions
//! - [`deletion`]: Recursive stack deletion items
//! - [`parser`]: YAML/JSON loading
//! - [`validator`]: Graph validation
//! - [`state`]: Execution records and persistence

pub mod condition;
pub mod context;
pub mod deletion;
pub mod model;
pub mod parser;
pub mod state;
pub mod validator;

pub use condition::{ChoiceBranch, Condition, WildcardPattern};
pub use context::{ExecutionContext, JsonPath, ResultPath};
pub use deletion::{BatchMode, StackDeletionItem};
pub use model::{
    BatchTargets, CatchClause, ErrorMatcher, FanOutMode, FanOutSpec, Node, NodeKind, Outcome,
    PassAction, Payload, TaskAction, TaskSpec, WorkflowDefinition,
};
pub use parser::{load_definition, parse_definition, save_definition, to_yaml};
pub use state::{ExecutionRecord, ExecutionStatus};
pub use validator::validate_definition;
