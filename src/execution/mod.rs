//! Workflow Execution Module
//!
//! Provides the engine that runs workflow definitions, the registry that
//! binds workflow names, and the execution of individual tasks.
//!
//! # Architecture
//!
//! - [`engine`]: Main execution engine driving runs to a terminal state
//! - [`registry`]: Logical workflow names resolved to definitions
//! - [`task`]: Individual task execution against external services
//! - [`error`]: Task and engine error types

pub mod engine;
pub mod error;
pub mod registry;
pub mod task;

pub use engine::{EngineConfig, WorkflowEngine, DEFAULT_TIMEOUT};
pub use error::{EngineError, ErrorKind, TaskError};
pub use registry::WorkflowRegistry;
