//! StackRunner - Deployment Orchestration Engine
//!
//! Runs the deployment and teardown workflows of a multi-tier cloud
//! application as explicit state machines: steps, choices, bounded retry
//! loops, waits, bounded-concurrency fan-out over stack lists and
//! synchronous sub-workflows.
//!
//! # Architecture
//!
//! The library is organized into six modules:
//!
//! - [`workflow`]: Definitions, context paths, conditions and run records
//! - [`execution`]: The engine, the workflow registry and task execution
//! - [`services`]: Collaborator traits and an in-memory simulated backend
//! - [`workflows`]: The built-in deployment and cleanup workflows
//! - [`config`]: Orchestrator settings loaded from YAML
//! - [`monitoring`]: Per-run execution timeline
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use stackrunner::{build_engine, OrchestratorConfig, Services, SimulatedServices};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = OrchestratorConfig::load("orchestrator.yaml")?;
//! let services = Services::from_backend(Arc::new(SimulatedServices::new()));
//! let engine = build_engine(&config, services)?;
//!
//! let record = engine
//!     .run("cleanup-stacks", json!({"destroy-app-stacks-only": true}))
//!     .await?;
//! println!("{}", record.status);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod execution;
pub mod monitoring;
pub mod services;
pub mod workflow;
pub mod workflows;

use std::sync::Arc;

// Re-export commonly used types
pub use config::OrchestratorConfig;
pub use execution::{EngineConfig, EngineError, TaskError, WorkflowEngine, WorkflowRegistry};
pub use services::{Services, SimulatedServices};
pub use workflow::{ExecutionRecord, ExecutionStatus, WorkflowDefinition};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "StackRunner";

/// Builds an engine with every built-in workflow registered.
///
/// `config` should already be rendered; see [`OrchestratorConfig::rendered`].
pub fn build_engine(config: &OrchestratorConfig, services: Services) -> Result<WorkflowEngine, EngineError> {
    let mut registry = WorkflowRegistry::new();
    workflows::register_all(&mut registry, config)?;
    Ok(WorkflowEngine::new(
        Arc::new(registry),
        services,
        EngineConfig::from(config),
    ))
}
