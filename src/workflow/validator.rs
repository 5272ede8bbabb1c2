//! Workflow Validation
//!
//! Structural checks run before a definition is registered or executed:
//! - Node field validation (ids, wait durations, fan-out limits)
//! - Reference integrity of every transition and catch target
//! - Reachability from the start node
//!
//! Loops are legal: retry patterns are cycles by construction.

use std::collections::{HashSet, VecDeque};

use log::{debug, info, warn};
use thiserror::Error;

use super::model::{FanOutMode, NodeKind, WorkflowDefinition};
use crate::execution::error::EngineError;

/// Validation error types for readable error messages.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Workflow has no nodes")]
    EmptyWorkflow,

    #[error("Workflow has an empty name")]
    EmptyName,

    #[error("Duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    #[error("Node has empty or whitespace-only ID")]
    EmptyNodeId,

    #[error("Start node '{0}' does not exist")]
    MissingStart(String),

    #[error("Node '{node}' references unknown node '{reference}'")]
    InvalidReference { node: String, reference: String },

    #[error("Fan-out node '{0}' has a concurrency limit of zero")]
    ZeroConcurrency(String),

    #[error("Catch clause on node '{0}' matches no errors")]
    EmptyCatch(String),

    #[error("No terminal node is reachable from '{0}'")]
    NoReachableTerminal(String),
}

/// Collects every structural problem in a definition.
pub fn collect_errors(definition: &WorkflowDefinition) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if definition.name.trim().is_empty() {
        errors.push(ValidationError::EmptyName);
    }

    if definition.nodes.is_empty() {
        errors.push(ValidationError::EmptyWorkflow);
        return errors;
    }

    let mut seen_ids: HashSet<&str> = HashSet::new();
    for node in &definition.nodes {
        if node.id.trim().is_empty() {
            errors.push(ValidationError::EmptyNodeId);
        } else if !seen_ids.insert(node.id.as_str()) {
            errors.push(ValidationError::DuplicateNodeId(node.id.clone()));
        }
    }

    if !seen_ids.contains(definition.start.as_str()) {
        errors.push(ValidationError::MissingStart(definition.start.clone()));
    }

    for node in &definition.nodes {
        for target in node.transitions() {
            if !seen_ids.contains(target) {
                errors.push(ValidationError::InvalidReference {
                    node: node.id.clone(),
                    reference: target.to_string(),
                });
            }
        }

        for clause in node.catch_clauses() {
            if clause.errors.is_empty() {
                errors.push(ValidationError::EmptyCatch(node.id.clone()));
            }
        }

        match &node.kind {
            NodeKind::FanOut(spec) => {
                if let FanOutMode::Parallel { max_concurrency: 0 } = spec.mode {
                    errors.push(ValidationError::ZeroConcurrency(node.id.clone()));
                }
            }
            NodeKind::Choice { branches, .. } if branches.is_empty() => {
                warn!("Choice node '{}' has no branches; it always takes 'otherwise'", node.id);
            }
            NodeKind::Wait { seconds: 0, .. } => {
                debug!("Wait node '{}' has a zero duration", node.id);
            }
            _ => {}
        }
    }

    if errors.is_empty() {
        let reachable = reachable_from_start(definition);

        for node in &definition.nodes {
            if !reachable.contains(node.id.as_str()) {
                warn!(
                    "Workflow '{}': node '{}' is unreachable from '{}'",
                    definition.name, node.id, definition.start
                );
            }
        }

        let reaches_terminal = definition
            .nodes
            .iter()
            .any(|n| n.is_terminal() && reachable.contains(n.id.as_str()));
        if !reaches_terminal {
            errors.push(ValidationError::NoReachableTerminal(definition.start.clone()));
        }
    }

    errors
}

/// Validates the entire workflow structure.
///
/// Performs the following checks:
/// 1. Workflow has a name and at least one node
/// 2. Node IDs are non-empty and unique
/// 3. The start node exists
/// 4. Every `next`, branch, `otherwise` and catch target exists
/// 5. Fan-out concurrency limits are positive
/// 6. A terminal node is reachable from the start
pub fn validate_definition(definition: &WorkflowDefinition) -> Result<(), EngineError> {
    debug!(
        "Validating workflow '{}' with {} nodes",
        definition.name,
        definition.nodes.len()
    );

    let errors = collect_errors(definition);
    if !errors.is_empty() {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        return Err(EngineError::InvalidDefinition(format!(
            "workflow '{}': {}",
            definition.name,
            messages.join("; ")
        )));
    }

    info!(
        "Workflow '{}' validated: {} nodes",
        definition.name,
        definition.nodes.len()
    );
    Ok(())
}

/// Breadth-first walk over transitions from the start node.
fn reachable_from_start(definition: &WorkflowDefinition) -> HashSet<&str> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    queue.push_back(definition.start.as_str());

    while let Some(current) = queue.pop_front() {
        if !visited.insert(current) {
            continue;
        }
        if let Some(node) = definition.node(current) {
            for target in node.transitions() {
                if !visited.contains(target) {
                    queue.push_back(target);
                }
            }
        }
    }

    visited
}
