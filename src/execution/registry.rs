//! Workflow Registry
//!
//! Resolves logical workflow names to definitions. Sub-workflow tasks and
//! fan-out nodes refer to other workflows by name only; the registry is
//! the one place those names are bound.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;

use super::error::EngineError;
use crate::workflow::model::WorkflowDefinition;
use crate::workflow::validator::validate_definition;

/// Name → definition map, injected into the engine at construction.
#[derive(Debug, Clone, Default)]
pub struct WorkflowRegistry {
    definitions: BTreeMap<String, Arc<WorkflowDefinition>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and registers a definition under its own name.
    ///
    /// Registering a name twice replaces the earlier definition.
    pub fn register(&mut self, definition: WorkflowDefinition) -> Result<(), EngineError> {
        validate_definition(&definition)?;
        debug!(
            "Registered workflow '{}' ({} nodes)",
            definition.name,
            definition.len()
        );
        self.definitions
            .insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<WorkflowDefinition>, EngineError> {
        self.definitions
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownWorkflow(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.definitions.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Checks that every workflow referenced by a registered definition is
    /// itself registered.
    pub fn verify(&self) -> Result<(), EngineError> {
        let missing: Vec<String> = self
            .definitions
            .values()
            .flat_map(|def| {
                def.referenced_workflows()
                    .into_iter()
                    .filter(|name| !self.contains(name))
                    .map(move |name| format!("'{}' (used by '{}')", name, def.name))
            })
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(EngineError::InvalidDefinition(format!(
                "unregistered workflows: {}",
                missing.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::{Node, Payload, TaskAction};

    fn caller() -> WorkflowDefinition {
        WorkflowDefinition::new("caller", "call")
            .with_node(Node::task(
                "call",
                TaskAction::run_workflow("callee", Payload::Context),
                "done",
            ))
            .with_node(Node::succeed("done"))
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = WorkflowRegistry::new();
        registry.register(caller()).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("caller").unwrap().start, "call");
        assert!(matches!(
            registry.get("nope"),
            Err(EngineError::UnknownWorkflow(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_register_rejects_invalid_definition() {
        let mut registry = WorkflowRegistry::new();
        let broken = WorkflowDefinition::new("broken", "missing").with_node(Node::succeed("done"));

        assert!(registry.register(broken).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_verify_cross_references() {
        let mut registry = WorkflowRegistry::new();
        registry.register(caller()).unwrap();

        let err = registry.verify().unwrap_err();
        assert!(err.to_string().contains("'callee' (used by 'caller')"));

        registry
            .register(WorkflowDefinition::new("callee", "done").with_node(Node::succeed("done")))
            .unwrap();
        assert!(registry.verify().is_ok());
        assert_eq!(registry.names(), vec!["callee", "caller"]);
    }
}
