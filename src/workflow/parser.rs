//! Workflow Parser
//!
//! Handles loading and saving workflow definitions. Files ending in
//! `.json` are read as JSON; anything else is read as YAML.

use std::fs;
use std::path::Path;

use log::{debug, info};

use super::model::WorkflowDefinition;
use super::validator::validate_definition;
use crate::execution::error::EngineError;

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Parses a definition from YAML text and validates it.
pub fn parse_definition(yaml: &str) -> Result<WorkflowDefinition, EngineError> {
    let definition: WorkflowDefinition = serde_yaml::from_str(yaml)?;
    validate_definition(&definition)?;
    Ok(definition)
}

/// Loads a workflow definition from a file.
///
/// This function:
/// 1. Reads the file
/// 2. Parses it as JSON or YAML depending on the extension
/// 3. Validates the graph structure
///
/// # Arguments
///
/// * `path` - Path to the definition file
///
/// # Returns
///
/// * `Ok(WorkflowDefinition)` - Successfully loaded and validated definition
/// * `Err` - Read, parse or validation error
///
/// # Example
///
/// ```rust,no_run
/// use stackrunner::workflow::load_definition;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let definition = load_definition("cleanup.yaml")?;
///     println!("Loaded {} nodes", definition.len());
///     Ok(())
/// }
/// ```
pub fn load_definition(path: impl AsRef<Path>) -> Result<WorkflowDefinition, EngineError> {
    let path = path.as_ref();
    info!("Loading workflow from: {}", path.display());

    let content = fs::read_to_string(path)?;
    debug!("Definition loaded ({} bytes)", content.len());

    let definition: WorkflowDefinition = if is_json(path) {
        serde_json::from_str(&content)?
    } else {
        serde_yaml::from_str(&content)?
    };

    info!(
        "Parsed workflow '{}': {} nodes, start '{}'",
        definition.name,
        definition.len(),
        definition.start
    );

    validate_definition(&definition)?;
    Ok(definition)
}

/// Renders a definition as YAML.
///
/// Enums are written as single-key maps (`merge: $.stack`) rather than YAML
/// tags, so the output parses back through [`parse_definition`].
pub fn to_yaml(definition: &WorkflowDefinition) -> Result<String, EngineError> {
    let value = serde_json::to_value(definition)?;
    Ok(serde_yaml::to_string(&value)?)
}

/// Saves a workflow definition, choosing the format from the extension.
pub fn save_definition(definition: &WorkflowDefinition, path: impl AsRef<Path>) -> Result<(), EngineError> {
    let path = path.as_ref();

    let content = if is_json(path) {
        serde_json::to_string_pretty(definition)?
    } else {
        to_yaml(definition)?
    };

    fs::write(path, content)?;
    info!("Saved workflow '{}' to {}", definition.name, path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::NodeKind;
    use std::io::Write;

    const POLL_YAML: &str = r#"
name: poll-pipeline
start: start_pipeline
timeout_secs: 600
nodes:
  - id: start_pipeline
    type: task
    action: { op: start_pipeline, pipeline: backend }
    result: { merge: $.pipeline }
    next: wait
    catch:
      - errors: [all]
        result_path: $.error
        next: failed

  - id: wait
    type: wait
    seconds: 300
    next: status

  - id: status
    type: task
    action: { op: pipeline_status, pipeline: backend, execution_id: $.pipeline.execution_id }
    result: { merge: $.pipeline_status }
    next: check
    catch:
      - errors: [task_failed]
        next: failed

  - id: check
    type: choice
    branches:
      - when: { string_equals: { path: $.pipeline_status.status, value: InProgress } }
        next: wait
      - when: { string_equals: { path: $.pipeline_status.status, value: Succeeded } }
        next: done
    otherwise: failed

  - id: done
    type: succeed

  - id: failed
    type: fail
    error: PipelineFailed
"#;

    #[test]
    fn test_parse_yaml_definition() {
        let def = parse_definition(POLL_YAML).unwrap();
        assert_eq!(def.name, "poll-pipeline");
        assert_eq!(def.timeout_secs, Some(600));
        assert_eq!(def.len(), 6);
        assert!(matches!(def.node("wait").unwrap().kind, NodeKind::Wait { seconds: 300, .. }));

        let status = def.node("status").unwrap();
        assert_eq!(status.catch_clauses().len(), 1);
        assert!(status.catch_clauses()[0].result_path.is_none());
    }

    #[test]
    fn test_load_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poll.yaml");
        let mut file = fs::File::create(&path).unwrap();
        write!(file, "{}", POLL_YAML).unwrap();

        let def = load_definition(&path).unwrap();
        assert_eq!(def.start, "start_pipeline");
    }

    #[test]
    fn test_save_and_load_json() {
        let def = parse_definition(POLL_YAML).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poll.json");

        save_definition(&def, &path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.trim_start().starts_with('{'));

        let loaded = load_definition(&path).unwrap();
        assert_eq!(loaded, def);
    }

    #[test]
    fn test_invalid_reference_rejected() {
        let yaml = POLL_YAML.replace("otherwise: failed", "otherwise: nowhere");
        let err = parse_definition(&yaml).unwrap_err();
        assert!(matches!(err, EngineError::InvalidDefinition(_)));
        assert!(err.to_string().contains("nowhere"));
    }

    #[test]
    fn test_malformed_yaml() {
        assert!(matches!(
            parse_definition("name: [unclosed"),
            Err(EngineError::Yaml(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            load_definition("/nonexistent/workflow.yaml"),
            Err(EngineError::Io(_))
        ));
    }
}
