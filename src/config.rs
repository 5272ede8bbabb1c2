//! Orchestrator Configuration
//!
//! Names, timings and payloads of the built-in workflows, loaded from YAML.
//! Every field has a default, so a config file only lists what differs.
//!
//! # Placeholders
//!
//! Strings may contain `{tier}`, `{app}` and `{topic}` (also spelled
//! `{SNSTopicName}`). [`OrchestratorConfig::rendered`] substitutes them in
//! every name and payload.
//!
//! # Example
//!
//! ```yaml
//! tier: int
//! app_name: fact
//! waits:
//!   pipeline_poll_secs: 120
//! cleanup_payloads:
//!   app_stacks:
//!     deleteInSequence:
//!       - deleteInParallel: ["{app}-frontend-{tier}", "{app}-api-{tier}"]
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::execution::error::EngineError;
use crate::services::FindingsFilter;

/// Wait durations used by the built-in workflows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitSettings {
    /// Pause between a delete request and the next describe
    pub after_delete_secs: u64,
    /// Poll interval while a stack is in a transitional state
    pub status_poll_secs: u64,
    /// Pause before retrying a failed post-deployment step
    pub step_retry_secs: u64,
    /// Poll interval while a pipeline is running
    pub pipeline_poll_secs: u64,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            after_delete_secs: 10,
            status_poll_secs: 15,
            step_retry_secs: 60,
            pipeline_poll_secs: 300,
        }
    }
}

/// Retry ceilings of the post-deployment workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryLimits {
    pub inner_ceiling: u32,
    pub outer_ceiling: u32,
}

impl Default for RetryLimits {
    fn default() -> Self {
        Self {
            inner_ceiling: 3,
            outer_ceiling: 2,
        }
    }
}

/// Compute functions called by the built-in workflows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionNames {
    pub db_admin_setup: String,
    pub schema_init: String,
    pub data_load_initial: String,
    pub data_load_more: String,
    pub bucket_wipe: String,
    pub orphan_cleanup: String,
}

impl Default for FunctionNames {
    fn default() -> Self {
        Self {
            db_admin_setup: "{app}-{tier}-db-admin-setup".into(),
            schema_init: "{app}-{tier}-schema-table-init".into(),
            data_load_initial: "{app}-{tier}-data-loader-initial".into(),
            data_load_more: "{app}-{tier}-data-loader-more".into(),
            bucket_wipe: "{app}-{tier}-wipeout-bucket".into(),
            orphan_cleanup: "{app}-{tier}-cleanup-orphan-resources".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineNames {
    pub backend: String,
    pub frontend: String,
}

impl Default for PipelineNames {
    fn default() -> Self {
        Self {
            backend: "{app}-backend-pipeline-{tier}".into(),
            frontend: "{app}-frontend-pipeline-{tier}".into(),
        }
    }
}

/// Deletion lists handed to `delete-stacks-in-sequence` by the cleanup dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupPayloads {
    pub failed_stacks: Value,
    pub stateless_stacks: Value,
    pub app_stacks: Value,
    pub all_except_pipelines: Value,
    pub everything: Value,
}

impl Default for CleanupPayloads {
    fn default() -> Self {
        let stateless = json!({"deleteInParallel": [
            "{app}-frontend-{tier}",
            "{app}-backend-api-{tier}",
            "{app}-backend-workers-{tier}"
        ]});
        let stateful = json!({"deleteInParallel": [
            "{app}-database-{tier}",
            "{app}-storage-{tier}"
        ]});
        let shared = json!({"deleteInParallel": [
            "{app}-vpc-{tier}",
            "{app}-devops-{tier}"
        ]});
        let pipelines = json!({"deleteInParallel": [
            "{app}-backend-pipeline-{tier}",
            "{app}-frontend-pipeline-{tier}"
        ]});

        Self {
            failed_stacks: json!({"deleteInSequence": [
                "{app}-frontend-{tier}",
                "{app}-backend-api-{tier}",
                "{app}-backend-workers-{tier}",
                "{app}-database-{tier}"
            ]}),
            stateless_stacks: json!({"deleteInSequence": [stateless.clone()]}),
            app_stacks: json!({"deleteInSequence": [stateless.clone(), stateful.clone()]}),
            all_except_pipelines: json!({"deleteInSequence": [
                stateless.clone(),
                stateful.clone(),
                shared.clone()
            ]}),
            everything: json!({"deleteInSequence": [stateless, stateful, shared, pipelines]}),
        }
    }
}

/// Inputs handed to the post-deployment workflow by the 1-click pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostDeployPayloads {
    pub default: Value,
    pub wipe_clean_db: Value,
}

impl Default for PostDeployPayloads {
    fn default() -> Self {
        Self {
            default: json!({"tier": "{tier}"}),
            wipe_clean_db: json!({"tier": "{tier}", "run-rds-init": true}),
        }
    }
}

/// Security gate of the 1-click pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FindingsSettings {
    pub resource_prefix: String,
    pub severities: Vec<String>,
    pub record_state: String,
    pub max_results: usize,
}

impl Default for FindingsSettings {
    fn default() -> Self {
        Self {
            resource_prefix: "{app}".into(),
            severities: vec!["CRITICAL".into(), "HIGH".into()],
            record_state: "ACTIVE".into(),
            max_results: 10,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub tier: String,
    pub app_name: String,
    pub notification_topic: String,
    /// Wall-clock budget of every run
    pub timeout_secs: u64,
    /// Parallel fan-out cap
    pub max_concurrency: usize,
    pub waits: WaitSettings,
    pub retry: RetryLimits,
    pub functions: FunctionNames,
    pub pipelines: PipelineNames,
    pub frontend_bucket_pattern: String,
    pub cleanup_payloads: CleanupPayloads,
    pub post_deploy_payloads: PostDeployPayloads,
    pub findings: FindingsSettings,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tier: "dev".into(),
            app_name: "myapp".into(),
            notification_topic: "{app}-{tier}-orchestration-notifications".into(),
            timeout_secs: 3 * 60 * 60,
            max_concurrency: 9,
            waits: WaitSettings::default(),
            retry: RetryLimits::default(),
            functions: FunctionNames::default(),
            pipelines: PipelineNames::default(),
            frontend_bucket_pattern: "{app}-frontend-{tier}-frontendcloudfrontlogging.*".into(),
            cleanup_payloads: CleanupPayloads::default(),
            post_deploy_payloads: PostDeployPayloads::default(),
            findings: FindingsSettings::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Loads a YAML config file, validates it and renders placeholders.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config = Self::from_yaml(&content)?;
        info!(
            "Loaded configuration from {} (tier '{}', app '{}')",
            path.display(),
            config.tier,
            config.app_name
        );
        Ok(config)
    }

    /// Parses YAML text, validates it and renders placeholders.
    pub fn from_yaml(yaml: &str) -> Result<Self, EngineError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config.rendered())
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.tier.trim().is_empty() {
            return Err(EngineError::InvalidInput("config: tier must not be empty".into()));
        }
        if self.app_name.trim().is_empty() {
            return Err(EngineError::InvalidInput("config: app_name must not be empty".into()));
        }
        if self.max_concurrency == 0 {
            return Err(EngineError::InvalidInput(
                "config: max_concurrency must be at least 1".into(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(EngineError::InvalidInput("config: timeout_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Returns a copy with every placeholder substituted.
    pub fn rendered(&self) -> Self {
        let topic = self.substitute(&self.notification_topic, &self.notification_topic);
        let render = |s: &str| self.substitute(s, &topic);
        let render_value = |v: &Value| render_json(v, &render);

        Self {
            tier: self.tier.clone(),
            app_name: self.app_name.clone(),
            notification_topic: topic.clone(),
            timeout_secs: self.timeout_secs,
            max_concurrency: self.max_concurrency,
            waits: self.waits.clone(),
            retry: self.retry.clone(),
            functions: FunctionNames {
                db_admin_setup: render(&self.functions.db_admin_setup),
                schema_init: render(&self.functions.schema_init),
                data_load_initial: render(&self.functions.data_load_initial),
                data_load_more: render(&self.functions.data_load_more),
                bucket_wipe: render(&self.functions.bucket_wipe),
                orphan_cleanup: render(&self.functions.orphan_cleanup),
            },
            pipelines: PipelineNames {
                backend: render(&self.pipelines.backend),
                frontend: render(&self.pipelines.frontend),
            },
            frontend_bucket_pattern: render(&self.frontend_bucket_pattern),
            cleanup_payloads: CleanupPayloads {
                failed_stacks: render_value(&self.cleanup_payloads.failed_stacks),
                stateless_stacks: render_value(&self.cleanup_payloads.stateless_stacks),
                app_stacks: render_value(&self.cleanup_payloads.app_stacks),
                all_except_pipelines: render_value(&self.cleanup_payloads.all_except_pipelines),
                everything: render_value(&self.cleanup_payloads.everything),
            },
            post_deploy_payloads: PostDeployPayloads {
                default: render_value(&self.post_deploy_payloads.default),
                wipe_clean_db: render_value(&self.post_deploy_payloads.wipe_clean_db),
            },
            findings: FindingsSettings {
                resource_prefix: render(&self.findings.resource_prefix),
                ..self.findings.clone()
            },
        }
    }

    /// The findings query of the 1-click security gate.
    pub fn findings_filter(&self) -> FindingsFilter {
        FindingsFilter {
            resource_prefix: self.findings.resource_prefix.clone(),
            severities: self.findings.severities.clone(),
            record_state: self.findings.record_state.clone(),
            max_results: self.findings.max_results,
        }
    }

    fn substitute(&self, text: &str, topic: &str) -> String {
        text.replace("{tier}", &self.tier)
            .replace("{app}", &self.app_name)
            .replace("{topic}", topic)
            .replace("{SNSTopicName}", topic)
    }
}

fn render_json(value: &Value, render: &impl Fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(render(s)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_json(v, render)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (render(k), render_json(v, render)))
                .collect(),
        ),
        other => other.clone(),
    }
}
