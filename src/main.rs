//! StackRunner CLI Entry Point
//!
//! Runs one workflow against the simulated backend and saves its record.
//!
//! # Usage
//!
//! ```bash
//! # List the built-in workflows
//! stackrunner --list
//!
//! # Run a built-in workflow
//! stackrunner cleanup-stacks --input '{"destroy-app-stacks-only": true}'
//!
//! # Run with a config file and input file
//! stackrunner one-click-end-to-end input.json --config orchestrator.yaml
//!
//! # Run a workflow from a definition file
//! stackrunner my-workflow.yaml
//!
//! # Print a built-in definition as YAML
//! stackrunner post-deployment --print
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use log::{error, info};
use serde_json::Value;

use stackrunner::execution::{EngineConfig, WorkflowEngine, WorkflowRegistry};
use stackrunner::services::{Services, SimulatedServices};
use stackrunner::workflow::state::DEFAULT_STATE_DIR;
use stackrunner::workflow::{load_definition, to_yaml, ExecutionRecord, ExecutionStatus};
use stackrunner::{workflows, OrchestratorConfig, APP_NAME, VERSION};

/// Command-line configuration parsed from arguments.
#[derive(Debug, Default)]
struct Config {
    workflow: Option<String>,
    config_path: Option<PathBuf>,
    input: Option<String>,
    input_file: Option<PathBuf>,
    state_dir: Option<PathBuf>,
    list: bool,
    print: bool,
    verbose: bool,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Deployment Orchestration Engine");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: stackrunner [OPTIONS] <WORKFLOW> [INPUT_FILE]");
    println!();
    println!("Arguments:");
    println!("  <WORKFLOW>          Built-in workflow name or path to a definition file");
    println!("  [INPUT_FILE]        JSON file holding the workflow input");
    println!();
    println!("Options:");
    println!("  --config PATH       Orchestrator config (YAML)");
    println!("  --input JSON        Workflow input as a JSON object (default: {{}})");
    println!("  --input-file PATH   Read the workflow input from a JSON file");
    println!("  --state-dir PATH    Where run records are saved (default: {})", DEFAULT_STATE_DIR);
    println!("  --list              List the built-in workflows");
    println!("  --print             Print the workflow definition as YAML and exit");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  stackrunner --list");
    println!("  stackrunner cleanup-stacks --input '{{\"cleanup-failed-stacks\": true}}'");
    println!("  stackrunner one-click-end-to-end --config orchestrator.yaml --verbose");
}

fn option_value(args: &[String], i: usize, option: &str) -> Result<String, String> {
    args.get(i)
        .cloned()
        .ok_or_else(|| format!("{} requires an argument", option))
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--list" => config.list = true,
            "--print" => config.print = true,
            "--verbose" | "-v" => config.verbose = true,
            "--config" => {
                i += 1;
                config.config_path = Some(PathBuf::from(option_value(args, i, arg)?));
            }
            "--input" => {
                i += 1;
                config.input = Some(option_value(args, i, arg)?);
            }
            "--input-file" => {
                i += 1;
                config.input_file = Some(PathBuf::from(option_value(args, i, arg)?));
            }
            "--state-dir" => {
                i += 1;
                config.state_dir = Some(PathBuf::from(option_value(args, i, arg)?));
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                if config.workflow.is_none() {
                    config.workflow = Some(arg.clone());
                } else if config.input_file.is_none() {
                    config.input_file = Some(PathBuf::from(arg));
                } else {
                    return Err(format!("Unexpected argument: {}", arg));
                }
            }
        }
        i += 1;
    }

    if config.input.is_some() && config.input_file.is_some() {
        return Err("--input and --input-file are mutually exclusive".to_string());
    }
    if config.workflow.is_none() && !config.list {
        return Err("no workflow given".to_string());
    }

    Ok(config)
}

fn load_config(path: Option<&Path>) -> Result<OrchestratorConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(OrchestratorConfig::load(path)?),
        None => {
            info!("No config file given, using defaults");
            Ok(OrchestratorConfig::default().rendered())
        }
    }
}

fn read_input(config: &Config) -> Result<Value, Box<dyn std::error::Error>> {
    let text = match (&config.input, &config.input_file) {
        (Some(json), _) => json.clone(),
        (None, Some(path)) => fs::read_to_string(path)
            .map_err(|e| format!("Could not read input file '{}': {}", path.display(), e))?,
        (None, None) => return Ok(Value::Object(Default::default())),
    };
    let input: Value = serde_json::from_str(&text).map_err(|e| format!("Invalid input JSON: {}", e))?;
    Ok(input)
}

/// A definition file is anything that exists on disk or carries a YAML/JSON extension.
fn is_definition_file(workflow: &str) -> bool {
    let path = Path::new(workflow);
    path.is_file()
        || matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml" | "yml" | "json")
        )
}

/// Registers the built-ins plus, when `workflow` is a file, the definition it holds.
/// Returns the name to run.
fn build_registry(
    workflow: &str,
    orchestrator: &OrchestratorConfig,
) -> Result<(WorkflowRegistry, String), Box<dyn std::error::Error>> {
    let mut registry = WorkflowRegistry::new();
    for definition in workflows::builtin_definitions(orchestrator)? {
        registry.register(definition)?;
    }

    let name = if is_definition_file(workflow) {
        let definition = load_definition(workflow).map_err(|e| {
            error!("Failed to load workflow: {}", e);
            format!("Could not load workflow from '{}': {}", workflow, e)
        })?;
        let name = definition.name.clone();
        registry.register(definition)?;
        name
    } else {
        workflow.to_string()
    };

    registry.verify()?;
    Ok((registry, name))
}

/// YAML text of a registered workflow, as printed by `--print`.
fn render_definition(registry: &WorkflowRegistry, name: &str) -> Result<String, Box<dyn std::error::Error>> {
    let definition = registry.get(name)?;
    Ok(to_yaml(definition.as_ref())?)
}

fn print_workflows(registry: &WorkflowRegistry) -> Result<(), Box<dyn std::error::Error>> {
    println!("Built-in workflows:");
    for name in registry.names() {
        let definition = registry.get(name)?;
        println!(
            "  {:32} {}",
            name.cyan(),
            definition.comment.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn print_record(record: &ExecutionRecord) {
    let status = match record.status {
        ExecutionStatus::Succeeded => record.status.to_string().green().bold(),
        ExecutionStatus::Running => record.status.to_string().yellow().bold(),
        ExecutionStatus::Failed | ExecutionStatus::TimedOut => record.status.to_string().red().bold(),
    };

    println!("{}", record.timeline.summary());
    println!("Workflow:  {}", record.workflow);
    println!("Execution: {}", record.execution_id);
    println!("Status:    {}", status);
    if let Some(err) = &record.error {
        println!("Error:     {}", err.to_string().red());
    }
}

/// Main application entry point.
fn run() -> Result<ExecutionStatus, Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);

    let orchestrator = load_config(config.config_path.as_deref())?;
    let workflow = config.workflow.clone().unwrap_or_default();
    let (registry, name) = build_registry(&workflow, &orchestrator)?;

    if config.list {
        print_workflows(&registry)?;
        return Ok(ExecutionStatus::Succeeded);
    }

    if config.print {
        print!("{}", render_definition(&registry, &name)?);
        return Ok(ExecutionStatus::Succeeded);
    }

    print_banner();
    info!(
        "Tier '{}', app '{}', notifications to '{}'",
        orchestrator.tier, orchestrator.app_name, orchestrator.notification_topic
    );

    let input = read_input(&config)?;
    let backend = Arc::new(SimulatedServices::new().with_topic(&orchestrator.notification_topic));
    let engine = WorkflowEngine::new(
        Arc::new(registry),
        Services::from_backend(backend.clone()),
        EngineConfig::from(&orchestrator),
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let record = runtime.block_on(engine.run(&name, input))?;

    print_record(&record);
    for notification in backend.notifications() {
        info!("Notification sent: {}", notification.subject);
    }

    let state_dir = config
        .state_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));
    let saved = record.save(&state_dir)?;
    info!("Run record saved to {}", saved.display());

    Ok(record.status)
}

fn main() -> ExitCode {
    match run() {
        Ok(ExecutionStatus::Succeeded) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
