//! userflow - run the user registry pipeline.
//!
//! Usage:
//!   userflow run [--config FILE]       Run the pipeline once
//!   userflow validate [--config FILE]  Validate the configuration and graph
//!   userflow graph [--config FILE]     Print the graph in execution order

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use userflow::core::dag::NodeKind;
use userflow::pipeline::{HttpRecordSource, RestProxyPublisher};
use userflow::{
    ContextStore, Dag, DagExecutor, Event, EventBus, EventHandler, PipelineConfig, RunOutcome,
    TaskContext, TaskId, YamlLoader, build_user_registry,
};

/// userflow - fetch, route and stream user records
#[derive(Parser)]
#[command(name = "userflow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline once
    Run {
        /// Path to the pipeline YAML file (defaults apply when omitted)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Maximum concurrent task attempts (overrides the config)
        #[arg(short = 't', long)]
        max_tasks: Option<usize>,
    },

    /// Validate the configuration and the graph without running
    Validate {
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Print the graph in execution order
    Graph {
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

/// Logs run and task events.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::RunStarted { dag_id, run_id, .. } => {
                info!("Run of '{}' started (run: {})", dag_id, run_id);
            }
            Event::RunCompleted {
                dag_id,
                run_id,
                success,
                duration,
                ..
            } => {
                if *success {
                    info!(
                        "Run of '{}' succeeded in {:?} (run: {})",
                        dag_id, duration, run_id
                    );
                } else {
                    error!(
                        "Run of '{}' failed after {:?} (run: {})",
                        dag_id, duration, run_id
                    );
                }
            }
            Event::TaskStarted { task_id, .. } => {
                info!("  Task '{}' started", task_id);
            }
            Event::TaskCompleted {
                task_id, duration, ..
            } => {
                info!("  Task '{}' succeeded in {:?}", task_id, duration);
            }
            Event::TaskRetrying {
                task_id,
                attempt,
                max_attempts,
                delay,
                ..
            } => {
                warn!(
                    "  Task '{}' attempt {}/{} failed, retrying in {:?}",
                    task_id, attempt, max_attempts, delay
                );
            }
            Event::TaskFailed {
                task_id,
                error,
                attempts,
                ..
            } => {
                warn!(
                    "  Task '{}' failed after {} attempt(s): {}",
                    task_id, attempts, error
                );
            }
            Event::TaskSkipped { task_id, .. } => {
                info!("  Task '{}' skipped", task_id);
            }
            Event::BranchSelected {
                task_id, selected, ..
            } => {
                info!("  Branch '{}' selected '{}'", task_id, selected);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, max_tasks } => {
            let outcome = run_pipeline(config.as_deref(), max_tasks).await?;
            if outcome == RunOutcome::Failure {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Validate { config } => {
            validate_pipeline(config.as_deref())?;
        }
        Commands::Graph { config } => {
            print_graph(config.as_deref())?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            YamlLoader::load(path)?
        }
        None => PipelineConfig::default(),
    };
    Ok(config)
}

fn build_dag(config: &PipelineConfig) -> Result<Dag, Box<dyn std::error::Error>> {
    let source = HttpRecordSource::new(&config.source)?;
    let publisher = RestProxyPublisher::new(&config.broker);
    Ok(build_user_registry(
        config,
        Arc::new(source),
        Arc::new(publisher),
    )?)
}

/// Run the pipeline once.
async fn run_pipeline(
    path: Option<&Path>,
    max_tasks: Option<usize>,
) -> Result<RunOutcome, Box<dyn std::error::Error>> {
    let config = load_config(path)?;
    let dag = build_dag(&config)?;

    let event_bus = EventBus::new();
    event_bus.register(Arc::new(LoggingHandler)).await;

    let executor = DagExecutor::with_concurrency(max_tasks.unwrap_or(config.max_concurrent_tasks));
    let mut ctx = TaskContext::new(ContextStore::new(), TaskId::new("run"));

    info!(
        "Running '{}' ({} tasks, publishing to '{}' at {})",
        dag.id(),
        dag.len(),
        config.broker.topic,
        config.broker.url
    );
    let result = executor
        .execute_with_events(&dag, &mut ctx, Some(Arc::new(event_bus)))
        .await;

    if let Some(summary) = result.failure_summary() {
        for line in summary.lines() {
            error!("{}", line);
        }
    }
    info!(
        "Finished with {}: {} succeeded, {} skipped, {} failed",
        result.outcome,
        result.completed_count(),
        result.skipped_count(),
        result.failed_count()
    );

    Ok(result.outcome)
}

/// Validate the configuration and the graph without running.
fn validate_pipeline(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match load_config(path).and_then(|config| build_dag(&config)) {
        Ok(dag) => {
            info!("'{}' is valid: {} task(s)", dag.id(), dag.len());
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e)
        }
    }
}

/// Print the graph in execution order.
fn print_graph(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(path)?;
    let dag = build_dag(&config)?;

    println!("{} ({})", dag.id(), dag.name());
    println!("{}", "-".repeat(60));

    for id in dag.topological_sort()? {
        let Some(node) = dag.get_task(&id) else {
            continue;
        };
        let deps = dag
            .get_dependencies(&id)
            .map(|deps| {
                deps.iter()
                    .map(TaskId::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();

        println!("{:<26} {:?}", id, node.condition);
        if !deps.is_empty() {
            println!("    after:    {}", deps);
        }
        if let NodeKind::Branch(branch) = &node.kind {
            let successors: Vec<&str> = branch.successors.iter().map(TaskId::as_str).collect();
            println!("    branches: {}", successors.join(", "));
            println!("    fallback: {}", branch.fallback);
        }
        if let Some(pause) = node.min_duration() {
            println!("    paced:    {:?}", pause);
        }
    }

    Ok(())
}
