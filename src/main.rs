use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;

use shipwright::config::PipelineConfig;
use shipwright::model::{ExecutionStatus, ProductItem};
use shipwright::orchestrator::{ItemSource, Orchestrator};
use shipwright::store::SqliteStore;

#[derive(Parser)]
#[command(name = "shipwright")]
#[command(version, about = "Dropshipping pipeline orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the pipeline database.
    #[arg(long, global = true, default_value = ".shipwright/pipeline.db")]
    pub db: PathBuf,

    /// Optional TOML config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List registered workflow templates
    Templates,
    /// Start an execution of a template over items from a JSON file
    Run {
        /// Template name, e.g. registration_only
        #[arg(short, long)]
        template: String,
        /// Path to a JSON array of items
        #[arg(short, long)]
        items: PathBuf,
        /// Inline JSON run config
        #[arg(long, default_value = "{}")]
        run_config: String,
        /// Print the execution id and exit without waiting. The run stops
        /// with the process; `recover` resumes it from its snapshot.
        #[arg(long)]
        detach: bool,
    },
    /// Show the status of an execution
    Status { execution_id: String },
    /// List executions
    List {
        /// Filter by status (pending, running, paused, completed, failed, cancelled)
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value = "20")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
    },
    /// Pause a running execution at the next stage boundary
    Pause { execution_id: String },
    /// Resume a paused execution
    Resume { execution_id: String },
    /// Cancel an execution
    Cancel { execution_id: String },
    /// Recover stale executions from their snapshots
    Recover {
        /// Recover a specific execution; omit to recover all candidates
        execution_id: Option<String>,
    },
    /// Show unacknowledged alerts
    Alerts {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Acknowledge an alert
    Ack {
        alert_id: String,
        #[arg(long, default_value = "cli")]
        by: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "shipwright=debug" } else { "shipwright=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    if let Some(parent) = cli.db.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    let store = Arc::new(SqliteStore::open(&cli.db)?);
    let orchestrator = Orchestrator::builder()
        .with_store(store)
        .with_config(config)
        .build()?;

    match cli.command {
        Commands::Templates => {
            for name in orchestrator.template_names() {
                println!("{}", name);
            }
        }
        Commands::Run {
            template,
            items,
            run_config,
            detach,
        } => {
            let raw = std::fs::read_to_string(&items)
                .with_context(|| format!("Failed to read items file {}", items.display()))?;
            let items: Vec<ProductItem> =
                serde_json::from_str(&raw).context("Items file must be a JSON array of items")?;
            let run_config =
                serde_json::from_str(&run_config).context("Invalid --run-config JSON")?;

            let execution_id =
                orchestrator.start(&template, ItemSource::Items(items), run_config)?;
            println!("{} {}", style("started").green().bold(), execution_id);

            if !detach {
                let execution = orchestrator
                    .wait_for_terminal(&execution_id, std::time::Duration::from_secs(3600))
                    .await?;
                print_execution(&execution);
            }
        }
        Commands::Status { execution_id } => {
            let view = orchestrator.status(&execution_id)?;
            print_execution(&view.execution);
            for step in &view.steps {
                println!(
                    "  [{}] {:<32} {:>4}/{:<4} ok={} failed={}",
                    step.status.as_str(),
                    step.name,
                    step.processed_items,
                    step.total_items,
                    step.succeeded_items,
                    step.failed_items,
                );
            }
            if !view.alerts.is_empty() {
                println!("{}", style("alerts:").yellow());
                for alert in &view.alerts {
                    println!("  [{}] {}", alert.severity.as_str(), alert.title);
                }
            }
        }
        Commands::List {
            status,
            limit,
            offset,
        } => {
            let status = status
                .map(|s| ExecutionStatus::parse(&s).map_err(|e| anyhow::anyhow!(e)))
                .transpose()?;
            for execution in orchestrator.list_executions(status, limit, offset)? {
                println!(
                    "{}  {:<12} {:<24} items {}/{}",
                    execution.workflow_id,
                    execution.status.as_str(),
                    execution.workflow_name,
                    execution.processed_items,
                    execution.total_items,
                );
            }
        }
        Commands::Pause { execution_id } => {
            orchestrator.pause(&execution_id)?;
            println!("{} {}", style("pause requested").yellow(), execution_id);
        }
        Commands::Resume { execution_id } => {
            orchestrator.resume(&execution_id)?;
            println!("{} {}", style("resume requested").green(), execution_id);
        }
        Commands::Cancel { execution_id } => {
            orchestrator.cancel(&execution_id)?;
            println!("{} {}", style("cancel requested").red(), execution_id);
        }
        Commands::Recover { execution_id } => match execution_id {
            Some(id) => {
                let recovered = orchestrator.recover(&id)?;
                println!(
                    "{}: {}",
                    id,
                    if recovered { "recovered" } else { "not recoverable" }
                );
            }
            None => {
                let candidates = orchestrator.load_recovery_candidates()?;
                if candidates.is_empty() {
                    println!("no recovery candidates");
                }
                for execution in candidates {
                    let recovered = orchestrator.recover(&execution.workflow_id)?;
                    println!(
                        "{}: {}",
                        execution.workflow_id,
                        if recovered { "recovered" } else { "skipped" }
                    );
                }
            }
        },
        Commands::Alerts { limit } => {
            for alert in orchestrator.unacknowledged_alerts(limit)? {
                println!(
                    "{}  [{}/{}] {}",
                    alert.id,
                    alert.kind.as_str(),
                    alert.severity.as_str(),
                    alert.title,
                );
            }
        }
        Commands::Ack { alert_id, by } => {
            orchestrator.acknowledge_alert(&alert_id, &by)?;
            println!("{} {}", style("acknowledged").green(), alert_id);
        }
    }

    Ok(())
}

fn print_execution(execution: &shipwright::model::Execution) {
    let status = match execution.status {
        ExecutionStatus::Completed => style(execution.status.as_str()).green(),
        ExecutionStatus::Failed | ExecutionStatus::Cancelled => {
            style(execution.status.as_str()).red()
        }
        _ => style(execution.status.as_str()).yellow(),
    };
    println!(
        "{} {} [{}] steps {}/{} items {}/{} ({} ok, {} failed)",
        execution.workflow_id,
        execution.workflow_name,
        status,
        execution.completed_steps,
        execution.total_steps,
        execution.processed_items,
        execution.total_items,
        execution.succeeded_items,
        execution.failed_items,
    );
}
