use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use taskloom_core::policy::RoutingEngine;
use taskloom_core::ports::{IdGenerator, SystemClock, UlidGenerator};
use taskloom_core::{Broker, BrokerConfig, Role, TaskSubmission};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "taskloom", about = "Task broker with leases, retries and a dead-letter queue")]
struct Cli {
    /// Path to the TOML config file. Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate the config, then print it
    CheckConfig,
    /// Validate a task submission and print where it would be routed
    Route {
        /// JSON file holding one task submission
        #[arg(long)]
        task: PathBuf,
    },
    /// Run the broker until Ctrl-C
    Serve {
        /// JSON file holding an array of task submissions to create at start-up
        #[arg(long)]
        tasks: Option<PathBuf>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<BrokerConfig> {
    match path {
        Some(path) => BrokerConfig::load(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(BrokerConfig::default()),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::CheckConfig => print_json(&config),
        Commands::Route { task } => {
            let submission: TaskSubmission = read_json(&task)?;
            let new = submission.validate(&config.template, config.task_defaults())?;
            let ids = UlidGenerator::new(Arc::new(SystemClock));
            let routing = RoutingEngine::new(config.routing).route(&new, ids.trace_id());
            print_json(&routing)
        }
        Commands::Serve { tasks } => serve(config, tasks.as_deref()).await,
    }
}

async fn serve(config: BrokerConfig, tasks: Option<&Path>) -> anyhow::Result<()> {
    let broker = Broker::new(config);

    let agents = broker.register_configured_agents().await?;
    info!(agents = agents.len(), "configured agents registered");

    if let Some(path) = tasks {
        let submissions: Vec<TaskSubmission> = read_json(path)?;
        for submission in submissions {
            match broker.create_task(Role::Submitter, submission).await {
                Ok(created) => info!(
                    task_id = %created.task_id,
                    task_code = %created.task_code,
                    "seed task created"
                ),
                Err(e) => warn!(error = %e, reason_code = %e.reason_code(), "seed task rejected"),
            }
        }
    }

    let reaper = broker.spawn_reaper();
    info!(
        sweep_interval_secs = broker.config().lease.sweep_interval_secs,
        "broker running, Ctrl-C to stop"
    );
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;

    info!("shutting down");
    reaper.shutdown_and_join().await;
    let counts = broker.workflow_status(Role::Auditor).await?;
    print_json(&counts)
}
