use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cadence_core::auth::Caller;
use cadence_core::config::{AppConfig, JobStoreKind};
use cadence_core::event::EventBus;
use cadence_core::traits::JobStore;
use cadence_core::types::{RunEvent, ScheduleSpec};

use cadence_engine::{stream, RunRequest, WorkflowRunner};
use cadence_gateway::GatewayServer;
use cadence_scheduler::{
    install_system_job, spawn_job_log, Guard, Scheduler, SystemWorkflowSource, Trigger,
};
use cadence_store::{science_research_graph, InMemoryJobStore, SqliteStore};

#[derive(Parser)]
#[command(name = "cadence", version, about = "Workflow runs and scheduled jobs over agent graphs")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "cadence.toml", env = "CADENCE_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway and the job scheduler
    Serve,
    /// Run one workflow to completion and print the result
    Run {
        #[arg(long)]
        workflow: String,
        /// Identity the run is made as; must own the workflow
        #[arg(long)]
        owner: String,
        #[arg(long, default_value = "")]
        input: String,
        /// Print each run event as an NDJSON line instead of the result
        #[arg(long)]
        stream: bool,
    },
    /// Store the sample research workflow for an owner
    Seed {
        #[arg(long)]
        owner: String,
    },
    /// Show the next fire times of a 5-field cron expression
    CronPreview {
        expression: String,
        #[arg(long, default_value_t = 5)]
        count: usize,
    },
    /// Show current configuration
    Config,
}

/// Everything a command needs, wired from config.
struct Runtime {
    store: Arc<SqliteStore>,
    scheduler: Arc<Scheduler>,
    guard: Arc<Guard>,
}

fn build_runtime(config: &AppConfig) -> anyhow::Result<Runtime> {
    let db_path = config.database_path();
    let store = Arc::new(SqliteStore::open(&db_path)?);
    info!(path = %db_path.display(), "Storage opened");

    let capability = cadence_llm::create_capability(&config.capability)?;
    let source = Arc::new(SystemWorkflowSource::new(store.clone()));
    let runner = Arc::new(WorkflowRunner::new(
        source,
        store.clone(),
        capability,
        config.engine.ambiguity,
    ));

    let jobs: Arc<dyn JobStore> = match config.scheduler.store {
        JobStoreKind::Memory => Arc::new(InMemoryJobStore::new()),
        JobStoreKind::Sqlite => store.clone(),
    };
    let scheduler = Arc::new(Scheduler::new(
        jobs,
        runner,
        Arc::new(EventBus::default()),
        config.scheduler.misfire_grace_secs,
    ));
    let guard = Arc::new(Guard::new(scheduler.clone()));

    Ok(Runtime {
        store,
        scheduler,
        guard,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cadence=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config = AppConfig::load_or_default(&cli.config)?;
    if !cli.config.exists() {
        info!(path = %cli.config.display(), "No config file, using defaults");
    }

    match cli.command {
        Commands::CronPreview { expression, count } => {
            cron_preview(&expression, count)?;
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Seed { owner } => {
            let runtime = build_runtime(&config)?;
            let workflow_id = uuid::Uuid::new_v4().to_string();
            let graph = science_research_graph(&workflow_id, &owner);
            runtime.store.insert_graph(&graph)?;
            println!("Seeded '{}' as {}", graph.workflow.name, workflow_id);
            println!(
                "Try: cadence run --workflow {} --owner {} --input \"black holes\"",
                workflow_id, owner
            );
        }
        Commands::Run {
            workflow,
            owner,
            input,
            stream: streamed,
        } => {
            let runtime = build_runtime(&config)?;
            let caller = Caller::new(owner.clone());
            let request = RunRequest {
                workflow_id: workflow,
                owner_id: owner,
                input,
            };
            if streamed {
                let mut rx = runtime.guard.run_streamed(&caller, request).await?;
                while let Some(event) = rx.recv().await {
                    print!("{}", stream::encode(&event)?);
                    if let RunEvent::Error { content } = &event {
                        anyhow::bail!("run failed: {}", content);
                    }
                    if event.is_terminal() {
                        break;
                    }
                }
            } else {
                let result = runtime.guard.run(&caller, request).await?;
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
        }
        Commands::Serve => {
            let runtime = build_runtime(&config)?;
            let cancel = tokio_util::sync::CancellationToken::new();
            let cancel_clone = cancel.clone();

            // Graceful shutdown on Ctrl-C
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutting down...");
                cancel_clone.cancel();
            });

            let job_log = spawn_job_log(runtime.scheduler.subscribe(), cancel.clone());

            if config.scheduler.system_job {
                install_system_job(&runtime.scheduler).await?;
            } else {
                warn!("System job disabled by config");
            }

            let scheduler = runtime.scheduler.clone();
            let scheduler_cancel = cancel.clone();
            let scheduler_handle = tokio::spawn(async move {
                scheduler.run(scheduler_cancel).await;
            });
            info!("Job scheduler started");

            let gateway_config = config.gateway.clone().unwrap_or_default();
            let server = GatewayServer::new(gateway_config, runtime.guard.clone());
            let served = server.run(cancel.clone()).await;

            // Stop the scheduler whether the gateway exited cleanly or not
            cancel.cancel();
            scheduler_handle.await.ok();
            job_log.await.ok();
            served?;
        }
    }

    Ok(())
}

fn cron_preview(expression: &str, count: usize) -> anyhow::Result<()> {
    let trigger = Trigger::from_spec(&ScheduleSpec::Cron {
        expression: expression.to_string(),
    })?;
    for fire in trigger.upcoming(Utc::now(), count) {
        println!("{}", fire.to_rfc3339());
    }
    Ok(())
}
