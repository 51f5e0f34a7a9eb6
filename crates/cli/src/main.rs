//! `stepwise` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`    — start the HTTP control surface.
//! - `migrate`  — run pending database migrations.
//! - `validate` — validate a graph definition JSON file.
//! - `run`      — execute a graph once, in-process, and print the outcome.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use capabilities::builtin::{register_builtins, Echo};
use capabilities::CapabilityRegistry;
use engine::{ExecutorConfig, GraphDefinition, RunStatus, StateGraph, StepKind, WorkflowEngine};

#[derive(Parser)]
#[command(name = "stepwise", about = "Durable workflow orchestration engine", version)]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(clap::Args)]
struct Timeouts {
    /// Invocation timeout for Task steps that set none.
    #[arg(long, default_value_t = 300)]
    default_task_timeout_secs: u64,
    /// Run budget when neither the request nor the graph sets one.
    #[arg(long, default_value_t = 600)]
    default_run_timeout_secs: u64,
    /// How long a finishing run waits for its checkpoints to be written.
    #[arg(long, default_value_t = 10)]
    checkpoint_flush_secs: u64,
    /// How long finished runs stay in memory before reads go to Postgres.
    #[arg(long, env = "STEPWISE_RUN_RETENTION_SECS", default_value_t = 3600)]
    run_retention_secs: u64,
}

impl Timeouts {
    fn config(&self) -> ExecutorConfig {
        ExecutorConfig {
            default_task_timeout: Duration::from_secs(self.default_task_timeout_secs),
            default_run_timeout: Duration::from_secs(self.default_run_timeout_secs),
            checkpoint_flush_timeout: Duration::from_secs(self.checkpoint_flush_secs),
            finished_run_retention: Duration::from_secs(self.run_retention_secs),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Start the REST API server.
    Serve {
        #[arg(long, env = "STEPWISE_BIND", default_value = "0.0.0.0:8080")]
        bind: SocketAddr,
        /// Persist checkpoints and context in Postgres. In-memory when absent.
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
        /// Register every `*.json` graph definition in this directory.
        #[arg(long)]
        graphs_dir: Option<PathBuf>,
        #[command(flatten)]
        timeouts: Timeouts,
    },
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Validate a graph definition JSON file.
    Validate {
        /// Path to the graph JSON file.
        path: PathBuf,
    },
    /// Execute a graph once with the built-in capabilities.
    Run {
        /// Path to the graph JSON file.
        path: PathBuf,
        /// Initial data document.
        #[arg(long, default_value = "{}")]
        input: String,
        /// Overall run budget in seconds.
        #[arg(long)]
        deadline_secs: Option<u64>,
        /// Bind capabilities that are not built in to `echo`.
        #[arg(long)]
        stub_missing: bool,
        #[command(flatten)]
        timeouts: Timeouts,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("stepwise=info,engine=info,api=info,db=info,warn"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Serve { bind, database_url, graphs_dir, timeouts } => {
            serve(bind, database_url, graphs_dir, timeouts.config()).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Migrate { database_url } => {
            let pool = db::pool::create_pool(&database_url, 2).await?;
            db::pool::run_migrations(&pool).await?;
            info!("migrations applied");
            Ok(ExitCode::SUCCESS)
        }
        Command::Validate { path } => {
            let definition = read_definition(&path)?;
            match StateGraph::build(definition) {
                Ok(graph) => {
                    println!("{} is valid. Steps in reachability order:", graph.name());
                    for name in graph.reachability_order() {
                        let marker = if graph.is_terminal(name) { " (terminal)" } else { "" };
                        println!("  {name}{marker}");
                    }
                    let capabilities: Vec<&str> = graph.capabilities().into_iter().collect();
                    println!("Capabilities: {}", capabilities.join(", "));
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    eprintln!("{}: {e}", path.display());
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Run { path, input, deadline_secs, stub_missing, timeouts } => {
            let input: Value = serde_json::from_str(&input).context("--input is not valid JSON")?;
            let definition = read_definition(&path)?;
            run_once(definition, input, deadline_secs.map(Duration::from_secs), stub_missing, timeouts.config())
                .await
        }
    }
}

fn read_definition(path: &Path) -> Result<GraphDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("{} is not a graph definition", path.display()))
}

async fn serve(
    bind: SocketAddr,
    database_url: Option<String>,
    graphs_dir: Option<PathBuf>,
    config: ExecutorConfig,
) -> Result<()> {
    let mut registry = CapabilityRegistry::new();
    register_builtins(&mut registry);
    let mut engine = WorkflowEngine::new(registry).with_config(config);

    if let Some(url) = database_url {
        let pool = db::pool::create_pool(&url, 10).await?;
        db::pool::run_migrations(&pool).await?;

        let interrupted = db::repository::runs::list_unfinished(&pool).await?;
        for run in &interrupted {
            warn!(run_id = %run.run_id, graph = %run.graph, step = %run.current_step, "run was interrupted by a previous shutdown");
        }

        engine = engine
            .with_checkpointer(Arc::new(db::PgCheckpointer::new(pool.clone())))
            .with_context_store(Arc::new(db::PgContextStore::new(pool)));
    } else {
        info!("no database configured; runs and context are in-memory only");
    }

    if let Some(dir) = graphs_dir {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&dir)
            .with_context(|| format!("cannot read {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        entries.sort();
        for path in entries {
            let definition = read_definition(&path)?;
            engine
                .register_graph(definition)
                .with_context(|| format!("{} was rejected", path.display()))?;
        }
    }

    api::serve(bind, api::AppState::new(Arc::new(engine))).await?;
    Ok(())
}

async fn run_once(
    definition: GraphDefinition,
    input: Value,
    deadline: Option<Duration>,
    stub_missing: bool,
    config: ExecutorConfig,
) -> Result<ExitCode> {
    let mut registry = CapabilityRegistry::new();
    register_builtins(&mut registry);
    if stub_missing {
        for step in &definition.steps {
            if let StepKind::Task { capability, .. } = &step.kind {
                if !registry.contains(capability) {
                    warn!(capability = %capability, "stubbing capability with echo");
                    registry.register(capability.clone(), Arc::new(Echo));
                }
            }
        }
    }

    let engine = WorkflowEngine::new(registry).with_config(config);
    let name = engine.register_graph(definition)?.name().to_owned();
    let run_id = engine.start(&name, input, deadline)?;
    let summary = engine.wait(run_id).await?;
    let history = engine.history(run_id).await?;

    println!("{}", serde_json::to_string_pretty(&json!({ "summary": summary, "history": history }))?);
    Ok(if summary.status == RunStatus::Succeeded { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
