use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use murmur_core::{EventBus, EventBusViewport, FleetConfig, FleetEvent};
use murmur_memory::{KnowledgeSidecar, KnowledgeSidecarConfig};
use murmur_observability::{init_logging, ProcessKind};
use murmur_orchestrator::{Fleet, FleetDeps, GraphState, SubmitResult};
use murmur_runtime::RuntimeRegistry;
use murmur_types::{AgentProfile, TaskGraph};

#[derive(Parser, Debug)]
#[command(name = "murmur-engine")]
#[command(about = "Headless murmur agent-fleet orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a task graph with a fleet of runtime-backed agents
    Run {
        /// Task graph JSON file
        #[arg(long)]
        graph: PathBuf,
        /// Runtime catalog (runtimes.json)
        #[arg(long, env = "MURMUR_RUNTIMES")]
        runtimes: PathBuf,
        /// Agent profiles JSON file (list of profiles)
        #[arg(long)]
        agents: PathBuf,
        /// Fleet configuration JSON; defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,
        /// Knowledge sidecar executable
        #[arg(long, env = "MURMUR_SIDECAR", default_value = "memory-sidecar")]
        sidecar: String,
        /// Directory for rolling log files; stderr-only when omitted
        #[arg(long, env = "MURMUR_LOGS_DIR")]
        logs_dir: Option<PathBuf>,
    },
    /// Validate a task graph file without dispatching anything
    Validate {
        #[arg(long)]
        graph: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            graph,
            runtimes,
            agents,
            config,
            sidecar,
            logs_dir,
        } => {
            let _guard = init_logging(ProcessKind::Engine, logs_dir.as_deref())?;
            run(graph, runtimes, agents, config, sidecar).await
        }
        Command::Validate { graph } => validate(graph),
    }
}

async fn run(
    graph_path: PathBuf,
    runtimes_path: PathBuf,
    agents_path: PathBuf,
    config_path: Option<PathBuf>,
    sidecar_executable: String,
) -> anyhow::Result<()> {
    let graph = read_graph(&graph_path)?;
    let registry = RuntimeRegistry::load(&runtimes_path)
        .with_context(|| format!("loading runtime catalog {}", runtimes_path.display()))?;
    let profiles: Vec<AgentProfile> = serde_json::from_str(
        &std::fs::read_to_string(&agents_path)
            .with_context(|| format!("reading {}", agents_path.display()))?,
    )
    .context("parsing agent profiles")?;
    let config = match config_path {
        Some(path) => FleetConfig::load(&path)
            .map_err(|e| anyhow::anyhow!("loading {}: {e}", path.display()))?,
        None => FleetConfig::default(),
    };

    let events = EventBus::new();
    let viewport = Arc::new(EventBusViewport::new(events.clone()));
    let mut event_rx = events.subscribe();

    let fleet = Fleet::spawn(
        config,
        FleetDeps {
            factory: Arc::new(registry),
            sidecar: KnowledgeSidecar::new(KnowledgeSidecarConfig {
                executable: sidecar_executable,
                ..KnowledgeSidecarConfig::default()
            }),
            viewport,
            events,
            approver_tx: None,
        },
    );

    for profile in profiles {
        let agent_id = profile.id.clone();
        fleet
            .supervisor
            .spawn_agent(profile)
            .await
            .map_err(|e| anyhow::anyhow!("spawning agent {agent_id}: {e}"))?;
    }

    let graph_id = match fleet
        .orchestrator
        .submit(graph)
        .await
        .map_err(|e| anyhow::anyhow!("submitting graph: {e}"))?
    {
        SubmitResult::Accepted {
            graph_id,
            node_count,
            edge_count,
        } => {
            tracing::info!("graph {graph_id} accepted: {node_count} nodes, {edge_count} edges");
            graph_id
        }
        SubmitResult::Rejected { reason } => {
            anyhow::bail!("graph rejected: {reason}");
        }
    };

    // The fleet's own bus is the engine's progress feed; the run ends when
    // the graph announces completion.
    loop {
        match event_rx.recv().await {
            Ok(FleetEvent::TaskGraphCompleted {
                graph_id: completed_id,
                results,
                ..
            }) if completed_id == graph_id => {
                println!("{}", serde_json::to_string_pretty(&results)?);
                let failed = results.values().filter(|ok| !**ok).count();
                if failed > 0 {
                    tracing::warn!("{failed} task(s) did not complete successfully");
                }
                return Ok(());
            }
            Ok(FleetEvent::TaskNodeStatusChanged {
                task_id, status, ..
            }) => {
                tracing::info!("task {task_id} -> {status:?}");
            }
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("event feed lagged by {skipped} events");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                anyhow::bail!("event bus closed before the graph completed");
            }
        }
    }
}

fn validate(graph_path: PathBuf) -> anyhow::Result<()> {
    let graph = read_graph(&graph_path)?;
    match GraphState::build(graph) {
        Ok((state, dropped_edges)) => {
            println!(
                "ok: {} nodes, {} edges{}",
                state.node_count(),
                state.edge_count(),
                if dropped_edges > 0 {
                    format!(" ({dropped_edges} unknown-endpoint edge(s) dropped)")
                } else {
                    String::new()
                }
            );
            Ok(())
        }
        Err(reason) => anyhow::bail!("invalid graph: {reason}"),
    }
}

fn read_graph(path: &PathBuf) -> anyhow::Result<TaskGraph> {
    serde_json::from_str(
        &std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?,
    )
    .with_context(|| format!("parsing task graph {}", path.display()))
}
