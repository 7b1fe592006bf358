mod config;

use clap::{Parser, Subcommand};
use conclave_agent::build_backend;
use conclave_memory::{FileStateBackend, PersistentMemory, StateBackend};
use conclave_orchestrator::ResearchSession;
use conclave_session::{analyze, EventStore, FileEventStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conclave", about = "Conclave: multi-agent research orchestration")]
struct Cli {
    /// Path to config file (default: ./conclave.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory for state and event logs (overrides config)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Human-readable logs instead of JSON
    #[arg(long)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a research query and print the synthesis
    Research {
        query: String,
        /// Write the message history and final state as JSON
        #[arg(long)]
        trace: Option<PathBuf>,
    },
    /// List checkpoints of a stored session
    Checkpoints { session: String },
    /// Summarize the event log of a session
    Analyze {
        session: String,
        /// Analyze a single agent's log only
        #[arg(long)]
        agent: Option<String>,
    },
    /// Delete all but the newest sessions
    Cleanup {
        /// Sessions to keep (overrides config)
        #[arg(long)]
        keep: Option<usize>,
    },
}

fn init_tracing(pretty: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if pretty {
        builder.init();
    } else {
        builder.json().init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.pretty);

    let mut config = config::load(cli.config.as_deref()).await?;
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }

    match cli.command {
        Commands::Research { query, trace } => {
            let backend = build_backend(&config.completion)?;
            let mut builder = ResearchSession::builder()
                .backend(backend)
                .config(config.orchestrator.clone());

            let memory = if config.storage.durable {
                let memory = Arc::new(PersistentMemory::in_dir(config.storage.state_dir()).await?);
                let events = Arc::new(FileEventStore::new(config.storage.logs_dir()).await?);
                builder = builder
                    .state(memory.clone())
                    .event_store(events)
                    .session_id(memory.session_id());
                Some(memory)
            } else {
                None
            };

            let session = builder.build()?;
            info!(session_id = %session.session_id(), "Session created");
            let report = session.run(&query).await?;
            println!("{}", report.synthesis.text);

            if let Some(memory) = &memory {
                let checkpoint = memory.checkpoint("final").await?;
                info!(session_id = %checkpoint.session_id, checkpoint = %checkpoint.name, "Checkpoint saved");
            }
            if let Some(path) = trace {
                let trace = session.export_trace().await?;
                tokio::fs::write(&path, serde_json::to_string_pretty(&trace)?).await?;
                info!(path = %path.display(), "Trace written");
            }

            let summary = serde_json::json!({
                "session_id": report.session_id,
                "complexity": report.complexity,
                "duration_ms": report.duration_ms,
                "monitor": session.monitor().to_json().await,
            });
            eprintln!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Checkpoints { session } => {
            let backend = FileStateBackend::new(config.storage.state_dir()).await?;
            let checkpoints = backend.list_checkpoints(&session).await?;
            if checkpoints.is_empty() {
                println!("No checkpoints for session {session}");
            }
            for checkpoint in checkpoints {
                println!("{}\t{}", checkpoint.name, checkpoint.timestamp.to_rfc3339());
            }
        }
        Commands::Analyze { session, agent } => {
            let store = FileEventStore::new(config.storage.logs_dir()).await?;
            let analysis = match agent {
                Some(agent) => {
                    let path = store.root().join(&session).join(format!("{agent}.jsonl"));
                    FileEventStore::analyze_file(&path).await?
                }
                None => analyze(&store.read_session(&session).await?),
            };
            println!("{}", serde_json::to_string_pretty(&analysis)?);
        }
        Commands::Cleanup { keep } => {
            let keep = keep.unwrap_or(config.storage.keep_sessions);
            let backend = Arc::new(FileStateBackend::new(config.storage.state_dir()).await?);
            // A fresh handle owns no partition, so every stored session is eligible.
            let removed_state = PersistentMemory::new(backend).cleanup_old_sessions(keep).await?;
            let events = FileEventStore::new(config.storage.logs_dir()).await?;
            let removed_logs = events.cleanup_old_sessions(keep).await?;
            info!(keep, removed_state, removed_logs, "Cleanup complete");
            println!("Removed {removed_state} state sessions and {removed_logs} log sessions");
        }
    }

    Ok(())
}
