use anyhow::Context;
use clap::Parser;
use kindred_context::NamespaceRegistry;
use kindred_core::{Clock, KindredConfig, Namespace, SystemClock};
use kindred_memory::{build_embedder, InMemoryStore, SqliteStore};
use kindred_persona::{spawn_idle_decay, HeartbeatConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

mod logging;
mod repl;
mod scheduler;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "KINDRED_CONFIG", default_value = "kindred.toml")]
    config: PathBuf,

    /// Path to the memory database (overrides storage.db_path)
    #[arg(short, long)]
    db: Option<String>,

    /// Namespace (user or session) to converse as
    #[arg(short, long, default_value = "default")]
    namespace: String,

    /// Keep everything in memory; nothing is written to disk
    #[arg(long)]
    ephemeral: bool,

    /// Write logs to a daily rolling file in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    let _log_guard = logging::init(&args.log_level, args.log_dir.as_deref(), args.json_logs);

    let mut config = KindredConfig::load_or_default(&args.config);
    if let Some(db) = &args.db {
        config.storage.db_path = db.clone();
    }

    let embedder = build_embedder(&config.embedding)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let registry = if args.ephemeral {
        info!("Ephemeral mode, nothing will be persisted");
        NamespaceRegistry::new(Arc::new(InMemoryStore::new()), embedder, config.clone(), clock)
    } else {
        info!("Opening memory database at {}", config.storage.db_path);
        let store = SqliteStore::new(&config.storage.db_path)
            .await
            .with_context(|| format!("Failed to open {}", config.storage.db_path))?;
        NamespaceRegistry::new(Arc::new(store), embedder, config.clone(), clock)
    };
    let registry = Arc::new(registry);

    let namespace = Namespace::new(args.namespace);
    let session = registry.session(&namespace).await?;

    let cancel = CancellationToken::new();
    let heartbeat = spawn_idle_decay(
        session.personality.clone(),
        HeartbeatConfig::default(),
        cancel.clone(),
    );
    let consolidation = scheduler::spawn_consolidation(
        registry.clone(),
        Duration::from_secs(config.consolidation.interval_secs.max(1)),
        cancel.clone(),
    );

    let result = repl::run(&registry, &namespace).await;

    info!("Shutting down");
    cancel.cancel();
    let _ = tokio::join!(heartbeat, consolidation);
    result
}
