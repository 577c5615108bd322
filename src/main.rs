use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use tracing_subscriber::EnvFilter;

use caracal::config::EngineConfig;
use caracal::db::Database;
use caracal::db::memory::MemoryStore;
use caracal::db::postgres::Store;
use caracal::server::{self, AppState};
use caracal::worker::build_engine;

#[derive(Parser, Debug)]
#[command(name = "caracal", about = "Active scan engine for web application security testing")]
struct Cli {
    /// Run against an in-memory store instead of postgres.
    #[arg(long)]
    memory: bool,

    /// Number of queue workers.
    #[arg(long, env = "CARACAL_WORKERS")]
    workers: Option<usize>,

    /// Control surface port.
    #[arg(long, env = "CARACAL_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let mut config = EngineConfig::from_env();
    if let Some(workers) = cli.workers {
        config.worker.workers = workers;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let db: Arc<dyn Database> = if cli.memory {
        tracing::warn!("Using in-memory store; nothing survives a restart");
        Arc::new(MemoryStore::new())
    } else {
        let store = Store::new(&config.database).await?;
        store.init_schema().await?;
        Arc::new(store)
    };

    let engine = build_engine(db.clone(), &config);
    let state = AppState {
        db,
        queue: engine.queue.clone(),
        controls: engine.controls.clone(),
    };

    let pool = Arc::new(engine.pool);
    let workers = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.run().await })
    };

    tokio::select! {
        result = server::serve(state, config.server.port) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received; draining workers");
        }
    }

    pool.shutdown();
    workers.await?;
    Ok(())
}
