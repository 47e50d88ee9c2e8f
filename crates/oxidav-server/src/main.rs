//! The `oxidav` server binary.

use anyhow::Context;
use clap::Parser;
use oxidav_server::{DavServer, DavState, ServerConfig};
use oxidav_storage::{
    LocalStorage, LockManager, MemoryLockManager, MemoryStorage, Storage, StorageView,
};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// WebDAV file server with atomic uploads and legacy chunking support.
#[derive(Debug, Parser)]
#[command(name = "oxidav", version, about)]
struct Cli {
    /// Address to bind to.
    #[arg(long, default_value = "127.0.0.1")]
    bind: IpAddr,

    /// Port to listen on (0 = auto-assign).
    #[arg(long, default_value_t = 8807)]
    port: u16,

    /// Serve files from this directory. Without it, an in-memory
    /// storage is used (contents are lost on exit).
    #[arg(long)]
    root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let storage: Arc<dyn Storage> = match &cli.root {
        Some(root) => {
            info!(root = %root.display(), "serving local directory");
            LocalStorage::new("local", root.clone())
                .with_context(|| format!("cannot open storage root {}", root.display()))?
        }
        None => {
            info!("serving in-memory storage");
            MemoryStorage::new("memory")
        }
    };
    let locks: Arc<dyn LockManager> = Arc::new(MemoryLockManager::new());
    let view = Arc::new(StorageView::new(storage, locks));
    let state = DavState::new(view);

    let config = ServerConfig {
        port: cli.port,
        bind_address: cli.bind,
    };
    let server = DavServer::start(state, config)
        .await
        .context("cannot start the DAV server")?;
    info!(url = %server.url(), "ready");

    tokio::signal::ctrl_c()
        .await
        .context("cannot listen for shutdown signal")?;
    server.stop().await;
    Ok(())
}
