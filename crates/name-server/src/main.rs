//! Name server daemon
//!
//! Binds the WebSocket dispatcher and serves registry requests until killed.

use anyhow::Result;
use clap::Parser;
use name_registry::{NameServerConfig, Registry, TcpProber, WsServer, backend};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// RPC framework name server
#[derive(Parser)]
#[command(name = "name-server", version)]
struct Args {
    /// Path to a YAML or JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured listen address
    #[arg(short, long)]
    listen: Option<String>,
}

fn main() -> Result<()> {
    smol::block_on(async_main())
}

async fn async_main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            NameServerConfig::from_file(path).await?
        }
        None => NameServerConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }

    let store = backend::open_store(&config.store).await?;
    let registry = Registry::open(store, config.retain_services).await?;
    let prober = Arc::new(TcpProber::new(Duration::from_secs(config.probe.timeout_secs)));

    let server = WsServer::bind(&config.server.listen_addr, registry, prober).await?;
    info!("Name server running as {}", server.info().address());

    loop {
        match server.accept().await {
            Ok(handler) => {
                smol::spawn(async move {
                    if let Err(e) = handler.handle().await {
                        error!("Connection error: {}", e);
                    }
                })
                .detach();
            }
            Err(e) => {
                error!("Accept error: {}", e);
            }
        }
    }
}
