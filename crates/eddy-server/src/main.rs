//! Eddy Server
//!
//! Standalone Eddy registry node: the channel listener for clients and
//! peers, the HTTP peer surface, eviction and outbound replication.

use clap::Parser;
use eddy_cluster::{default_http_client, Replicator};
use eddy_core::{init_telemetry, EddyConfig, IoContext, TelemetryConfig};
use eddy_registry::{EvictionScheduler, MemoryRegistry, Registry, RegistryView};
use eddy_server::api;
use eddy_server::listener::{ChannelListener, ChannelServices};
use eddy_server::state::AppState;
use eddy_transport::LinkListener;
use std::sync::Arc;
use tracing::{info, warn};

/// Eddy server CLI
#[derive(Parser, Debug)]
#[command(name = "eddy-server")]
#[command(about = "Eddy lease-based service registry node")]
#[command(version)]
struct Cli {
    /// Node id (defaults to the host name)
    #[arg(long)]
    node_id: Option<String>,

    /// HTTP peer surface bind address
    #[arg(long, default_value = "0.0.0.0:8761")]
    http_bind: String,

    /// Channel listener bind address
    #[arg(long, default_value = "0.0.0.0:8762")]
    channel_bind: String,

    /// Base URL of a peer node; repeat for each peer
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Disable self-preservation
    #[arg(long)]
    no_self_preservation: bool,

    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn config(&self) -> EddyConfig {
        let mut config = EddyConfig::default();
        config.node.node_id = self.node_id.clone();
        config.node.http_bind_address = self.http_bind.clone();
        config.node.channel_bind_address = self.channel_bind.clone();
        config.replication.peer_urls = self.peers.clone();
        if self.no_self_preservation {
            config.registry.self_preservation_enabled = false;
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let _telemetry = init_telemetry(TelemetryConfig::from_env().with_log_level(level))?;

    let config = cli.config();
    config.validate()?;
    let node_id = config.node.resolved_node_id();
    info!(
        node_id = %node_id,
        http = %config.node.http_bind_address,
        channel = %config.node.channel_bind_address,
        peers = config.replication.peer_urls.len(),
        "Eddy server starting"
    );

    let io = IoContext::production();
    let store = Arc::new(MemoryRegistry::new(&config.registry, io.clone()));
    let eviction = EvictionScheduler::new(store.clone(), &config.registry, io.clone());
    eviction.start().await;

    let http = default_http_client(config.replication.request_timeout())?;
    let replicator = Arc::new(Replicator::spawn(
        &node_id,
        store.clone(),
        http,
        &config.replication,
        &config.retry,
        io.clone(),
    ));
    let registry: Arc<dyn Registry> = replicator.clone();

    let channels = ChannelListener::start(
        LinkListener::bind(config.node.channel_bind_address.as_str()).await?,
        ChannelServices {
            node_id: node_id.clone(),
            registry: registry.clone(),
            store: store.clone(),
            config: config.channel.clone(),
            io: io.clone(),
        },
    )?;

    let view = RegistryView::start(store.as_ref()).await?;
    let state = AppState::new(node_id, registry, store.clone(), view);
    let http_listener = tokio::net::TcpListener::bind(&config.node.http_bind_address).await?;
    info!(address = %http_listener.local_addr()?, "HTTP surface listening");

    axum::serve(http_listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    channels.stop().await;
    eviction.stop().await;
    match Arc::try_unwrap(replicator) {
        Ok(replicator) => replicator.shutdown().await,
        Err(_) => warn!("replicator still shared, peer queues dropped without flushing"),
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
