//! Armada - Cluster Provisioning Core
//!
//! Daemon entry point: loads configuration, wires up the datastore, adapter
//! registry, SAN store, and lifecycle managers, and services lifecycle events
//! until shutdown. Operation surfaces (web service, CLI tooling) call the
//! library API in-process.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use armada::adapters::AdapterRegistry;
use armada::lifecycle::{Collaborators, NodeManager};
use armada::{
    AddHostSessionRegistry, AppConfig, Datastore, EventBus, HardwareProfileManager, Result,
    SanStore, SoftwareProfileManager,
};

mod noop;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Armada - cluster provisioning core
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (YAML)
    #[arg(long, env = "ARMADA_CONFIG")]
    config: Option<PathBuf>,

    /// DNS zone appended to generated host names
    #[arg(long, env = "ARMADA_DNS_ZONE")]
    dns_zone: Option<String>,

    /// SAN store snapshot file
    #[arg(long, env = "ARMADA_SAN_SNAPSHOT")]
    san_snapshot: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load_or_default(args.config.as_deref())?;
    if args.dns_zone.is_some() {
        config.dns_zone = args.dns_zone.clone();
    }
    if args.san_snapshot.is_some() {
        config.san_snapshot_path = args.san_snapshot.clone();
    }
    config.log_level = args.log_level.clone();
    config.log_json = args.log_json;

    init_logging(&config);

    info!("Starting Armada cluster provisioning core");
    info!("  Version: {}", armada::VERSION);
    info!("  DNS zone: {}", config.dns_zone.as_deref().unwrap_or("(none)"));

    let store = Datastore::new();
    let adapters = AdapterRegistry::builder().build();
    info!(
        "Adapter registry initialized (resource adapters: {:?})",
        adapters.resource_adapter_names()
    );

    let san = Arc::new(SanStore::open(
        config.san_snapshot_path.clone(),
        Arc::clone(&adapters),
    )?);
    if let Some(path) = &config.san_snapshot_path {
        info!("SAN store backed by snapshot [{}]", path.display());
    }

    let kit_actions = Arc::new(noop::NoopKitActions);
    let boot_config = Arc::new(noop::NoopBootConfig);
    let cluster_sync = Arc::new(noop::NoopClusterSync);
    let sessions = Arc::new(AddHostSessionRegistry::new());
    let events = Arc::new(EventBus::new());

    let node_manager = NodeManager::new(
        Arc::clone(&store),
        Arc::clone(&san),
        Collaborators {
            adapters: Arc::clone(&adapters),
            kit_actions: kit_actions.clone(),
            boot_config,
            cluster_sync: cluster_sync.clone(),
        },
        Arc::clone(&sessions),
        Arc::clone(&events),
        config.dns_zone.clone(),
    );
    let software_profiles =
        SoftwareProfileManager::new(Arc::clone(&store), kit_actions, cluster_sync);
    let hardware_profiles = HardwareProfileManager::new(Arc::clone(&store));

    info!(
        nodes = node_manager.node_list(&[]).len(),
        software_profiles = software_profiles.software_profile_list().len(),
        hardware_profiles = hardware_profiles.hardware_profile_list().len(),
        "Lifecycle managers initialized"
    );

    // Log lifecycle events until shutdown
    let mut event_rx = events.subscribe();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            info!(?event, "Lifecycle event");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .map_err(armada::Error::from)?;
    info!("Shutdown signal received");

    event_task.abort();
    info!("Shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(config: &AppConfig) {
    let level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if config.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
