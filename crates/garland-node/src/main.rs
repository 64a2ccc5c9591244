//! # garland-node
//!
//! Headless Garland sync node. Runs one device's half of the gift-database
//! sync:
//! - **host**: advertises on the local network and serves requests
//! - **join**: dials the first discovered peer and pulls its changes
//!   (recipients first, then gifts)
//! - **query**: connects for gift ownership queries only
//!
//! The scanning/capture UI lives elsewhere; this binary owns the record
//! store, the photo store, the transport, and the sync engines.

mod config;
mod identity;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use garland_net::{spawn_swarm, SwarmCommand, SwarmConfig};
use garland_store::{Database, PhotoStore, StoreHandle};
use garland_sync::{NodeConfig, SyncEvent, SyncNode};

use crate::config::NodeSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,garland_sync=debug,garland_net=debug")),
        )
        .init();

    info!("Starting Garland node v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let settings = NodeSettings::from_env()?;
    info!(?settings, "Loaded configuration");

    std::fs::create_dir_all(&settings.data_dir)?;

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // Record store on its own worker thread.
    let database = Database::open_at(&settings.data_dir.join("garland.db"))?;
    let store = StoreHandle::spawn(database);

    // Photo store (creates directory if missing).
    let photos = PhotoStore::new(settings.photo_dir.clone()).await?;

    // Stable node identity.
    let keypair = identity::load_or_generate(&settings.data_dir.join("identity.key"))?;

    // Transport.
    let (commands, notifications, local_peer_id) = spawn_swarm(
        keypair,
        SwarmConfig {
            listen_port: settings.listen_port,
        },
    )
    .await?;

    info!(peer_id = %local_peer_id, name = %settings.display_name, "Node identity ready");

    // -----------------------------------------------------------------------
    // 4. Wire the sync node and surface its progress events
    // -----------------------------------------------------------------------
    let (event_tx, mut event_rx) = tokio::sync::mpsc::channel::<SyncEvent>(256);

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                SyncEvent::PhaseStarted { kind, pending } => {
                    info!(kind = %kind, pending, "Sync phase started");
                }
                SyncEvent::RecordSynced {
                    kind,
                    id,
                    remaining,
                } => {
                    info!(kind = %kind, id = %id, remaining, "Record synced");
                }
                SyncEvent::RecordSkipped { .. } => {}
                SyncEvent::RecordFailed { kind, id, message } => {
                    warn!(kind = %kind, id = %id, error = %message, "Record failed");
                }
                SyncEvent::PhaseCompleted { kind } => {
                    info!(kind = %kind, "Sync phase complete");
                }
                SyncEvent::Completed => info!("Sync complete"),
                SyncEvent::Failed { message } => warn!(error = %message, "Sync failed"),
            }
        }
    });

    let node = SyncNode::new(
        local_peer_id,
        NodeConfig {
            display_name: settings.display_name.clone(),
            role: settings.role,
            engine: settings.engine.clone(),
        },
        store,
        photos,
        commands.clone(),
        event_tx,
    );
    tokio::spawn(node.run(notifications));

    // -----------------------------------------------------------------------
    // 5. Run until interrupted
    // -----------------------------------------------------------------------
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    let _ = commands.send(SwarmCommand::Shutdown).await;

    Ok(())
}
