//! Constellation coordinator daemon entry point.
//!
//! No CLI subcommand surface: the binary loads configuration, starts the
//! connection coordinator's background event loop, and runs until
//! interrupted. Constellations are submitted and devices are registered
//! through the library API by an embedding process, not by this binary.

use std::sync::Arc;

use anyhow::Result;
use constellation_core::adapters::WebSocketTransportFactory;
use constellation_core::infrastructure::{ConfigLoader, init_logging};
use constellation_core::services::{ConnectionCoordinator, EventBus};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ConfigLoader::load()?;
    init_logging(&config.logging)?;

    tracing::info!(assignment_strategy = ?config.coordinator.assignment_strategy, "starting constellation coordinator");

    let event_bus = Arc::new(EventBus::default());
    let (coordinator, events_rx) =
        ConnectionCoordinator::new(Arc::new(WebSocketTransportFactory), config.coordinator, event_bus);
    let event_loop = tokio::spawn(constellation_core::services::connection_coordinator::run_event_loop(
        coordinator,
        events_rx,
    ));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    event_loop.abort();
    Ok(())
}
