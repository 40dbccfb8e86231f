//! Coordinator service binary

use quadra_core::{Coordinator, CoordinatorConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("Starting Quadra Coordinator");

    // Load configuration from environment
    let mut config = CoordinatorConfig::default();
    if let Ok(host) = std::env::var("ADVERTISE_HOST") {
        config.advertise_host = host;
    }
    if let Ok(port) = std::env::var("REGISTRATION_PORT") {
        config.registration_port = port.parse()?;
    }
    if let Ok(port) = std::env::var("CLIENT_PORT") {
        config.client_port = port.parse()?;
    }

    let coordinator = Coordinator::new(config);
    if let Err(e) = coordinator.run().await {
        error!("Coordinator terminated: {}", e);
        return Err(e.into());
    }
    Ok(())
}
