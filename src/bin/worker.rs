//! Worker service binary

use quadra_core::{WorkerAgent, WorkerConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("Starting Quadra Worker");

    // Load configuration from environment
    let mut config = WorkerConfig::default();
    if let Ok(host) = std::env::var("BIND_HOST") {
        config.bind_host = host;
    }
    if let Ok(port) = std::env::var("STREAM_PORT") {
        config.stream_port = port.parse()?;
    }
    if let Ok(percent) = std::env::var("DROP_PERCENT") {
        config.drop_percent = percent.parse::<u8>()?.min(100);
    }
    if let Ok(delay_ms) = std::env::var("WORK_DELAY_MS") {
        config.work_delay = std::time::Duration::from_millis(delay_ms.parse()?);
    }

    let agent = WorkerAgent::new(config);
    if let Err(e) = agent.run().await {
        error!("Worker terminated: {}", e);
        return Err(e.into());
    }
    Ok(())
}
