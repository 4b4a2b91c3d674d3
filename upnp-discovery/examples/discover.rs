//! Print root devices as they come and go.
//!
//! Usage: cargo run -p upnp-sdk-discovery --example discover [seconds]

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use upnp_discovery::{DiscoveryConfig, SsdpBus, SsdpServer, SsdpSignal};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let seconds = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(15);

    let bus = Arc::new(SsdpBus::new());
    for signal in [
        SsdpSignal::DeviceDiscovered,
        SsdpSignal::DeviceUpdated,
        SsdpSignal::DeviceRemoved,
    ] {
        bus.subscribe(signal, move |device| async move {
            println!("{signal:<18} {} -> {}", device.usn, device.location);
        });
    }

    let config = DiscoveryConfig::default().with_search_interval(Duration::from_secs(10));
    let server = SsdpServer::new(config, bus);
    server.start().await?;

    tokio::time::sleep(Duration::from_secs(seconds)).await;
    println!("{} announcements known", server.registry().len());
    server.shutdown().await;
    Ok(())
}
