//! Build device trees as they are discovered and print transport changes.
//!
//! Usage: cargo run -p upnp-sdk --example watch_devices [seconds]

use std::time::Duration;

use tracing_subscriber::EnvFilter;
use upnp_sdk::{ControlPoint, ControlPointConfig, DeviceSignal};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let seconds = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(60);

    let control_point = ControlPoint::start(ControlPointConfig::default()).await?;

    control_point.subscribe_devices(DeviceSignal::DetectionCompleted, |root| async move {
        for device in root.devices() {
            let indent = if device.is_root() { "" } else { "  " };
            println!("{indent}{} ({})", device.friendly_name(), device.short_device_type());
            for (name, _) in device.services() {
                println!("{indent}  - {name}");
            }
        }

        if let Some(transport) = root.service("AVTransport") {
            let name = transport.friendly_name().unwrap_or_default();
            for variable in ["TransportState", "CurrentTrackURI"] {
                let name = name.clone();
                if let Err(e) = transport.subscribe(variable, move |event| {
                    let name = name.clone();
                    async move { println!("[{name}] {event}") }
                }) {
                    eprintln!("subscribe failed: {e}");
                }
            }
        }
    });

    control_point.subscribe_devices(DeviceSignal::RootDeviceRemoved, |root| async move {
        println!("removed {}", root.device_ref().friendly_name());
    });

    tokio::time::sleep(Duration::from_secs(seconds)).await;
    println!("{} devices known", control_point.devices().len());
    control_point.shutdown().await;
    Ok(())
}
