//! SSDP discovery engine.
//!
//! Listens on the SSDP multicast group, periodically searches for devices and
//! keeps a registry of live announcements keyed by USN. Remote announcements
//! expire after their `max-age` plus a grace period unless refreshed.
//!
//! Lifecycle changes of root devices are published on an [`SsdpBus`]:
//!
//! - [`SsdpSignal::DeviceDiscovered`] when a root device is first seen
//! - [`SsdpSignal::DeviceUpdated`] when its location moves to another host/port
//! - [`SsdpSignal::DeviceRemoved`] on byebye or expiry
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use upnp_discovery::{DiscoveryConfig, SsdpBus, SsdpServer, SsdpSignal};
//!
//! # async fn example() -> upnp_discovery::Result<()> {
//! let bus = Arc::new(SsdpBus::new());
//! bus.subscribe(SsdpSignal::DeviceDiscovered, |device| async move {
//!     println!("found {} at {}", device.usn, device.location);
//! });
//!
//! let server = SsdpServer::new(DiscoveryConfig::default(), bus);
//! server.start().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod device;
mod error;
mod registry;
mod server;
pub mod ssdp;

pub use config::{DiscoveryConfig, SSDP_ADDR, SSDP_PORT};
pub use device::{Manifestation, SsdpDevice, SsdpSignal};
pub use error::{DiscoveryError, Result};
pub use registry::{SsdpBus, SsdpRegistry};
pub use server::SsdpServer;
pub use ssdp::{SsdpHeaders, SsdpMessage};
