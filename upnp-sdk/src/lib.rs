//! # upnp-sdk
//!
//! Discover UPnP/DLNA media devices on the local network, model each one as a
//! tree of devices and services, invoke actions on those services and follow
//! their state variables.
//!
//! ```text
//! SsdpServer ──(device-discovered/updated/removed)──▶ DeviceTreeBuilder
//!                                                          │
//!                                          RootDevice ◀────┘──(detection-completed)──▶ application
//!                                              │
//!                                          Service ──subscribe──▶ EventManager ◀── NOTIFY
//! ```
//!
//! [`ControlPoint`] wires the pieces together:
//!
//! ```rust,no_run
//! use upnp_sdk::{ControlPoint, ControlPointConfig, DeviceSignal};
//!
//! #[tokio::main]
//! async fn main() -> upnp_sdk::Result<()> {
//!     let control_point = ControlPoint::start(ControlPointConfig::default()).await?;
//!
//!     control_point.subscribe_devices(DeviceSignal::DetectionCompleted, |root| async move {
//!         if let Some(transport) = root.service("AVTransport") {
//!             let _ = transport.subscribe("TransportState", |event| async move {
//!                 println!("{event}");
//!             });
//!         }
//!     });
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     control_point.shutdown().await;
//!     Ok(())
//! }
//! ```

mod av_transport;
mod builder;
mod config;
mod control_point;
pub mod description;
mod device;
mod error;
mod service;

pub use av_transport::{AvTransport, AV_TRANSPORT};
pub use builder::{DeviceBus, DeviceSignal, DeviceTreeBuilder};
pub use config::ControlPointConfig;
pub use control_point::ControlPoint;
pub use device::{DeviceRef, RootDevice};
pub use error::{Result, SdkError};
pub use service::{Service, VariableCallback};

pub use upnp_discovery::{DiscoveryConfig, SsdpDevice, SsdpSignal};
pub use upnp_event_manager::{Event, EventConfig};
