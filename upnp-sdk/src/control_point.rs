use std::future::Future;
use std::sync::Arc;

use notification_bus::HandlerId;
use tracing::info;
use upnp_discovery::{SsdpBus, SsdpServer};
use upnp_event_manager::EventManager;

use crate::builder::{DeviceBus, DeviceSignal, DeviceTreeBuilder};
use crate::config::ControlPointConfig;
use crate::device::RootDevice;
use crate::error::Result;

/// Composition root: SSDP discovery, tree building and event subscriptions
/// wired together.
///
/// # Example
///
/// ```no_run
/// use upnp_sdk::{ControlPoint, ControlPointConfig, DeviceSignal};
///
/// # async fn example() -> upnp_sdk::Result<()> {
/// let control_point = ControlPoint::start(ControlPointConfig::default()).await?;
/// control_point.subscribe_devices(DeviceSignal::DetectionCompleted, |root| async move {
///     println!("{} at {}", root.device_ref().friendly_name(), root.location());
/// });
/// # Ok(())
/// # }
/// ```
pub struct ControlPoint {
    ssdp: SsdpServer,
    events: Arc<EventManager>,
    builder: Arc<DeviceTreeBuilder>,
    device_bus: Arc<DeviceBus>,
}

impl ControlPoint {
    /// Bind the callback listener and the SSDP sockets and start searching.
    ///
    /// Fails only if a socket or the listener cannot be bound.
    pub async fn start(config: ControlPointConfig) -> Result<Self> {
        let events = EventManager::start(config.events.clone()).await?;

        let ssdp_bus = Arc::new(SsdpBus::new());
        let device_bus = Arc::new(DeviceBus::new());
        let builder = DeviceTreeBuilder::new(
            Arc::clone(&events),
            Arc::clone(&device_bus),
            config.http_timeout,
        );
        builder.attach(&ssdp_bus);

        let ssdp = SsdpServer::new(config.discovery.clone(), ssdp_bus);
        if let Err(e) = ssdp.start().await {
            builder.detach();
            events.shutdown().await;
            return Err(e.into());
        }

        info!("Control point started");
        Ok(Self {
            ssdp,
            events,
            builder,
            device_bus,
        })
    }

    /// Every device tree built so far.
    pub fn devices(&self) -> Vec<Arc<RootDevice>> {
        self.builder.devices()
    }

    pub fn device(&self, usn: &str) -> Option<Arc<RootDevice>> {
        self.builder.device(usn)
    }

    /// Register a handler for tree lifecycle signals.
    pub fn subscribe_devices<F, Fut>(&self, signal: DeviceSignal, handler: F) -> HandlerId
    where
        F: Fn(Arc<RootDevice>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.device_bus.subscribe(signal, handler)
    }

    pub fn unsubscribe_devices(&self, signal: DeviceSignal, id: HandlerId) -> bool {
        self.device_bus.unsubscribe(&signal, id)
    }

    /// Send an M-SEARCH now instead of waiting for the next interval.
    pub async fn search(&self) -> Result<()> {
        Ok(self.ssdp.search().await?)
    }

    pub fn ssdp(&self) -> &SsdpServer {
        &self.ssdp
    }

    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    /// Tear down every tree, then stop discovery and the callback listener.
    pub async fn shutdown(self) {
        self.builder.detach();
        self.ssdp.shutdown().await;
        self.builder.shutdown().await;
        self.events.shutdown().await;
        info!("Control point stopped");
    }
}
