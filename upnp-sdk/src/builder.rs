//! Turns SSDP lifecycle signals into device trees.
//!
//! A discovered root device has its description fetched and parsed into a
//! [`RootDevice`]. A device that moved keeps its tree and resubscribes its
//! services. A removed device has its tree torn down, subscriptions first.
//!
//! Signals from an attached SSDP bus are queued and applied one at a time in
//! the order they were published. Only description fetches run concurrently;
//! a removal that overtakes one cancels the build.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use callback_server::local_ip_for;
use notification_bus::{HandlerId, NotificationBus};
use parking_lot::{Mutex, RwLock};
use soap_client::SoapClient;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use upnp_discovery::{SsdpBus, SsdpDevice, SsdpSignal};
use upnp_event_manager::EventManager;
use url::{Host, Url};

use crate::description::DeviceDescription;
use crate::device::RootDevice;
use crate::error::{Result, SdkError};

/// Signals published about device trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceSignal {
    /// A tree has been built and registered
    DetectionCompleted,
    /// A tree is about to be torn down
    RootDeviceRemoved,
}

impl DeviceSignal {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DetectionCompleted => "detection-completed",
            Self::RootDeviceRemoved => "root-device-removed",
        }
    }
}

impl std::fmt::Display for DeviceSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.name())
    }
}

pub type DeviceBus = NotificationBus<DeviceSignal, Arc<RootDevice>>;

/// A description fetch in flight.
struct PendingBuild {
    id: u64,
    /// Latest announcement; updates received during the fetch land here.
    ssdp: SsdpDevice,
}

pub struct DeviceTreeBuilder {
    http: reqwest::Client,
    soap: SoapClient,
    events: Arc<EventManager>,
    bus: Arc<DeviceBus>,
    devices: RwLock<HashMap<String, Arc<RootDevice>>>,
    /// USN → build in flight for it. Locked before `devices` wherever both
    /// are held.
    pending: Mutex<HashMap<String, PendingBuild>>,
    next_build: AtomicU64,
    attached: Mutex<Option<(Arc<SsdpBus>, Vec<(SsdpSignal, HandlerId)>)>>,
}

impl DeviceTreeBuilder {
    pub fn new(events: Arc<EventManager>, bus: Arc<DeviceBus>, http_timeout: Duration) -> Arc<Self> {
        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Arc::new(Self {
            http,
            soap: SoapClient::with_timeout(http_timeout),
            events,
            bus,
            devices: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            next_build: AtomicU64::new(1),
            attached: Mutex::new(None),
        })
    }

    /// Follow the lifecycle signals of `ssdp_bus`.
    ///
    /// The bus handlers only enqueue; one task applies the queue in publish
    /// order. That task holds a weak reference and ends when the builder is
    /// detached or dropped.
    pub fn attach(self: &Arc<Self>, ssdp_bus: &Arc<SsdpBus>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<(SsdpSignal, SsdpDevice)>();
        let mut handlers = Vec::new();
        for signal in [
            SsdpSignal::DeviceDiscovered,
            SsdpSignal::DeviceUpdated,
            SsdpSignal::DeviceRemoved,
        ] {
            let tx = tx.clone();
            // Enqueue in the handler call itself, which `publish` makes in
            // order, not in the spawned future.
            let id = ssdp_bus.subscribe(signal, move |device: SsdpDevice| {
                let _ = tx.send((signal, device));
                std::future::ready(())
            });
            handlers.push((signal, id));
        }
        drop(tx);

        let builder = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some((signal, device)) = rx.recv().await {
                let Some(builder) = builder.upgrade() else {
                    break;
                };
                builder.handle(signal, device).await;
            }
            trace!("SSDP signal queue closed");
        });

        if let Some((old_bus, old_handlers)) = self.attached.lock().replace((Arc::clone(ssdp_bus), handlers)) {
            for (signal, id) in old_handlers {
                old_bus.unsubscribe(&signal, id);
            }
        }
    }

    /// Stop following SSDP signals.
    pub fn detach(&self) {
        if let Some((bus, handlers)) = self.attached.lock().take() {
            for (signal, id) in handlers {
                bus.unsubscribe(&signal, id);
            }
        }
    }

    pub fn bus(&self) -> &Arc<DeviceBus> {
        &self.bus
    }

    pub fn devices(&self) -> Vec<Arc<RootDevice>> {
        self.devices.read().values().cloned().collect()
    }

    pub fn device(&self, usn: &str) -> Option<Arc<RootDevice>> {
        self.devices.read().get(usn).cloned()
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    /// Apply one queued SSDP signal. Fetches are spawned so a slow device
    /// never holds up the queue.
    async fn handle(self: Arc<Self>, signal: SsdpSignal, device: SsdpDevice) {
        trace!(%signal, usn = %device.usn, "SSDP signal");
        match signal {
            SsdpSignal::DeviceDiscovered => self.spawn_build(device),
            SsdpSignal::DeviceUpdated => {
                if let Some(device) = self.absorb_update(device).await {
                    self.spawn_build(device);
                }
            }
            SsdpSignal::DeviceRemoved => self.device_removed(&device).await,
        }
    }

    fn spawn_build(self: &Arc<Self>, ssdp: SsdpDevice) {
        if let Some(build) = self.begin_build(ssdp) {
            let builder = Arc::clone(self);
            tokio::spawn(async move { builder.complete_build(build).await });
        }
    }

    /// Fetch the description of `ssdp` and register its tree.
    ///
    /// A failed fetch is logged and abandoned; the next announcement of the
    /// device tries again. A removal arriving during the fetch discards the
    /// result.
    pub async fn device_discovered(&self, ssdp: SsdpDevice) {
        if let Some(build) = self.begin_build(ssdp) {
            self.complete_build(build).await;
        }
    }

    /// Rebind a known tree to its new location, or build one for an unknown
    /// device.
    pub async fn device_updated(&self, ssdp: SsdpDevice) {
        if let Some(ssdp) = self.absorb_update(ssdp).await {
            self.device_discovered(ssdp).await;
        }
    }

    /// Tear down the tree of `ssdp`. Returns once every subscription under it
    /// has ended.
    pub async fn device_removed(&self, ssdp: &SsdpDevice) {
        let removed = {
            let mut pending = self.pending.lock();
            if pending.remove(&ssdp.usn).is_some() {
                debug!(usn = %ssdp.usn, "Cancelling description fetch");
            }
            self.devices.write().remove(&ssdp.usn)
        };
        match removed {
            Some(root) => self.tear_down(root).await,
            None => trace!(usn = %ssdp.usn, "Removal of a device without a tree"),
        }
    }

    /// Claim the build of `ssdp`. `None` when a tree exists or a fetch for it
    /// is already in flight.
    fn begin_build(&self, ssdp: SsdpDevice) -> Option<(String, u64)> {
        let usn = ssdp.usn.clone();
        let mut pending = self.pending.lock();
        if self.devices.read().contains_key(&usn) {
            trace!(usn = %usn, "Tree already built");
            return None;
        }
        if pending.contains_key(&usn) {
            trace!(usn = %usn, "Description fetch already in flight");
            return None;
        }

        let id = self.next_build.fetch_add(1, Ordering::Relaxed);
        pending.insert(usn.clone(), PendingBuild { id, ssdp });
        Some((usn, id))
    }

    async fn complete_build(&self, (usn, id): (String, u64)) {
        let location = match self.pending.lock().get(&usn) {
            Some(build) if build.id == id => build.ssdp.location.clone(),
            _ => {
                debug!(usn = %usn, "Device removed before its description was requested");
                return;
            }
        };

        let fetched = self.fetch(&location).await;

        let mut pending = self.pending.lock();
        let ssdp = match pending.get(&usn) {
            Some(build) if build.id == id => pending.remove(&usn).map(|build| build.ssdp),
            _ => None,
        };
        let (description, local_ip) = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(usn = %usn, location = %location, error = %e, "Could not load device description");
                return;
            }
        };
        let Some(ssdp) = ssdp else {
            debug!(usn = %usn, "Device removed while its description was loading");
            return;
        };
        if ssdp.location != location {
            debug!(usn = %usn, location = %ssdp.location, "Device moved while its description was loading");
        }

        let root = RootDevice::build(
            ssdp,
            &description,
            local_ip,
            Arc::clone(&self.events),
            self.soap.clone(),
        );
        // Inserted under the pending lock so a removal either cancels the
        // build above or finds the tree.
        self.devices.write().insert(usn.clone(), Arc::clone(&root));
        drop(pending);

        info!(
            usn = %usn,
            name = %description.friendly_name,
            devices = root.devices().count(),
            "Device detected"
        );
        self.bus.publish(&DeviceSignal::DetectionCompleted, root);
    }

    /// Apply an update to a known tree or to a fetch in flight. Returns the
    /// announcement back when neither exists and a tree must be built.
    async fn absorb_update(&self, ssdp: SsdpDevice) -> Option<SsdpDevice> {
        let known = {
            let mut pending = self.pending.lock();
            if let Some(build) = pending.get_mut(&ssdp.usn) {
                debug!(usn = %ssdp.usn, location = %ssdp.location, "Device moved during description fetch");
                build.ssdp = ssdp;
                return None;
            }
            self.devices.read().get(&ssdp.usn).cloned()
        };
        match known {
            Some(root) => {
                root.update(ssdp).await;
                None
            }
            None => Some(ssdp),
        }
    }

    /// Detach and tear down every tree.
    pub async fn shutdown(&self) {
        self.detach();
        let roots: Vec<_> = {
            let mut pending = self.pending.lock();
            pending.clear();
            self.devices.write().drain().map(|(_, root)| root).collect()
        };
        for root in roots {
            self.tear_down(root).await;
        }
    }

    async fn tear_down(&self, root: Arc<RootDevice>) {
        self.bus
            .publish(&DeviceSignal::RootDeviceRemoved, Arc::clone(&root));
        root.shutdown().await;
        info!(usn = %root.usn(), "Device removed");
    }

    async fn fetch(&self, location: &str) -> Result<(DeviceDescription, IpAddr)> {
        let url = Url::parse(location)
            .map_err(|e| SdkError::InvalidUrl(format!("{location}: {e}")))?;

        let body = self
            .http
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let description = DeviceDescription::from_xml(&body)?;

        let local_ip = match local_ip_towards(&url).await {
            Some(ip) => ip,
            None => {
                warn!(location, "No route to device, using loopback for callbacks");
                IpAddr::V4(Ipv4Addr::LOCALHOST)
            }
        };
        Ok((description, local_ip))
    }
}

/// Address of the local interface the OS routes `url`'s host through.
///
/// reqwest does not expose the local end of its connections, so this asks
/// the routing table instead. The two agree unless the host has policy
/// routing that treats UDP and TCP differently.
async fn local_ip_towards(url: &Url) -> Option<IpAddr> {
    let peer = match url.host()? {
        Host::Ipv4(ip) => IpAddr::V4(ip),
        Host::Ipv6(ip) => IpAddr::V6(ip),
        Host::Domain(domain) => {
            let port = url.port_or_known_default()?;
            tokio::net::lookup_host((domain, port)).await.ok()?.next()?.ip()
        }
    };
    local_ip_for(peer).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_names() {
        assert_eq!(DeviceSignal::DetectionCompleted.to_string(), "detection-completed");
        assert_eq!(DeviceSignal::RootDeviceRemoved.name(), "root-device-removed");
    }

    #[tokio::test]
    async fn test_local_ip_for_loopback_device() {
        let url = Url::parse("http://127.0.0.1:1400/desc.xml").unwrap();
        assert_eq!(
            local_ip_towards(&url).await,
            Some(IpAddr::V4(Ipv4Addr::LOCALHOST))
        );
    }
}
