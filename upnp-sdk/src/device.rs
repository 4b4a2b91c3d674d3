//! Device trees built from description documents.
//!
//! A [`RootDevice`] owns every node of its tree in a flat arena. Nodes refer
//! to their parent and children by index, and services point back at the
//! root through a `Weak`, so nothing below the root keeps it alive.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use soap_client::SoapClient;
use tracing::{debug, info};
use upnp_discovery::SsdpDevice;
use upnp_event_manager::EventManager;
use url::Url;

use crate::description::{short_type_name, DeviceDescription};
use crate::error::{Result, SdkError};
use crate::service::Service;

struct DeviceNode {
    device_type: String,
    friendly_name: String,
    udn: Option<String>,
    parent: Option<usize>,
    children: Vec<usize>,
    services: BTreeMap<String, Arc<Service>>,
}

/// A discovered root device and everything embedded in it.
pub struct RootDevice {
    ssdp: RwLock<SsdpDevice>,
    local_ip: IpAddr,
    nodes: Vec<DeviceNode>,
    events: Arc<EventManager>,
    soap: SoapClient,
}

impl RootDevice {
    /// Build the tree for `description`.
    ///
    /// `local_ip` is the address of this host on the path to the device; it
    /// goes into the callback URL of every subscription.
    pub fn build(
        ssdp: SsdpDevice,
        description: &DeviceDescription,
        local_ip: IpAddr,
        events: Arc<EventManager>,
        soap: SoapClient,
    ) -> Arc<Self> {
        Arc::new_cyclic(|root| {
            let mut nodes = Vec::new();
            add_node(&mut nodes, description, None, root);
            Self {
                ssdp: RwLock::new(ssdp),
                local_ip,
                nodes,
                events,
                soap,
            }
        })
    }

    pub fn usn(&self) -> String {
        self.ssdp.read().usn.clone()
    }

    pub fn location(&self) -> String {
        self.ssdp.read().location.clone()
    }

    /// The announcement this tree was built from, as last refreshed.
    pub fn ssdp(&self) -> SsdpDevice {
        self.ssdp.read().clone()
    }

    pub fn local_ip(&self) -> IpAddr {
        self.local_ip
    }

    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    pub(crate) fn soap(&self) -> &SoapClient {
        &self.soap
    }

    /// The root node.
    pub fn device_ref(&self) -> DeviceRef<'_> {
        DeviceRef { root: self, index: 0 }
    }

    pub fn device(&self, index: usize) -> Option<DeviceRef<'_>> {
        (index < self.nodes.len()).then_some(DeviceRef { root: self, index })
    }

    /// Every node, parents before children.
    pub fn devices(&self) -> impl Iterator<Item = DeviceRef<'_>> {
        (0..self.nodes.len()).map(move |index| DeviceRef { root: self, index })
    }

    /// First service with short type `name`, searching from the root down.
    pub fn service(&self, name: &str) -> Option<&Arc<Service>> {
        self.nodes.iter().find_map(|node| node.services.get(name))
    }

    pub fn services(&self) -> impl Iterator<Item = &Arc<Service>> {
        self.nodes.iter().flat_map(|node| node.services.values())
    }

    /// Resolve a URL from the description against the current location.
    pub fn resolve(&self, path: &str) -> Result<String> {
        let location = self.location();
        Url::parse(&location)
            .and_then(|base| base.join(path))
            .map(String::from)
            .map_err(|e| SdkError::InvalidUrl(format!("{path} against {location}: {e}")))
    }

    /// Take a refreshed announcement and resubscribe every service.
    pub(crate) async fn update(&self, ssdp: SsdpDevice) {
        info!(usn = %ssdp.usn, location = %ssdp.location, "Device moved, resubscribing");
        *self.ssdp.write() = ssdp;
        for service in self.services() {
            if let Err(e) = service.resubscribe().await {
                debug!(service = %service.short_type(), error = %e, "Resubscribe failed");
            }
        }
    }

    /// End every subscription in the tree, top-down.
    ///
    /// Returns once every subscription task has finished.
    pub async fn shutdown(&self) {
        let usn = self.usn();
        info!(usn = %usn, name = %self.device_ref().friendly_name(), "Shutting down device");
        for service in self.services() {
            service.shutdown(&self.events, &usn).await;
        }
    }
}

fn add_node(
    nodes: &mut Vec<DeviceNode>,
    description: &DeviceDescription,
    parent: Option<usize>,
    root: &Weak<RootDevice>,
) -> usize {
    let index = nodes.len();
    let mut services = BTreeMap::new();
    for service in &description.service_list.services {
        let name = short_type_name(&service.service_type).to_string();
        let node = Arc::new(Service::new(service.clone(), index, root.clone()));
        if services.insert(name.clone(), node).is_some() {
            debug!(service = %name, device = %description.friendly_name, "Duplicate service type, keeping the last");
        }
    }

    nodes.push(DeviceNode {
        device_type: description.device_type.clone(),
        friendly_name: description.friendly_name.clone(),
        udn: description.udn.clone(),
        parent,
        children: Vec::new(),
        services,
    });

    for child in &description.device_list.devices {
        let child_index = add_node(nodes, child, Some(index), root);
        nodes[index].children.push(child_index);
    }
    index
}

impl fmt::Debug for RootDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootDevice")
            .field("usn", &self.usn())
            .field("location", &self.location())
            .field("local_ip", &self.local_ip)
            .field("devices", &self.nodes.len())
            .finish()
    }
}

/// Borrowed view of one node of a tree.
#[derive(Clone, Copy)]
pub struct DeviceRef<'a> {
    root: &'a RootDevice,
    index: usize,
}

impl<'a> DeviceRef<'a> {
    fn node(&self) -> &'a DeviceNode {
        &self.root.nodes[self.index]
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn device_type(&self) -> &'a str {
        &self.node().device_type
    }

    /// `MediaRenderer` for `urn:schemas-upnp-org:device:MediaRenderer:1`.
    pub fn short_device_type(&self) -> &'a str {
        short_type_name(self.device_type())
    }

    pub fn friendly_name(&self) -> &'a str {
        &self.node().friendly_name
    }

    pub fn udn(&self) -> Option<&'a str> {
        self.node().udn.as_deref()
    }

    pub fn service(&self, name: &str) -> Option<&'a Arc<Service>> {
        self.node().services.get(name)
    }

    /// Services of this node only, by short type.
    pub fn services(&self) -> impl Iterator<Item = (&'a str, &'a Arc<Service>)> {
        self.node()
            .services
            .iter()
            .map(|(name, service)| (name.as_str(), service))
    }

    pub fn parent(&self) -> Option<DeviceRef<'a>> {
        self.node().parent.map(|index| DeviceRef {
            root: self.root,
            index,
        })
    }

    pub fn children(&self) -> impl Iterator<Item = DeviceRef<'a>> {
        let root = self.root;
        self.node()
            .children
            .iter()
            .map(move |&index| DeviceRef { root, index })
    }

    pub fn is_root(&self) -> bool {
        self.node().parent.is_none()
    }

    /// Number of levels in the subtree rooted here, this node included.
    pub fn depth(&self) -> usize {
        1 + self.children().map(|child| child.depth()).max().unwrap_or(0)
    }

    /// USN of the announcement, found through the parent chain.
    pub fn usn(&self) -> String {
        let mut node = *self;
        while let Some(parent) = node.parent() {
            node = parent;
        }
        node.root.usn()
    }

    pub fn location(&self) -> String {
        self.root.location()
    }
}

impl fmt::Debug for DeviceRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRef")
            .field("device_type", &self.device_type())
            .field("friendly_name", &self.friendly_name())
            .field("services", &self.node().services.keys().collect::<Vec<_>>())
            .finish()
    }
}
