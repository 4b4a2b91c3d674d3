//! SSDP announcement records and the signals published about them.

use std::net::SocketAddr;

use url::Url;

use crate::ssdp::{SsdpHeaders, ROOT_DEVICE_NT};

/// Who owns an announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Manifestation {
    /// Learned from the network
    Remote,
    /// Advertised by this process
    Local,
}

/// One SSDP announcement, keyed by USN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdpDevice {
    /// Unique service name, the registry key
    pub usn: String,
    /// Notification type (or the search target of a search response)
    pub nt: String,
    /// URL of the description document
    pub location: String,
    /// SERVER banner, if announced
    pub server: Option<String>,
    /// Cache lifetime in seconds
    pub max_age: u32,
    pub manifestation: Manifestation,
    /// Address the last datagram came from (remote devices only)
    pub source: Option<SocketAddr>,
}

impl SsdpDevice {
    /// Build a remote record from an alive/search-response header block.
    ///
    /// Returns `None` when USN or LOCATION is missing. A missing NT is stored
    /// empty, which makes the device a non-root announcement.
    pub fn from_headers(
        headers: &SsdpHeaders,
        source: Option<SocketAddr>,
        default_max_age: u32,
    ) -> Option<Self> {
        let usn = headers.usn().filter(|usn| !usn.is_empty())?;
        let location = headers.location().filter(|loc| !loc.is_empty())?;

        Some(Self {
            usn: usn.to_string(),
            nt: headers.nt().unwrap_or_default().to_string(),
            location: location.to_string(),
            server: headers.server().map(str::to_string),
            max_age: headers.max_age().unwrap_or(default_max_age),
            manifestation: Manifestation::Remote,
            source,
        })
    }

    /// Build a record for a device advertised by this process.
    pub fn local(
        usn: impl Into<String>,
        nt: impl Into<String>,
        location: impl Into<String>,
        max_age: u32,
    ) -> Self {
        Self {
            usn: usn.into(),
            nt: nt.into(),
            location: location.into(),
            server: None,
            max_age,
            manifestation: Manifestation::Local,
            source: None,
        }
    }

    /// Whether this announcement is for a root device.
    pub fn is_root_device(&self) -> bool {
        self.nt == ROOT_DEVICE_NT
    }

    pub fn is_local(&self) -> bool {
        self.manifestation == Manifestation::Local
    }

    /// Compare the host and port of two locations.
    ///
    /// Path changes are not considered a change of network location. An
    /// unparseable location never matches.
    pub fn same_network_location(&self, other_location: &str) -> bool {
        match (host_port(&self.location), host_port(other_location)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

fn host_port(location: &str) -> Option<(String, u16)> {
    let url = Url::parse(location).ok()?;
    Some((url.host_str()?.to_ascii_lowercase(), url.port_or_known_default()?))
}

/// Signals published by the SSDP engine. Only root devices are announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SsdpSignal {
    DeviceDiscovered,
    DeviceUpdated,
    DeviceRemoved,
}

impl SsdpSignal {
    /// Public signal name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DeviceDiscovered => "device-discovered",
            Self::DeviceUpdated => "device-updated",
            Self::DeviceRemoved => "device-removed",
        }
    }
}

impl std::fmt::Display for SsdpSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.name())
    }
}
