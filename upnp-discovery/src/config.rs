//! Configuration for the SSDP engine.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

/// Well-known SSDP multicast group.
pub const SSDP_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// Well-known SSDP port.
pub const SSDP_PORT: u16 = 1900;

/// Configuration for [`SsdpServer`](crate::SsdpServer).
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Multicast group to join and to send searches to
    /// Default: 239.255.255.250
    pub multicast_addr: Ipv4Addr,

    /// Port of the multicast group
    /// Default: 1900
    pub port: u16,

    /// Interval between active M-SEARCH broadcasts
    /// Default: 120 seconds
    pub search_interval: Duration,

    /// Search target sent in the ST header
    /// Default: "ssdp:all"
    pub search_target: String,

    /// MX header (maximum response delay in seconds)
    /// Default: 5
    pub mx: u32,

    /// max-age assumed when an announcement carries no usable CACHE-CONTROL
    /// Default: 60 seconds
    pub default_max_age: u32,

    /// Extra time a remote device is kept past its max-age
    /// Default: 5 seconds
    pub expiry_grace: Duration,

    /// USER-AGENT header of outgoing searches
    pub user_agent: String,

    /// SERVER header of outgoing announcements for local devices
    pub server_banner: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            multicast_addr: SSDP_ADDR,
            port: SSDP_PORT,
            search_interval: Duration::from_secs(120),
            search_target: "ssdp:all".to_string(),
            mx: 5,
            default_max_age: 60,
            expiry_grace: Duration::from_secs(5),
            user_agent: format!("upnp-sdk/{} UPnP/1.0", env!("CARGO_PKG_VERSION")),
            server_banner: format!(
                "{}/{} UPnP/1.0 upnp-sdk/{}",
                std::env::consts::OS,
                std::env::consts::ARCH,
                env!("CARGO_PKG_VERSION")
            ),
        }
    }
}

impl DiscoveryConfig {
    /// Set the interval between active searches.
    pub fn with_search_interval(mut self, interval: Duration) -> Self {
        self.search_interval = interval;
        self
    }

    /// Set the ST header used for active searches.
    pub fn with_search_target(mut self, target: impl Into<String>) -> Self {
        self.search_target = target.into();
        self
    }

    /// Set the grace period added to each device's max-age.
    pub fn with_expiry_grace(mut self, grace: Duration) -> Self {
        self.expiry_grace = grace;
        self
    }

    /// Set the max-age used when an announcement omits CACHE-CONTROL.
    pub fn with_default_max_age(mut self, seconds: u32) -> Self {
        self.default_max_age = seconds;
        self
    }

    /// Socket address of the multicast group.
    pub fn group_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.multicast_addr, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.group_addr().to_string(), "239.255.255.250:1900");
        assert_eq!(config.search_interval, Duration::from_secs(120));
        assert_eq!(config.default_max_age, 60);
        assert_eq!(config.search_target, "ssdp:all");
    }

    #[test]
    fn test_builder_setters() {
        let config = DiscoveryConfig::default()
            .with_search_interval(Duration::from_secs(10))
            .with_search_target("upnp:rootdevice")
            .with_expiry_grace(Duration::from_secs(1))
            .with_default_max_age(30);

        assert_eq!(config.search_interval, Duration::from_secs(10));
        assert_eq!(config.search_target, "upnp:rootdevice");
        assert_eq!(config.expiry_grace, Duration::from_secs(1));
        assert_eq!(config.default_max_age, 30);
    }
}
