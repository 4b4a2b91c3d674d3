use std::time::Duration;

use upnp_discovery::DiscoveryConfig;
use upnp_event_manager::EventConfig;

/// Configuration for [`ControlPoint`](crate::ControlPoint).
#[derive(Debug, Clone)]
pub struct ControlPointConfig {
    pub discovery: DiscoveryConfig,
    pub events: EventConfig,

    /// Bound on description fetches and action calls
    /// Default: 5 seconds
    pub http_timeout: Duration,
}

impl Default for ControlPointConfig {
    fn default() -> Self {
        Self {
            discovery: DiscoveryConfig::default(),
            events: EventConfig::default(),
            http_timeout: Duration::from_secs(5),
        }
    }
}

impl ControlPointConfig {
    pub fn with_discovery(mut self, discovery: DiscoveryConfig) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn with_events(mut self, events: EventConfig) -> Self {
        self.events = events;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }
}
