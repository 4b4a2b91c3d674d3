use std::net::{IpAddr, Ipv4Addr};

/// Configuration for [`CallbackServer`](crate::CallbackServer).
#[derive(Debug, Clone)]
pub struct CallbackServerConfig {
    /// Inclusive range of ports tried in order
    /// Default: 8444-8544
    pub port_range: (u16, u16),

    /// Path notifications are accepted on
    /// Default: "/events/"
    pub path: String,

    /// Interface the listener binds to
    /// Default: 0.0.0.0
    pub bind_addr: IpAddr,
}

impl Default for CallbackServerConfig {
    fn default() -> Self {
        Self {
            port_range: (8444, 8544),
            path: "/events/".to_string(),
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }
}

impl CallbackServerConfig {
    pub fn with_port_range(mut self, start: u16, end: u16) -> Self {
        self.port_range = (start, end);
        self
    }

    /// Set the callback path. A leading slash is added if missing.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        self
    }

    pub fn with_bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = addr;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CallbackServerConfig::default();
        assert_eq!(config.port_range, (8444, 8544));
        assert_eq!(config.path, "/events/");
    }

    #[test]
    fn test_with_path_adds_leading_slash() {
        let config = CallbackServerConfig::default().with_path("notify");
        assert_eq!(config.path, "/notify");
    }
}
