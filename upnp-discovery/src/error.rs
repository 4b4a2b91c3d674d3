//! Error types for the discovery system.

use std::net::SocketAddr;

/// Error type for discovery operations.
///
/// Startup fails with [`Bind`](Self::Bind). Once the sockets are bound,
/// malformed datagrams and background send failures are logged and absorbed
/// by the engine; only an explicit search reports [`NetworkError`](Self::NetworkError).
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// A discovery socket could not be bound or configured
    #[error("Failed to bind SSDP socket on {addr}: {source}")]
    Bind {
        /// Address the socket was being bound to
        addr: SocketAddr,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
    /// Sending failed, or the engine has no socket to send from
    #[error("Network error: {0}")]
    NetworkError(String),
}

/// Convenience Result type alias for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_display() {
        let error = DiscoveryError::Bind {
            addr: "0.0.0.0:1900".parse().unwrap(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert_eq!(
            error.to_string(),
            "Failed to bind SSDP socket on 0.0.0.0:1900: in use"
        );
    }

    #[test]
    fn test_network_error_display() {
        let error = DiscoveryError::NetworkError("discovery not started".to_string());
        assert_eq!(error.to_string(), "Network error: discovery not started");
    }
}
