//! Error types for the callback server.

/// Errors that can occur while starting the callback server.
///
/// Once the listener is running nothing in this crate fails: malformed or
/// unknown notifications are answered and dropped.
#[derive(Debug, thiserror::Error)]
pub enum CallbackServerError {
    /// Every port in the configured range is taken
    #[error("No available port found in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },

    /// No local interface address could be determined for callback URLs
    #[error("Failed to detect local IP address")]
    LocalIpUnavailable,

    /// The HTTP listener did not come up
    #[error("Callback server failed to start: {0}")]
    StartupFailed(String),
}

/// Convenience Result type alias for callback server operations.
pub type Result<T> = std::result::Result<T, CallbackServerError>;
