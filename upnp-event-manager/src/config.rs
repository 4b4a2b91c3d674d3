use std::time::Duration;

use callback_server::CallbackServerConfig;

/// Configuration for [`EventManager`](crate::EventManager).
#[derive(Debug, Clone)]
pub struct EventConfig {
    /// Subscription lifetime requested in the TIMEOUT header
    /// Default: 1800 seconds
    pub requested_timeout: Duration,

    /// Wait after a failed subscribe or renewal before subscribing again
    /// Default: 60 seconds
    pub retry_cooldown: Duration,

    /// Bound on every SUBSCRIBE/UNSUBSCRIBE request
    /// Default: 5 seconds
    pub http_timeout: Duration,

    /// Listener receiving notifications
    pub callback: CallbackServerConfig,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            requested_timeout: Duration::from_secs(1800),
            retry_cooldown: Duration::from_secs(60),
            http_timeout: Duration::from_secs(5),
            callback: CallbackServerConfig::default(),
        }
    }
}

impl EventConfig {
    pub fn with_requested_timeout(mut self, timeout: Duration) -> Self {
        self.requested_timeout = timeout;
        self
    }

    pub fn with_retry_cooldown(mut self, cooldown: Duration) -> Self {
        self.retry_cooldown = cooldown;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn with_callback(mut self, callback: CallbackServerConfig) -> Self {
        self.callback = callback;
        self
    }

    /// Requested timeout in whole seconds, at least 1.
    pub fn requested_timeout_secs(&self) -> u32 {
        u32::try_from(self.requested_timeout.as_secs())
            .unwrap_or(u32::MAX)
            .max(1)
    }
}
