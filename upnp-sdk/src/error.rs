use thiserror::Error;

/// Errors surfaced by the SDK facade.
///
/// Runtime protocol failures (an unreachable description, a lapsed
/// subscription) are logged and retried by the owning task. Only startup and
/// explicit action calls return errors.
#[derive(Error, Debug)]
pub enum SdkError {
    #[error("Discovery error: {0}")]
    Discovery(#[from] upnp_discovery::DiscoveryError),

    #[error("Event manager error: {0}")]
    EventManager(#[from] upnp_event_manager::EventManagerError),

    #[error("Action failed: {0}")]
    Soap(#[from] soap_client::SoapError),

    #[error("Description fetch failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid device description: {0}")]
    Description(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The device tree a service belonged to has been torn down
    #[error("Device {0} is gone")]
    DeviceGone(String),
}

pub type Result<T> = std::result::Result<T, SdkError>;
