use thiserror::Error;

/// Errors that can occur in the event manager
///
/// Subscription failures inside a running task never surface here; the task
/// logs them and retries. These variants cover startup and explicit calls.
#[derive(Error, Debug)]
pub enum EventManagerError {
    /// The callback listener could not be started
    #[error("Callback server error: {0}")]
    CallbackServer(#[from] callback_server::CallbackServerError),

    /// A SUBSCRIBE/UNSUBSCRIBE exchange failed
    #[error("Subscription request failed: {0}")]
    Subscription(#[from] soap_client::SoapError),

    /// No subscription is held for this service uid
    #[error("No subscription for service {0}")]
    UnknownService(String),

    /// A notification body was not well-formed
    #[error("Malformed event notification: {0}")]
    Parse(String),
}

/// Result type for event manager operations
pub type Result<T> = std::result::Result<T, EventManagerError>;
