#[derive(Debug, thiserror::Error)]
pub enum SoapError {
    /// Connection failure, timeout or unreadable body
    #[error("Network error: {0}")]
    Network(String),

    #[error("XML parsing error: {0}")]
    Parse(String),

    /// Non-success HTTP status without a SOAP fault body
    #[error("HTTP status {0}")]
    Status(u16),

    /// UPnP error code from a SOAP fault
    #[error("SOAP fault: error code {0}")]
    Fault(u16),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

pub type Result<T> = std::result::Result<T, SoapError>;

impl From<reqwest::Error> for SoapError {
    fn from(error: reqwest::Error) -> Self {
        SoapError::Network(error.to_string())
    }
}
