use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Could not initialize client: {0}")]
    Initialization(String),
    #[error("Provider is not configured: {0}")]
    NotConfigured(String),
    #[error("Unknown payment method: {0}")]
    UnknownMethod(String),
    #[error("Request to the provider failed: {0}")]
    Transport(String),
    #[error("The provider did not respond in time")]
    Timeout,
    #[error("Query failed. Error {status}. {message}")]
    QueryError { status: u16, message: String },
    #[error("Could not deserialize JSON: {0}")]
    JsonError(String),
    #[error("{0} is not supported by this provider")]
    Unsupported(&'static str),
    #[error("Invalid webhook payload: {0}")]
    MalformedWebhook(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else if e.is_decode() {
            ProviderError::JsonError(e.to_string())
        } else {
            ProviderError::Transport(e.to_string())
        }
    }
}
