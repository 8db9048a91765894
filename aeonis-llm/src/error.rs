//! Error types for completion API calls

use thiserror::Error;

/// Result type for completion API operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to the completion API
#[derive(Error, Debug)]
pub enum Error {
    /// Transport failure before a response was received
    #[error("Completion request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// API key missing or rejected
    #[error("Completion API authentication error: {0}")]
    Auth(String),

    /// Too many requests
    #[error("Completion API rate limit exceeded: {0}")]
    RateLimited(String),

    /// Any other non-success status
    #[error("Completion API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Invalid base URL or model name
    #[error("Invalid endpoint: {0}")]
    Endpoint(String),

    /// Response body could not be interpreted
    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<Error> for aeonis_core::Error {
    fn from(err: Error) -> Self {
        aeonis_core::Error::Completion(err.to_string())
    }
}
