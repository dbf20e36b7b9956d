//! Reverse proxy error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Proxy admin API unreachable: {0}")]
    Unreachable(String),

    #[error("Proxy admin API timed out: {0}")]
    Timeout(String),

    #[error("Proxy admin API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The admin API accepted a change the live config does not show.
    #[error("Route not visible in live config: {0}")]
    NotConfirmed(String),

    #[error("Malformed route: {0}")]
    MalformedRoute(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ProxyError {
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProxyError::Timeout(err.to_string())
        } else {
            ProxyError::Unreachable(err.to_string())
        }
    }
}
