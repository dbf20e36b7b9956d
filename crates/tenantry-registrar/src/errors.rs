use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistrarError {
    #[error("Registrar not configured")]
    NotConfigured,

    #[error("Domain is locked at the registrar: {0}")]
    Locked(String),

    #[error("Domain not found at the registrar: {0}")]
    NotFound(String),

    #[error("Registrar API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Registrar request timed out: {0}")]
    Timeout(String),

    #[error("Registrar unreachable: {0}")]
    Unreachable(String),

    #[error("Malformed registrar response: {0}")]
    Malformed(String),
}

impl RegistrarError {
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RegistrarError::Timeout(err.to_string())
        } else {
            RegistrarError::Unreachable(err.to_string())
        }
    }
}
