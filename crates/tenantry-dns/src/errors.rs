//! DNS provider error types

use thiserror::Error;

/// Cloudflare error code for "record does not exist".
pub const CF_RECORD_NOT_FOUND: i64 = 81044;
/// Cloudflare error codes for "a record with that host already exists".
pub const CF_RECORD_EXISTS: &[i64] = &[81053, 81057];

#[derive(Error, Debug)]
pub enum DnsError {
    #[error("Zone not found: {0}")]
    ZoneNotFound(String),

    #[error("Record conflict: {0}")]
    Conflict(String),

    #[error("DNS provider API error ({status}): {message}")]
    Api {
        status: u16,
        codes: Vec<i64>,
        message: String,
    },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A write returned success but the follow-up read did not see it.
    #[error("Change not visible at provider: {0}")]
    NotConfirmed(String),

    #[error("Malformed provider response: {0}")]
    Malformed(String),

    #[error("Nameserver lookup failed: {0}")]
    Resolution(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl DnsError {
    pub fn is_not_found(&self) -> bool {
        match self {
            DnsError::Api { status, codes, .. } => {
                *status == 404 || codes.contains(&CF_RECORD_NOT_FOUND)
            }
            _ => false,
        }
    }

    pub fn is_already_exists(&self) -> bool {
        match self {
            DnsError::Api { codes, .. } => codes.iter().any(|c| CF_RECORD_EXISTS.contains(c)),
            _ => false,
        }
    }

    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DnsError::Timeout(err.to_string())
        } else {
            DnsError::ConnectionFailed(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_by_status_or_code() {
        let by_status = DnsError::Api {
            status: 404,
            codes: vec![],
            message: "gone".into(),
        };
        let by_code = DnsError::Api {
            status: 400,
            codes: vec![CF_RECORD_NOT_FOUND],
            message: "Record does not exist.".into(),
        };
        let other = DnsError::Api {
            status: 500,
            codes: vec![1000],
            message: "boom".into(),
        };
        assert!(by_status.is_not_found());
        assert!(by_code.is_not_found());
        assert!(!other.is_not_found());
        assert!(!DnsError::Timeout("t".into()).is_not_found());
    }

    #[test]
    fn test_already_exists_codes() {
        let err = DnsError::Api {
            status: 400,
            codes: vec![81057],
            message: "Record already exists.".into(),
        };
        assert!(err.is_already_exists());
    }
}
