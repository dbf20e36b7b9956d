//! Live HTTPS probe of a tenant site

use reqwest::redirect::Policy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::errors::ProxyError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub responds: bool,
    pub ssl_valid: bool,
    pub http_code: Option<u16>,
}

/// Probes a domain twice at most: once through a certificate-verifying
/// client and, if that fails, once more ignoring certificate errors so a
/// site that answers with a bad certificate is told apart from one that
/// does not answer at all.
#[derive(Clone)]
pub struct SiteProber {
    strict: reqwest::Client,
    lenient: reqwest::Client,
    scheme: String,
}

impl SiteProber {
    pub fn new(timeout: Duration) -> Result<Self, ProxyError> {
        let strict = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(Policy::none())
            .user_agent("Tenantry-Probe/1.0")
            .build()
            .map_err(|e| ProxyError::Configuration(format!("Failed to build probe client: {}", e)))?;

        let lenient = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(Policy::none())
            .user_agent("Tenantry-Probe/1.0")
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| ProxyError::Configuration(format!("Failed to build probe client: {}", e)))?;

        Ok(Self {
            strict,
            lenient,
            scheme: "https".to_string(),
        })
    }

    /// Probe over another scheme. With `http` there is no certificate, so
    /// `ssl_valid` only reflects that the strict request went through.
    pub fn with_scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_string();
        self
    }

    pub async fn probe(&self, host: &str) -> ProbeResult {
        let url = format!("{}://{}/", self.scheme, host);

        match self.strict.get(&url).send().await {
            Ok(response) => {
                let code = response.status().as_u16();
                debug!("Probe {} answered {} with a valid certificate", url, code);
                return ProbeResult {
                    responds: true,
                    ssl_valid: true,
                    http_code: Some(code),
                };
            }
            Err(e) => debug!("Strict probe of {} failed: {}", url, e),
        }

        match self.lenient.get(&url).send().await {
            Ok(response) => {
                let code = response.status().as_u16();
                debug!("Probe {} answered {} without a valid certificate", url, code);
                ProbeResult {
                    responds: true,
                    ssl_valid: false,
                    http_code: Some(code),
                }
            }
            Err(e) => {
                debug!("Probe of {} got no response: {}", url, e);
                ProbeResult::default()
            }
        }
    }
}
