use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tenantry_core::RegistrarSettings;
use tracing::{debug, info};

use crate::errors::RegistrarError;

/// Registry-side registration state. Nameserver changes are only accepted
/// once a domain is `ACT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationStatus {
    #[serde(rename = "REQ")]
    Requested,
    #[serde(rename = "ACT")]
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrarDomain {
    pub status: RegistrationStatus,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub nameservers: Vec<String>,
}

#[async_trait]
pub trait RegistrarClient: Send + Sync {
    async fn get_domain(&self, domain_id: &str) -> Result<RegistrarDomain, RegistrarError>;

    /// Fails with [`RegistrarError::Locked`] while the domain is locked.
    async fn update_nameservers(
        &self,
        domain_id: &str,
        nameservers: &[String],
    ) -> Result<(), RegistrarError>;

    async fn set_lock(&self, domain_id: &str, locked: bool) -> Result<(), RegistrarError>;

    fn is_configured(&self) -> bool;
}

/// Build the registrar capability from configuration, falling back to the
/// null object when none is set.
pub fn create_registrar_client(
    settings: Option<&RegistrarSettings>,
) -> Result<Arc<dyn RegistrarClient>, RegistrarError> {
    match settings {
        Some(settings) if !settings.api_base_url.is_empty() => {
            Ok(Arc::new(HttpRegistrarClient::new(settings)?))
        }
        _ => {
            info!("No registrar configured, registrar-managed domains are disabled");
            Ok(Arc::new(NullRegistrar))
        }
    }
}

pub struct HttpRegistrarClient {
    client: Client,
    base_url: String,
    api_token: String,
}

impl HttpRegistrarClient {
    pub fn new(settings: &RegistrarSettings) -> Result<Self, RegistrarError> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| RegistrarError::Unreachable(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.api_base_url.trim_end_matches('/').to_string(),
            api_token: settings.api_token.clone(),
        })
    }

    async fn api_request<T: DeserializeOwned>(
        &self,
        method: Method,
        domain_id: &str,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Option<T>, RegistrarError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Registrar API request: {} {}", method, path);

        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(&self.api_token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(RegistrarError::from_transport)?;
        let status = response.status();
        let text = response.text().await.map_err(RegistrarError::from_transport)?;

        match status {
            s if s.is_success() => {
                if text.trim().is_empty() {
                    return Ok(None);
                }
                serde_json::from_str(&text)
                    .map(Some)
                    .map_err(|e| RegistrarError::Malformed(format!("{}: {}", path, e)))
            }
            StatusCode::NOT_FOUND => Err(RegistrarError::NotFound(domain_id.to_string())),
            StatusCode::CONFLICT | StatusCode::LOCKED => {
                Err(RegistrarError::Locked(domain_id.to_string()))
            }
            _ => Err(RegistrarError::Api {
                status: status.as_u16(),
                message: text.trim().to_string(),
            }),
        }
    }
}

#[async_trait]
impl RegistrarClient for HttpRegistrarClient {
    async fn get_domain(&self, domain_id: &str) -> Result<RegistrarDomain, RegistrarError> {
        self.api_request::<RegistrarDomain>(
            Method::GET,
            domain_id,
            &format!("/domains/{}", domain_id),
            None,
        )
        .await?
        .ok_or_else(|| RegistrarError::Malformed(format!("empty body for domain {}", domain_id)))
    }

    async fn update_nameservers(
        &self,
        domain_id: &str,
        nameservers: &[String],
    ) -> Result<(), RegistrarError> {
        let body = json!({ "nameservers": nameservers });
        self.api_request::<Value>(
            Method::PUT,
            domain_id,
            &format!("/domains/{}/nameservers", domain_id),
            Some(&body),
        )
        .await?;
        info!("Updated nameservers for registrar domain {}", domain_id);
        Ok(())
    }

    async fn set_lock(&self, domain_id: &str, locked: bool) -> Result<(), RegistrarError> {
        let body = json!({ "locked": locked });
        self.api_request::<Value>(
            Method::PUT,
            domain_id,
            &format!("/domains/{}/lock", domain_id),
            Some(&body),
        )
        .await?;
        info!("Set lock={} on registrar domain {}", locked, domain_id);
        Ok(())
    }

    fn is_configured(&self) -> bool {
        true
    }
}

/// Registrar used when the platform sells no domains.
#[derive(Debug, Default)]
pub struct NullRegistrar;

#[async_trait]
impl RegistrarClient for NullRegistrar {
    async fn get_domain(&self, _domain_id: &str) -> Result<RegistrarDomain, RegistrarError> {
        Err(RegistrarError::NotConfigured)
    }

    async fn update_nameservers(
        &self,
        _domain_id: &str,
        _nameservers: &[String],
    ) -> Result<(), RegistrarError> {
        Err(RegistrarError::NotConfigured)
    }

    async fn set_lock(&self, _domain_id: &str, _locked: bool) -> Result<(), RegistrarError> {
        Err(RegistrarError::NotConfigured)
    }

    fn is_configured(&self) -> bool {
        false
    }
}
