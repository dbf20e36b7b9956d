//! Caddy admin API controller

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use tenantry_core::ProxySettings;
use tracing::{debug, info};

use crate::controller::{
    is_routable_host, route_id_for_domain, DesiredRoute, ProxyController, ProxyStatus,
};
use crate::errors::ProxyError;
use crate::probe::SiteProber;

pub struct CaddyProxyController {
    client: Client,
    admin_url: String,
    server_name: String,
    upstream: String,
    prober: SiteProber,
}

/// Caddy answers unknown `@id`s with 404, older builds with 400 and an
/// "unknown object ID" message.
fn is_missing(status: StatusCode, body: &str) -> bool {
    status == StatusCode::NOT_FOUND || body.contains("unknown object ID")
}

impl CaddyProxyController {
    pub fn new(settings: &ProxySettings) -> Result<Self, ProxyError> {
        let prober = SiteProber::new(settings.probe_timeout())?;
        Self::with_prober(settings, prober)
    }

    pub fn with_prober(settings: &ProxySettings, prober: SiteProber) -> Result<Self, ProxyError> {
        if settings.upstream.is_empty() {
            return Err(ProxyError::Configuration("proxy upstream is not set".into()));
        }

        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| ProxyError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            admin_url: settings.admin_url.trim_end_matches('/').to_string(),
            server_name: settings.server_name.clone(),
            upstream: settings.upstream.clone(),
            prober,
        })
    }

    fn route_body(&self, route_id: &str, domain: &str, include_www: bool) -> Value {
        let mut hosts = vec![domain.to_string()];
        if include_www {
            hosts.push(format!("www.{}", domain));
        }

        json!({
            "@id": route_id,
            "match": [{ "host": hosts }],
            "handle": [{
                "handler": "reverse_proxy",
                "upstreams": [{ "dial": self.upstream }],
            }],
            "terminal": true,
        })
    }

    /// Send an admin API request, returning status and body text.
    async fn admin_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<(StatusCode, String), ProxyError> {
        let url = format!("{}{}", self.admin_url, path);
        debug!("Caddy admin request: {} {}", method, path);

        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(ProxyError::from_transport)?;
        let status = response.status();
        let text = response.text().await.map_err(ProxyError::from_transport)?;
        Ok((status, text))
    }

    async fn apply_route(&self, domain: &str, include_www: bool) -> Result<String, ProxyError> {
        let domain = domain.trim_end_matches('.').to_ascii_lowercase();
        if !is_routable_host(&domain) {
            return Err(ProxyError::MalformedRoute(format!("invalid host '{}'", domain)));
        }

        let route_id = route_id_for_domain(&domain);
        let body = self.route_body(&route_id, &domain, include_www);

        let (status, text) = if self.route_exists(&route_id).await? {
            debug!("Route {} exists, replacing in place", route_id);
            self.admin_request(Method::PATCH, &format!("/id/{}", route_id), Some(&body))
                .await?
        } else {
            self.admin_request(
                Method::POST,
                &format!("/config/apps/http/servers/{}/routes", self.server_name),
                Some(&body),
            )
            .await?
        };

        if !status.is_success() {
            return Err(ProxyError::Api {
                status: status.as_u16(),
                message: text.trim().to_string(),
            });
        }

        info!("Applied proxy route {} for {}", route_id, domain);
        Ok(route_id)
    }
}

#[async_trait]
impl ProxyController for CaddyProxyController {
    async fn add_domain(&self, domain: &str, include_www: bool) -> Result<String, ProxyError> {
        self.apply_route(domain, include_www).await
    }

    async fn remove_domain(&self, route_id: &str) -> Result<(), ProxyError> {
        let (status, text) = self
            .admin_request(Method::DELETE, &format!("/id/{}", route_id), None)
            .await?;

        if status.is_success() {
            info!("Removed proxy route {}", route_id);
            return Ok(());
        }
        if is_missing(status, &text) {
            debug!("Proxy route {} already absent", route_id);
            return Ok(());
        }
        Err(ProxyError::Api {
            status: status.as_u16(),
            message: text.trim().to_string(),
        })
    }

    async fn reconfigure(&self, route: &DesiredRoute) -> Result<String, ProxyError> {
        self.apply_route(&route.domain, route.include_www).await
    }

    async fn route_exists(&self, route_id: &str) -> Result<bool, ProxyError> {
        let (status, text) = self
            .admin_request(Method::GET, &format!("/id/{}", route_id), None)
            .await?;

        if status.is_success() {
            return Ok(true);
        }
        if is_missing(status, &text) {
            return Ok(false);
        }
        Err(ProxyError::Api {
            status: status.as_u16(),
            message: text.trim().to_string(),
        })
    }

    async fn status(&self, domain: &str) -> Result<ProxyStatus, ProxyError> {
        let route_exists = self.route_exists(&route_id_for_domain(domain)).await?;
        let probe = self.prober.probe(domain).await;

        Ok(ProxyStatus {
            route_exists,
            domain_responds: probe.responds,
            ssl_valid: probe.ssl_valid,
            http_code: probe.http_code,
        })
    }
}
