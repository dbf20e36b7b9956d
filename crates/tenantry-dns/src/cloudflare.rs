//! Cloudflare DNS controller
//!
//! Talks to the Cloudflare v4 REST API with an API token. Only CNAME records
//! pointing at the platform edge host are ever created.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tenantry_core::DnsSettings;
use tracing::{debug, info, warn};

use crate::controller::{DnsController, DnsRecordRef};
use crate::errors::DnsError;

/// Cloudflare API response envelope
#[derive(Debug, Deserialize)]
struct CfEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<CfMessage>,
    #[serde(default)]
    result: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CfMessage {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct CfZone {
    id: String,
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CfRecord {
    id: String,
    name: String,
    content: String,
    #[serde(default)]
    proxied: bool,
}

pub struct CloudflareDnsController {
    client: Client,
    base_url: String,
    api_token: String,
    zone_id: String,
    parent_domain: String,
    edge_target: String,
}

fn same_host(a: &str, b: &str) -> bool {
    a.trim_end_matches('.')
        .eq_ignore_ascii_case(b.trim_end_matches('.'))
}

impl CloudflareDnsController {
    pub fn new(settings: &DnsSettings) -> Result<Self, DnsError> {
        Self::with_base_url(settings, settings.api_base_url.clone())
    }

    /// Create a controller against a custom API base URL (used by tests).
    pub fn with_base_url(settings: &DnsSettings, base_url: String) -> Result<Self, DnsError> {
        if settings.api_token.is_empty() {
            return Err(DnsError::Configuration("DNS api token is not set".into()));
        }
        if settings.zone_id.is_empty() {
            return Err(DnsError::Configuration("DNS zone id is not set".into()));
        }

        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| DnsError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: settings.api_token.clone(),
            zone_id: settings.zone_id.clone(),
            parent_domain: settings.parent_domain.trim_end_matches('.').to_lowercase(),
            edge_target: settings.edge_target.trim_end_matches('.').to_lowercase(),
        })
    }

    /// Make an authenticated request and unwrap the envelope's `result`.
    async fn api_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Option<T>, DnsError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Cloudflare API request: {} {}", method, path);

        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(&self.api_token)
            .header("Content-Type", "application/json");

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(DnsError::from_transport)?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("Cloudflare API rate limited on {}", path);
            return Err(DnsError::RateLimited(format!("{} rate limited", path)));
        }

        let text = response.text().await.map_err(DnsError::from_transport)?;
        let envelope: CfEnvelope = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(e) if status.is_success() => {
                return Err(DnsError::Malformed(format!("{}: {}", path, e)));
            }
            Err(_) => {
                return Err(DnsError::Api {
                    status: status.as_u16(),
                    codes: Vec::new(),
                    message: format!("HTTP {}", status),
                });
            }
        };

        if !status.is_success() || !envelope.success {
            let message = if envelope.errors.is_empty() {
                format!("HTTP {}", status)
            } else {
                envelope
                    .errors
                    .iter()
                    .map(|e| format!("{}: {}", e.code, e.message))
                    .collect::<Vec<_>>()
                    .join("; ")
            };
            return Err(DnsError::Api {
                status: status.as_u16(),
                codes: envelope.errors.iter().map(|e| e.code).collect(),
                message,
            });
        }

        match envelope.result {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| DnsError::Malformed(format!("{}: {}", path, e))),
        }
    }

    async fn list_records(
        &self,
        zone_id: &str,
        name: &str,
        record_type: Option<&str>,
    ) -> Result<Vec<CfRecord>, DnsError> {
        let mut path = format!("/zones/{}/dns_records?name={}", zone_id, name);
        if let Some(record_type) = record_type {
            path.push_str("&type=");
            path.push_str(record_type);
        }
        Ok(self
            .api_request::<Vec<CfRecord>>(Method::GET, &path, None)
            .await?
            .unwrap_or_default())
    }

    /// Walk from the full name towards the apex until the provider knows a zone.
    async fn find_zone_id(&self, domain: &str) -> Result<String, DnsError> {
        let labels: Vec<&str> = domain.split('.').collect();
        for start in 0..labels.len().saturating_sub(1) {
            let candidate = labels[start..].join(".");
            let zones = self
                .api_request::<Vec<CfZone>>(Method::GET, &format!("/zones?name={}", candidate), None)
                .await?
                .unwrap_or_default();
            if let Some(zone) = zones.into_iter().find(|z| same_host(&z.name, &candidate)) {
                debug!("Resolved zone {} for {}", zone.id, domain);
                return Ok(zone.id);
            }
        }
        Err(DnsError::ZoneNotFound(domain.to_string()))
    }

    fn to_ref(&self, zone_id: &str, record: CfRecord) -> DnsRecordRef {
        DnsRecordRef {
            zone_id: zone_id.to_string(),
            record_id: record.id,
            name: record.name,
            content: record.content,
            proxied: record.proxied,
        }
    }

    /// Return the matching CNAME if one already exists for `name`.
    async fn existing_cname(
        &self,
        zone_id: &str,
        name: &str,
    ) -> Result<Option<DnsRecordRef>, DnsError> {
        let records = self.list_records(zone_id, name, Some("CNAME")).await?;
        match records.into_iter().find(|r| same_host(&r.name, name)) {
            Some(record) if same_host(&record.content, &self.edge_target) => {
                Ok(Some(self.to_ref(zone_id, record)))
            }
            Some(record) => Err(DnsError::Conflict(format!(
                "{} already points at {}",
                name, record.content
            ))),
            None => Ok(None),
        }
    }

    async fn ensure_cname(
        &self,
        zone_id: &str,
        name: &str,
        proxied: bool,
    ) -> Result<DnsRecordRef, DnsError> {
        if let Some(existing) = self.existing_cname(zone_id, name).await? {
            info!(
                "CNAME for {} already exists ({}), adopting it",
                name, existing.record_id
            );
            return Ok(existing);
        }

        let body = json!({
            "type": "CNAME",
            "name": name,
            "content": self.edge_target,
            "ttl": 1,
            "proxied": proxied,
        });

        let created = self
            .api_request::<CfRecord>(Method::POST, &format!("/zones/{}/dns_records", zone_id), Some(&body))
            .await;

        match created {
            Ok(Some(record)) => {
                info!("Created CNAME {} -> {} ({})", name, self.edge_target, record.id);
                Ok(self.to_ref(zone_id, record))
            }
            Ok(None) => Err(DnsError::Malformed(format!(
                "create of {} returned no record",
                name
            ))),
            Err(e) if e.is_already_exists() => {
                // Lost a race with another writer; re-read once
                debug!("Create of {} reported an existing record, re-listing", name);
                match self.existing_cname(zone_id, name).await? {
                    Some(existing) => Ok(existing),
                    None => Err(DnsError::Conflict(format!(
                        "{} is held by a non-CNAME record",
                        name
                    ))),
                }
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl DnsController for CloudflareDnsController {
    fn subdomain_fqdn(&self, subdomain: &str) -> String {
        format!("{}.{}", subdomain, self.parent_domain)
    }

    async fn create_subdomain_record(
        &self,
        subdomain: &str,
        proxied: bool,
    ) -> Result<DnsRecordRef, DnsError> {
        let fqdn = self.subdomain_fqdn(subdomain);
        self.ensure_cname(&self.zone_id, &fqdn, proxied).await
    }

    async fn create_domain_record(
        &self,
        domain: &str,
        proxied: bool,
    ) -> Result<DnsRecordRef, DnsError> {
        let zone_id = self.find_zone_id(domain).await?;
        self.ensure_cname(&zone_id, domain, proxied).await
    }

    async fn update_proxy_status(
        &self,
        zone_id: &str,
        record_id: &str,
        proxied: bool,
    ) -> Result<(), DnsError> {
        let body = json!({ "proxied": proxied });
        let updated = self
            .api_request::<CfRecord>(
                Method::PATCH,
                &format!("/zones/{}/dns_records/{}", zone_id, record_id),
                Some(&body),
            )
            .await?;

        match updated {
            Some(record) if record.proxied == proxied => {
                info!("Set proxied={} on record {}", proxied, record_id);
                Ok(())
            }
            Some(_) => Err(DnsError::Malformed(format!(
                "record {} did not take proxied={}",
                record_id, proxied
            ))),
            None => Err(DnsError::Malformed(format!(
                "update of {} returned no record",
                record_id
            ))),
        }
    }

    async fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<(), DnsError> {
        let result = self
            .api_request::<Value>(
                Method::DELETE,
                &format!("/zones/{}/dns_records/{}", zone_id, record_id),
                None,
            )
            .await;

        match result {
            Ok(_) => {
                info!("Deleted DNS record {}", record_id);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("DNS record {} already absent", record_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn get_record(
        &self,
        zone_id: &str,
        record_id: &str,
    ) -> Result<Option<DnsRecordRef>, DnsError> {
        let result = self
            .api_request::<CfRecord>(
                Method::GET,
                &format!("/zones/{}/dns_records/{}", zone_id, record_id),
                None,
            )
            .await;

        match result {
            Ok(record) => Ok(record.map(|r| self.to_ref(zone_id, r))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn check_subdomain_availability(&self, subdomain: &str) -> Result<bool, DnsError> {
        let fqdn = self.subdomain_fqdn(subdomain);
        let records = self.list_records(&self.zone_id, &fqdn, None).await?;
        let taken = records.iter().any(|r| same_host(&r.name, &fqdn));
        if taken {
            debug!(
                "{} already has {} record(s) at the provider",
                fqdn,
                records.len()
            );
        }
        Ok(!taken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CF_RECORD_NOT_FOUND;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings() -> DnsSettings {
        DnsSettings {
            api_token: "cf-token".to_string(),
            zone_id: "zone-1".to_string(),
            parent_domain: "sites.example.net".to_string(),
            edge_target: "edge.example.net".to_string(),
            ..Default::default()
        }
    }

    async fn create_mock_controller(mock_server: &MockServer) -> CloudflareDnsController {
        CloudflareDnsController::with_base_url(&settings(), mock_server.uri()).unwrap()
    }

    fn ok(result: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "errors": [],
            "messages": [],
            "result": result,
        }))
    }

    fn cf_error(status: u16, code: i64, message: &str) -> ResponseTemplate {
        ResponseTemplate::new(status).set_body_json(json!({
            "success": false,
            "errors": [{"code": code, "message": message}],
            "messages": [],
            "result": null,
        }))
    }

    fn record(id: &str, name: &str, content: &str, proxied: bool) -> Value {
        json!({
            "id": id,
            "type": "CNAME",
            "name": name,
            "content": content,
            "proxied": proxied,
            "ttl": 1,
        })
    }

    #[test]
    fn test_requires_token_and_zone() {
        let mut s = settings();
        s.api_token.clear();
        assert!(matches!(
            CloudflareDnsController::new(&s),
            Err(DnsError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_create_subdomain_record() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/zones/zone-1/dns_records"))
            .and(query_param("name", "acme.sites.example.net"))
            .and(query_param("type", "CNAME"))
            .respond_with(ok(json!([])))
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/zones/zone-1/dns_records"))
            .and(header("Authorization", "Bearer cf-token"))
            .and(body_partial_json(json!({
                "type": "CNAME",
                "name": "acme.sites.example.net",
                "content": "edge.example.net",
                "proxied": false,
            })))
            .respond_with(ok(record("rec-1", "acme.sites.example.net", "edge.example.net", false)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let controller = create_mock_controller(&mock_server).await;
        let created = controller
            .create_subdomain_record("acme", false)
            .await
            .unwrap();

        assert_eq!(created.record_id, "rec-1");
        assert_eq!(created.zone_id, "zone-1");
        assert!(!created.proxied);
    }

    #[tokio::test]
    async fn test_create_is_exists_tolerant_for_identical_target() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/zones/zone-1/dns_records"))
            .respond_with(ok(json!([record(
                "rec-existing",
                "acme.sites.example.net",
                "edge.example.net.",
                false
            )])))
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .respond_with(ok(json!({})))
            .expect(0)
            .mount(&mock_server)
            .await;

        let controller = create_mock_controller(&mock_server).await;
        let created = controller
            .create_subdomain_record("acme", false)
            .await
            .unwrap();
        assert_eq!(created.record_id, "rec-existing");
    }

    #[tokio::test]
    async fn test_create_conflicts_on_different_target() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/zones/zone-1/dns_records"))
            .respond_with(ok(json!([record(
                "rec-other",
                "acme.sites.example.net",
                "somewhere.else.com",
                true
            )])))
            .mount(&mock_server)
            .await;

        let controller = create_mock_controller(&mock_server).await;
        let err = controller
            .create_subdomain_record("acme", false)
            .await
            .unwrap_err();
        assert!(matches!(err, DnsError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_create_race_relists_once() {
        let mock_server = MockServer::start().await;

        // First listing sees nothing, the second sees the winner's record
        Mock::given(method("GET"))
            .and(path("/zones/zone-1/dns_records"))
            .respond_with(ok(json!([])))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/zones/zone-1/dns_records"))
            .respond_with(ok(json!([record(
                "rec-winner",
                "acme.sites.example.net",
                "edge.example.net",
                false
            )])))
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/zones/zone-1/dns_records"))
            .respond_with(cf_error(400, 81057, "Record already exists."))
            .mount(&mock_server)
            .await;

        let controller = create_mock_controller(&mock_server).await;
        let created = controller
            .create_subdomain_record("acme", false)
            .await
            .unwrap();
        assert_eq!(created.record_id, "rec-winner");
    }

    #[tokio::test]
    async fn test_create_domain_record_walks_to_zone() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/zones"))
            .and(query_param("name", "shop.customer.io"))
            .respond_with(ok(json!([])))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/zones"))
            .and(query_param("name", "customer.io"))
            .respond_with(ok(json!([{"id": "zone-cust", "name": "customer.io"}])))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/zones/zone-cust/dns_records"))
            .respond_with(ok(json!([])))
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/zones/zone-cust/dns_records"))
            .respond_with(ok(record("rec-c", "shop.customer.io", "edge.example.net", false)))
            .mount(&mock_server)
            .await;

        let controller = create_mock_controller(&mock_server).await;
        let created = controller
            .create_domain_record("shop.customer.io", false)
            .await
            .unwrap();
        assert_eq!(created.zone_id, "zone-cust");
        assert_eq!(created.record_id, "rec-c");
    }

    #[tokio::test]
    async fn test_create_domain_record_without_zone() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/zones"))
            .respond_with(ok(json!([])))
            .mount(&mock_server)
            .await;

        let controller = create_mock_controller(&mock_server).await;
        let err = controller
            .create_domain_record("unknown.org", false)
            .await
            .unwrap_err();
        assert!(matches!(err, DnsError::ZoneNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_record() {
        let mock_server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/zones/zone-1/dns_records/rec-1"))
            .respond_with(ok(json!({"id": "rec-1"})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let controller = create_mock_controller(&mock_server).await;
        controller.delete_record("zone-1", "rec-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_absent_record_is_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/zones/zone-1/dns_records/gone"))
            .respond_with(cf_error(404, CF_RECORD_NOT_FOUND, "Record does not exist."))
            .mount(&mock_server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/zones/zone-1/dns_records/gone-400"))
            .respond_with(cf_error(400, CF_RECORD_NOT_FOUND, "Record does not exist."))
            .mount(&mock_server)
            .await;

        let controller = create_mock_controller(&mock_server).await;
        controller.delete_record("zone-1", "gone").await.unwrap();
        controller.delete_record("zone-1", "gone-400").await.unwrap();
        // Second delete of the same record is still fine
        controller.delete_record("zone-1", "gone").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_server_error_propagates() {
        let mock_server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .respond_with(cf_error(500, 10000, "Internal error"))
            .mount(&mock_server)
            .await;

        let controller = create_mock_controller(&mock_server).await;
        let err = controller.delete_record("zone-1", "rec-1").await.unwrap_err();
        assert!(matches!(err, DnsError::Api { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_rate_limit_is_typed() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&mock_server)
            .await;

        let controller = create_mock_controller(&mock_server).await;
        let err = controller
            .check_subdomain_availability("acme")
            .await
            .unwrap_err();
        assert!(matches!(err, DnsError::RateLimited(_)));
    }

    #[tokio::test]
    async fn test_update_proxy_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PATCH"))
            .and(path("/zones/zone-1/dns_records/rec-1"))
            .and(body_partial_json(json!({"proxied": true})))
            .respond_with(ok(record("rec-1", "acme.sites.example.net", "edge.example.net", true)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let controller = create_mock_controller(&mock_server).await;
        controller
            .update_proxy_status("zone-1", "rec-1", true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_get_record_absent() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/zones/zone-1/dns_records/rec-9"))
            .respond_with(cf_error(404, 81044, "Record does not exist."))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/zones/zone-1/dns_records/rec-1"))
            .respond_with(ok(record("rec-1", "acme.sites.example.net", "edge.example.net", false)))
            .mount(&mock_server)
            .await;

        let controller = create_mock_controller(&mock_server).await;
        assert!(controller.get_record("zone-1", "rec-9").await.unwrap().is_none());
        let found = controller.get_record("zone-1", "rec-1").await.unwrap().unwrap();
        assert_eq!(found.name, "acme.sites.example.net");
    }

    #[tokio::test]
    async fn test_check_subdomain_availability() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/zones/zone-1/dns_records"))
            .and(query_param("name", "taken.sites.example.net"))
            .respond_with(ok(json!([{
                "id": "a-1",
                "type": "A",
                "name": "taken.sites.example.net",
                "content": "192.0.2.10",
                "proxied": false
            }])))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/zones/zone-1/dns_records"))
            .and(query_param("name", "fresh.sites.example.net"))
            .respond_with(ok(json!([])))
            .mount(&mock_server)
            .await;

        let controller = create_mock_controller(&mock_server).await;
        assert!(!controller.check_subdomain_availability("taken").await.unwrap());
        assert!(controller.check_subdomain_availability("fresh").await.unwrap());
    }
}
