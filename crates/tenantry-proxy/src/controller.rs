//! Reverse proxy controller trait

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ProxyError;

/// The route a domain should have, as persisted locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredRoute {
    pub domain: String,
    pub include_www: bool,
}

/// Live diagnostic snapshot for one domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyStatus {
    pub route_exists: bool,
    pub domain_responds: bool,
    pub ssl_valid: bool,
    pub http_code: Option<u16>,
}

/// Deterministic route id: `shop.example.com` -> `tenant-shop-example-com`,
/// `my-shop.example.com` -> `tenant-my--shop-example-com`.
///
/// Hyphens are doubled before dots become hyphens. Host labels never begin
/// or end with a hyphen, so a single `-` always marks a label boundary and
/// two domains never share an id.
pub fn route_id_for_domain(domain: &str) -> String {
    let host = domain.trim_end_matches('.').to_ascii_lowercase();
    format!("tenant-{}", host.replace('-', "--").replace('.', "-"))
}

/// Labels must be 1-63 characters of `a-z0-9-` without a leading or
/// trailing hyphen. `route_id_for_domain` relies on this.
pub fn is_routable_host(host: &str) -> bool {
    !host.is_empty()
        && host.len() <= 253
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        })
}

#[async_trait]
pub trait ProxyController: Send + Sync {
    /// Insert or replace the host-matched route for `domain`. Returns the
    /// route id.
    async fn add_domain(&self, domain: &str, include_www: bool) -> Result<String, ProxyError>;

    /// Removing a route that does not exist succeeds.
    async fn remove_domain(&self, route_id: &str) -> Result<(), ProxyError>;

    /// Re-apply a persisted route. Repeated calls leave exactly one route.
    async fn reconfigure(&self, route: &DesiredRoute) -> Result<String, ProxyError>;

    /// Follow-up read against the live configuration.
    async fn route_exists(&self, route_id: &str) -> Result<bool, ProxyError>;

    /// Read-only: route presence plus a live HTTPS probe. Never mutates.
    async fn status(&self, domain: &str) -> Result<ProxyStatus, ProxyError>;
}
