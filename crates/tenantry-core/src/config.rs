//! Platform configuration
//!
//! All settings carry sensible defaults; the CLI overlays flags and
//! `TENANTRY_*` environment variables on top.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Subdomains operated by the platform itself and never handed to tenants.
pub const DEFAULT_RESERVED_SUBDOMAINS: &[&str] = &[
    "www", "api", "app", "admin", "mail", "smtp", "imap", "pop", "ftp", "ns1", "ns2", "dns",
    "cdn", "static", "assets", "media", "status", "blog", "help", "support", "docs", "dashboard",
    "billing", "login", "auth", "sso", "account", "accounts", "root", "system", "staging", "dev",
    "test", "demo", "portal", "webmail",
];

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PlatformConfig {
    pub dns: DnsSettings,
    pub proxy: ProxySettings,
    /// `None` selects the null registrar: custom domains must then be
    /// delegated by the customer at their own registrar.
    pub registrar: Option<RegistrarSettings>,
    pub provisioning: ProvisioningSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsSettings {
    pub api_base_url: String,
    pub api_token: String,
    /// Zone holding the platform's parent domain.
    pub zone_id: String,
    /// Parent domain free subdomains are created under, e.g. `sites.example.net`.
    pub parent_domain: String,
    /// CNAME target every tenant record points at.
    pub edge_target: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub admin_url: String,
    pub server_name: String,
    /// Address the reverse proxy dials for tenant traffic.
    pub upstream: String,
    pub timeout_secs: u64,
    pub probe_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrarSettings {
    pub api_base_url: String,
    pub api_token: String,
    /// Re-apply the transfer lock after a nameserver update that needed an unlock.
    pub relock_after_update: bool,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningSettings {
    pub reserved_subdomains: Vec<String>,
    /// Nameservers custom domains must delegate to.
    pub target_nameservers: Vec<String>,
    pub include_www: bool,
    /// Switch DNS records to proxied once the certificate is observed valid.
    pub proxied_after_issuance: bool,
    /// Non-terminal records untouched for this long are re-derived from live state.
    pub stale_after_secs: u64,
    pub reconcile_interval_secs: u64,
    pub error_log_cap: usize,
}

impl Default for DnsSettings {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.cloudflare.com/client/v4".to_string(),
            api_token: String::new(),
            zone_id: String::new(),
            parent_domain: "localho.st".to_string(),
            edge_target: "edge.localho.st".to_string(),
            timeout_secs: 10,
        }
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            admin_url: "http://localhost:2019".to_string(),
            server_name: "srv0".to_string(),
            upstream: "localhost:8080".to_string(),
            timeout_secs: 10,
            probe_timeout_secs: 5,
        }
    }
}

impl Default for RegistrarSettings {
    fn default() -> Self {
        Self {
            api_base_url: String::new(),
            api_token: String::new(),
            relock_after_update: true,
            timeout_secs: 10,
        }
    }
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            reserved_subdomains: DEFAULT_RESERVED_SUBDOMAINS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            target_nameservers: Vec::new(),
            include_www: true,
            proxied_after_issuance: false,
            stale_after_secs: 15 * 60,
            reconcile_interval_secs: 5 * 60,
            error_log_cap: 50,
        }
    }
}

impl DnsSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ProxySettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl RegistrarSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ProvisioningSettings {
    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_secs as i64)
    }

    pub fn reconcile_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reconcile_interval_secs as i64)
    }
}
