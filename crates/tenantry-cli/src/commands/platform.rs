//! Settings shared by every command and the wiring of the control planes

use clap::Args;
use std::sync::Arc;
use tenantry_audit::AuditService;
use tenantry_core::{
    DnsSettings, NoopMailer, PlatformConfig, ProvisioningSettings, ProxySettings,
    RegistrarSettings, DEFAULT_RESERVED_SUBDOMAINS,
};
use tenantry_dns::{CloudflareDnsController, HickoryNameserverResolver};
use tenantry_domains::{ControlPlanes, ProvisioningOrchestrator, ReconciliationScheduler};
use tenantry_proxy::CaddyProxyController;
use tenantry_registrar::create_registrar_client;
use tracing::{debug, info};

#[derive(Args, Debug, Clone)]
pub struct PlatformArgs {
    /// Database connection URL
    #[arg(long, env = "TENANTRY_DATABASE_URL")]
    pub database_url: String,

    /// DNS provider API base URL
    #[arg(
        long,
        default_value = "https://api.cloudflare.com/client/v4",
        env = "TENANTRY_DNS_API_URL"
    )]
    pub dns_api_url: String,

    /// DNS provider API token
    #[arg(long, env = "TENANTRY_DNS_API_TOKEN", hide_env_values = true)]
    pub dns_api_token: String,

    /// Zone holding the platform's parent domain
    #[arg(long, env = "TENANTRY_DNS_ZONE_ID")]
    pub dns_zone_id: String,

    /// Parent domain free subdomains are created under
    #[arg(long, env = "TENANTRY_PARENT_DOMAIN")]
    pub parent_domain: String,

    /// CNAME target for every tenant record
    #[arg(long, env = "TENANTRY_EDGE_TARGET")]
    pub edge_target: String,

    /// Reverse proxy admin API URL
    #[arg(long, default_value = "http://localhost:2019", env = "TENANTRY_PROXY_ADMIN_URL")]
    pub proxy_admin_url: String,

    /// Reverse proxy server block routes are added to
    #[arg(long, default_value = "srv0", env = "TENANTRY_PROXY_SERVER")]
    pub proxy_server: String,

    /// Upstream the tenant routes proxy to
    #[arg(long, default_value = "localhost:8080", env = "TENANTRY_PROXY_UPSTREAM")]
    pub proxy_upstream: String,

    /// Registrar API URL. Leave unset to disable registrar-managed domains
    #[arg(long, env = "TENANTRY_REGISTRAR_URL")]
    pub registrar_url: Option<String>,

    /// Registrar API token
    #[arg(long, env = "TENANTRY_REGISTRAR_TOKEN", hide_env_values = true, default_value = "")]
    pub registrar_token: String,

    /// Leave registrar domains unlocked after a nameserver update
    #[arg(long, env = "TENANTRY_REGISTRAR_NO_RELOCK")]
    pub registrar_no_relock: bool,

    /// Subdomains nobody may claim (comma separated). Defaults to the built-in list
    #[arg(long, env = "TENANTRY_RESERVED_SUBDOMAINS", value_delimiter = ',')]
    pub reserved_subdomains: Vec<String>,

    /// Nameservers custom domains must delegate to (comma separated)
    #[arg(long, env = "TENANTRY_TARGET_NAMESERVERS", value_delimiter = ',')]
    pub target_nameservers: Vec<String>,

    /// Do not route the www. variant of each domain
    #[arg(long, env = "TENANTRY_NO_WWW")]
    pub no_www: bool,

    /// Turn on the DNS provider proxy once a certificate is valid
    #[arg(long, env = "TENANTRY_PROXIED_AFTER_ISSUANCE")]
    pub proxied_after_issuance: bool,

    /// Seconds before an unfinished record is treated as stalled
    #[arg(long, default_value_t = 900, env = "TENANTRY_STALE_AFTER_SECS")]
    pub stale_after_secs: u64,

    /// Minimum seconds between reconciliation passes
    #[arg(long, default_value_t = 300, env = "TENANTRY_RECONCILE_INTERVAL_SECS")]
    pub reconcile_interval_secs: u64,

    /// Error log entries kept per domain record
    #[arg(long, default_value_t = 50, env = "TENANTRY_ERROR_LOG_CAP")]
    pub error_log_cap: usize,

    /// Timeout for DNS, proxy and registrar calls in seconds
    #[arg(long, default_value_t = 10, env = "TENANTRY_TIMEOUT_SECS")]
    pub timeout_secs: u64,

    /// Timeout for the HTTPS status probe in seconds
    #[arg(long, default_value_t = 5, env = "TENANTRY_PROBE_TIMEOUT_SECS")]
    pub probe_timeout_secs: u64,
}

impl PlatformArgs {
    pub fn to_config(&self) -> PlatformConfig {
        let reserved_subdomains = if self.reserved_subdomains.is_empty() {
            DEFAULT_RESERVED_SUBDOMAINS
                .iter()
                .map(|s| s.to_string())
                .collect()
        } else {
            self.reserved_subdomains.clone()
        };

        let registrar = self
            .registrar_url
            .as_ref()
            .filter(|url| !url.is_empty())
            .map(|url| RegistrarSettings {
                api_base_url: url.clone(),
                api_token: self.registrar_token.clone(),
                relock_after_update: !self.registrar_no_relock,
                timeout_secs: self.timeout_secs,
            });

        PlatformConfig {
            dns: DnsSettings {
                api_base_url: self.dns_api_url.clone(),
                api_token: self.dns_api_token.clone(),
                zone_id: self.dns_zone_id.clone(),
                parent_domain: self.parent_domain.trim().to_lowercase(),
                edge_target: self.edge_target.clone(),
                timeout_secs: self.timeout_secs,
            },
            proxy: ProxySettings {
                admin_url: self.proxy_admin_url.clone(),
                server_name: self.proxy_server.clone(),
                upstream: self.proxy_upstream.clone(),
                timeout_secs: self.timeout_secs,
                probe_timeout_secs: self.probe_timeout_secs,
            },
            registrar,
            provisioning: ProvisioningSettings {
                reserved_subdomains,
                target_nameservers: self
                    .target_nameservers
                    .iter()
                    .map(|ns| ns.trim().to_string())
                    .filter(|ns| !ns.is_empty())
                    .collect(),
                include_www: !self.no_www,
                proxied_after_issuance: self.proxied_after_issuance,
                stale_after_secs: self.stale_after_secs,
                reconcile_interval_secs: self.reconcile_interval_secs,
                error_log_cap: self.error_log_cap,
            },
        }
    }
}

/// Everything a command needs, built once per process.
pub struct Platform {
    pub orchestrator: Arc<ProvisioningOrchestrator>,
    pub scheduler: Arc<ReconciliationScheduler>,
}

impl Platform {
    pub async fn connect(args: &PlatformArgs) -> anyhow::Result<Self> {
        let config = args.to_config();

        debug!("Initializing database connection...");
        let db = tenantry_database::establish_connection(&args.database_url).await?;

        let planes = ControlPlanes {
            dns: Arc::new(CloudflareDnsController::new(&config.dns)?),
            proxy: Arc::new(CaddyProxyController::new(&config.proxy)?),
            registrar: create_registrar_client(config.registrar.as_ref())?,
            resolver: Arc::new(HickoryNameserverResolver::new()),
        };

        let orchestrator = Arc::new(ProvisioningOrchestrator::new(
            db.clone(),
            planes,
            Arc::new(AuditService::new(db.clone())),
            Arc::new(NoopMailer),
            &config,
        )?);
        let scheduler = Arc::new(ReconciliationScheduler::new(
            db.clone(),
            orchestrator.clone(),
        ));

        info!(
            "Platform ready for *.{} (registrar {})",
            config.dns.parent_domain,
            if config.registrar.is_some() {
                "enabled"
            } else {
                "disabled"
            }
        );

        Ok(Self {
            orchestrator,
            scheduler,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        platform: PlatformArgs,
    }

    fn parse(extra: &[&str]) -> PlatformArgs {
        let mut args = vec![
            "tenantry",
            "--database-url",
            "sqlite::memory:",
            "--dns-api-token",
            "cf-token",
            "--dns-zone-id",
            "zone-1",
            "--parent-domain",
            "Sites.Example.net",
            "--edge-target",
            "edge.example.net",
        ];
        args.extend_from_slice(extra);
        TestCli::try_parse_from(args).unwrap().platform
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]).to_config();

        assert_eq!(config.dns.parent_domain, "sites.example.net");
        assert_eq!(config.proxy.admin_url, "http://localhost:2019");
        assert_eq!(config.proxy.timeout_secs, 10);
        assert_eq!(config.proxy.probe_timeout_secs, 5);
        assert!(config.registrar.is_none());
        assert!(config.provisioning.include_www);
        assert!(!config.provisioning.proxied_after_issuance);
        assert_eq!(
            config.provisioning.reserved_subdomains.len(),
            DEFAULT_RESERVED_SUBDOMAINS.len()
        );
    }

    #[test]
    fn test_lists_and_registrar() {
        let config = parse(&[
            "--target-nameservers",
            "ns1.tenantry.net, ns2.tenantry.net",
            "--reserved-subdomains",
            "admin,billing",
            "--registrar-url",
            "https://registrar.example.com",
            "--registrar-no-relock",
            "--no-www",
        ])
        .to_config();

        assert_eq!(
            config.provisioning.target_nameservers,
            vec!["ns1.tenantry.net".to_string(), "ns2.tenantry.net".to_string()]
        );
        assert_eq!(
            config.provisioning.reserved_subdomains,
            vec!["admin".to_string(), "billing".to_string()]
        );
        let registrar = config.registrar.unwrap();
        assert!(!registrar.relock_after_update);
        assert!(!config.provisioning.include_www);
    }
}
