//! Live nameserver resolution for delegation checks

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::proto::rr::RecordType;
use hickory_resolver::TokioAsyncResolver;
use std::collections::BTreeSet;
use tracing::debug;

use crate::errors::DnsError;

#[async_trait]
pub trait NameserverResolver: Send + Sync {
    /// Authoritative nameservers currently published for `domain`, normalized.
    /// An empty list means the lookup returned no NS records.
    async fn lookup_nameservers(&self, domain: &str) -> Result<Vec<String>, DnsError>;
}

/// Lower-case and strip the trailing root dot.
pub fn normalize_nameserver(ns: &str) -> String {
    ns.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Order-insensitive comparison of live and expected nameservers. An empty
/// expectation never matches.
pub fn nameservers_match(live: &[String], target: &[String]) -> bool {
    if target.is_empty() {
        return false;
    }
    let live: BTreeSet<String> = live.iter().map(|ns| normalize_nameserver(ns)).collect();
    let target: BTreeSet<String> = target.iter().map(|ns| normalize_nameserver(ns)).collect();
    live == target
}

/// Resolver backed by public recursive DNS.
pub struct HickoryNameserverResolver {
    resolver: TokioAsyncResolver,
}

impl Default for HickoryNameserverResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl HickoryNameserverResolver {
    pub fn new() -> Self {
        let mut options = ResolverOpts::default();
        options.try_tcp_on_error = true;
        options.use_hosts_file = false;
        // Delegation changes must be observed as soon as they propagate
        options.cache_size = 0;

        let resolver = TokioAsyncResolver::tokio(ResolverConfig::cloudflare(), options);

        Self { resolver }
    }
}

#[async_trait]
impl NameserverResolver for HickoryNameserverResolver {
    async fn lookup_nameservers(&self, domain: &str) -> Result<Vec<String>, DnsError> {
        debug!("Looking up NS records for {}", domain);

        match self.resolver.lookup(domain, RecordType::NS).await {
            Ok(lookup) => {
                let nameservers: Vec<String> = lookup
                    .iter()
                    .filter_map(|record| record.as_ns())
                    .map(|ns| normalize_nameserver(&ns.to_string()))
                    .collect();
                debug!("NS for {}: {:?}", domain, nameservers);
                Ok(nameservers)
            }
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => {
                    debug!("No NS records for {}", domain);
                    Ok(Vec::new())
                }
                _ => Err(DnsError::Resolution(format!("{}: {}", domain, e))),
            },
        }
    }
}
