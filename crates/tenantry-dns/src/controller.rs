//! DNS controller trait

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::DnsError;

/// A CNAME record as the provider reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecordRef {
    pub zone_id: String,
    pub record_id: String,
    pub name: String,
    pub content: String,
    pub proxied: bool,
}

#[async_trait]
pub trait DnsController: Send + Sync {
    /// Fully qualified name of a platform subdomain.
    fn subdomain_fqdn(&self, subdomain: &str) -> String;

    /// Create `<subdomain>.<parent>` as a CNAME to the edge host in the
    /// platform zone. An existing CNAME with the same target is returned
    /// as-is.
    async fn create_subdomain_record(
        &self,
        subdomain: &str,
        proxied: bool,
    ) -> Result<DnsRecordRef, DnsError>;

    /// Create a CNAME for a customer-owned domain in the zone the provider
    /// holds for it. Same exists-tolerance as subdomains.
    async fn create_domain_record(
        &self,
        domain: &str,
        proxied: bool,
    ) -> Result<DnsRecordRef, DnsError>;

    async fn update_proxy_status(
        &self,
        zone_id: &str,
        record_id: &str,
        proxied: bool,
    ) -> Result<(), DnsError>;

    /// Deleting a record that is already gone succeeds.
    async fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<(), DnsError>;

    /// Follow-up read. `Ok(None)` when the record does not exist.
    async fn get_record(
        &self,
        zone_id: &str,
        record_id: &str,
    ) -> Result<Option<DnsRecordRef>, DnsError>;

    /// Read-only: true when no record of any type exists for the subdomain.
    async fn check_subdomain_availability(&self, subdomain: &str) -> Result<bool, DnsError>;
}
