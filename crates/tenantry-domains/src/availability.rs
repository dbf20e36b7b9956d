//! Subdomain availability checks
//!
//! A pure read: format, reserved words, local uniqueness and a live lookup
//! at the DNS provider. It does not reserve anything; the UNIQUE constraint
//! on `tenants.domain` settles races between check and create.

use regex::Regex;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Display;
use std::sync::Arc;
use tenantry_database::DbConnection;
use tenantry_dns::DnsController;
use tenantry_entities::{domain_records, tenants};
use tracing::debug;
use utoipa::ToSchema;

use crate::errors::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    InvalidFormat,
    Reserved,
    TakenLocally,
    TakenRemotely,
}

impl UnavailableReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnavailableReason::InvalidFormat => "invalid_format",
            UnavailableReason::Reserved => "reserved",
            UnavailableReason::TakenLocally => "taken_locally",
            UnavailableReason::TakenRemotely => "taken_remotely",
        }
    }
}

impl Display for UnavailableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityResult {
    /// Normalized candidate label.
    pub subdomain: String,
    /// Fully qualified name the label would get.
    pub domain: String,
    pub available: bool,
    pub reason: Option<UnavailableReason>,
}

pub struct DomainAvailabilityChecker {
    db: Arc<DbConnection>,
    dns: Arc<dyn DnsController>,
    reserved: HashSet<String>,
    pattern: Regex,
}

impl DomainAvailabilityChecker {
    pub fn new(
        db: Arc<DbConnection>,
        dns: Arc<dyn DnsController>,
        reserved: &[String],
    ) -> Result<Self, DomainError> {
        let pattern = Regex::new(r"^[a-z0-9-]{3,63}$")
            .map_err(|e| DomainError::Internal(format!("invalid subdomain pattern: {}", e)))?;

        Ok(Self {
            db,
            dns,
            reserved: reserved.iter().map(|s| s.trim().to_lowercase()).collect(),
            pattern,
        })
    }

    pub fn normalize(candidate: &str) -> String {
        candidate.trim().to_lowercase()
    }

    /// Format and reserved-word checks. No I/O.
    pub fn validate(&self, candidate: &str) -> Result<String, UnavailableReason> {
        let subdomain = Self::normalize(candidate);

        // A DNS label may not start or end with a hyphen
        if !self.pattern.is_match(&subdomain)
            || subdomain.starts_with('-')
            || subdomain.ends_with('-')
        {
            return Err(UnavailableReason::InvalidFormat);
        }
        if self.reserved.contains(&subdomain) {
            return Err(UnavailableReason::Reserved);
        }
        Ok(subdomain)
    }

    /// Any tenant (soft-deleted ones included) or domain record holding `domain`.
    pub async fn is_taken_locally(&self, domain: &str) -> Result<bool, DomainError> {
        let tenants = tenants::Entity::find()
            .filter(tenants::Column::Domain.eq(domain))
            .count(self.db.as_ref())
            .await?;
        if tenants > 0 {
            return Ok(true);
        }

        let records = domain_records::Entity::find()
            .filter(domain_records::Column::Domain.eq(domain))
            .count(self.db.as_ref())
            .await?;
        Ok(records > 0)
    }

    pub async fn check(&self, candidate: &str) -> Result<AvailabilityResult, DomainError> {
        let normalized = Self::normalize(candidate);
        let unavailable = |subdomain: String, domain: String, reason| AvailabilityResult {
            subdomain,
            domain,
            available: false,
            reason: Some(reason),
        };

        let subdomain = match self.validate(candidate) {
            Ok(subdomain) => subdomain,
            Err(reason) => {
                debug!("Subdomain '{}' rejected: {}", normalized, reason);
                let domain = self.dns.subdomain_fqdn(&normalized);
                return Ok(unavailable(normalized, domain, reason));
            }
        };
        let domain = self.dns.subdomain_fqdn(&subdomain);

        if self.is_taken_locally(&domain).await? {
            return Ok(unavailable(subdomain, domain, UnavailableReason::TakenLocally));
        }

        if !self.dns.check_subdomain_availability(&subdomain).await? {
            debug!("{} exists at the DNS provider but not locally", domain);
            return Ok(unavailable(subdomain, domain, UnavailableReason::TakenRemotely));
        }

        Ok(AvailabilityResult {
            subdomain,
            domain,
            available: true,
            reason: None,
        })
    }
}
