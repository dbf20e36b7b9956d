use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use tenantry_core::UtcDateTime;
use utoipa::ToSchema;

/// Lifecycle status of a domain record.
///
/// Free subdomains: `pending -> dns_configured -> proxy_configured -> active`.
/// Custom domains: `pending -> ns_pending -> ns_verified -> dns_configured -> ...`.
/// Either path ends in `deleting -> deleted`.
/// NOTE: Use db_type = "Text" for SQLite compatibility.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    DeriveActiveEnum,
    EnumIter,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum DomainStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "ns_pending")]
    NsPending,
    #[sea_orm(string_value = "ns_verified")]
    NsVerified,
    #[sea_orm(string_value = "dns_configured")]
    DnsConfigured,
    #[sea_orm(string_value = "proxy_configured")]
    ProxyConfigured,
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "deleting")]
    Deleting,
    #[sea_orm(string_value = "deleted")]
    Deleted,
}

impl Display for DomainStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl DomainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainStatus::Pending => "pending",
            DomainStatus::NsPending => "ns_pending",
            DomainStatus::NsVerified => "ns_verified",
            DomainStatus::DnsConfigured => "dns_configured",
            DomainStatus::ProxyConfigured => "proxy_configured",
            DomainStatus::Active => "active",
            DomainStatus::Deleting => "deleting",
            DomainStatus::Deleted => "deleted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DomainStatus::Pending),
            "ns_pending" => Some(DomainStatus::NsPending),
            "ns_verified" => Some(DomainStatus::NsVerified),
            "dns_configured" => Some(DomainStatus::DnsConfigured),
            "proxy_configured" => Some(DomainStatus::ProxyConfigured),
            "active" => Some(DomainStatus::Active),
            "deleting" => Some(DomainStatus::Deleting),
            "deleted" => Some(DomainStatus::Deleted),
            _ => None,
        }
    }

    /// Position on the provisioning ladder. Deletion states sort last.
    pub fn rank(&self) -> u8 {
        match self {
            DomainStatus::Pending => 0,
            DomainStatus::NsPending => 1,
            DomainStatus::NsVerified => 2,
            DomainStatus::DnsConfigured => 3,
            DomainStatus::ProxyConfigured => 4,
            DomainStatus::Active => 5,
            DomainStatus::Deleting => 6,
            DomainStatus::Deleted => 7,
        }
    }

    /// `active` and `deleted` are the only states the scheduler leaves alone.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DomainStatus::Active | DomainStatus::Deleted)
    }

    pub fn is_deletion(&self) -> bool {
        matches!(self, DomainStatus::Deleting | DomainStatus::Deleted)
    }
}

/// One entry in a domain record's forensic error log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorLogEntry {
    #[schema(value_type = String, format = DateTime)]
    pub at: UtcDateTime,
    pub step: String,
    pub message: String,
}
