use crate::{ProvisioningOrchestrator, ReconciliationScheduler, UnavailableReason};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tenantry_entities::domain_records;
use tenantry_entities::types::{DomainStatus, ErrorLogEntry};

use utoipa::ToSchema;

pub struct DomainAppState {
    pub orchestrator: Arc<ProvisioningOrchestrator>,
    pub scheduler: Arc<ReconciliationScheduler>,
    /// Bearer token required on mutating endpoints. `None` leaves them open.
    pub api_token: Option<String>,
}

pub fn create_domain_app_state(
    orchestrator: Arc<ProvisioningOrchestrator>,
    scheduler: Arc<ReconciliationScheduler>,
    api_token: Option<String>,
) -> Arc<DomainAppState> {
    Arc::new(DomainAppState {
        orchestrator,
        scheduler,
        api_token: api_token.filter(|token| !token.is_empty()),
    })
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct CreateFreeTenantRequest {
    pub subdomain: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_password: String,
    #[serde(default)]
    pub send_welcome_email: bool,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct CreateFreeTenantResponse {
    pub success: bool,
    pub domain: String,
    pub tenant_id: i32,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct CheckAvailabilityRequest {
    pub subdomain: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct CheckAvailabilityResponse {
    pub success: bool,
    pub subdomain: String,
    pub domain: String,
    pub available: bool,
    pub reason: Option<UnavailableReason>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct DeleteSecureRequest {
    pub password: String,
    /// Also remove the DNS record at the provider. Defaults to true.
    #[serde(rename = "deleteFromCloudflare", default = "default_delete_from_dns")]
    pub delete_from_cloudflare: bool,
}

fn default_delete_from_dns() -> bool {
    true
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct DeleteSecureResponse {
    pub success: bool,
    pub message: String,
    pub dns_cleanup_failed: bool,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct PurgeRequest {
    pub password: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct TenantStatusResponse {
    pub success: bool,
    pub domain: String,
    pub caddy_status: DomainStatus,
    pub route_exists: bool,
    pub domain_responds: bool,
    pub ssl_valid: bool,
    pub http_code: Option<u16>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct CustomDomainBody {
    pub domain: String,
    /// Registrar handle for domains bought through the platform.
    pub registrar_domain_id: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct CustomDomainResponse {
    pub success: bool,
    pub domain: String,
    pub status: DomainStatus,
    pub target_nameservers: Vec<String>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct DomainRecordResponse {
    pub id: i32,
    pub domain: String,
    pub is_subdomain: bool,
    pub status: DomainStatus,
    pub registrar_domain_id: Option<String>,
    pub cloudflare_zone_id: Option<String>,
    pub cloudflare_record_id: Option<String>,
    pub cloudflare_proxied: bool,
    pub caddy_route_id: Option<String>,
    pub target_nameservers: Vec<String>,
    pub last_verified_at: Option<i64>,
    pub error_log: Vec<ErrorLogEntry>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<domain_records::Model> for DomainRecordResponse {
    fn from(record: domain_records::Model) -> Self {
        let target_nameservers = record.target_nameservers();
        let error_log = record.error_entries();
        Self {
            id: record.id,
            domain: record.domain,
            is_subdomain: record.is_subdomain,
            status: record.status,
            registrar_domain_id: record.registrar_domain_id,
            cloudflare_zone_id: record.cloudflare_zone_id,
            cloudflare_record_id: record.cloudflare_record_id,
            cloudflare_proxied: record.cloudflare_proxied,
            caddy_route_id: record.caddy_route_id,
            target_nameservers,
            last_verified_at: record.last_verified_at.map(|t| t.timestamp_millis()),
            error_log,
            created_at: record.created_at.timestamp_millis(),
            updated_at: record.updated_at.timestamp_millis(),
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct TenantRecordsResponse {
    pub success: bool,
    pub tenant_id: i32,
    pub domain: String,
    pub is_deleted: bool,
    pub records: Vec<DomainRecordResponse>,
}
