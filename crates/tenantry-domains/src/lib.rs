//! Domain provisioning and lifecycle orchestration
//!
//! Turns a request for a hosted site into a live, routable, TLS-secured
//! domain and tears it down again, keeping the DNS provider, the reverse
//! proxy, the registrar and local tenant state consistent across partial
//! failures.

pub mod availability;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod orchestrator;
pub mod passwords;
pub mod scheduler;
pub mod store;

#[cfg(test)]
pub(crate) mod test_utils;

pub use availability::{AvailabilityResult, DomainAvailabilityChecker, UnavailableReason};
pub use errors::DomainError;
pub use handlers::{
    configure_routes, create_domain_app_state, create_router, DomainAppState, DomainManagerApiDoc,
};
pub use orchestrator::{
    ControlPlanes, CustomDomainRequest, DeprovisionOutcome, FreeTenantRequest,
    ProvisionedTenant, ProvisioningOrchestrator, TenantRecords, TenantStatus,
};
pub use scheduler::{ReconcileReport, ReconciliationScheduler};
pub use store::DomainRecordStore;
