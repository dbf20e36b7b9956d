//! Audit event names written by the orchestrator and scheduler.

pub const TENANT_PROVISIONED: &str = "TENANT_PROVISIONED";
pub const DOMAIN_ACTIVATED: &str = "DOMAIN_ACTIVATED";
pub const CUSTOM_DOMAIN_REQUESTED: &str = "CUSTOM_DOMAIN_REQUESTED";
pub const TENANT_DEPROVISIONED: &str = "TENANT_DEPROVISIONED";
pub const TENANT_RECONFIGURED: &str = "TENANT_RECONFIGURED";
pub const TENANT_PURGED: &str = "TENANT_PURGED";
pub const DOMAIN_DRIFT_DETECTED: &str = "DOMAIN_DRIFT_DETECTED";
