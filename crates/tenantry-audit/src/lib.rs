//! Database-backed audit trail

mod audit_service;

pub use audit_service::AuditService;
