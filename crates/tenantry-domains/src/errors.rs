//! Orchestrator error kinds

use sea_orm::{DbErr, SqlErr};
use tenantry_dns::DnsError;
use tenantry_entities::types::DomainStatus;
use tenantry_proxy::ProxyError;
use tenantry_registrar::RegistrarError;
use thiserror::Error;

use crate::availability::UnavailableReason;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{domain} is not available ({reason})")]
    AvailabilityConflict {
        domain: String,
        reason: UnavailableReason,
    },

    /// Nameserver change blocked by a registrar lock or a non-`ACT` status.
    #[error("Registrar refused the change: {0}")]
    RegistrarLock(String),

    #[error("Registrar error: {0}")]
    Registrar(RegistrarError),

    #[error("DNS provider error: {0}")]
    DnsProvider(#[from] DnsError),

    #[error("Reverse proxy error: {0}")]
    ProxyConfig(#[from] ProxyError),

    #[error("Invalid credentials")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: DomainStatus, to: DomainStatus },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<RegistrarError> for DomainError {
    fn from(error: RegistrarError) -> Self {
        match error {
            RegistrarError::Locked(id) => {
                DomainError::RegistrarLock(format!("domain {} is locked", id))
            }
            other => DomainError::Registrar(other),
        }
    }
}

impl DomainError {
    /// Short machine-readable code included in error envelopes.
    pub fn error_code(&self) -> &'static str {
        match self {
            DomainError::Validation(_) => "VALIDATION_ERROR",
            DomainError::AvailabilityConflict { .. } => "AVAILABILITY_CONFLICT",
            DomainError::RegistrarLock(_) => "REGISTRAR_LOCK_ERROR",
            DomainError::Registrar(_) => "REGISTRAR_ERROR",
            DomainError::DnsProvider(_) => "DNS_PROVIDER_ERROR",
            DomainError::ProxyConfig(_) => "PROXY_CONFIG_ERROR",
            DomainError::Unauthorized => "UNAUTHORIZED",
            DomainError::NotFound(_) => "NOT_FOUND",
            DomainError::InvalidTransition { .. } => "INVALID_TRANSITION",
            DomainError::InvalidState(_) => "INVALID_STATE",
            DomainError::Database(_) => "DATABASE_ERROR",
            DomainError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True when a write lost against a UNIQUE constraint.
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            DomainError::Database(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
        )
    }
}
