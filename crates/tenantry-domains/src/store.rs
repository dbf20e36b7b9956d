//! Persisted domain records and their allowed transitions
//!
//! Every status change goes through [`DomainRecordStore::transition`], which
//! re-reads the row inside a transaction, rejects moves the lifecycle does not
//! allow and checks the correlation-id invariants before writing.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use std::sync::Arc;
use tenantry_core::UtcDateTime;
use tenantry_database::DbConnection;
use tenantry_entities::domain_records;
use tenantry_entities::types::{DomainStatus, ErrorLogEntry};
use tracing::{debug, warn};

use crate::errors::DomainError;

/// Whether the lifecycle allows `from -> to`. Re-writing the current status
/// (to update correlation fields) is always allowed outside `deleted`.
pub fn can_transition(from: DomainStatus, to: DomainStatus, is_subdomain: bool) -> bool {
    use DomainStatus::*;

    if from == to {
        return from != Deleted;
    }
    match (from, to) {
        (Pending, DnsConfigured) => is_subdomain,
        (Pending, NsPending) => !is_subdomain,
        (NsPending, NsVerified)
        | (NsVerified, DnsConfigured)
        | (DnsConfigured, ProxyConfigured)
        | (ProxyConfigured, Active) => true,
        (Deleting, Deleted) => true,
        (from, Deleting) => from != Deleted,
        _ => false,
    }
}

/// Correlation ids must track the ladder: a DNS record id from
/// `dns_configured` on, a route id from `proxy_configured` on, neither once
/// `deleted`. `deleting` may hold anything still being torn down.
fn check_invariants(
    status: DomainStatus,
    record_id: &Option<String>,
    route_id: &Option<String>,
) -> Result<(), DomainError> {
    match status {
        DomainStatus::Deleting => Ok(()),
        DomainStatus::Deleted => {
            if record_id.is_some() || route_id.is_some() {
                return Err(DomainError::InvalidState(
                    "deleted records cannot keep DNS or proxy ids".into(),
                ));
            }
            Ok(())
        }
        status => {
            let rank = status.rank();
            let needs_record = rank >= DomainStatus::DnsConfigured.rank();
            let needs_route = rank >= DomainStatus::ProxyConfigured.rank();
            if record_id.is_some() != needs_record {
                return Err(DomainError::InvalidState(format!(
                    "status {} {} a DNS record id",
                    status,
                    if needs_record { "requires" } else { "cannot have" }
                )));
            }
            if route_id.is_some() != needs_route {
                return Err(DomainError::InvalidState(format!(
                    "status {} {} a proxy route id",
                    status,
                    if needs_route { "requires" } else { "cannot have" }
                )));
            }
            Ok(())
        }
    }
}

/// A requested status change plus the correlation fields written with it.
#[derive(Debug, Clone)]
pub struct Transition {
    status: DomainStatus,
    zone_id: Option<String>,
    record_id: Option<Option<String>>,
    proxied: Option<bool>,
    route_id: Option<Option<String>>,
    verified: bool,
}

impl Transition {
    pub fn to(status: DomainStatus) -> Self {
        Self {
            status,
            zone_id: None,
            record_id: None,
            proxied: None,
            route_id: None,
            verified: false,
        }
    }

    pub fn dns_record(mut self, zone_id: impl Into<String>, record_id: impl Into<String>) -> Self {
        self.zone_id = Some(zone_id.into());
        self.record_id = Some(Some(record_id.into()));
        self
    }

    pub fn clear_dns_record(mut self) -> Self {
        self.record_id = Some(None);
        self
    }

    pub fn proxied(mut self, proxied: bool) -> Self {
        self.proxied = Some(proxied);
        self
    }

    pub fn route(mut self, route_id: impl Into<String>) -> Self {
        self.route_id = Some(Some(route_id.into()));
        self
    }

    pub fn clear_route(mut self) -> Self {
        self.route_id = Some(None);
        self
    }

    /// Stamp `last_verified_at`: live state was read back and matched.
    pub fn verified(mut self) -> Self {
        self.verified = true;
        self
    }

    pub fn status(&self) -> DomainStatus {
        self.status
    }
}

pub struct DomainRecordStore {
    db: Arc<DbConnection>,
    error_log_cap: usize,
}

impl DomainRecordStore {
    pub fn new(db: Arc<DbConnection>, error_log_cap: usize) -> Self {
        Self {
            db,
            error_log_cap: error_log_cap.max(1),
        }
    }

    /// Insert a fresh `pending` record. Generic over the connection so the
    /// orchestrator can create it inside its tenant transaction.
    pub async fn insert_pending<C: ConnectionTrait>(
        conn: &C,
        tenant_id: i32,
        domain: &str,
        is_subdomain: bool,
        target_nameservers: Option<&[String]>,
        registrar_domain_id: Option<String>,
    ) -> Result<domain_records::Model, DomainError> {
        let target_nameservers = target_nameservers
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DomainError::Internal(format!("Failed to encode nameservers: {}", e)))?;

        let record = domain_records::ActiveModel {
            tenant_id: Set(tenant_id),
            domain: Set(domain.to_string()),
            is_subdomain: Set(is_subdomain),
            status: Set(DomainStatus::Pending),
            registrar_domain_id: Set(registrar_domain_id),
            cloudflare_proxied: Set(false),
            target_nameservers: Set(target_nameservers),
            ..Default::default()
        };
        Ok(record.insert(conn).await?)
    }

    pub async fn get(&self, id: i32) -> Result<domain_records::Model, DomainError> {
        domain_records::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("domain record {}", id)))
    }

    pub async fn find_for_tenant(
        &self,
        tenant_id: i32,
    ) -> Result<Vec<domain_records::Model>, DomainError> {
        Ok(domain_records::Entity::find()
            .filter(domain_records::Column::TenantId.eq(tenant_id))
            .order_by_asc(domain_records::Column::Id)
            .all(self.db.as_ref())
            .await?)
    }

    pub async fn find_by_domain(
        &self,
        domain: &str,
    ) -> Result<Option<domain_records::Model>, DomainError> {
        Ok(domain_records::Entity::find()
            .filter(domain_records::Column::Domain.eq(domain))
            .one(self.db.as_ref())
            .await?)
    }

    /// Records in any of `statuses`, optionally only those untouched since
    /// `older_than`.
    pub async fn find_by_status(
        &self,
        statuses: &[DomainStatus],
        older_than: Option<UtcDateTime>,
    ) -> Result<Vec<domain_records::Model>, DomainError> {
        let mut query = domain_records::Entity::find()
            .filter(domain_records::Column::Status.is_in(statuses.iter().copied()));
        if let Some(cutoff) = older_than {
            query = query.filter(domain_records::Column::UpdatedAt.lt(cutoff));
        }
        Ok(query
            .order_by_asc(domain_records::Column::UpdatedAt)
            .all(self.db.as_ref())
            .await?)
    }

    /// Apply `transition` to the record `expected` was read from. Fails with
    /// [`DomainError::InvalidTransition`] if the row moved on in the meantime
    /// or the lifecycle forbids the change.
    pub async fn transition(
        &self,
        expected: &domain_records::Model,
        transition: Transition,
    ) -> Result<domain_records::Model, DomainError> {
        let txn = self.db.begin().await?;
        let updated = Self::transition_in(&txn, expected, transition).await?;
        txn.commit().await?;
        Ok(updated)
    }

    /// Same as [`Self::transition`] inside a caller-owned transaction.
    pub async fn transition_in<C: ConnectionTrait>(
        conn: &C,
        expected: &domain_records::Model,
        transition: Transition,
    ) -> Result<domain_records::Model, DomainError> {
        let current = domain_records::Entity::find_by_id(expected.id)
            .one(conn)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("domain record {}", expected.id)))?;

        let to = transition.status;
        if current.status != expected.status
            || !can_transition(current.status, to, current.is_subdomain)
        {
            return Err(DomainError::InvalidTransition {
                from: current.status,
                to,
            });
        }

        let record_id = transition
            .record_id
            .clone()
            .unwrap_or_else(|| current.cloudflare_record_id.clone());
        let route_id = transition
            .route_id
            .clone()
            .unwrap_or_else(|| current.caddy_route_id.clone());
        check_invariants(to, &record_id, &route_id)?;

        let from = current.status;
        let mut active: domain_records::ActiveModel = current.into();
        active.status = Set(to);
        active.cloudflare_record_id = Set(record_id);
        active.caddy_route_id = Set(route_id);
        if let Some(zone_id) = transition.zone_id {
            active.cloudflare_zone_id = Set(Some(zone_id));
        }
        if let Some(proxied) = transition.proxied {
            active.cloudflare_proxied = Set(proxied);
        }
        if transition.verified {
            active.last_verified_at = Set(Some(Utc::now()));
        }

        let updated = active.update(conn).await?;
        debug!("Domain record {} ({}): {} -> {}", updated.id, updated.domain, from, to);
        Ok(updated)
    }

    /// Append a forensic entry, keeping the most recent entries only.
    /// Leaves `updated_at` alone so failures do not reset staleness.
    pub async fn append_error(
        &self,
        record_id: i32,
        step: &str,
        message: &str,
    ) -> Result<(), DomainError> {
        let txn = self.db.begin().await?;
        let Some(record) = domain_records::Entity::find_by_id(record_id).one(&txn).await? else {
            warn!("Cannot log {} failure, domain record {} is gone", step, record_id);
            return Ok(());
        };

        let mut entries = record.error_entries();
        entries.push(ErrorLogEntry {
            at: Utc::now(),
            step: step.to_string(),
            message: message.to_string(),
        });
        if entries.len() > self.error_log_cap {
            let excess = entries.len() - self.error_log_cap;
            entries.drain(..excess);
        }
        let encoded = serde_json::to_string(&entries)
            .map_err(|e| DomainError::Internal(format!("Failed to encode error log: {}", e)))?;

        domain_records::Entity::update_many()
            .col_expr(domain_records::Column::ErrorLog, Expr::value(encoded))
            .filter(domain_records::Column::Id.eq(record_id))
            .exec(&txn)
            .await?;
        txn.commit().await?;

        warn!("{} failed for {}: {}", step, record.domain, message);
        Ok(())
    }
}
