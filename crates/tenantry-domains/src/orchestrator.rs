//! Provisioning orchestrator
//!
//! Composes the availability checker, the DNS provider, the reverse proxy
//! and the registrar into tenant lifecycle operations. External calls never
//! run inside a database transaction; each externally confirmed step is
//! persisted as its own record transition, and a failure part-way through
//! free provisioning undoes the steps already applied.

use chrono::Utc;
use regex::Regex;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde_json::json;
use std::sync::Arc;
use tenantry_core::{
    AuditLogger, DomainAuditEvent, Mailer, PlatformConfig, ProvisioningSettings, RequestContext,
    WelcomeEmail,
};
use tenantry_database::DbConnection;
use tenantry_dns::{nameservers_match, DnsController, DnsError, DnsRecordRef, NameserverResolver};
use tenantry_entities::types::DomainStatus;
use tenantry_entities::{customers, domain_records, tenants};
use tenantry_proxy::{route_id_for_domain, DesiredRoute, ProxyController, ProxyError};
use tenantry_registrar::{RegistrarClient, RegistrationStatus};
use tracing::{debug, error, info, warn};

use crate::availability::{AvailabilityResult, DomainAvailabilityChecker, UnavailableReason};
use crate::errors::DomainError;
use crate::events;
use crate::passwords::{hash_password, verify_password};
use crate::store::{DomainRecordStore, Transition};

/// The external systems the orchestrator drives, resolved once at startup.
#[derive(Clone)]
pub struct ControlPlanes {
    pub dns: Arc<dyn DnsController>,
    pub proxy: Arc<dyn ProxyController>,
    pub registrar: Arc<dyn RegistrarClient>,
    pub resolver: Arc<dyn NameserverResolver>,
}

#[derive(Debug, Clone)]
pub struct FreeTenantRequest {
    pub subdomain: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_password: String,
    pub send_welcome_email: bool,
}

#[derive(Debug, Clone)]
pub struct ProvisionedTenant {
    pub tenant_id: i32,
    pub customer_id: i32,
    pub domain: String,
    pub record: domain_records::Model,
}

#[derive(Debug, Clone)]
pub struct CustomDomainRequest {
    pub domain: String,
    /// Set for domains bought through the platform's registrar.
    pub registrar_domain_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DeprovisionOutcome {
    pub tenant_id: i32,
    pub domain: String,
    pub message: String,
    /// The tenant was already fully deprovisioned; nothing was touched.
    pub already_deleted: bool,
    /// At least one DNS record could not be removed and is left `deleting`.
    pub dns_cleanup_failed: bool,
}

/// Live status of a tenant's primary domain.
#[derive(Debug, Clone)]
pub struct TenantStatus {
    pub tenant_id: i32,
    pub domain: String,
    /// Persisted lifecycle status of the primary record.
    pub caddy_status: DomainStatus,
    pub route_exists: bool,
    pub domain_responds: bool,
    pub ssl_valid: bool,
    pub http_code: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct TenantRecords {
    pub tenant: tenants::Model,
    pub records: Vec<domain_records::Model>,
}

/// Rows written by the free-provisioning transaction.
struct FreeTenantDraft {
    customer: customers::Model,
    customer_created: bool,
    tenant: tenants::Model,
    record: domain_records::Model,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NameserverPush {
    /// Registry still reports `REQ`; retried by the scheduler.
    Deferred,
    AlreadyDelegated,
    Updated,
}

pub struct ProvisioningOrchestrator {
    db: Arc<DbConnection>,
    planes: ControlPlanes,
    store: DomainRecordStore,
    availability: DomainAvailabilityChecker,
    audit: Arc<dyn AuditLogger>,
    mailer: Arc<dyn Mailer>,
    settings: ProvisioningSettings,
    parent_domain: String,
    relock_after_update: bool,
    hostname_pattern: Regex,
}

impl ProvisioningOrchestrator {
    pub fn new(
        db: Arc<DbConnection>,
        planes: ControlPlanes,
        audit: Arc<dyn AuditLogger>,
        mailer: Arc<dyn Mailer>,
        config: &PlatformConfig,
    ) -> Result<Self, DomainError> {
        let settings = config.provisioning.clone();
        let availability = DomainAvailabilityChecker::new(
            db.clone(),
            planes.dns.clone(),
            &settings.reserved_subdomains,
        )?;
        let hostname_pattern =
            Regex::new(r"^(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z][a-z0-9-]{0,61}[a-z0-9]$")
                .map_err(|e| DomainError::Internal(format!("invalid hostname pattern: {}", e)))?;

        Ok(Self {
            store: DomainRecordStore::new(db.clone(), settings.error_log_cap),
            db,
            planes,
            availability,
            audit,
            mailer,
            parent_domain: config.dns.parent_domain.trim_end_matches('.').to_lowercase(),
            relock_after_update: config
                .registrar
                .as_ref()
                .map(|r| r.relock_after_update)
                .unwrap_or(true),
            settings,
            hostname_pattern,
        })
    }

    pub fn store(&self) -> &DomainRecordStore {
        &self.store
    }

    pub fn settings(&self) -> &ProvisioningSettings {
        &self.settings
    }

    pub async fn check_availability(
        &self,
        candidate: &str,
    ) -> Result<AvailabilityResult, DomainError> {
        self.availability.check(candidate).await
    }

    /// Availability as a hard requirement: returns the normalized label.
    async fn ensure_available(&self, candidate: &str) -> Result<AvailabilityResult, DomainError> {
        let result = self.availability.check(candidate).await?;
        match result.reason {
            None => Ok(result),
            Some(UnavailableReason::InvalidFormat) => Err(DomainError::Validation(
                "Subdomain must be 3-63 characters of lowercase letters, digits or hyphens"
                    .into(),
            )),
            Some(reason) => Err(DomainError::AvailabilityConflict {
                domain: result.domain,
                reason,
            }),
        }
    }

    // ------------------------------------------------------------------
    // Free subdomains
    // ------------------------------------------------------------------

    /// Create a customer and tenant on a platform subdomain and take it to
    /// `active`. On any failure the steps already applied are undone.
    pub async fn provision_free_tenant(
        &self,
        ctx: &RequestContext,
        request: FreeTenantRequest,
    ) -> Result<ProvisionedTenant, DomainError> {
        let customer_name = request.customer_name.trim().to_string();
        let email = request.customer_email.trim().to_lowercase();
        validate_customer(&customer_name, &email, &request.customer_password)?;

        let available = self.ensure_available(&request.subdomain).await?;
        let domain = available.domain.clone();
        let password_hash = hash_password(&request.customer_password)?;

        let draft = match self
            .insert_free_tenant(&customer_name, &email, &request.customer_password, &password_hash, &domain)
            .await
        {
            Err(e) if e.is_unique_violation() => {
                debug!("Lost insert race for {}, re-checking once", domain);
                self.ensure_available(&request.subdomain).await?;
                self.insert_free_tenant(
                    &customer_name,
                    &email,
                    &request.customer_password,
                    &password_hash,
                    &domain,
                )
                .await
                .map_err(|e| {
                    if e.is_unique_violation() {
                        DomainError::AvailabilityConflict {
                            domain: domain.clone(),
                            reason: UnavailableReason::TakenLocally,
                        }
                    } else {
                        e
                    }
                })?
            }
            other => other?,
        };
        info!(
            "Created tenant {} for {} (customer {})",
            draft.tenant.id, domain, draft.customer.id
        );

        let ctx = ctx.for_customer(draft.customer.id);
        let mut dns_ref = None;
        let mut proxy_touched = false;
        let record = match self
            .activate_free(&draft, &mut dns_ref, &mut proxy_touched)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                error!("Provisioning {} failed: {}", domain, e);
                self.compensate_free(&draft, dns_ref.as_ref(), proxy_touched)
                    .await;
                return Err(e);
            }
        };

        self.record_event(
            DomainAuditEvent::new(events::TENANT_PROVISIONED, &ctx, &domain)
                .tenant(draft.tenant.id)
                .details(json!({ "plan": draft.tenant.plan, "is_subdomain": true })),
        )
        .await;
        self.record_event(
            DomainAuditEvent::new(events::DOMAIN_ACTIVATED, &ctx, &domain)
                .tenant(draft.tenant.id)
                .details(json!({
                    "cloudflare_record_id": record.cloudflare_record_id,
                    "caddy_route_id": record.caddy_route_id,
                })),
        )
        .await;

        if request.send_welcome_email {
            let email = WelcomeEmail {
                to: draft.customer.email.clone(),
                customer_name: draft.customer.name.clone(),
                domain: domain.clone(),
            };
            if let Err(e) = self.mailer.send_welcome(&email).await {
                warn!("Welcome email for {} not sent: {}", domain, e);
            }
        }

        info!("Tenant {} is live at {}", draft.tenant.id, domain);
        Ok(ProvisionedTenant {
            tenant_id: draft.tenant.id,
            customer_id: draft.customer.id,
            domain,
            record,
        })
    }

    async fn insert_free_tenant(
        &self,
        customer_name: &str,
        email: &str,
        password: &str,
        password_hash: &str,
        domain: &str,
    ) -> Result<FreeTenantDraft, DomainError> {
        let txn = self.db.begin().await?;

        let existing = customers::Entity::find()
            .filter(customers::Column::Email.eq(email))
            .one(&txn)
            .await?;
        let (customer, customer_created) = match existing {
            // A returning customer proves ownership with their password
            Some(customer) => {
                if !verify_password(password, &customer.password_hash) {
                    return Err(DomainError::Unauthorized);
                }
                (customer, false)
            }
            None => {
                let customer = customers::ActiveModel {
                    name: Set(customer_name.to_string()),
                    email: Set(email.to_string()),
                    password_hash: Set(password_hash.to_string()),
                    ..Default::default()
                }
                .insert(&txn)
                .await?;
                (customer, true)
            }
        };

        let tenant = tenants::ActiveModel {
            customer_id: Set(customer.id),
            domain: Set(domain.to_string()),
            is_subdomain: Set(true),
            parent_domain: Set(Some(self.parent_domain.clone())),
            theme: Set("default".to_string()),
            plan: Set("free".to_string()),
            is_deleted: Set(false),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let record =
            DomainRecordStore::insert_pending(&txn, tenant.id, domain, true, None, None).await?;
        txn.commit().await?;

        Ok(FreeTenantDraft {
            customer,
            customer_created,
            tenant,
            record,
        })
    }

    async fn activate_free(
        &self,
        draft: &FreeTenantDraft,
        dns_ref: &mut Option<DnsRecordRef>,
        proxy_touched: &mut bool,
    ) -> Result<domain_records::Model, DomainError> {
        let created = self.create_dns(&draft.record, false).await?;
        *dns_ref = Some(created.clone());
        let live = self.confirm_dns(&created).await?;
        let record = self
            .store
            .transition(
                &draft.record,
                Transition::to(DomainStatus::DnsConfigured)
                    .dns_record(&live.zone_id, &live.record_id)
                    .proxied(live.proxied),
            )
            .await?;

        *proxy_touched = true;
        let route_id = self.apply_route(&record).await?;
        let record = self
            .store
            .transition(&record, Transition::to(DomainStatus::ProxyConfigured).route(route_id))
            .await?;

        self.store
            .transition(&record, Transition::to(DomainStatus::Active).verified())
            .await
    }

    /// Undo a failed free provisioning: route, then DNS record, then rows.
    /// If an external cleanup fails the rows are parked as `deleting` so the
    /// leftover is visible to the scheduler instead of orphaned.
    async fn compensate_free(
        &self,
        draft: &FreeTenantDraft,
        dns_ref: Option<&DnsRecordRef>,
        proxy_touched: bool,
    ) {
        let domain = &draft.tenant.domain;
        warn!("Rolling back provisioning of {}", domain);
        let mut leftovers = Vec::new();

        if proxy_touched {
            if let Err(e) = self
                .planes
                .proxy
                .remove_domain(&route_id_for_domain(domain))
                .await
            {
                error!("Rollback could not remove route for {}: {}", domain, e);
                leftovers.push(("rollback_proxy_remove", e.to_string()));
            }
        }

        if let Some(dns) = dns_ref {
            if let Err(e) = self
                .planes
                .dns
                .delete_record(&dns.zone_id, &dns.record_id)
                .await
            {
                error!("Rollback could not delete DNS record for {}: {}", domain, e);
                leftovers.push(("rollback_dns_delete", e.to_string()));
            }
        }

        if leftovers.is_empty() {
            if let Err(e) = self.delete_draft_rows(draft).await {
                error!("Rollback could not delete rows for {}: {}", domain, e);
            }
            return;
        }

        if let Err(e) = self.park_failed_draft(draft, dns_ref, &leftovers).await {
            error!("Rollback could not park rows for {}: {}", domain, e);
        }
    }

    async fn delete_draft_rows(&self, draft: &FreeTenantDraft) -> Result<(), DomainError> {
        let txn = self.db.begin().await?;
        delete_tenant_rows(&txn, &draft.tenant, draft.customer_created).await?;
        txn.commit().await?;
        debug!("Removed rows for abandoned tenant {}", draft.tenant.id);
        Ok(())
    }

    async fn park_failed_draft(
        &self,
        draft: &FreeTenantDraft,
        dns_ref: Option<&DnsRecordRef>,
        leftovers: &[(&str, String)],
    ) -> Result<(), DomainError> {
        let current = self.store.get(draft.record.id).await?;
        let mut transition = Transition::to(DomainStatus::Deleting);
        if let Some(dns) = dns_ref {
            transition = transition.dns_record(&dns.zone_id, &dns.record_id);
        }
        if leftovers.iter().any(|(step, _)| *step == "rollback_proxy_remove") {
            transition = transition.route(route_id_for_domain(&draft.tenant.domain));
        }
        self.store.transition(&current, transition).await?;
        for (step, message) in leftovers {
            self.store.append_error(draft.record.id, step, message).await?;
        }
        self.soft_delete_tenant(&draft.tenant).await
    }

    // ------------------------------------------------------------------
    // Custom domains
    // ------------------------------------------------------------------

    /// Attach a customer-owned domain to a tenant. The record waits in
    /// `ns_pending` until the scheduler sees the delegation live.
    pub async fn provision_custom_domain(
        &self,
        ctx: &RequestContext,
        tenant_id: i32,
        request: CustomDomainRequest,
    ) -> Result<domain_records::Model, DomainError> {
        let domain = request.domain.trim().trim_end_matches('.').to_lowercase();
        if domain.len() > 253 || !self.hostname_pattern.is_match(&domain) {
            return Err(DomainError::Validation(format!(
                "'{}' is not a valid domain name",
                request.domain.trim()
            )));
        }
        if domain == self.parent_domain || domain.ends_with(&format!(".{}", self.parent_domain)) {
            return Err(DomainError::Validation(
                "Platform subdomains are provisioned through create-free".into(),
            ));
        }
        let targets = self.settings.target_nameservers.clone();
        if targets.is_empty() {
            return Err(DomainError::InvalidState(
                "Custom domains are disabled: no target nameservers configured".into(),
            ));
        }
        let registrar_id = request
            .registrar_domain_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());
        if registrar_id.is_some() && !self.planes.registrar.is_configured() {
            return Err(DomainError::Validation(
                "Registrar-managed domains are not enabled".into(),
            ));
        }

        let tenant = self.live_tenant(tenant_id).await?;
        let taken = DomainError::AvailabilityConflict {
            domain: domain.clone(),
            reason: UnavailableReason::TakenLocally,
        };
        if self.availability.is_taken_locally(&domain).await? {
            return Err(taken);
        }

        let record = self
            .insert_custom_record(&tenant, &domain, &targets, registrar_id.clone())
            .await
            .map_err(|e| if e.is_unique_violation() { taken } else { e })?;

        if let Some(registrar_id) = registrar_id.as_deref() {
            if let Err(e) = self.push_nameservers(&record, registrar_id, &targets).await {
                warn!("Registrar step for {} failed, dropping request: {}", domain, e);
                domain_records::Entity::delete_by_id(record.id)
                    .exec(self.db.as_ref())
                    .await?;
                return Err(e);
            }
        }

        let ctx = ctx.for_customer(tenant.customer_id);
        self.record_event(
            DomainAuditEvent::new(events::CUSTOM_DOMAIN_REQUESTED, &ctx, &domain)
                .tenant(tenant.id)
                .details(json!({
                    "target_nameservers": targets,
                    "registrar_domain_id": record.registrar_domain_id,
                })),
        )
        .await;

        info!("Custom domain {} waiting for delegation (tenant {})", domain, tenant.id);
        Ok(record)
    }

    async fn insert_custom_record(
        &self,
        tenant: &tenants::Model,
        domain: &str,
        targets: &[String],
        registrar_id: Option<String>,
    ) -> Result<domain_records::Model, DomainError> {
        let txn = self.db.begin().await?;
        let record = DomainRecordStore::insert_pending(
            &txn,
            tenant.id,
            domain,
            false,
            Some(targets),
            registrar_id,
        )
        .await?;
        let record =
            DomainRecordStore::transition_in(&txn, &record, Transition::to(DomainStatus::NsPending))
                .await?;
        txn.commit().await?;
        Ok(record)
    }

    /// Point a registrar-managed domain at `targets`. Only `ACT` domains
    /// accept the change; a lock is lifted first and re-applied afterwards
    /// when configured.
    pub(crate) async fn push_nameservers(
        &self,
        record: &domain_records::Model,
        registrar_id: &str,
        targets: &[String],
    ) -> Result<NameserverPush, DomainError> {
        let registrar = &self.planes.registrar;
        let current = registrar.get_domain(registrar_id).await?;

        if current.status != RegistrationStatus::Active {
            info!(
                "Registrar reports {} still registering, nameserver update deferred",
                record.domain
            );
            return Ok(NameserverPush::Deferred);
        }
        if nameservers_match(&current.nameservers, targets) {
            return Ok(NameserverPush::AlreadyDelegated);
        }

        if current.locked {
            registrar.set_lock(registrar_id, false).await.map_err(|e| {
                DomainError::RegistrarLock(format!(
                    "could not unlock {} at the registrar: {}",
                    record.domain, e
                ))
            })?;
        }

        let updated = registrar.update_nameservers(registrar_id, targets).await;

        if current.locked && self.relock_after_update {
            if let Err(e) = registrar.set_lock(registrar_id, true).await {
                self.note_failure(record.id, "registrar_relock", &e.to_string())
                    .await;
            }
        }

        updated?;
        info!("Pushed platform nameservers for {} to the registrar", record.domain);
        Ok(NameserverPush::Updated)
    }

    // ------------------------------------------------------------------
    // Deprovisioning
    // ------------------------------------------------------------------

    /// Take a tenant offline. The route goes first so the site stops serving
    /// even if DNS cleanup fails; local rows are soft-deleted last.
    pub async fn deprovision(
        &self,
        ctx: &RequestContext,
        tenant_id: i32,
        password: &str,
        delete_from_dns: bool,
    ) -> Result<DeprovisionOutcome, DomainError> {
        let tenant = self.tenant(tenant_id).await?;
        self.verify_owner(&tenant, password).await?;
        let ctx = ctx.for_customer(tenant.customer_id);

        let existing = self.store.find_for_tenant(tenant.id).await?;
        if tenant.is_deleted && existing.iter().all(|r| r.status == DomainStatus::Deleted) {
            return Ok(DeprovisionOutcome {
                tenant_id: tenant.id,
                domain: tenant.domain,
                message: "Tenant already deleted".into(),
                already_deleted: true,
                dns_cleanup_failed: false,
            });
        }

        let mut records = Vec::with_capacity(existing.len());
        for record in existing {
            let record = match record.status {
                DomainStatus::Deleted => continue,
                DomainStatus::Deleting => record,
                _ => {
                    self.store
                        .transition(&record, Transition::to(DomainStatus::Deleting))
                        .await?
                }
            };
            records.push(record);
        }

        for record in records.iter_mut() {
            let route_id = record
                .caddy_route_id
                .clone()
                .unwrap_or_else(|| route_id_for_domain(&record.domain));
            if let Err(e) = self.remove_route_verified(&route_id).await {
                self.note_failure(record.id, "proxy_remove", &e.to_string())
                    .await;
                return Err(e.into());
            }
            if record.caddy_route_id.is_some() {
                *record = self
                    .store
                    .transition(record, Transition::to(DomainStatus::Deleting).clear_route())
                    .await?;
            }
        }

        let mut dns_cleanup_failed = false;
        for record in records.iter_mut() {
            let Some(record_id) = record.cloudflare_record_id.clone() else {
                continue;
            };
            if delete_from_dns {
                let zone_id = record.cloudflare_zone_id.clone().unwrap_or_default();
                if let Err(e) = self.delete_dns_verified(&zone_id, &record_id).await {
                    self.note_failure(record.id, "dns_delete", &e.to_string())
                        .await;
                    dns_cleanup_failed = true;
                    continue;
                }
            } else {
                debug!("Keeping DNS record {} for {}", record_id, record.domain);
            }
            *record = self
                .store
                .transition(record, Transition::to(DomainStatus::Deleting).clear_dns_record())
                .await?;
        }

        let txn = self.db.begin().await?;
        for record in &records {
            if record.cloudflare_record_id.is_none() && record.caddy_route_id.is_none() {
                DomainRecordStore::transition_in(&txn, record, Transition::to(DomainStatus::Deleted))
                    .await?;
            }
        }
        if !tenant.is_deleted {
            let mut active: tenants::ActiveModel = tenant.clone().into();
            active.is_deleted = Set(true);
            active.deleted_at = Set(Some(Utc::now()));
            active.update(&txn).await?;
        }
        txn.commit().await?;

        self.record_event(
            DomainAuditEvent::new(events::TENANT_DEPROVISIONED, &ctx, &tenant.domain)
                .tenant(tenant.id)
                .details(json!({
                    "delete_from_dns": delete_from_dns,
                    "dns_cleanup_failed": dns_cleanup_failed,
                })),
        )
        .await;

        let message = if dns_cleanup_failed {
            "Site is offline; DNS cleanup failed and has been logged for follow-up"
        } else if delete_from_dns {
            "Site and DNS records deleted"
        } else {
            "Site deleted; DNS records kept"
        };
        info!("Deprovisioned tenant {} ({})", tenant.id, tenant.domain);

        Ok(DeprovisionOutcome {
            tenant_id: tenant.id,
            domain: tenant.domain,
            message: message.to_string(),
            already_deleted: false,
            dns_cleanup_failed,
        })
    }

    async fn remove_route_verified(&self, route_id: &str) -> Result<(), ProxyError> {
        self.planes.proxy.remove_domain(route_id).await?;
        if self.planes.proxy.route_exists(route_id).await? {
            return Err(ProxyError::NotConfirmed(format!(
                "route {} still present after removal",
                route_id
            )));
        }
        Ok(())
    }

    async fn delete_dns_verified(&self, zone_id: &str, record_id: &str) -> Result<(), DnsError> {
        self.planes.dns.delete_record(zone_id, record_id).await?;
        if self.planes.dns.get_record(zone_id, record_id).await?.is_some() {
            return Err(DnsError::NotConfirmed(format!(
                "record {} still present after delete",
                record_id
            )));
        }
        Ok(())
    }

    /// Hard-delete a fully deprovisioned tenant, and its customer when no
    /// other tenant remains.
    pub async fn purge(
        &self,
        ctx: &RequestContext,
        tenant_id: i32,
        password: &str,
    ) -> Result<(), DomainError> {
        let tenant = self.tenant(tenant_id).await?;
        self.verify_owner(&tenant, password).await?;

        let records = self.store.find_for_tenant(tenant.id).await?;
        if !tenant.is_deleted || records.iter().any(|r| r.status != DomainStatus::Deleted) {
            return Err(DomainError::InvalidState(
                "Only fully deprovisioned tenants can be purged".into(),
            ));
        }

        let txn = self.db.begin().await?;
        let customer_removed = delete_tenant_rows(&txn, &tenant, true).await?;
        txn.commit().await?;

        let ctx = ctx.for_customer(tenant.customer_id);
        self.record_event(
            DomainAuditEvent::new(events::TENANT_PURGED, &ctx, &tenant.domain)
                .tenant(tenant.id)
                .details(json!({ "customer_removed": customer_removed })),
        )
        .await;
        info!("Purged tenant {} ({})", tenant.id, tenant.domain);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reconfigure and reads
    // ------------------------------------------------------------------

    /// Re-apply the persisted route of every routable record. Never touches
    /// DNS or the registrar. Returns the number of routes applied.
    pub async fn reconfigure(
        &self,
        ctx: &RequestContext,
        tenant_id: i32,
    ) -> Result<usize, DomainError> {
        let tenant = self.live_tenant(tenant_id).await?;
        let ctx = ctx.for_customer(tenant.customer_id);
        let mut applied = Vec::new();

        for record in self.store.find_for_tenant(tenant.id).await? {
            if !matches!(
                record.status,
                DomainStatus::ProxyConfigured | DomainStatus::Active
            ) {
                continue;
            }
            let route_id = self
                .logged(record.id, "proxy_reconfigure", self.apply_route(&record).await)
                .await?;
            if record.caddy_route_id.as_deref() != Some(route_id.as_str()) {
                self.store
                    .transition(&record, Transition::to(record.status).route(&route_id))
                    .await?;
            }
            applied.push(route_id);
        }

        self.record_event(
            DomainAuditEvent::new(events::TENANT_RECONFIGURED, &ctx, &tenant.domain)
                .tenant(tenant.id)
                .details(json!({ "routes": applied })),
        )
        .await;
        Ok(applied.len())
    }

    /// Live view of the primary domain. Read-only.
    pub async fn status(&self, tenant_id: i32) -> Result<TenantStatus, DomainError> {
        let tenant = self.tenant(tenant_id).await?;
        let record = self
            .store
            .find_by_domain(&tenant.domain)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("domain record for {}", tenant.domain)))?;
        let live = self.planes.proxy.status(&tenant.domain).await?;

        Ok(TenantStatus {
            tenant_id: tenant.id,
            domain: tenant.domain,
            caddy_status: record.status,
            route_exists: live.route_exists,
            domain_responds: live.domain_responds,
            ssl_valid: live.ssl_valid,
            http_code: live.http_code,
        })
    }

    /// Persisted records for a tenant, no probing.
    pub async fn records(&self, tenant_id: i32) -> Result<TenantRecords, DomainError> {
        let tenant = self.tenant(tenant_id).await?;
        let records = self.store.find_for_tenant(tenant.id).await?;
        Ok(TenantRecords { tenant, records })
    }

    // ------------------------------------------------------------------
    // Reconciliation steps
    // ------------------------------------------------------------------

    /// Check an `ns_pending` record's live delegation, pushing nameservers
    /// through the registrar first when it manages the domain. Returns the
    /// `ns_verified` record once the live NS set matches the target.
    pub async fn verify_delegation(
        &self,
        record: &domain_records::Model,
    ) -> Result<Option<domain_records::Model>, DomainError> {
        let targets = record.target_nameservers();

        if let Some(registrar_id) = record.registrar_domain_id.as_deref() {
            if let Err(e) = self.push_nameservers(record, registrar_id, &targets).await {
                self.note_failure(record.id, "registrar_push", &e.to_string())
                    .await;
            }
        }

        let live = self
            .logged(
                record.id,
                "ns_lookup",
                self.planes
                    .resolver
                    .lookup_nameservers(&record.domain)
                    .await
                    .map_err(DomainError::from),
            )
            .await?;
        if !nameservers_match(&live, &targets) {
            debug!(
                "{} delegates to {:?}, waiting for {:?}",
                record.domain, live, targets
            );
            return Ok(None);
        }

        info!("Delegation of {} confirmed", record.domain);
        let verified = self
            .store
            .transition(record, Transition::to(DomainStatus::NsVerified).verified())
            .await?;
        Ok(Some(verified))
    }

    /// Replay whatever steps are missing to take a record to `active`,
    /// re-reading live state instead of trusting stored ids.
    pub async fn complete_provisioning(
        &self,
        ctx: &RequestContext,
        record: &domain_records::Model,
    ) -> Result<domain_records::Model, DomainError> {
        let mut record = record.clone();
        loop {
            record = match record.status {
                DomainStatus::Pending if record.is_subdomain => {
                    self.logged(record.id, "dns_create", self.replay_dns(&record).await)
                        .await?
                }
                DomainStatus::NsVerified => {
                    self.logged(record.id, "dns_create", self.replay_dns(&record).await)
                        .await?
                }
                DomainStatus::DnsConfigured => {
                    let (record, _) = self
                        .logged(record.id, "dns_verify", self.ensure_dns_present(&record).await)
                        .await?;
                    let route_id = self
                        .logged(record.id, "proxy_add", self.apply_route(&record).await)
                        .await?;
                    self.store
                        .transition(
                            &record,
                            Transition::to(DomainStatus::ProxyConfigured).route(route_id),
                        )
                        .await?
                }
                DomainStatus::ProxyConfigured => {
                    let (record, _) = self
                        .logged(record.id, "proxy_verify", self.ensure_route(&record).await)
                        .await?;
                    let record = self
                        .store
                        .transition(&record, Transition::to(DomainStatus::Active).verified())
                        .await?;
                    self.announce_activation(ctx, &record).await;
                    record
                }
                _ => return Ok(record),
            };
        }
    }

    /// Compare an `active` record with live DNS and proxy state, replaying
    /// missing pieces. Also flips the record to proxied once the certificate
    /// is valid when that policy is on. Returns true if anything was repaired.
    pub async fn check_drift(
        &self,
        ctx: &RequestContext,
        record: &domain_records::Model,
    ) -> Result<bool, DomainError> {
        let (record, dns_repaired) = self
            .logged(record.id, "drift_dns", self.ensure_dns_present(record).await)
            .await?;
        let (record, route_repaired) = self
            .logged(record.id, "drift_proxy", self.ensure_route(&record).await)
            .await?;

        let mut record = record;
        if self.settings.proxied_after_issuance && !record.cloudflare_proxied {
            let live = self
                .logged(
                    record.id,
                    "drift_probe",
                    self.planes
                        .proxy
                        .status(&record.domain)
                        .await
                        .map_err(DomainError::from),
                )
                .await?;
            if live.ssl_valid {
                record = self
                    .logged(record.id, "dns_proxy_toggle", self.enable_proxy(&record).await)
                    .await?;
            }
        }

        self.store
            .transition(&record, Transition::to(record.status).verified())
            .await?;

        let repaired = dns_repaired || route_repaired;
        if repaired {
            let ctx = self.context_for_record(ctx, &record).await;
            self.record_event(
                DomainAuditEvent::new(events::DOMAIN_DRIFT_DETECTED, &ctx, &record.domain)
                    .tenant(record.tenant_id)
                    .details(json!({
                        "dns_repaired": dns_repaired,
                        "route_repaired": route_repaired,
                    })),
            )
            .await;
        }
        Ok(repaired)
    }

    /// Flag a deletion that has not finished. Never deletes anything; the
    /// entry is written once per stuck record.
    pub async fn flag_stale_deletion(
        &self,
        record: &domain_records::Model,
    ) -> Result<bool, DomainError> {
        const STEP: &str = "stale_deletion";
        if record
            .error_entries()
            .last()
            .map(|entry| entry.step == STEP)
            .unwrap_or(false)
        {
            return Ok(false);
        }

        let mut leftovers = Vec::new();
        if let Some(id) = &record.cloudflare_record_id {
            leftovers.push(format!("DNS record {}", id));
        }
        if let Some(id) = &record.caddy_route_id {
            leftovers.push(format!("proxy route {}", id));
        }
        let message = if leftovers.is_empty() {
            "deletion did not finish".to_string()
        } else {
            format!("deletion did not finish, still holding {}", leftovers.join(" and "))
        };
        self.store.append_error(record.id, STEP, &message).await?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Step helpers
    // ------------------------------------------------------------------

    fn subdomain_label<'a>(&self, domain: &'a str) -> Result<&'a str, DomainError> {
        domain
            .strip_suffix(&format!(".{}", self.parent_domain))
            .ok_or_else(|| {
                DomainError::Internal(format!(
                    "{} is not under {}",
                    domain, self.parent_domain
                ))
            })
    }

    async fn create_dns(
        &self,
        record: &domain_records::Model,
        proxied: bool,
    ) -> Result<DnsRecordRef, DomainError> {
        let created = if record.is_subdomain {
            let label = self.subdomain_label(&record.domain)?;
            self.planes.dns.create_subdomain_record(label, proxied).await?
        } else {
            self.planes
                .dns
                .create_domain_record(&record.domain, proxied)
                .await?
        };
        Ok(created)
    }

    async fn confirm_dns(&self, created: &DnsRecordRef) -> Result<DnsRecordRef, DomainError> {
        self.planes
            .dns
            .get_record(&created.zone_id, &created.record_id)
            .await?
            .ok_or_else(|| {
                DnsError::NotConfirmed(format!(
                    "record {} for {} not readable after create",
                    created.record_id, created.name
                ))
                .into()
            })
    }

    /// Create (or adopt) the record and move to `dns_configured`.
    async fn replay_dns(
        &self,
        record: &domain_records::Model,
    ) -> Result<domain_records::Model, DomainError> {
        let created = self.create_dns(record, record.cloudflare_proxied).await?;
        let live = self.confirm_dns(&created).await?;
        self.store
            .transition(
                record,
                Transition::to(DomainStatus::DnsConfigured)
                    .dns_record(&live.zone_id, &live.record_id)
                    .proxied(live.proxied),
            )
            .await
    }

    /// Recreate the DNS record if the provider no longer has it.
    async fn ensure_dns_present(
        &self,
        record: &domain_records::Model,
    ) -> Result<(domain_records::Model, bool), DomainError> {
        if let (Some(zone_id), Some(record_id)) =
            (&record.cloudflare_zone_id, &record.cloudflare_record_id)
        {
            if self.planes.dns.get_record(zone_id, record_id).await?.is_some() {
                return Ok((record.clone(), false));
            }
        }

        warn!("DNS record for {} is missing, recreating", record.domain);
        let created = self.create_dns(record, record.cloudflare_proxied).await?;
        let live = self.confirm_dns(&created).await?;
        let record = self
            .store
            .transition(
                record,
                Transition::to(record.status)
                    .dns_record(&live.zone_id, &live.record_id)
                    .proxied(live.proxied),
            )
            .await?;
        Ok((record, true))
    }

    /// Re-add the proxy route if the live config lost it.
    async fn ensure_route(
        &self,
        record: &domain_records::Model,
    ) -> Result<(domain_records::Model, bool), DomainError> {
        let route_id = record
            .caddy_route_id
            .clone()
            .unwrap_or_else(|| route_id_for_domain(&record.domain));
        if self.planes.proxy.route_exists(&route_id).await? {
            return Ok((record.clone(), false));
        }

        warn!("Proxy route for {} is missing, re-adding", record.domain);
        let route_id = self.apply_route(record).await?;
        let record = self
            .store
            .transition(record, Transition::to(record.status).route(route_id))
            .await?;
        Ok((record, true))
    }

    /// Apply the desired route and read it back from the live config.
    async fn apply_route(&self, record: &domain_records::Model) -> Result<String, DomainError> {
        let route = DesiredRoute {
            domain: record.domain.clone(),
            include_www: self.settings.include_www,
        };
        let route_id = self.planes.proxy.reconfigure(&route).await?;
        if !self.planes.proxy.route_exists(&route_id).await? {
            return Err(ProxyError::NotConfirmed(format!(
                "route {} for {} missing after apply",
                route_id, record.domain
            ))
            .into());
        }
        Ok(route_id)
    }

    async fn enable_proxy(
        &self,
        record: &domain_records::Model,
    ) -> Result<domain_records::Model, DomainError> {
        let (Some(zone_id), Some(record_id)) =
            (&record.cloudflare_zone_id, &record.cloudflare_record_id)
        else {
            return Err(DomainError::InvalidState(format!(
                "{} has no DNS record to proxy",
                record.domain
            )));
        };
        self.planes
            .dns
            .update_proxy_status(zone_id, record_id, true)
            .await?;
        info!("Certificate valid for {}, DNS record now proxied", record.domain);
        self.store
            .transition(record, Transition::to(record.status).proxied(true))
            .await
    }

    async fn announce_activation(&self, ctx: &RequestContext, record: &domain_records::Model) {
        let ctx = self.context_for_record(ctx, record).await;
        self.record_event(
            DomainAuditEvent::new(events::DOMAIN_ACTIVATED, &ctx, &record.domain)
                .tenant(record.tenant_id)
                .details(json!({
                    "cloudflare_record_id": record.cloudflare_record_id,
                    "caddy_route_id": record.caddy_route_id,
                })),
        )
        .await;
        info!("{} is active", record.domain);
    }

    async fn context_for_record(
        &self,
        ctx: &RequestContext,
        record: &domain_records::Model,
    ) -> RequestContext {
        match tenants::Entity::find_by_id(record.tenant_id)
            .one(self.db.as_ref())
            .await
        {
            Ok(Some(tenant)) => ctx.for_customer(tenant.customer_id),
            _ => ctx.clone(),
        }
    }

    /// Append failures to the record's error log before handing them back.
    /// Lost races are not failures of the step and are not logged.
    async fn logged<T>(
        &self,
        record_id: i32,
        step: &str,
        result: Result<T, DomainError>,
    ) -> Result<T, DomainError> {
        if let Err(e) = &result {
            if !matches!(e, DomainError::InvalidTransition { .. }) {
                self.note_failure(record_id, step, &e.to_string()).await;
            }
        }
        result
    }

    async fn note_failure(&self, record_id: i32, step: &str, message: &str) {
        if let Err(e) = self.store.append_error(record_id, step, message).await {
            error!("Failed to append error log for record {}: {}", record_id, e);
        }
    }

    async fn record_event(&self, event: DomainAuditEvent) {
        if let Err(e) = self.audit.create_audit_log(&event).await {
            warn!("Failed to record audit event {}: {}", event.operation, e);
        }
    }

    async fn tenant(&self, tenant_id: i32) -> Result<tenants::Model, DomainError> {
        tenants::Entity::find_by_id(tenant_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("tenant {}", tenant_id)))
    }

    async fn live_tenant(&self, tenant_id: i32) -> Result<tenants::Model, DomainError> {
        let tenant = self.tenant(tenant_id).await?;
        if tenant.is_deleted {
            return Err(DomainError::InvalidState(format!(
                "tenant {} is deleted",
                tenant_id
            )));
        }
        Ok(tenant)
    }

    /// Password re-check for destructive actions. Runs before any mutation.
    async fn verify_owner(&self, tenant: &tenants::Model, password: &str) -> Result<(), DomainError> {
        let customer = customers::Entity::find_by_id(tenant.customer_id)
            .one(self.db.as_ref())
            .await?
            .ok_or(DomainError::Unauthorized)?;
        if password.is_empty() || !verify_password(password, &customer.password_hash) {
            warn!("Rejected destructive action on tenant {}: bad password", tenant.id);
            return Err(DomainError::Unauthorized);
        }
        Ok(())
    }

    async fn soft_delete_tenant(&self, tenant: &tenants::Model) -> Result<(), DomainError> {
        let mut active: tenants::ActiveModel = tenant.clone().into();
        active.is_deleted = Set(true);
        active.deleted_at = Set(Some(Utc::now()));
        active.update(self.db.as_ref()).await?;
        Ok(())
    }
}

fn validate_customer(name: &str, email: &str, password: &str) -> Result<(), DomainError> {
    if name.is_empty() || name.len() > 255 {
        return Err(DomainError::Validation("Customer name is required".into()));
    }
    let valid_email = email.len() <= 254
        && matches!(email.split_once('@'), Some((local, host))
            if !local.is_empty() && host.contains('.') && !host.starts_with('.') && !host.ends_with('.') && !host.contains('@'));
    if !valid_email {
        return Err(DomainError::Validation("A valid email address is required".into()));
    }
    if password.chars().count() < 8 {
        return Err(DomainError::Validation(
            "Password must be at least 8 characters".into(),
        ));
    }
    Ok(())
}

/// Delete a tenant's records and the tenant, then the customer if asked and
/// no other tenant references it. Returns whether the customer was removed.
async fn delete_tenant_rows<C: ConnectionTrait>(
    conn: &C,
    tenant: &tenants::Model,
    remove_orphaned_customer: bool,
) -> Result<bool, DomainError> {
    domain_records::Entity::delete_many()
        .filter(domain_records::Column::TenantId.eq(tenant.id))
        .exec(conn)
        .await?;
    tenants::Entity::delete_by_id(tenant.id).exec(conn).await?;

    if !remove_orphaned_customer {
        return Ok(false);
    }
    let remaining = tenants::Entity::find()
        .filter(tenants::Column::CustomerId.eq(tenant.customer_id))
        .count(conn)
        .await?;
    if remaining > 0 {
        return Ok(false);
    }
    customers::Entity::delete_by_id(tenant.customer_id)
        .exec(conn)
        .await?;
    Ok(true)
}
