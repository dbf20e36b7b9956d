//! In-memory control planes and a wired-up orchestrator for tests

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tenantry_core::{
    AuditLogger, AuditOperation, Mailer, MailerError, PlatformConfig, RegistrarSettings,
    RequestContext, WelcomeEmail,
};
use tenantry_database::test_utils::TestDatabase;
use tenantry_database::DbConnection;
use tenantry_dns::{normalize_nameserver, DnsController, DnsError, DnsRecordRef, NameserverResolver};
use tenantry_entities::{customers, domain_records, tenants};
use tenantry_proxy::{route_id_for_domain, DesiredRoute, ProxyController, ProxyError, ProxyStatus};
use tenantry_registrar::{RegistrarClient, RegistrarDomain, RegistrarError, RegistrationStatus};

use crate::orchestrator::{ControlPlanes, FreeTenantRequest, ProvisionedTenant, ProvisioningOrchestrator};
use crate::scheduler::ReconciliationScheduler;

pub(crate) const PARENT: &str = "sites.example.net";
pub(crate) const ZONE: &str = "zone-platform";
pub(crate) const PASSWORD: &str = "correct horse battery";

/// Ordered log of external calls across every fake, for ordering checks.
#[derive(Clone, Default)]
pub(crate) struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.entries().iter().position(|e| e.starts_with(prefix))
    }
}

// ----------------------------------------------------------------------
// DNS
// ----------------------------------------------------------------------

#[derive(Default)]
struct DnsState {
    records: BTreeMap<String, DnsRecordRef>,
    external: HashSet<String>,
    next_id: u32,
    calls: Vec<String>,
    lookups: usize,
    deletes: usize,
    fail_creates: bool,
    fail_deletes: bool,
    hide_created: bool,
    rival: Option<Arc<DbConnection>>,
}

pub(crate) struct FakeDns {
    parent: String,
    state: Mutex<DnsState>,
    journal: Journal,
}

impl FakeDns {
    pub fn new(parent: &str) -> Self {
        Self::with_journal(parent, Journal::default())
    }

    pub fn with_journal(parent: &str, journal: Journal) -> Self {
        Self {
            parent: parent.to_string(),
            state: Mutex::new(DnsState::default()),
            journal,
        }
    }

    fn call(&self, state: &mut DnsState, entry: String) {
        self.journal.push(format!("dns.{}", entry));
        state.calls.push(entry);
    }

    fn create_named(&self, name: &str, proxied: bool) -> Result<DnsRecordRef, DnsError> {
        let mut state = self.state.lock().unwrap();
        self.call(&mut state, format!("create {}", name));
        if state.fail_creates {
            return Err(DnsError::Api {
                status: 500,
                codes: vec![],
                message: "provider unavailable".into(),
            });
        }
        if let Some(existing) = state.records.values().find(|r| r.name == name) {
            return Ok(existing.clone());
        }

        state.next_id += 1;
        let record = DnsRecordRef {
            zone_id: ZONE.to_string(),
            record_id: format!("rec-{}", state.next_id),
            name: name.to_string(),
            content: format!("edge.{}", self.parent),
            proxied,
        };
        if !state.hide_created {
            state.records.insert(record.record_id.clone(), record.clone());
        }
        Ok(record)
    }

    /// A record created outside the platform.
    pub fn add_out_of_band(&self, name: &str) {
        self.state.lock().unwrap().external.insert(name.to_string());
    }

    /// Drop a record behind the platform's back.
    pub fn remove_out_of_band(&self, name: &str) {
        self.state.lock().unwrap().records.retain(|_, r| r.name != name);
    }

    pub fn fail_creates(&self, fail: bool) {
        self.state.lock().unwrap().fail_creates = fail;
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.state.lock().unwrap().fail_deletes = fail;
    }

    /// The next availability lookup answers, then a competing request
    /// claims the name in `db` before the caller can insert it.
    pub fn claim_after_lookup(&self, db: Arc<DbConnection>) {
        self.state.lock().unwrap().rival = Some(db);
    }

    /// Creates report success but never become readable.
    pub fn hide_created_records(&self, hide: bool) {
        self.state.lock().unwrap().hide_created = hide;
    }

    pub fn record_count(&self) -> usize {
        self.state.lock().unwrap().records.len()
    }

    pub fn has_record_named(&self, name: &str) -> bool {
        self.record_named(name).is_some()
    }

    pub fn record_named(&self, name: &str) -> Option<DnsRecordRef> {
        self.state
            .lock()
            .unwrap()
            .records
            .values()
            .find(|r| r.name == name)
            .cloned()
    }

    pub fn delete_count(&self) -> usize {
        self.state.lock().unwrap().deletes
    }

    pub fn lookup_count(&self) -> usize {
        self.state.lock().unwrap().lookups
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls that change provider state, failed attempts included.
    pub fn mutation_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with("create") || c.starts_with("delete") || c.starts_with("proxied"))
            .count()
    }
}

#[async_trait]
impl DnsController for FakeDns {
    fn subdomain_fqdn(&self, subdomain: &str) -> String {
        format!("{}.{}", subdomain, self.parent)
    }

    async fn create_subdomain_record(
        &self,
        subdomain: &str,
        proxied: bool,
    ) -> Result<DnsRecordRef, DnsError> {
        self.create_named(&self.subdomain_fqdn(subdomain), proxied)
    }

    async fn create_domain_record(
        &self,
        domain: &str,
        proxied: bool,
    ) -> Result<DnsRecordRef, DnsError> {
        self.create_named(domain, proxied)
    }

    async fn update_proxy_status(
        &self,
        _zone_id: &str,
        record_id: &str,
        proxied: bool,
    ) -> Result<(), DnsError> {
        let mut state = self.state.lock().unwrap();
        self.call(&mut state, format!("proxied {} {}", record_id, proxied));
        match state.records.get_mut(record_id) {
            Some(record) => {
                record.proxied = proxied;
                Ok(())
            }
            None => Err(DnsError::Api {
                status: 404,
                codes: vec![81044],
                message: "Record does not exist.".into(),
            }),
        }
    }

    async fn delete_record(&self, _zone_id: &str, record_id: &str) -> Result<(), DnsError> {
        let mut state = self.state.lock().unwrap();
        self.call(&mut state, format!("delete {}", record_id));
        if state.fail_deletes {
            return Err(DnsError::RateLimited("slow down".into()));
        }
        state.records.remove(record_id);
        state.deletes += 1;
        Ok(())
    }

    async fn get_record(
        &self,
        _zone_id: &str,
        record_id: &str,
    ) -> Result<Option<DnsRecordRef>, DnsError> {
        let mut state = self.state.lock().unwrap();
        self.call(&mut state, format!("get {}", record_id));
        Ok(state.records.get(record_id).cloned())
    }

    async fn check_subdomain_availability(&self, subdomain: &str) -> Result<bool, DnsError> {
        let name = self.subdomain_fqdn(subdomain);
        let (taken, rival) = {
            let mut state = self.state.lock().unwrap();
            state.lookups += 1;
            let taken =
                state.external.contains(&name) || state.records.values().any(|r| r.name == name);
            (taken, state.rival.take())
        };
        if let Some(db) = rival {
            insert_customer_with_tenant(db.as_ref(), &name, false).await;
        }
        Ok(!taken)
    }
}

// ----------------------------------------------------------------------
// Reverse proxy
// ----------------------------------------------------------------------

struct ProxyState {
    routes: BTreeMap<String, DesiredRoute>,
    calls: Vec<String>,
    fail_adds: bool,
    fail_removes: bool,
    probe: (bool, bool, Option<u16>),
}

pub(crate) struct FakeProxy {
    state: Mutex<ProxyState>,
    journal: Journal,
}

impl FakeProxy {
    pub fn new(journal: Journal) -> Self {
        Self {
            state: Mutex::new(ProxyState {
                routes: BTreeMap::new(),
                calls: Vec::new(),
                fail_adds: false,
                fail_removes: false,
                probe: (false, false, None),
            }),
            journal,
        }
    }

    fn call(&self, state: &mut ProxyState, entry: String) {
        self.journal.push(format!("proxy.{}", entry));
        state.calls.push(entry);
    }

    fn apply(&self, domain: &str, include_www: bool) -> Result<String, ProxyError> {
        let route_id = route_id_for_domain(domain);
        let mut state = self.state.lock().unwrap();
        self.call(&mut state, format!("apply {}", route_id));
        if state.fail_adds {
            return Err(ProxyError::Unreachable("connection refused".into()));
        }
        state.routes.insert(
            route_id.clone(),
            DesiredRoute {
                domain: domain.to_string(),
                include_www,
            },
        );
        Ok(route_id)
    }

    pub fn fail_adds(&self, fail: bool) {
        self.state.lock().unwrap().fail_adds = fail;
    }

    pub fn fail_removes(&self, fail: bool) {
        self.state.lock().unwrap().fail_removes = fail;
    }

    pub fn set_probe(&self, responds: bool, ssl_valid: bool, http_code: Option<u16>) {
        self.state.lock().unwrap().probe = (responds, ssl_valid, http_code);
    }

    pub fn remove_out_of_band(&self, route_id: &str) {
        self.state.lock().unwrap().routes.remove(route_id);
    }

    pub fn has_route(&self, route_id: &str) -> bool {
        self.state.lock().unwrap().routes.contains_key(route_id)
    }

    pub fn route(&self, route_id: &str) -> Option<DesiredRoute> {
        self.state.lock().unwrap().routes.get(route_id).cloned()
    }

    pub fn route_count(&self) -> usize {
        self.state.lock().unwrap().routes.len()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn apply_count(&self) -> usize {
        self.calls().iter().filter(|c| c.starts_with("apply")).count()
    }

    pub fn mutation_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with("apply") || c.starts_with("remove"))
            .count()
    }
}

#[async_trait]
impl ProxyController for FakeProxy {
    async fn add_domain(&self, domain: &str, include_www: bool) -> Result<String, ProxyError> {
        self.apply(domain, include_www)
    }

    async fn remove_domain(&self, route_id: &str) -> Result<(), ProxyError> {
        let mut state = self.state.lock().unwrap();
        self.call(&mut state, format!("remove {}", route_id));
        if state.fail_removes {
            return Err(ProxyError::Timeout("admin API timed out".into()));
        }
        state.routes.remove(route_id);
        Ok(())
    }

    async fn reconfigure(&self, route: &DesiredRoute) -> Result<String, ProxyError> {
        self.apply(&route.domain, route.include_www)
    }

    async fn route_exists(&self, route_id: &str) -> Result<bool, ProxyError> {
        let mut state = self.state.lock().unwrap();
        self.call(&mut state, format!("exists {}", route_id));
        Ok(state.routes.contains_key(route_id))
    }

    async fn status(&self, domain: &str) -> Result<ProxyStatus, ProxyError> {
        let mut state = self.state.lock().unwrap();
        self.call(&mut state, format!("status {}", domain));
        let (domain_responds, ssl_valid, http_code) = state.probe;
        Ok(ProxyStatus {
            route_exists: state.routes.contains_key(&route_id_for_domain(domain)),
            domain_responds,
            ssl_valid,
            http_code,
        })
    }
}

// ----------------------------------------------------------------------
// Registrar and resolver
// ----------------------------------------------------------------------

#[derive(Default)]
struct RegistrarState {
    domains: HashMap<String, RegistrarDomain>,
    calls: Vec<String>,
    refuse_unlock: bool,
}

pub(crate) struct FakeRegistrar {
    configured: bool,
    state: Mutex<RegistrarState>,
}

impl FakeRegistrar {
    pub fn new(configured: bool) -> Self {
        Self {
            configured,
            state: Mutex::new(RegistrarState::default()),
        }
    }

    pub fn add_domain(&self, id: &str, status: RegistrationStatus, locked: bool, nameservers: &[&str]) {
        self.state.lock().unwrap().domains.insert(
            id.to_string(),
            RegistrarDomain {
                status,
                locked,
                nameservers: nameservers.iter().map(|s| s.to_string()).collect(),
            },
        );
    }

    pub fn set_status(&self, id: &str, status: RegistrationStatus) {
        if let Some(domain) = self.state.lock().unwrap().domains.get_mut(id) {
            domain.status = status;
        }
    }

    pub fn refuse_unlock(&self, refuse: bool) {
        self.state.lock().unwrap().refuse_unlock = refuse;
    }

    pub fn domain(&self, id: &str) -> Option<RegistrarDomain> {
        self.state.lock().unwrap().domains.get(id).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl RegistrarClient for FakeRegistrar {
    async fn get_domain(&self, domain_id: &str) -> Result<RegistrarDomain, RegistrarError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("get {}", domain_id));
        state
            .domains
            .get(domain_id)
            .cloned()
            .ok_or_else(|| RegistrarError::NotFound(domain_id.to_string()))
    }

    async fn update_nameservers(
        &self,
        domain_id: &str,
        nameservers: &[String],
    ) -> Result<(), RegistrarError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("nameservers {}", domain_id));
        let domain = state
            .domains
            .get_mut(domain_id)
            .ok_or_else(|| RegistrarError::NotFound(domain_id.to_string()))?;
        if domain.locked {
            return Err(RegistrarError::Locked(domain_id.to_string()));
        }
        domain.nameservers = nameservers.to_vec();
        Ok(())
    }

    async fn set_lock(&self, domain_id: &str, locked: bool) -> Result<(), RegistrarError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("lock {} {}", domain_id, locked));
        if !locked && state.refuse_unlock {
            return Err(RegistrarError::Locked(domain_id.to_string()));
        }
        let domain = state
            .domains
            .get_mut(domain_id)
            .ok_or_else(|| RegistrarError::NotFound(domain_id.to_string()))?;
        domain.locked = locked;
        Ok(())
    }

    fn is_configured(&self) -> bool {
        self.configured
    }
}

#[derive(Default)]
pub(crate) struct FakeResolver {
    answers: Mutex<HashMap<String, Vec<String>>>,
}

impl FakeResolver {
    pub fn set(&self, domain: &str, nameservers: &[&str]) {
        self.answers.lock().unwrap().insert(
            domain.to_string(),
            nameservers.iter().map(|ns| normalize_nameserver(ns)).collect(),
        );
    }
}

#[async_trait]
impl NameserverResolver for FakeResolver {
    async fn lookup_nameservers(&self, domain: &str) -> Result<Vec<String>, DnsError> {
        Ok(self
            .answers
            .lock()
            .unwrap()
            .get(domain)
            .cloned()
            .unwrap_or_default())
    }
}

// ----------------------------------------------------------------------
// Audit and mail
// ----------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct RecordingAuditLogger {
    events: Mutex<Vec<(String, Option<i32>)>>,
}

impl RecordingAuditLogger {
    pub fn operations(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(op, _)| op.clone())
            .collect()
    }
}

#[async_trait]
impl AuditLogger for RecordingAuditLogger {
    async fn create_audit_log(&self, operation: &dyn AuditOperation) -> anyhow::Result<()> {
        self.events
            .lock()
            .unwrap()
            .push((operation.operation_type(), operation.tenant_id()));
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct RecordingMailer {
    sent: Mutex<Vec<WelcomeEmail>>,
    fail: AtomicBool,
}

impl RecordingMailer {
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<WelcomeEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_welcome(&self, email: &WelcomeEmail) -> Result<(), MailerError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MailerError::Delivery("smtp down".into()));
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }

    fn is_configured(&self) -> bool {
        true
    }
}

// ----------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------

pub(crate) struct Harness {
    pub db: TestDatabase,
    pub config: PlatformConfig,
    pub journal: Journal,
    pub dns: Arc<FakeDns>,
    pub proxy: Arc<FakeProxy>,
    pub registrar: Arc<FakeRegistrar>,
    pub resolver: Arc<FakeResolver>,
    pub audit: Arc<RecordingAuditLogger>,
    pub mailer: Arc<RecordingMailer>,
    pub orchestrator: Arc<ProvisioningOrchestrator>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(false, |_| {}).await
    }

    pub async fn with_registrar() -> Self {
        Self::build(true, |_| {}).await
    }

    pub async fn build(registrar: bool, configure: impl FnOnce(&mut PlatformConfig)) -> Self {
        let db = TestDatabase::new().await.unwrap();

        let mut config = PlatformConfig::default();
        config.dns.parent_domain = PARENT.to_string();
        config.dns.zone_id = ZONE.to_string();
        config.provisioning.target_nameservers =
            vec!["ns1.tenantry.net".to_string(), "ns2.tenantry.net".to_string()];
        if registrar {
            config.registrar = Some(RegistrarSettings {
                api_base_url: "http://registrar.test".to_string(),
                ..Default::default()
            });
        }
        configure(&mut config);

        let journal = Journal::default();
        let dns = Arc::new(FakeDns::with_journal(PARENT, journal.clone()));
        let proxy = Arc::new(FakeProxy::new(journal.clone()));
        let registrar = Arc::new(FakeRegistrar::new(registrar));
        let resolver = Arc::new(FakeResolver::default());
        let audit = Arc::new(RecordingAuditLogger::default());
        let mailer = Arc::new(RecordingMailer::default());

        let planes = ControlPlanes {
            dns: dns.clone(),
            proxy: proxy.clone(),
            registrar: registrar.clone(),
            resolver: resolver.clone(),
        };
        let orchestrator = Arc::new(
            ProvisioningOrchestrator::new(
                db.connection(),
                planes,
                audit.clone(),
                mailer.clone(),
                &config,
            )
            .unwrap(),
        );

        Self {
            db,
            config,
            journal,
            dns,
            proxy,
            registrar,
            resolver,
            audit,
            mailer,
            orchestrator,
        }
    }

    pub fn ctx(&self) -> RequestContext {
        RequestContext::system("test")
    }

    pub fn target_nameservers(&self) -> Vec<String> {
        self.config.provisioning.target_nameservers.clone()
    }

    pub fn scheduler(&self) -> ReconciliationScheduler {
        ReconciliationScheduler::new(self.db.connection(), self.orchestrator.clone())
    }

    pub async fn provision(&self, subdomain: &str) -> ProvisionedTenant {
        self.orchestrator
            .provision_free_tenant(
                &self.ctx(),
                FreeTenantRequest {
                    subdomain: subdomain.to_string(),
                    customer_name: "Test Customer".to_string(),
                    customer_email: format!("{}@example.org", subdomain),
                    customer_password: PASSWORD.to_string(),
                    send_welcome_email: false,
                },
            )
            .await
            .unwrap()
    }
}

/// Insert a customer and tenant directly, bypassing the orchestrator.
pub(crate) async fn insert_customer_with_tenant(
    db: &DbConnection,
    domain: &str,
    deleted: bool,
) -> (customers::Model, tenants::Model) {
    let customer = customers::ActiveModel {
        name: Set("Fixture".to_string()),
        email: Set(format!("owner@{}", domain)),
        password_hash: Set(crate::passwords::hash_password(PASSWORD).unwrap()),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap();

    let tenant = tenants::ActiveModel {
        customer_id: Set(customer.id),
        domain: Set(domain.to_string()),
        is_subdomain: Set(true),
        parent_domain: Set(Some(PARENT.to_string())),
        theme: Set("default".to_string()),
        plan: Set("free".to_string()),
        is_deleted: Set(deleted),
        deleted_at: Set(deleted.then(Utc::now)),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap();

    (customer, tenant)
}

/// Push a record's `updated_at` into the past.
pub(crate) async fn backdate(db: &DbConnection, record_id: i32, by: chrono::Duration) {
    domain_records::Entity::update_many()
        .col_expr(domain_records::Column::UpdatedAt, Expr::value(Utc::now() - by))
        .filter(domain_records::Column::Id.eq(record_id))
        .exec(db)
        .await
        .unwrap();
}
