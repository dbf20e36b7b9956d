//! Cooperative reconciliation scheduler
//!
//! There is no dedicated worker process. Every request handled by the API
//! may trigger a pass once the interval has elapsed, and the CLI can run a
//! ticker or a one-off pass. A compare-and-set on `scheduler_state` makes
//! sure overlapping triggers run at most one pass per interval.

use chrono::{Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, Set};
use serde::Serialize;
use std::sync::Arc;
use tenantry_core::{RequestContext, UtcDateTime};
use tenantry_database::DbConnection;
use tenantry_entities::scheduler_state;
use tenantry_entities::types::DomainStatus;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use crate::errors::DomainError;
use crate::orchestrator::ProvisioningOrchestrator;

const JOB_NAME: &str = "domain_reconciliation";

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ReconcileReport {
    /// `ns_pending` records whose delegation was confirmed.
    pub verified: usize,
    /// Records that reached `active` through the normal ladder.
    pub advanced: usize,
    /// Stalled or drifted records that had missing pieces replayed.
    pub repaired: usize,
    /// Stuck deletions flagged for an operator.
    pub flagged: usize,
    pub failed: usize,
}

pub struct ReconciliationScheduler {
    db: Arc<DbConnection>,
    orchestrator: Arc<ProvisioningOrchestrator>,
    interval: Duration,
    stale_after: Duration,
}

impl ReconciliationScheduler {
    pub fn new(db: Arc<DbConnection>, orchestrator: Arc<ProvisioningOrchestrator>) -> Self {
        let settings = orchestrator.settings();
        let interval = settings.reconcile_interval();
        let stale_after = settings.stale_after();
        Self {
            db,
            orchestrator,
            interval,
            stale_after,
        }
    }

    /// Run a pass if the interval has elapsed and nobody else claimed it.
    pub async fn maybe_run(&self) -> Result<Option<ReconcileReport>, DomainError> {
        if !self.try_claim(Utc::now(), false).await? {
            return Ok(None);
        }
        self.reconcile().await.map(Some)
    }

    /// Run a pass now, ignoring the interval. The gate is still stamped so
    /// request-triggered passes back off afterwards.
    pub async fn run_once(&self) -> Result<ReconcileReport, DomainError> {
        self.try_claim(Utc::now(), true).await?;
        self.reconcile().await
    }

    /// Ticks every interval until the process exits.
    pub async fn start(self: Arc<Self>) {
        let period = self
            .interval
            .to_std()
            .unwrap_or_else(|_| std::time::Duration::from_secs(60));
        info!("Reconciliation ticker running every {:?}", period);

        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let scheduler = self.clone();
            tokio::spawn(async move {
                if let Err(e) = scheduler.maybe_run().await {
                    error!("Reconciliation pass failed: {}", e);
                }
            });
        }
    }

    /// Compare-and-set on the job's `last_run_at`. Returns true if this
    /// caller owns the pass.
    async fn try_claim(&self, now: UtcDateTime, force: bool) -> Result<bool, DomainError> {
        let existing = scheduler_state::Entity::find_by_id(JOB_NAME.to_string())
            .one(self.db.as_ref())
            .await?;

        let Some(state) = existing else {
            let inserted = scheduler_state::Entity::insert(scheduler_state::ActiveModel {
                job: Set(JOB_NAME.to_string()),
                last_run_at: Set(now),
            })
            .exec_without_returning(self.db.as_ref())
            .await;
            return match inserted {
                Ok(_) => Ok(true),
                Err(e) => {
                    let e = DomainError::from(e);
                    if e.is_unique_violation() {
                        debug!("Another caller created the {} gate first", JOB_NAME);
                        Ok(false)
                    } else {
                        Err(e)
                    }
                }
            };
        };

        if !force && now - state.last_run_at < self.interval {
            return Ok(false);
        }

        let result = scheduler_state::Entity::update_many()
            .col_expr(scheduler_state::Column::LastRunAt, Expr::value(now))
            .filter(scheduler_state::Column::Job.eq(JOB_NAME))
            .filter(scheduler_state::Column::LastRunAt.eq(state.last_run_at))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// One pass over every record that needs attention. The lists are read
    /// up front; records changed by a concurrent request show up as lost
    /// transitions and are skipped.
    async fn reconcile(&self) -> Result<ReconcileReport, DomainError> {
        let store = self.orchestrator.store();
        let ctx = RequestContext::system("reconciler");
        let cutoff = Utc::now() - self.stale_after;

        let ns_pending = store.find_by_status(&[DomainStatus::NsPending], None).await?;
        let ns_verified = store.find_by_status(&[DomainStatus::NsVerified], None).await?;
        let stalled = store
            .find_by_status(
                &[
                    DomainStatus::Pending,
                    DomainStatus::DnsConfigured,
                    DomainStatus::ProxyConfigured,
                ],
                Some(cutoff),
            )
            .await?;
        let deleting = store
            .find_by_status(&[DomainStatus::Deleting], Some(cutoff))
            .await?;
        let active = store.find_by_status(&[DomainStatus::Active], None).await?;

        let mut report = ReconcileReport::default();

        for record in &ns_pending {
            match self.orchestrator.verify_delegation(record).await {
                Ok(Some(verified)) => {
                    report.verified += 1;
                    let result = self
                        .orchestrator
                        .complete_provisioning(&ctx, &verified)
                        .await;
                    if let Some(done) = tally(&mut report, &verified.domain, result) {
                        if done.status == DomainStatus::Active {
                            report.advanced += 1;
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tally::<()>(&mut report, &record.domain, Err(e));
                }
            }
        }

        for record in &ns_verified {
            let result = self.orchestrator.complete_provisioning(&ctx, record).await;
            if let Some(done) = tally(&mut report, &record.domain, result) {
                if done.status == DomainStatus::Active {
                    report.advanced += 1;
                }
            }
        }

        // Custom domains never sit in `pending` outside their creating
        // transaction
        for record in stalled
            .iter()
            .filter(|r| r.is_subdomain || r.status != DomainStatus::Pending)
        {
            warn!(
                "{} stuck in {} since {}, replaying",
                record.domain, record.status, record.updated_at
            );
            let result = self.orchestrator.complete_provisioning(&ctx, record).await;
            if let Some(done) = tally(&mut report, &record.domain, result) {
                if done.status == DomainStatus::Active {
                    report.repaired += 1;
                }
            }
        }

        for record in &deleting {
            let result = self.orchestrator.flag_stale_deletion(record).await;
            if let Some(true) = tally(&mut report, &record.domain, result) {
                warn!("Deletion of {} has not finished", record.domain);
                report.flagged += 1;
            }
        }

        for record in &active {
            let result = self.orchestrator.check_drift(&ctx, record).await;
            if let Some(true) = tally(&mut report, &record.domain, result) {
                report.repaired += 1;
            }
        }

        info!(
            "Reconciliation pass done: {} verified, {} advanced, {} repaired, {} flagged, {} failed",
            report.verified, report.advanced, report.repaired, report.flagged, report.failed
        );
        Ok(report)
    }
}

/// Count a failed step; lost races are expected and only logged.
fn tally<T>(report: &mut ReconcileReport, domain: &str, result: Result<T, DomainError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(DomainError::InvalidTransition { from, to }) => {
            debug!("{} moved on concurrently ({} -> {}), skipping", domain, from, to);
            None
        }
        Err(e) => {
            error!("Reconciling {} failed: {}", domain, e);
            report.failed += 1;
            None
        }
    }
}
