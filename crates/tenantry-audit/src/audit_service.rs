use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set};
use std::sync::Arc;
use tenantry_core::{AuditLogger, AuditOperation};
use tenantry_database::DbConnection;
use tenantry_entities::audit_logs;
use tracing::debug;

pub struct AuditService {
    db: Arc<DbConnection>,
}

impl AuditService {
    pub fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }

    pub async fn create_audit_log_typed<T: AuditOperation + ?Sized>(
        &self,
        operation: &T,
    ) -> anyhow::Result<audit_logs::Model> {
        let now = Utc::now();
        let data_json = operation.serialize()?;

        let new_audit_log = audit_logs::ActiveModel {
            operation_type: Set(operation.operation_type()),
            customer_id: Set(operation.customer_id()),
            tenant_id: Set(operation.tenant_id()),
            ip_address: Set(operation.ip_address()),
            user_agent: Set(operation.user_agent().to_string()),
            data: Set(data_json),
            audit_date: Set(now),
            created_at: Set(now),
            ..Default::default()
        };

        let result = new_audit_log
            .insert(self.db.as_ref())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create audit log: {}", e))?;

        debug!(
            "Recorded audit event {} for tenant {:?}",
            result.operation_type, result.tenant_id
        );
        Ok(result)
    }

    /// Most recent events for one tenant, newest first.
    pub async fn get_tenant_audit_logs(
        &self,
        tenant_id: i32,
        limit: Option<u64>,
    ) -> anyhow::Result<Vec<audit_logs::Model>> {
        let mut query = audit_logs::Entity::find()
            .filter(audit_logs::Column::TenantId.eq(tenant_id))
            .order_by_desc(audit_logs::Column::AuditDate)
            .order_by_desc(audit_logs::Column::Id);

        if let Some(limit) = limit {
            query = query.limit(limit);
        }

        Ok(query.all(self.db.as_ref()).await?)
    }
}

#[async_trait::async_trait]
impl AuditLogger for AuditService {
    async fn create_audit_log(&self, operation: &dyn AuditOperation) -> anyhow::Result<()> {
        self.create_audit_log_typed(operation).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenantry_core::{DomainAuditEvent, RequestContext};
    use tenantry_database::test_utils::TestDatabase;

    #[tokio::test]
    async fn test_records_and_reads_back_events() {
        let test_db = TestDatabase::new().await.unwrap();
        let service = AuditService::new(test_db.connection());
        let ctx = RequestContext::system("test").for_customer(5);

        let first = DomainAuditEvent::new("TENANT_PROVISIONED", &ctx, "acme.sites.example.net")
            .tenant(11);
        let second = DomainAuditEvent::new("DOMAIN_ACTIVATED", &ctx, "acme.sites.example.net")
            .tenant(11)
            .details(serde_json::json!({"route_id": "tenant-acme-sites-example-net"}));
        let unrelated = DomainAuditEvent::new("TENANT_PROVISIONED", &ctx, "other.sites.example.net")
            .tenant(12);

        service.create_audit_log(&first).await.unwrap();
        service.create_audit_log(&second).await.unwrap();
        service.create_audit_log(&unrelated).await.unwrap();

        let logs = service.get_tenant_audit_logs(11, None).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].operation_type, "DOMAIN_ACTIVATED");
        assert_eq!(logs[0].customer_id, Some(5));
        assert!(logs[0].data.contains("tenant-acme-sites-example-net"));

        let limited = service.get_tenant_audit_logs(11, Some(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
    }
}
