use anyhow::Result;
use serde::Serialize;
use serde_json::Value;

use crate::RequestContext;

/// Context information common to all audit events
#[derive(Debug, Clone, Serialize)]
pub struct AuditContext {
    pub request_id: String,
    pub customer_id: Option<i32>,
    pub ip_address: Option<String>,
    pub user_agent: String,
}

impl From<&RequestContext> for AuditContext {
    fn from(ctx: &RequestContext) -> Self {
        Self {
            request_id: ctx.request_id.clone(),
            customer_id: ctx.customer_id,
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
        }
    }
}

/// Trait for audit operations with serialization
pub trait AuditOperation: Send + Sync {
    /// Returns the operation type (e.g., "TENANT_PROVISIONED")
    fn operation_type(&self) -> String;

    /// Returns the customer that owns the affected tenant, when known
    fn customer_id(&self) -> Option<i32>;

    /// Returns the affected tenant, when known
    fn tenant_id(&self) -> Option<i32>;

    /// Returns the IP address if available
    fn ip_address(&self) -> Option<String>;

    /// Returns the user agent string
    fn user_agent(&self) -> &str;

    /// Serializes the operation to JSON
    fn serialize(&self) -> Result<String>;
}

/// Trait for services that can create audit logs
#[async_trait::async_trait]
pub trait AuditLogger: Send + Sync {
    /// Creates an audit log entry for the given operation
    async fn create_audit_log(&self, operation: &dyn AuditOperation) -> Result<()>;
}

/// Domain lifecycle event recorded in the audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct DomainAuditEvent {
    pub operation: &'static str,
    pub tenant_id: Option<i32>,
    pub domain: String,
    pub context: AuditContext,
    pub details: Value,
}

impl DomainAuditEvent {
    pub fn new(operation: &'static str, ctx: &RequestContext, domain: impl Into<String>) -> Self {
        Self {
            operation,
            tenant_id: None,
            domain: domain.into(),
            context: AuditContext::from(ctx),
            details: Value::Null,
        }
    }

    pub fn tenant(mut self, tenant_id: i32) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn customer(mut self, customer_id: i32) -> Self {
        self.context.customer_id = Some(customer_id);
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

impl AuditOperation for DomainAuditEvent {
    fn operation_type(&self) -> String {
        self.operation.to_string()
    }

    fn customer_id(&self) -> Option<i32> {
        self.context.customer_id
    }

    fn tenant_id(&self) -> Option<i32> {
        self.tenant_id
    }

    fn ip_address(&self) -> Option<String> {
        self.context.ip_address.clone()
    }

    fn user_agent(&self) -> &str {
        &self.context.user_agent
    }

    fn serialize(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Audit logger that discards every event.
pub struct NoopAuditLogger;

#[async_trait::async_trait]
impl AuditLogger for NoopAuditLogger {
    async fn create_audit_log(&self, operation: &dyn AuditOperation) -> Result<()> {
        tracing::trace!("Discarding audit event {}", operation.operation_type());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_event_serializes_context_and_details() {
        let ctx = RequestContext::system("scheduler");
        let event = DomainAuditEvent::new("DOMAIN_ACTIVATED", &ctx, "shop.example.com")
            .tenant(7)
            .customer(3)
            .details(serde_json::json!({ "route_id": "tenant-shop-example-com" }));

        assert_eq!(event.operation_type(), "DOMAIN_ACTIVATED");
        assert_eq!(event.tenant_id(), Some(7));
        assert_eq!(event.customer_id(), Some(3));

        let json: Value = serde_json::from_str(&AuditOperation::serialize(&event).unwrap()).unwrap();
        assert_eq!(json["domain"], "shop.example.com");
        assert_eq!(json["details"]["route_id"], "tenant-shop-example-com");
        assert_eq!(json["context"]["user_agent"], "scheduler");
    }
}
