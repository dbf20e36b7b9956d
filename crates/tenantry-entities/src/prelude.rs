pub use super::audit_logs::Entity as AuditLogs;
pub use super::customers::Entity as Customers;
pub use super::domain_records::Entity as DomainRecords;
pub use super::scheduler_state::Entity as SchedulerState;
pub use super::tenants::Entity as Tenants;
