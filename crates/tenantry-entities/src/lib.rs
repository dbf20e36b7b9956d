pub mod audit_logs;
pub mod customers;
pub mod domain_records;
pub mod scheduler_state;
pub mod tenants;
pub mod types;

pub mod prelude;
