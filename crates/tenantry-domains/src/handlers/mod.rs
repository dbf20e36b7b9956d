pub(crate) mod auth;
pub(crate) mod domain_manager;
pub(crate) mod types;

pub use domain_manager::{configure_routes, create_router, DomainManagerApiDoc};
pub use types::{create_domain_app_state, DomainAppState};
