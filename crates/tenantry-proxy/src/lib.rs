//! Reverse proxy control plane for Tenantry
//!
//! Routes are inserted into a running Caddy instance through its admin JSON
//! API; no restart is involved. Each domain maps to exactly one route whose
//! `@id` is derived from the domain, so re-adding is a replace and removal is
//! addressable without a lookup.

pub mod caddy;
pub mod controller;
pub mod errors;
pub mod probe;

pub use caddy::CaddyProxyController;
pub use controller::{
    is_routable_host, route_id_for_domain, DesiredRoute, ProxyController, ProxyStatus,
};
pub use errors::ProxyError;
pub use probe::{ProbeResult, SiteProber};
