//! DNS control plane for Tenantry
//!
//! Two halves live here:
//!
//! - [`DnsController`]: mutates CNAME records at the DNS provider. The
//!   production implementation talks to the Cloudflare v4 REST API with a
//!   bearer token. Creates are exists-tolerant and deletes are
//!   not-found-tolerant so every call can be retried safely.
//! - [`NameserverResolver`]: live `NS` lookups used to confirm that a custom
//!   domain has been delegated to the platform before any record is created.

pub mod cloudflare;
pub mod controller;
pub mod errors;
pub mod resolver;

pub use cloudflare::CloudflareDnsController;
pub use controller::{DnsController, DnsRecordRef};
pub use errors::DnsError;
pub use resolver::{nameservers_match, normalize_nameserver, HickoryNameserverResolver, NameserverResolver};
