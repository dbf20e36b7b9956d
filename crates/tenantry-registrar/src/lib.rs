//! Registrar client for domains bought through the platform
//!
//! Free subdomains never touch this crate. When no registrar is configured
//! the [`NullRegistrar`] is injected once at startup and every call reports
//! [`RegistrarError::NotConfigured`].

mod client;
mod errors;

pub use client::{
    create_registrar_client, HttpRegistrarClient, NullRegistrar, RegistrarClient,
    RegistrarDomain, RegistrationStatus,
};
pub use errors::RegistrarError;
