//! Core utilities and types shared across all Tenantry crates

pub mod audit;
pub mod config;
pub mod envelope;
pub mod error;
pub mod error_builder;
pub mod notifications;
pub mod types;
mod request_context;

// Re-export commonly used types
pub use audit::*;
pub use config::*;
pub use envelope::ApiError;
pub use error::*;
pub use error_builder::*;
pub use notifications::{Mailer, MailerError, NoopMailer, WelcomeEmail};
pub use request_context::RequestContext;
pub use types::*;

// Re-export external dependencies
pub use anyhow;
pub use async_trait;
pub use chrono;
pub use serde;
pub use serde_json;
pub use thiserror;
pub use tokio;
pub use tracing;
pub use uuid;
