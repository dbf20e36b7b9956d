use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Welcome message sent once a free tenant goes live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WelcomeEmail {
    pub to: String,
    pub customer_name: String,
    pub domain: String,
}

#[derive(Error, Debug)]
pub enum MailerError {
    #[error("Mailer not configured")]
    NotConfigured,
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Best-effort outbound email. Callers log failures and carry on.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_welcome(&self, email: &WelcomeEmail) -> Result<(), MailerError>;

    fn is_configured(&self) -> bool;
}

/// Mailer used when no delivery backend is wired in.
#[derive(Debug, Default)]
pub struct NoopMailer;

#[async_trait]
impl Mailer for NoopMailer {
    async fn send_welcome(&self, email: &WelcomeEmail) -> Result<(), MailerError> {
        tracing::debug!("No mailer configured, skipping welcome email for {}", email.domain);
        Ok(())
    }

    fn is_configured(&self) -> bool {
        false
    }
}
