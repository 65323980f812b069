//! Outbound mail via SMTP.

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

use crate::config::MailConfig;
use crate::error::NotifyError;

/// Delivers a completion notification to one address.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// SMTP sender using lettre's blocking transport, run on the blocking pool.
pub struct SmtpMailSender {
    config: MailConfig,
}

impl SmtpMailSender {
    pub fn new(config: MailConfig) -> Self {
        Self { config }
    }

    fn send_blocking(config: &MailConfig, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        let creds = Credentials::new(config.username.clone(), config.password.clone());

        let transport = SmtpTransport::relay(&config.smtp_host)
            .map_err(|e| NotifyError::SendFailed {
                address: to.to_string(),
                reason: format!("SMTP relay error: {e}"),
            })?
            .port(config.smtp_port)
            .credentials(creds)
            .build();

        let email = Message::builder()
            .from(config.from_address.parse().map_err(|e| {
                NotifyError::InvalidMessage {
                    reason: format!("Invalid from address: {e}"),
                }
            })?)
            .to(to.parse().map_err(|e| NotifyError::InvalidMessage {
                reason: format!("Invalid to address: {e}"),
            })?)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| NotifyError::InvalidMessage {
                reason: format!("Failed to build email: {e}"),
            })?;

        transport.send(&email).map_err(|e| NotifyError::SendFailed {
            address: to.to_string(),
            reason: format!("SMTP send failed: {e}"),
        })?;

        tracing::info!("Notification mail sent to {to}");
        Ok(())
    }
}

#[async_trait]
impl MailSender for SmtpMailSender {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        let config = self.config.clone();
        let to = to.to_string();
        let subject = subject.to_string();
        let body = body.to_string();
        tokio::task::spawn_blocking(move || Self::send_blocking(&config, &to, &subject, &body))
            .await
            .map_err(|e| NotifyError::SendFailed {
                address: String::new(),
                reason: format!("send task panicked: {e}"),
            })?
    }
}
