//! Email notification sender via SMTP.
//!
//! Uses the `lettre` crate to send plain-text reports over a STARTTLS relay.

use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info, warn};

use crate::errors::NotificationError;

/// SMTP email notifier.
pub struct EmailNotifier {
    host: String,
    port: u16,
    from: String,
    recipients: Vec<String>,
    credentials: Option<(String, String)>,
}

impl EmailNotifier {
    /// Create a new email notifier for the relay at `host:port`.
    pub fn new(host: String, port: u16, from: String, recipients: Vec<String>) -> Self {
        info!(
            smtp = %host,
            port,
            from = %from,
            recipients = ?recipients,
            "initializing email notifier"
        );
        Self {
            host,
            port,
            from,
            recipients,
            credentials: None,
        }
    }

    /// Authenticate to the relay with `username` / `password`.
    pub fn with_credentials(mut self, username: String, password: String) -> Self {
        self.credentials = Some((username, password));
        self
    }

    /// Send a plain-text email to all configured recipients.
    ///
    /// Stops at the first recipient that fails.
    pub async fn send(&self, subject: &str, body: &str) -> Result<(), NotificationError> {
        debug!(subject, to = ?self.recipients, "sending email");

        let from_mailbox: Mailbox = self
            .from
            .parse()
            .map_err(|e| NotificationError::EmailError(format!("invalid from address: {}", e)))?;

        let transport = self.build_transport()?;

        for recipient in &self.recipients {
            let to_mailbox: Mailbox = recipient.trim().parse().map_err(|e| {
                NotificationError::EmailError(format!("invalid recipient '{}': {}", recipient, e))
            })?;

            let email = Message::builder()
                .from(from_mailbox.clone())
                .to(to_mailbox)
                .subject(subject)
                .header(ContentType::TEXT_PLAIN)
                .body(body.to_string())
                .map_err(|e| {
                    NotificationError::EmailError(format!("failed to build email: {}", e))
                })?;

            match transport.send(email).await {
                Ok(_) => {
                    info!(to = %recipient, "email sent successfully");
                }
                Err(e) => {
                    warn!(to = %recipient, error = %e, "failed to send email");
                    return Err(NotificationError::EmailError(format!(
                        "SMTP send to '{}' failed: {}",
                        recipient, e
                    )));
                }
            }
        }

        Ok(())
    }

    /// Build an async STARTTLS transport, with credentials when configured.
    fn build_transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotificationError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.host)
            .map_err(|e| NotificationError::EmailError(format!("SMTP connection error: {}", e)))?
            .port(self.port);

        if let Some((ref username, ref password)) = self.credentials {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_notifier_construction() {
        let notifier = EmailNotifier::new(
            "smtp.example.com".into(),
            587,
            "sync@example.com".into(),
            vec!["admin@example.com".into()],
        )
        .with_credentials("sync@example.com".into(), "pw".into());
        assert_eq!(notifier.from, "sync@example.com");
        assert_eq!(notifier.port, 587);
        assert_eq!(notifier.recipients.len(), 1);
        assert!(notifier.credentials.is_some());
    }

    #[tokio::test]
    async fn test_transport_builds_for_valid_host() {
        let notifier = EmailNotifier::new(
            "smtp.example.com".into(),
            2525,
            "sync@example.com".into(),
            vec![],
        );
        assert!(notifier.build_transport().is_ok());
    }

    #[tokio::test]
    async fn test_invalid_sender_rejected() {
        let notifier = EmailNotifier::new(
            "smtp.example.com".into(),
            587,
            "not an address".into(),
            vec!["admin@example.com".into()],
        );
        let err = notifier.send("subject", "body").await.unwrap_err();
        assert!(err.to_string().contains("invalid from address"));
    }
}
