//! Delivery of the per-pass creation report.
//!
//! The [`Notifier`] facade sends the rendered report by email when SMTP is
//! configured and is a no-op otherwise. Delivery failures never fail a pass.

pub mod email;

use chrono::Local;
use tracing::{info, warn};

use crate::config::NotificationConfig;
use crate::errors::NotificationError;
use crate::models::TargetAccount;
use crate::report;

/// Dispatches creation reports to the configured channel.
pub struct Notifier {
    email: Option<email::EmailNotifier>,
}

impl Notifier {
    /// Create a new notifier from the notification configuration.
    pub fn new(config: &NotificationConfig) -> Self {
        let email = match (&config.smtp_server, config.sender()) {
            (Some(server), Some(from)) if !config.recipients.is_empty() => {
                info!("email notifications enabled");
                let notifier = email::EmailNotifier::new(
                    server.clone(),
                    config.smtp_port,
                    from.to_string(),
                    config.recipients.clone(),
                );
                Some(match (&config.smtp_user, &config.smtp_password) {
                    (Some(user), Some(password)) => {
                        notifier.with_credentials(user.clone(), password.clone())
                    }
                    _ => notifier,
                })
            }
            _ => None,
        };

        Self { email }
    }

    /// Send the report for `created`. Does nothing when the list is empty.
    pub async fn notify_created(&self, created: &[TargetAccount]) -> Result<(), NotificationError> {
        if created.is_empty() {
            return Ok(());
        }
        let Some(ref email) = self.email else {
            return Ok(());
        };

        info!(accounts = created.len(), "sending creation report");
        let subject = report::subject(Local::now());
        let body = report::render(created);
        if let Err(e) = email.send(&subject, &body).await {
            warn!(error = %e, "creation report delivery failed");
            return Err(e);
        }
        Ok(())
    }

    /// Return whether any notification channel is configured.
    pub fn is_configured(&self) -> bool {
        self.email.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notifier_not_configured() {
        let notifier = Notifier::new(&NotificationConfig::default());
        assert!(!notifier.is_configured());
    }

    #[test]
    fn test_notifier_requires_recipients() {
        let config = NotificationConfig {
            smtp_server: Some("smtp.example.com".into()),
            smtp_user: Some("sync@example.com".into()),
            ..Default::default()
        };
        assert!(!Notifier::new(&config).is_configured());

        let config = NotificationConfig {
            recipients: vec!["admin@example.com".into()],
            ..config
        };
        assert!(Notifier::new(&config).is_configured());
    }

    #[tokio::test]
    async fn test_empty_report_not_sent() {
        let config = NotificationConfig {
            smtp_server: Some("smtp.invalid".into()),
            from: Some("sync@example.com".into()),
            recipients: vec!["admin@example.com".into()],
            ..Default::default()
        };
        assert!(Notifier::new(&config).notify_created(&[]).await.is_ok());
    }
}
