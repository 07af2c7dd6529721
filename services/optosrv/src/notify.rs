//! Alarm notification transport.
//!
//! The alarm monitor only knows the [`Notifier`] capability; the production
//! implementation delivers mails over SMTP. TLS, credentials and the
//! from/to/subject fields come from the alarm transport configuration.

use async_trait::async_trait;
use lettre::{
    message::Mailbox,
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::debug;

use opto_model::SmtpConfig;

use crate::error::{OptoSrvError, Result};

/// Outbound notification capability.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> Result<()>;
}

/// SMTP mail notifier.
pub struct SmtpNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl std::fmt::Debug for SmtpNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpNotifier")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish()
    }
}

impl SmtpNotifier {
    pub fn from_config(config: &SmtpConfig) -> Result<Self> {
        let mut builder = if config.ssl {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.server).map_err(|e| {
                OptoSrvError::notify(format!("invalid SMTP relay {}: {e}", config.server))
            })?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.server)
        };
        builder = builder.port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        let from = parse_mailbox(&config.from)?;
        let to = parse_mailbox(&config.to)?;

        Ok(Self {
            mailer: builder.build(),
            from,
            to,
        })
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox> {
    address
        .parse()
        .map_err(|e| OptoSrvError::notify(format!("invalid mail address '{address}': {e}")))
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        let mail = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| OptoSrvError::notify(format!("failed to build mail: {e}")))?;

        self.mailer
            .send(mail)
            .await
            .map_err(|e| OptoSrvError::notify(format!("smtp send failed: {e}")))?;

        debug!(subject, "alarm mail handed to SMTP transport");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smtp_config() -> SmtpConfig {
        SmtpConfig {
            server: "smtp.example.org".to_string(),
            port: 465,
            ssl: true,
            username: Some("heizung".to_string()),
            password: Some("secret".to_string()),
            from: "heizung@example.org".to_string(),
            to: "owner@example.org".to_string(),
            subject: "Heizung Alarm".to_string(),
        }
    }

    #[tokio::test]
    async fn test_notifier_builds_from_config() {
        assert!(SmtpNotifier::from_config(&smtp_config()).is_ok());

        let mut plain = smtp_config();
        plain.ssl = false;
        plain.username = None;
        plain.password = None;
        assert!(SmtpNotifier::from_config(&plain).is_ok());
    }

    #[test]
    fn test_bad_mail_address_is_rejected() {
        let mut config = smtp_config();
        config.to = "not an address".to_string();
        let err = SmtpNotifier::from_config(&config).unwrap_err();
        assert!(matches!(err, OptoSrvError::Notify(_)));
    }
}
