//! Operator alerts
//!
//! The poll engine calls a [`Notifier`] when a fetch cycle fails for a
//! reason other than rate limiting. Delivery is best effort: callers log a
//! failed notification and move on.

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::{ExposeSecret, SecretString};
use std::sync::{Arc, Mutex};

use crate::config::{EmailConfig, Secrets};
use crate::error::{NotifyError, Result};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject: &str, body: &str) -> Result<()>;
}

/// Sends plain-text alerts over SMTP with STARTTLS
pub struct EmailNotifier {
    smtp_host: String,
    smtp_port: u16,
    from: Mailbox,
    to: Mailbox,
    username: String,
    password: SecretString,
}

impl EmailNotifier {
    pub fn new(
        config: &EmailConfig,
        from: &str,
        password: SecretString,
        to: &str,
    ) -> Result<Self> {
        let from_box: Mailbox = from
            .parse()
            .map_err(|e| NotifyError::Address(format!("{}: {}", from, e)))?;
        let to_box: Mailbox = to
            .parse()
            .map_err(|e| NotifyError::Address(format!("{}: {}", to, e)))?;

        Ok(Self {
            smtp_host: config.smtp_host.clone(),
            smtp_port: config.smtp_port,
            from: from_box,
            to: to_box,
            username: from.to_string(),
            password,
        })
    }

    /// Build from the alerting fields of `secrets`
    pub fn from_secrets(config: &EmailConfig, secrets: &Secrets) -> Result<Self> {
        Self::new(
            config,
            &secrets.notifier_address,
            SecretString::from(secrets.notifier_password.expose_secret().to_string()),
            &secrets.alert_recipient,
        )
    }

    fn build_message(&self, subject: &str, body: &str) -> Result<Message> {
        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| NotifyError::Message(e.to_string()).into())
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<()> {
        let email = self.build_message(subject, body)?;

        let creds = Credentials::new(
            self.username.clone(),
            self.password.expose_secret().to_string(),
        );

        let mailer: AsyncSmtpTransport<Tokio1Executor> =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.smtp_host)
                .map_err(|e| NotifyError::Transport(e.to_string()))?
                .port(self.smtp_port)
                .credentials(creds)
                .build();

        mailer
            .send(email)
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        tracing::info!(to = %self.to, subject = subject, "Alert email sent");
        Ok(())
    }
}

/// Notifier that only records alerts, for tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<(String, String)>>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose every delivery fails after being recorded
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((subject.to_string(), body.to_string()));

        if self.fail {
            return Err(NotifyError::Transport("recording notifier set to fail".to_string()).into());
        }
        Ok(())
    }
}
