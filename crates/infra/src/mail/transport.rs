//! Mail transport: puts a rendered message on the wire.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, Message, SmtpTransport, Transport};
use tracing::debug;

use mailqueue_core::ValidationError;

use crate::config::ConfigError;

/// Port that speaks TLS from the first byte (SMTPS); everything else upgrades
/// with STARTTLS.
const IMPLICIT_TLS_PORT: u16 = 465;

/// Delivery contract: one rendered HTML message to one recipient.
pub trait MailTransport: Send + Sync {
    fn deliver(&self, to: &str, subject: &str, html_body: &str) -> Result<(), TransportError>;
}

impl<T> MailTransport for Arc<T>
where
    T: MailTransport + ?Sized,
{
    fn deliver(&self, to: &str, subject: &str, html_body: &str) -> Result<(), TransportError> {
        (**self).deliver(to, subject, html_body)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid recipient {address:?}: {reason}")]
    InvalidRecipient { address: String, reason: String },

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// SMTP server, credentials and sender identity.
#[derive(Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub sender_address: String,
    pub sender_name: String,
    /// Network timeout for a single SMTP exchange.
    pub timeout: Duration,
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("sender_address", &self.sender_address)
            .field("sender_name", &self.sender_name)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl SmtpConfig {
    /// Every field a send needs must be present up front.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Missing("EMAIL_SMTP_SERVER"));
        }
        if self.port == 0 {
            return Err(ConfigError::invalid("EMAIL_SMTP_PORT", "0", "port must be non-zero"));
        }
        if self.sender_address.trim().is_empty() {
            return Err(ConfigError::Missing("EMAIL_SENDER_ADDRESS"));
        }
        if self.username.trim().is_empty() {
            return Err(ConfigError::Missing("EMAIL_SMTP_USERNAME"));
        }
        if self.password.trim().is_empty() {
            return Err(ConfigError::Missing("EMAIL_SMTP_PASSWORD"));
        }
        Ok(())
    }

    /// `From:` mailbox built from the sender name and address.
    pub fn sender_mailbox(&self) -> Result<Mailbox, ConfigError> {
        let address = Address::from_str(self.sender_address.trim()).map_err(|e| {
            ConfigError::invalid("EMAIL_SENDER_ADDRESS", &self.sender_address, e.to_string())
        })?;
        let name = Some(self.sender_name.trim().to_string()).filter(|n| !n.is_empty());
        Ok(Mailbox::new(name, address))
    }
}

/// Check that `raw` is exactly one syntactically valid address.
pub fn validate_address(raw: &str) -> Result<(), ValidationError> {
    Address::from_str(raw.trim())
        .map(|_| ())
        .map_err(|e| ValidationError::invalid_address(format!("{raw:?}: {e}")))
}

/// SMTP delivery via `lettre`.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: SmtpTransport,
    from: Mailbox,
}

impl std::fmt::Debug for SmtpMailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpMailer")
            .field("from", &self.from.to_string())
            .finish_non_exhaustive()
    }
}

impl SmtpMailer {
    /// Build a mailer; configuration problems surface here, never per send.
    pub fn new(config: &SmtpConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let from = config.sender_mailbox()?;

        let builder = if config.port == IMPLICIT_TLS_PORT {
            SmtpTransport::relay(&config.host)
        } else {
            SmtpTransport::starttls_relay(&config.host)
        }
        .map_err(|e| ConfigError::invalid("EMAIL_SMTP_SERVER", &config.host, e.to_string()))?;

        let transport = builder
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .timeout(Some(config.timeout))
            .build();

        Ok(Self { transport, from })
    }

    /// Assemble the MIME message for one recipient.
    pub fn build_message(&self, to: &str, subject: &str, html_body: &str) -> Result<Message, TransportError> {
        build_message(&self.from, to, subject, html_body)
    }
}

fn build_message(from: &Mailbox, to: &str, subject: &str, html_body: &str) -> Result<Message, TransportError> {
    let to: Mailbox = to.trim().parse().map_err(|e: lettre::address::AddressError| {
        TransportError::InvalidRecipient {
            address: to.to_string(),
            reason: e.to_string(),
        }
    })?;

    Message::builder()
        .from(from.clone())
        .to(to)
        .subject(subject)
        .header(ContentType::TEXT_HTML)
        .body(html_body.to_string())
        .map_err(|e| TransportError::Build(e.to_string()))
}

impl MailTransport for SmtpMailer {
    fn deliver(&self, to: &str, subject: &str, html_body: &str) -> Result<(), TransportError> {
        let message = self.build_message(to, subject, html_body)?;
        let response = self.transport.send(&message)?;
        debug!(to, code = %response.code(), "smtp server accepted message");
        Ok(())
    }
}
