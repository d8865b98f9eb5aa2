//! Outbound mail: template rendering, SMTP transport and the sender that
//! combines them.

pub mod sender;
pub mod templates;
pub mod transport;

pub use sender::{DeliveryError, EmailDelivery, EmailSender};
pub use templates::{TemplateError, TemplateRegistry, TemplateRenderer, URL_FIELDS};
pub use transport::{
    MailTransport, SmtpConfig, SmtpMailer, TransportError, validate_address,
};
