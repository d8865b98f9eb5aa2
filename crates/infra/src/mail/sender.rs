//! Email delivery: render a task's template and hand it to the transport.

use std::sync::Arc;

use tracing::debug;

use mailqueue_core::{EmailTask, ValidationError};

use super::templates::{TemplateError, TemplateRenderer};
use super::transport::{MailTransport, TransportError};

/// One delivery attempt for one task.
pub trait EmailDelivery: Send + Sync {
    fn send(&self, task: &EmailTask) -> Result<(), DeliveryError>;
}

impl<D> EmailDelivery for Arc<D>
where
    D: EmailDelivery + ?Sized,
{
    fn send(&self, task: &EmailTask) -> Result<(), DeliveryError> {
        (**self).send(task)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("invalid email task: {0}")]
    InvalidTask(#[from] ValidationError),

    #[error("failed to render email template: {0}")]
    Render(#[from] TemplateError),

    #[error("failed to send email: {0}")]
    Transport(#[from] TransportError),
}

/// Renderer + transport.
#[derive(Debug, Clone)]
pub struct EmailSender<R, T> {
    renderer: R,
    transport: T,
}

impl<R, T> EmailSender<R, T>
where
    R: TemplateRenderer,
    T: MailTransport,
{
    pub fn new(renderer: R, transport: T) -> Self {
        Self { renderer, transport }
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<R, T> EmailDelivery for EmailSender<R, T>
where
    R: TemplateRenderer,
    T: MailTransport,
{
    fn send(&self, task: &EmailTask) -> Result<(), DeliveryError> {
        task.validate()?;

        let body = self.renderer.render(&task.template_name, &task.data)?;
        debug!(
            to = %task.to,
            template = %task.template_name,
            bytes = body.len(),
            "template rendered"
        );

        self.transport.deliver(&task.to, &task.subject, &body)?;
        Ok(())
    }
}
