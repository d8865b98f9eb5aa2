//! Queue wiring shared by the handlers.

use std::sync::Arc;

use mailqueue_core::EmailTask;
use mailqueue_infra::queue::{EmailQueue, EnqueueError, QueueStore};

/// Queue store behind the intake, chosen at startup.
pub type SharedStore = Arc<dyn QueueStore>;

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error(transparent)]
    Enqueue(#[from] EnqueueError),

    #[error("enqueue was interrupted: {0}")]
    Interrupted(#[from] tokio::task::JoinError),
}

/// Producer side of the email queue.
#[derive(Clone)]
pub struct AppServices {
    queue: EmailQueue<SharedStore>,
}

impl std::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppServices")
            .field("queue", &self.queue.name())
            .finish()
    }
}

impl AppServices {
    pub fn new(queue: EmailQueue<SharedStore>) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &EmailQueue<SharedStore> {
        &self.queue
    }

    /// Enqueue off the async runtime; store calls block.
    pub async fn enqueue(&self, task: EmailTask) -> Result<EmailTask, IntakeError> {
        let queue = self.queue.clone();
        let queued = tokio::task::spawn_blocking(move || queue.enqueue(&task).map(|()| task)).await?;
        Ok(queued?)
    }
}
