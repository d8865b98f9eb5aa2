//! The email queue: validated, serialized appends onto a [`QueueStore`].

use std::time::Duration;

use tracing::info;

use mailqueue_core::{EmailTask, ValidationError};

use super::store::{QueueStore, QueueStoreError};

/// Fixed logical queue name.
pub const EMAIL_QUEUE: &str = "email_queue";

/// Enqueue failure.
#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("invalid email task: {0}")]
    Validation(#[from] ValidationError),
    /// Well-formed tasks always serialize; seeing this is a bug.
    #[error("failed to serialize email task: {0}")]
    Serialization(#[source] serde_json::Error),
    #[error("failed to enqueue email task: {0}")]
    Store(#[from] QueueStoreError),
}

/// Handle on the email queue inside a store.
///
/// Cheap to clone when the store is (e.g. `Arc<S>`); producers and the
/// worker each hold their own clone.
#[derive(Debug, Clone)]
pub struct EmailQueue<S> {
    store: S,
    name: String,
}

impl<S: QueueStore> EmailQueue<S> {
    /// Queue under the default name ([`EMAIL_QUEUE`]).
    pub fn new(store: S) -> Self {
        Self::with_name(store, EMAIL_QUEUE)
    }

    pub fn with_name(store: S, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Validate, serialize and append a task to the tail of the queue.
    ///
    /// Nothing is appended when validation fails. Only the recipient and
    /// subject are logged; template data is user supplied and stays out of
    /// the logs.
    pub fn enqueue(&self, task: &EmailTask) -> Result<(), EnqueueError> {
        task.validate()?;

        let payload = task.encode().map_err(EnqueueError::Serialization)?;
        self.store.append(&self.name, &payload)?;

        info!(
            queue = %self.name,
            to = %task.to,
            subject = %task.subject,
            retries = task.retries,
            "email task enqueued"
        );
        Ok(())
    }

    /// Take the head entry, waiting up to `wait` for one.
    pub fn pop(&self, wait: Duration) -> Result<Option<Vec<u8>>, QueueStoreError> {
        self.store.blocking_pop(&self.name, wait)
    }

    /// Current queue depth.
    pub fn len(&self) -> Result<usize, QueueStoreError> {
        self.store.len(&self.name)
    }

    pub fn is_empty(&self) -> Result<bool, QueueStoreError> {
        self.store.is_empty(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::queue::store::InMemoryQueueStore;

    fn queue() -> EmailQueue<Arc<InMemoryQueueStore>> {
        EmailQueue::new(InMemoryQueueStore::arc())
    }

    fn task() -> EmailTask {
        EmailTask::new("a@x.com", "S", "T").with_data("name", "Bob")
    }

    #[test]
    fn enqueue_then_pop_round_trips() {
        let queue = queue();
        queue.enqueue(&task()).unwrap();

        let payload = queue.pop(Duration::ZERO).unwrap().unwrap();
        let popped = EmailTask::decode(&payload).unwrap();

        assert_eq!(popped, task());
        assert_eq!(popped.retries, 0);
    }

    #[test]
    fn attempt_count_survives_the_queue() {
        let queue = queue();
        let retried = task().requeued().requeued();
        queue.enqueue(&retried).unwrap();

        let popped = EmailTask::decode(&queue.pop(Duration::ZERO).unwrap().unwrap()).unwrap();
        assert_eq!(popped.retries, 2);
    }

    #[test]
    fn empty_recipient_is_rejected_and_not_appended() {
        let queue = queue();
        let before = queue.len().unwrap();

        let mut bad = task();
        bad.to = String::new();
        let err = queue.enqueue(&bad).unwrap_err();

        assert!(matches!(
            err,
            EnqueueError::Validation(ValidationError::Required { field: "to" })
        ));
        assert_eq!(queue.len().unwrap(), before);
    }

    #[test]
    fn uses_the_fixed_queue_name() {
        let store = InMemoryQueueStore::arc();
        let queue = EmailQueue::new(store.clone());
        queue.enqueue(&task()).unwrap();

        assert_eq!(queue.name(), "email_queue");
        assert_eq!(store.len(EMAIL_QUEUE).unwrap(), 1);
    }
}
