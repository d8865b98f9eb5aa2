//! Delivery with bounded retry.
//!
//! A failed attempt is not retried in place: the task goes back onto the tail
//! of the queue with its attempt counter bumped, after a fixed pause. Once the
//! counter reaches the ceiling the next failure is terminal.

use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use mailqueue_core::EmailTask;

use super::enqueue::{EmailQueue, EnqueueError};
use super::store::QueueStore;
use crate::mail::{DeliveryError, EmailDelivery};

/// Highest `retries` value a task may be requeued with.
pub const MAX_RETRIES: u32 = 3;

/// Pause before a failed task goes back onto the queue.
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Fixed retry policy: same delay every time, bounded attempt count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            retry_delay: RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
        }
    }

    /// Whether a task that has already been retried `retries` times gets
    /// another go after failing.
    pub fn should_retry(&self, retries: u32) -> bool {
        retries < self.max_retries
    }
}

/// Non-terminal result of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Sent; `retries` is how many earlier attempts failed.
    Delivered { retries: u32 },
    /// Failed and put back on the queue with this attempt count.
    Requeued { retries: u32 },
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    /// Failed on the last allowed attempt; the task is dropped.
    #[error("giving up after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: DeliveryError,
    },

    /// Failed, and putting it back on the queue failed too. The task is gone.
    #[error("failed to requeue email: {requeue} (original error: {delivery})")]
    RequeueFailed {
        #[source]
        requeue: EnqueueError,
        delivery: DeliveryError,
    },
}

impl RetryError {
    pub fn is_task_lost(&self) -> bool {
        matches!(self, Self::RequeueFailed { .. })
    }
}

/// Attempt delivery of `task` once, requeueing it on a retryable failure.
///
/// Blocks for `policy.retry_delay` before requeueing, so the calling worker
/// handles nothing else in the meantime.
pub fn deliver_with_retry<S, D>(
    queue: &EmailQueue<S>,
    sender: &D,
    policy: &RetryPolicy,
    task: &EmailTask,
) -> Result<DeliveryOutcome, RetryError>
where
    S: QueueStore,
    D: EmailDelivery + ?Sized,
{
    let err = match sender.send(task) {
        Ok(()) => {
            info!(
                to = %task.to,
                subject = %task.subject,
                retries = task.retries,
                "email sent"
            );
            return Ok(DeliveryOutcome::Delivered {
                retries: task.retries,
            });
        }
        Err(err) => err,
    };

    if !policy.should_retry(task.retries) {
        error!(
            to = %task.to,
            subject = %task.subject,
            retries = task.retries,
            error = %err,
            "email delivery failed, max retries reached"
        );
        return Err(RetryError::Exhausted {
            attempts: task.retries.saturating_add(1),
            source: err,
        });
    }

    let retry = task.requeued();
    warn!(
        to = %retry.to,
        subject = %retry.subject,
        retries = retry.retries,
        error = %err,
        "email delivery failed, scheduling retry"
    );

    if !policy.retry_delay.is_zero() {
        thread::sleep(policy.retry_delay);
    }

    match queue.enqueue(&retry) {
        Ok(()) => Ok(DeliveryOutcome::Requeued {
            retries: retry.retries,
        }),
        Err(requeue) => {
            error!(
                to = %retry.to,
                subject = %retry.subject,
                retries = retry.retries,
                error = %err,
                requeue_error = %requeue,
                task_lost = true,
                "failed to requeue email"
            );
            Err(RetryError::RequeueFailed {
                requeue,
                delivery: err,
            })
        }
    }
}
