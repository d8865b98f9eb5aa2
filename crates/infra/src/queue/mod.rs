//! The email queue: store abstraction, enqueue, retry policy and the worker
//! that drains it.

pub mod enqueue;
pub mod retry;
pub mod store;
pub mod worker;

#[cfg(feature = "redis")]
pub mod redis_store;

pub use enqueue::{EMAIL_QUEUE, EmailQueue, EnqueueError};
pub use retry::{
    DeliveryOutcome, MAX_RETRIES, RETRY_DELAY, RetryError, RetryPolicy, deliver_with_retry,
};
pub use store::{InMemoryQueueStore, QueueStore, QueueStoreError};
pub use worker::{QueueWorker, TaskOutcome, WorkerConfig, WorkerHandle, WorkerStats};

#[cfg(feature = "redis")]
pub use redis_store::RedisQueueStore;
