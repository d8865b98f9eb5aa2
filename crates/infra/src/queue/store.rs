//! Queue store implementations.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Durable, ordered, shared FIFO of serialized tasks, addressed by name.
///
/// Implementations must be safe for many concurrent producers. A waiting
/// [`blocking_pop`](QueueStore::blocking_pop) must suspend on the store, never
/// spin.
pub trait QueueStore: Send + Sync {
    /// Append a payload to the tail of `queue`.
    fn append(&self, queue: &str, payload: &[u8]) -> Result<(), QueueStoreError>;

    /// Remove and return the head of `queue`, waiting up to `wait` for one to
    /// arrive. `Ok(None)` means nothing arrived in time (not an error).
    fn blocking_pop(&self, queue: &str, wait: Duration) -> Result<Option<Vec<u8>>, QueueStoreError>;

    /// Number of entries currently in `queue`.
    fn len(&self, queue: &str) -> Result<usize, QueueStoreError>;

    fn is_empty(&self, queue: &str) -> Result<bool, QueueStoreError> {
        Ok(self.len(queue)? == 0)
    }
}

/// Queue store error.
///
/// `Connection` means the store could not be reached at all; `Command` means
/// it was reached but the operation failed. An empty queue is never an error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueStoreError {
    #[error("queue store unreachable: {0}")]
    Connection(String),
    #[error("queue store command failed: {0}")]
    Command(String),
}

impl QueueStoreError {
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl<S> QueueStore for Arc<S>
where
    S: QueueStore + ?Sized,
{
    fn append(&self, queue: &str, payload: &[u8]) -> Result<(), QueueStoreError> {
        (**self).append(queue, payload)
    }

    fn blocking_pop(&self, queue: &str, wait: Duration) -> Result<Option<Vec<u8>>, QueueStoreError> {
        (**self).blocking_pop(queue, wait)
    }

    fn len(&self, queue: &str) -> Result<usize, QueueStoreError> {
        (**self).len(queue)
    }
}

/// In-memory queue store for tests/dev.
///
/// Waiting consumers park on a condition variable and are woken by appends.
#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    queues: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
    ready: Condvar,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Copy of the entries currently in `queue`, head first.
    pub fn snapshot(&self, queue: &str) -> Vec<Vec<u8>> {
        self.queues
            .lock()
            .map(|queues| {
                queues
                    .get(queue)
                    .map(|q| q.iter().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }
}

fn poisoned<T>(_: T) -> QueueStoreError {
    QueueStoreError::Command("in-memory queue lock poisoned".to_string())
}

impl QueueStore for InMemoryQueueStore {
    fn append(&self, queue: &str, payload: &[u8]) -> Result<(), QueueStoreError> {
        let mut queues = self.queues.lock().map_err(poisoned)?;
        queues
            .entry(queue.to_string())
            .or_default()
            .push_back(payload.to_vec());
        drop(queues);

        // Consumers may be waiting on different queue names.
        self.ready.notify_all();
        Ok(())
    }

    fn blocking_pop(&self, queue: &str, wait: Duration) -> Result<Option<Vec<u8>>, QueueStoreError> {
        let deadline = Instant::now() + wait;
        let mut queues = self.queues.lock().map_err(poisoned)?;

        loop {
            if let Some(payload) = queues.get_mut(queue).and_then(VecDeque::pop_front) {
                return Ok(Some(payload));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let (guard, _) = self
                .ready
                .wait_timeout(queues, deadline - now)
                .map_err(poisoned)?;
            queues = guard;
        }
    }

    fn len(&self, queue: &str) -> Result<usize, QueueStoreError> {
        let queues = self.queues.lock().map_err(poisoned)?;
        Ok(queues.get(queue).map_or(0, VecDeque::len))
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn append_then_pop_is_fifo() {
        let store = InMemoryQueueStore::new();
        store.append("q", b"one").unwrap();
        store.append("q", b"two").unwrap();
        assert_eq!(store.len("q").unwrap(), 2);

        assert_eq!(store.blocking_pop("q", Duration::ZERO).unwrap().unwrap(), b"one");
        assert_eq!(store.blocking_pop("q", Duration::ZERO).unwrap().unwrap(), b"two");
        assert!(store.is_empty("q").unwrap());
    }

    #[test]
    fn queues_are_isolated_by_name() {
        let store = InMemoryQueueStore::new();
        store.append("a", b"x").unwrap();

        assert!(store.blocking_pop("b", Duration::ZERO).unwrap().is_none());
        assert_eq!(store.len("a").unwrap(), 1);
    }

    #[test]
    fn pop_on_empty_queue_times_out() {
        let store = InMemoryQueueStore::new();
        let started = Instant::now();

        let popped = store.blocking_pop("q", Duration::from_millis(50)).unwrap();

        assert!(popped.is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn waiting_pop_is_woken_by_append() {
        let store = InMemoryQueueStore::arc();

        let consumer = {
            let store = store.clone();
            thread::spawn(move || store.blocking_pop("q", Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(20));
        store.append("q", b"late").unwrap();

        let popped = consumer.join().unwrap().unwrap();
        assert_eq!(popped.as_deref(), Some(&b"late"[..]));
    }

    #[test]
    fn concurrent_appends_are_not_lost() {
        let store = InMemoryQueueStore::arc();

        let producers: Vec<_> = (0..8)
            .map(|p| {
                let store = store.clone();
                thread::spawn(move || {
                    for i in 0..25 {
                        store.append("q", format!("{p}-{i}").as_bytes()).unwrap();
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        let mut entries: Vec<_> = store.snapshot("q");
        assert_eq!(entries.len(), 200);
        entries.sort();
        entries.dedup();
        assert_eq!(entries.len(), 200);
    }
}
