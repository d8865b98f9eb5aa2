//! Background queue worker.
//!
//! One thread, one task in flight. The loop pops with a bounded wait so it can
//! notice shutdown between pops, decodes the entry and runs it through
//! [`deliver_with_retry`]. Nothing that goes wrong inside the loop stops it;
//! only the shutdown signal does.

use std::io;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use mailqueue_core::EmailTask;

use super::enqueue::EmailQueue;
use super::retry::{DeliveryOutcome, RetryError, RetryPolicy, deliver_with_retry};
use super::store::{QueueStore, QueueStoreError};
use crate::mail::EmailDelivery;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Thread name, also used in logs
    pub name: String,
    /// Longest a single pop waits before shutdown is checked again
    pub poll_interval: Duration,
    /// Pause after a store error
    pub error_backoff: Duration,
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "email-worker".to_string(),
            poll_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_error_backoff(mut self, error_backoff: Duration) -> Self {
        self.error_backoff = error_backoff;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct WorkerStats {
    /// Entries taken off the queue
    pub popped: u64,
    pub delivered: u64,
    pub requeued: u64,
    /// Tasks given up on after the last allowed attempt
    pub dropped: u64,
    /// Entries that did not decode or could never be delivered
    pub malformed: u64,
    /// Tasks whose requeue failed
    pub lost: u64,
    pub store_errors: u64,
    pub uptime_secs: u64,
}

/// What happened to one popped entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Delivered { retries: u32 },
    Requeued { retries: u32 },
    Dropped,
    Lost,
    Malformed,
}

/// Handle to control a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    ///
    /// A task that is mid-delivery finishes (including any retry pause)
    /// before the worker exits.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    /// Current worker statistics.
    pub fn stats(&self) -> WorkerStats {
        read_stats(&self.stats)
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(thread::JoinHandle::is_finished)
    }
}

fn read_stats(stats: &Mutex<WorkerStats>) -> WorkerStats {
    match stats.lock() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Consumer of the email queue.
pub struct QueueWorker<S, D> {
    queue: EmailQueue<S>,
    sender: D,
    config: WorkerConfig,
    stats: Arc<Mutex<WorkerStats>>,
}

impl<S, D> std::fmt::Debug for QueueWorker<S, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueWorker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S, D> QueueWorker<S, D>
where
    S: QueueStore + 'static,
    D: EmailDelivery + 'static,
{
    pub fn new(queue: EmailQueue<S>, sender: D, config: WorkerConfig) -> Self {
        Self {
            queue,
            sender,
            config,
            stats: Arc::new(Mutex::new(WorkerStats::default())),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn stats(&self) -> WorkerStats {
        read_stats(&self.stats)
    }

    /// Spawn the worker loop on a named background thread.
    pub fn spawn(self) -> io::Result<WorkerHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = self.stats.clone();

        let join = thread::Builder::new()
            .name(self.config.name.clone())
            .spawn(move || self.run(&shutdown_rx))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }

    /// Run the loop on the calling thread until `shutdown` fires.
    ///
    /// A disconnected shutdown channel counts as a shutdown request.
    pub fn run(&self, shutdown: &mpsc::Receiver<()>) {
        let name = self.config.name.as_str();
        let started = Instant::now();
        info!(worker = name, queue = self.queue.name(), "email worker started");

        loop {
            if shutdown_requested(shutdown) {
                break;
            }

            match self.process_next() {
                Ok(_) => {}
                Err(e) => {
                    self.record(|s| s.store_errors += 1);
                    error!(worker = name, error = %e, "failed to pop from email queue");
                    if wait_for_shutdown(shutdown, self.config.error_backoff) {
                        break;
                    }
                }
            }

            self.record(|s| s.uptime_secs = started.elapsed().as_secs());
        }

        info!(worker = name, "email worker stopped");
    }

    /// Pop at most one entry and see it through.
    ///
    /// `Ok(None)` means the poll interval passed with nothing to do. Only a
    /// store error on the pop itself is returned; everything downstream is
    /// logged and folded into the outcome.
    pub fn process_next(&self) -> Result<Option<TaskOutcome>, QueueStoreError> {
        let Some(payload) = self.queue.pop(self.config.poll_interval)? else {
            return Ok(None);
        };
        self.record(|s| s.popped += 1);

        let task = match self.decode(&payload) {
            Ok(task) => task,
            Err(reason) => {
                error!(
                    worker = %self.config.name,
                    error = %reason,
                    bytes = payload.len(),
                    "dropping malformed queue entry"
                );
                self.record(|s| s.malformed += 1);
                return Ok(Some(TaskOutcome::Malformed));
            }
        };

        debug!(to = %task.to, retries = task.retries, "processing email task");
        let outcome = match self.deliver_with_retry(&task) {
            Ok(DeliveryOutcome::Delivered { retries }) => {
                self.record(|s| s.delivered += 1);
                TaskOutcome::Delivered { retries }
            }
            Ok(DeliveryOutcome::Requeued { retries }) => {
                self.record(|s| s.requeued += 1);
                TaskOutcome::Requeued { retries }
            }
            Err(RetryError::Exhausted { .. }) => {
                self.record(|s| s.dropped += 1);
                TaskOutcome::Dropped
            }
            Err(RetryError::RequeueFailed { .. }) => {
                self.record(|s| s.lost += 1);
                TaskOutcome::Lost
            }
        };

        Ok(Some(outcome))
    }

    /// Decode an entry and reject anything no producer could have queued.
    fn decode(&self, payload: &[u8]) -> Result<EmailTask, String> {
        let task = EmailTask::decode(payload).map_err(|e| e.to_string())?;
        task.validate().map_err(|e| e.to_string())?;
        if task.retries > self.config.retry.max_retries {
            return Err(format!(
                "retries {} exceeds the ceiling of {}",
                task.retries, self.config.retry.max_retries
            ));
        }
        Ok(task)
    }

    /// One delivery attempt for `task` under this worker's retry policy.
    pub fn deliver_with_retry(&self, task: &EmailTask) -> Result<DeliveryOutcome, RetryError> {
        deliver_with_retry(&self.queue, &self.sender, &self.config.retry, task)
    }

    fn record(&self, update: impl FnOnce(&mut WorkerStats)) {
        let mut stats = match self.stats.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        update(&mut stats);
    }
}

fn shutdown_requested(shutdown: &mpsc::Receiver<()>) -> bool {
    match shutdown.try_recv() {
        Ok(()) | Err(mpsc::TryRecvError::Disconnected) => true,
        Err(mpsc::TryRecvError::Empty) => false,
    }
}

/// Sleep for `backoff`, returning early (with `true`) on shutdown.
fn wait_for_shutdown(shutdown: &mpsc::Receiver<()>, backoff: Duration) -> bool {
    match shutdown.recv_timeout(backoff) {
        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => true,
        Err(mpsc::RecvTimeoutError::Timeout) => false,
    }
}
