//! Redis list-backed queue store.
//!
//! - **Append**: `RPUSH <queue> <payload>`
//! - **Pop**: `BLPOP <queue> <timeout>`; Redis parks the connection until an
//!   element arrives, so waiting costs no round-trips.
//! - **Depth**: `LLEN <queue>`
//!
//! Producers share a small pool of idle connections: a call takes one (or
//! opens one when none is idle) and hands it back on success. A connection
//! that saw an error is dropped instead. The consumer side keeps its own
//! connection for blocking pops, so a parked `BLPOP` never holds up a
//! producer, and throws it away after any error so the next pop reconnects.

use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, instrument};

use super::store::{QueueStore, QueueStoreError};

/// Default timeout for establishing a connection.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Slack added on top of the `BLPOP` timeout before the socket read gives up.
const READ_TIMEOUT_SLACK: Duration = Duration::from_secs(5);

/// Most idle producer connections kept around between calls.
pub const DEFAULT_POOL_SIZE: usize = 8;

/// Free-list of idle connections.
///
/// Busy connections are owned by their caller, so the lock is only held to
/// push or pop. Concurrent callers beyond `max_idle` still get a connection;
/// the surplus is closed when it comes back.
struct ConnectionPool<C> {
    idle: Mutex<Vec<C>>,
    max_idle: usize,
}

impl<C> ConnectionPool<C> {
    fn new(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(max_idle)),
            max_idle,
        }
    }

    fn idle(&self) -> std::sync::MutexGuard<'_, Vec<C>> {
        match self.idle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn take(&self) -> Option<C> {
        self.idle().pop()
    }

    fn give_back(&self, conn: C) {
        let mut idle = self.idle();
        if idle.len() < self.max_idle {
            idle.push(conn);
        }
    }

    fn idle_count(&self) -> usize {
        self.idle().len()
    }
}

pub struct RedisQueueStore {
    client: redis::Client,
    connect_timeout: Duration,
    producers: ConnectionPool<redis::Connection>,
    consumer: Mutex<Option<redis::Connection>>,
}

impl std::fmt::Debug for RedisQueueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisQueueStore")
            .field("connect_timeout", &self.connect_timeout)
            .field("pool_size", &self.producers.max_idle)
            .field("idle", &self.producers.idle_count())
            .finish_non_exhaustive()
    }
}

impl RedisQueueStore {
    /// Open a client for `redis_url` and verify the server answers `PING`.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379/0")
    pub fn connect(redis_url: impl AsRef<str>) -> Result<Self, QueueStoreError> {
        Self::connect_with_pool_size(redis_url, DEFAULT_POOL_SIZE)
    }

    /// Like [`connect`](Self::connect), keeping at most `pool_size` idle
    /// producer connections.
    pub fn connect_with_pool_size(
        redis_url: impl AsRef<str>,
        pool_size: usize,
    ) -> Result<Self, QueueStoreError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| QueueStoreError::Connection(e.to_string()))?;

        let store = Self {
            client,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            producers: ConnectionPool::new(pool_size),
            consumer: Mutex::new(None),
        };
        store.ping()?;
        Ok(store)
    }

    /// Round-trip a `PING`; the connection stays in the pool afterwards.
    pub fn ping(&self) -> Result<(), QueueStoreError> {
        let _: String = self.pooled("PING", |conn| redis::cmd("PING").query(conn))?;
        Ok(())
    }

    fn connection(&self) -> Result<redis::Connection, QueueStoreError> {
        self.client
            .get_connection_with_timeout(self.connect_timeout)
            .map_err(|e| QueueStoreError::Connection(e.to_string()))
    }

    /// Run one command on a pooled producer connection.
    ///
    /// A connection the server closed while it sat idle shows up as a dropped
    /// connection; that case is retried once on a fresh connection.
    fn pooled<T>(
        &self,
        command: &str,
        run: impl Fn(&mut redis::Connection) -> redis::RedisResult<T>,
    ) -> Result<T, QueueStoreError> {
        if let Some(mut conn) = self.producers.take() {
            match run(&mut conn) {
                Ok(value) => {
                    self.producers.give_back(conn);
                    return Ok(value);
                }
                Err(e) if e.is_connection_dropped() => {
                    debug!(command, error = %e, "discarding stale pooled connection");
                }
                Err(e) => return Err(store_error(command, e)),
            }
        }

        let mut conn = self.connection()?;
        let value = run(&mut conn).map_err(|e| store_error(command, e))?;
        self.producers.give_back(conn);
        Ok(value)
    }
}

fn store_error(command: &str, e: redis::RedisError) -> QueueStoreError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
        QueueStoreError::Connection(format!("{command} failed: {e}"))
    } else {
        QueueStoreError::Command(format!("{command} failed: {e}"))
    }
}

impl QueueStore for RedisQueueStore {
    #[instrument(skip(self, payload), fields(bytes = payload.len()), err)]
    fn append(&self, queue: &str, payload: &[u8]) -> Result<(), QueueStoreError> {
        let _: i64 = self.pooled("RPUSH", |conn| {
            redis::cmd("RPUSH").arg(queue).arg(payload).query(conn)
        })?;
        Ok(())
    }

    fn blocking_pop(&self, queue: &str, wait: Duration) -> Result<Option<Vec<u8>>, QueueStoreError> {
        let mut consumer = self
            .consumer
            .lock()
            .map_err(|_| QueueStoreError::Command("consumer connection lock poisoned".to_string()))?;

        if consumer.is_none() {
            debug!(queue, "opening consumer connection");
            *consumer = Some(self.connection()?);
        }
        let Some(conn) = consumer.as_mut() else {
            return Err(QueueStoreError::Connection(
                "consumer connection unavailable".to_string(),
            ));
        };

        // BLPOP treats 0 as "forever"; always wait at least a second so the
        // caller gets control back to check for shutdown.
        let timeout_secs = wait.as_secs().max(1);
        let read_timeout = Duration::from_secs(timeout_secs) + READ_TIMEOUT_SLACK;
        if let Err(e) = conn.set_read_timeout(Some(read_timeout)) {
            *consumer = None;
            return Err(store_error("SET READ TIMEOUT", e));
        }

        let result: redis::RedisResult<Option<(String, Vec<u8>)>> = redis::cmd("BLPOP")
            .arg(queue)
            .arg(timeout_secs)
            .query(conn);

        match result {
            Ok(popped) => Ok(popped.map(|(_key, payload)| payload)),
            Err(e) => {
                *consumer = None;
                Err(store_error("BLPOP", e))
            }
        }
    }

    fn len(&self, queue: &str) -> Result<usize, QueueStoreError> {
        self.pooled("LLEN", |conn| redis::cmd("LLEN").arg(queue).query(conn))
    }
}
