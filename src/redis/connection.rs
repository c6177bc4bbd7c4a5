//! Redis connection pool with bounded idle recycling
//!
//! Provides the connections every bitmap operation runs on:
//! - Lazy dialing: no socket is opened until the first `get()`
//! - Per-connection AUTH and SELECT, failures discard the connection
//! - Bounded concurrency (`max_active`) and a bounded idle list (`max_idle`)
//! - Idle connections older than `idle_timeout` are dropped on acquisition
//! - Timeouts on dialing and on every command
//!
//! Operations are never retried here; errors go straight back to the caller.
//!
//! # Example
//!
//! ```rust,no_run
//! use tracklist::redis::{RedisConfig, RedisPool};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = RedisPool::new(RedisConfig::with_url("redis://:secret@localhost:6379/2"))?;
//!
//! let mut conn = pool.get().await?;
//! let pong: String = conn.query(&redis::cmd("PING")).await?;
//! assert_eq!(pong, "PONG");
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::{Client, Cmd, FromRedisValue, Pipeline, RedisError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use super::util::{connection_error_message, safe_redis_error, sanitize_url, ConnectionTarget};

/// Configuration for the Redis connection pool
#[derive(Clone, Debug)]
pub struct RedisConfig {
    /// Connection string, `redis://:password@host:port/db`
    pub url: String,

    /// Maximum number of idle connections kept for reuse
    /// Default: 128
    pub max_idle: usize,

    /// Maximum number of connections handed out at once
    /// Default: 64
    pub max_active: usize,

    /// Idle connections older than this are closed instead of reused
    /// Default: 60 seconds
    pub idle_timeout: Duration,

    /// Timeout for dialing a new connection, including AUTH and SELECT
    /// Default: 5 seconds
    pub connection_timeout: Duration,

    /// Timeout for a single command or transaction
    /// Default: 5 seconds
    pub command_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            max_idle: 128,
            max_active: 64,
            idle_timeout: Duration::from_secs(60),
            connection_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(5),
        }
    }
}

impl RedisConfig {
    /// Create a new config with the specified URL
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the idle pool bound
    pub fn max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// Set the concurrent connection bound
    pub fn max_active(mut self, max_active: usize) -> Self {
        self.max_active = max_active;
        self
    }

    /// Set the idle lifetime
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the connection timeout
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the command timeout
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_active == 0 {
            return Err(Error::ConfigError(
                "max_active must be greater than 0".to_string(),
            ));
        }
        if self.max_active > 10_000 {
            return Err(Error::ConfigError(
                "max_active cannot exceed 10000".to_string(),
            ));
        }
        if self.connection_timeout.is_zero() || self.command_timeout.is_zero() {
            return Err(Error::ConfigError(
                "timeouts must be greater than 0".to_string(),
            ));
        }

        let target = ConnectionTarget::parse(&self.url)?;

        #[cfg(not(feature = "redis-tls"))]
        if target.scheme == "rediss" {
            return Err(Error::ConfigError(
                "URL uses 'rediss://' but the 'redis-tls' feature is not compiled. \
                 Enable it with: cargo build --features redis-tls"
                    .to_string(),
            ));
        }
        #[cfg(feature = "redis-tls")]
        let _ = target;

        Ok(())
    }
}

/// Connection pool metrics
#[derive(Debug, Default)]
pub struct PoolMetrics {
    /// Total number of successful dials
    pub connections_created: AtomicU64,

    /// Total number of failed dials (including AUTH/SELECT failures)
    pub connection_failures: AtomicU64,

    /// Total number of connections discarded after an error
    pub connections_discarded: AtomicU64,

    /// Total number of commands and transactions executed
    pub commands_executed: AtomicU64,

    /// Total number of command and transaction failures
    pub command_failures: AtomicU64,

    /// Total command latency in microseconds
    pub total_latency_us: AtomicU64,
}

impl PoolMetrics {
    /// Record a successful dial
    pub fn record_connection(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed dial
    pub fn record_connection_failure(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection thrown away instead of being returned
    pub fn record_discard(&self) {
        self.connections_discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful command with latency
    pub fn record_command(&self, latency: Duration) {
        self.commands_executed.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record a command failure
    pub fn record_command_failure(&self) {
        self.command_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get average command latency in microseconds
    pub fn average_latency_us(&self) -> f64 {
        let total = self.total_latency_us.load(Ordering::Relaxed);
        let count = self.commands_executed.load(Ordering::Relaxed);
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }

    fn snapshot(&self, idle_connections: usize) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
            connections_discarded: self.connections_discarded.load(Ordering::Relaxed),
            commands_executed: self.commands_executed.load(Ordering::Relaxed),
            command_failures: self.command_failures.load(Ordering::Relaxed),
            average_latency_us: self.average_latency_us(),
            idle_connections,
        }
    }
}

/// Snapshot of pool metrics at a point in time
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolMetricsSnapshot {
    /// Connections dialed during the pool lifetime
    pub connections_created: u64,
    /// Dials that failed
    pub connection_failures: u64,
    /// Connections discarded after an error
    pub connections_discarded: u64,
    /// Commands executed through the pool
    pub commands_executed: u64,
    /// Commands that failed
    pub command_failures: u64,
    /// Average command latency in microseconds
    pub average_latency_us: f64,
    /// Connections currently idle in the pool
    pub idle_connections: usize,
}

struct IdleConnection {
    conn: MultiplexedConnection,
    returned_at: Instant,
}

/// Redis connection pool
///
/// Shared between the tracker and every bitmap handle through an `Arc`.
/// The pool serializes acquire/release; what callers do with a connection
/// once they hold it is not serialized.
pub struct RedisPool {
    /// Client bound to the address only; AUTH/SELECT are sent by `dial`
    client: Client,

    /// Parsed connection string
    target: ConnectionTarget,

    /// Pool configuration
    config: RedisConfig,

    /// Idle connections, most recently returned at the back
    idle: Mutex<VecDeque<IdleConnection>>,

    /// Bounds the number of connections handed out at once
    semaphore: Arc<Semaphore>,

    /// Connection metrics
    metrics: PoolMetrics,
}

impl std::fmt::Debug for RedisPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisPool")
            .field("target", &self.target)
            .field("max_idle", &self.config.max_idle)
            .field("max_active", &self.config.max_active)
            .finish()
    }
}

impl RedisPool {
    /// Create a new pool
    ///
    /// Validates the configuration and parses the connection string. No
    /// connection is opened until the first call to `get()`.
    pub fn new(config: RedisConfig) -> Result<Self> {
        config.validate()?;
        let target = ConnectionTarget::parse(&config.url)?;

        let client = Client::open(target.address_url())
            .map_err(|e| Error::ConfigError(safe_redis_error(&config.url, &e)))?;

        debug!(
            url = %sanitize_url(&config.url),
            max_idle = config.max_idle,
            max_active = config.max_active,
            "Redis connection pool created"
        );

        Ok(Self {
            client,
            target,
            semaphore: Arc::new(Semaphore::new(config.max_active)),
            idle: Mutex::new(VecDeque::new()),
            metrics: PoolMetrics::default(),
            config,
        })
    }

    /// Get a connection from the pool
    ///
    /// Reuses the most recently returned idle connection if one is still within
    /// its idle lifetime, otherwise dials a new one. The connection goes back
    /// to the pool when the guard is dropped, on every code path.
    pub async fn get(&self) -> Result<PooledConnection<'_>> {
        let permit = tokio::time::timeout(
            self.config.connection_timeout,
            self.semaphore.clone().acquire_owned(),
        )
        .await
        .map_err(|_| {
            Error::ConnectionError(connection_error_message(
                &self.config.url,
                "Timed out waiting for a free connection",
            ))
        })?
        .map_err(|_| Error::ConnectionError("Connection pool closed".to_string()))?;

        let conn = match self.take_idle() {
            Some(conn) => conn,
            None => self.dial().await?,
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: self,
            broken: false,
            _permit: permit,
        })
    }

    /// Pop the freshest idle connection, closing any that outlived `idle_timeout`
    fn take_idle(&self) -> Option<MultiplexedConnection> {
        let mut idle = self.idle.lock();
        let idle_timeout = self.config.idle_timeout;
        while idle
            .front()
            .is_some_and(|entry| entry.returned_at.elapsed() > idle_timeout)
        {
            idle.pop_front();
        }
        idle.pop_back().map(|entry| entry.conn)
    }

    fn put(&self, conn: MultiplexedConnection) {
        if self.config.max_idle == 0 {
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() >= self.config.max_idle {
            idle.pop_front();
        }
        idle.push_back(IdleConnection {
            conn,
            returned_at: Instant::now(),
        });
    }

    /// Open and prepare a new physical connection
    async fn dial(&self) -> Result<MultiplexedConnection> {
        let start = Instant::now();

        let prepared = tokio::time::timeout(self.config.connection_timeout, async {
            let mut conn = self
                .client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| Error::ConnectionError(safe_redis_error(&self.config.url, &e)))?;

            if let Some(password) = &self.target.password {
                redis::cmd("AUTH")
                    .arg(password)
                    .query_async::<()>(&mut conn)
                    .await
                    .map_err(|e| {
                        warn!("Redis rejected AUTH");
                        Error::ConnectionError(safe_redis_error(&self.config.url, &e))
                    })?;
            }

            if self.target.db != 0 {
                redis::cmd("SELECT")
                    .arg(self.target.db)
                    .query_async::<()>(&mut conn)
                    .await
                    .map_err(|e| {
                        warn!(db = self.target.db, "Redis rejected SELECT");
                        Error::ConnectionError(safe_redis_error(&self.config.url, &e))
                    })?;
            }

            Ok::<_, Error>(conn)
        })
        .await;

        let result = match prepared {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectionError(connection_error_message(
                &self.config.url,
                "Connection timeout",
            ))),
        };

        match &result {
            Ok(_) => {
                self.metrics.record_connection();
                debug!("Redis connection established in {:?}", start.elapsed());
            },
            Err(e) => {
                self.metrics.record_connection_failure();
                debug!(error = %e, "Redis dial failed");
            },
        }
        result
    }

    /// Send PING on a pooled connection
    pub async fn ping(&self) -> Result<Duration> {
        let start = Instant::now();
        let mut conn = self.get().await?;
        let _: String = conn
            .query(&redis::cmd("PING"))
            .await
            .map_err(|e| Error::StoreCommandError(format!("PING: {}", e)))?;
        Ok(start.elapsed())
    }

    /// Get pool metrics
    pub fn metrics(&self) -> PoolMetricsSnapshot {
        self.metrics.snapshot(self.idle.lock().len())
    }

    /// Number of idle connections currently held
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Get the pool configuration
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Parsed connection target
    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }
}

/// A pooled connection that returns to the pool when dropped
///
/// A connection that saw an I/O error, a dropped socket or a timeout is
/// marked broken and closed instead of being returned.
pub struct PooledConnection<'a> {
    conn: Option<MultiplexedConnection>,
    pool: &'a RedisPool,
    broken: bool,
    _permit: OwnedSemaphorePermit,
}

impl<'a> PooledConnection<'a> {
    /// Run a single command under the pool's command timeout
    pub async fn query<T: FromRedisValue>(&mut self, cmd: &Cmd) -> std::result::Result<T, RedisError> {
        let timeout = self.pool.config.command_timeout;
        let conn = self.conn_mut()?;
        let start = Instant::now();
        let result = match tokio::time::timeout(timeout, cmd.query_async::<T>(conn)).await {
            Ok(result) => result,
            Err(_) => Err(timed_out()),
        };
        self.finish(start, result)
    }

    /// Run a pipeline (atomic or not) under the pool's command timeout
    pub async fn query_pipeline<T: FromRedisValue>(
        &mut self,
        pipe: &Pipeline,
    ) -> std::result::Result<T, RedisError> {
        let timeout = self.pool.config.command_timeout;
        let conn = self.conn_mut()?;
        let start = Instant::now();
        let result = match tokio::time::timeout(timeout, pipe.query_async::<T>(conn)).await {
            Ok(result) => result,
            Err(_) => Err(timed_out()),
        };
        self.finish(start, result)
    }

    /// Mark the connection as unusable so it is closed on drop
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Get a reference to the parent pool
    pub fn pool(&self) -> &RedisPool {
        self.pool
    }

    fn conn_mut(&mut self) -> std::result::Result<&mut MultiplexedConnection, RedisError> {
        self.conn.as_mut().ok_or_else(|| {
            RedisError::from((redis::ErrorKind::ClientError, "connection already released"))
        })
    }

    fn finish<T>(
        &mut self,
        start: Instant,
        result: std::result::Result<T, RedisError>,
    ) -> std::result::Result<T, RedisError> {
        match &result {
            Ok(_) => self.pool.metrics.record_command(start.elapsed()),
            Err(e) => {
                self.pool.metrics.record_command_failure();
                if is_connection_error(e) {
                    self.broken = true;
                }
            },
        }
        result
    }
}

impl<'a> Drop for PooledConnection<'a> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if self.broken {
                self.pool.metrics.record_discard();
                debug!("Discarding broken Redis connection");
            } else {
                self.pool.put(conn);
            }
        }
    }
}

fn timed_out() -> RedisError {
    RedisError::from(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        "command timed out",
    ))
}

/// Check if an error leaves the connection in an unknown state
fn is_connection_error(e: &RedisError) -> bool {
    e.is_connection_dropped() || e.is_io_error() || e.is_timeout() || e.is_unrecoverable_error()
}
