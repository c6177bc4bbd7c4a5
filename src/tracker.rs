//! Presence tracking across the four calendar buckets
//!
//! A record call marks one entity present in the month, ISO week, day and hour
//! bucket of a metric at once. The four SETBITs are sent as one MULTI/EXEC
//! batch over a single connection, so an observer sees either all four bits or
//! none of them.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chrono::{Months, Utc};
//! use tracklist::{bitop, Keyspace, RedisConfig, RedisPool, Tracker};
//!
//! # async fn example() -> tracklist::Result<()> {
//! let pool = Arc::new(RedisPool::new(RedisConfig::default())?);
//! let tracker = Tracker::new(pool, Keyspace::default());
//!
//! let now = Utc::now();
//! let last_month = now - Months::new(1);
//! tracker.record_at_time("active", 123, last_month).await?;
//! tracker.record_now("active", 123).await?;
//!
//! let retained = bitop::and(&[
//!     tracker.month_bitmap_at("active", last_month)?,
//!     tracker.month_bitmap_at("active", now)?,
//! ])
//! .await?;
//! assert!(retained.test(123).await?);
//! # Ok(())
//! # }
//! ```

use crate::bitmap::{command_error, Bitmap};
use crate::error::{Error, Result};
use crate::keys::Keyspace;
use crate::redis::util::error_kind_label;
use crate::redis::RedisPool;
use crate::types::{EntityId, Granularity};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

/// Keys deleted per DEL command during bulk deletion
const DELETE_BATCH_SIZE: usize = 512;

/// Records presence and hands out bitmap handles
///
/// Holds no state of its own besides the injected pool and keyspace; cloning
/// is cheap and clones share the pool.
#[derive(Clone, Debug)]
pub struct Tracker {
    pool: Arc<RedisPool>,
    keyspace: Arc<Keyspace>,
}

impl Tracker {
    /// Create a tracker over `pool` writing under `keyspace`
    pub fn new(pool: Arc<RedisPool>, keyspace: Keyspace) -> Self {
        Self {
            pool,
            keyspace: Arc::new(keyspace),
        }
    }

    /// The pool all handles of this tracker use
    pub fn pool(&self) -> &Arc<RedisPool> {
        &self.pool
    }

    /// The keyspace all handles of this tracker use
    pub fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    /// Mark `id` present for `name` in every bucket containing `at`
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for a metric name that cannot be embedded in a key
    /// - `ConnectionError` if no connection can be acquired
    /// - `TransactionError` if the MULTI/EXEC batch fails; no bucket was updated
    pub async fn record_at_time(&self, name: &str, id: EntityId, at: DateTime<Utc>) -> Result<()> {
        let keys = self.keyspace.derive(name, at)?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        for key in keys.as_array() {
            pipe.cmd("SETBIT").arg(key).arg(id).arg(1).ignore();
        }

        let mut conn = self.pool.get().await?;
        conn.query_pipeline::<()>(&pipe).await.map_err(|e| {
            Error::TransactionError(format!(
                "recording {} for '{}' failed: {} ({})",
                id,
                name,
                error_kind_label(&e),
                e
            ))
        })?;

        debug!(metric = name, id, hour = %keys.hour, "presence recorded");
        Ok(())
    }

    /// Mark `id` present for `name` at the current UTC instant
    pub async fn record_now(&self, name: &str, id: EntityId) -> Result<()> {
        self.record_at_time(name, id, Utc::now()).await
    }

    /// Delete every bucket and composite under this tracker's namespace
    ///
    /// Keys are enumerated with KEYS and removed in batches. This is not atomic:
    /// if a command fails partway, the keys deleted so far stay deleted and the
    /// first error is returned.
    ///
    /// Returns the number of keys removed.
    pub async fn delete_all_buckets(&self) -> Result<usize> {
        let mut conn = self.pool.get().await?;
        let mut deleted = 0usize;

        for pattern in [
            self.keyspace.bucket_pattern(),
            self.keyspace.composite_pattern(),
        ] {
            let keys: Vec<String> = conn
                .query(redis::cmd("KEYS").arg(&pattern))
                .await
                .map_err(|e| command_error("KEYS", &pattern, e))?;

            for batch in keys.chunks(DELETE_BATCH_SIZE) {
                let removed: usize = conn
                    .query(redis::cmd("DEL").arg(batch))
                    .await
                    .map_err(|e| command_error("DEL", &pattern, e))?;
                deleted += removed;
            }
        }

        info!(
            namespace = self.keyspace.namespace(),
            deleted, "deleted all buckets"
        );
        Ok(deleted)
    }

    /// Handle for an arbitrary key
    pub fn bitmap(&self, key: impl Into<String>) -> Bitmap {
        Bitmap::new(key, self.keyspace.clone(), self.pool.clone())
    }

    /// Month bucket for explicit calendar fields
    pub fn month_bitmap(&self, name: &str, year: i32, month: u32) -> Result<Bitmap> {
        Ok(self.bitmap(self.keyspace.month(name, year, month)?))
    }

    /// ISO week bucket for an ISO week-year and week number
    pub fn week_bitmap(&self, name: &str, iso_year: i32, iso_week: u32) -> Result<Bitmap> {
        Ok(self.bitmap(self.keyspace.week(name, iso_year, iso_week)?))
    }

    /// Day bucket for explicit calendar fields
    pub fn day_bitmap(&self, name: &str, year: i32, month: u32, day: u32) -> Result<Bitmap> {
        Ok(self.bitmap(self.keyspace.day(name, year, month, day)?))
    }

    /// Hour bucket for explicit calendar fields
    pub fn hour_bitmap(
        &self,
        name: &str,
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
    ) -> Result<Bitmap> {
        Ok(self.bitmap(self.keyspace.hour(name, year, month, day, hour)?))
    }

    /// Month bucket containing `at`
    pub fn month_bitmap_at(&self, name: &str, at: DateTime<Utc>) -> Result<Bitmap> {
        self.bucket(name, Granularity::Month, at)
    }

    /// ISO week bucket containing `at`
    pub fn week_bitmap_at(&self, name: &str, at: DateTime<Utc>) -> Result<Bitmap> {
        self.bucket(name, Granularity::Week, at)
    }

    /// Day bucket containing `at`
    pub fn day_bitmap_at(&self, name: &str, at: DateTime<Utc>) -> Result<Bitmap> {
        self.bucket(name, Granularity::Day, at)
    }

    /// Hour bucket containing `at`
    pub fn hour_bitmap_at(&self, name: &str, at: DateTime<Utc>) -> Result<Bitmap> {
        self.bucket(name, Granularity::Hour, at)
    }

    /// Bucket of `granularity` containing `at`
    pub fn bucket(&self, name: &str, granularity: Granularity, at: DateTime<Utc>) -> Result<Bitmap> {
        Ok(self.bitmap(self.keyspace.bucket(name, granularity, at)?))
    }
}
