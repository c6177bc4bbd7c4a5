//! Handle to one bitmap in the store
//!
//! A [`Bitmap`] is a key plus the pool it is read through. The key may name a
//! bucket or a composite produced by [`crate::bitop`]; both behave the same,
//! which is what lets composites be fed back in as operands.
//!
//! The key may not exist yet. Reads on a missing key behave like an empty
//! bitmap: every bit tests false and the count is zero.

use crate::error::{Error, Result};
use crate::keys::Keyspace;
use crate::redis::RedisPool;
use crate::types::EntityId;
use redis::RedisError;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Named reference to a bitmap in the store
#[derive(Clone)]
pub struct Bitmap {
    key: String,
    keyspace: Arc<Keyspace>,
    pool: Arc<RedisPool>,
}

impl Bitmap {
    /// Bind `key` to a pool
    ///
    /// The keyspace is carried along so composites built from this handle land
    /// in the same namespace.
    pub fn new(key: impl Into<String>, keyspace: Arc<Keyspace>, pool: Arc<RedisPool>) -> Self {
        Self {
            key: key.into(),
            keyspace,
            pool,
        }
    }

    /// The store key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether this handle names a composite result
    pub fn is_composite(&self) -> bool {
        self.keyspace.is_composite(&self.key)
    }

    /// Keyspace the handle belongs to
    pub fn keyspace(&self) -> &Arc<Keyspace> {
        &self.keyspace
    }

    /// Pool the handle reads through
    pub fn pool(&self) -> &Arc<RedisPool> {
        &self.pool
    }

    /// Whether two handles talk to the same pool and namespace
    pub fn shares_store_with(&self, other: &Bitmap) -> bool {
        Arc::ptr_eq(&self.pool, &other.pool) && self.keyspace == other.keyspace
    }

    /// Set the bit for `id`
    ///
    /// Idempotent; setting a bit that is already set changes nothing.
    pub async fn track(&self, id: EntityId) -> Result<()> {
        let mut conn = self.pool.get().await?;
        conn.query::<()>(redis::cmd("SETBIT").arg(&self.key).arg(id).arg(1))
            .await
            .map_err(|e| command_error("SETBIT", &self.key, e))?;
        debug!(key = %self.key, id, "bit set");
        Ok(())
    }

    /// Whether the bit for `id` is set
    pub async fn test(&self, id: EntityId) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        conn.query(redis::cmd("GETBIT").arg(&self.key).arg(id))
            .await
            .map_err(|e| command_error("GETBIT", &self.key, e))
    }

    /// Number of set bits
    pub async fn count(&self) -> Result<i64> {
        let mut conn = self.pool.get().await?;
        conn.query(redis::cmd("BITCOUNT").arg(&self.key))
            .await
            .map_err(|e| command_error("BITCOUNT", &self.key, e))
    }

    /// Whether the key is present in the store
    ///
    /// Checked with EXISTS, not derived from the count.
    pub async fn exists(&self) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        conn.query(redis::cmd("EXISTS").arg(&self.key))
            .await
            .map_err(|e| command_error("EXISTS", &self.key, e))
    }

    /// Remove the key
    ///
    /// Deleting a key that does not exist is not an error.
    pub async fn delete(&self) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let removed: i64 = conn
            .query(redis::cmd("DEL").arg(&self.key))
            .await
            .map_err(|e| command_error("DEL", &self.key, e))?;
        debug!(key = %self.key, removed, "bitmap deleted");
        Ok(())
    }
}

impl fmt::Display for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bitmap({})", self.key)
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("key", &self.key)
            .field("namespace", &self.keyspace.namespace())
            .finish()
    }
}

pub(crate) fn command_error(command: &str, key: &str, err: RedisError) -> Error {
    Error::StoreCommandError(format!("{} {}: {}", command, key, err))
}
