use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::debug;

use super::CacheStore;
use crate::cache::config::{CacheOptions, Ttl};
use crate::cache::error::{CacheError, StoreError};
use crate::cache::record::{CacheRecord, StoredEntry};

// PTTL replies for a missing key and for a key without expiry.
const PTTL_MISSING: i64 = -2;
const PTTL_PERSISTENT: i64 = -1;

/// [`CacheStore`] over a Redis hash per key.
///
/// Each record is a hash with `content`, `contentType`, `statusCode` and
/// `savedAt` fields, expired by Redis itself. The [`ConnectionManager`] is
/// cloned per call; it multiplexes and reconnects on its own, so concurrent
/// requests need no further locking.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Dials the store described by `options`.
    ///
    /// # Errors
    ///
    /// [`CacheError::Config`] if the options do not form a valid URL,
    /// [`CacheError::Store`] if the initial connection fails.
    pub async fn connect(options: &CacheOptions) -> Result<Self, CacheError> {
        let url = options.connection_url()?;
        let client = redis::Client::open(url.as_str()).map_err(StoreError::from)?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(StoreError::from)?;
        debug!(host = %options.host_name(), port = options.port_number(), "connected to cache store");
        Ok(Self { conn })
    }

    /// Wraps an already connected handle.
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

/// Store-side expiry for `ttl`: whole seconds, truncated, never below one.
///
/// `EXPIRE key 0` deletes the key outright, so sub-second TTLs are rounded up
/// to the smallest expiry Redis will keep.
pub(crate) fn expiry_seconds(ttl: Ttl) -> i64 {
    let seconds = ttl.as_millis() / 1000;
    i64::try_from(seconds).unwrap_or(i64::MAX).max(1)
}

/// Maps a PTTL reply onto the remaining lifetime. `None` means no expiry is set.
fn remaining_from_pttl(pttl: i64) -> Option<Duration> {
    u64::try_from(pttl).ok().map(Duration::from_millis)
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn lookup(&self, key: &str) -> Result<Option<StoredEntry>, StoreError> {
        let mut conn = self.conn.clone();

        // Both commands ride one round trip; a failure of either fails the lookup.
        let (fields, pttl): (HashMap<String, Vec<u8>>, i64) = redis::pipe()
            .hgetall(key)
            .pttl(key)
            .query_async(&mut conn)
            .await?;

        // Expired between the two reads.
        if pttl == PTTL_MISSING {
            return Ok(None);
        }

        let Some(record) = CacheRecord::from_fields(key, fields)? else {
            return Ok(None);
        };

        if pttl == PTTL_PERSISTENT {
            debug!(key, "cached record has no expiry yet");
        }

        Ok(Some(StoredEntry {
            record,
            remaining: remaining_from_pttl(pttl),
        }))
    }

    async fn commit(&self, key: &str, record: &CacheRecord, ttl: Ttl) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let fields = record.to_fields();

        // HSET then EXPIRE, in order and not in a transaction: between the two
        // the record briefly exists without an expiry.
        let () = redis::pipe()
            .hset_multiple(key, &fields)
            .ignore()
            .expire(key, expiry_seconds(ttl))
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }
}
