//! Store adapters: where cached responses live between requests.
//!
//! [`CacheStore`] is the seam between the cache-through middleware and the
//! key-value store. [`RedisStore`] is the production adapter; [`MemoryStore`]
//! keeps records in-process and is what the tests run against.

use async_trait::async_trait;

use super::config::Ttl;
use super::error::StoreError;
use super::record::{CacheRecord, StoredEntry};

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// Get / set / delete of cached responses with store-enforced expiry.
///
/// Implementations are shared by every in-flight request and must be safe for
/// concurrent use without extra locking by the caller. No coordination between
/// requests is expected: two concurrent misses on one key may both commit.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Reads the record and its remaining lifetime as one unit.
    ///
    /// `Ok(None)` when no live record exists. If either half of the read fails
    /// the whole lookup fails.
    async fn lookup(&self, key: &str) -> Result<Option<StoredEntry>, StoreError>;

    /// Writes every field of `record`, then arms expiry after `ttl`.
    async fn commit(&self, key: &str, record: &CacheRecord, ttl: Ttl) -> Result<(), StoreError>;

    /// Deletes the record. Deleting an absent key succeeds.
    async fn invalidate(&self, key: &str) -> Result<(), StoreError>;
}
