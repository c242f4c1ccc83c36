use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::CacheStore;
use crate::cache::config::Ttl;
use crate::cache::error::StoreError;
use crate::cache::record::{CacheRecord, StoredEntry};

#[derive(Debug, Clone)]
struct Slot {
    record: CacheRecord,
    expires_at: Instant,
}

/// In-process [`CacheStore`] with millisecond-precise expiry.
///
/// Expired records are dropped lazily on the next lookup of their key. Clones
/// share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slots: Arc<DashMap<String, Slot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn lookup(&self, key: &str) -> Result<Option<StoredEntry>, StoreError> {
        let now = Instant::now();

        // The shard guard must be released before `remove_if` touches the same shard.
        let live = match self.slots.get(key) {
            None => return Ok(None),
            Some(slot) if slot.expires_at > now => Some(StoredEntry {
                record: slot.record.clone(),
                remaining: Some(slot.expires_at - now),
            }),
            Some(_) => None,
        };

        if live.is_none() {
            self.slots.remove_if(key, |_, slot| slot.expires_at <= now);
        }

        Ok(live)
    }

    async fn commit(&self, key: &str, record: &CacheRecord, ttl: Ttl) -> Result<(), StoreError> {
        let slot = Slot {
            record: record.clone(),
            expires_at: Instant::now() + ttl.as_duration(),
        };
        self.slots.insert(key.to_owned(), slot);
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<(), StoreError> {
        self.slots.remove(key);
        Ok(())
    }
}
