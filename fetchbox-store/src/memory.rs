//! Simple in-process store implementation using DashMap.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use fetchbox_core::Fingerprint;
use tokio::time::Instant;

use crate::{DeleteStatus, Raw, SetOptions, Store, StoreResult};

#[derive(Debug, Clone)]
struct Slot {
    value: Raw,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process store backed by a [`DashMap`].
///
/// Entries with a TTL expire lazily: an expired entry is dropped on the next
/// read of its key or on the next [`size`](Store::size) call. Expiry follows
/// the tokio clock, so paused-time tests see it move.
///
/// Cloning is cheap and every clone shares the same map.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<Fingerprint, Slot>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &Fingerprint) -> StoreResult<Option<Raw>> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(slot) if !slot.is_expired(now) => return Ok(Some(slot.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            tracing::trace!(%key, "dropping expired store entry");
            self.entries.remove_if(key, |_, slot| slot.is_expired(now));
        }
        Ok(None)
    }

    async fn set(&self, key: &Fingerprint, value: Raw, options: SetOptions) -> StoreResult<()> {
        let expires_at = options.ttl.map(|ttl| Instant::now() + ttl);
        self.entries.insert(key.clone(), Slot { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &Fingerprint) -> StoreResult<DeleteStatus> {
        Ok(match self.entries.remove(key) {
            Some(_) => DeleteStatus::Deleted(1),
            None => DeleteStatus::Missing,
        })
    }

    async fn size(&self) -> StoreResult<usize> {
        let now = Instant::now();
        self.entries.retain(|_, slot| !slot.is_expired(now));
        Ok(self.entries.len())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
