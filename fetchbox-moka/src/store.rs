//! Moka store implementation.

use std::time::Duration;

use async_trait::async_trait;
use fetchbox_core::Fingerprint;
use fetchbox_store::{DeleteStatus, Raw, SetOptions, Store, StoreResult};
use moka::future::Cache;

/// A stored value together with the TTL it was written with.
#[derive(Debug, Clone)]
pub(crate) struct Slot {
    pub(crate) value: Raw,
    pub(crate) ttl: Option<Duration>,
}

impl Slot {
    /// Approximate memory footprint: digest, value bytes and fixed overhead.
    pub(crate) fn weight(key: &Fingerprint, slot: &Slot) -> u32 {
        let size = key.as_str().len() + slot.value.len() + std::mem::size_of::<Slot>();
        size.min(u32::MAX as usize) as u32
    }
}

/// Bounded in-memory cache store powered by Moka.
///
/// `MokaStore` keeps serialized request results in Moka's async cache. Every
/// entry expires after the TTL given on write; entries written without a TTL
/// live until evicted by capacity pressure or deleted.
///
/// # Examples
///
/// ```
/// use fetchbox_moka::MokaStore;
///
/// let store = MokaStore::builder().max_entries(10_000).build();
/// ```
///
/// # Caveats
///
/// - Data is **not persisted** and **not shared** across processes
/// - Capacity bookkeeping is eventually consistent, so [`size`](Store::size)
///   flushes pending maintenance before counting
#[derive(Clone)]
pub struct MokaStore {
    cache: Cache<Fingerprint, Slot>,
    name: &'static str,
}

impl std::fmt::Debug for MokaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaStore")
            .field("name", &self.name)
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}

impl MokaStore {
    /// Creates a new builder. Capacity must be configured before `build()`.
    pub fn builder() -> crate::builder::MokaStoreBuilder<crate::builder::Unbounded> {
        crate::builder::MokaStoreBuilder::new()
    }

    pub(crate) fn from_cache(cache: Cache<Fingerprint, Slot>, name: &'static str) -> Self {
        MokaStore { cache, name }
    }

    /// Runs Moka's pending maintenance (evictions, expirations).
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}

#[async_trait]
impl Store for MokaStore {
    async fn get(&self, key: &Fingerprint) -> StoreResult<Option<Raw>> {
        Ok(self.cache.get(key).await.map(|slot| slot.value))
    }

    async fn set(&self, key: &Fingerprint, value: Raw, options: SetOptions) -> StoreResult<()> {
        self.cache
            .insert(
                key.clone(),
                Slot {
                    value,
                    ttl: options.ttl,
                },
            )
            .await;
        Ok(())
    }

    async fn delete(&self, key: &Fingerprint) -> StoreResult<DeleteStatus> {
        Ok(match self.cache.remove(key).await {
            Some(_) => DeleteStatus::Deleted(1),
            None => DeleteStatus::Missing,
        })
    }

    async fn has(&self, key: &Fingerprint) -> StoreResult<bool> {
        Ok(self.cache.contains_key(key))
    }

    async fn size(&self) -> StoreResult<usize> {
        self.cache.run_pending_tasks().await;
        Ok(self.cache.entry_count() as usize)
    }

    fn name(&self) -> &str {
        self.name
    }
}
