//! Builder for configuring [`MokaStore`].

use std::time::{Duration, Instant};

use fetchbox_core::Fingerprint;
use moka::Expiry;
use moka::future::{Cache, CacheBuilder};
use moka::policy::EvictionPolicy;

use crate::store::{MokaStore, Slot};

/// Expires each slot after the TTL it was written with.
#[derive(Debug, Clone, Copy)]
struct Expiration;

impl Expiry<Fingerprint, Slot> for Expiration {
    fn expire_after_create(&self, _: &Fingerprint, slot: &Slot, _: Instant) -> Option<Duration> {
        slot.ttl
    }

    // A rewrite carries its own TTL; the previous deadline must not survive it.
    fn expire_after_update(
        &self,
        _: &Fingerprint,
        slot: &Slot,
        _: Instant,
        _: Option<Duration>,
    ) -> Option<Duration> {
        slot.ttl
    }
}

/// Builder state before a bound is chosen.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbounded;

/// Builder state once a bound is chosen.
#[derive(Debug, Clone, Copy)]
pub struct Bounded(Bound);

#[derive(Debug, Clone, Copy)]
enum Bound {
    Entries(u64),
    Bytes(u64),
}

/// Configures a [`MokaStore`].
///
/// A store must be bounded, so `build()` is only available after
/// [`max_entries`](MokaStoreBuilder::max_entries) or
/// [`max_bytes`](MokaStoreBuilder::max_bytes).
///
/// ```
/// use fetchbox_moka::{EvictionPolicy, MokaStore};
///
/// let by_count = MokaStore::builder().max_entries(1_000).build();
///
/// let by_size = MokaStore::builder()
///     .name("responses")
///     .max_bytes(50 * 1024 * 1024)
///     .eviction_policy(EvictionPolicy::tiny_lfu())
///     .build();
/// ```
#[derive(Debug)]
pub struct MokaStoreBuilder<State> {
    state: State,
    name: &'static str,
    policy: Option<EvictionPolicy>,
}

impl MokaStoreBuilder<Unbounded> {
    /// Starts an unbounded configuration named `"moka"`.
    pub fn new() -> Self {
        MokaStoreBuilder {
            state: Unbounded,
            name: "moka",
            policy: None,
        }
    }

    fn bound(self, bound: Bound) -> MokaStoreBuilder<Bounded> {
        MokaStoreBuilder {
            state: Bounded(bound),
            name: self.name,
            policy: self.policy,
        }
    }

    /// Bounds the store by number of entries.
    pub fn max_entries(self, entries: u64) -> MokaStoreBuilder<Bounded> {
        self.bound(Bound::Entries(entries))
    }

    /// Bounds the store by the approximate size of its keys and values.
    pub fn max_bytes(self, bytes: u64) -> MokaStoreBuilder<Bounded> {
        self.bound(Bound::Bytes(bytes))
    }
}

impl Default for MokaStoreBuilder<Unbounded> {
    fn default() -> Self {
        MokaStoreBuilder::new()
    }
}

impl<State> MokaStoreBuilder<State> {
    /// Name reported by [`Store::name`](fetchbox_store::Store::name), used in
    /// logs and metric labels.
    pub fn name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Overrides the eviction policy.
    ///
    /// Entry bounds default to TinyLFU. Byte bounds default to LRU, because
    /// TinyLFU admission may reject a large response even when eviction could
    /// make room for it.
    pub fn eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.policy = Some(policy);
        self
    }
}

impl MokaStoreBuilder<Bounded> {
    /// Builds the store.
    pub fn build(self) -> MokaStore {
        let Bounded(bound) = self.state;
        let cache: Cache<Fingerprint, Slot> = match bound {
            Bound::Entries(entries) => CacheBuilder::new(entries)
                .eviction_policy(self.policy.unwrap_or_else(EvictionPolicy::tiny_lfu))
                .expire_after(Expiration)
                .build(),
            Bound::Bytes(bytes) => CacheBuilder::new(bytes)
                .weigher(Slot::weight)
                .eviction_policy(self.policy.unwrap_or_else(EvictionPolicy::lru))
                .expire_after(Expiration)
                .build(),
        };
        MokaStore::from_cache(cache, self.name)
    }
}
