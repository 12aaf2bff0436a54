//! The deduplicating cache engine.
//!
//! The engine keeps one [`CacheEntry`] per fingerprint. An entry wraps a
//! shared, spawned pipeline task, so every caller that finds the entry awaits
//! the same transport call. The pipeline owns the rest of the entry's
//! lifecycle:
//!
//! ```text
//!   resolve ──► entry live? ──yes──► share it (memory hit)
//!                  │ no
//!                  ▼
//!            spawn pipeline, insert entry (under the map's entry lock)
//!                  │
//!   pipeline: store hit? ──yes──► schedule revalidation, drop entry, done
//!                  │ no
//!                  ▼
//!            race(transport, deadline) ──► response interceptors
//!                  │
//!        ok ───────┴────── err ──► drop entry
//!         │
//!         ├─ store configured ──► write-through, drop entry
//!         └─ memory only ──► keep until cache_timeout (or forever)
//! ```
//!
//! Entries carry a generation number. Eviction timers and pipelines only
//! remove the entry generation they created, so a revalidation that already
//! replaced an entry is never removed by its predecessor.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use fetchbox_core::{FetchValue, Fingerprint, ResponseSource, Transport};
use fetchbox_store::{CacheStore, Store};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, error, warn};

use crate::config::RequestConfig;
use crate::error::{Error, FetchError, InterceptError};
use crate::interceptor::Interceptors;
use crate::invoker::invoke;
use crate::metrics;
use crate::race::race;
use crate::timer::{PendingTimers, TimerRegistry};

/// A settled pipeline result with its source.
#[derive(Debug, Clone)]
pub(crate) struct Fetched {
    pub(crate) value: FetchValue,
    pub(crate) source: ResponseSource,
}

pub(crate) type SharedFetch = Shared<BoxFuture<'static, Result<Fetched, FetchError>>>;

struct CacheEntry {
    result: SharedFetch,
    generation: u64,
    signal: CancellationToken,
}

/// Outcome of [`Engine::resolve`].
pub(crate) struct Resolution {
    pub(crate) config: Arc<RequestConfig>,
    pub(crate) result: SharedFetch,
    pub(crate) from_memory: bool,
    pub(crate) signal: CancellationToken,
}

pub(crate) struct Engine {
    transport: Arc<dyn Transport>,
    defaults: RequestConfig,
    interceptors: Interceptors,
    entries: DashMap<Fingerprint, CacheEntry>,
    timers: TimerRegistry,
    generation: AtomicU64,
}

fn join_shared(
    task: JoinHandle<Result<Fetched, FetchError>>,
    config: Arc<RequestConfig>,
) -> SharedFetch {
    async move {
        match task.await {
            Ok(result) => result,
            Err(err) => Err(FetchError::network(err, config)),
        }
    }
    .boxed()
    .shared()
}

/// A child of the caller's signal, or a fresh one, so the deadline can
/// always cancel the transport without touching the caller's token.
fn request_signal(config: &RequestConfig) -> CancellationToken {
    config
        .signal
        .as_ref()
        .map(CancellationToken::child_token)
        .unwrap_or_default()
}

impl Engine {
    pub(crate) fn new(transport: Arc<dyn Transport>, defaults: RequestConfig) -> Arc<Self> {
        Arc::new(Engine {
            transport,
            defaults,
            interceptors: Interceptors::new(),
            entries: DashMap::new(),
            timers: TimerRegistry::new(),
            generation: AtomicU64::new(0),
        })
    }

    pub(crate) fn interceptors(&self) -> &Interceptors {
        &self.interceptors
    }

    pub(crate) fn defaults(&self) -> &RequestConfig {
        &self.defaults
    }

    /// Merges `raw` over the defaults and runs the request interceptors.
    pub(crate) fn prepare(&self, raw: RequestConfig) -> Result<RequestConfig, InterceptError> {
        let mut config = self.defaults.clone().merge(raw);
        self.interceptors.request.apply(&mut config)?;
        Ok(config)
    }

    /// Resolves a request through the cache.
    ///
    /// With `revalidate` set the memory and store lookups are skipped and the
    /// fresh pipeline replaces whatever entry is live.
    pub(crate) fn resolve(
        self: &Arc<Self>,
        raw: RequestConfig,
        revalidate: bool,
    ) -> Result<Resolution, InterceptError> {
        let config = Arc::new(self.prepare(raw.clone())?);
        let signal = request_signal(&config);

        if config.is_cache_disabled() {
            return Ok(self.bypass(config, signal));
        }
        if config.is_use_origin() {
            warn!(url = ?config.url, "is_use_origin is set, the cache will not be used");
            return Ok(self.bypass(config, signal));
        }

        let fingerprint = config.fingerprint();
        let result = match self.entries.entry(fingerprint.clone()) {
            Entry::Occupied(occupied) if !revalidate => {
                let entry = occupied.get();
                let (result, shared_signal) = (entry.result.clone(), entry.signal.clone());
                drop(occupied);
                return Ok(self.memory_hit(fingerprint, raw, config, result, shared_signal));
            }
            Entry::Occupied(mut occupied) => {
                let entry =
                    self.spawn_pipeline(fingerprint, raw, Arc::clone(&config), signal.clone(), true);
                let result = entry.result.clone();
                occupied.insert(entry);
                result
            }
            Entry::Vacant(vacant) => {
                let entry = self.spawn_pipeline(
                    fingerprint,
                    raw,
                    Arc::clone(&config),
                    signal.clone(),
                    revalidate,
                );
                let result = entry.result.clone();
                vacant.insert(entry);
                result
            }
        };

        Ok(Resolution {
            config,
            result,
            from_memory: false,
            signal,
        })
    }

    fn memory_hit(
        self: &Arc<Self>,
        fingerprint: Fingerprint,
        raw: RequestConfig,
        config: Arc<RequestConfig>,
        result: SharedFetch,
        signal: CancellationToken,
    ) -> Resolution {
        if config.is_debug() {
            debug!(%fingerprint, "Read from memory cache");
        }
        metrics::record_memory_hit();

        if config.revalidate_time.is_some() {
            // Revalidation is scheduled once the shared result has settled.
            let engine = Arc::downgrade(self);
            let settled = result.clone();
            let watched = Arc::clone(&config);
            tokio::spawn(async move {
                if settled.await.is_ok()
                    && let Some(engine) = engine.upgrade()
                {
                    engine.schedule_revalidation(&fingerprint, &raw, &watched);
                }
            });
        }

        Resolution {
            config,
            result,
            from_memory: true,
            signal,
        }
    }

    fn bypass(self: &Arc<Self>, config: Arc<RequestConfig>, signal: CancellationToken) -> Resolution {
        let engine = Arc::clone(self);
        let task_config = Arc::clone(&config);
        let task_signal = signal.clone();
        let span = debug_span!("fetchbox.bypass", url = ?config.url);
        let task = tokio::spawn(
            async move {
                metrics::record_miss();
                engine
                    .dispatch(&task_config, task_signal)
                    .await
                    .map(|value| Fetched {
                        value,
                        source: ResponseSource::Transport,
                    })
            }
            .instrument(span),
        );
        Resolution {
            result: join_shared(task, Arc::clone(&config)),
            config,
            from_memory: false,
            signal,
        }
    }

    fn spawn_pipeline(
        self: &Arc<Self>,
        fingerprint: Fingerprint,
        raw: RequestConfig,
        config: Arc<RequestConfig>,
        signal: CancellationToken,
        revalidate: bool,
    ) -> CacheEntry {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let span = debug_span!("fetchbox.pipeline", %fingerprint, generation, revalidate);
        let task = tokio::spawn(
            Arc::clone(self)
                .pipeline(
                    fingerprint,
                    generation,
                    raw,
                    Arc::clone(&config),
                    signal.clone(),
                    revalidate,
                )
                .instrument(span),
        );
        CacheEntry {
            result: join_shared(task, config),
            generation,
            signal,
        }
    }

    async fn pipeline(
        self: Arc<Self>,
        fingerprint: Fingerprint,
        generation: u64,
        raw: RequestConfig,
        config: Arc<RequestConfig>,
        signal: CancellationToken,
        revalidate: bool,
    ) -> Result<Fetched, FetchError> {
        let store = config.cache_store.clone();

        if let Some(store) = store.as_ref().filter(|_| !revalidate) {
            match store.get_value(&fingerprint).await {
                Ok(Some(value)) => {
                    if config.is_debug() {
                        debug!(%fingerprint, store = store.name(), "Read from cache store");
                    }
                    metrics::record_store_hit(store.name());
                    self.schedule_revalidation(&fingerprint, &raw, &config);
                    self.evict(&fingerprint, generation);
                    return Ok(Fetched {
                        value,
                        source: ResponseSource::Store,
                    });
                }
                Ok(None) => {}
                Err(err) => {
                    error!(%fingerprint, store = store.name(), error = %err, "cache store read failed");
                    metrics::record_store_error(store.name(), "get");
                }
            }
        }

        metrics::record_miss();
        match self.dispatch(&config, signal).await {
            Ok(value) => {
                match &store {
                    Some(store) => {
                        if value.is_cacheable()
                            && let Err(err) = store
                                .set_value(&fingerprint, &value, config.cache_timeout)
                                .await
                        {
                            error!(%fingerprint, store = store.name(), error = %err, "cache store write failed");
                            metrics::record_store_error(store.name(), "set");
                        }
                        // The store holds the value now; memory only dedups in-flight calls.
                        self.evict(&fingerprint, generation);
                    }
                    None => {
                        if let Some(ttl) = config.cache_timeout {
                            self.schedule_eviction(fingerprint, generation, ttl);
                        }
                    }
                }
                Ok(Fetched {
                    value,
                    source: ResponseSource::Transport,
                })
            }
            Err(err) => {
                self.evict(&fingerprint, generation);
                Err(err)
            }
        }
    }

    /// Issues the transport call under the deadline and runs the response chain.
    async fn dispatch(
        &self,
        config: &Arc<RequestConfig>,
        signal: CancellationToken,
    ) -> Result<FetchValue, FetchError> {
        let responses = self.interceptors.response.pipeline();
        let started = Instant::now();
        let outcome = race(
            &self.timers,
            config,
            signal.clone(),
            invoke(self.transport.as_ref(), config, signal),
        )
        .await;
        metrics::record_transport(self.transport.name(), started.elapsed(), outcome.is_ok());
        responses.apply(outcome).await
    }

    fn evict(&self, fingerprint: &Fingerprint, generation: u64) {
        self.entries
            .remove_if(fingerprint, |_, entry| entry.generation == generation);
    }

    fn schedule_eviction(self: &Arc<Self>, fingerprint: Fingerprint, generation: u64, ttl: Duration) {
        let is_live = self
            .entries
            .get(&fingerprint)
            .is_some_and(|entry| entry.generation == generation);
        if !is_live {
            return;
        }
        let engine = Arc::downgrade(self);
        let key = fingerprint.clone();
        self.timers.eviction.schedule(fingerprint, ttl, async move {
            if let Some(engine) = engine.upgrade() {
                engine.evict(&key, generation);
            }
        });
    }

    /// Schedules a background refresh unless one is already pending.
    ///
    /// A pending refresh owns the entry's lifetime, so the eviction timer is
    /// cancelled; the refresh schedules a new one when it completes.
    fn schedule_revalidation(
        self: &Arc<Self>,
        fingerprint: &Fingerprint,
        raw: &RequestConfig,
        config: &RequestConfig,
    ) {
        let Some(delay) = config.revalidate_time else {
            return;
        };
        let engine = Arc::downgrade(self);
        let key = fingerprint.clone();
        let raw = raw.clone();
        let scheduled =
            self.timers
                .revalidation
                .schedule_unless_pending(fingerprint.clone(), delay, move || async move {
                    let Some(engine) = engine.upgrade() else {
                        return;
                    };
                    metrics::record_revalidation();
                    match engine.resolve(raw, true) {
                        Ok(resolution) => {
                            if let Err(err) = resolution.result.await {
                                error!(fingerprint = %key, error = %err, "Revalidate caused error");
                            }
                        }
                        Err(err) => {
                            error!(fingerprint = %key, error = %err, "Revalidate caused error");
                        }
                    }
                });
        if scheduled {
            self.timers.eviction.cancel(fingerprint);
        }
    }

    /// Removes one request from memory, then from the store.
    pub(crate) async fn clear(&self, raw: RequestConfig) -> Result<(), Error> {
        let config = self.prepare(raw)?;
        let fingerprint = config.fingerprint();
        self.entries.remove(&fingerprint);
        self.timers.eviction.cancel(&fingerprint);
        self.timers.revalidation.cancel(&fingerprint);
        if let Some(store) = &config.cache_store {
            store.delete(&fingerprint).await?;
        }
        Ok(())
    }

    /// Cancels the transport of every live entry, then every timer.
    pub(crate) fn abort_all(&self) {
        for entry in self.entries.iter() {
            entry.signal.cancel();
        }
        self.timers.clear_all();
    }

    pub(crate) fn clear_all_timers(&self) {
        self.timers.clear_all();
    }

    pub(crate) fn teardown(&self) {
        self.abort_all();
        self.entries.clear();
    }

    pub(crate) fn pending_timers(&self) -> PendingTimers {
        self.timers.pending()
    }

    pub(crate) fn cached_entries(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_cached(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.contains_key(fingerprint)
    }
}
