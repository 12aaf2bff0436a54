//! Bookkeeping of outstanding timers.
//!
//! Every timer is a spawned task that sleeps, runs its action and then
//! removes its own registry entry. The registry holds only the task's
//! [`AbortHandle`], so cancelling a timer aborts the task and forgets it in
//! one step. Each entry carries a unique id: a timer whose entry was
//! replaced by a newer one never removes its successor.

use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use fetchbox_core::Fingerprint;
use tokio::task::AbortHandle;
use tracing::{Instrument, trace_span};

/// Key of a timeout timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

struct Timer {
    id: u64,
    handle: AbortHandle,
}

/// A keyed set of timers of one kind.
pub(crate) struct TimerSet<K> {
    kind: &'static str,
    timers: DashMap<K, Timer>,
    next_id: AtomicU64,
}

impl<K> TimerSet<K>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
{
    pub(crate) fn new(kind: &'static str) -> Arc<Self> {
        Arc::new(TimerSet {
            kind,
            timers: DashMap::new(),
            next_id: AtomicU64::new(0),
        })
    }

    fn spawn<F>(self: &Arc<Self>, key: K, delay: Duration, action: F) -> Timer
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let set = Arc::clone(self);
        let span = trace_span!("fetchbox.timer", kind = self.kind, key = ?key);
        let task = tokio::spawn(
            async move {
                tokio::time::sleep(delay).await;
                action.await;
                set.timers.remove_if(&key, |_, timer| timer.id == id);
            }
            .instrument(span),
        );
        Timer {
            id,
            handle: task.abort_handle(),
        }
    }

    /// Schedules `action` after `delay`, replacing any timer under `key`.
    pub(crate) fn schedule<F>(self: &Arc<Self>, key: K, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // The entry lock is held while spawning, so the task cannot look for
        // its entry before it is inserted.
        match self.timers.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.insert(self.spawn(key, delay, action));
                previous.handle.abort();
            }
            Entry::Vacant(vacant) => {
                vacant.insert(self.spawn(key, delay, action));
            }
        }
    }

    /// Schedules the action built by `action` unless a timer under `key` is pending.
    pub(crate) fn schedule_unless_pending<F>(
        self: &Arc<Self>,
        key: K,
        delay: Duration,
        action: impl FnOnce() -> F,
    ) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self.timers.entry(key.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(self.spawn(key, delay, action()));
                true
            }
        }
    }

    /// Cancels the timer under `key`. Returns `false` if none was pending.
    pub(crate) fn cancel(&self, key: &K) -> bool {
        match self.timers.remove(key) {
            Some((_, timer)) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &K) -> bool {
        self.timers.contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.timers.len()
    }

    /// Cancels every pending timer.
    pub(crate) fn clear(&self) {
        self.timers.retain(|_, timer| {
            timer.handle.abort();
            false
        });
    }
}

impl TimerSet<TimerId> {
    /// Schedules an anonymous timer and returns its key.
    pub(crate) fn arm<F>(self: &Arc<Self>, delay: Duration, action: F) -> TimerId
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.schedule(key, delay, action);
        key
    }
}

/// Number of pending timers per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingTimers {
    /// Memory eviction timers.
    pub eviction: usize,
    /// Background revalidation timers.
    pub revalidation: usize,
    /// Request deadline timers.
    pub timeout: usize,
}

impl PendingTimers {
    /// Sum over all kinds.
    pub fn total(&self) -> usize {
        self.eviction + self.revalidation + self.timeout
    }
}

/// The three timer sets owned by one engine.
pub(crate) struct TimerRegistry {
    pub(crate) eviction: Arc<TimerSet<Fingerprint>>,
    pub(crate) revalidation: Arc<TimerSet<Fingerprint>>,
    pub(crate) timeout: Arc<TimerSet<TimerId>>,
}

impl TimerRegistry {
    pub(crate) fn new() -> Self {
        TimerRegistry {
            eviction: TimerSet::new("eviction"),
            revalidation: TimerSet::new("revalidation"),
            timeout: TimerSet::new("timeout"),
        }
    }

    /// Cancels every timer of every kind. Safe to call repeatedly.
    pub(crate) fn clear_all(&self) {
        self.eviction.clear();
        self.revalidation.clear();
        self.timeout.clear();
    }

    pub(crate) fn pending(&self) -> PendingTimers {
        PendingTimers {
            eviction: self.eviction.len(),
            revalidation: self.revalidation.len(),
            timeout: self.timeout.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn bump(counter: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let counter = Arc::clone(counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fired_timer_removes_itself() {
        let set = TimerSet::new("test");
        let fired = counter();
        set.schedule("a", Duration::from_millis(100), bump(&fired));
        assert!(set.contains(&"a"));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(set.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let set = TimerSet::new("test");
        let fired = counter();
        set.schedule("a", Duration::from_millis(100), bump(&fired));
        assert!(set.cancel(&"a"));
        assert!(!set.cancel(&"a"));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_the_previous_timer() {
        let set = TimerSet::new("test");
        let first = counter();
        let second = counter();
        set.schedule("a", Duration::from_millis(100), bump(&first));
        set.schedule("a", Duration::from_millis(200), bump(&second));
        assert_eq!(set.len(), 1);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(set.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_timer_blocks_duplicates() {
        let set = TimerSet::new("test");
        let fired = counter();
        assert!(set.schedule_unless_pending("a", Duration::from_millis(100), || bump(&fired)));
        assert!(!set.schedule_unless_pending("a", Duration::from_millis(100), || bump(&fired)));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(set.schedule_unless_pending("a", Duration::from_millis(100), || bump(&fired)));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_all_is_idempotent() {
        let registry = TimerRegistry::new();
        registry.clear_all();

        let fired = counter();
        let key = Fingerprint::builder().component("k").build();
        registry
            .eviction
            .schedule(key.clone(), Duration::from_millis(10), bump(&fired));
        registry
            .revalidation
            .schedule(key, Duration::from_millis(10), bump(&fired));
        registry.timeout.arm(Duration::from_millis(10), bump(&fired));
        assert_eq!(registry.pending().total(), 3);

        registry.clear_all();
        registry.clear_all();
        assert_eq!(registry.pending(), PendingTimers::default());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
