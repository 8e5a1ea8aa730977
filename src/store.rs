//! Fragment Store
//!
//! The in-process [`FragmentCache`]: a segmented map from key to shared
//! [`CacheEntry`], plus the background reclaimer that keeps it tidy.
//!
//! # How It Works
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         FragmentStore                                │
//! │                                                                      │
//! │  hash(key) % N  ──▶  Segment Selection                               │
//! │                                                                      │
//! │  ┌──────────────┐ ┌──────────────┐     ┌──────────────┐              │
//! │  │  Segment 0   │ │  Segment 1   │ ... │  Segment N-1 │              │
//! │  │    Mutex     │ │    Mutex     │     │    Mutex     │              │
//! │  │ key ─▶ Arc<  │ │ key ─▶ Arc<  │     │ key ─▶ Arc<  │              │
//! │  │  CacheEntry> │ │  CacheEntry> │     │  CacheEntry> │              │
//! │  └──────────────┘ └──────────────┘     └──────────────┘              │
//! │                                                                      │
//! │  reclaimer thread ──(Weak)──▶ keys → is_expired_or_abandoned → evict │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Structural changes are insert-if-absent, compare-and-replace and
//! compare-and-remove, all keyed on entry identity (`Arc::ptr_eq`) under the
//! segment mutex. A segment mutex is never held while an entry's own state is
//! locked, so store operations cannot deadlock against producers.
//!
//! # Example
//!
//! ```
//! use fragment_cache::{FragmentStore, FragmentStoreConfig};
//! use std::sync::Arc;
//! use std::thread;
//! use std::time::Duration;
//!
//! let store = Arc::new(FragmentStore::init(FragmentStoreConfig::new()).unwrap());
//! let ttl = Duration::from_secs(1);
//!
//! let producer = {
//!     let store = Arc::clone(&store);
//!     thread::spawn(move || {
//!         let entry = store.get_or_create("home", None, ttl);
//!         if entry.try_acquire_for_update(None) {
//!             entry.commit_and_release("HELLO", None);
//!         }
//!     })
//! };
//!
//! let entry = store.get_or_create("home", None, ttl);
//! if entry.try_acquire_for_update(None) {
//!     entry.commit_and_release("HELLO", None);
//! }
//! assert_eq!(&*entry.get_content(Duration::from_secs(5)).unwrap(), "HELLO");
//! producer.join().unwrap();
//!
//! store.destroy();
//! assert!(store.is_empty());
//! ```

use crate::clock::{Clock, SystemClock};
use crate::config::FragmentStoreConfig;
use crate::entry::CacheEntry;
use crate::error::{ConfigError, FragmentCacheError};
use crate::fragment::{Fragment, FragmentCache};
use crate::reclaimer::{Reclaimer, ReclaimerTask, SweepReport, SweepTarget};
use crate::statistics::{CacheMetrics, StoreStatistics};
use core::fmt;
use core::hash::BuildHasher;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

#[cfg(feature = "hashbrown")]
use hashbrown::HashMap;
/// Hasher used by [`FragmentStore`] unless another one is supplied.
#[cfg(feature = "hashbrown")]
pub use hashbrown::DefaultHashBuilder;

#[cfg(not(feature = "hashbrown"))]
use std::collections::HashMap;
/// Hasher used by [`FragmentStore`] unless another one is supplied.
#[cfg(not(feature = "hashbrown"))]
pub use std::collections::hash_map::RandomState as DefaultHashBuilder;

type Segment<S> = Mutex<HashMap<String, Arc<CacheEntry>, S>>;

/// State shared between the store handle and its reclaimer thread.
struct StoreCore<S> {
    segments: Box<[Segment<S>]>,
    hash_builder: S,
    clock: Arc<dyn Clock>,
    max_lock_hold: Duration,
    reclaimer: Reclaimer,
    created: AtomicU64,
    abandoned_replaced: AtomicU64,
    evictions: AtomicU64,
}

impl<S: BuildHasher> StoreCore<S> {
    #[inline]
    fn segment(&self, key: &str) -> &Segment<S> {
        let idx = (self.hash_builder.hash_one(key) as usize) % self.segments.len();
        &self.segments[idx]
    }

    fn len(&self) -> usize {
        self.segments.iter().map(|s| s.lock().len()).sum()
    }

    fn sweep(&self) -> SweepReport {
        self.reclaimer.sweep(self)
    }
}

impl<S: BuildHasher> SweepTarget for StoreCore<S> {
    fn keys(&self) -> Vec<String> {
        self.segments
            .iter()
            .flat_map(|s| s.lock().keys().cloned().collect::<Vec<_>>())
            .collect()
    }

    fn entry(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.segment(key).lock().get(key).cloned()
    }

    fn evict(&self, key: &str, expected: &Arc<CacheEntry>) -> bool {
        let mut segment = self.segment(key).lock();
        match segment.get(key) {
            Some(current) if Arc::ptr_eq(current, expected) => {
                segment.remove(key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }

    fn clock(&self) -> &dyn Clock {
        &*self.clock
    }
}

/// A concurrent, segmented store of [`CacheEntry`] values.
///
/// Share it across threads with `Arc`. The background reclaimer (if
/// configured) stops when the store is destroyed or dropped.
///
/// # Type Parameters
///
/// - `S`: Hash builder used for segment selection and the segment maps.
///   Defaults to `DefaultHashBuilder`.
pub struct FragmentStore<S = DefaultHashBuilder> {
    core: Arc<StoreCore<S>>,
    task: Mutex<Option<ReclaimerTask>>,
}

impl FragmentStore<DefaultHashBuilder> {
    /// Creates a store on the system clock with the default hasher, starting
    /// the reclaimer if the configuration asks for one.
    pub fn init(config: FragmentStoreConfig) -> Result<Self, FragmentCacheError> {
        Self::init_with(config, DefaultHashBuilder::default(), Arc::new(SystemClock))
    }
}

impl<S> FragmentStore<S>
where
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    /// Creates a store with a custom hash builder and time source.
    ///
    /// Use a [`ManualClock`](crate::clock::ManualClock) to drive expiry and
    /// abandonment deterministically.
    pub fn init_with(
        config: FragmentStoreConfig,
        hash_builder: S,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, FragmentCacheError> {
        config.validate()?;

        let segment_capacity = config.segment_capacity();
        let segments: Vec<_> = (0..config.segments())
            .map(|_| {
                Mutex::new(HashMap::with_capacity_and_hasher(
                    segment_capacity,
                    hash_builder.clone(),
                ))
            })
            .collect();

        let store = Self {
            core: Arc::new(StoreCore {
                segments: segments.into_boxed_slice(),
                hash_builder,
                clock,
                max_lock_hold: config.max_lock_hold(),
                reclaimer: Reclaimer::default(),
                created: AtomicU64::new(0),
                abandoned_replaced: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
        };

        if let Some(interval) = config.sweep_interval() {
            store.schedule_reclaimer(interval, false)?;
        }
        Ok(store)
    }

    /// Plain lookup, no side effects.
    pub fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.core.entry(key)
    }

    /// Returns the entry at `key`, creating it if absent.
    ///
    /// Concurrent callers on the same absent key all receive the one entry
    /// that was actually inserted. If the stored entry's lock is abandoned it
    /// is swapped, by identity, for an unlocked clone carrying the old content
    /// and the given `condition` and `ttl`; a caller that loses that swap gets
    /// whatever is stored instead.
    pub fn get_or_create(&self, key: &str, condition: Option<&str>, ttl: Duration) -> Arc<CacheEntry> {
        let existing = {
            let mut segment = self.core.segment(key).lock();
            match segment.get(key) {
                Some(entry) => Arc::clone(entry),
                None => {
                    let entry = Arc::new(CacheEntry::new(
                        condition,
                        ttl,
                        self.core.max_lock_hold,
                        Arc::clone(&self.core.clock),
                    ));
                    segment.insert(key.to_owned(), Arc::clone(&entry));
                    self.core.created.fetch_add(1, Ordering::Relaxed);
                    trace!(key, "created fragment");
                    return entry;
                }
            }
        };

        if !existing.is_lock_abandoned() {
            return existing;
        }

        // Built outside the segment lock: cloning reads the entry's state.
        let replacement = Arc::new(existing.clone_with(condition, ttl));
        let mut segment = self.core.segment(key).lock();
        match segment.get(key) {
            Some(current) if !Arc::ptr_eq(current, &existing) => Arc::clone(current),
            _ => {
                segment.insert(key.to_owned(), Arc::clone(&replacement));
                self.core.abandoned_replaced.fetch_add(1, Ordering::Relaxed);
                warn!(
                    key,
                    max_lock_hold_ms = self.core.max_lock_hold.as_millis() as u64,
                    "replaced fragment with abandoned update lock"
                );
                replacement
            }
        }
    }

    /// Removes `key` only if it still maps to `expected`.
    pub fn evict(&self, key: &str, expected: &Arc<CacheEntry>) -> bool {
        self.core.evict(key, expected)
    }

    /// Removes `key` unconditionally.
    pub fn remove(&self, key: &str) -> bool {
        let removed = self.core.segment(key).lock().remove(key).is_some();
        if removed {
            self.core.evictions.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// `true` if `key` has an entry.
    pub fn contains(&self, key: &str) -> bool {
        self.core.segment(key).lock().contains_key(key)
    }

    /// Total entries across all segments.
    ///
    /// Segments are locked one at a time, so under concurrent writes the value
    /// may be slightly stale.
    pub fn len(&self) -> usize {
        self.core.len()
    }

    /// `true` if no segment holds an entry.
    pub fn is_empty(&self) -> bool {
        self.core.segments.iter().all(|s| s.lock().is_empty())
    }

    /// Iterates over the stored keys, one segment snapshot at a time.
    ///
    /// Each call starts a fresh pass. Keys inserted or removed concurrently may
    /// or may not be observed.
    pub fn keys(&self) -> impl Iterator<Item = String> + '_ {
        self.core
            .segments
            .iter()
            .flat_map(|s| s.lock().keys().cloned().collect::<Vec<_>>())
    }

    /// Drops every entry, returning how many were removed.
    pub fn clear(&self) -> usize {
        let removed: usize = self
            .core
            .segments
            .iter()
            .map(|s| {
                let mut segment = s.lock();
                let n = segment.len();
                segment.clear();
                n
            })
            .sum();
        self.core
            .evictions
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Snapshot of size, last sweep and activity counters.
    pub fn statistics(&self) -> StoreStatistics {
        StoreStatistics {
            cache_size: self.len(),
            observed_at: self.core.clock.wall_time(),
            last_sweep: self.core.reclaimer.last_report(),
            sweeps_run: self.core.reclaimer.sweeps(),
            entries_created: self.core.created.load(Ordering::Relaxed),
            abandoned_replaced: self.core.abandoned_replaced.load(Ordering::Relaxed),
            evictions: self.core.evictions.load(Ordering::Relaxed),
        }
    }

    /// Runs one sweep on the calling thread.
    pub fn sweep_now(&self) -> SweepReport {
        self.core.sweep()
    }

    /// Starts sweeping every `interval`, replacing any running schedule.
    ///
    /// With `run_now`, one sweep runs synchronously before the thread starts.
    pub fn schedule_reclaimer(&self, interval: Duration, run_now: bool) -> Result<(), FragmentCacheError> {
        if interval.is_zero() {
            return Err(ConfigError::ZeroSweepInterval.into());
        }

        let mut slot = self.task.lock();
        if let Some(mut previous) = slot.take() {
            previous.stop();
        }
        if run_now {
            self.core.sweep();
        }

        let core = Arc::downgrade(&self.core);
        let task = ReclaimerTask::spawn(interval, move || match core.upgrade() {
            Some(core) => {
                core.sweep();
                true
            }
            None => false,
        })
        .map_err(FragmentCacheError::Spawn)?;
        *slot = Some(task);
        Ok(())
    }

    /// Cadence of the running reclaimer, if any.
    pub fn reclaimer_interval(&self) -> Option<Duration> {
        self.task.lock().as_ref().map(ReclaimerTask::interval)
    }

    /// Stops the reclaimer (joining its thread) and drops every entry.
    /// Safe to call more than once.
    pub fn destroy(&self) {
        if let Some(mut task) = self.task.lock().take() {
            task.stop();
        }
        let removed = self.clear();
        debug!(removed, "fragment store destroyed");
    }

    /// Number of independently locked segments.
    pub fn segment_count(&self) -> usize {
        self.core.segments.len()
    }

    /// Abandonment ceiling applied to every entry.
    pub fn max_lock_hold(&self) -> Duration {
        self.core.max_lock_hold
    }

    /// The store's time source.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.core.clock
    }
}

impl<S> FragmentCache for FragmentStore<S>
where
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    fn get_or_create(&self, key: &str, condition: Option<&str>, ttl: Duration) -> Arc<dyn Fragment> {
        FragmentStore::get_or_create(self, key, condition, ttl)
    }

    fn get(&self, key: &str) -> Option<Arc<dyn Fragment>> {
        FragmentStore::get(self, key).map(|entry| entry as Arc<dyn Fragment>)
    }

    fn contains(&self, key: &str) -> bool {
        FragmentStore::contains(self, key)
    }

    fn len(&self) -> usize {
        FragmentStore::len(self)
    }

    fn is_empty(&self) -> bool {
        FragmentStore::is_empty(self)
    }

    fn remove(&self, key: &str) -> bool {
        FragmentStore::remove(self, key)
    }

    fn clear(&self) -> usize {
        FragmentStore::clear(self)
    }

    fn statistics(&self) -> StoreStatistics {
        FragmentStore::statistics(self)
    }

    fn destroy(&self) {
        FragmentStore::destroy(self)
    }
}

impl<S> CacheMetrics for FragmentStore<S>
where
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.statistics().to_btreemap()
    }

    fn strategy_name(&self) -> &'static str {
        "fragment"
    }
}

impl<S: BuildHasher> fmt::Debug for FragmentStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FragmentStore")
            .field("segment_count", &self.core.segments.len())
            .field("total_len", &self.core.len())
            .field("max_lock_hold", &self.core.max_lock_hold)
            .field("reclaimer", &*self.task.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::thread;

    const TTL: Duration = Duration::from_secs(10);

    fn manual_store(segments: usize) -> (FragmentStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let config = FragmentStoreConfig::new()
            .with_segments(segments)
            .with_initial_capacity(64)
            .without_reclaimer();
        let store =
            FragmentStore::init_with(config, DefaultHashBuilder::default(), clock.clone()).unwrap();
        (store, clock)
    }

    #[test]
    fn test_get_or_create_returns_same_entry() {
        let (store, _) = manual_store(4);
        let a = store.get_or_create("k", None, TTL);
        let b = store.get_or_create("k", Some("ignored"), Duration::from_secs(1));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.ttl(), TTL);
        assert_eq!(store.len(), 1);
        assert_eq!(store.statistics().entries_created(), 1);
    }

    #[test]
    fn test_get_has_no_side_effects() {
        let (store, _) = manual_store(4);
        assert!(store.get("missing").is_none());
        assert!(!store.contains("missing"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_evict_requires_identity() {
        let (store, _) = manual_store(4);
        let entry = store.get_or_create("k", None, TTL);
        let (other_store, _) = manual_store(1);
        let impostor = other_store.get_or_create("k", None, TTL);

        assert!(!store.evict("k", &impostor));
        assert!(store.contains("k"));
        assert!(store.evict("k", &entry));
        assert!(!store.contains("k"));
        assert!(!store.evict("k", &entry));
        assert_eq!(store.statistics().evictions(), 1);
    }

    #[test]
    fn test_abandoned_entry_is_replaced() {
        let (store, clock) = manual_store(4);
        let entry = store.get_or_create("k", None, TTL);
        assert!(entry.try_acquire_for_update(None));
        assert!(entry.commit_and_release("old", None));
        assert!(entry.try_force_acquire());

        clock.advance(store.max_lock_hold());
        assert!(entry.is_lock_abandoned());

        let replacement = store.get_or_create("k", Some("v2"), TTL);
        assert!(!Arc::ptr_eq(&entry, &replacement));
        assert!(!replacement.is_locked());
        assert_eq!(replacement.peek().as_deref(), Some("old"));
        assert_eq!(replacement.condition().as_deref(), Some("v2"));
        assert!(Arc::ptr_eq(&store.get("k").unwrap(), &replacement));
        assert_eq!(store.statistics().abandoned_replaced(), 1);

        // the stale owner can still release its orphan harmlessly
        entry.release();
        assert!(Arc::ptr_eq(&store.get_or_create("k", None, TTL), &replacement));
    }

    #[test]
    fn test_keys_and_clear() {
        let (store, _) = manual_store(8);
        for i in 0..20 {
            store.get_or_create(&format!("key-{i}"), None, TTL);
        }
        let mut keys: Vec<_> = store.keys().collect();
        keys.sort();
        assert_eq!(keys.len(), 20);
        assert_eq!(keys[0], "key-0");

        assert!(store.remove("key-0"));
        assert!(!store.remove("key-0"));
        assert_eq!(store.clear(), 19);
        assert!(store.is_empty());
        assert_eq!(store.statistics().evictions(), 20);
    }

    #[test]
    fn test_sweep_now_updates_statistics() {
        let (store, clock) = manual_store(4);
        let stats = store.statistics();
        assert_eq!(stats.last_sweep_evicted(), None);
        assert_eq!(stats.last_sweep_at(), None);

        for key in ["a", "b"] {
            let entry = store.get_or_create(key, None, TTL);
            assert!(entry.try_acquire_for_update(None));
            assert!(entry.commit_and_release(key, None));
        }
        clock.advance(TTL);
        store.get_or_create("fresh", None, TTL);

        let report = store.sweep_now();
        assert_eq!(report.scanned, 3);
        // "fresh" was never committed but is not yet past its TTL
        assert_eq!(report.evicted, 2);

        let stats = store.statistics();
        assert_eq!(stats.cache_size(), 1);
        assert_eq!(stats.last_sweep_evicted(), Some(2));
        assert_eq!(stats.last_sweep_at(), Some(report.finished_at));
        assert_eq!(stats.sweeps_run(), 1);
    }

    #[test]
    fn test_schedule_and_destroy() {
        let (store, _) = manual_store(2);
        assert_eq!(store.reclaimer_interval(), None);
        assert!(store.schedule_reclaimer(Duration::ZERO, false).is_err());

        store
            .schedule_reclaimer(Duration::from_secs(3600), true)
            .unwrap();
        assert_eq!(store.reclaimer_interval(), Some(Duration::from_secs(3600)));
        assert_eq!(store.statistics().sweeps_run(), 1);

        store
            .schedule_reclaimer(Duration::from_secs(60), false)
            .unwrap();
        assert_eq!(store.reclaimer_interval(), Some(Duration::from_secs(60)));

        store.get_or_create("k", None, TTL);
        store.destroy();
        store.destroy();
        assert_eq!(store.reclaimer_interval(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_background_reclaimer_sweeps() {
        let clock = Arc::new(ManualClock::new());
        let config = FragmentStoreConfig::new()
            .with_segments(2)
            .with_sweep_interval(Some(Duration::from_millis(5)));
        let store =
            FragmentStore::init_with(config, DefaultHashBuilder::default(), clock.clone()).unwrap();
        store.get_or_create("k", None, TTL);
        clock.advance(TTL);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while store.contains("k") && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert!(!store.contains("k"));
        assert!(store.statistics().sweeps_run() >= 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = FragmentStore::init(FragmentStoreConfig::new().with_segments(0)).unwrap_err();
        assert!(matches!(
            err,
            FragmentCacheError::Config(ConfigError::ZeroSegments)
        ));
    }

    #[test]
    fn test_trait_object_and_metrics() {
        let (store, _) = manual_store(4);
        let cache: &dyn FragmentCache = &store;
        let fragment = cache.get_or_create("k", None, TTL);
        assert!(fragment.try_acquire_for_update(None));
        assert!(fragment.commit_and_release(Arc::from("v"), None));
        assert!(cache.get("k").is_some());
        assert_eq!(cache.len(), 1);

        assert_eq!(store.strategy_name(), "fragment");
        assert_eq!(store.metrics().get("cache_size"), Some(&1.0));
    }
}
