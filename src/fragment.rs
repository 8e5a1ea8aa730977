//! Fragment Contracts
//!
//! Two object-safe traits describe what the rendering layer needs from a
//! fragment cache, independent of where the fragments live:
//!
//! - [`Fragment`]: one cached unit and its lock-for-update protocol.
//! - [`FragmentCache`]: the keyed collection that creates fragments on demand.
//!
//! [`CacheEntry`](crate::CacheEntry) and [`FragmentStore`](crate::FragmentStore)
//! are the in-process implementations. A remote backend implements the same
//! traits on top of its own locking primitives.
//!
//! # Protocol
//!
//! ```text
//!   get_or_create(key, condition, ttl)
//!              │
//!              ▼
//!   try_acquire_for_update(condition) ──false──▶ get_content(timeout)
//!              │ true                               │         │
//!              ▼                                    ▼         ▼
//!   produce content ──error──▶ release()         Ok(C)   Err(TimedOut)
//!              │
//!              ▼
//!   commit_and_release(content, condition)
//! ```

use crate::error::TimedOut;
use crate::statistics::StoreStatistics;
use core::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Committed fragment content. Cloning hands out another reference, not a copy.
pub type Content = Arc<str>;

/// Normalizes a caller-supplied condition: an empty tag means "no condition".
#[inline]
pub fn normalize_condition(condition: Option<&str>) -> Option<&str> {
    condition.filter(|c| !c.is_empty())
}

/// A single cached fragment and its single-producer update protocol.
///
/// Lock ownership belongs to the calling thread. Every method is
/// non-blocking except [`get_content`](Fragment::get_content).
pub trait Fragment: Send + Sync + fmt::Debug {
    /// Attempts to become the producer for this fragment.
    ///
    /// Returns `true` if the calling thread already holds the lock. Returns
    /// `false` if another thread holds it, or if the fragment is still fresh:
    /// it has content, its TTL has not elapsed, and `condition` matches the
    /// stored condition (a stored condition with `None` passed in counts as
    /// changed). The freshness check and the acquisition are one atomic step.
    fn try_acquire_for_update(&self, condition: Option<&str>) -> bool;

    /// Acquires the lock regardless of freshness. Still `false` if another
    /// thread holds it.
    fn try_force_acquire(&self) -> bool;

    /// Stores `content` and `condition`, stamps the update time, releases the
    /// lock and opens the gate, in one step visible to readers.
    ///
    /// Returns `false` without touching anything if the calling thread does not
    /// hold the lock.
    fn commit_and_release(&self, content: Content, condition: Option<&str>) -> bool;

    /// Releases the lock if the calling thread holds it; otherwise a no-op.
    fn release(&self);

    /// Waits up to `timeout` for the first commit, then returns the latest
    /// committed content. Never waits on the update lock itself.
    fn get_content(&self, timeout: Duration) -> Result<Content, TimedOut>;

    /// `true` if the lock has been held for at least the abandonment ceiling.
    fn is_lock_abandoned(&self) -> bool;
}

/// A keyed collection of [`Fragment`]s.
pub trait FragmentCache: Send + Sync + fmt::Debug {
    /// Returns the fragment stored at `key`, creating it if absent.
    ///
    /// A fragment whose lock was abandoned is replaced by a fresh, unlocked
    /// fragment that still serves the old content.
    fn get_or_create(&self, key: &str, condition: Option<&str>, ttl: Duration)
        -> Arc<dyn Fragment>;

    /// Plain lookup with no side effects.
    fn get(&self, key: &str) -> Option<Arc<dyn Fragment>>;

    /// Returns `true` if a fragment is stored at `key`.
    fn contains(&self, key: &str) -> bool;

    /// Number of stored fragments.
    fn len(&self) -> usize;

    /// Returns `true` if nothing is stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unconditionally evicts the fragment at `key`.
    fn remove(&self, key: &str) -> bool;

    /// Evicts every fragment, returning how many were dropped.
    fn clear(&self) -> usize;

    /// Point-in-time statistics snapshot.
    fn statistics(&self) -> StoreStatistics;

    /// Stops background work and drops every fragment. Idempotent.
    fn destroy(&self);
}
