//! Cache Entry
//!
//! [`CacheEntry`] is the in-process [`Fragment`]: committed content plus the
//! state that coordinates who may recompute it.
//!
//! # State
//!
//! All mutable state sits behind one short-lived `parking_lot::Mutex`. The
//! lock-for-update is *not* that mutex: it is the `owner` field, set to the
//! acquiring thread's [`ThreadId`]. The mutex is only held for the few
//! instructions needed to inspect or flip the state, so readers are never
//! blocked behind a producer that is busy computing content.
//!
//! ```text
//!                  try_acquire_for_update / try_force_acquire
//!      ┌──────────┐ ─────────────────────────────────────▶ ┌──────────┐
//!      │ Unlocked │                                         │ Locked   │
//!      │ owner=∅  │ ◀───────────────────────────────────── │ owner=T  │
//!      └──────────┘   commit_and_release / release by T    └──────────┘
//!
//!      gate:  closed ──first commit──▶ open (never closes again)
//! ```
//!
//! # Invariants
//!
//! - `owner` is `Some` iff `locked_at` is `Some`.
//! - The gate is open iff `content` is `Some`.
//! - A commit writes content, condition and timestamp, clears the owner and
//!   opens the gate under a single acquisition of the state mutex.

use crate::clock::Clock;
use crate::error::TimedOut;
use crate::fragment::{normalize_condition, Content, Fragment};
use crate::guard::UpdateGuard;
use core::fmt;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::trace;

struct EntryState {
    content: Option<Content>,
    condition: Option<String>,
    last_updated: Instant,
    owner: Option<ThreadId>,
    locked_at: Option<Instant>,
    open: bool,
}

impl EntryState {
    fn needs_update(&self, condition: Option<&str>, now: Instant, ttl: Duration) -> bool {
        self.content.is_none()
            || now.saturating_duration_since(self.last_updated) >= ttl
            || (self.condition.is_some() && self.condition.as_deref() != condition)
    }

    fn lock_for(&mut self, owner: ThreadId, now: Instant) {
        self.owner = Some(owner);
        self.locked_at = Some(now);
    }

    fn unlock(&mut self) {
        self.owner = None;
        self.locked_at = None;
    }

    fn is_abandoned(&self, now: Instant, max_lock_hold: Duration) -> bool {
        self.locked_at
            .is_some_and(|at| now.saturating_duration_since(at) >= max_lock_hold)
    }
}

/// The in-process implementation of [`Fragment`].
///
/// Entries are created by [`FragmentStore`](crate::FragmentStore) and shared
/// as `Arc<CacheEntry>`; callers never construct them directly.
///
/// # Example
///
/// ```
/// use fragment_cache::{FragmentStore, FragmentStoreConfig};
/// use std::time::Duration;
///
/// let store = FragmentStore::init(FragmentStoreConfig::new().without_reclaimer()).unwrap();
/// let entry = store.get_or_create("sidebar", Some("v1"), Duration::from_secs(60));
///
/// assert!(entry.try_acquire_for_update(Some("v1")));
/// assert!(entry.commit_and_release("<ul>...</ul>", Some("v1")));
///
/// // Fresh and unchanged: nobody needs to produce it again.
/// assert!(!entry.try_acquire_for_update(Some("v1")));
/// // A new data version invalidates it.
/// assert!(entry.try_acquire_for_update(Some("v2")));
/// entry.release();
///
/// assert_eq!(&*entry.get_content(Duration::ZERO).unwrap(), "<ul>...</ul>");
/// ```
pub struct CacheEntry {
    state: Mutex<EntryState>,
    initialized: Condvar,
    ttl: Duration,
    max_lock_hold: Duration,
    clock: Arc<dyn Clock>,
}

impl CacheEntry {
    pub(crate) fn new(
        condition: Option<&str>,
        ttl: Duration,
        max_lock_hold: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::seeded(None, condition, ttl, max_lock_hold, clock)
    }

    fn seeded(
        content: Option<Content>,
        condition: Option<&str>,
        ttl: Duration,
        max_lock_hold: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state = EntryState {
            open: content.is_some(),
            content,
            condition: normalize_condition(condition).map(str::to_owned),
            last_updated: clock.now(),
            owner: None,
            locked_at: None,
        };
        Self {
            state: Mutex::new(state),
            initialized: Condvar::new(),
            ttl,
            max_lock_hold,
            clock,
        }
    }

    /// See [`Fragment::try_acquire_for_update`].
    pub fn try_acquire_for_update(&self, condition: Option<&str>) -> bool {
        self.acquire(Some(normalize_condition(condition)))
    }

    /// See [`Fragment::try_force_acquire`].
    pub fn try_force_acquire(&self) -> bool {
        self.acquire(None)
    }

    /// `check` is `None` for a forced acquisition.
    fn acquire(&self, check: Option<Option<&str>>) -> bool {
        let me = thread::current().id();
        let mut state = self.state.lock();
        match state.owner {
            Some(owner) if owner == me => {
                trace!("re-entrant acquisition");
                return true;
            }
            Some(_) => {
                trace!("lock held by another thread");
                return false;
            }
            None => {}
        }

        let now = self.clock.now();
        if let Some(condition) = check {
            if !state.needs_update(condition, now, self.ttl) {
                trace!(condition, "fragment is fresh");
                return false;
            }
        }
        state.lock_for(me, now);
        trace!(forced = check.is_none(), "lock for update granted");
        true
    }

    /// Like [`try_acquire_for_update`](Self::try_acquire_for_update), but
    /// returns a guard that releases the lock on drop unless committed.
    pub fn try_acquire_guard(&self, condition: Option<&str>) -> Option<UpdateGuard<'_, Self>> {
        UpdateGuard::try_acquire(self, condition)
    }

    /// Forced counterpart of [`try_acquire_guard`](Self::try_acquire_guard).
    pub fn try_force_acquire_guard(&self) -> Option<UpdateGuard<'_, Self>> {
        UpdateGuard::try_force_acquire(self)
    }

    /// See [`Fragment::commit_and_release`].
    pub fn commit_and_release(&self, content: impl Into<Content>, condition: Option<&str>) -> bool {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner != Some(me) {
            return false;
        }

        state.content = Some(content.into());
        state.condition = normalize_condition(condition).map(str::to_owned);
        state.last_updated = self.clock.now();
        state.unlock();
        if !state.open {
            state.open = true;
            self.initialized.notify_all();
        }
        true
    }

    /// See [`Fragment::release`].
    pub fn release(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner == Some(me) {
            state.unlock();
        }
    }

    /// See [`Fragment::get_content`].
    pub fn get_content(&self, timeout: Duration) -> Result<Content, TimedOut> {
        let mut state = self.state.lock();
        if !state.open {
            // Overflowing deadlines wait without one.
            let deadline = Instant::now().checked_add(timeout);
            while !state.open {
                match deadline {
                    Some(deadline) => {
                        if self.initialized.wait_until(&mut state, deadline).timed_out() {
                            break;
                        }
                    }
                    None => self.initialized.wait(&mut state),
                }
            }
        }
        match &state.content {
            Some(content) if state.open => Ok(Arc::clone(content)),
            _ => Err(TimedOut { waited: timeout }),
        }
    }

    /// See [`Fragment::is_lock_abandoned`].
    pub fn is_lock_abandoned(&self) -> bool {
        let now = self.clock.now();
        self.state.lock().is_abandoned(now, self.max_lock_hold)
    }

    /// `true` if the lock is abandoned, or the entry is unlocked and its TTL
    /// has elapsed since the last commit.
    pub fn is_expired_or_abandoned(&self) -> bool {
        let now = self.clock.now();
        let state = self.state.lock();
        if state.owner.is_some() {
            return state.is_abandoned(now, self.max_lock_hold);
        }
        now.saturating_duration_since(state.last_updated) >= self.ttl
    }

    /// Builds an unlocked replacement seeded with this entry's content.
    ///
    /// The replacement's gate is open when there is content to serve. Its
    /// update time is the moment of the clone, so it stays fresh for `ttl`
    /// unless the condition changes.
    pub fn clone_with(&self, condition: Option<&str>, ttl: Duration) -> Self {
        let content = self.state.lock().content.clone();
        Self::seeded(
            content,
            condition,
            ttl,
            self.max_lock_hold,
            Arc::clone(&self.clock),
        )
    }

    /// Time-to-live fixed at construction.
    #[inline]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Abandonment ceiling inherited from the store.
    #[inline]
    pub fn max_lock_hold(&self) -> Duration {
        self.max_lock_hold
    }

    /// The stored condition, if any.
    pub fn condition(&self) -> Option<String> {
        self.state.lock().condition.clone()
    }

    /// Latest committed content without waiting for the gate.
    pub fn peek(&self) -> Option<Content> {
        self.state.lock().content.clone()
    }

    /// `true` while some thread holds the update lock.
    pub fn is_locked(&self) -> bool {
        self.state.lock().owner.is_some()
    }

    /// `true` if the calling thread holds the update lock.
    pub fn is_held_by_current_thread(&self) -> bool {
        self.state.lock().owner == Some(thread::current().id())
    }

    /// `true` once the first commit has opened the gate.
    pub fn is_initialized(&self) -> bool {
        self.state.lock().open
    }

    /// Time of the last commit, or of construction before the first one.
    pub fn last_updated(&self) -> Instant {
        self.state.lock().last_updated
    }
}

impl Fragment for CacheEntry {
    fn try_acquire_for_update(&self, condition: Option<&str>) -> bool {
        CacheEntry::try_acquire_for_update(self, condition)
    }

    fn try_force_acquire(&self) -> bool {
        CacheEntry::try_force_acquire(self)
    }

    fn commit_and_release(&self, content: Content, condition: Option<&str>) -> bool {
        CacheEntry::commit_and_release(self, content, condition)
    }

    fn release(&self) {
        CacheEntry::release(self)
    }

    fn get_content(&self, timeout: Duration) -> Result<Content, TimedOut> {
        CacheEntry::get_content(self, timeout)
    }

    fn is_lock_abandoned(&self) -> bool {
        CacheEntry::is_lock_abandoned(self)
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CacheEntry")
            .field("ttl", &self.ttl)
            .field("condition", &state.condition)
            .field("locked", &state.owner.is_some())
            .field("initialized", &state.open)
            .finish()
    }
}
