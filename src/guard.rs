//! Scoped lock-for-update.
//!
//! A producer that fails halfway (an `Err`, an early return, a panic) must
//! still release the fragment, or every other caller waits until the lock is
//! presumed abandoned. [`UpdateGuard`] ties the release to scope exit.

use crate::entry::CacheEntry;
use crate::fragment::{Content, Fragment};
use core::fmt;
use core::marker::PhantomData;
use std::time::Duration;
use tracing::warn;

/// Holds a fragment's lock-for-update until committed or dropped.
///
/// Ownership of the lock belongs to the thread that acquired it, so the guard
/// is neither `Send` nor `Sync`.
///
/// ```
/// use fragment_cache::{FragmentStore, FragmentStoreConfig};
/// use std::time::Duration;
///
/// let store = FragmentStore::init(FragmentStoreConfig::new().without_reclaimer()).unwrap();
/// let entry = store.get_or_create("nav", None, Duration::from_secs(60));
///
/// if let Some(guard) = entry.try_acquire_guard(None) {
///     let rendered: Result<String, std::fmt::Error> = Err(std::fmt::Error);
///     match rendered {
///         Ok(html) => { guard.commit(html, None); }
///         Err(_) => { /* guard drops here and releases the lock */ }
///     }
/// }
/// assert!(!entry.is_locked());
/// ```
#[must_use = "dropping the guard releases the lock immediately"]
pub struct UpdateGuard<'a, F: Fragment + ?Sized = CacheEntry> {
    fragment: &'a F,
    finished: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'a, F: Fragment + ?Sized> UpdateGuard<'a, F> {
    /// Acquires `fragment` if it needs an update for `condition`.
    pub fn try_acquire(fragment: &'a F, condition: Option<&str>) -> Option<Self> {
        fragment
            .try_acquire_for_update(condition)
            .then(|| Self::held(fragment))
    }

    /// Acquires `fragment` regardless of freshness.
    pub fn try_force_acquire(fragment: &'a F) -> Option<Self> {
        fragment.try_force_acquire().then(|| Self::held(fragment))
    }

    fn held(fragment: &'a F) -> Self {
        Self {
            fragment,
            finished: false,
            _not_send: PhantomData,
        }
    }

    /// The guarded fragment. Readers may still call
    /// [`get_content`](Fragment::get_content) on it for the previous content.
    pub fn fragment(&self) -> &'a F {
        self.fragment
    }

    /// Previous content, if the gate is already open.
    pub fn previous(&self) -> Option<Content> {
        self.fragment.get_content(Duration::ZERO).ok()
    }

    /// Commits `content` and releases the lock.
    ///
    /// Returns `false` if the lock was no longer held by this thread, in which
    /// case nothing was written.
    pub fn commit(mut self, content: impl Into<Content>, condition: Option<&str>) -> bool {
        self.finished = true;
        let committed = self.fragment.commit_and_release(content.into(), condition);
        if !committed {
            warn!("lost the update lock before committing; content discarded");
        }
        committed
    }

    /// Releases the lock without committing.
    pub fn abort(mut self) {
        self.finished = true;
        self.fragment.release();
    }
}

impl<F: Fragment + ?Sized> Drop for UpdateGuard<'_, F> {
    fn drop(&mut self) {
        if !self.finished {
            self.fragment.release();
        }
    }
}

impl<F: Fragment + ?Sized> fmt::Debug for UpdateGuard<'_, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateGuard")
            .field("fragment", &self.fragment)
            .field("finished", &self.finished)
            .finish()
    }
}
