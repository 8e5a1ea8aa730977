//! Fetch-or-produce helper.
//!
//! Packages the acquire → produce → commit / wait protocol for consumers that
//! do not need to drive a [`Fragment`] by hand.

use crate::error::{RegistryError, TimedOut};
use crate::fragment::{Content, Fragment, FragmentCache};
use crate::guard::UpdateGuard;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

/// Per-call settings for [`fetch_or_produce`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions<'a> {
    /// Input version the content is computed from.
    pub condition: Option<&'a str>,
    /// Time-to-live for a newly created fragment.
    pub ttl: Duration,
    /// How long a denied caller waits for content.
    pub wait: Duration,
    /// Recompute even if the fragment is fresh.
    pub force_refresh: bool,
    /// Productions slower than this are logged at warn level.
    pub slow_threshold: Duration,
}

impl<'a> FetchOptions<'a> {
    /// Options with the given TTL, a 20 s wait and a 10 s slow threshold.
    pub fn new(ttl: Duration) -> Self {
        Self {
            condition: None,
            ttl,
            wait: Duration::from_secs(20),
            force_refresh: false,
            slow_threshold: Duration::from_secs(10),
        }
    }

    /// Condition the content is produced under.
    #[must_use]
    pub fn with_condition(mut self, condition: Option<&'a str>) -> Self {
        self.condition = condition;
        self
    }

    /// How long to wait for another caller's first commit.
    #[must_use]
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Produce even when the cached content is fresh.
    #[must_use]
    pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }

    /// Production time above which a warning is logged.
    #[must_use]
    pub fn with_slow_threshold(mut self, slow_threshold: Duration) -> Self {
        self.slow_threshold = slow_threshold;
        self
    }
}

/// Where fetched content came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    /// This caller produced and committed it.
    Produced(Content),
    /// Served from the cache (possibly produced by another caller meanwhile).
    Cached(Content),
    /// Produced without touching any cache (caching disabled).
    Uncached(Content),
}

impl Fetched {
    /// The fetched content.
    pub fn content(&self) -> &Content {
        match self {
            Fetched::Produced(c) | Fetched::Cached(c) | Fetched::Uncached(c) => c,
        }
    }

    /// Unwraps the fetched content.
    pub fn into_content(self) -> Content {
        match self {
            Fetched::Produced(c) | Fetched::Cached(c) | Fetched::Uncached(c) => c,
        }
    }

    /// `true` unless the content came from the cache.
    pub fn was_produced(&self) -> bool {
        !matches!(self, Fetched::Cached(_))
    }
}

/// Failure of [`fetch_or_produce`].
#[derive(Debug, Error)]
pub enum FetchError<E> {
    /// Another caller holds the lock and no content arrived in time.
    #[error(transparent)]
    TimedOut(#[from] TimedOut),

    /// The producer failed; the lock was released and any previous content
    /// remains servable.
    #[error("fragment producer failed")]
    Producer(#[source] E),

    /// The requested strategy could not be resolved.
    #[error(transparent)]
    Strategy(#[from] RegistryError),
}

/// Returns the content at `key`, producing it with `produce` if this caller
/// wins the lock-for-update.
///
/// The lock is released on every exit path, including a panic in `produce`.
///
/// ```
/// use fragment_cache::fetch::{fetch_or_produce, FetchOptions, Fetched};
/// use fragment_cache::{FragmentStore, FragmentStoreConfig};
/// use std::time::Duration;
///
/// let store = FragmentStore::init(FragmentStoreConfig::new().without_reclaimer()).unwrap();
/// let options = FetchOptions::new(Duration::from_secs(60));
///
/// let first = fetch_or_produce(&store, "footer", &options, || Ok::<_, std::io::Error>("(c) 2026")).unwrap();
/// assert!(matches!(first, Fetched::Produced(_)));
///
/// let second = fetch_or_produce(&store, "footer", &options, || Ok::<_, std::io::Error>("unused")).unwrap();
/// assert_eq!(second, Fetched::Cached("(c) 2026".into()));
/// ```
pub fn fetch_or_produce<C, T, E, P>(
    cache: &C,
    key: &str,
    options: &FetchOptions<'_>,
    produce: P,
) -> Result<Fetched, FetchError<E>>
where
    C: FragmentCache + ?Sized,
    T: Into<Content>,
    P: FnOnce() -> Result<T, E>,
{
    let handle = cache.get_or_create(key, options.condition, options.ttl);
    let fragment: &dyn Fragment = &*handle;

    let guard = if options.force_refresh {
        UpdateGuard::try_force_acquire(fragment)
    } else {
        UpdateGuard::try_acquire(fragment, options.condition)
    };

    let Some(guard) = guard else {
        let content = fragment.get_content(options.wait)?;
        return Ok(Fetched::Cached(content));
    };

    let started = Instant::now();
    let content: Content = produce().map_err(FetchError::Producer)?.into();
    let elapsed = started.elapsed();
    if elapsed >= options.slow_threshold {
        warn!(
            key,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow fragment production"
        );
    }

    guard.commit(content.clone(), options.condition);
    Ok(Fetched::Produced(content))
}
