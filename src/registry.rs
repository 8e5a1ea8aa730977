//! Strategy registry.
//!
//! A rendering layer usually wants one place to look up "the fragment cache"
//! by name, plus a switch to turn caching off. [`FragmentCacheRegistry`] is
//! that place: build it once at startup, register one or more strategies, and
//! pass it by reference to whatever renders fragments.

use crate::error::RegistryError;
use crate::fetch::{fetch_or_produce, FetchError, FetchOptions, Fetched};
use crate::fragment::{Content, FragmentCache};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Default time a denied caller waits for content.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Default production time above which a warning is logged.
pub const DEFAULT_WARNING_DURATION: Duration = Duration::from_secs(10);

#[derive(Default)]
struct Strategies {
    caches: BTreeMap<String, Arc<dyn FragmentCache>>,
    default: Option<String>,
}

#[derive(Clone, Copy)]
struct Timing {
    request_timeout: Duration,
    warning_duration: Duration,
}

/// Named fragment cache strategies plus a global on/off switch.
///
/// Caching starts disabled; call [`enable`](Self::enable) once strategies are
/// registered.
///
/// ```
/// use fragment_cache::registry::FragmentCacheRegistry;
/// use fragment_cache::fetch::Fetched;
/// use fragment_cache::{FragmentStore, FragmentStoreConfig};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let registry = FragmentCacheRegistry::new();
/// let store = FragmentStore::init(FragmentStoreConfig::new().without_reclaimer()).unwrap();
/// registry.register_strategy("memory", Arc::new(store));
///
/// let render = || Ok::<_, std::fmt::Error>("<nav/>");
/// let ttl = Duration::from_secs(60);
///
/// // Disabled: every call renders.
/// let out = registry.fetch(None, "nav", None, ttl, false, render).unwrap();
/// assert!(matches!(out, Fetched::Uncached(_)));
///
/// registry.enable();
/// let out = registry.fetch(None, "nav", None, ttl, false, render).unwrap();
/// assert!(matches!(out, Fetched::Produced(_)));
/// let out = registry.fetch(Some("memory"), "nav", None, ttl, false, render).unwrap();
/// assert!(matches!(out, Fetched::Cached(_)));
/// ```
pub struct FragmentCacheRegistry {
    strategies: RwLock<Strategies>,
    enabled: AtomicBool,
    timing: RwLock<Timing>,
}

impl FragmentCacheRegistry {
    /// Creates an empty, disabled registry.
    pub fn new() -> Self {
        Self {
            strategies: RwLock::new(Strategies::default()),
            enabled: AtomicBool::new(false),
            timing: RwLock::new(Timing {
                request_timeout: DEFAULT_REQUEST_TIMEOUT,
                warning_duration: DEFAULT_WARNING_DURATION,
            }),
        }
    }

    /// Registers `cache` under `name`, returning the cache it replaced.
    ///
    /// The first strategy ever registered becomes the default.
    pub fn register_strategy(
        &self,
        name: impl Into<String>,
        cache: Arc<dyn FragmentCache>,
    ) -> Option<Arc<dyn FragmentCache>> {
        let name = name.into();
        let mut strategies = self.strategies.write();
        if strategies.default.is_none() {
            strategies.default = Some(name.clone());
        }
        info!(strategy = %name, "registered fragment cache strategy");
        strategies.caches.insert(name, cache)
    }

    /// The strategy registered under `name`.
    pub fn strategy(&self, name: &str) -> Option<Arc<dyn FragmentCache>> {
        self.strategies.read().caches.get(name).cloned()
    }

    /// The default strategy, if one is set.
    pub fn default_strategy(&self) -> Option<Arc<dyn FragmentCache>> {
        let strategies = self.strategies.read();
        let name = strategies.default.as_deref()?;
        strategies.caches.get(name).cloned()
    }

    /// Name of the default strategy.
    pub fn default_strategy_name(&self) -> Option<String> {
        self.strategies.read().default.clone()
    }

    /// Makes a registered strategy the default.
    pub fn set_default(&self, name: &str) -> Result<(), RegistryError> {
        let mut strategies = self.strategies.write();
        if !strategies.caches.contains_key(name) {
            return Err(RegistryError::UnknownStrategy(name.to_string()));
        }
        strategies.default = Some(name.to_string());
        Ok(())
    }

    /// Looks up `name`, or the default strategy when `name` is `None`.
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<dyn FragmentCache>, RegistryError> {
        match name {
            Some(name) => self
                .strategy(name)
                .ok_or_else(|| RegistryError::UnknownStrategy(name.to_string())),
            None => self.default_strategy().ok_or(RegistryError::Empty),
        }
    }

    /// Registered names in sorted order.
    pub fn strategy_names(&self) -> Vec<String> {
        self.strategies.read().caches.keys().cloned().collect()
    }

    /// Turns caching back on.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        info!("fragment caching enabled");
    }

    /// Turns caching off and clears every registered cache.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        let cleared: usize = self.each_cache(|cache| cache.clear()).into_iter().sum();
        info!(cleared, "fragment caching disabled");
    }

    /// `true` while caching is on.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// How long a caller denied the lock waits for content.
    pub fn request_timeout(&self) -> Duration {
        self.timing.read().request_timeout
    }

    /// Sets how long a caller denied the lock waits for content.
    pub fn set_request_timeout(&self, timeout: Duration) {
        self.timing.write().request_timeout = timeout;
    }

    /// Production time above which a warning is logged.
    pub fn warning_duration(&self) -> Duration {
        self.timing.read().warning_duration
    }

    /// Sets the production time above which a warning is logged.
    pub fn set_warning_duration(&self, duration: Duration) {
        self.timing.write().warning_duration = duration;
    }

    /// Fetches `key` from a strategy, producing it on a miss.
    ///
    /// With caching disabled, `produce` runs directly and nothing is stored.
    /// `force_refresh` recomputes even fresh content, as for a "no cache"
    /// request.
    pub fn fetch<T, E, P>(
        &self,
        strategy: Option<&str>,
        key: &str,
        condition: Option<&str>,
        ttl: Duration,
        force_refresh: bool,
        produce: P,
    ) -> Result<Fetched, FetchError<E>>
    where
        T: Into<Content>,
        P: FnOnce() -> Result<T, E>,
    {
        if !self.is_enabled() {
            let content = produce().map_err(FetchError::Producer)?;
            return Ok(Fetched::Uncached(content.into()));
        }

        let cache = self.resolve(strategy)?;
        let timing = *self.timing.read();
        let options = FetchOptions::new(ttl)
            .with_condition(condition)
            .with_wait(timing.request_timeout)
            .with_force_refresh(force_refresh)
            .with_slow_threshold(timing.warning_duration);
        fetch_or_produce(&*cache, key, &options, produce)
    }

    /// Destroys every registered cache. Registrations are kept.
    pub fn destroy(&self) {
        self.each_cache(|cache| cache.destroy());
        debug!("fragment cache registry destroyed");
    }

    /// Runs `f` on each cache without holding the registry lock.
    fn each_cache<R>(&self, f: impl Fn(&dyn FragmentCache) -> R) -> Vec<R> {
        let caches: Vec<_> = self.strategies.read().caches.values().cloned().collect();
        caches.iter().map(|cache| f(&**cache)).collect()
    }
}

impl Default for FragmentCacheRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for FragmentCacheRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let strategies = self.strategies.read();
        f.debug_struct("FragmentCacheRegistry")
            .field("enabled", &self.is_enabled())
            .field("strategies", &strategies.caches.keys().collect::<Vec<_>>())
            .field("default", &strategies.default)
            .finish()
    }
}
