//! Fragment Store Configuration
//!
//! [`FragmentStoreConfig`] is the single entry point for sizing a
//! [`FragmentStore`](crate::FragmentStore) and scheduling its reclaimer.
//! None of these values change what the cache returns; they only trade memory
//! and lock contention against each other.
//!
//! # Parameters
//!
//! | Parameter | Default | Meaning |
//! |-----------|---------|---------|
//! | `initial_capacity` | 10 000 | Expected number of fragments, pre-allocated across segments |
//! | `load_factor` | 0.75 | Target fill ratio of each segment map before it grows |
//! | `segments` | CPU count, clamped to `[4, 64]` | Independent map shards (concurrency level) |
//! | `sweep_interval` | 30 s | Reclaimer cadence; `None` disables the background thread |
//! | `max_lock_hold` | 90 s | How long a lock-for-update may be held before it is presumed abandoned |
//!
//! # Examples
//!
//! ```
//! use fragment_cache::config::FragmentStoreConfig;
//! use std::time::Duration;
//!
//! let config = FragmentStoreConfig::new()
//!     .with_initial_capacity(50_000)
//!     .with_load_factor(0.8)
//!     .with_segments(32)
//!     .with_sweep_interval(Some(Duration::from_secs(60)));
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.segments(), 32);
//! ```

use crate::error::ConfigError;
use core::fmt;
use std::time::Duration;

/// Default number of fragments the store is sized for.
pub const DEFAULT_INITIAL_CAPACITY: usize = 10_000;

/// Default segment map load factor.
pub const DEFAULT_LOAD_FACTOR: f32 = 0.75;

/// Default reclaimer cadence.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Default ceiling after which a held lock-for-update counts as abandoned.
pub const DEFAULT_MAX_LOCK_HOLD: Duration = Duration::from_secs(90);

/// Returns the default number of segments based on available parallelism.
pub fn default_segment_count() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(16)
        .clamp(4, 64)
}

/// Configuration for a [`FragmentStore`](crate::FragmentStore).
#[derive(Clone, Copy, PartialEq)]
pub struct FragmentStoreConfig {
    initial_capacity: usize,
    load_factor: f32,
    segments: usize,
    sweep_interval: Option<Duration>,
    max_lock_hold: Duration,
}

impl FragmentStoreConfig {
    /// Creates a configuration with every default applied.
    #[must_use]
    pub fn new() -> Self {
        Self {
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            load_factor: DEFAULT_LOAD_FACTOR,
            segments: default_segment_count(),
            sweep_interval: Some(DEFAULT_SWEEP_INTERVAL),
            max_lock_hold: DEFAULT_MAX_LOCK_HOLD,
        }
    }

    /// Sets the number of fragments to pre-allocate room for.
    #[must_use]
    pub fn with_initial_capacity(mut self, initial_capacity: usize) -> Self {
        self.initial_capacity = initial_capacity;
        self
    }

    /// Sets the segment map load factor. Must be within `(0, 1]`.
    #[must_use]
    pub fn with_load_factor(mut self, load_factor: f32) -> Self {
        self.load_factor = load_factor;
        self
    }

    /// Sets the number of independent segments.
    ///
    /// More segments = less lock contention on `get_or_create`, at the cost of
    /// one mutex and one map header per segment.
    #[must_use]
    pub fn with_segments(mut self, segments: usize) -> Self {
        self.segments = segments;
        self
    }

    /// Sets the reclaimer cadence. `None` leaves sweeping to explicit
    /// [`sweep_now`](crate::FragmentStore::sweep_now) calls.
    #[must_use]
    pub fn with_sweep_interval(mut self, sweep_interval: Option<Duration>) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    /// Disables the background reclaimer.
    #[must_use]
    pub fn without_reclaimer(self) -> Self {
        self.with_sweep_interval(None)
    }

    /// Sets the store-wide abandoned-lock ceiling.
    #[must_use]
    pub fn with_max_lock_hold(mut self, max_lock_hold: Duration) -> Self {
        self.max_lock_hold = max_lock_hold;
        self
    }

    /// Returns the number of fragments the store is sized for.
    #[inline]
    pub fn initial_capacity(&self) -> usize {
        self.initial_capacity
    }

    /// Returns the segment map load factor.
    #[inline]
    pub fn load_factor(&self) -> f32 {
        self.load_factor
    }

    /// Returns the number of segments.
    #[inline]
    pub fn segments(&self) -> usize {
        self.segments
    }

    /// Returns the reclaimer cadence, if background sweeping is enabled.
    #[inline]
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval
    }

    /// Returns the abandoned-lock ceiling.
    #[inline]
    pub fn max_lock_hold(&self) -> Duration {
        self.max_lock_hold
    }

    /// Number of map slots to reserve in each segment.
    pub(crate) fn segment_capacity(&self) -> usize {
        let slots = (self.initial_capacity as f64 / f64::from(self.load_factor)).ceil() as usize;
        slots.div_ceil(self.segments.max(1))
    }

    /// Checks every value, returning the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.segments == 0 {
            return Err(ConfigError::ZeroSegments);
        }
        if !(self.load_factor > 0.0 && self.load_factor <= 1.0) {
            return Err(ConfigError::LoadFactor(self.load_factor));
        }
        if self.sweep_interval == Some(Duration::ZERO) {
            return Err(ConfigError::ZeroSweepInterval);
        }
        if self.max_lock_hold.is_zero() {
            return Err(ConfigError::ZeroLockHold);
        }
        Ok(())
    }
}

impl Default for FragmentStoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FragmentStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FragmentStoreConfig")
            .field("initial_capacity", &self.initial_capacity)
            .field("load_factor", &self.load_factor)
            .field("segments", &self.segments)
            .field("sweep_interval", &self.sweep_interval)
            .field("max_lock_hold", &self.max_lock_hold)
            .finish()
    }
}
