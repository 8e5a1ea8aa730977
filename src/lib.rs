//! # fragment-cache
//!
//! A stampede-safe, single-flight cache for expensively computed content
//! fragments (rendered page sections, report blocks, API aggregates).
//!
//! Under concurrent load, at most one caller per key recomputes a fragment.
//! Everyone else either gets the last committed content immediately or, if
//! nothing has been committed yet, waits a bounded time for the in-flight
//! result. Fragments go stale by TTL *or* by a change of an opaque condition
//! tag (for example a data version), and a producer that dies while holding
//! the lock is recovered automatically once the lock has been held past a
//! store-wide ceiling.
//!
//! ```text
//!   caller ──get_or_create(key)──▶ FragmentStore ──▶ Arc<CacheEntry>
//!                                        ▲                │
//!   reclaimer thread ──sweep────────────┘                │
//!                                                         ▼
//!        try_acquire_for_update(condition) ──true──▶ produce ──▶ commit_and_release
//!                     │ false
//!                     ▼
//!              get_content(timeout) ──▶ Ok(content) | Err(TimedOut)
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use fragment_cache::{FragmentStore, FragmentStoreConfig};
//! use std::time::Duration;
//!
//! let store = FragmentStore::init(FragmentStoreConfig::new()).unwrap();
//! let entry = store.get_or_create("home", Some("v1"), Duration::from_secs(60));
//!
//! let html = if entry.try_acquire_for_update(Some("v1")) {
//!     let rendered = String::from("<h1>Hello</h1>");
//!     entry.commit_and_release(rendered.as_str(), Some("v1"));
//!     rendered
//! } else {
//!     entry
//!         .get_content(Duration::from_secs(5))
//!         .map(|c| c.to_string())
//!         .unwrap_or_else(|_| String::from("<!-- still rendering -->"))
//! };
//! assert_eq!(html, "<h1>Hello</h1>");
//! store.destroy();
//! ```
//!
//! For the common case, [`fetch::fetch_or_produce`] wraps the whole protocol
//! and guarantees the lock is released if the producer fails or panics.
//!
//! ## Modules
//!
//! - [`entry`]: the per-fragment state machine
//! - [`store`]: the segmented keyed store
//! - [`reclaimer`]: background eviction of expired and abandoned entries
//! - [`fetch`] and [`guard`]: scoped helpers on top of the raw protocol
//! - [`registry`]: named strategies plus an on/off switch for the rendering layer
//! - [`config`], [`clock`], [`error`], [`statistics`]

pub mod clock;

/// Store configuration.
pub mod config;

pub mod error;

/// Object-safe fragment and fragment-cache contracts.
pub mod fragment;

/// The in-process fragment: content plus update-coordination state.
pub mod entry;

pub mod guard;

/// Segmented in-process fragment store.
pub mod store;

/// Sweep logic and the background reclaimer thread.
pub mod reclaimer;

pub mod statistics;

pub mod fetch;

pub mod registry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::FragmentStoreConfig;
pub use entry::CacheEntry;
pub use error::{ConfigError, FragmentCacheError, RegistryError, TimedOut};
pub use fetch::{fetch_or_produce, FetchError, FetchOptions, Fetched};
pub use fragment::{Content, Fragment, FragmentCache};
pub use guard::UpdateGuard;
pub use reclaimer::SweepReport;
pub use registry::FragmentCacheRegistry;
pub use statistics::{CacheMetrics, StoreStatistics};
pub use store::{DefaultHashBuilder, FragmentStore};
