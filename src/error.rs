//! Error types.
//!
//! Contention is not an error: a denied `try_acquire_for_update` or a
//! `commit_and_release` from a non-owner reports `false`. The types here cover
//! the cases a caller has to branch on explicitly.

use std::time::Duration;
use thiserror::Error;

/// A reader gave up waiting for a fragment's first commit.
///
/// This is not a failure of the entry: the producer may still commit later,
/// and a subsequent caller with a fresh timeout will see the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("timed out after {waited:?} waiting for fragment content")]
pub struct TimedOut {
    /// How long the reader waited before giving up.
    pub waited: Duration,
}

/// Invalid [`FragmentStoreConfig`](crate::config::FragmentStoreConfig) values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// The store needs at least one segment.
    #[error("segment count must be greater than zero")]
    ZeroSegments,

    /// Load factor outside `(0, 1]`.
    #[error("load factor must be within (0, 1], got {0}")]
    LoadFactor(f32),

    /// A zero sweep interval would spin the reclaimer thread.
    #[error("sweep interval must be greater than zero")]
    ZeroSweepInterval,

    /// A zero ceiling would report every held lock as abandoned.
    #[error("max lock hold must be greater than zero")]
    ZeroLockHold,
}

/// Errors from building or scheduling a [`FragmentStore`](crate::FragmentStore).
#[derive(Debug, Error)]
pub enum FragmentCacheError {
    /// The supplied configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The background reclaimer thread could not be started.
    #[error("failed to spawn reclaimer thread")]
    Spawn(#[source] std::io::Error),
}

/// Errors from resolving a strategy in a
/// [`FragmentCacheRegistry`](crate::registry::FragmentCacheRegistry).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No strategy has been registered yet, so there is no default.
    #[error("no fragment cache strategy registered")]
    Empty,

    /// The named strategy is not registered.
    #[error("unknown fragment cache strategy `{0}`")]
    UnknownStrategy(String),
}
