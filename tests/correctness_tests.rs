//! Fragment Cache Correctness Tests
//!
//! Single-threaded checks of the fragment protocol through the public API.
//! Time is driven by a `ManualClock`, so every expiry and abandonment boundary
//! is exact.
//!
//! ## Segments
//!
//! 1. **Entry Protocol**: acquisition, commit, release, re-entrancy
//! 2. **Invalidation Triggers**: TTL and condition
//! 3. **Abandonment Recovery**: abandoned locks and `get_or_create` replacement
//! 4. **Sweeping**: reclaimer outcomes and statistics

use fragment_cache::{
    Clock, FragmentStore, FragmentStoreConfig, ManualClock, StoreStatistics,
};
use std::sync::Arc;
use std::time::Duration;

const TTL: Duration = Duration::from_secs(1);
const HOLD: Duration = Duration::from_secs(90);

fn manual_store() -> (FragmentStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let config = FragmentStoreConfig::new()
        .with_segments(4)
        .with_max_lock_hold(HOLD)
        .without_reclaimer();
    let store = FragmentStore::init_with(config, Default::default(), clock.clone()).unwrap();
    (store, clock)
}

fn commit(store: &FragmentStore, key: &str, content: &str, condition: Option<&str>) {
    let entry = store.get_or_create(key, condition, TTL);
    assert!(entry.try_force_acquire());
    assert!(entry.commit_and_release(content, condition));
}

// ============================================================================
// SEGMENT 1: ENTRY PROTOCOL
// ============================================================================

#[test]
fn test_first_caller_produces() {
    let (store, _) = manual_store();
    let entry = store.get_or_create("home", None, TTL);

    assert!(entry.try_acquire_for_update(None));
    assert!(entry.commit_and_release("HELLO", None));
    assert_eq!(&*entry.get_content(Duration::ZERO).unwrap(), "HELLO");
}

#[test]
fn test_reentry_has_no_side_effects() {
    let (store, clock) = manual_store();
    let entry = store.get_or_create("k", Some("v1"), TTL);
    assert!(entry.try_acquire_for_update(Some("v1")));

    clock.advance(Duration::from_secs(30));
    for condition in [Some("v1"), Some("v2"), None] {
        assert!(entry.try_acquire_for_update(condition));
    }
    assert!(entry.is_held_by_current_thread());
    assert!(!entry.is_initialized());
    assert!(entry.peek().is_none());
    // the lock was stamped at the first acquisition, not the last
    clock.advance(HOLD - Duration::from_secs(30));
    assert!(entry.is_lock_abandoned());
}

#[test]
fn test_commit_misuse_is_a_noop() {
    let (store, _) = manual_store();
    let entry = store.get_or_create("k", None, TTL);

    assert!(!entry.commit_and_release("nobody asked", None));
    entry.release();
    assert!(!entry.is_initialized());
    assert!(!entry.is_locked());

    assert!(entry.try_acquire_for_update(None));
    assert!(entry.commit_and_release("first", None));
    // the lock is gone after a commit, so a second commit is misuse too
    assert!(!entry.commit_and_release("second", None));
    assert_eq!(entry.peek().as_deref(), Some("first"));
}

#[test]
fn test_release_keeps_stale_content_servable() {
    let (store, _) = manual_store();
    commit(&store, "k", "stale", None);
    let entry = store.get("k").unwrap();

    assert!(entry.try_force_acquire());
    assert_eq!(&*entry.get_content(Duration::ZERO).unwrap(), "stale");
    entry.release();
    assert_eq!(&*entry.get_content(Duration::ZERO).unwrap(), "stale");
}

#[test]
fn test_empty_condition_means_none() {
    let (store, _) = manual_store();
    let entry = store.get_or_create("k", Some(""), TTL);
    assert_eq!(entry.condition(), None);

    assert!(entry.try_acquire_for_update(Some("")));
    assert!(entry.commit_and_release("x", Some("")));
    assert_eq!(entry.condition(), None);
    assert!(!entry.try_acquire_for_update(None));
    assert!(!entry.try_acquire_for_update(Some("")));
}

// ============================================================================
// SEGMENT 2: INVALIDATION TRIGGERS
// ============================================================================

#[test]
fn test_expiry_trigger() {
    let (store, clock) = manual_store();
    commit(&store, "k", "x", None);
    let entry = store.get("k").unwrap();

    clock.advance(TTL / 2);
    assert!(!entry.try_acquire_for_update(None));
    clock.advance(TTL / 2 - Duration::from_nanos(1));
    assert!(!entry.try_acquire_for_update(None));
    clock.advance(Duration::from_nanos(1));
    assert!(entry.try_acquire_for_update(None));
}

#[test]
fn test_condition_trigger_ignores_ttl() {
    let (store, _) = manual_store();
    commit(&store, "k", "x", Some("v1"));
    let entry = store.get("k").unwrap();

    assert!(!entry.try_acquire_for_update(Some("v1")));
    assert!(entry.try_acquire_for_update(Some("v2")));
    assert!(entry.commit_and_release("y", Some("v2")));
    assert!(!entry.try_acquire_for_update(Some("v2")));
    assert!(entry.try_acquire_for_update(Some("v1")));
}

#[test]
fn test_force_acquire_while_fresh() {
    let (store, _) = manual_store();
    commit(&store, "k", "x", Some("v1"));
    let entry = store.get("k").unwrap();
    assert!(!entry.try_acquire_for_update(Some("v1")));
    assert!(entry.try_force_acquire());
    assert!(entry.commit_and_release("forced", Some("v1")));
    assert_eq!(entry.peek().as_deref(), Some("forced"));
}

// ============================================================================
// SEGMENT 3: ABANDONMENT RECOVERY
// ============================================================================

#[test]
fn test_abandoned_entry_replaced_with_old_content() {
    let (store, clock) = manual_store();
    commit(&store, "k", "last-good", None);
    let orphan = store.get("k").unwrap();
    assert!(orphan.try_force_acquire());

    clock.advance(HOLD - Duration::from_millis(1));
    assert!(!orphan.is_lock_abandoned());
    assert!(Arc::ptr_eq(&store.get_or_create("k", None, TTL), &orphan));

    clock.advance(Duration::from_millis(1));
    assert!(orphan.is_lock_abandoned());

    let replacement = store.get_or_create("k", None, TTL);
    assert!(!Arc::ptr_eq(&replacement, &orphan));
    assert!(!replacement.is_locked());
    assert_eq!(
        &*replacement.get_content(Duration::ZERO).unwrap(),
        "last-good"
    );
    // stamped at swap time, so it is fresh until its own TTL elapses
    assert!(!replacement.try_acquire_for_update(None));
    clock.advance(TTL);
    assert!(replacement.try_acquire_for_update(None));
    assert!(replacement.commit_and_release("rebuilt", None));
}

#[test]
fn test_replacement_keeps_condition_and_denies_update() {
    let (store, clock) = manual_store();
    commit(&store, "k", "old", Some("v1"));
    let orphan = store.get("k").unwrap();
    assert!(orphan.try_force_acquire());
    clock.advance(HOLD);

    let replacement = store.get_or_create("k", Some("v1"), Duration::from_secs(60));
    assert!(!Arc::ptr_eq(&replacement, &orphan));
    assert_eq!(replacement.peek().as_deref(), Some("old"));
    assert!(!replacement.try_acquire_for_update(Some("v1")));
    assert!(!replacement.is_locked());
    assert!(replacement.try_acquire_for_update(Some("v2")));
    replacement.release();
}

#[test]
fn test_abandoned_entry_without_content() {
    let (store, clock) = manual_store();
    let orphan = store.get_or_create("k", None, TTL);
    assert!(orphan.try_acquire_for_update(None));
    clock.advance(HOLD);

    let replacement = store.get_or_create("k", None, TTL);
    assert!(!Arc::ptr_eq(&replacement, &orphan));
    assert!(!replacement.is_initialized());
    assert!(replacement.get_content(Duration::from_millis(5)).is_err());
}

// ============================================================================
// SEGMENT 4: SWEEPING
// ============================================================================

#[test]
fn test_sweep_evicts_expired_and_keeps_fresh() {
    let (store, clock) = manual_store();
    for i in 0..5 {
        commit(&store, &format!("expired-{i}"), "x", None);
    }
    clock.advance(TTL);
    for i in 0..3 {
        commit(&store, &format!("fresh-{i}"), "x", None);
    }

    let report = store.sweep_now();
    assert_eq!(report.scanned, 8);
    assert_eq!(report.evicted, 5);
    assert_eq!(store.len(), 3);
    for i in 0..3 {
        assert!(store.contains(&format!("fresh-{i}")));
    }
}

#[test]
fn test_sweep_spares_entry_committed_before_sweep() {
    let (store, clock) = manual_store();
    for i in 0..4 {
        commit(&store, &format!("k{i}"), "x", None);
    }
    clock.advance(TTL);
    // a producer gets in before the sweep
    commit(&store, "k2", "y", None);

    let report = store.sweep_now();
    assert_eq!(report.evicted, 3);
    assert_eq!(store.keys().collect::<Vec<_>>(), ["k2"]);
}

#[test]
fn test_sweep_evicts_abandoned_lock() {
    let (store, clock) = manual_store();
    let orphan = store.get_or_create("orphan", None, Duration::from_secs(3600));
    assert!(orphan.try_acquire_for_update(None));
    let busy = store.get_or_create("busy", None, Duration::from_secs(3600));
    clock.advance(HOLD / 2);
    assert!(busy.try_acquire_for_update(None));
    clock.advance(HOLD / 2);

    assert_eq!(store.sweep_now().evicted, 1);
    assert!(!store.contains("orphan"));
    assert!(store.contains("busy"));
}

#[test]
fn test_statistics_snapshot() {
    let (store, clock) = manual_store();
    let before: StoreStatistics = store.statistics();
    assert_eq!(before.cache_size(), 0);
    assert_eq!(before.last_sweep_evicted(), None);
    assert_eq!(before.last_sweep_at(), None);
    assert_eq!(before.observed_at(), clock.wall_time());

    commit(&store, "a", "x", None);
    commit(&store, "b", "x", None);
    clock.advance(TTL);
    store.sweep_now();

    let after = store.statistics();
    assert_eq!(after.cache_size(), 0);
    assert_eq!(after.last_sweep_evicted(), Some(2));
    assert_eq!(after.last_sweep_at(), Some(clock.wall_time()));
    assert_eq!(after.entries_created(), 2);
    assert_eq!(after.evictions(), 2);
    // earlier snapshots are unaffected
    assert_eq!(before.last_sweep_evicted(), None);
}
