//! Reclaimer
//!
//! Periodically scans a store and evicts entries that are expired and
//! unlocked, or whose lock has been held past the abandonment ceiling.
//!
//! A sweep:
//!
//! 1. snapshots the key set,
//! 2. looks up each key and asks the entry [`is_expired_or_abandoned`],
//! 3. evicts it with a compare-and-remove on the entry's identity,
//! 4. publishes a [`SweepReport`] in place of the previous one.
//!
//! Nothing is locked between steps 2 and 3. A producer may acquire the entry in
//! that window; if the entry was replaced meanwhile, the identity check fails
//! and it survives. This race is accepted: closing it would mean holding an
//! entry lock while mutating the map.
//!
//! [`is_expired_or_abandoned`]: crate::CacheEntry::is_expired_or_abandoned

use crate::clock::Clock;
use crate::entry::CacheEntry;
use parking_lot::{Condvar, Mutex};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info};

/// Outcome of one sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Keys in the snapshot.
    pub scanned: usize,
    /// Entries actually removed (lost compare-and-remove races excluded).
    pub evicted: usize,
    /// Wall-clock completion time.
    pub finished_at: SystemTime,
    /// How long the sweep took, as measured by the store's clock.
    pub duration: Duration,
}

/// What a sweep needs from a store.
pub(crate) trait SweepTarget {
    fn keys(&self) -> Vec<String>;
    fn entry(&self, key: &str) -> Option<Arc<CacheEntry>>;
    fn evict(&self, key: &str, expected: &Arc<CacheEntry>) -> bool;
    fn clock(&self) -> &dyn Clock;
}

/// Sweep logic plus the last published report.
#[derive(Debug, Default)]
pub(crate) struct Reclaimer {
    last: Mutex<Option<SweepReport>>,
    sweeps: AtomicU64,
}

impl Reclaimer {
    pub(crate) fn sweep<T: SweepTarget + ?Sized>(&self, target: &T) -> SweepReport {
        let clock = target.clock();
        let started = clock.now();

        let keys = target.keys();
        let mut evicted = 0;
        for key in &keys {
            let Some(entry) = target.entry(key) else {
                continue;
            };
            if entry.is_expired_or_abandoned() && target.evict(key, &entry) {
                evicted += 1;
            }
        }

        let report = SweepReport {
            scanned: keys.len(),
            evicted,
            finished_at: clock.wall_time(),
            duration: clock.now().saturating_duration_since(started),
        };
        *self.last.lock() = Some(report.clone());
        self.sweeps.fetch_add(1, Ordering::Relaxed);

        info!(
            scanned = report.scanned,
            evicted = report.evicted,
            elapsed_ms = report.duration.as_millis() as u64,
            "fragment sweep finished"
        );
        report
    }

    pub(crate) fn last_report(&self) -> Option<SweepReport> {
        self.last.lock().clone()
    }

    pub(crate) fn sweeps(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Handle to the background reclaimer thread.
pub(crate) struct ReclaimerTask {
    interval: Duration,
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl ReclaimerTask {
    /// Starts a thread that calls `tick` every `interval` until stopped or
    /// until `tick` reports that its target is gone.
    pub(crate) fn spawn<F>(interval: Duration, mut tick: F) -> io::Result<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let signal = Arc::new(StopSignal::default());
        let thread_signal = Arc::clone(&signal);
        let handle = thread::Builder::new()
            .name("fragment-reclaimer".into())
            .spawn(move || loop {
                let deadline = Instant::now().checked_add(interval);
                {
                    let mut stopped = thread_signal.stopped.lock();
                    while !*stopped {
                        match deadline {
                            Some(deadline) => {
                                if thread_signal.wake.wait_until(&mut stopped, deadline).timed_out() {
                                    break;
                                }
                            }
                            None => thread_signal.wake.wait(&mut stopped),
                        }
                    }
                    if *stopped {
                        break;
                    }
                }
                if !tick() {
                    debug!("fragment store dropped; reclaimer exiting");
                    break;
                }
            })?;

        debug!(interval_ms = interval.as_millis() as u64, "reclaimer scheduled");
        Ok(Self {
            interval,
            signal,
            handle: Some(handle),
        })
    }

    pub(crate) fn interval(&self) -> Duration {
        self.interval
    }

    /// Signals the thread and waits for it to exit. Idempotent.
    pub(crate) fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        *self.signal.stopped.lock() = true;
        self.signal.wake.notify_all();
        if handle.thread().id() != thread::current().id() {
            let _ = handle.join();
        }
        debug!("reclaimer stopped");
    }
}

impl Drop for ReclaimerTask {
    fn drop(&mut self) {
        self.stop();
    }
}

impl core::fmt::Debug for ReclaimerTask {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReclaimerTask")
            .field("interval", &self.interval)
            .field("running", &self.handle.is_some())
            .finish()
    }
}
