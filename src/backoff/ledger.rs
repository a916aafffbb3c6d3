//! # Backoff Ledger
//!
//! Per-class error counters with an implicit idle reset.
//!
//! The ledger owns one [`CounterRecord`] per [`ErrorClass`]. Each record lives
//! behind its own mutex; the surrounding map lock is only taken to look up or
//! insert a slot, so errors of unrelated classes never wait on each other.
//! Locks are never held beyond a single [`BackoffLedger::record`] call.

use crate::backoff::classifier::ErrorClass;
use crate::backoff::error::BackoffFault;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Snapshot of a class's error history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterRecord {
    pub class: ErrorClass,
    /// Errors seen in the current window (0 only for a slot that was never recorded)
    pub count: u32,
    pub window_start: Instant,
    pub last_seen: Instant,
}

impl CounterRecord {
    fn empty(class: ErrorClass, now: Instant) -> Self {
        Self {
            class,
            count: 0,
            window_start: now,
            last_seen: now,
        }
    }

    /// Time since the last error, zero if `now` is before it
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }
}

type Slot = Arc<Mutex<CounterRecord>>;

/// Owned map from error class to its counter record
#[derive(Debug)]
pub struct BackoffLedger {
    reset_window: Duration,
    slots: RwLock<HashMap<ErrorClass, Slot>>,
}

impl BackoffLedger {
    #[must_use]
    pub fn new(reset_window: Duration) -> Self {
        Self {
            reset_window,
            slots: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn reset_window(&self) -> Duration {
        self.reset_window
    }

    /// Record one error of `class` at the current monotonic time
    ///
    /// The clock is read while the class lock is held, so concurrent callers
    /// are stamped in the same order they update the counter.
    pub fn record(&self, class: &ErrorClass) -> Result<CounterRecord, BackoffFault> {
        self.record_with(class, Instant::now)
    }

    /// Record one error of `class` at an explicit instant
    ///
    /// An instant earlier than the class's `last_seen` is reported as
    /// [`BackoffFault::ClockSkew`] and leaves the record untouched.
    pub fn record_at(
        &self,
        class: &ErrorClass,
        now: Instant,
    ) -> Result<CounterRecord, BackoffFault> {
        self.record_with(class, || now)
    }

    fn record_with(
        &self,
        class: &ErrorClass,
        clock: impl FnOnce() -> Instant,
    ) -> Result<CounterRecord, BackoffFault> {
        let slot = self.slot(class)?;
        let mut record = lock_slot(&slot, class)?;
        let now = clock();

        if record.count == 0 {
            record.count = 1;
            record.window_start = now;
        } else {
            let Some(gap) = now.checked_duration_since(record.last_seen) else {
                return Err(BackoffFault::ClockSkew {
                    class: class.to_string(),
                    behind: record.last_seen.duration_since(now),
                });
            };
            if gap > self.reset_window {
                debug!(class = %class, idle = ?gap, "error class idle, resetting window");
                record.count = 1;
                record.window_start = now;
            } else {
                record.count = record.count.saturating_add(1);
            }
        }
        record.last_seen = now;

        Ok(record.clone())
    }

    /// Current record for `class` without mutating it
    pub fn snapshot(&self, class: &ErrorClass) -> Option<CounterRecord> {
        let slots = self.slots.read().ok()?;
        let slot = slots.get(class)?;
        let record = slot.lock().ok()?;
        (record.count > 0).then(|| record.clone())
    }

    /// Records whose last error is within the reset window of `now`
    pub fn active_classes(&self, now: Instant) -> Vec<CounterRecord> {
        let Ok(slots) = self.slots.read() else {
            return Vec::new();
        };
        slots
            .values()
            .filter_map(|slot| slot.lock().ok().map(|r| r.clone()))
            .filter(|r| r.count > 0 && r.idle_for(now) <= self.reset_window)
            .collect()
    }

    /// Drop records idle beyond the reset window; returns how many were removed
    ///
    /// A slot still referenced by an in-flight `record` call is kept.
    pub fn purge_idle(&self, now: Instant) -> usize {
        let Ok(mut slots) = self.slots.write() else {
            warn!("backoff ledger map lock poisoned, skipping purge");
            return 0;
        };
        let before = slots.len();
        slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.lock() {
                Ok(record) => record.count > 0 && record.idle_for(now) <= self.reset_window,
                Err(_) => false,
            }
        });
        before - slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, class: &ErrorClass) -> Result<Slot, BackoffFault> {
        {
            let slots = self
                .slots
                .read()
                .map_err(|_poisoned| BackoffFault::Poisoned { scope: "map" })?;
            if let Some(slot) = slots.get(class) {
                return Ok(Arc::clone(slot));
            }
        }

        let mut slots = self
            .slots
            .write()
            .map_err(|_poisoned| BackoffFault::Poisoned { scope: "map" })?;
        let slot = slots.entry(class.clone()).or_insert_with(|| {
            Arc::new(Mutex::new(CounterRecord::empty(class.clone(), Instant::now())))
        });
        Ok(Arc::clone(slot))
    }
}

/// Poison the slot of `class` by panicking while its lock is held
#[cfg(test)]
pub(crate) fn poison_class(ledger: &BackoffLedger, class: &ErrorClass) {
    let slot = ledger.slot(class).unwrap();
    let _ = std::thread::spawn(move || {
        let _guard = slot.lock().unwrap();
        panic!("class lock holder panicked");
    })
    .join();
    assert!(ledger.slot(class).unwrap().is_poisoned());
}

/// Lock a class slot, resetting it if a previous holder panicked
fn lock_slot<'a>(
    slot: &'a Mutex<CounterRecord>,
    class: &ErrorClass,
) -> Result<MutexGuard<'a, CounterRecord>, BackoffFault> {
    match slot.lock() {
        Ok(guard) => Ok(guard),
        Err(poisoned) => {
            let mut guard = poisoned.into_inner();
            *guard = CounterRecord::empty(class.clone(), Instant::now());
            drop(guard);
            slot.clear_poison();
            Err(BackoffFault::Poisoned { scope: "class" })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::error::ViolationKind;
    use std::collections::HashSet;

    const WINDOW: Duration = Duration::from_secs(3);

    fn class(ns: &str) -> ErrorClass {
        ErrorClass::new(ns, ViolationKind::MissingShardKey)
    }

    #[test]
    fn test_first_record_starts_window() {
        let ledger = BackoffLedger::new(WINDOW);
        let t0 = Instant::now();
        let record = ledger.record_at(&class("foo.bar"), t0).unwrap();
        assert_eq!(record.count, 1);
        assert_eq!(record.window_start, t0);
        assert_eq!(record.last_seen, t0);
    }

    #[test]
    fn test_consecutive_records_increment() {
        let ledger = BackoffLedger::new(WINDOW);
        let c = class("foo.bar");
        let t0 = Instant::now();
        for i in 1..=5u32 {
            let now = t0 + Duration::from_millis(u64::from(i) * 100);
            let record = ledger.record_at(&c, now).unwrap();
            assert_eq!(record.count, i);
            assert_eq!(record.last_seen, now);
            assert!(record.last_seen >= record.window_start);
        }
    }

    #[test]
    fn test_reset_after_idle_window() {
        let ledger = BackoffLedger::new(WINDOW);
        let c = class("foo.bar");
        let t0 = Instant::now();
        ledger.record_at(&c, t0).unwrap();
        ledger.record_at(&c, t0 + Duration::from_secs(1)).unwrap();

        // Exactly at the window boundary is not yet idle
        let at_edge = ledger.record_at(&c, t0 + Duration::from_secs(4)).unwrap();
        assert_eq!(at_edge.count, 3);

        let later = t0 + Duration::from_secs(4) + WINDOW + Duration::from_millis(1);
        let reset = ledger.record_at(&c, later).unwrap();
        assert_eq!(reset.count, 1);
        assert_eq!(reset.window_start, later);
    }

    #[test]
    fn test_clock_skew_is_fault_and_leaves_record() {
        let ledger = BackoffLedger::new(WINDOW);
        let c = class("foo.bar");
        let t0 = Instant::now() + Duration::from_secs(10);
        ledger.record_at(&c, t0).unwrap();

        let err = ledger
            .record_at(&c, t0 - Duration::from_millis(250))
            .unwrap_err();
        assert_eq!(
            err,
            BackoffFault::ClockSkew {
                class: c.to_string(),
                behind: Duration::from_millis(250),
            }
        );
        let snapshot = ledger.snapshot(&c).unwrap();
        assert_eq!(snapshot.count, 1);
        assert_eq!(snapshot.last_seen, t0);
    }

    #[test]
    fn test_classes_are_independent() {
        let ledger = BackoffLedger::new(WINDOW);
        let a = class("foo.a");
        let b = class("foo.b");
        let t0 = Instant::now();
        for _ in 0..10 {
            ledger.record_at(&a, t0).unwrap();
        }
        assert_eq!(ledger.record_at(&b, t0).unwrap().count, 1);
        assert_eq!(ledger.snapshot(&a).unwrap().count, 10);
    }

    #[test]
    fn test_snapshot_does_not_mutate() {
        let ledger = BackoffLedger::new(WINDOW);
        let c = class("foo.bar");
        assert!(ledger.snapshot(&c).is_none());
        ledger.record(&c).unwrap();
        assert_eq!(ledger.snapshot(&c).unwrap().count, 1);
        assert_eq!(ledger.snapshot(&c).unwrap().count, 1);
    }

    #[test]
    fn test_active_classes_and_purge() {
        let ledger = BackoffLedger::new(WINDOW);
        let t0 = Instant::now();
        ledger.record_at(&class("old.coll"), t0).unwrap();
        ledger
            .record_at(&class("new.coll"), t0 + Duration::from_secs(5))
            .unwrap();

        let now = t0 + Duration::from_secs(6);
        let active = ledger.active_classes(now);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].class, class("new.coll"));

        assert_eq!(ledger.purge_idle(now), 1);
        assert_eq!(ledger.len(), 1);
        assert!(ledger.snapshot(&class("old.coll")).is_none());

        // A purged class starts over exactly like an idle one would have
        assert_eq!(ledger.record_at(&class("old.coll"), now).unwrap().count, 1);
    }

    #[test]
    fn test_concurrent_records_are_unique_and_complete() {
        let ledger = BackoffLedger::new(WINDOW);
        let c = class("foo.bar");
        let threads: usize = 16;
        let per_thread = 50;

        let (ledger, c) = (&ledger, &c);
        let counts: Vec<u32> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    s.spawn(move || {
                        (0..per_thread)
                            .map(|_| ledger.record(c).unwrap().count)
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        let total = threads * per_thread;
        let unique: HashSet<u32> = counts.iter().copied().collect();
        assert_eq!(counts.len(), total);
        assert_eq!(unique.len(), total, "two callers observed the same count");
        assert_eq!(ledger.snapshot(c).unwrap().count, u32::try_from(total).unwrap());
    }

    #[test]
    fn test_poisoned_slot_is_reported_then_restarts() {
        let ledger = BackoffLedger::new(WINDOW);
        let c = class("foo.bar");
        for _ in 0..5 {
            ledger.record(&c).unwrap();
        }

        poison_class(&ledger, &c);

        assert_eq!(ledger.record(&c), Err(BackoffFault::Poisoned { scope: "class" }));
        assert_eq!(ledger.record(&c).unwrap().count, 1);
        assert_eq!(ledger.len(), 1);
    }
}
