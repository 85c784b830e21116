//! Acquisition-time and hold-time statistics.
//!
//! One pass, constant memory per live lock. Acquisition time is the `took`
//! field of successful acquires; hold time is derived by pairing acquires
//! with releases. Pairing anomalies (an unlock with no tracked acquire) are
//! skipped here: the misuse pass is the authoritative surface for them.

use std::collections::{BTreeMap, HashMap};

use locktrace_protocol::{LockAction, TraceRecord};

/// Streaming aggregate: count, sum, sum of squares, max.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Aggregate {
    pub n: u64,
    pub sum: f64,
    pub sum_sq: f64,
    pub max: u64,
}

impl Aggregate {
    pub fn add(&mut self, v: u64) {
        self.n += 1;
        self.sum += v as f64;
        self.sum_sq += (v as f64) * (v as f64);
        self.max = self.max.max(v);
    }

    pub fn mean(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.sum / self.n as f64
        }
    }

    pub fn stddev(&self) -> f64 {
        if self.n == 0 {
            return 0.0;
        }
        let mean = self.mean();
        (self.sum_sq / self.n as f64 - mean * mean).max(0.0).sqrt()
    }
}

/// The three duration categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Mutex,
    RwRead,
    RwWrite,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Mutex, Category::RwRead, Category::RwWrite];

    pub fn label(self) -> &'static str {
        match self {
            Self::Mutex => "mutex",
            Self::RwRead => "rw-read",
            Self::RwWrite => "rw-write",
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Mutex => 0,
            Self::RwRead => 1,
            Self::RwWrite => 2,
        }
    }
}

/// Per-lock aggregates plus a contention estimate.
#[derive(Debug, Default, Clone)]
pub struct LockDurations {
    pub acquire: Aggregate,
    pub hold: Aggregate,
    /// Successful acquires.
    pub acquires: u64,
    /// Acquires that found the lock already held.
    pub contended: u64,
}

#[derive(Debug, Default)]
pub struct DurationStats {
    acquire: [Aggregate; 3],
    hold: [Aggregate; 3],
    pub per_lock: BTreeMap<u64, LockDurations>,
}

impl DurationStats {
    pub fn acquire(&self, cat: Category) -> &Aggregate {
        &self.acquire[cat.index()]
    }

    pub fn hold(&self, cat: Category) -> &Aggregate {
        &self.hold[cat.index()]
    }
}

/// Pending hold-time state for one rw-lock: independent read and write
/// acquisition timestamps. Per-reader timestamps are deliberately not kept;
/// the release picks the write side when the releasing thread is the
/// current writer, else the read side.
#[derive(Default)]
struct RwHold {
    read_ts: u64,
    write_ts: u64,
}

pub fn duration_stats(records: &[TraceRecord]) -> DurationStats {
    let mut stats = DurationStats::default();
    // Mutex pairing is keyed by (lock, tid) so a non-owner unlock orphans
    // the stored timestamp instead of producing a bogus pair.
    let mut mutex_pending: HashMap<(u64, i32), u64> = HashMap::new();
    let mut rw_pending: HashMap<u64, RwHold> = HashMap::new();
    // Concurrent-hold counts for the contention estimate.
    let mut held: HashMap<u64, u64> = HashMap::new();

    for rec in records {
        if rec.rc != 0 {
            continue;
        }
        let Some(action) = rec.lock_action() else {
            continue;
        };

        match action {
            LockAction::MutexLock => {
                stats.note_acquire(Category::Mutex, rec, &mut held);
                mutex_pending.insert((rec.lock, rec.tid), rec.timestamp);
            }
            LockAction::MutexUnlock => {
                if let Some(acquired) = mutex_pending.remove(&(rec.lock, rec.tid)) {
                    let dur = rec.timestamp.saturating_sub(acquired);
                    stats.hold[Category::Mutex.index()].add(dur);
                    stats.per_lock.entry(rec.lock).or_default().hold.add(dur);
                }
                stats.note_release(rec.lock, &mut held);
            }
            LockAction::RwReadLock => {
                stats.note_acquire(Category::RwRead, rec, &mut held);
                rw_pending.entry(rec.lock).or_default().read_ts = rec.timestamp;
            }
            LockAction::RwWriteLock => {
                stats.note_acquire(Category::RwWrite, rec, &mut held);
                rw_pending.entry(rec.lock).or_default().write_ts = rec.timestamp;
            }
            LockAction::RwUnlock => {
                if let Some(pending) = rw_pending.get_mut(&rec.lock) {
                    let is_writer = rec
                        .rwlock_innards()
                        .is_some_and(|inn| inn.cur_writer == rec.tid);
                    if is_writer && pending.write_ts > 0 {
                        let dur = rec.timestamp.saturating_sub(pending.write_ts);
                        pending.write_ts = 0;
                        stats.hold[Category::RwWrite.index()].add(dur);
                        stats.per_lock.entry(rec.lock).or_default().hold.add(dur);
                    } else if pending.read_ts > 0 {
                        let dur = rec.timestamp.saturating_sub(pending.read_ts);
                        pending.read_ts = 0;
                        stats.hold[Category::RwRead.index()].add(dur);
                        stats.per_lock.entry(rec.lock).or_default().hold.add(dur);
                    }
                }
                stats.note_release(rec.lock, &mut held);
            }
            _ => {}
        }
    }

    stats
}

impl DurationStats {
    fn note_acquire(&mut self, cat: Category, rec: &TraceRecord, held: &mut HashMap<u64, u64>) {
        self.acquire[cat.index()].add(rec.took);

        let per = self.per_lock.entry(rec.lock).or_default();
        per.acquire.add(rec.took);
        per.acquires += 1;

        let count = held.entry(rec.lock).or_insert(0);
        if *count > 0 {
            per.contended += 1;
        }
        *count += 1;
    }

    fn note_release(&mut self, lock: u64, held: &mut HashMap<u64, u64>) {
        if let Some(count) = held.get_mut(&lock) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                held.remove(&lock);
            }
        }
    }
}
