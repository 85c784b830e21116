//! Reader/writer-lock state machines, split by read vs write state.

use std::collections::{BTreeMap, HashMap, HashSet};

use locktrace_protocol::{LockAction, TraceRecord};

use super::grouping::FirstPlusNext;
use super::mutex::find_still_locked;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RwMisuseKind {
    /// Read acquire by a thread already holding a read lock. Flagged even
    /// for lock kinds that tolerate recursive read acquisition.
    ReadAlreadyLocked,
    /// Write acquire by a thread already holding the write lock.
    WriteAlreadyLocked,
    /// Unlock of a lock neither read- nor write-held.
    NotLocked,
    /// Unlock by a thread holding neither side.
    NotOwner,
    InitWhileHeld,
    DestroyWhileHeld,
}

impl RwMisuseKind {
    pub fn describe(self) -> &'static str {
        match self {
            Self::ReadAlreadyLocked => "read already locked",
            Self::WriteAlreadyLocked => "write already locked",
            Self::NotLocked => "not locked",
            Self::NotOwner => "not owner",
            Self::InitWhileHeld => "init while in use",
            Self::DestroyWhileHeld => "destroy while in use",
        }
    }
}

pub type RwMisuseReport = BTreeMap<(u64, RwMisuseKind), FirstPlusNext>;

#[derive(Default)]
struct RwState {
    readers: HashSet<i32>,
    writers: HashSet<i32>,
}

impl RwState {
    fn held(&self) -> bool {
        !self.readers.is_empty() || !self.writers.is_empty()
    }
}

fn put(
    report: &mut RwMisuseReport,
    records: &[TraceRecord],
    lock: u64,
    kind: RwMisuseKind,
    i: usize,
) {
    report
        .entry((lock, kind))
        .and_modify(|g| g.add(records, i))
        .or_insert_with(|| FirstPlusNext::new(records, i));
}

/// Detect rw-lock misuse. State per live lock is a pair of thread-id sets;
/// an unlock is attributed to the write side first, then the read side.
pub fn find_rwlock_misuse(records: &[TraceRecord]) -> RwMisuseReport {
    let mut report = RwMisuseReport::new();
    let mut state: HashMap<u64, RwState> = HashMap::new();

    for (i, rec) in records.iter().enumerate() {
        if rec.rc != 0 {
            continue;
        }
        match rec.lock_action() {
            Some(LockAction::RwReadLock) => {
                let s = state.entry(rec.lock).or_default();
                if !s.readers.insert(rec.tid) {
                    put(&mut report, records, rec.lock, RwMisuseKind::ReadAlreadyLocked, i);
                }
            }
            Some(LockAction::RwWriteLock) => {
                let s = state.entry(rec.lock).or_default();
                if !s.writers.insert(rec.tid) {
                    put(&mut report, records, rec.lock, RwMisuseKind::WriteAlreadyLocked, i);
                }
            }
            Some(LockAction::RwUnlock) => match state.get_mut(&rec.lock) {
                None => {
                    put(&mut report, records, rec.lock, RwMisuseKind::NotLocked, i);
                }
                Some(s) => {
                    // Write side first; short-circuit keeps a read hold
                    // intact when the thread held both.
                    if s.writers.remove(&rec.tid) || s.readers.remove(&rec.tid) {
                        if !s.held() {
                            state.remove(&rec.lock);
                        }
                    } else {
                        put(&mut report, records, rec.lock, RwMisuseKind::NotOwner, i);
                    }
                }
            },
            Some(LockAction::RwInit) => {
                if state.get(&rec.lock).is_some_and(RwState::held) {
                    put(&mut report, records, rec.lock, RwMisuseKind::InitWhileHeld, i);
                }
            }
            Some(LockAction::RwDestroy) => {
                if state.get(&rec.lock).is_some_and(RwState::held) {
                    put(&mut report, records, rec.lock, RwMisuseKind::DestroyWhileHeld, i);
                }
            }
            _ => {}
        }
    }

    report
}

/// Still-held rw-locks: both acquire flavours raise the hold count, the
/// unlock lowers it without distinguishing read from write.
pub fn find_still_locked_rwlock(records: &[TraceRecord]) -> BTreeMap<u64, Vec<usize>> {
    find_still_locked(
        records,
        |a| a == LockAction::RwReadLock || a == LockAction::RwWriteLock,
        |a| a == LockAction::RwUnlock,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::testutil::rec;

    const L4: u64 = 0x4000;
    const T1: i32 = 10;
    const T2: i32 = 20;

    #[test]
    fn still_held_write_lock_is_reported_with_its_index() {
        // Scenario D: one write lock, then exit.
        let records = vec![rec(LockAction::RwWriteLock, L4, T1, 0)];

        let still = find_still_locked_rwlock(&records);
        assert_eq!(still[&L4], vec![0]);
        assert!(find_rwlock_misuse(&records).is_empty());
    }

    #[test]
    fn double_read_lock_same_thread_is_flagged() {
        let records = vec![
            rec(LockAction::RwReadLock, L4, T1, 0),
            rec(LockAction::RwReadLock, L4, T1, 0),
        ];

        let report = find_rwlock_misuse(&records);
        assert!(report.contains_key(&(L4, RwMisuseKind::ReadAlreadyLocked)));
    }

    #[test]
    fn concurrent_readers_are_fine() {
        let records = vec![
            rec(LockAction::RwReadLock, L4, T1, 0),
            rec(LockAction::RwReadLock, L4, T2, 0),
            rec(LockAction::RwUnlock, L4, T1, 0),
            rec(LockAction::RwUnlock, L4, T2, 0),
        ];

        assert!(find_rwlock_misuse(&records).is_empty());
        assert!(find_still_locked_rwlock(&records).is_empty());
    }

    #[test]
    fn unlock_never_seen_lock_is_not_locked_once() {
        let records = vec![rec(LockAction::RwUnlock, L4, T1, 0)];
        let report = find_rwlock_misuse(&records);
        assert_eq!(report.len(), 1);
        let group = &report[&(L4, RwMisuseKind::NotLocked)];
        assert_eq!(group.total(), 1);
    }

    #[test]
    fn unlock_by_stranger_is_not_owner() {
        let records = vec![
            rec(LockAction::RwWriteLock, L4, T1, 0),
            rec(LockAction::RwUnlock, L4, T2, 0),
        ];

        let report = find_rwlock_misuse(&records);
        assert!(report.contains_key(&(L4, RwMisuseKind::NotOwner)));
    }

    #[test]
    fn writer_then_reader_unlocks_attribute_write_side_first() {
        // T1 holds read and write (buggy but trackable): the first unlock
        // releases the write side, the second the read side.
        let records = vec![
            rec(LockAction::RwReadLock, L4, T1, 0),
            rec(LockAction::RwWriteLock, L4, T1, 0),
            rec(LockAction::RwUnlock, L4, T1, 0),
            rec(LockAction::RwUnlock, L4, T1, 0),
        ];

        assert!(find_rwlock_misuse(&records).is_empty());
        assert!(find_still_locked_rwlock(&records).is_empty());
    }

    #[test]
    fn read_and_write_acquires_balance_against_unlocks() {
        // Invariant: successful acquires = successful unlocks + still-held.
        let records = vec![
            rec(LockAction::RwReadLock, L4, T1, 0),
            rec(LockAction::RwWriteLock, 0x5000, T2, 0),
            rec(LockAction::RwUnlock, L4, T1, 0),
        ];

        let still = find_still_locked_rwlock(&records);
        let acquires = 2;
        let unlocks = 1;
        let still_held: usize = still.values().map(|v| v.len()).sum();
        assert_eq!(acquires, unlocks + still_held);
    }

    #[test]
    fn failed_rw_acquire_is_ignored() {
        let records = vec![rec(LockAction::RwWriteLock, L4, T1, 16)];
        assert!(find_rwlock_misuse(&records).is_empty());
        assert!(find_still_locked_rwlock(&records).is_empty());
    }
}
