//! Mutex ownership state machines: misuse detection and still-locked-at-exit.

use std::collections::{BTreeMap, HashMap, HashSet};

use locktrace_protocol::{LockAction, TraceRecord};

use super::grouping::FirstPlusNext;

/// What went wrong with a lock/unlock sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MisuseKind {
    /// Acquire by a thread that already holds the lock.
    AlreadyLocked,
    /// Release of a lock nobody holds.
    NotLocked,
    /// Release by a thread that is not among the holders.
    NotOwner,
    /// init while the lock is held.
    InitWhileHeld,
    /// destroy while the lock is held.
    DestroyWhileHeld,
}

impl MisuseKind {
    pub fn describe(self) -> &'static str {
        match self {
            Self::AlreadyLocked => "already locked",
            Self::NotLocked => "not locked",
            Self::NotOwner => "not owner",
            Self::InitWhileHeld => "init while in use",
            Self::DestroyWhileHeld => "destroy while in use",
        }
    }
}

/// Misuse findings grouped per (lock, kind), each with first-plus-next
/// call-site grouping.
pub type MisuseReport = BTreeMap<(u64, MisuseKind), FirstPlusNext>;

fn put(report: &mut MisuseReport, records: &[TraceRecord], lock: u64, kind: MisuseKind, i: usize) {
    report
        .entry((lock, kind))
        .and_modify(|g| g.add(records, i))
        .or_insert_with(|| FirstPlusNext::new(records, i));
}

/// Detect double-lock, unlock-without-lock and unlock-by-non-owner.
///
/// State per live mutex is the set of holding thread ids: bounded by one for
/// well-behaved non-recursive mutexes, but kept as a set so recursive and
/// buggy histories are tracked uniformly. Events with a non-zero `rc` did
/// not take effect and never touch the state.
pub fn find_mutex_misuse(records: &[TraceRecord]) -> MisuseReport {
    let mut report = MisuseReport::new();
    let mut holders: HashMap<u64, HashSet<i32>> = HashMap::new();

    for (i, rec) in records.iter().enumerate() {
        if rec.rc != 0 {
            continue;
        }
        match rec.lock_action() {
            Some(LockAction::MutexLock) => match holders.get_mut(&rec.lock) {
                None => {
                    holders.insert(rec.lock, HashSet::from([rec.tid]));
                }
                Some(tids) => {
                    if tids.contains(&rec.tid) {
                        put(&mut report, records, rec.lock, MisuseKind::AlreadyLocked, i);
                    } else {
                        // Second holder; legitimate for recursive histories,
                        // tracked so the eventual unlocks pair up.
                        tids.insert(rec.tid);
                    }
                }
            },
            Some(LockAction::MutexUnlock) => match holders.get_mut(&rec.lock) {
                None => {
                    put(&mut report, records, rec.lock, MisuseKind::NotLocked, i);
                }
                Some(tids) => {
                    if tids.remove(&rec.tid) {
                        if tids.is_empty() {
                            holders.remove(&rec.lock);
                        }
                    } else {
                        put(&mut report, records, rec.lock, MisuseKind::NotOwner, i);
                    }
                }
            },
            Some(LockAction::MutexInit) => {
                if holders.get(&rec.lock).is_some_and(|t| !t.is_empty()) {
                    put(&mut report, records, rec.lock, MisuseKind::InitWhileHeld, i);
                }
            }
            Some(LockAction::MutexDestroy) => {
                if holders.get(&rec.lock).is_some_and(|t| !t.is_empty()) {
                    put(
                        &mut report,
                        records,
                        rec.lock,
                        MisuseKind::DestroyWhileHeld,
                        i,
                    );
                }
            }
            _ => {}
        }
    }

    report
}

/// Locks with a positive acquire-minus-release net count at stream end,
/// each with the indices of the acquisitions that raised the count.
pub fn find_still_locked_mutex(records: &[TraceRecord]) -> BTreeMap<u64, Vec<usize>> {
    find_still_locked(
        records,
        |a| a == LockAction::MutexLock,
        |a| a == LockAction::MutexUnlock,
    )
}

pub(super) fn find_still_locked(
    records: &[TraceRecord],
    is_acquire: impl Fn(LockAction) -> bool,
    is_release: impl Fn(LockAction) -> bool,
) -> BTreeMap<u64, Vec<usize>> {
    let mut counts: HashMap<u64, u64> = HashMap::new();
    let mut where_locked: BTreeMap<u64, Vec<usize>> = BTreeMap::new();

    for (i, rec) in records.iter().enumerate() {
        if rec.rc != 0 {
            continue;
        }
        let Some(action) = rec.lock_action() else {
            continue;
        };
        if is_acquire(action) {
            *counts.entry(rec.lock).or_insert(0) += 1;
            where_locked.entry(rec.lock).or_default().push(i);
        } else if is_release(action) {
            if let Some(count) = counts.get_mut(&rec.lock) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    counts.remove(&rec.lock);
                    where_locked.remove(&rec.lock);
                }
            }
        }
    }

    where_locked
}
