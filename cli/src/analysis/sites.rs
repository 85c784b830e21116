//! "Where used": distinct acquisition call sites per lock, plus which
//! threads each lock was seen in.

use std::collections::{BTreeMap, BTreeSet};

use locktrace_protocol::{TraceRecord, call_stack_hash};

/// Per lock, one example record index per distinct call-stack hash, in
/// first-seen order. Successful acquires only.
pub fn where_used(records: &[TraceRecord]) -> BTreeMap<u64, Vec<(u64, usize)>> {
    let mut out: BTreeMap<u64, Vec<(u64, usize)>> = BTreeMap::new();

    for (i, rec) in records.iter().enumerate() {
        if rec.rc != 0 {
            continue;
        }
        if !rec.lock_action().is_some_and(|a| a.is_acquire()) {
            continue;
        }
        let hash = call_stack_hash(&rec.caller);
        let sites = out.entry(rec.lock).or_default();
        if !sites.iter().any(|&(h, _)| h == hash) {
            sites.push((hash, i));
        }
    }

    out
}

/// Per lock, the "tid (name)" labels of every thread that touched it with a
/// successful acquire or release.
pub fn threads_seen(records: &[TraceRecord]) -> BTreeMap<u64, BTreeSet<String>> {
    let mut out: BTreeMap<u64, BTreeSet<String>> = BTreeMap::new();

    for rec in records {
        if rec.rc != 0 {
            continue;
        }
        let touching = rec
            .lock_action()
            .is_some_and(|a| a.is_acquire() || a.is_release());
        if touching {
            out.entry(rec.lock)
                .or_default()
                .insert(format!("{} ({})", rec.tid, rec.thread_name_str()));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::testutil::rec;
    use locktrace_protocol::LockAction;

    #[test]
    fn one_entry_per_distinct_site() {
        let mut a = rec(LockAction::MutexLock, 0x1, 1, 0);
        a.caller = [0xaa, 0, 0, 0, 0, 0, 0, 0];
        let mut b = a;
        b.caller = [0xbb, 0, 0, 0, 0, 0, 0, 0];
        let records = vec![a, b, a, b, a];

        let used = where_used(&records);
        let sites = &used[&0x1];
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0].1, 0);
        assert_eq!(sites[1].1, 1);
    }

    #[test]
    fn failed_and_non_acquire_events_do_not_create_sites() {
        let records = vec![
            rec(LockAction::MutexLock, 0x1, 1, 16),
            rec(LockAction::MutexUnlock, 0x1, 1, 0),
            rec(LockAction::MutexInit, 0x1, 1, 0),
        ];
        assert!(where_used(&records).is_empty());
    }

    #[test]
    fn hash_ignores_fields_outside_the_caller_array() {
        let mut a = rec(LockAction::MutexLock, 0x1, 1, 0);
        a.caller = [0xaa, 0xbb, 0, 0, 0, 0, 0, 0];
        let mut b = rec(LockAction::MutexLock, 0x1, 99, 0);
        b.caller = a.caller;
        b.timestamp = 123_456;

        let used = where_used(&[a, b]);
        assert_eq!(used[&0x1].len(), 1);
    }

    #[test]
    fn threads_are_labelled_with_their_names() {
        let mut a = rec(LockAction::MutexLock, 0x1, 7, 0);
        a.thread_name[..4].copy_from_slice(b"pool");
        let b = rec(LockAction::MutexUnlock, 0x1, 8, 0);
        let seen = threads_seen(&[a, b]);
        let labels = &seen[&0x1];
        assert!(labels.contains("7 (pool)"));
        assert!(labels.contains("8 ()"));
    }
}
