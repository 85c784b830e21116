//! The analysis passes.
//!
//! Every pass is a pure function over the event stream in insertion order,
//! sharing two rules: state machines key on the lock address, and events
//! with a non-zero `rc` never update state (the call did not take effect);
//! they surface only in the error-listing pass.

pub mod correlation;
pub mod durations;
pub mod errors;
pub mod grouping;
pub mod mutex;
pub mod rwlock;
pub mod sites;

use std::collections::{BTreeMap, BTreeSet};

use locktrace_protocol::TraceRecord;

/// Results of all passes over one trace.
pub struct Analysis {
    pub errors: BTreeMap<i32, errors::ErrorGroup>,
    pub mutex_misuse: mutex::MisuseReport,
    pub mutex_still_locked: BTreeMap<u64, Vec<usize>>,
    pub rwlock_misuse: rwlock::RwMisuseReport,
    pub rwlock_still_locked: BTreeMap<u64, Vec<usize>>,
    pub durations: durations::DurationStats,
    pub sites: BTreeMap<u64, Vec<(u64, usize)>>,
    pub threads_seen: BTreeMap<u64, BTreeSet<String>>,
    /// Present only when the (slow) co-occurrence pass was requested.
    pub correlation: Option<correlation::Correlation>,
}

impl Analysis {
    pub fn run(records: &[TraceRecord], with_correlation: bool) -> Self {
        Self {
            errors: errors::list_call_errors(records),
            mutex_misuse: mutex::find_mutex_misuse(records),
            mutex_still_locked: mutex::find_still_locked_mutex(records),
            rwlock_misuse: rwlock::find_rwlock_misuse(records),
            rwlock_still_locked: rwlock::find_still_locked_rwlock(records),
            durations: durations::duration_stats(records),
            sites: sites::where_used(records),
            threads_seen: sites::threads_seen(records),
            correlation: with_correlation.then(|| correlation::co_occurrence(records)),
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use locktrace_protocol::{
        CALLER_DEPTH, KindSpecific, LockAction, RwlockInnards, THREAD_NAME_LEN, TraceRecord,
    };

    /// A successful-or-failed record with a caller derived from the lock and
    /// tid, so distinct (lock, tid) pairs land at distinct sites by default.
    pub fn rec(action: LockAction, lock: u64, tid: i32, rc: i32) -> TraceRecord {
        let mut caller = [0u64; CALLER_DEPTH];
        caller[0] = 0x4000_0000 + lock + tid as u64;
        TraceRecord {
            caller,
            lock,
            tid,
            action: action as u32,
            timestamp: 0,
            took: 0,
            thread_name: [0; THREAD_NAME_LEN],
            kind_specific: KindSpecific::zeroed(),
            rc,
            _pad: 0,
        }
    }

    pub fn rec_at(action: LockAction, lock: u64, tid: i32, timestamp: u64) -> TraceRecord {
        let mut r = rec(action, lock, tid, 0);
        r.timestamp = timestamp;
        r
    }

    /// An RwUnlock whose captured innards name `tid` as the current writer,
    /// steering the hold-time pairing to the write side.
    pub fn rw_unlock_by_writer(lock: u64, tid: i32, timestamp: u64) -> TraceRecord {
        let mut r = rec_at(LockAction::RwUnlock, lock, tid, timestamp);
        r.kind_specific = KindSpecific::from_rwlock(RwlockInnards {
            readers: 0,
            writers: 1,
            cur_writer: tid,
        });
        r
    }
}
