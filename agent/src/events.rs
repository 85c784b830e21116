//! Event assembly and append.
//!
//! One function per record family; each takes a ticket from the event
//! buffer and writes a fully-populated record at the returned index. Calls
//! arriving before the tracer is initialized (constructor-ordering hazards)
//! warn once and are dropped; the delegated primitive is unaffected.

use locktrace_protocol::{
    KindSpecific, LockAction, MutexInnards, RwlockInnards, THREAD_NAME_LEN, TraceRecord,
};

use crate::{clock, diag, gettid, stack, tracer};

fn base_record(lock: u64, action: LockAction, took: u64, rc: i32) -> TraceRecord {
    let tid = gettid();
    let mut thread_name = [0u8; THREAD_NAME_LEN];
    if let Some(t) = tracer() {
        t.names.fill(tid, &mut thread_name);
    }
    TraceRecord {
        caller: stack::capture_caller(),
        lock,
        tid,
        action: action as u32,
        timestamp: clock::now_ns(),
        took,
        thread_name,
        kind_specific: KindSpecific::zeroed(),
        rc,
        _pad: 0,
    }
}

pub fn store_mutex(lock: u64, action: LockAction, took: u64, rc: i32, innards: MutexInnards) {
    let Some(t) = tracer() else {
        diag::warn_buffer_not_allocated();
        return;
    };
    let mut rec = base_record(lock, action, took, rc);
    rec.kind_specific = KindSpecific::from_mutex(innards);
    t.events.append(rec);
}

pub fn store_rwlock(lock: u64, action: LockAction, took: u64, rc: i32, innards: RwlockInnards) {
    let Some(t) = tracer() else {
        diag::warn_buffer_not_allocated();
        return;
    };
    let mut rec = base_record(lock, action, took, rc);
    rec.kind_specific = KindSpecific::from_rwlock(innards);
    t.events.append(rec);
}

pub fn store_thread_exit() {
    let Some(t) = tracer() else {
        diag::warn_buffer_not_allocated();
        return;
    };
    t.events.append(base_record(0, LockAction::ThreadExit, 0, 0));
}

/// Usage-group pre-log: intent-to-acquire, written before delegating.
#[cfg(feature = "usage-group")]
pub fn store_usage(lock: u64, action: LockAction) {
    use locktrace_protocol::UsageRecord;

    let Some(t) = tracer() else {
        return;
    };
    let tid = gettid();
    let mut thread_name = [0u8; THREAD_NAME_LEN];
    t.names.fill(tid, &mut thread_name);
    t.usage.append(UsageRecord {
        timestamp: clock::now_ns(),
        lock,
        tid,
        action: action as u32,
        thread_name,
        caller: stack::capture_single(),
    });
}

#[cfg(not(feature = "usage-group"))]
pub fn store_usage(_lock: u64, _action: LockAction) {}
