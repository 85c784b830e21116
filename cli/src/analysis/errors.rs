//! Failed-call listing: every record whose `rc` is non-zero, grouped by
//! error code, with one representative per distinct call site.

use std::collections::BTreeMap;

use locktrace_protocol::{TraceRecord, call_stack_hash};

#[derive(Debug, Default, Clone)]
pub struct ErrorGroup {
    /// Indices of all failed records with this error code, in stream order.
    pub indices: Vec<usize>,
    /// One representative index per distinct call-stack hash (first seen).
    pub sites: Vec<(u64, usize)>,
}

/// Error code -> failed calls. Failed calls never reach the state machines,
/// so this pass is their only surface.
pub fn list_call_errors(records: &[TraceRecord]) -> BTreeMap<i32, ErrorGroup> {
    let mut out: BTreeMap<i32, ErrorGroup> = BTreeMap::new();

    for (i, rec) in records.iter().enumerate() {
        if rec.rc == 0 {
            continue;
        }
        let group = out.entry(rec.rc).or_default();
        group.indices.push(i);

        let hash = call_stack_hash(&rec.caller);
        if !group.sites.iter().any(|&(h, _)| h == hash) {
            group.sites.push((hash, i));
        }
    }

    out
}

/// Human-readable error-code text, e.g. "Device or resource busy".
pub fn errno_string(rc: i32) -> String {
    std::io::Error::from_raw_os_error(rc).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::testutil::rec;
    use locktrace_protocol::LockAction;

    const EBUSY: i32 = 16;
    const EDEADLK: i32 = 35;

    #[test]
    fn failed_calls_group_by_error_code() {
        // Scenario E: the failed acquire appears here and nowhere else.
        let records = vec![
            rec(LockAction::MutexLock, 0x1, 1, EBUSY),
            rec(LockAction::MutexLock, 0x1, 1, 0),
            rec(LockAction::MutexLock, 0x2, 2, EDEADLK),
            rec(LockAction::MutexLock, 0x3, 1, EBUSY),
        ];

        let errors = list_call_errors(&records);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[&EBUSY].indices, vec![0, 3]);
        assert_eq!(errors[&EDEADLK].indices, vec![2]);
    }

    #[test]
    fn one_representative_per_call_site() {
        let mut a = rec(LockAction::MutexLock, 0x1, 1, EBUSY);
        a.caller = [0xaa, 0, 0, 0, 0, 0, 0, 0];
        let mut b = a;
        b.caller = [0xbb, 0, 0, 0, 0, 0, 0, 0];
        let records = vec![a, a, b];

        let errors = list_call_errors(&records);
        let group = &errors[&EBUSY];
        assert_eq!(group.indices.len(), 3);
        assert_eq!(group.sites.len(), 2);
        assert_eq!(group.sites[0].1, 0);
        assert_eq!(group.sites[1].1, 2);
    }

    #[test]
    fn errno_text_is_nonempty() {
        assert!(!errno_string(EBUSY).is_empty());
    }
}
