//! First-plus-next grouping of repeated findings.
//!
//! The first occurrence of a finding keeps its full context; every later
//! occurrence is deduplicated by call-stack hash into a counted list with
//! one representative record index per site. The asymmetry is deliberate:
//! the first record is the earliest context, the rest is volume.

use locktrace_protocol::{TraceRecord, call_stack_hash};

/// Accumulated later occurrences sharing one call-stack hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteCount {
    pub hash: u64,
    pub count: u64,
    /// Index of the latest record seen for this site.
    pub representative: usize,
}

#[derive(Debug, Clone)]
pub struct FirstPlusNext {
    /// Record index of the first occurrence.
    pub first: usize,
    pub first_hash: u64,
    /// Later occurrences, one entry per distinct call-stack hash.
    pub latest: Vec<SiteCount>,
}

impl FirstPlusNext {
    pub fn new(records: &[TraceRecord], index: usize) -> Self {
        Self {
            first: index,
            first_hash: call_stack_hash(&records[index].caller),
            latest: Vec::new(),
        }
    }

    pub fn add(&mut self, records: &[TraceRecord], index: usize) {
        let hash = call_stack_hash(&records[index].caller);
        match self.latest.iter_mut().find(|s| s.hash == hash) {
            Some(site) => {
                site.count += 1;
                site.representative = index;
            }
            None => self.latest.push(SiteCount {
                hash,
                count: 1,
                representative: index,
            }),
        }
    }

    /// Total occurrences including the first.
    pub fn total(&self) -> u64 {
        1 + self.latest.iter().map(|s| s.count).sum::<u64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::testutil::rec;
    use locktrace_protocol::LockAction;

    #[test]
    fn first_keeps_full_context_and_later_same_site_accumulates() {
        let mut a = rec(LockAction::MutexUnlock, 0x1, 1, 0);
        a.caller = [0xaa, 0xbb, 0, 0, 0, 0, 0, 0];
        let records = vec![a, a, a];

        let mut group = FirstPlusNext::new(&records, 0);
        group.add(&records, 1);
        group.add(&records, 2);

        assert_eq!(group.first, 0);
        assert_eq!(group.latest.len(), 1);
        assert_eq!(group.latest[0].count, 2);
        assert_eq!(group.latest[0].representative, 2);
        assert_eq!(group.total(), 3);
    }

    #[test]
    fn distinct_sites_get_distinct_entries() {
        let mut a = rec(LockAction::MutexUnlock, 0x1, 1, 0);
        a.caller = [0xaa, 0, 0, 0, 0, 0, 0, 0];
        let mut b = a;
        b.caller = [0xbb, 0, 0, 0, 0, 0, 0, 0];
        let records = vec![a, b, b];

        let mut group = FirstPlusNext::new(&records, 0);
        group.add(&records, 1);
        group.add(&records, 2);

        assert_eq!(group.latest.len(), 1);
        assert_eq!(group.latest[0].count, 2);

        let mut again = FirstPlusNext::new(&records, 1);
        again.add(&records, 0);
        assert_eq!(again.latest.len(), 1);
        assert_ne!(again.first_hash, again.latest[0].hash);
    }
}
