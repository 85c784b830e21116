//! Lock co-occurrence: which locks tend to be held together.
//!
//! Acquire is +1 and release is -1 on a per-lock reference count, without
//! regard to thread or read/write side. After every step, every unordered
//! pair of currently-held locks is counted once. The update is O(h^2) per
//! event in the number of held locks, which is why this pass is opt-in.

use std::collections::{BTreeMap, HashMap};

use locktrace_protocol::TraceRecord;

/// Cap on emitted edges, for layout readability.
pub const MAX_EDGES: usize = 75;

#[derive(Debug, Default)]
pub struct Correlation {
    /// Unordered pair (smaller address first) -> co-held step count.
    pub pair_counts: BTreeMap<(u64, u64), u64>,
    /// Successful acquire events per lock.
    pub seen_counts: HashMap<u64, u64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub a: u64,
    pub b: u64,
    pub count: u64,
    /// pair_count / max(seen(a), seen(b)); unitless in [0, 1].
    pub closeness: f64,
}

pub fn co_occurrence(records: &[TraceRecord]) -> Correlation {
    let mut corr = Correlation::default();
    let mut holders: HashMap<u64, u64> = HashMap::new();

    for rec in records {
        if rec.rc != 0 {
            continue;
        }
        let Some(action) = rec.lock_action() else {
            continue;
        };

        if action.is_acquire() {
            *holders.entry(rec.lock).or_insert(0) += 1;
            *corr.seen_counts.entry(rec.lock).or_insert(0) += 1;
        } else if action.is_release() {
            if let Some(count) = holders.get_mut(&rec.lock) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    holders.remove(&rec.lock);
                }
            }
        } else {
            continue;
        }

        // Count pairs AFTER this step's update.
        let held: Vec<u64> = holders.keys().copied().collect();
        for (i, &a) in held.iter().enumerate() {
            for &b in &held[i + 1..] {
                let key = if a < b { (a, b) } else { (b, a) };
                *corr.pair_counts.entry(key).or_insert(0) += 1;
            }
        }
    }

    corr
}

impl Correlation {
    pub fn closeness(&self, a: u64, b: u64) -> f64 {
        let key = if a < b { (a, b) } else { (b, a) };
        let pair = self.pair_counts.get(&key).copied().unwrap_or(0);
        let denom = self
            .seen_counts
            .get(&a)
            .copied()
            .unwrap_or(0)
            .max(self.seen_counts.get(&b).copied().unwrap_or(0));
        if denom == 0 {
            0.0
        } else {
            pair as f64 / denom as f64
        }
    }

    /// Top edges by pair count, capped at `limit`.
    pub fn top_edges(&self, limit: usize) -> Vec<Edge> {
        let mut edges: Vec<Edge> = self
            .pair_counts
            .iter()
            .map(|(&(a, b), &count)| Edge {
                a,
                b,
                count,
                closeness: self.closeness(a, b),
            })
            .collect();
        edges.sort_by(|x, y| y.count.cmp(&x.count).then(x.a.cmp(&y.a)));
        edges.truncate(limit);
        edges
    }

    /// DOT description for the external layout engine. Edge colour encodes
    /// closeness normalized over the emitted edges.
    pub fn to_dot(&self, limit: usize) -> String {
        use std::fmt::Write;

        let edges = self.top_edges(limit);
        let max_closeness = edges
            .iter()
            .map(|e| e.closeness)
            .fold(0.0f64, f64::max)
            .max(f64::MIN_POSITIVE);

        let mut out = String::from("graph lock_correlation {\n");
        out.push_str("\tnode [shape=box, fontname=\"monospace\"];\n");
        for e in &edges {
            let saturation = e.closeness / max_closeness;
            let _ = writeln!(
                out,
                "\t\"{:#x}\" -- \"{:#x}\" [label=\"{} ({:.2})\", color=\"0.000 {:.3} 0.800\"];",
                e.a, e.b, e.count, e.closeness, saturation
            );
        }
        out.push_str("}\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::testutil::rec;
    use locktrace_protocol::LockAction;

    const L6: u64 = 0x6000;
    const L7: u64 = 0x7000;
    const T: i32 = 1;

    fn nested_round() -> Vec<TraceRecord> {
        vec![
            rec(LockAction::MutexLock, L6, T, 0),
            rec(LockAction::MutexLock, L7, T, 0),
            rec(LockAction::MutexUnlock, L7, T, 0),
            rec(LockAction::MutexUnlock, L6, T, 0),
        ]
    }

    #[test]
    fn nested_holds_count_pairs_and_closeness() {
        // Scenario F: two nested rounds.
        let mut records = nested_round();
        records.extend(nested_round());

        let corr = co_occurrence(&records);
        let pair = corr.pair_counts[&(L6, L7)];
        assert!(pair > 0);
        assert_eq!(pair, 2); // one co-held step per round
        assert_eq!(corr.seen_counts[&L6], 2);
        assert_eq!(corr.seen_counts[&L7], 2);
        assert_eq!(corr.closeness(L6, L7), 2.0 / 2.0);

        let edges = corr.top_edges(MAX_EDGES);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].count, 2);
    }

    #[test]
    fn disjoint_holds_never_pair() {
        let records = vec![
            rec(LockAction::MutexLock, L6, T, 0),
            rec(LockAction::MutexUnlock, L6, T, 0),
            rec(LockAction::MutexLock, L7, T, 0),
            rec(LockAction::MutexUnlock, L7, T, 0),
        ];

        let corr = co_occurrence(&records);
        assert!(corr.pair_counts.is_empty());
    }

    #[test]
    fn pair_key_is_unordered() {
        let records = vec![
            rec(LockAction::MutexLock, L7, T, 0), // larger address first
            rec(LockAction::MutexLock, L6, T, 0),
            rec(LockAction::MutexUnlock, L6, T, 0),
            rec(LockAction::MutexUnlock, L7, T, 0),
        ];

        let corr = co_occurrence(&records);
        assert_eq!(corr.pair_counts.len(), 1);
        assert!(corr.pair_counts.contains_key(&(L6, L7)));
    }

    #[test]
    fn edge_cap_truncates() {
        // Five locks all held together produce C(5,2) = 10 pairs.
        let mut records: Vec<TraceRecord> = (0..5u64)
            .map(|i| rec(LockAction::MutexLock, 0x100 + i, T, 0))
            .collect();
        records.extend((0..5u64).map(|i| rec(LockAction::MutexUnlock, 0x100 + i, T, 0)));

        let corr = co_occurrence(&records);
        assert_eq!(corr.pair_counts.len(), 10);
        assert_eq!(corr.top_edges(3).len(), 3);
    }

    #[test]
    fn dot_output_names_both_locks() {
        let mut records = nested_round();
        records.extend(nested_round());
        let corr = co_occurrence(&records);

        let dot = corr.to_dot(MAX_EDGES);
        assert!(dot.starts_with("graph lock_correlation {"));
        assert!(dot.contains("\"0x6000\" -- \"0x7000\""));
    }
}
