//! The metadata sidecar written once at target-process exit.
//!
//! A single JSON object (`dump.dat.<pid>`) naming the event files and
//! recording process-level context. The analyzer refuses to run without it.

use serde::{Deserialize, Serialize};

/// Scheduling class of the traced process, as reported by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scheduler {
    #[serde(rename = "sched-other")]
    Other,
    #[serde(rename = "sched-batch")]
    Batch,
    #[serde(rename = "sched-idle")]
    Idle,
    #[serde(rename = "sched-fifo")]
    Fifo,
    #[serde(rename = "sched-rr")]
    RoundRobin,
    #[serde(rename = "unknown")]
    Unknown,
}

impl std::fmt::Display for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Other => "sched-other",
            Self::Batch => "sched-batch",
            Self::Idle => "sched-idle",
            Self::Fifo => "sched-fifo",
            Self::RoundRobin => "sched-rr",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Process-level metadata and file pointers for one trace run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sidecar {
    pub hostname: String,
    pub exe_name: String,
    pub pid: u32,
    pub scheduler: Scheduler,
    pub n_procs: u32,
    /// Set when `fork` was observed; parent and child then share the same
    /// mapping and ticket counter.
    pub fork_warning: bool,
    /// Tracer clock at interposer init, ns.
    pub start_ts: u64,
    /// Tracer clock at exit, ns.
    pub end_ts: u64,
    /// Path of the main event file.
    pub measurements: String,
    /// Path of the usage-group trail, when that feature was built in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ug_measurements: Option<String>,
    /// Numeric mutex-kind values as observed on the build host; the analyzer
    /// must not hard-code them.
    pub mutex_type_normal: i32,
    pub mutex_type_recursive: i32,
    pub mutex_type_errorcheck: i32,
    pub mutex_type_adaptive: i32,
    /// Records actually present in the event file.
    pub n_records: u64,
    /// Buffer capacity; insertions past it were dropped.
    pub n_records_max: u64,
    /// Tickets handed out, possibly beyond capacity.
    pub n_records_recorded: u64,
    #[serde(default)]
    pub ug_n_records: u64,
    pub cnt_mutex_trylock: u64,
    pub cnt_rwlock_try_rdlock: u64,
    pub cnt_rwlock_try_timedrdlock: u64,
    pub cnt_rwlock_try_wrlock: u64,
    pub cnt_rwlock_try_timedwrlock: u64,
    /// In-process addresses of the interposed acquire entry points, used to
    /// recognize and drop wrapper frames from call-site listings.
    pub pthread_mutex_lock: u64,
    pub pthread_rwlock_rdlock: u64,
    pub pthread_rwlock_wrlock: u64,
}

impl Sidecar {
    /// Acquire attempts lost to buffer exhaustion.
    pub fn dropped_records(&self) -> u64 {
        self.n_records_recorded.saturating_sub(self.n_records_max)
    }

    /// Addresses of the interposed entry points, for frame filtering.
    pub fn wrapper_addresses(&self) -> [u64; 3] {
        [
            self.pthread_mutex_lock,
            self.pthread_rwlock_rdlock,
            self.pthread_rwlock_wrlock,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Sidecar {
        Sidecar {
            hostname: "buildbox".into(),
            exe_name: "/usr/bin/target".into(),
            pid: 4321,
            scheduler: Scheduler::Other,
            n_procs: 8,
            fork_warning: false,
            start_ts: 1_000,
            end_ts: 9_000,
            measurements: "measurements-4321.dat".into(),
            ug_measurements: Some("ug-measurements-4321.dat".into()),
            mutex_type_normal: 0,
            mutex_type_recursive: 1,
            mutex_type_errorcheck: 2,
            mutex_type_adaptive: 3,
            n_records: 100,
            n_records_max: 1024,
            n_records_recorded: 100,
            ug_n_records: 40,
            cnt_mutex_trylock: 2,
            cnt_rwlock_try_rdlock: 0,
            cnt_rwlock_try_timedrdlock: 0,
            cnt_rwlock_try_wrlock: 1,
            cnt_rwlock_try_timedwrlock: 0,
            pthread_mutex_lock: 0x1000,
            pthread_rwlock_rdlock: 0x2000,
            pthread_rwlock_wrlock: 0x3000,
        }
    }

    #[test]
    fn json_round_trip_preserves_every_key() {
        let sc = sample();
        let text = serde_json::to_string(&sc).unwrap();
        let back: Sidecar = serde_json::from_str(&text).unwrap();
        assert_eq!(back.pid, sc.pid);
        assert_eq!(back.scheduler, Scheduler::Other);
        assert_eq!(back.measurements, sc.measurements);
        assert_eq!(back.ug_measurements, sc.ug_measurements);
        assert_eq!(back.wrapper_addresses(), [0x1000, 0x2000, 0x3000]);
    }

    #[test]
    fn scheduler_serializes_to_kebab_names() {
        let text = serde_json::to_string(&Scheduler::RoundRobin).unwrap();
        assert_eq!(text, "\"sched-rr\"");
        let back: Scheduler = serde_json::from_str("\"sched-idle\"").unwrap();
        assert_eq!(back, Scheduler::Idle);
    }

    #[test]
    fn dropped_records_floor_at_zero() {
        let mut sc = sample();
        assert_eq!(sc.dropped_records(), 0);
        sc.n_records_recorded = 2048;
        assert_eq!(sc.dropped_records(), 1024);
    }

    #[test]
    fn missing_ug_keys_default() {
        let mut value: serde_json::Value = serde_json::to_value(sample()).unwrap();
        let obj = value.as_object_mut().unwrap();
        obj.remove("ug_measurements");
        obj.remove("ug_n_records");
        let back: Sidecar = serde_json::from_value(value).unwrap();
        assert_eq!(back.ug_measurements, None);
        assert_eq!(back.ug_n_records, 0);
    }
}
