//! The exit path: seal, flush, write the sidecar, tear down.
//!
//! Reached from the interposed `exit`, from the atexit handler when main
//! returns, from the ELF destructor, or from the optional SIGTERM handler.
//! Idempotent; whichever path gets there first wins.

use std::sync::atomic::{AtomicBool, Ordering};

use locktrace_protocol::{Scheduler, Sidecar};

use crate::{
    CNT_MUTEX_TRYLOCK, CNT_RWLOCK_TRY_RDLOCK, CNT_RWLOCK_TRY_TIMEDRDLOCK, CNT_RWLOCK_TRY_WRLOCK,
    CNT_RWLOCK_TRY_TIMEDWRLOCK, FORK_WARNING, Tracer, clock, diag, hooks, innards, real, tracer,
};

static FINISHED: AtomicBool = AtomicBool::new(false);

/// Run the full exit sequence once: stop writers, flush, write the sidecar,
/// drop the name table. Flush failures are best-effort: report and continue.
pub fn finish() {
    if FINISHED.swap(true, Ordering::SeqCst) {
        return;
    }
    let Some(t) = tracer() else {
        return;
    };

    let end_ts = clock::now_ns();

    // Stop new writers first; in-flight appends may still land in a valid
    // slot but are not counted.
    let tickets = t.events.seal();
    let n_records = t.events.inserted(tickets);

    diag::red(&format!(
        "locktrace terminating with {tickets} records ({})",
        t.event_path
    ));

    if let Err(e) = t.events.flush() {
        diag::red(&format!("problem pushing event data to disk: {e}"));
    }

    #[cfg(feature = "usage-group")]
    let ug_n_records = {
        let ug_tickets = t.usage.seal();
        if let Err(e) = t.usage.flush() {
            diag::red(&format!("problem pushing usage-group data to disk: {e}"));
        }
        t.usage.inserted(ug_tickets)
    };
    #[cfg(not(feature = "usage-group"))]
    let ug_n_records = 0;

    let sidecar = build_sidecar(t, end_ts, tickets, n_records, ug_n_records);
    let sidecar_path = format!("dump.dat.{}", std::process::id());
    match serde_json::to_string(&sidecar) {
        Ok(mut json) => {
            json.push('\n');
            if let Err(e) = std::fs::write(&sidecar_path, json) {
                diag::red(&format!("cannot write sidecar {sidecar_path}: {e}"));
            } else {
                diag::red(&format!("trace sidecar (load with '-t'): {sidecar_path}"));
            }
        }
        Err(e) => diag::red(&format!("cannot serialize sidecar: {e}")),
    }

    t.names.clear();
}

/// Registered with `libc::atexit` at init; catches main returning, where
/// libc reaches its internal exit without going through the PLT.
pub extern "C" fn atexit_handler() {
    finish();
}

extern "C" fn sigterm_handler(sig: libc::c_int) {
    finish();
    // SAFETY: re-raising with the default disposition restores the signal's
    // normal termination behavior.
    unsafe {
        libc::signal(sig, libc::SIG_DFL);
        libc::raise(sig);
    }
}

pub fn install_sigterm_handler() {
    // SAFETY: handler is an extern "C" fn of the required shape.
    unsafe {
        libc::signal(
            libc::SIGTERM,
            sigterm_handler as extern "C" fn(libc::c_int) as usize,
        );
    }
}

fn build_sidecar(
    t: &Tracer,
    end_ts: u64,
    tickets: u64,
    n_records: u64,
    ug_n_records: u64,
) -> Sidecar {
    let pid = std::process::id();
    let (normal, recursive, errorcheck, adaptive) = innards::mutex_kind_values();

    Sidecar {
        hostname: hostname(),
        exe_name: std::fs::read_link("/proc/self/exe")
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default(),
        pid,
        scheduler: scheduler(pid),
        n_procs: n_procs(),
        fork_warning: FORK_WARNING.load(Ordering::Relaxed),
        start_ts: t.start_ts,
        end_ts,
        measurements: t.event_path.clone(),
        #[cfg(feature = "usage-group")]
        ug_measurements: Some(t.usage_path.clone()),
        #[cfg(not(feature = "usage-group"))]
        ug_measurements: None,
        mutex_type_normal: normal,
        mutex_type_recursive: recursive,
        mutex_type_errorcheck: errorcheck,
        mutex_type_adaptive: adaptive,
        n_records,
        n_records_max: t.events.capacity(),
        n_records_recorded: tickets,
        ug_n_records,
        cnt_mutex_trylock: CNT_MUTEX_TRYLOCK.load(Ordering::Relaxed),
        cnt_rwlock_try_rdlock: CNT_RWLOCK_TRY_RDLOCK.load(Ordering::Relaxed),
        cnt_rwlock_try_timedrdlock: CNT_RWLOCK_TRY_TIMEDRDLOCK.load(Ordering::Relaxed),
        cnt_rwlock_try_wrlock: CNT_RWLOCK_TRY_WRLOCK.load(Ordering::Relaxed),
        cnt_rwlock_try_timedwrlock: CNT_RWLOCK_TRY_TIMEDWRLOCK.load(Ordering::Relaxed),
        pthread_mutex_lock: hooks::pthread_mutex_lock as real::MutexFn as usize as u64,
        pthread_rwlock_rdlock: hooks::pthread_rwlock_rdlock as real::RwlockFn as usize as u64,
        pthread_rwlock_wrlock: hooks::pthread_rwlock_wrlock as real::RwlockFn as usize as u64,
    }
}

fn hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: buf is a valid out-buffer of the stated length.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return String::new();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

fn scheduler(pid: u32) -> Scheduler {
    // SAFETY: querying the scheduling class has no preconditions.
    match unsafe { libc::sched_getscheduler(pid as libc::pid_t) } {
        libc::SCHED_OTHER => Scheduler::Other,
        libc::SCHED_BATCH => Scheduler::Batch,
        libc::SCHED_IDLE => Scheduler::Idle,
        libc::SCHED_FIFO => Scheduler::Fifo,
        libc::SCHED_RR => Scheduler::RoundRobin,
        _ => Scheduler::Unknown,
    }
}

fn n_procs() -> u32 {
    // SAFETY: sysconf has no preconditions.
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if n > 0 { n as u32 } else { 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_metadata_is_available() {
        assert_ne!(hostname(), "");
        assert!(n_procs() >= 1);
        // The test process runs under a known scheduling class.
        assert_ne!(scheduler(std::process::id()), Scheduler::Unknown);
    }
}
