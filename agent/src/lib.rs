//! locktrace agent - interposes on pthread synchronization entry points.
//!
//! This library is compiled as a cdylib and loaded into the target process
//! via LD_PRELOAD. Its constructor runs before the target's `main`, maps the
//! event buffer, and from then on every interposed call appends one fixed-size
//! record. At process exit the buffer is flushed and a JSON sidecar is
//! written for the offline analyzer.
//!
//! The wrappers change nothing about the traced program beyond measurable
//! overhead: they delegate to the next-layer implementation resolved with
//! `dlsym(RTLD_NEXT)` and return its result unchanged.

pub mod buffer;
pub mod clock;
pub mod config;
pub mod diag;
pub mod events;
pub mod exit;
pub mod hooks;
pub mod innards;
pub mod names;
pub mod real;
pub mod stack;

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU64};

use locktrace_protocol::TraceRecord;
#[cfg(feature = "usage-group")]
use locktrace_protocol::UsageRecord;

use crate::buffer::EventBuffer;
use crate::config::TraceConfig;
use crate::names::NameTable;

/// Global tracer state. Process-lifetime singleton: the interposer has no
/// caller under its control, so nothing can be threaded through arguments.
static TRACER: OnceLock<Tracer> = OnceLock::new();

/// Counters that must survive calls arriving before full initialization
/// (constructor-ordering hazards), so they live outside the singleton.
pub static CNT_MUTEX_TRYLOCK: AtomicU64 = AtomicU64::new(0);
pub static CNT_RWLOCK_TRY_RDLOCK: AtomicU64 = AtomicU64::new(0);
pub static CNT_RWLOCK_TRY_TIMEDRDLOCK: AtomicU64 = AtomicU64::new(0);
pub static CNT_RWLOCK_TRY_WRLOCK: AtomicU64 = AtomicU64::new(0);
pub static CNT_RWLOCK_TRY_TIMEDWRLOCK: AtomicU64 = AtomicU64::new(0);
pub static FORK_WARNING: AtomicBool = AtomicBool::new(false);

pub struct Tracer {
    pub config: TraceConfig,
    pub events: EventBuffer<TraceRecord>,
    #[cfg(feature = "usage-group")]
    pub usage: EventBuffer<UsageRecord>,
    pub names: NameTable,
    /// Tracer clock at init, ns.
    pub start_ts: u64,
    pub event_path: String,
    #[cfg(feature = "usage-group")]
    pub usage_path: String,
}

/// The global tracer, `None` until the constructor has finished (or when it
/// failed and the process is about to terminate).
pub fn tracer() -> Option<&'static Tracer> {
    TRACER.get()
}

/// OS thread id of the calling thread.
pub fn gettid() -> i32 {
    // SAFETY: gettid has no preconditions.
    unsafe { libc::syscall(libc::SYS_gettid) as i32 }
}

/// Agent entry point, run from the ELF constructor before the target's main.
///
/// On any initialization failure a red diagnostic is printed and the process
/// terminates non-zero: a silently-disabled tracer is a worse failure than
/// not starting at all.
pub extern "C" fn locktrace_init() {
    let _ = env_logger::try_init();

    let config = TraceConfig::from_env();
    diag::banner(&config);

    let pid = std::process::id();
    let start_ts = clock::now_ns();

    let event_path = format!("measurements-{pid}.dat");
    let events = match EventBuffer::create(&event_path, config.n_records, config.verbose) {
        Ok(b) => b,
        Err(e) => diag::fatal(&format!("cannot set up event buffer {event_path}: {e:#}")),
    };

    #[cfg(feature = "usage-group")]
    let usage_path = format!("ug-measurements-{pid}.dat");
    #[cfg(feature = "usage-group")]
    let usage = match EventBuffer::create(&usage_path, config.n_records, false) {
        Ok(b) => b,
        Err(e) => diag::fatal(&format!("cannot set up usage-group buffer {usage_path}: {e:#}")),
    };

    let tracer = Tracer {
        config,
        events,
        #[cfg(feature = "usage-group")]
        usage,
        names: NameTable::new(),
        start_ts,
        event_path,
        #[cfg(feature = "usage-group")]
        usage_path,
    };

    if TRACER.set(tracer).is_err() {
        diag::fatal("tracer initialized twice");
    }

    if TRACER.get().is_some_and(|t| t.config.capture_sigterm) {
        exit::install_sigterm_handler();
    }

    // The interposed `exit` catches explicit exits; the atexit handler covers
    // main returning, where libc calls its internal exit directly.
    // SAFETY: the handler is an extern "C" fn with no arguments.
    unsafe {
        libc::atexit(exit::atexit_handler);
    }

    log::info!("lock tracing active");
}

/// ELF constructor: runs on library load, before the target's entry point.
#[cfg(not(test))]
#[unsafe(link_section = ".init_array")]
#[used]
static INIT: extern "C" fn() = {
    extern "C" fn init() {
        locktrace_init();
    }
    init
};

/// ELF destructor: last-resort flush when the atexit registration failed or
/// the library is unloaded without the process exiting.
#[cfg(not(test))]
#[unsafe(link_section = ".fini_array")]
#[used]
static FINI: extern "C" fn() = {
    extern "C" fn fini() {
        exit::finish();
    }
    fini
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gettid_is_stable_per_thread() {
        let a = gettid();
        let b = gettid();
        assert_eq!(a, b);
        assert!(a > 0);

        let other = std::thread::spawn(gettid).join().unwrap();
        assert_ne!(a, other);
    }
}
