//! Side-channel diagnostics.
//!
//! These lines must reach the operator even when no log filter is set, so
//! they go straight to stderr, red when stderr is a tty. The `log` crate is
//! used for everything that may be filtered.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::TraceConfig;

fn is_tty() -> bool {
    // SAFETY: isatty has no preconditions.
    unsafe { libc::isatty(libc::STDERR_FILENO) == 1 }
}

/// Write one red-highlighted line to stderr.
pub fn red(msg: &str) {
    let mut err = std::io::stderr().lock();
    if is_tty() {
        let _ = writeln!(err, "\x1b[0;31m{msg}\x1b[0m");
    } else {
        let _ = writeln!(err, "{msg}");
    }
}

/// Startup banner: the tracer announces itself and its configuration.
pub fn banner(config: &TraceConfig) {
    red(&format!(
        "locktrace starting... (record size: {} bytes, tracing max. {} records)",
        std::mem::size_of::<locktrace_protocol::TraceRecord>(),
        config.n_records,
    ));

    if config.verbose {
        red("verbose tracing enabled");
    }
    if config.enforce_error_check {
        red("replacing all mutexes by error-checking mutexes");
    }

    let mut rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: rlim is a valid out-pointer.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_CORE, &mut rlim) };
    if rc == 0 && (rlim.rlim_cur == 0 || rlim.rlim_max == 0) {
        red("NOTE: core files are disabled; re-run after \"ulimit -c unlimited\" to let the resolver use a core");
    }
}

/// Unrecoverable initialization failure: never degrade silently.
pub fn fatal(msg: &str) -> ! {
    red(&format!("ERROR: {msg}"));
    // SAFETY: terminating the process is the documented failure mode.
    unsafe { libc::_exit(1) }
}

/// Once-only warning when a wrapper runs before the buffer exists
/// (a constructor of some other preloaded library took a lock first).
pub fn warn_buffer_not_allocated() {
    static SHOWN: AtomicBool = AtomicBool::new(false);
    if !SHOWN.swap(true, Ordering::Relaxed) {
        red("locktrace: event buffer not (yet) allocated, dropping early events");
    }
}
