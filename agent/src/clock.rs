//! The tracer's clock.
//!
//! One clock for every timestamp in a trace: CLOCK_REALTIME, so record
//! timestamps line up with wall-clock times in the report. The analyzer
//! tolerates the backwards steps a real-time clock can take.

/// Current clock reading in nanoseconds.
pub fn now_ns() -> u64 {
    let mut tp = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: tp is a valid out-pointer for the duration of the call.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut tp) };
    if rc == -1 {
        return 0;
    }
    (tp.tv_sec as u64) * 1_000_000_000 + tp.tv_nsec as u64
}
