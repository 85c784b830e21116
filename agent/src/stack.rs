//! Call-stack capture for event records.
//!
//! Two build-time modes: the default stores only the wrapper's direct caller
//! (site identity is all the analyzer needs); the `deep-backtrace` feature
//! walks up to [`CALLER_DEPTH`] frames. Either way the walk runs under a
//! thread-local re-entrance guard: the unwinder may itself take locks through
//! our own wrappers, and a nested capture must not recurse into another walk.

use std::cell::Cell;

use locktrace_protocol::CALLER_DEPTH;

thread_local! {
    static IN_CAPTURE: Cell<bool> = const { Cell::new(false) };
}

/// Frames belonging to the capture machinery itself, dropped from the walk:
/// the `trace` closure and the wrapper.
const SKIP_FRAMES: usize = 2;

fn captured_depth() -> usize {
    if cfg!(feature = "deep-backtrace") {
        CALLER_DEPTH
    } else {
        1
    }
}

/// Capture the calling stack into a fixed caller array, zero-padded.
/// Returns all zeroes when invoked re-entrantly from within a walk, or
/// during thread teardown when the guard's TLS slot is gone.
pub fn capture_caller() -> [u64; CALLER_DEPTH] {
    let mut out = [0u64; CALLER_DEPTH];

    let entered = IN_CAPTURE
        .try_with(|guard| {
            if guard.get() {
                false
            } else {
                guard.set(true);
                true
            }
        })
        .unwrap_or(false);
    if !entered {
        return out;
    }

    let depth = captured_depth();
    let mut seen = 0usize;
    let mut stored = 0usize;
    backtrace::trace(|frame| {
        seen += 1;
        if seen <= SKIP_FRAMES {
            return true;
        }
        out[stored] = frame.ip() as u64;
        stored += 1;
        stored < depth
    });

    let _ = IN_CAPTURE.try_with(|guard| guard.set(false));
    out
}

/// Single-frame variant for the usage-group trail.
pub fn capture_single() -> u64 {
    capture_caller()[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_yields_a_caller_address() {
        let frames = capture_caller();
        assert_ne!(frames[0], 0, "expected at least one frame");
        if !cfg!(feature = "deep-backtrace") {
            assert!(frames[1..].iter().all(|&a| a == 0));
        }
    }

    #[test]
    fn guard_suppresses_nested_capture() {
        IN_CAPTURE.with(|g| g.set(true));
        let frames = capture_caller();
        assert_eq!(frames, [0u64; CALLER_DEPTH]);
        IN_CAPTURE.with(|g| g.set(false));
    }

    #[test]
    fn guard_is_released_after_capture() {
        let _ = capture_caller();
        assert!(!IN_CAPTURE.with(|g| g.get()));
    }
}
