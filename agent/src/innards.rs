//! Reading and checking glibc lock internals.
//!
//! The record's `kind_specific` payload carries a copy of the lock's own
//! counters at capture time. These are reads of concurrently-mutated memory
//! behind glibc's opaque types; the copies are advisory and the layout
//! mirrors below are glibc/x86_64-specific. On other targets the payload
//! stays zeroed.

use libc::{pthread_mutex_t, pthread_rwlock_t};
use locktrace_protocol::{MutexInnards, RwlockInnards};

/// Numeric mutex-kind values on the build host, for the sidecar:
/// (normal, recursive, errorcheck, adaptive).
pub fn mutex_kind_values() -> (i32, i32, i32, i32) {
    (
        libc::PTHREAD_MUTEX_NORMAL,
        libc::PTHREAD_MUTEX_RECURSIVE,
        libc::PTHREAD_MUTEX_ERRORCHECK,
        libc::PTHREAD_MUTEX_ADAPTIVE_NP,
    )
}

#[cfg(all(target_os = "linux", target_env = "gnu", target_arch = "x86_64"))]
mod glibc {
    /// `struct __pthread_mutex_s`, glibc x86_64.
    #[repr(C)]
    pub struct MutexData {
        pub lock: i32,
        pub count: u32,
        pub owner: i32,
        pub nusers: u32,
        pub kind: i32,
        pub spins: i16,
        pub elision: i16,
        pub list: [usize; 2],
    }

    /// `struct __pthread_rwlock_arch_t`, glibc >= 2.30 x86_64.
    #[repr(C)]
    pub struct RwlockData {
        pub readers: u32,
        pub writers: u32,
        pub wrphase_futex: u32,
        pub writers_futex: u32,
        pub pad3: u32,
        pub pad4: u32,
        pub cur_writer: i32,
        pub shared: i32,
        pub rwelision: i8,
        pub pad1: [u8; 7],
        pub pad2: u64,
        pub flags: u32,
    }
}

#[cfg(all(target_os = "linux", target_env = "gnu", target_arch = "x86_64"))]
mod imp {
    use super::*;

    /// Copy the mutex counters.
    ///
    /// # Safety
    /// `mutex` must point at an initialized pthread mutex.
    pub unsafe fn read_mutex(mutex: *const pthread_mutex_t) -> MutexInnards {
        let d = unsafe { &*mutex.cast::<glibc::MutexData>() };
        MutexInnards {
            count: d.count,
            owner: d.owner,
            kind: d.kind,
            spins: d.spins,
            elision: d.elision,
        }
    }

    /// Copy the rwlock counters.
    ///
    /// # Safety
    /// `rwlock` must point at an initialized pthread rwlock.
    pub unsafe fn read_rwlock(rwlock: *const pthread_rwlock_t) -> RwlockInnards {
        let d = unsafe { &*rwlock.cast::<glibc::RwlockData>() };
        RwlockInnards {
            readers: d.readers,
            writers: d.writers,
            cur_writer: d.cur_writer,
        }
    }

    /// Inspect the mutex for obvious inconsistency; diagnostics only,
    /// control flow unchanged.
    ///
    /// # Safety
    /// `mutex` must point at an initialized pthread mutex.
    pub unsafe fn mutex_sanity_check(mutex: *const pthread_mutex_t) {
        let d = unsafe { &*mutex.cast::<glibc::MutexData>() };
        let (_, _, _, adaptive) = mutex_kind_values();
        if d.kind < 0 || d.kind > adaptive {
            log::warn!("mutex {mutex:p} has unknown kind {}", d.kind);
        }
        if (d.nusers as i32) < 0 {
            log::warn!("mutex {mutex:p} has suspicious nusers {}", d.nusers);
        }
        if d.lock != 0 && d.owner == 0 {
            log::warn!("mutex {mutex:p} is locked with owner 0");
        }
    }

    /// Inspect the rwlock counters for plausibility; diagnostics only.
    ///
    /// # Safety
    /// `rwlock` must point at an initialized pthread rwlock.
    pub unsafe fn rwlock_sanity_check(rwlock: *const pthread_rwlock_t) {
        let d = unsafe { &*rwlock.cast::<glibc::RwlockData>() };
        if (d.readers as i32) < 0 {
            log::warn!("rwlock {rwlock:p} has suspicious readers {}", d.readers);
        }
        if (d.writers as i32) < 0 {
            log::warn!("rwlock {rwlock:p} has suspicious writers {}", d.writers);
        }
        if d.writers > 0 && d.cur_writer == 0 {
            log::warn!("rwlock {rwlock:p} has writers but cur_writer 0");
        }
    }

    /// Upgrade normal/adaptive/recursive mutexes to the error-checking kind.
    /// Only called when ENFORCE_ERR_CHK is set.
    ///
    /// # Safety
    /// `mutex` must point at an initialized pthread mutex. Concurrent first
    /// locks can observe either kind; the option documents this hazard.
    pub unsafe fn enforce_error_check(mutex: *mut pthread_mutex_t) {
        let d = unsafe { &mut *mutex.cast::<glibc::MutexData>() };
        let (normal, recursive, _, adaptive) = mutex_kind_values();
        if d.kind == normal || d.kind == adaptive || d.kind == recursive {
            d.kind = libc::PTHREAD_MUTEX_ERRORCHECK;
        }
    }
}

#[cfg(not(all(target_os = "linux", target_env = "gnu", target_arch = "x86_64")))]
mod imp {
    use super::*;

    pub unsafe fn read_mutex(_mutex: *const pthread_mutex_t) -> MutexInnards {
        MutexInnards::default()
    }

    pub unsafe fn read_rwlock(_rwlock: *const pthread_rwlock_t) -> RwlockInnards {
        RwlockInnards::default()
    }

    pub unsafe fn mutex_sanity_check(_mutex: *const pthread_mutex_t) {}

    pub unsafe fn rwlock_sanity_check(_rwlock: *const pthread_rwlock_t) {}

    pub unsafe fn enforce_error_check(_mutex: *mut pthread_mutex_t) {}
}

pub use imp::{enforce_error_check, mutex_sanity_check, read_mutex, read_rwlock, rwlock_sanity_check};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_values_are_distinct() {
        let (normal, recursive, errorcheck, adaptive) = mutex_kind_values();
        let mut v = [normal, recursive, errorcheck, adaptive];
        v.sort_unstable();
        v.windows(2).for_each(|w| assert_ne!(w[0], w[1]));
    }

    #[cfg(all(target_os = "linux", target_env = "gnu", target_arch = "x86_64"))]
    #[test]
    fn statically_initialized_mutex_reads_clean() {
        let mutex = libc::PTHREAD_MUTEX_INITIALIZER;
        let innards = unsafe { read_mutex(&mutex) };
        assert_eq!(innards.count, 0);
        assert_eq!(innards.owner, 0);
        assert_eq!(innards.kind, libc::PTHREAD_MUTEX_NORMAL);
    }

    #[cfg(all(target_os = "linux", target_env = "gnu", target_arch = "x86_64"))]
    #[test]
    fn statically_initialized_rwlock_reads_clean() {
        let rwlock = libc::PTHREAD_RWLOCK_INITIALIZER;
        let innards = unsafe { read_rwlock(&rwlock) };
        assert_eq!(innards.readers, 0);
        assert_eq!(innards.writers, 0);
        assert_eq!(innards.cur_writer, 0);
    }

    #[cfg(all(target_os = "linux", target_env = "gnu", target_arch = "x86_64"))]
    #[test]
    fn enforce_rewrites_normal_kind() {
        let mut mutex = libc::PTHREAD_MUTEX_INITIALIZER;
        unsafe { enforce_error_check(&mut mutex) };
        let innards = unsafe { read_mutex(&mutex) };
        assert_eq!(innards.kind, libc::PTHREAD_MUTEX_ERRORCHECK);
    }
}
