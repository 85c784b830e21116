//! The interposed entry points.
//!
//! Every wrapper follows the same lifecycle: resolve the original lazily,
//! run the optional sanity check, pre-log intent for acquisitions, time the
//! delegated call where it can block, append one event record, and return
//! the original's result unchanged. Failed calls still emit a record; the
//! `rc` field carries the error code and the action tag stays the action
//! attempted.

use std::sync::atomic::Ordering;

use libc::{c_char, c_int, c_void, pid_t, pthread_mutex_t, pthread_rwlock_t, pthread_t, timespec};
use locktrace_protocol::LockAction;

use crate::{
    CNT_MUTEX_TRYLOCK, CNT_RWLOCK_TRY_RDLOCK, CNT_RWLOCK_TRY_TIMEDRDLOCK, CNT_RWLOCK_TRY_WRLOCK,
    CNT_RWLOCK_TRY_TIMEDWRLOCK, FORK_WARNING, clock, diag, events, exit, gettid, innards, real,
    tracer,
};

fn enforce_error_check_enabled() -> bool {
    tracer().is_some_and(|t| t.config.enforce_error_check)
}

// --- mutex lifecycle -------------------------------------------------------

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_mutex_init(
    mutex: *mut pthread_mutex_t,
    attr: *const libc::pthread_mutexattr_t,
) -> c_int {
    let real = real::PTHREAD_MUTEX_INIT.get(c"pthread_mutex_init");

    let rc = unsafe { real(mutex, attr) };
    let innards = unsafe { innards::read_mutex(mutex) };
    events::store_mutex(mutex as u64, LockAction::MutexInit, 0, rc, innards);

    rc
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_mutex_destroy(mutex: *mut pthread_mutex_t) -> c_int {
    let real = real::PTHREAD_MUTEX_DESTROY.get(c"pthread_mutex_destroy");

    let rc = unsafe { real(mutex) };
    let innards = unsafe { innards::read_mutex(mutex) };
    events::store_mutex(mutex as u64, LockAction::MutexDestroy, 0, rc, innards);

    rc
}

// --- mutex acquire / release ----------------------------------------------

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_mutex_lock(mutex: *mut pthread_mutex_t) -> c_int {
    let real = real::PTHREAD_MUTEX_LOCK.get(c"pthread_mutex_lock");

    unsafe { innards::mutex_sanity_check(mutex) };
    if enforce_error_check_enabled() {
        unsafe { innards::enforce_error_check(mutex) };
    }

    events::store_usage(mutex as u64, LockAction::MutexLock);

    let start = clock::now_ns();
    let rc = unsafe { real(mutex) };
    let took = clock::now_ns().saturating_sub(start);

    let innards = unsafe { innards::read_mutex(mutex) };
    events::store_mutex(mutex as u64, LockAction::MutexLock, took, rc, innards);

    rc
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_mutex_trylock(mutex: *mut pthread_mutex_t) -> c_int {
    let real = real::PTHREAD_MUTEX_TRYLOCK.get(c"pthread_mutex_trylock");

    CNT_MUTEX_TRYLOCK.fetch_add(1, Ordering::Relaxed);
    unsafe { innards::mutex_sanity_check(mutex) };

    events::store_usage(mutex as u64, LockAction::MutexLock);

    let rc = unsafe { real(mutex) };

    let innards = unsafe { innards::read_mutex(mutex) };
    events::store_mutex(mutex as u64, LockAction::MutexLock, 0, rc, innards);

    rc
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_mutex_unlock(mutex: *mut pthread_mutex_t) -> c_int {
    let real = real::PTHREAD_MUTEX_UNLOCK.get(c"pthread_mutex_unlock");

    unsafe { innards::mutex_sanity_check(mutex) };

    let rc = unsafe { real(mutex) };

    let innards = unsafe { innards::read_mutex(mutex) };
    events::store_mutex(mutex as u64, LockAction::MutexUnlock, 0, rc, innards);

    rc
}

// --- rwlock lifecycle ------------------------------------------------------

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_rwlock_init(
    rwlock: *mut pthread_rwlock_t,
    attr: *const libc::pthread_rwlockattr_t,
) -> c_int {
    let real = real::PTHREAD_RWLOCK_INIT.get(c"pthread_rwlock_init");

    let rc = unsafe { real(rwlock, attr) };
    let innards = unsafe { innards::read_rwlock(rwlock) };
    events::store_rwlock(rwlock as u64, LockAction::RwInit, 0, rc, innards);

    rc
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_rwlock_destroy(rwlock: *mut pthread_rwlock_t) -> c_int {
    let real = real::PTHREAD_RWLOCK_DESTROY.get(c"pthread_rwlock_destroy");

    let rc = unsafe { real(rwlock) };
    let innards = unsafe { innards::read_rwlock(rwlock) };
    events::store_rwlock(rwlock as u64, LockAction::RwDestroy, 0, rc, innards);

    rc
}

// --- rwlock read acquire ---------------------------------------------------

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_rwlock_rdlock(rwlock: *mut pthread_rwlock_t) -> c_int {
    let real = real::PTHREAD_RWLOCK_RDLOCK.get(c"pthread_rwlock_rdlock");

    unsafe { innards::rwlock_sanity_check(rwlock) };
    events::store_usage(rwlock as u64, LockAction::RwReadLock);

    let start = clock::now_ns();
    let rc = unsafe { real(rwlock) };
    let took = clock::now_ns().saturating_sub(start);

    let innards = unsafe { innards::read_rwlock(rwlock) };
    events::store_rwlock(rwlock as u64, LockAction::RwReadLock, took, rc, innards);

    rc
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_rwlock_tryrdlock(rwlock: *mut pthread_rwlock_t) -> c_int {
    let real = real::PTHREAD_RWLOCK_TRYRDLOCK.get(c"pthread_rwlock_tryrdlock");

    CNT_RWLOCK_TRY_RDLOCK.fetch_add(1, Ordering::Relaxed);
    unsafe { innards::rwlock_sanity_check(rwlock) };
    events::store_usage(rwlock as u64, LockAction::RwReadLock);

    let rc = unsafe { real(rwlock) };

    let innards = unsafe { innards::read_rwlock(rwlock) };
    events::store_rwlock(rwlock as u64, LockAction::RwReadLock, 0, rc, innards);

    rc
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_rwlock_timedrdlock(
    rwlock: *mut pthread_rwlock_t,
    abstime: *const timespec,
) -> c_int {
    let real = real::PTHREAD_RWLOCK_TIMEDRDLOCK.get(c"pthread_rwlock_timedrdlock");

    CNT_RWLOCK_TRY_TIMEDRDLOCK.fetch_add(1, Ordering::Relaxed);
    unsafe { innards::rwlock_sanity_check(rwlock) };
    events::store_usage(rwlock as u64, LockAction::RwReadLock);

    let start = clock::now_ns();
    let rc = unsafe { real(rwlock, abstime) };
    let took = clock::now_ns().saturating_sub(start);

    let innards = unsafe { innards::read_rwlock(rwlock) };
    events::store_rwlock(rwlock as u64, LockAction::RwReadLock, took, rc, innards);

    rc
}

// --- rwlock write acquire --------------------------------------------------

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_rwlock_wrlock(rwlock: *mut pthread_rwlock_t) -> c_int {
    let real = real::PTHREAD_RWLOCK_WRLOCK.get(c"pthread_rwlock_wrlock");

    unsafe { innards::rwlock_sanity_check(rwlock) };
    events::store_usage(rwlock as u64, LockAction::RwWriteLock);

    let start = clock::now_ns();
    let rc = unsafe { real(rwlock) };
    let took = clock::now_ns().saturating_sub(start);

    let innards = unsafe { innards::read_rwlock(rwlock) };
    events::store_rwlock(rwlock as u64, LockAction::RwWriteLock, took, rc, innards);

    rc
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_rwlock_trywrlock(rwlock: *mut pthread_rwlock_t) -> c_int {
    let real = real::PTHREAD_RWLOCK_TRYWRLOCK.get(c"pthread_rwlock_trywrlock");

    CNT_RWLOCK_TRY_WRLOCK.fetch_add(1, Ordering::Relaxed);
    unsafe { innards::rwlock_sanity_check(rwlock) };
    events::store_usage(rwlock as u64, LockAction::RwWriteLock);

    let rc = unsafe { real(rwlock) };

    let innards = unsafe { innards::read_rwlock(rwlock) };
    events::store_rwlock(rwlock as u64, LockAction::RwWriteLock, 0, rc, innards);

    rc
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_rwlock_timedwrlock(
    rwlock: *mut pthread_rwlock_t,
    abstime: *const timespec,
) -> c_int {
    let real = real::PTHREAD_RWLOCK_TIMEDWRLOCK.get(c"pthread_rwlock_timedwrlock");

    CNT_RWLOCK_TRY_TIMEDWRLOCK.fetch_add(1, Ordering::Relaxed);
    unsafe { innards::rwlock_sanity_check(rwlock) };
    events::store_usage(rwlock as u64, LockAction::RwWriteLock);

    let start = clock::now_ns();
    let rc = unsafe { real(rwlock, abstime) };
    let took = clock::now_ns().saturating_sub(start);

    let innards = unsafe { innards::read_rwlock(rwlock) };
    events::store_rwlock(rwlock as u64, LockAction::RwWriteLock, took, rc, innards);

    rc
}

// --- rwlock release --------------------------------------------------------

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_rwlock_unlock(rwlock: *mut pthread_rwlock_t) -> c_int {
    let real = real::PTHREAD_RWLOCK_UNLOCK.get(c"pthread_rwlock_unlock");

    unsafe { innards::rwlock_sanity_check(rwlock) };

    let rc = unsafe { real(rwlock) };

    let innards = unsafe { innards::read_rwlock(rwlock) };
    events::store_rwlock(rwlock as u64, LockAction::RwUnlock, 0, rc, innards);

    rc
}

// --- thread and process lifecycle ------------------------------------------

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_exit(retval: *mut c_void) -> ! {
    events::store_thread_exit();
    if let Some(t) = tracer() {
        t.names.remove(gettid());
    }

    let real = real::PTHREAD_EXIT.get(c"pthread_exit");
    unsafe { real(retval) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_setname_np(thread: pthread_t, name: *const c_char) -> c_int {
    if !name.is_null() {
        if let Some(t) = tracer() {
            let label = unsafe { std::ffi::CStr::from_ptr(name) }.to_string_lossy();
            t.names.set(gettid(), &label);
        }
    }

    let real = real::PTHREAD_SETNAME_NP.get(c"pthread_setname_np");
    unsafe { real(thread, name) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fork() -> pid_t {
    let real = real::FORK.get(c"fork");

    // Parent and child keep writing into the same mapping with the same
    // ticket counter; documented hazard, flagged in the sidecar.
    FORK_WARNING.store(true, Ordering::Relaxed);

    unsafe { real() }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn exit(status: c_int) -> ! {
    exit::finish();

    if tracer().is_some_and(|t| t.config.core_dump) {
        diag::red("dumping core...");
        // SAFETY: restoring the default abort disposition and aborting so
        // the kernel writes a core image for the symbol resolver.
        unsafe {
            libc::signal(libc::SIGABRT, libc::SIG_DFL);
            libc::abort();
        }
    }

    let real = real::EXIT.get(c"exit");
    unsafe { real(status) }
}
