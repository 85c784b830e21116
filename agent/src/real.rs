//! Lazy resolution of the next-layer ("real") entry points.
//!
//! Each wrapper resolves its original on first call with
//! `dlsym(RTLD_NEXT, ..)` and caches the function pointer in an `AtomicPtr`.
//! Pointer-width stores are atomic on the supported targets, so no lock is
//! needed; at worst two threads resolve the same symbol once each.
//!
//! A failed resolution is unrecoverable: the traced program cannot proceed
//! without the primitive, so we abort with a diagnostic.

use std::ffi::CStr;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicPtr, Ordering};

use libc::{c_char, c_int, c_void, pid_t, pthread_mutex_t, pthread_rwlock_t, pthread_t, timespec};

use crate::diag;

pub struct LazyFn<F> {
    ptr: AtomicPtr<c_void>,
    _marker: PhantomData<F>,
}

// F is only ever a plain extern "C" function pointer.
unsafe impl<F> Send for LazyFn<F> {}
unsafe impl<F> Sync for LazyFn<F> {}

impl<F: Copy> LazyFn<F> {
    pub const fn new() -> Self {
        Self {
            ptr: AtomicPtr::new(std::ptr::null_mut()),
            _marker: PhantomData,
        }
    }

    /// The real function, resolving and caching it on first use.
    pub fn get(&self, name: &'static CStr) -> F {
        const {
            assert!(std::mem::size_of::<F>() == std::mem::size_of::<*mut c_void>());
        }
        let mut p = self.ptr.load(Ordering::Relaxed);
        if p.is_null() {
            // SAFETY: name is a valid NUL-terminated symbol name.
            p = unsafe { libc::dlsym(libc::RTLD_NEXT, name.as_ptr()) };
            if p.is_null() {
                diag::red(&format!(
                    "locktrace: cannot resolve original {:?}, aborting",
                    name
                ));
                // SAFETY: aborting is the documented failure mode.
                unsafe { libc::abort() };
            }
            self.ptr.store(p, Ordering::Relaxed);
        }
        // SAFETY: sizes match (checked in new); the pointer came from dlsym
        // for a symbol with exactly this signature.
        unsafe { std::mem::transmute_copy::<*mut c_void, F>(&p) }
    }
}

impl<F: Copy> Default for LazyFn<F> {
    fn default() -> Self {
        Self::new()
    }
}

pub type MutexFn = unsafe extern "C" fn(*mut pthread_mutex_t) -> c_int;
pub type MutexInitFn =
    unsafe extern "C" fn(*mut pthread_mutex_t, *const libc::pthread_mutexattr_t) -> c_int;
pub type RwlockFn = unsafe extern "C" fn(*mut pthread_rwlock_t) -> c_int;
pub type RwlockInitFn =
    unsafe extern "C" fn(*mut pthread_rwlock_t, *const libc::pthread_rwlockattr_t) -> c_int;
pub type RwlockTimedFn = unsafe extern "C" fn(*mut pthread_rwlock_t, *const timespec) -> c_int;
pub type PthreadExitFn = unsafe extern "C" fn(*mut c_void) -> !;
pub type SetnameFn = unsafe extern "C" fn(pthread_t, *const c_char) -> c_int;
pub type ForkFn = unsafe extern "C" fn() -> pid_t;
pub type ExitFn = unsafe extern "C" fn(c_int) -> !;

pub static PTHREAD_MUTEX_INIT: LazyFn<MutexInitFn> = LazyFn::new();
pub static PTHREAD_MUTEX_DESTROY: LazyFn<MutexFn> = LazyFn::new();
pub static PTHREAD_MUTEX_LOCK: LazyFn<MutexFn> = LazyFn::new();
pub static PTHREAD_MUTEX_TRYLOCK: LazyFn<MutexFn> = LazyFn::new();
pub static PTHREAD_MUTEX_UNLOCK: LazyFn<MutexFn> = LazyFn::new();

pub static PTHREAD_RWLOCK_INIT: LazyFn<RwlockInitFn> = LazyFn::new();
pub static PTHREAD_RWLOCK_DESTROY: LazyFn<RwlockFn> = LazyFn::new();
pub static PTHREAD_RWLOCK_RDLOCK: LazyFn<RwlockFn> = LazyFn::new();
pub static PTHREAD_RWLOCK_TRYRDLOCK: LazyFn<RwlockFn> = LazyFn::new();
pub static PTHREAD_RWLOCK_TIMEDRDLOCK: LazyFn<RwlockTimedFn> = LazyFn::new();
pub static PTHREAD_RWLOCK_WRLOCK: LazyFn<RwlockFn> = LazyFn::new();
pub static PTHREAD_RWLOCK_TRYWRLOCK: LazyFn<RwlockFn> = LazyFn::new();
pub static PTHREAD_RWLOCK_TIMEDWRLOCK: LazyFn<RwlockTimedFn> = LazyFn::new();
pub static PTHREAD_RWLOCK_UNLOCK: LazyFn<RwlockFn> = LazyFn::new();

pub static PTHREAD_EXIT: LazyFn<PthreadExitFn> = LazyFn::new();
pub static PTHREAD_SETNAME_NP: LazyFn<SetnameFn> = LazyFn::new();
pub static FORK: LazyFn<ForkFn> = LazyFn::new();
pub static EXIT: LazyFn<ExitFn> = LazyFn::new();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_a_real_symbol_once() {
        static GETPID: LazyFn<unsafe extern "C" fn() -> pid_t> = LazyFn::new();
        let f = GETPID.get(c"getpid");
        // SAFETY: getpid has no preconditions.
        let pid = unsafe { f() };
        assert_eq!(pid as u32, std::process::id());

        // Second call must hand back the cached pointer.
        let g = GETPID.get(c"getpid");
        assert_eq!(f as usize, g as usize);
    }
}
