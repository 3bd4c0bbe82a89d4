//! Emulated backend: once and mutex objects are the engine's own types.
//!
//! Used where native pthreads are unavailable, or everywhere when the
//! `emulated` feature is on. Priority-ceiling and robustness calls are
//! accepted and inert.

use std::ffi::c_int;

use xpthread_core::backend::BackendKind;
use xpthread_core::errno::{self, Status, XpthreadError};
use xpthread_core::pthread::{Mutex, OnceControl};
use xpthread_core::time::{self, NSEC_PER_SEC, Timespec};

use crate::xpthread_abi::OnceRoutine;

pub const KIND: BackendKind = BackendKind::Emulated;

/// `xpthread_once_t` storage: the engine's tri-state control.
#[allow(non_camel_case_types)]
#[repr(transparent)]
pub struct xpthread_once_t(pub OnceControl);

/// `xpthread_mutex_t` storage: the engine's non-reentrant lock.
#[allow(non_camel_case_types)]
#[repr(transparent)]
pub struct xpthread_mutex_t(pub Mutex);

/// Static initializer value for `xpthread_once_t`.
pub const XPTHREAD_ONCE_INIT: xpthread_once_t = xpthread_once_t(OnceControl::new());
/// Static initializer value for `xpthread_mutex_t`.
pub const XPTHREAD_MUTEX_INITIALIZER: xpthread_mutex_t = xpthread_mutex_t(Mutex::new());

fn status<T>(result: Result<T, XpthreadError>) -> c_int {
    Status::from(result).errno()
}

/// # Safety
/// `control` must be valid for shared access.
pub unsafe fn once(control: *mut xpthread_once_t, init: OnceRoutine) -> c_int {
    // SAFETY: caller contract.
    let control = unsafe { &(*control).0 };
    // SAFETY: `init` is a caller-supplied routine taking no arguments.
    status(control.run_once(|| unsafe { init() }))
}

/// # Safety
/// `mutex` must be valid for writes and not currently in use.
pub unsafe fn mutex_init(mutex: *mut xpthread_mutex_t) -> c_int {
    match Mutex::init() {
        Ok(m) => {
            // SAFETY: caller contract; previous contents are not dropped.
            unsafe { mutex.write(xpthread_mutex_t(m)) };
            0
        }
        Err(err) => err.errno(),
    }
}

/// # Safety
/// `mutex` must point to an initialized mutex.
pub unsafe fn mutex_destroy(mutex: *mut xpthread_mutex_t) -> c_int {
    // SAFETY: caller contract.
    status(unsafe { &(*mutex).0 }.destroy())
}

/// # Safety
/// `mutex` must point to an initialized mutex.
pub unsafe fn mutex_lock(mutex: *mut xpthread_mutex_t) -> c_int {
    // SAFETY: caller contract.
    status(unsafe { &(*mutex).0 }.lock())
}

/// # Safety
/// `mutex` must point to an initialized mutex.
pub unsafe fn mutex_trylock(mutex: *mut xpthread_mutex_t) -> c_int {
    // SAFETY: caller contract.
    status(unsafe { &(*mutex).0 }.try_lock())
}

/// # Safety
/// `mutex` must point to an initialized mutex.
pub unsafe fn mutex_unlock(mutex: *mut xpthread_mutex_t) -> c_int {
    // SAFETY: caller contract.
    status(unsafe { &(*mutex).0 }.unlock())
}

/// # Safety
/// `mutex` must point to an initialized mutex.
pub unsafe fn mutex_timedlock(mutex: *mut xpthread_mutex_t, deadline: &libc::timespec) -> c_int {
    let nsec = i64::from(deadline.tv_nsec);
    if !(0..NSEC_PER_SEC).contains(&nsec) {
        return errno::EINVAL;
    }
    let deadline = Timespec::new(i64::from(deadline.tv_sec), nsec);
    // SAFETY: caller contract.
    status(unsafe { &(*mutex).0 }.timed_lock(deadline))
}

/// # Safety
/// `mutex` must point to an initialized mutex; `ceiling` must be writable.
pub unsafe fn mutex_getprioceiling(mutex: *mut xpthread_mutex_t, ceiling: *mut c_int) -> c_int {
    // SAFETY: caller contract.
    match unsafe { &(*mutex).0 }.get_priority_ceiling() {
        Ok(value) => {
            // SAFETY: caller contract.
            unsafe { ceiling.write(value) };
            0
        }
        Err(err) => err.errno(),
    }
}

/// # Safety
/// `mutex` must point to an initialized mutex; `old` is null or writable.
pub unsafe fn mutex_setprioceiling(
    mutex: *mut xpthread_mutex_t,
    ceiling: c_int,
    old: *mut c_int,
) -> c_int {
    // SAFETY: caller contract.
    match unsafe { &(*mutex).0 }.set_priority_ceiling(ceiling) {
        Ok(previous) => {
            if !old.is_null() {
                // SAFETY: non-null, caller contract.
                unsafe { old.write(previous) };
            }
            0
        }
        Err(err) => err.errno(),
    }
}

/// # Safety
/// `mutex` must point to an initialized mutex.
pub unsafe fn mutex_consistent(mutex: *mut xpthread_mutex_t) -> c_int {
    // SAFETY: caller contract.
    status(unsafe { &(*mutex).0 }.mark_consistent())
}

pub fn time_now() -> (i64, i64) {
    let now = time::now();
    (now.tv_sec, now.tv_nsec)
}
