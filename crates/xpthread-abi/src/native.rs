//! Native backend: once, mutex and clock calls forward to the host pthreads.
//!
//! Thread lifecycle and cancellation stay on the engine (see
//! `xpthread_core::backend::NATIVE_CAPABILITIES`).

use std::ffi::c_int;

use xpthread_core::backend::BackendKind;

use crate::xpthread_abi::OnceRoutine;

pub const KIND: BackendKind = BackendKind::Native;

#[allow(non_camel_case_types)]
pub type xpthread_once_t = libc::pthread_once_t;

#[allow(non_camel_case_types)]
pub type xpthread_mutex_t = libc::pthread_mutex_t;

/// Static initializer value for `xpthread_once_t`.
pub const XPTHREAD_ONCE_INIT: xpthread_once_t = libc::PTHREAD_ONCE_INIT;
/// Static initializer value for `xpthread_mutex_t`.
pub const XPTHREAD_MUTEX_INITIALIZER: xpthread_mutex_t = libc::PTHREAD_MUTEX_INITIALIZER;

unsafe extern "C-unwind" {
    // Declared with the unwinding ABI: an initializer that exits its
    // context unwinds through the host's once frame.
    #[link_name = "pthread_once"]
    fn host_pthread_once_sym(control: *mut libc::pthread_once_t, init: OnceRoutine) -> c_int;
}

unsafe extern "C" {
    #[link_name = "pthread_mutex_getprioceiling"]
    fn host_pthread_mutex_getprioceiling_sym(
        mutex: *const libc::pthread_mutex_t,
        ceiling: *mut c_int,
    ) -> c_int;
    #[link_name = "pthread_mutex_setprioceiling"]
    fn host_pthread_mutex_setprioceiling_sym(
        mutex: *mut libc::pthread_mutex_t,
        ceiling: c_int,
        old: *mut c_int,
    ) -> c_int;
    #[link_name = "pthread_mutex_consistent"]
    fn host_pthread_mutex_consistent_sym(mutex: *mut libc::pthread_mutex_t) -> c_int;
}

/// # Safety
/// `control` must point to a `PTHREAD_ONCE_INIT`-initialized control.
pub unsafe fn once(control: *mut xpthread_once_t, init: OnceRoutine) -> c_int {
    // SAFETY: direct call to the host symbol with matching signature.
    unsafe { host_pthread_once_sym(control, init) }
}

/// # Safety
/// `mutex` must be valid for writes.
pub unsafe fn mutex_init(mutex: *mut xpthread_mutex_t) -> c_int {
    // SAFETY: caller contract; null attributes select the default type.
    unsafe { libc::pthread_mutex_init(mutex, std::ptr::null()) }
}

/// # Safety
/// `mutex` must point to an initialized mutex.
pub unsafe fn mutex_destroy(mutex: *mut xpthread_mutex_t) -> c_int {
    // SAFETY: caller contract.
    unsafe { libc::pthread_mutex_destroy(mutex) }
}

/// # Safety
/// `mutex` must point to an initialized mutex.
pub unsafe fn mutex_lock(mutex: *mut xpthread_mutex_t) -> c_int {
    // SAFETY: caller contract.
    unsafe { libc::pthread_mutex_lock(mutex) }
}

/// # Safety
/// `mutex` must point to an initialized mutex.
pub unsafe fn mutex_trylock(mutex: *mut xpthread_mutex_t) -> c_int {
    // SAFETY: caller contract.
    unsafe { libc::pthread_mutex_trylock(mutex) }
}

/// # Safety
/// `mutex` must point to an initialized mutex.
pub unsafe fn mutex_unlock(mutex: *mut xpthread_mutex_t) -> c_int {
    // SAFETY: caller contract.
    unsafe { libc::pthread_mutex_unlock(mutex) }
}

/// # Safety
/// `mutex` must point to an initialized mutex.
pub unsafe fn mutex_timedlock(mutex: *mut xpthread_mutex_t, deadline: &libc::timespec) -> c_int {
    // SAFETY: caller contract; `deadline` is a live reference.
    unsafe { libc::pthread_mutex_timedlock(mutex, deadline) }
}

/// # Safety
/// `mutex` must point to an initialized mutex; `ceiling` must be writable.
pub unsafe fn mutex_getprioceiling(mutex: *mut xpthread_mutex_t, ceiling: *mut c_int) -> c_int {
    // SAFETY: direct call to the host symbol with matching signature.
    unsafe { host_pthread_mutex_getprioceiling_sym(mutex, ceiling) }
}

/// # Safety
/// `mutex` must point to an initialized mutex; `old` is null or writable.
pub unsafe fn mutex_setprioceiling(
    mutex: *mut xpthread_mutex_t,
    ceiling: c_int,
    old: *mut c_int,
) -> c_int {
    // SAFETY: direct call to the host symbol with matching signature.
    unsafe { host_pthread_mutex_setprioceiling_sym(mutex, ceiling, old) }
}

/// # Safety
/// `mutex` must point to an initialized mutex.
pub unsafe fn mutex_consistent(mutex: *mut xpthread_mutex_t) -> c_int {
    // SAFETY: direct call to the host symbol with matching signature.
    unsafe { host_pthread_mutex_consistent_sym(mutex) }
}

pub fn time_now() -> (i64, i64) {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid out-pointer; CLOCK_REALTIME always exists.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) };
    if rc != 0 {
        // Callers never see a clock error; fall back to the std clock.
        let now = xpthread_core::time::now();
        return (now.tv_sec, now.tv_nsec);
    }
    (i64::from(ts.tv_sec), i64::from(ts.tv_nsec))
}
