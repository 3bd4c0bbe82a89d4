//! `extern "C"` call surface.
//!
//! Every status-returning call yields `0` or an errno value from the closed
//! set (`ETIMEDOUT`, `EBUSY`, `EINVAL`, `ENOMEM`, `EAGAIN`, `ENOTSUP`).
//! Null object pointers are `EINVAL`; everything else POSIX leaves undefined
//! is not checked.
//!
//! Calls that can terminate the calling context or re-raise a context's
//! panic use the `"C-unwind"` ABI so the unwind may cross C frames instead of
//! aborting.

#![allow(clippy::missing_safety_doc)]
#![allow(non_camel_case_types)]

use std::ffi::{CStr, c_char, c_int, c_void};

use xpthread_core::errno::{self, Status, XpthreadError};
use xpthread_core::pthread::{self as engine, CancelState, CancelType, ThreadAttr, ThreadHandle};

use crate::backend;

pub use crate::backend::{
    XPTHREAD_MUTEX_INITIALIZER, XPTHREAD_ONCE_INIT, xpthread_mutex_t, xpthread_once_t,
};
pub use xpthread_core::pthread::{
    XPTHREAD_CANCEL_ASYNCHRONOUS, XPTHREAD_CANCEL_DEFERRED, XPTHREAD_CANCEL_DISABLE,
    XPTHREAD_CANCEL_ENABLE,
};

/// Thread handle as seen by C: the engine's 64-bit context id, unchanged on
/// every target width.
pub type xpthread_t = u64;

/// Entry function of a created context.
pub type StartRoutine = unsafe extern "C-unwind" fn(*mut c_void) -> *mut c_void;

/// Initializer passed to `xpthread_once`.
pub type OnceRoutine = unsafe extern "C-unwind" fn();

/// Return value seen by the joiner of a cancelled context.
pub const XPTHREAD_CANCELED: *mut c_void = engine::THREAD_CANCELED as *mut c_void;

/// Creation attributes. Zero / null fields take the platform defaults.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct xpthread_attr_t {
    /// Stack size in bytes, `0` for the default.
    pub stack_size: usize,
    /// NUL-terminated UTF-8 thread name, or null.
    pub name: *const c_char,
}

impl Default for xpthread_attr_t {
    fn default() -> Self {
        Self {
            stack_size: 0,
            name: std::ptr::null(),
        }
    }
}

fn status<T>(result: Result<T, XpthreadError>) -> c_int {
    Status::from(result).errno()
}

/// Fold a host return code into the closed status set.
fn normalize(rc: c_int) -> c_int {
    Status::from_errno(rc).errno()
}

/// A C `main` thread carries no Rust thread name, so identify it to the
/// engine before it may terminate. Checked once per thread.
fn note_host_main_thread() {
    #[cfg(target_os = "linux")]
    {
        use std::cell::Cell;
        std::thread_local! {
            static CHECKED: Cell<bool> = const { Cell::new(false) };
        }
        if CHECKED.with(|c| c.replace(true)) {
            return;
        }
        // SAFETY: neither call takes arguments that could be invalid.
        let (tid, pid) = unsafe { (libc::syscall(libc::SYS_gettid), libc::getpid()) };
        if tid == libc::c_long::from(pid) {
            engine::mark_main_thread();
        }
    }
}

/// # Safety
/// `attr` is null or points to a valid `xpthread_attr_t` whose `name` is
/// null or a valid C string.
unsafe fn thread_attr(attr: *const xpthread_attr_t) -> Result<ThreadAttr, XpthreadError> {
    if attr.is_null() {
        return Ok(ThreadAttr::default());
    }
    // SAFETY: non-null, caller contract.
    let raw = unsafe { &*attr };
    let mut out = ThreadAttr::default();
    if raw.stack_size != 0 {
        out.stack_size = Some(raw.stack_size);
    }
    if !raw.name.is_null() {
        // SAFETY: non-null, caller contract.
        let name = unsafe { CStr::from_ptr(raw.name) }
            .to_str()
            .map_err(|_| XpthreadError::InvalidArgument)?;
        out.name = Some(name.to_owned());
    }
    Ok(out)
}

/// Name of the backend serving once/mutex/clock calls: `"native"` or `"emulated"`.
#[unsafe(no_mangle)]
pub extern "C" fn xpthread_backend_name() -> *const c_char {
    match backend::KIND {
        xpthread_core::BackendKind::Native => c"native".as_ptr(),
        xpthread_core::BackendKind::Emulated => c"emulated".as_ptr(),
    }
}

// ===========================================================================
// Once
// ===========================================================================

/// Run `init` exactly once for `control`.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn xpthread_once(
    control: *mut xpthread_once_t,
    init: Option<OnceRoutine>,
) -> c_int {
    let Some(init) = init else {
        return errno::EINVAL;
    };
    if control.is_null() {
        return errno::EINVAL;
    }
    // SAFETY: non-null, caller contract.
    normalize(unsafe { backend::once(control, init) })
}

// ===========================================================================
// Thread lifecycle
// ===========================================================================

/// Start a context running `start_routine(arg)`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn xpthread_create(
    thread_out: *mut xpthread_t,
    attr: *const xpthread_attr_t,
    start_routine: Option<StartRoutine>,
    arg: *mut c_void,
) -> c_int {
    let Some(start) = start_routine else {
        return errno::EINVAL;
    };
    if thread_out.is_null() {
        return errno::EINVAL;
    }
    // SAFETY: caller contract.
    let attr = match unsafe { thread_attr(attr) } {
        Ok(attr) => attr,
        Err(err) => return err.errno(),
    };

    let arg_addr = arg as usize;
    let created = engine::create(&attr, move || {
        // SAFETY: the creator supplied a valid routine and argument.
        let rv = unsafe { start(arg_addr as *mut c_void) };
        rv as usize
    });
    match created {
        Ok(handle) => {
            // SAFETY: `thread_out` was validated non-null above.
            unsafe { thread_out.write(handle.id()) };
            0
        }
        Err(err) => err.errno(),
    }
}

/// Wait for `thread` and store its return value in `retval` (if non-null).
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn xpthread_join(thread: xpthread_t, retval: *mut *mut c_void) -> c_int {
    match engine::join(ThreadHandle::from_id(thread)) {
        Ok(value) => {
            if !retval.is_null() {
                // SAFETY: caller-provided output pointer.
                unsafe { retval.write(value as *mut c_void) };
            }
            0
        }
        Err(err) => err.errno(),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn xpthread_detach(thread: xpthread_t) -> c_int {
    status(engine::detach(ThreadHandle::from_id(thread)))
}

#[unsafe(no_mangle)]
pub extern "C" fn xpthread_self() -> xpthread_t {
    engine::self_handle().id()
}

/// Non-zero when both handles denote the same context.
#[unsafe(no_mangle)]
pub extern "C" fn xpthread_equal(a: xpthread_t, b: xpthread_t) -> c_int {
    c_int::from(engine::equal(
        ThreadHandle::from_id(a),
        ThreadHandle::from_id(b),
    ))
}

/// Terminate the calling context with `retval`.
#[unsafe(no_mangle)]
pub extern "C-unwind" fn xpthread_exit(retval: *mut c_void) -> ! {
    note_host_main_thread();
    engine::exit(retval as usize)
}

// ===========================================================================
// Cancellation
// ===========================================================================

#[unsafe(no_mangle)]
pub unsafe extern "C" fn xpthread_setcancelstate(state: c_int, old: *mut c_int) -> c_int {
    let state = match CancelState::from_raw(state) {
        Ok(state) => state,
        Err(err) => return err.errno(),
    };
    match engine::set_cancel_state(state) {
        Ok(previous) => {
            if !old.is_null() {
                // SAFETY: caller-provided output pointer.
                unsafe { old.write(previous.as_raw()) };
            }
            0
        }
        Err(err) => err.errno(),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn xpthread_setcanceltype(kind: c_int, old: *mut c_int) -> c_int {
    let kind = match CancelType::from_raw(kind) {
        Ok(kind) => kind,
        Err(err) => return err.errno(),
    };
    match engine::set_cancel_type(kind) {
        Ok(previous) => {
            if !old.is_null() {
                // SAFETY: caller-provided output pointer.
                unsafe { old.write(previous.as_raw()) };
            }
            0
        }
        Err(err) => err.errno(),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn xpthread_cancel(thread: xpthread_t) -> c_int {
    status(engine::request_cancel(ThreadHandle::from_id(thread)))
}

/// Cancellation checkpoint.
#[unsafe(no_mangle)]
pub extern "C-unwind" fn xpthread_testcancel() {
    note_host_main_thread();
    engine::test_cancel();
}

// ===========================================================================
// Mutex
// ===========================================================================

#[unsafe(no_mangle)]
pub unsafe extern "C" fn xpthread_mutex_init(mutex: *mut xpthread_mutex_t) -> c_int {
    if mutex.is_null() {
        return errno::EINVAL;
    }
    // SAFETY: non-null, caller contract.
    normalize(unsafe { backend::mutex_init(mutex) })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn xpthread_mutex_destroy(mutex: *mut xpthread_mutex_t) -> c_int {
    if mutex.is_null() {
        return errno::EINVAL;
    }
    // SAFETY: non-null, caller contract.
    normalize(unsafe { backend::mutex_destroy(mutex) })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn xpthread_mutex_lock(mutex: *mut xpthread_mutex_t) -> c_int {
    if mutex.is_null() {
        return errno::EINVAL;
    }
    // SAFETY: non-null, caller contract.
    normalize(unsafe { backend::mutex_lock(mutex) })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn xpthread_mutex_unlock(mutex: *mut xpthread_mutex_t) -> c_int {
    if mutex.is_null() {
        return errno::EINVAL;
    }
    // SAFETY: non-null, caller contract.
    normalize(unsafe { backend::mutex_unlock(mutex) })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn xpthread_mutex_trylock(mutex: *mut xpthread_mutex_t) -> c_int {
    if mutex.is_null() {
        return errno::EINVAL;
    }
    // SAFETY: non-null, caller contract.
    normalize(unsafe { backend::mutex_trylock(mutex) })
}

/// Acquire before the absolute `CLOCK_REALTIME` deadline `abstime`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn xpthread_mutex_timedlock(
    mutex: *mut xpthread_mutex_t,
    abstime: *const libc::timespec,
) -> c_int {
    if mutex.is_null() || abstime.is_null() {
        return errno::EINVAL;
    }
    // SAFETY: non-null, caller contract.
    let deadline = unsafe { &*abstime };
    // SAFETY: non-null, caller contract.
    normalize(unsafe { backend::mutex_timedlock(mutex, deadline) })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn xpthread_mutex_getprioceiling(
    mutex: *const xpthread_mutex_t,
    ceiling: *mut c_int,
) -> c_int {
    if mutex.is_null() || ceiling.is_null() {
        return errno::EINVAL;
    }
    // SAFETY: non-null, caller contract.
    normalize(unsafe { backend::mutex_getprioceiling(mutex.cast_mut(), ceiling) })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn xpthread_mutex_setprioceiling(
    mutex: *mut xpthread_mutex_t,
    ceiling: c_int,
    old: *mut c_int,
) -> c_int {
    if mutex.is_null() {
        return errno::EINVAL;
    }
    // SAFETY: non-null, caller contract.
    normalize(unsafe { backend::mutex_setprioceiling(mutex, ceiling, old) })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn xpthread_mutex_consistent(mutex: *mut xpthread_mutex_t) -> c_int {
    if mutex.is_null() {
        return errno::EINVAL;
    }
    // SAFETY: non-null, caller contract.
    normalize(unsafe { backend::mutex_consistent(mutex) })
}

// ===========================================================================
// Time
// ===========================================================================

/// Current realtime clock reading; `nanoseconds` is always in `[0, 1e9)`.
/// Either output pointer may be null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn xpthread_time_now(seconds: *mut i64, nanoseconds: *mut i64) {
    let (sec, nsec) = backend::time_now();
    if !seconds.is_null() {
        // SAFETY: caller-provided output pointer.
        unsafe { seconds.write(sec) };
    }
    if !nanoseconds.is_null() {
        // SAFETY: caller-provided output pointer.
        unsafe { nanoseconds.write(nsec) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_null_means_defaults() {
        // SAFETY: null is accepted.
        let attr = unsafe { thread_attr(std::ptr::null()) }.unwrap();
        assert_eq!(attr, ThreadAttr::default());
    }

    #[test]
    fn attr_fields_are_converted() {
        let raw = xpthread_attr_t {
            stack_size: 128 * 1024,
            name: c"abi-worker".as_ptr(),
        };
        // SAFETY: `raw` and its name outlive the call.
        let attr = unsafe { thread_attr(&raw) }.unwrap();
        assert_eq!(attr.stack_size, Some(128 * 1024));
        assert_eq!(attr.name.as_deref(), Some("abi-worker"));
    }

    #[test]
    fn normalize_folds_unknown_codes_to_einval() {
        assert_eq!(normalize(0), 0);
        assert_eq!(normalize(errno::EBUSY), errno::EBUSY);
        assert_eq!(normalize(errno::EPERM), errno::EINVAL);
        assert_eq!(normalize(errno::EDEADLK), errno::EINVAL);
    }

    #[test]
    fn backend_name_is_known() {
        // SAFETY: returns a static C string.
        let name = unsafe { CStr::from_ptr(xpthread_backend_name()) };
        assert!(matches!(name.to_str(), Ok("native" | "emulated")));
    }

    #[test]
    fn time_now_is_normalized() {
        let (mut sec, mut nsec) = (0i64, -1i64);
        // SAFETY: valid out-pointers.
        unsafe { xpthread_time_now(&mut sec, &mut nsec) };
        assert!(sec > 0);
        assert!((0..1_000_000_000).contains(&nsec));
    }
}
