//! One-time initialization.
//!
//! [`OnceControl`] is a tri-state token (uninitialized, in progress, done).
//! The first caller to move it out of `UNINIT` runs the initializer; every
//! concurrent caller parks on a condition variable until the state reaches
//! `DONE`. The `DONE` store is `Release` and every read of it is `Acquire`,
//! so all writes made by the initializer happen-before any follower returns.
//!
//! If the initializer unwinds (a panic, [`crate::pthread::thread::exit`], or
//! cancellation at a checkpoint) the control falls back to `UNINIT`, parked
//! followers are woken, and one of them becomes the new runner.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::errno::XpthreadError;
use crate::structured_log::{self, LogLevel};

/// No initializer has run.
pub const ONCE_UNINIT: u8 = 0;
/// One caller is executing the initializer.
pub const ONCE_IN_PROGRESS: u8 = 1;
/// The initializer completed; the control never changes again.
pub const ONCE_DONE: u8 = 2;

/// Shared one-time initialization token.
///
/// `const`-constructible, so it can live in a `static` the way
/// `PTHREAD_ONCE_INIT` does.
pub struct OnceControl {
    state: AtomicU8,
    lock: Mutex<()>,
    cvar: Condvar,
}

impl OnceControl {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(ONCE_UNINIT),
            lock: Mutex::new(()),
            cvar: Condvar::new(),
        }
    }

    /// Current state (`ONCE_UNINIT`, `ONCE_IN_PROGRESS` or `ONCE_DONE`).
    #[must_use]
    pub fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state() == ONCE_DONE
    }

    /// Run `init` unless some caller already ran it to completion.
    ///
    /// Calling `run_once` on the same control from inside `init` deadlocks,
    /// as the POSIX primitive does; it is not guarded against.
    ///
    /// The engine cannot fail to engage, so this only ever returns `Ok`; the
    /// `Result` keeps the signature aligned with the C surface.
    pub fn run_once<F: FnOnce()>(&self, init: F) -> Result<(), XpthreadError> {
        if self.is_done() {
            return Ok(());
        }

        loop {
            match self.state.compare_exchange(
                ONCE_UNINIT,
                ONCE_IN_PROGRESS,
                Ordering::Acquire,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.run_initializer(init);
                    return Ok(());
                }
                Err(ONCE_DONE) => return Ok(()),
                Err(_) => {
                    let mut guard = self.lock.lock();
                    while self.state.load(Ordering::Acquire) == ONCE_IN_PROGRESS {
                        self.cvar.wait(&mut guard);
                    }
                    drop(guard);
                    if self.is_done() {
                        return Ok(());
                    }
                    // The runner unwound; race for the slot again.
                }
            }
        }
    }

    fn run_initializer<F: FnOnce()>(&self, init: F) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(init));
        let next = if outcome.is_ok() {
            ONCE_DONE
        } else {
            ONCE_UNINIT
        };
        {
            // Publish under the lock so no follower misses the wakeup between
            // its state check and its wait.
            let _guard = self.lock.lock();
            self.state.store(next, Ordering::Release);
        }
        self.cvar.notify_all();

        match outcome {
            Ok(()) => structured_log::emit(LogLevel::Debug, "once.run", |e| {
                e.with_api("threading", "xpthread_once")
            }),
            Err(payload) => {
                structured_log::emit(LogLevel::Warn, "once.unwound", |e| {
                    e.with_api("threading", "xpthread_once")
                });
                panic::resume_unwind(payload);
            }
        }
    }
}

impl Default for OnceControl {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OnceControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnceControl")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
