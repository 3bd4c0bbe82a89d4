//! Exclusive lock with blocking, non-blocking and deadline acquisition.
//!
//! [`Mutex`] wraps a `parking_lot` raw lock. It is non-reentrant: relocking
//! from the holder deadlocks, exactly like the default POSIX mutex type.
//! `timed_lock` is the polling emulation (bounded `try_lock` retries with a
//! deadline check each round and one final attempt at expiry).
//!
//! The abstract state machine the call surface follows is written out in
//! [`mutex_contract_transition`].

use std::thread;
use std::time::{Duration, Instant};

use parking_lot::lock_api::RawMutex as _;

use crate::backend::{BackendKind, Capabilities};
use crate::config;
use crate::errno::{self, Status, XpthreadError};
use crate::structured_log::{self, LogLevel, Outcome};
use crate::time::{self, Timespec};

// ---------------------------------------------------------------------------
// Semantics contract
// ---------------------------------------------------------------------------

/// Abstract mutex state used by the transition contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexContractState {
    /// Memory has not been initialized as a mutex object.
    Uninitialized,
    /// Mutex is initialized and currently unlocked.
    Unlocked,
    /// Mutex is locked by the calling context.
    LockedBySelf,
    /// Mutex is locked by a different context.
    LockedByOther,
    /// Mutex has been destroyed and must be reinitialized before reuse.
    Destroyed,
}

/// Contract-level operation set for mutex transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexContractOp {
    Init,
    Lock,
    TryLock,
    /// Deadline acquisition; outcomes describe the deadline expiring.
    TimedLock,
    Unlock,
    Destroy,
}

/// Deterministic transition result for a contract operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutexContractOutcome {
    /// Next abstract state after applying the operation.
    pub next: MutexContractState,
    /// Reported status.
    pub status: Status,
    /// Whether the operation may block awaiting progress by another context.
    pub blocks: bool,
}

const fn outcome(next: MutexContractState, status: Status, blocks: bool) -> MutexContractOutcome {
    MutexContractOutcome {
        next,
        status,
        blocks,
    }
}

/// Contention/fairness note for the lock path.
#[must_use]
pub const fn contention_fairness_note() -> &'static str {
    "Adaptive path: uncontended CAS fast path, brief spinning, then parking. Wake order is \
not FIFO and any waiter may acquire next; a blocked lock() never observes cancellation. \
timed_lock polls try_lock at the configured interval, so timeouts are coarse by up to one \
interval."
}

/// Transition contract for the non-reentrant mutex.
///
/// Operations that POSIX leaves undefined (use before init or after destroy,
/// unlocking a mutex not held) report `InvalidArgument` here; the
/// implementation does not check for them beyond what falls out naturally.
///
/// `Init` on an unlocked mutex is a plain reinitialization, as glibc does it.
/// `Init` on a held mutex reports `Busy` in the model only: neither the
/// engine nor the C objects can tell initialized memory from garbage, so a
/// live reinitialization always succeeds.
#[must_use]
pub const fn mutex_contract_transition(
    state: MutexContractState,
    op: MutexContractOp,
) -> MutexContractOutcome {
    use MutexContractOp as Op;
    use MutexContractState as S;

    match state {
        S::Uninitialized | S::Destroyed => match op {
            Op::Init => outcome(S::Unlocked, Status::Ok, false),
            _ => outcome(state, Status::InvalidArgument, false),
        },
        S::Unlocked => match op {
            Op::Init => outcome(S::Unlocked, Status::Ok, false),
            Op::Lock | Op::TryLock | Op::TimedLock => outcome(S::LockedBySelf, Status::Ok, false),
            Op::Unlock => outcome(S::Unlocked, Status::InvalidArgument, false),
            Op::Destroy => outcome(S::Destroyed, Status::Ok, false),
        },
        S::LockedByOther => match op {
            Op::Init | Op::Destroy | Op::TryLock => outcome(state, Status::Busy, false),
            Op::Lock => outcome(state, Status::Ok, true),
            Op::TimedLock => outcome(state, Status::TimedOut, true),
            Op::Unlock => outcome(state, Status::InvalidArgument, false),
        },
        S::LockedBySelf => match op {
            Op::Init | Op::Destroy | Op::TryLock => outcome(state, Status::Busy, false),
            // Non-reentrant: relocking waits on itself forever.
            Op::Lock => outcome(state, Status::Ok, true),
            Op::TimedLock => outcome(state, Status::TimedOut, true),
            Op::Unlock => outcome(S::Unlocked, Status::Ok, false),
        },
    }
}

// ---------------------------------------------------------------------------
// Deadline polling
// ---------------------------------------------------------------------------

/// Retry `attempt` every `interval` until it succeeds or `remaining` has
/// elapsed, then make one final attempt.
///
/// Elapsed time is measured on the monotonic clock rather than by summing
/// sleeps, so oversleeping never stretches the timeout.
pub fn poll_until(remaining: Duration, interval: Duration, mut attempt: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    loop {
        if attempt() {
            return true;
        }
        let elapsed = start.elapsed();
        if elapsed >= remaining {
            break;
        }
        thread::sleep(interval.min(remaining - elapsed));
    }
    attempt()
}

// ---------------------------------------------------------------------------
// Mutex
// ---------------------------------------------------------------------------

/// Non-reentrant exclusive lock.
///
/// Holding is not tied to a guard: `lock` and `unlock` are paired by the
/// caller, as with `pthread_mutex_t`. Any context may release a lock that is
/// held; releasing one the caller does not hold is misuse and is only
/// detected when the lock is not held at all.
pub struct Mutex {
    raw: parking_lot::RawMutex,
}

impl Mutex {
    /// Statically initialized, unlocked mutex.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            raw: <parking_lot::RawMutex as parking_lot::lock_api::RawMutex>::INIT,
        }
    }

    /// Explicit initialization. Cannot run out of memory: the lock is a
    /// single word with no side allocation.
    pub fn init() -> Result<Self, XpthreadError> {
        Ok(Self::new())
    }

    /// Check that the mutex can be retired.
    ///
    /// A held mutex reports `Busy` and stays usable.
    pub fn destroy(&self) -> Result<(), XpthreadError> {
        if self.raw.is_locked() {
            return Err(XpthreadError::Busy);
        }
        Ok(())
    }

    /// Block until the caller is the sole holder. Never a cancellation point.
    pub fn lock(&self) -> Result<(), XpthreadError> {
        self.raw.lock();
        Ok(())
    }

    /// Acquire without blocking; `Busy` if any context holds the lock.
    pub fn try_lock(&self) -> Result<(), XpthreadError> {
        if self.raw.try_lock() {
            Ok(())
        } else {
            Err(XpthreadError::Busy)
        }
    }

    /// Release the lock.
    pub fn unlock(&self) -> Result<(), XpthreadError> {
        if !self.raw.is_locked() {
            return Err(XpthreadError::InvalidArgument);
        }
        // SAFETY: the lock is held. `parking_lot::RawMutex` carries no owner
        // and its guards are `Send`, so release from any context is sound;
        // pairing with the acquiring context is the caller's contract.
        unsafe { self.raw.unlock() };
        Ok(())
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// Acquire before the absolute realtime `deadline`, polling at the
    /// configured interval.
    ///
    /// A deadline that is not in the future times out immediately without
    /// touching the lock.
    pub fn timed_lock(&self, deadline: Timespec) -> Result<(), XpthreadError> {
        self.timed_lock_with_interval(deadline, config::poll_interval())
    }

    /// [`Mutex::timed_lock`] with an explicit polling interval.
    pub fn timed_lock_with_interval(
        &self,
        deadline: Timespec,
        interval: Duration,
    ) -> Result<(), XpthreadError> {
        let started = Instant::now();
        let Some(remaining) = deadline.remaining_since(time::now()) else {
            log_timeout(started, "expired");
            return Err(XpthreadError::TimedOut);
        };
        if poll_until(remaining, interval, || self.raw.try_lock()) {
            Ok(())
        } else {
            log_timeout(started, "polled");
            Err(XpthreadError::TimedOut)
        }
    }

    /// Priority ceiling; always 0 because the lock has no priority protocol.
    pub fn get_priority_ceiling(&self) -> Result<i32, XpthreadError> {
        Ok(0)
    }

    /// Accepts any ceiling, enforces none, and reports the old ceiling as 0.
    pub fn set_priority_ceiling(&self, _ceiling: i32) -> Result<i32, XpthreadError> {
        Ok(0)
    }

    /// Accepted and inert: the lock never enters an inconsistent state.
    pub fn mark_consistent(&self) -> Result<(), XpthreadError> {
        Ok(())
    }

    /// What this mutex actually enforces.
    #[must_use]
    pub const fn capabilities() -> Capabilities {
        BackendKind::Emulated.capabilities()
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Mutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.is_locked())
            .finish()
    }
}

fn log_timeout(started: Instant, path: &'static str) {
    structured_log::emit(LogLevel::Debug, "mutex.timedlock.timeout", |e| {
        e.with_api("threading", "xpthread_mutex_timedlock")
            .with_outcome(Outcome::Timeout)
            .with_errno(errno::ETIMEDOUT)
            .with_latency_ns(u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX))
            .with_details(serde_json::json!({ "path": path }))
    });
}
