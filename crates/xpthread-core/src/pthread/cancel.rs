//! Cooperative cancellation.
//!
//! Each context carries a [`CancelCell`]: an enable flag, a type flag and a
//! pending-request flag. `request_cancel` only sets the pending flag; the
//! target terminates when it reaches [`test_cancel`] with cancellation
//! enabled. No other call is a checkpoint. A context blocked in
//! `Mutex::lock` or `join` never observes a request, and the asynchronous
//! type is recorded without changing delivery.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::errno::XpthreadError;
use crate::pthread::thread::{self, THREAD_CANCELED, ThreadHandle};
use crate::structured_log::{self, LogLevel};

/// C value of [`CancelState::Enable`].
pub const XPTHREAD_CANCEL_ENABLE: i32 = 1;
/// C value of [`CancelState::Disable`].
pub const XPTHREAD_CANCEL_DISABLE: i32 = 0;
/// C value of [`CancelType::Deferred`].
pub const XPTHREAD_CANCEL_DEFERRED: i32 = 0;
/// C value of [`CancelType::Asynchronous`].
pub const XPTHREAD_CANCEL_ASYNCHRONOUS: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelState {
    Enable,
    Disable,
}

impl CancelState {
    pub const fn from_raw(raw: i32) -> Result<Self, XpthreadError> {
        match raw {
            XPTHREAD_CANCEL_ENABLE => Ok(Self::Enable),
            XPTHREAD_CANCEL_DISABLE => Ok(Self::Disable),
            _ => Err(XpthreadError::InvalidArgument),
        }
    }

    #[must_use]
    pub const fn as_raw(self) -> i32 {
        match self {
            Self::Enable => XPTHREAD_CANCEL_ENABLE,
            Self::Disable => XPTHREAD_CANCEL_DISABLE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelType {
    Deferred,
    /// Tracked only; requests are still acted on at checkpoints.
    Asynchronous,
}

impl CancelType {
    pub const fn from_raw(raw: i32) -> Result<Self, XpthreadError> {
        match raw {
            XPTHREAD_CANCEL_DEFERRED => Ok(Self::Deferred),
            XPTHREAD_CANCEL_ASYNCHRONOUS => Ok(Self::Asynchronous),
            _ => Err(XpthreadError::InvalidArgument),
        }
    }

    #[must_use]
    pub const fn as_raw(self) -> i32 {
        match self {
            Self::Deferred => XPTHREAD_CANCEL_DEFERRED,
            Self::Asynchronous => XPTHREAD_CANCEL_ASYNCHRONOUS,
        }
    }
}

/// Per-context cancellation state. New contexts start enabled and deferred.
pub(crate) struct CancelCell {
    enabled: AtomicBool,
    asynchronous: AtomicBool,
    pending: AtomicBool,
}

impl CancelCell {
    pub(crate) const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            asynchronous: AtomicBool::new(false),
            pending: AtomicBool::new(false),
        }
    }

    fn swap_state(&self, state: CancelState) -> CancelState {
        if self
            .enabled
            .swap(state == CancelState::Enable, Ordering::AcqRel)
        {
            CancelState::Enable
        } else {
            CancelState::Disable
        }
    }

    fn swap_type(&self, kind: CancelType) -> CancelType {
        if self
            .asynchronous
            .swap(kind == CancelType::Asynchronous, Ordering::AcqRel)
        {
            CancelType::Asynchronous
        } else {
            CancelType::Deferred
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    fn should_terminate(&self) -> bool {
        self.enabled.load(Ordering::Acquire) && self.is_pending()
    }
}

impl std::fmt::Debug for CancelCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelCell")
            .field("enabled", &self.enabled.load(Ordering::Relaxed))
            .field("asynchronous", &self.asynchronous.load(Ordering::Relaxed))
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// Set the calling context's cancel state and return the previous one.
///
/// Disabling suppresses termination; a pending request stays pending and is
/// acted on at the first checkpoint after re-enabling.
pub fn set_cancel_state(state: CancelState) -> Result<CancelState, XpthreadError> {
    Ok(thread::current_or_adopt().cancel.swap_state(state))
}

/// Set the calling context's cancel type and return the previous one.
pub fn set_cancel_type(kind: CancelType) -> Result<CancelType, XpthreadError> {
    Ok(thread::current_or_adopt().cancel.swap_type(kind))
}

/// Mark `target` as cancel-requested. Never blocks and never waits for the
/// target to notice.
pub fn request_cancel(target: ThreadHandle) -> Result<(), XpthreadError> {
    let record = thread::lookup(target).ok_or(XpthreadError::InvalidArgument)?;
    record.cancel.pending.store(true, Ordering::Release);
    structured_log::emit(LogLevel::Info, "cancel.request", |e| {
        e.with_api("threading", "xpthread_cancel")
            .with_context(record.id)
    });
    Ok(())
}

/// Checkpoint: terminate the calling context if cancellation is enabled and
/// requested. The joiner receives [`THREAD_CANCELED`].
pub fn test_cancel() {
    let Some(record) = thread::current_record() else {
        return;
    };
    if !record.cancel.should_terminate() {
        return;
    }
    record.set_retval(THREAD_CANCELED);
    structured_log::emit(LogLevel::Info, "cancel.acted", |e| {
        e.with_api("threading", "xpthread_testcancel")
            .with_context(record.id)
    });
    thread::terminate(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pthread::thread::{ThreadAttr, create, join, self_handle};
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    #[test]
    fn raw_values_roundtrip_and_reject_unknown() {
        assert_eq!(CancelState::from_raw(1), Ok(CancelState::Enable));
        assert_eq!(CancelState::from_raw(0), Ok(CancelState::Disable));
        assert_eq!(CancelState::from_raw(2), Err(XpthreadError::InvalidArgument));
        assert_eq!(CancelType::from_raw(1), Ok(CancelType::Asynchronous));
        assert_eq!(CancelType::from_raw(-1), Err(XpthreadError::InvalidArgument));
        assert_eq!(CancelState::Disable.as_raw(), XPTHREAD_CANCEL_DISABLE);
    }

    #[test]
    fn set_state_returns_previous() {
        let h = create(&ThreadAttr::default(), || {
            let first = set_cancel_state(CancelState::Disable).unwrap();
            let second = set_cancel_state(CancelState::Enable).unwrap();
            usize::from(first == CancelState::Enable && second == CancelState::Disable)
        })
        .unwrap();
        assert_eq!(join(h).unwrap(), 1);
    }

    #[test]
    fn set_type_is_tracked() {
        let h = create(&ThreadAttr::default(), || {
            let first = set_cancel_type(CancelType::Asynchronous).unwrap();
            let second = set_cancel_type(CancelType::Deferred).unwrap();
            usize::from(first == CancelType::Deferred && second == CancelType::Asynchronous)
        })
        .unwrap();
        assert_eq!(join(h).unwrap(), 1);
    }

    #[test]
    fn enabled_request_terminates_at_checkpoint() {
        let reached = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&reached);
        let h = create(&ThreadAttr::default(), move || {
            request_cancel(self_handle()).unwrap();
            test_cancel();
            r.store(1, Ordering::SeqCst);
            0
        })
        .unwrap();
        assert_eq!(join(h).unwrap(), THREAD_CANCELED);
        assert_eq!(reached.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn disabled_request_stays_pending() {
        let (tx, rx) = mpsc::channel();
        let h = create(&ThreadAttr::default(), move || {
            set_cancel_state(CancelState::Disable).unwrap();
            request_cancel(self_handle()).unwrap();
            test_cancel();
            tx.send(()).unwrap();
            set_cancel_state(CancelState::Enable).unwrap();
            test_cancel();
            0
        })
        .unwrap();
        assert_eq!(join(h).unwrap(), THREAD_CANCELED);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn request_from_another_context() {
        let (go_tx, go_rx) = mpsc::channel::<()>();
        let h = create(&ThreadAttr::default(), move || {
            let _ = go_rx.recv();
            test_cancel();
            3
        })
        .unwrap();
        request_cancel(h).unwrap();
        go_tx.send(()).unwrap();
        assert_eq!(join(h).unwrap(), THREAD_CANCELED);
    }

    #[test]
    fn request_unknown_handle_is_invalid() {
        assert_eq!(
            request_cancel(ThreadHandle::from_id(u64::MAX)),
            Err(XpthreadError::InvalidArgument)
        );
    }

    #[test]
    fn checkpoint_without_record_is_noop() {
        std::thread::spawn(test_cancel).join().unwrap();
    }
}
