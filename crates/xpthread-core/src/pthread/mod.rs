//! POSIX-style threading.
//!
//! One-time initialization, the exclusive lock, the execution-context
//! lifecycle and cooperative cancellation.

pub mod cancel;
#[allow(unsafe_code)]
pub mod mutex;
pub mod once;
pub mod thread;

pub use cancel::{
    CancelState, CancelType, XPTHREAD_CANCEL_ASYNCHRONOUS, XPTHREAD_CANCEL_DEFERRED,
    XPTHREAD_CANCEL_DISABLE, XPTHREAD_CANCEL_ENABLE, request_cancel, set_cancel_state,
    set_cancel_type, test_cancel,
};
pub use mutex::{
    Mutex, MutexContractOp, MutexContractOutcome, MutexContractState, contention_fairness_note,
    mutex_contract_transition, poll_until,
};
pub use once::OnceControl;
pub use thread::{
    THREAD_CANCELED, THREAD_DETACHED, THREAD_FINISHED, THREAD_JOINED, THREAD_RUNNING,
    THREAD_STARTING, ThreadAttr, ThreadHandle, create, detach, equal, exit, join, live_contexts,
    mark_main_thread, self_handle,
};
