//! Execution-context lifecycle: create, join, detach, self, equal, exit.
//!
//! ## Architecture
//!
//! Every context has a [`ContextRecord`] held by a process-wide registry,
//! keyed both by handle id and by the std `ThreadId` of the running thread.
//! The record carries the lifecycle state word, the return-value side
//! channel, the cancellation cell and the std join handle. Context state is
//! never kept in thread-local storage: the creator allocates the record, and
//! whichever of join, detach or termination comes last frees it. The one
//! thread-local is a guard that drops an adopted thread's record at exit.
//!
//! `exit` and cancellation terminate a context by writing the side channel
//! and unwinding with a private payload. The trampoline catches that payload,
//! so destructors on the context's stack run and the joiner still sees the
//! value. A genuine panic in an entry function is captured instead and
//! re-raised on the joiner.
//!
//! Threads the layer did not create (the main thread, foreign threads) are
//! adopted lazily the first time they ask for their own handle. They can be
//! detached and cancelled, but not joined. The main thread is never unwound:
//! when it exits or is cancelled it waits for every created context to
//! terminate and then ends the process with status 0.

use std::any::Any;
use std::cell::Cell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, OnceLock};
use std::thread::{self as std_thread, JoinHandle, ThreadId};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::errno::{self, XpthreadError};
use crate::pthread::cancel::CancelCell;
use crate::structured_log::{self, LogLevel, Outcome};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Thread state: created but the trampoline hasn't started yet.
pub const THREAD_STARTING: u32 = 0;

/// Thread state: the trampoline is running the entry function.
pub const THREAD_RUNNING: u32 = 1;

/// Thread state: the entry function returned or the context terminated;
/// return value stored.
pub const THREAD_FINISHED: u32 = 2;

/// Thread state: detached, record freed on termination (not joinable).
pub const THREAD_DETACHED: u32 = 3;

/// Thread state: joined, return value consumed, record freed.
pub const THREAD_JOINED: u32 = 4;

/// Return value delivered to the joiner of a context terminated by
/// cancellation (the all-ones word, like `PTHREAD_CANCELED`).
pub const THREAD_CANCELED: usize = usize::MAX;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Opaque identity of an execution context.
///
/// Handles are plain ids, so `equal` is structural and a handle obtained
/// from `self_handle` compares equal to the one `create` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadHandle(u64);

impl ThreadHandle {
    #[must_use]
    pub const fn from_id(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

/// Creation attributes. The default set means "no attributes".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadAttr {
    /// Stack size in bytes; the platform default when `None`.
    pub stack_size: Option<usize>,
    /// Thread name visible to debuggers and panic messages.
    pub name: Option<String>,
}

impl ThreadAttr {
    #[must_use]
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Context record and registry
// ---------------------------------------------------------------------------

/// Per-context control block owned by the registry.
pub(crate) struct ContextRecord {
    pub(crate) id: u64,
    /// Lifecycle state (see `THREAD_*` constants).
    state: AtomicU32,
    /// Return-value side channel: written by the context, read once by the joiner.
    retval: Mutex<Option<usize>>,
    pub(crate) cancel: CancelCell,
    join: Mutex<Option<JoinHandle<()>>>,
    panic: Mutex<Option<Box<dyn Any + Send + 'static>>>,
    adopted: bool,
}

impl ContextRecord {
    fn new(adopted: bool) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            state: AtomicU32::new(if adopted {
                THREAD_RUNNING
            } else {
                THREAD_STARTING
            }),
            retval: Mutex::new(None),
            cancel: CancelCell::new(),
            join: Mutex::new(None),
            panic: Mutex::new(None),
            adopted,
        })
    }

    pub(crate) fn set_retval(&self, value: usize) {
        *self.retval.lock() = Some(value);
    }
}

#[derive(Default)]
struct Registry {
    contexts: HashMap<u64, Arc<ContextRecord>>,
    by_thread: HashMap<ThreadId, Arc<ContextRecord>>,
}

static REGISTRY: LazyLock<Mutex<Registry>> = LazyLock::new(|| Mutex::new(Registry::default()));
/// Signalled, under the registry lock, whenever a created context terminates.
static TERMINATED: Condvar = Condvar::new();
static MAIN_THREAD: OnceLock<ThreadId> = OnceLock::new();

/// Payload carried by the unwind that terminates a context.
pub(crate) struct ContextExit;

pub(crate) fn lookup(handle: ThreadHandle) -> Option<Arc<ContextRecord>> {
    REGISTRY.lock().contexts.get(&handle.0).cloned()
}

/// Record of the calling thread, if it has one.
pub(crate) fn current_record() -> Option<Arc<ContextRecord>> {
    REGISTRY
        .lock()
        .by_thread
        .get(&std_thread::current().id())
        .cloned()
}

/// Record of the calling thread, adopting the thread if needed.
pub(crate) fn current_or_adopt() -> Arc<ContextRecord> {
    let tid = std_thread::current().id();
    let mut reg = REGISTRY.lock();
    if let Some(record) = reg.by_thread.get(&tid) {
        return Arc::clone(record);
    }
    let record = ContextRecord::new(true);
    reg.contexts.insert(record.id, Arc::clone(&record));
    reg.by_thread.insert(tid, Arc::clone(&record));
    drop(reg);
    let _ = ADOPTION.try_with(|guard| guard.0.set(Some((record.id, tid))));
    record
}

/// Terminate the calling context. The side channel must already hold the
/// value the joiner should see.
///
/// Created contexts and adopted non-main threads unwind; the main thread
/// retires instead (see [`retire_main_thread`]).
pub(crate) fn terminate(record: Arc<ContextRecord>) -> ! {
    if record.adopted && is_main_thread() {
        retire_main_thread(record)
    }
    drop(record);
    panic::resume_unwind(Box::new(ContextExit))
}

/// Record the calling thread as the process's main thread.
///
/// Rust programs need not call this: the runtime names its main thread
/// `main`. Embedders whose main thread is not a Rust one (a C `main`) call
/// it from that thread before it may exit or be cancelled. Later calls are
/// ignored.
pub fn mark_main_thread() {
    let _ = MAIN_THREAD.set(std_thread::current().id());
}

fn is_main_thread() -> bool {
    let current = std_thread::current();
    match MAIN_THREAD.get() {
        Some(id) => *id == current.id(),
        None => current.name() == Some("main"),
    }
}

/// Count of created contexts that have not terminated yet.
fn running_contexts(reg: &Registry) -> usize {
    reg.contexts
        .values()
        .filter(|r| {
            !r.adopted
                && matches!(
                    r.state.load(Ordering::Acquire),
                    THREAD_STARTING | THREAD_RUNNING | THREAD_DETACHED
                )
        })
        .count()
}

/// End the main thread the way POSIX does: the process outlives it until
/// the last created context terminates, then exits with status 0.
fn retire_main_thread(record: Arc<ContextRecord>) -> ! {
    let mut reg = REGISTRY.lock();
    reg.contexts.remove(&record.id);
    reg.by_thread.remove(&std_thread::current().id());
    drop(record);
    loop {
        let pending = running_contexts(&reg);
        if pending == 0 {
            break;
        }
        structured_log::emit(LogLevel::Debug, "thread.main.waiting", |e| {
            e.with_api("threading", "xpthread_exit")
                .with_details(serde_json::json!({ "pending": pending }))
        });
        TERMINATED.wait(&mut reg);
    }
    drop(reg);
    structured_log::emit(LogLevel::Info, "thread.main.retired", |e| {
        e.with_api("threading", "xpthread_exit")
            .with_outcome(Outcome::Pass)
    });
    std::process::exit(0)
}

fn free(id: u64) {
    REGISTRY.lock().contexts.remove(&id);
}

/// Drops the registry entries of an adopted thread when it exits.
struct AdoptionGuard(Cell<Option<(u64, ThreadId)>>);

impl Drop for AdoptionGuard {
    fn drop(&mut self) {
        if let Some((id, tid)) = self.0.get() {
            let mut reg = REGISTRY.lock();
            reg.by_thread.remove(&tid);
            reg.contexts.remove(&id);
        }
    }
}

std::thread_local! {
    static ADOPTION: AdoptionGuard = const { AdoptionGuard(Cell::new(None)) };
}

/// Number of context records currently held (diagnostics and tests).
#[must_use]
pub fn live_contexts() -> usize {
    REGISTRY.lock().contexts.len()
}

// ---------------------------------------------------------------------------
// Trampoline
// ---------------------------------------------------------------------------

fn trampoline<F>(record: Arc<ContextRecord>, entry: F)
where
    F: FnOnce() -> usize,
{
    let tid = std_thread::current().id();
    REGISTRY.lock().by_thread.insert(tid, Arc::clone(&record));
    // A detach that raced ahead keeps THREAD_DETACHED.
    let _ = record.state.compare_exchange(
        THREAD_STARTING,
        THREAD_RUNNING,
        Ordering::AcqRel,
        Ordering::Acquire,
    );

    match panic::catch_unwind(AssertUnwindSafe(entry)) {
        Ok(value) => record.set_retval(value),
        Err(payload) if payload.is::<ContextExit>() => {}
        Err(payload) => *record.panic.lock() = Some(payload),
    }

    let mut reg = REGISTRY.lock();
    reg.by_thread.remove(&tid);
    // The transition happens under the registry lock so a retiring main
    // thread cannot miss it between its count and its wait.
    if record
        .state
        .compare_exchange(
            THREAD_RUNNING,
            THREAD_FINISHED,
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .is_err()
    {
        // Detached: nobody will join, so termination frees the record.
        reg.contexts.remove(&record.id);
    }
    drop(reg);
    TERMINATED.notify_all();
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Start a new context running `entry`; returns without waiting for it to run.
///
/// The value `entry` returns is delivered to the joiner, unless the context
/// terminates earlier through [`exit`] or cancellation.
pub fn create<F>(attr: &ThreadAttr, entry: F) -> Result<ThreadHandle, XpthreadError>
where
    F: FnOnce() -> usize + Send + 'static,
{
    let mut builder = std_thread::Builder::new();
    if let Some(bytes) = attr.stack_size {
        builder = builder.stack_size(bytes);
    }
    if let Some(name) = &attr.name {
        if name.contains('\0') {
            return Err(XpthreadError::InvalidArgument);
        }
        builder = builder.name(name.clone());
    }

    let record = ContextRecord::new(false);
    let id = record.id;
    REGISTRY.lock().contexts.insert(id, Arc::clone(&record));

    let child = Arc::clone(&record);
    match builder.spawn(move || trampoline(child, entry)) {
        Ok(join) => {
            *record.join.lock() = Some(join);
            structured_log::emit(LogLevel::Info, "thread.create", |e| {
                e.with_api("threading", "xpthread_create")
                    .with_context(id)
                    .with_outcome(Outcome::Pass)
            });
            Ok(ThreadHandle(id))
        }
        Err(err) => {
            free(id);
            structured_log::emit(LogLevel::Error, "thread.create.failed", |e| {
                e.with_api("threading", "xpthread_create")
                    .with_outcome(Outcome::Fail)
                    .with_errno(errno::EAGAIN)
                    .with_details(serde_json::json!({ "reason": err.to_string() }))
            });
            Err(XpthreadError::ResourceUnavailable)
        }
    }
}

/// Wait for `handle` to terminate and take its return value.
///
/// Unknown handles (never created, already joined, detached and gone),
/// adopted threads and the caller itself yield `InvalidArgument`. A panic
/// that escaped the context's entry function resumes on the caller.
pub fn join(handle: ThreadHandle) -> Result<usize, XpthreadError> {
    let started = Instant::now();
    let record = {
        let reg = REGISTRY.lock();
        let record = reg
            .contexts
            .get(&handle.0)
            .cloned()
            .ok_or(XpthreadError::InvalidArgument)?;
        let is_self = reg
            .by_thread
            .get(&std_thread::current().id())
            .is_some_and(|me| me.id == handle.0);
        if record.adopted || is_self {
            return Err(XpthreadError::InvalidArgument);
        }
        record
    };

    let join = record
        .join
        .lock()
        .take()
        .ok_or(XpthreadError::InvalidArgument)?;
    if let Err(payload) = join.join() {
        panic::resume_unwind(payload);
    }

    record.state.store(THREAD_JOINED, Ordering::Release);
    free(record.id);

    let value = record.retval.lock().take().unwrap_or(0);
    structured_log::emit(LogLevel::Info, "thread.join", |e| {
        e.with_api("threading", "xpthread_join")
            .with_context(record.id)
            .with_outcome(Outcome::Pass)
            .with_latency_ns(u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX))
    });

    if let Some(payload) = record.panic.lock().take() {
        panic::resume_unwind(payload);
    }
    Ok(value)
}

/// Give up the obligation to join `handle`; its record is freed when it
/// terminates (or now, if it already has).
pub fn detach(handle: ThreadHandle) -> Result<(), XpthreadError> {
    let record = lookup(handle).ok_or(XpthreadError::InvalidArgument)?;
    // Dropping the std handle detaches the OS thread.
    drop(record.join.lock().take());

    let mut current = record.state.load(Ordering::Acquire);
    loop {
        match current {
            THREAD_STARTING | THREAD_RUNNING => match record.state.compare_exchange(
                current,
                THREAD_DETACHED,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(now) => current = now,
            },
            THREAD_FINISHED => {
                let mut reg = REGISTRY.lock();
                record.state.store(THREAD_DETACHED, Ordering::Release);
                reg.contexts.remove(&record.id);
                break;
            }
            _ => return Err(XpthreadError::InvalidArgument),
        }
    }

    structured_log::emit(LogLevel::Info, "thread.detach", |e| {
        e.with_api("threading", "xpthread_detach")
            .with_context(record.id)
            .with_outcome(Outcome::Pass)
    });
    Ok(())
}

/// Handle of the calling context.
#[must_use]
pub fn self_handle() -> ThreadHandle {
    ThreadHandle(current_or_adopt().id)
}

/// Identity comparison of two handles.
#[must_use]
pub fn equal(a: ThreadHandle, b: ThreadHandle) -> bool {
    a == b
}

/// Terminate the calling context, delivering `value` to its joiner.
///
/// The context's stack unwinds, so pending destructors run. Code that wraps
/// the call in `catch_unwind` intercepts the termination. On the main thread
/// nothing unwinds: the process ends with status 0 once every created
/// context has terminated.
pub fn exit(value: usize) -> ! {
    let record = current_or_adopt();
    record.set_retval(value);
    structured_log::emit(LogLevel::Info, "thread.exit", |e| {
        e.with_api("threading", "xpthread_exit")
            .with_context(record.id)
    });
    terminate(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    #[test]
    fn create_and_join_returns_value() {
        let h = create(&ThreadAttr::default(), || 42).unwrap();
        assert_eq!(join(h).unwrap(), 42);
    }

    #[test]
    fn child_can_write_shared_memory() {
        let shared = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&shared);
        let h = create(&ThreadAttr::default(), move || {
            s.store(0xDEAD, Ordering::SeqCst);
            0
        })
        .unwrap();
        join(h).unwrap();
        assert_eq!(shared.load(Ordering::SeqCst), 0xDEAD);
    }

    #[test]
    fn multiple_contexts_created_and_joined() {
        let handles: Vec<_> = (0..8usize)
            .map(|i| create(&ThreadAttr::default(), move || i * 3).unwrap())
            .collect();
        for (i, h) in handles.into_iter().enumerate() {
            assert_eq!(join(h).unwrap(), i * 3);
        }
    }

    #[test]
    fn exit_unwinds_and_delivers_value() {
        let dropped = Arc::new(AtomicBool::new(false));
        let d = Arc::clone(&dropped);
        let h = create(&ThreadAttr::default(), move || {
            struct Flag(Arc<AtomicBool>);
            impl Drop for Flag {
                fn drop(&mut self) {
                    self.0.store(true, Ordering::SeqCst);
                }
            }
            let _flag = Flag(d);
            exit(7);
        })
        .unwrap();
        assert_eq!(join(h).unwrap(), 7);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn self_handle_matches_create_handle() {
        let (tx, rx) = std::sync::mpsc::channel();
        let h = create(&ThreadAttr::default(), move || {
            tx.send(self_handle()).unwrap();
            0
        })
        .unwrap();
        let seen = rx.recv().unwrap();
        assert!(equal(seen, h));
        join(h).unwrap();
    }

    #[test]
    fn attributes_are_honored() {
        let attr = ThreadAttr::default()
            .with_stack_size(256 * 1024)
            .with_name("xp-worker");
        let h = create(&attr, || {
            usize::from(std_thread::current().name() == Some("xp-worker"))
        })
        .unwrap();
        assert_eq!(join(h).unwrap(), 1);
    }

    #[test]
    fn name_with_nul_is_invalid() {
        let attr = ThreadAttr::default().with_name("bad\0name");
        assert_eq!(create(&attr, || 0), Err(XpthreadError::InvalidArgument));
    }

    #[test]
    fn detach_frees_record_on_termination() {
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        let h = create(&ThreadAttr::default(), move || {
            let _ = rx.recv();
            0
        })
        .unwrap();
        detach(h).unwrap();
        assert!(lookup(h).is_some());
        tx.send(()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while lookup(h).is_some() && Instant::now() < deadline {
            std_thread::sleep(Duration::from_millis(1));
        }
        assert!(lookup(h).is_none());
        assert_eq!(join(h), Err(XpthreadError::InvalidArgument));
    }

    #[test]
    fn detach_after_finish_frees_immediately() {
        let h = create(&ThreadAttr::default(), || 5).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while lookup(h).is_some_and(|r| r.state.load(Ordering::Acquire) != THREAD_FINISHED)
            && Instant::now() < deadline
        {
            std_thread::sleep(Duration::from_millis(1));
        }
        detach(h).unwrap();
        assert!(lookup(h).is_none());
    }

    #[test]
    fn join_unknown_handle_is_invalid() {
        assert_eq!(
            join(ThreadHandle::from_id(u64::MAX)),
            Err(XpthreadError::InvalidArgument)
        );
        assert_eq!(
            detach(ThreadHandle::from_id(u64::MAX)),
            Err(XpthreadError::InvalidArgument)
        );
    }

    #[test]
    fn join_twice_is_invalid() {
        let h = create(&ThreadAttr::default(), || 1).unwrap();
        assert_eq!(join(h), Ok(1));
        assert_eq!(join(h), Err(XpthreadError::InvalidArgument));
    }

    #[test]
    fn joining_adopted_thread_is_invalid() {
        let me = self_handle();
        assert_eq!(join(me), Err(XpthreadError::InvalidArgument));
    }

    #[test]
    fn entry_panic_resumes_on_joiner() {
        let h = create(&ThreadAttr::default(), || panic!("boom")).unwrap();
        let caught = panic::catch_unwind(|| join(h));
        let payload = caught.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"boom"));
    }
}
