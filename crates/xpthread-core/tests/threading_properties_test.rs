use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use xpthread_core::errno::XpthreadError;
use xpthread_core::pthread::{
    CancelState, Mutex, OnceControl, THREAD_CANCELED, ThreadAttr, ThreadHandle, create, equal,
    exit, join, request_cancel, self_handle, set_cancel_state, test_cancel,
};
use xpthread_core::time;

fn spawn<F>(entry: F) -> ThreadHandle
where
    F: FnOnce() -> usize + Send + 'static,
{
    create(&ThreadAttr::default(), entry).expect("create context")
}

#[test]
fn once_runs_exactly_once_under_contention() {
    static CONTROL: OnceControl = OnceControl::new();
    static RUNS: AtomicUsize = AtomicUsize::new(0);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            spawn(|| {
                CONTROL
                    .run_once(|| {
                        thread::sleep(Duration::from_millis(10));
                        RUNS.fetch_add(1, Ordering::SeqCst);
                    })
                    .map_or(1, |()| 0)
            })
        })
        .collect();
    for h in handles {
        assert_eq!(join(h).unwrap(), 0);
    }
    assert_eq!(RUNS.load(Ordering::SeqCst), 1);
}

#[test]
fn try_lock_reports_busy_without_blocking() {
    let m = Arc::new(Mutex::new());
    let (held_tx, held_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let holder = {
        let m = Arc::clone(&m);
        spawn(move || {
            m.lock().unwrap();
            held_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            m.unlock().unwrap();
            0
        })
    };
    held_rx.recv().unwrap();

    let t0 = Instant::now();
    assert_eq!(m.try_lock(), Err(XpthreadError::Busy));
    assert!(t0.elapsed() < Duration::from_millis(50));

    release_tx.send(()).unwrap();
    join(holder).unwrap();
    assert_eq!(m.try_lock(), Ok(()));
    m.unlock().unwrap();
}

#[test]
fn timed_lock_with_past_deadline_times_out_quickly() {
    let m = Mutex::new();
    let deadline = time::now();
    let t0 = Instant::now();
    assert_eq!(m.timed_lock(deadline), Err(XpthreadError::TimedOut));
    assert!(t0.elapsed() < Duration::from_millis(5), "{:?}", t0.elapsed());
    assert!(!m.is_locked());
}

#[test]
fn timed_lock_succeeds_when_holder_releases_before_deadline() {
    let m = Arc::new(Mutex::new());
    m.lock().unwrap();
    let releaser = {
        let m = Arc::clone(&m);
        spawn(move || {
            thread::sleep(Duration::from_millis(100));
            m.unlock().unwrap();
            0
        })
    };

    let deadline = time::now().after(Duration::from_secs(1));
    let t0 = Instant::now();
    assert_eq!(m.timed_lock(deadline), Ok(()));
    let waited = t0.elapsed();
    assert!(waited >= Duration::from_millis(90), "{waited:?}");
    assert!(waited < Duration::from_secs(1), "{waited:?}");

    join(releaser).unwrap();
    m.unlock().unwrap();
}

#[test]
fn exit_value_reaches_joiner_for_small_and_large_values() {
    for value in [0usize, 1, 42, 0xFFFF, usize::MAX / 2, usize::MAX - 1] {
        let h = spawn(move || exit(value));
        assert_eq!(join(h).unwrap(), value);
    }
}

#[test]
fn self_handles_compare_by_identity() {
    let (tx, rx) = mpsc::channel();
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let tx = tx.clone();
            spawn(move || {
                let a = self_handle();
                let b = self_handle();
                tx.send((a, b)).unwrap();
                usize::from(equal(a, b))
            })
        })
        .collect();
    drop(tx);

    let seen: Vec<_> = rx.iter().collect();
    for h in handles {
        assert_eq!(join(h).unwrap(), 1);
    }
    assert_eq!(seen.len(), 2);
    assert!(!equal(seen[0].0, seen[1].0));
}

#[test]
fn cancel_enabled_terminates_at_checkpoint() {
    let after = Arc::new(AtomicUsize::new(0));
    let (ready_tx, ready_rx) = mpsc::channel();
    let (go_tx, go_rx) = mpsc::channel::<()>();
    let h = {
        let after = Arc::clone(&after);
        spawn(move || {
            ready_tx.send(()).unwrap();
            go_rx.recv().unwrap();
            test_cancel();
            after.fetch_add(1, Ordering::SeqCst);
            7
        })
    };
    ready_rx.recv().unwrap();
    request_cancel(h).unwrap();
    go_tx.send(()).unwrap();

    assert_eq!(join(h).unwrap(), THREAD_CANCELED);
    assert_eq!(after.load(Ordering::SeqCst), 0);
}

#[test]
fn cancel_disabled_continues_past_checkpoint() {
    let after = Arc::new(AtomicUsize::new(0));
    let (ready_tx, ready_rx) = mpsc::channel();
    let (go_tx, go_rx) = mpsc::channel::<()>();
    let h = {
        let after = Arc::clone(&after);
        spawn(move || {
            set_cancel_state(CancelState::Disable).unwrap();
            ready_tx.send(()).unwrap();
            go_rx.recv().unwrap();
            test_cancel();
            after.fetch_add(1, Ordering::SeqCst);
            7
        })
    };
    ready_rx.recv().unwrap();
    request_cancel(h).unwrap();
    go_tx.send(()).unwrap();

    assert_eq!(join(h).unwrap(), 7);
    assert_eq!(after.load(Ordering::SeqCst), 1);
}

#[test]
fn four_contexts_increment_counter_without_lost_updates() {
    for _ in 0..20 {
        let lock = Arc::new(Mutex::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let counter = Arc::clone(&counter);
                spawn(move || {
                    lock.lock().unwrap();
                    // Load-then-store: only the lock prevents a lost update.
                    let v = counter.load(Ordering::Relaxed);
                    thread::yield_now();
                    counter.store(v + 1, Ordering::Relaxed);
                    lock.unlock().unwrap();
                    0
                })
            })
            .collect();
        for h in handles {
            join(h).unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 4);
    }
}
