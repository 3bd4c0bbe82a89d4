//! Smoke run over the engine.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use xpthread_core::backend::BackendKind;
use xpthread_core::errno::{Status, XpthreadError};
use xpthread_core::pthread::{Mutex, OnceControl, ThreadAttr, create, join};
use xpthread_core::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};
use xpthread_core::time;

/// Errors that stop a smoke run before it can report.
#[derive(Debug, thiserror::Error)]
pub enum SmokeError {
    #[error("thread count must be at least 1")]
    InvalidThreadCount,
    #[error("cannot open log {path}: {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("engine call failed: {0}")]
    Engine(#[from] XpthreadError),
}

/// Knobs for [`run_smoke`].
#[derive(Debug, Clone)]
pub struct SmokeConfig {
    pub threads: usize,
    /// Distance of the timed-lock deadline from "now".
    pub timed_lock: Duration,
    /// Where to write one JSONL line per check.
    pub log: Option<PathBuf>,
}

impl Default for SmokeConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            timed_lock: Duration::from_secs(1),
            log: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SmokeCheck {
    pub name: String,
    pub passed: bool,
    pub status: String,
    pub detail: String,
    pub latency_ns: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SmokeReport {
    pub backend: String,
    pub threads: usize,
    pub once_runs: usize,
    pub counter: usize,
    pub return_values: Vec<usize>,
    pub checks: Vec<SmokeCheck>,
    pub ok: bool,
}

struct Recorder {
    checks: Vec<SmokeCheck>,
    log: Option<LogEmitter>,
}

impl Recorder {
    fn record(&mut self, name: &str, started: Instant, status: Status, passed: bool, detail: String) {
        let latency_ns = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        if let Some(log) = self.log.as_mut() {
            let entry = LogEntry::new(
                String::new(),
                if passed { LogLevel::Info } else { LogLevel::Error },
                "smoke.check",
            )
            .with_api("threading", name)
            .with_outcome(if passed { Outcome::Pass } else { Outcome::Fail })
            .with_errno(status.errno())
            .with_latency_ns(latency_ns)
            .with_details(serde_json::json!({ "detail": detail }));
            // A broken log never fails the run itself.
            let _ = log.emit_entry(entry);
        }
        self.checks.push(SmokeCheck {
            name: name.to_string(),
            passed,
            status: status.as_str().to_string(),
            detail,
            latency_ns,
        });
    }
}

/// Run every smoke check and collect the results.
///
/// Engine failures while creating or joining contexts abort the run; every
/// other deviation is recorded as a failed check.
pub fn run_smoke(config: &SmokeConfig) -> Result<SmokeReport, SmokeError> {
    if config.threads == 0 {
        return Err(SmokeError::InvalidThreadCount);
    }
    let log = match &config.log {
        Some(path) => Some(LogEmitter::to_file(path, "smoke").map_err(|source| SmokeError::Log {
            path: path.clone(),
            source,
        })?),
        None => None,
    };
    let mut rec = Recorder {
        checks: Vec::new(),
        log,
    };

    // once: second call must not rerun the initializer
    let started = Instant::now();
    let control = OnceControl::new();
    let once_runs = AtomicUsize::new(0);
    let first = control.run_once(|| {
        once_runs.fetch_add(1, Ordering::SeqCst);
    });
    let second = control.run_once(|| {
        once_runs.fetch_add(1, Ordering::SeqCst);
    });
    let once_runs = once_runs.load(Ordering::SeqCst);
    let status = Status::from(first.and(second));
    rec.record(
        "xpthread_once",
        started,
        status,
        status.is_ok() && once_runs == 1,
        format!("initializer ran {once_runs} time(s)"),
    );

    // N contexts bump a shared counter under one mutex
    let started = Instant::now();
    let lock = Arc::new(Mutex::init()?);
    let counter = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::with_capacity(config.threads);
    for id in 1..=config.threads {
        let lock = Arc::clone(&lock);
        let counter = Arc::clone(&counter);
        let attr = ThreadAttr::default().with_name(format!("smoke-{id}"));
        handles.push(create(&attr, move || {
            if lock.lock().is_ok() {
                let old = counter.load(Ordering::Relaxed);
                counter.store(old + 1, Ordering::Relaxed);
                let _ = lock.unlock();
            }
            id * 10
        })?);
    }
    let mut return_values = Vec::with_capacity(handles.len());
    for handle in handles {
        return_values.push(join(handle)?);
    }
    let counter = counter.load(Ordering::Relaxed);
    let expected: Vec<usize> = (1..=config.threads).map(|id| id * 10).collect();
    rec.record(
        "xpthread_create",
        started,
        Status::Ok,
        counter == config.threads && return_values == expected,
        format!("counter={counter} return_values={return_values:?}"),
    );

    // timed lock on a free mutex with a future deadline
    let started = Instant::now();
    let deadline = time::now().after(config.timed_lock);
    let timed = lock.timed_lock(deadline);
    let status = Status::from(timed);
    if status.is_ok() {
        lock.unlock()?;
    }
    rec.record(
        "xpthread_mutex_timedlock",
        started,
        status,
        status.is_ok(),
        format!("deadline {}", time::format_utc(deadline)),
    );

    let started = Instant::now();
    let status = Status::from(lock.try_lock());
    if status.is_ok() {
        lock.unlock()?;
    }
    rec.record(
        "xpthread_mutex_trylock",
        started,
        status,
        status.is_ok(),
        String::new(),
    );

    lock.destroy()?;
    if let Some(log) = rec.log.as_mut() {
        let _ = log.flush();
    }

    let ok = rec.checks.iter().all(|c| c.passed);
    Ok(SmokeReport {
        backend: BackendKind::Emulated.name().to_string(),
        threads: config.threads,
        once_runs,
        counter,
        return_values,
        checks: rec.checks,
        ok,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_reference_run() {
        let cfg = SmokeConfig::default();
        assert_eq!(cfg.threads, 4);
        assert_eq!(cfg.timed_lock, Duration::from_secs(1));
        assert!(cfg.log.is_none());
    }

    #[test]
    fn zero_threads_is_rejected() {
        let cfg = SmokeConfig {
            threads: 0,
            ..SmokeConfig::default()
        };
        assert!(matches!(run_smoke(&cfg), Err(SmokeError::InvalidThreadCount)));
    }

    #[test]
    fn single_thread_run_passes() {
        let cfg = SmokeConfig {
            threads: 1,
            ..SmokeConfig::default()
        };
        let report = run_smoke(&cfg).unwrap();
        assert!(report.ok, "{report:?}");
        assert_eq!(report.return_values, vec![10]);
    }
}
