//! Smoke-test driver for xpthread.
//!
//! This crate provides:
//! - Smoke run: once-init, a mutex-guarded counter across N contexts, a
//!   timed lock and a trylock, reported as a serializable [`SmokeReport`]
//! - Evidence checks: schema validation of JSONL logs written by a run

#![forbid(unsafe_code)]

pub mod evidence;
pub mod smoke;

pub use evidence::{LogSummary, summarize_log};
pub use smoke::{SmokeCheck, SmokeConfig, SmokeError, SmokeReport, run_smoke};
