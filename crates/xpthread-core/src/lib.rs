//! # xpthread-core
//!
//! Portable POSIX-style threading engine.
//!
//! This crate is the emulated backend: it rebuilds timed locking,
//! cooperative cancellation, one-time initialization and return-value
//! propagation from primitives that offer none of them directly. The C call
//! surface lives in `xpthread-abi`. Only the mutex module carries `unsafe`.

#![deny(unsafe_code)]

pub mod backend;
pub mod config;
pub mod errno;
pub mod pthread;
pub mod structured_log;
pub mod time;

pub use backend::{BackendKind, Capabilities, Support};
pub use errno::{Status, XpthreadError};
