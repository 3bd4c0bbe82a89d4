//! # xpthread-abi
//!
//! `extern "C"` boundary for the xpthread call surface.
//!
//! This crate produces a `cdylib` exposing `xpthread_*` symbols. Thread
//! lifecycle and cancellation always run on the engine in `xpthread-core`.
//! Once, mutex and clock calls go to one of two backends:
//!
//! ```text
//! Linux, default features  -> native  (host pthreads)
//! other targets / emulated -> emulated (xpthread-core engine)
//! ```

#[cfg(all(target_os = "linux", not(feature = "emulated")))]
mod native;
#[cfg(all(target_os = "linux", not(feature = "emulated")))]
use native as backend;

#[cfg(any(feature = "emulated", not(target_os = "linux")))]
mod emulated;
#[cfg(any(feature = "emulated", not(target_os = "linux")))]
use emulated as backend;

pub mod xpthread_abi;
