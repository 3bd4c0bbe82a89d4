//! Backend identity and capability flags.
//!
//! Both backends expose the same call surface. Where a backend has no
//! equivalent for a feature the call is still accepted; the flags below say
//! how much of the POSIX behavior is actually delivered.

/// Which implementation path serves the call surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Forwards to the platform's own pthread primitives.
    Native,
    /// Synthesized by this crate from lower-level primitives.
    Emulated,
}

impl BackendKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Emulated => "emulated",
        }
    }

    #[must_use]
    pub const fn capabilities(self) -> Capabilities {
        match self {
            Self::Native => NATIVE_CAPABILITIES,
            Self::Emulated => EMULATED_CAPABILITIES,
        }
    }
}

/// How a backend delivers one feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Support {
    /// Provided by the platform primitive with its own precision.
    Native,
    /// Rebuilt from weaker primitives; observable behavior is coarser.
    Emulated,
    /// Accepted, not enforced: calls succeed with fixed values.
    Inert,
}

impl Support {
    /// Returns true if calls actually change behavior.
    #[must_use]
    pub const fn is_enforced(self) -> bool {
        !matches!(self, Self::Inert)
    }
}

/// Per-backend capability table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Capabilities {
    /// Absolute-deadline mutex acquisition.
    pub timed_lock: Support,
    /// `get/set_priority_ceiling`.
    pub priority_ceiling: Support,
    /// `mark_consistent` and owner-death recovery.
    pub robust_mutex: Support,
    /// Deferred cancellation at checkpoints.
    pub cancellation: Support,
    /// Asynchronous cancellation type.
    pub async_cancel: Support,
    /// Delivery of an arbitrary return value to the joiner.
    pub retval_propagation: Support,
}

/// Capabilities of the emulated backend (this crate's engine).
pub const EMULATED_CAPABILITIES: Capabilities = Capabilities {
    timed_lock: Support::Emulated,
    priority_ceiling: Support::Inert,
    robust_mutex: Support::Inert,
    cancellation: Support::Emulated,
    async_cancel: Support::Inert,
    retval_propagation: Support::Emulated,
};

/// Capabilities of the native pthread pass-through.
///
/// Only the lock and once primitives are forwarded. Thread lifecycle and
/// cancellation stay on the engine in this crate, because `pthread_exit` and
/// `pthread_cancel` terminate with a forced unwind that may not cross Rust
/// frames.
pub const NATIVE_CAPABILITIES: Capabilities = Capabilities {
    timed_lock: Support::Native,
    priority_ceiling: Support::Native,
    robust_mutex: Support::Native,
    cancellation: Support::Emulated,
    async_cancel: Support::Inert,
    retval_propagation: Support::Emulated,
};
