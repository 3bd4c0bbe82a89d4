//! Error numbers and the closed status set.
//!
//! Every operation of the layer reports one of a small, closed set of
//! statuses. Rust callers see them as [`XpthreadError`] inside a `Result`;
//! the C surface sees the matching errno value.

use thiserror::Error;

/// Well-known errno constants (Linux numbering).
pub const EPERM: i32 = 1;
pub const ESRCH: i32 = 3;
pub const EAGAIN: i32 = 11;
pub const ENOMEM: i32 = 12;
pub const EBUSY: i32 = 16;
pub const EINVAL: i32 = 22;
pub const EDEADLK: i32 = 35;
pub const ENOTSUP: i32 = 95;
pub const ETIMEDOUT: i32 = 110;

/// Failure half of the status set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum XpthreadError {
    /// The deadline of a timed operation passed before it could complete.
    #[error("operation timed out")]
    TimedOut,
    /// The lock is held by another context.
    #[error("resource busy")]
    Busy,
    /// An argument or handle was not recognized.
    #[error("invalid argument")]
    InvalidArgument,
    /// A lock or context record could not be allocated.
    #[error("out of memory")]
    OutOfMemory,
    /// The platform could not provide a new execution context.
    #[error("resource temporarily unavailable")]
    ResourceUnavailable,
    /// The operation has no meaning on this backend.
    #[error("operation not supported")]
    Unsupported,
}

impl XpthreadError {
    /// errno value reported across the C surface.
    #[must_use]
    pub const fn errno(self) -> i32 {
        match self {
            Self::TimedOut => ETIMEDOUT,
            Self::Busy => EBUSY,
            Self::InvalidArgument => EINVAL,
            Self::OutOfMemory => ENOMEM,
            Self::ResourceUnavailable => EAGAIN,
            Self::Unsupported => ENOTSUP,
        }
    }
}

/// The full closed status set, `Ok` included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    TimedOut,
    Busy,
    InvalidArgument,
    OutOfMemory,
    ResourceUnavailable,
    Unsupported,
}

impl Status {
    /// errno value for this status (`0` for `Ok`).
    #[must_use]
    pub const fn errno(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::TimedOut => ETIMEDOUT,
            Self::Busy => EBUSY,
            Self::InvalidArgument => EINVAL,
            Self::OutOfMemory => ENOMEM,
            Self::ResourceUnavailable => EAGAIN,
            Self::Unsupported => ENOTSUP,
        }
    }

    /// Map an errno value back into the closed set.
    ///
    /// Codes outside the set collapse to `InvalidArgument`.
    #[must_use]
    pub const fn from_errno(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            ETIMEDOUT => Self::TimedOut,
            EBUSY => Self::Busy,
            ENOMEM => Self::OutOfMemory,
            EAGAIN => Self::ResourceUnavailable,
            ENOTSUP => Self::Unsupported,
            _ => Self::InvalidArgument,
        }
    }

    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Lowercase name used in structured logs and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::TimedOut => "timed_out",
            Self::Busy => "busy",
            Self::InvalidArgument => "invalid_argument",
            Self::OutOfMemory => "out_of_memory",
            Self::ResourceUnavailable => "resource_unavailable",
            Self::Unsupported => "unsupported",
        }
    }
}

impl From<XpthreadError> for Status {
    fn from(err: XpthreadError) -> Self {
        match err {
            XpthreadError::TimedOut => Self::TimedOut,
            XpthreadError::Busy => Self::Busy,
            XpthreadError::InvalidArgument => Self::InvalidArgument,
            XpthreadError::OutOfMemory => Self::OutOfMemory,
            XpthreadError::ResourceUnavailable => Self::ResourceUnavailable,
            XpthreadError::Unsupported => Self::Unsupported,
        }
    }
}

impl<T> From<Result<T, XpthreadError>> for Status {
    fn from(result: Result<T, XpthreadError>) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(err) => err.into(),
        }
    }
}
