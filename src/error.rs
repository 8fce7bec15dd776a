//! Shared error discriminant returned by fallible kernel operations.
//!
//! Every subsystem returns `Result<T, KernelError>` instead of threading
//! ad hoc `&'static str` errors or unwinding; see the error handling design
//! in `SPEC_FULL.md` §7.

use core::fmt;

/// The kinds of failure a kernel operation can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// No free frame, domain slot, descriptor, or process slot was available.
    ResourceExhausted,
    /// An argument was out of range, misaligned, or otherwise malformed.
    InvalidArgument,
    /// The caller's privilege level does not permit the operation.
    PermissionDenied,
    /// A path component, pid, or descriptor did not resolve to anything.
    NotFound,
    /// The call would have blocked and the caller asked not to.
    WouldBlock,
    /// `waitpid` found no child to reap.
    NoChildren,
    /// An unrecoverable condition was hit in kernel context.
    Fatal,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::ResourceExhausted => "resource exhausted",
            Self::InvalidArgument => "invalid argument",
            Self::PermissionDenied => "permission denied",
            Self::NotFound => "not found",
            Self::WouldBlock => "would block",
            Self::NoChildren => "no children",
            Self::Fatal => "fatal",
        };
        f.write_str(msg)
    }
}

/// Convenience alias used throughout the kernel subsystems.
pub type KernelResult<T> = Result<T, KernelError>;
