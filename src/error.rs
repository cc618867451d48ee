//! Crate-wide error type.
//!
//! Mirrors the error kinds described for the execution core: argument
//! errors, resource errors, permission errors, and busy/try-again
//! conditions are all recoverable and surfaced to the caller. Invariant
//! violations (double buffer insert, GC of a still-in-use id, ...) panic
//! instead of returning an error, matching `KASSERT`/`panic()` call sites
//! in the kernel this crate is modeled on.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KError {
    /// Invalid signal number, invalid `sigmask` `how`, unknown tid/pid, ...
    InvalidArgument,
    /// Thread table full, out of memory for a `ksiginfo`, no free timer.
    NoResources,
    /// Credential check failed before signalling another owner.
    PermissionDenied,
    /// Lock contention or a condition that should be retried by the
    /// caller (or by the post-scheduling hook on the next tick).
    TryAgain,
    /// Referenced thread/process/buffer no longer exists.
    NotFound,
    /// I/O failed; see the accompanying errno-like code where applicable.
    Io,
    /// The operation is a recognized part of the syscall surface but is
    /// not implemented by this core (`altstack`).
    NotSupported,
}

impl KError {
    pub fn as_str(self) -> &'static str {
        match self {
            KError::InvalidArgument => "invalid argument",
            KError::NoResources => "insufficient resources",
            KError::PermissionDenied => "permission denied",
            KError::TryAgain => "try again",
            KError::NotFound => "not found",
            KError::Io => "i/o error",
            KError::NotSupported => "not supported",
        }
    }
}

pub type KResult<T> = Result<T, KError>;
