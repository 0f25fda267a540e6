//! Error taxonomy shared by every subsystem.
//!
//! Only `SplError::Fatal` is unrecoverable; the driver lifecycle turns it
//! into `spl_panic`. Everything else is a status the caller may act on.

use core::fmt;

/// Programming or resource-exhaustion bugs that must stop the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalReason {
    /// Registry torn down with this many mounts still registered
    MountsRemaining(usize),
    /// Registry torn down while the mount gate was still held
    GateHeld,
    /// Debug log buffer could not be allocated at load
    CbufAllocation(usize),
}

/// SPL error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplError {
    /// Non-blocking acquisition found the resource held
    Busy,
    /// Debug log used outside its Active state
    NotActive,
    /// Debug log initialized twice
    AlreadyActive,
    /// Allocator could not satisfy the request
    OutOfMemory,
    /// Invalid argument (zero-sized cache, undersized buffer, ...)
    InvalidArgument,
    /// Block returned to a cache it did not come from
    ForeignBlock,
    /// Dump destination could not be created
    OpenFailed,
    /// Dump destination accepted fewer bytes than written
    WriteFailed,
    /// Clock source reported an unusable frequency
    BadFrequency(u64),
    /// Unrecoverable condition
    Fatal(FatalReason),
}

impl SplError {
    /// True for errors the lifecycle handler must escalate to a panic.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SplError::Fatal(_))
    }
}

impl fmt::Display for FatalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalReason::MountsRemaining(n) => {
                write!(f, "mount list not empty at shutdown ({} remaining)", n)
            }
            FatalReason::GateHeld => write!(f, "mount gate held at shutdown"),
            FatalReason::CbufAllocation(size) => {
                write!(f, "unable to allocate {} byte debug buffer", size)
            }
        }
    }
}

impl fmt::Display for SplError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplError::Busy => write!(f, "resource busy"),
            SplError::NotActive => write!(f, "debug log not active"),
            SplError::AlreadyActive => write!(f, "debug log already active"),
            SplError::OutOfMemory => write!(f, "out of memory"),
            SplError::InvalidArgument => write!(f, "invalid argument"),
            SplError::ForeignBlock => write!(f, "block does not belong to this cache"),
            SplError::OpenFailed => write!(f, "unable to open dump file"),
            SplError::WriteFailed => write!(f, "write to dump file failed"),
            SplError::BadFrequency(freq) => write!(f, "unusable counter frequency {}", freq),
            SplError::Fatal(reason) => write!(f, "fatal: {}", reason),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SplError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_is_distinguished_from_busy() {
        assert!(SplError::Fatal(FatalReason::GateHeld).is_fatal());
        assert!(!SplError::Busy.is_fatal());
    }

    #[test]
    fn display_names_the_remaining_mounts() {
        let err = SplError::Fatal(FatalReason::MountsRemaining(3));
        assert_eq!(
            format!("{}", err),
            "fatal: mount list not empty at shutdown (3 remaining)"
        );
    }
}
