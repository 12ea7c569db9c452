//! Kernel error types
//!
//! Recoverable conditions come back as [`OsResult`]. Configuration defects
//! that would leave the lists inconsistent go through [`fatal`] instead and
//! never return.

/// Kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum OsError {
    // ============ Argument errors ============
    /// Bad priority, zero capacity, short stack or stale handle
    InvalidArgument = 1001,
    /// Item larger than the queue's configured item size
    InvalidSize = 1002,

    // ============ Resource errors ============
    /// Task, queue or ring-buffer arena exhausted
    NoFreeMem = 2001,

    // ============ Wait errors ============
    /// A timed wait expired
    Timeout = 3001,
    /// No room, and the caller asked not to wait
    Full = 3002,
    /// No data, and the caller asked not to wait
    Empty = 3003,

    // ============ State errors ============
    /// Object or task not in the state the operation needs
    InvalidState = 4001,
    /// The kernel has not been initialised
    NotInitialized = 4002,
}

impl OsError {
    /// Numeric error code, stable across releases
    #[inline]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// True for the conditions a caller is expected to retry or back off from
    #[inline]
    pub const fn is_transient(self) -> bool {
        matches!(self, OsError::Timeout | OsError::Full | OsError::Empty)
    }
}

/// Result type for kernel operations
pub type OsResult<T> = Result<T, OsError>;

/// Halt on a configuration defect.
///
/// Logs the error and panics; on target the panic handler traps, which
/// stops the whole firmware image.
#[cold]
#[track_caller]
pub fn fatal(err: OsError) -> ! {
    crate::error!("fatal kernel error: {}", err);
    panic!("fatal kernel error: {:?}", err)
}
