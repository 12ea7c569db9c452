//! Critical section protected cell
//!
//! Holds the kernel value behind [`Rtos`](crate::core::rtos::Rtos). The
//! only safe way in is through a live [`CriticalSection`].

use core::cell::UnsafeCell;

use crate::critical::CriticalSection;

/// A cell that can only be accessed within a critical section.
///
/// Callers must not hold two references obtained from the same cell at
/// once; the kernel never re-enters itself, so one borrow per entry point
/// is the rule.
pub struct CsCell<T>(UnsafeCell<T>);

unsafe impl<T> Sync for CsCell<T> {}

impl<T> CsCell<T> {
    #[inline(always)]
    pub const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    /// Borrow the inner value for the lifetime of the guard
    #[inline(always)]
    #[allow(clippy::mut_from_ref)]
    pub fn borrow_mut<'cs>(&'cs self, _cs: &'cs CriticalSection) -> &'cs mut T {
        unsafe { &mut *self.0.get() }
    }

    /// Replace the inner value, returning the previous one
    #[inline]
    pub fn replace(&self, cs: &CriticalSection, value: T) -> T {
        core::mem::replace(self.borrow_mut(cs), value)
    }
}
