//! Critical section handling
//!
//! Disabling interrupts is the kernel's only mutex. Every list and queue
//! mutation happens while a [`CriticalSection`] guard is alive; the guard
//! restores the previous interrupt state when dropped, on every exit path.

use core::marker::PhantomData;

use portable_atomic::{AtomicUsize, Ordering};

/// Current critical section nesting depth
static NESTING: AtomicUsize = AtomicUsize::new(0);

/// RAII guard for critical sections
///
/// Guards nest: only the outermost one re-enables interrupts on drop.
pub struct CriticalSection {
    restore: critical_section::RestoreState,
    // Interrupt state belongs to the context that saved it
    _not_send: PhantomData<*mut ()>,
}

impl CriticalSection {
    /// Enter a critical section by disabling interrupts.
    #[inline(always)]
    pub fn enter() -> Self {
        let restore = unsafe { critical_section::acquire() };
        NESTING.fetch_add(1, Ordering::AcqRel);
        CriticalSection {
            restore,
            _not_send: PhantomData,
        }
    }

    /// Current nesting depth, 0 outside any critical section
    #[inline(always)]
    pub fn nesting() -> usize {
        NESTING.load(Ordering::Acquire)
    }

    /// Check if we're currently in a critical section
    #[inline(always)]
    pub fn is_active() -> bool {
        Self::nesting() > 0
    }
}

impl Drop for CriticalSection {
    #[inline(always)]
    fn drop(&mut self) {
        NESTING.fetch_sub(1, Ordering::AcqRel);
        unsafe { critical_section::release(self.restore) }
    }
}

/// Execute a closure with interrupts disabled
///
/// The closure receives a reference to the critical section guard,
/// which can be used to access [`CsCell`](crate::core::cs_cell::CsCell)
/// protected data.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(&CriticalSection) -> R,
{
    let cs = CriticalSection::enter();
    f(&cs)
}

/// Check if currently executing in an ISR context
#[inline]
pub fn is_isr_context() -> bool {
    #[cfg(target_arch = "arm")]
    {
        let ipsr: u32;
        unsafe {
            core::arch::asm!(
                "mrs {}, IPSR",
                out(reg) ipsr,
                options(nomem, nostack, preserves_flags)
            );
        }
        ipsr != 0
    }

    #[cfg(not(target_arch = "arm"))]
    {
        false
    }
}
