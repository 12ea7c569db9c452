//! tickos: a preemptive priority kernel for single-core firmware
//!
//! A real-time kernel providing:
//! - Priority-based preemptive dispatch with round-robin inside a priority
//! - Bounded blocking queues and binary semaphores built on them
//! - Tick-based delays and wraparound-safe timeouts
//! - A port boundary for context switching and code-residency checks
//!
//! Higher priority numbers are more urgent; the idle task runs at 0.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

// ============ Critical Section ============

#[cfg(target_arch = "arm")]
mod cs_impl {
    use cortex_m::interrupt;
    use cortex_m::register::primask;
    use critical_section::{set_impl, Impl, RawRestoreState};

    struct SingleCoreCriticalSection;
    set_impl!(SingleCoreCriticalSection);

    unsafe impl Impl for SingleCoreCriticalSection {
        unsafe fn acquire() -> RawRestoreState {
            let was_active = primask::read().is_active();
            interrupt::disable();
            was_active
        }

        unsafe fn release(was_active: RawRestoreState) {
            if was_active {
                unsafe { interrupt::enable() }
            }
        }
    }
}

// ============ Modules ============

pub mod log;
mod lang_items;

pub mod core;
pub mod sync;
pub mod port;

// ============ Re-exports ============

pub use self::core::config;
pub use self::core::config::*;
pub use self::core::critical;
pub use self::core::error;
pub use self::core::error::{fatal, OsError, OsResult};
pub use self::core::kernel;
pub use self::core::kernel::Kernel;
pub use self::core::list;
pub use self::core::rtos::Rtos;
pub use self::core::sched;
pub use self::core::sched::Scheduler;
pub use self::core::task;
pub use self::core::task::{OsTaskFn, TaskHandle};
pub use self::core::time;
pub use self::core::time::Wait;
pub use self::core::types;
pub use self::core::types::*;

pub use sync::queue;
pub use sync::queue::QueueHandle;
#[cfg(feature = "sem")]
pub use sync::sem;
#[cfg(feature = "sem")]
pub use sync::sem::SemaphoreHandle;

pub use port::{Dispatch, KernelHooks, Port};
