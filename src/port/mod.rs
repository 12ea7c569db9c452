//! Port layer - CPU-specific implementations
//!
//! The kernel never touches hardware itself. It drives a [`Port`] for
//! everything register-level: building a task's first stack frame,
//! provoking a context switch, and asking whether a task's code is
//! resident before it is dispatched. The port in turn calls back into the
//! kernel through [`KernelHooks`] from its switch and tick handlers.
//!
//! Critical sections come from the `critical-section` implementation the
//! port installs (see the crate root for Cortex-M).

use crate::task::{OsTaskFn, TaskHandle};
use crate::types::OsStkElement;

#[cfg(target_arch = "arm")]
pub mod cortex_m4;

#[cfg(target_arch = "arm")]
pub use cortex_m4::CortexM4;

/// Answer of the code-residency check made before dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Dispatch {
    /// The task can run now
    Ready,
    /// The task's code is not loaded yet; pick another task
    NotYetResident,
}

/// Kernel entry points the port calls from its exception handlers
pub trait KernelHooks: Sync {
    /// Save `sp` for the outgoing task (null on the very first switch),
    /// select the next task and return its saved stack pointer.
    fn switch_context(&self, sp: *mut OsStkElement) -> *mut OsStkElement;

    /// Process one timer tick.
    fn tick(&self);
}

/// Services the kernel needs from the CPU port
pub trait Port {
    /// Build the initial frame for a new task and return its stack pointer.
    ///
    /// # Safety
    /// `stk_base..stk_base + stk_size` must be a valid, exclusively owned
    /// stack that outlives the task.
    unsafe fn init_stack(
        &mut self,
        stk_base: *mut OsStkElement,
        stk_size: usize,
        entry: OsTaskFn,
        arg: *mut (),
    ) -> *mut OsStkElement;

    /// Request an asynchronous context switch. It takes effect once the
    /// current critical section ends.
    fn request_yield(&mut self);

    /// Loader hook consulted before `task` is committed as the running task.
    fn try_dispatch(&mut self, _task: TaskHandle) -> Dispatch {
        Dispatch::Ready
    }

    /// Register the kernel the exception handlers call back into.
    fn attach(&mut self, _hooks: &'static dyn KernelHooks) {}

    /// Arm the first context switch. It fires when interrupts are enabled.
    fn start_first_task(&mut self) {}
}

// Stub port for non-ARM targets (for testing)
#[cfg(not(target_arch = "arm"))]
pub mod stub {
    use super::{Dispatch, Port};
    use crate::task::{OsTaskFn, TaskHandle};
    use crate::types::OsStkElement;

    /// Words the stub writes at the top of a new stack
    pub const STUB_FRAME_WORDS: usize = 2;

    /// Host port: records yield requests and can hold tasks back from
    /// dispatch to exercise the loader retry path.
    #[derive(Debug, Default)]
    pub struct StubPort {
        /// Yield requests since the last [`StubPort::take_yields`]
        pub yield_requests: usize,
        /// Set once the kernel armed the first switch
        pub started: bool,
        non_resident: u64,
    }

    impl StubPort {
        pub const fn new() -> Self {
            Self {
                yield_requests: 0,
                started: false,
                non_resident: 0,
            }
        }

        /// Mark `task` as (not) resident for the loader hook
        pub fn set_resident(&mut self, task: TaskHandle, resident: bool) {
            let bit = 1u64 << task.index();
            if resident {
                self.non_resident &= !bit;
            } else {
                self.non_resident |= bit;
            }
        }

        /// Return and clear the yield counter
        pub fn take_yields(&mut self) -> usize {
            core::mem::take(&mut self.yield_requests)
        }
    }

    impl Port for StubPort {
        unsafe fn init_stack(
            &mut self,
            stk_base: *mut OsStkElement,
            stk_size: usize,
            entry: OsTaskFn,
            arg: *mut (),
        ) -> *mut OsStkElement {
            unsafe {
                let top = stk_base.add(stk_size - 1);
                top.write(entry as usize as OsStkElement);
                top.sub(1).write(arg as usize as OsStkElement);
                top.sub(1)
            }
        }

        fn request_yield(&mut self) {
            self.yield_requests += 1;
        }

        fn try_dispatch(&mut self, task: TaskHandle) -> Dispatch {
            if self.non_resident & (1u64 << task.index()) != 0 {
                Dispatch::NotYetResident
            } else {
                Dispatch::Ready
            }
        }

        fn start_first_task(&mut self) {
            self.started = true;
        }
    }
}

#[cfg(not(target_arch = "arm"))]
pub use stub::StubPort;
