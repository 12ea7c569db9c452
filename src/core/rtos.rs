//! Task-facing kernel facade
//!
//! [`Rtos`] owns the kernel in a [`CsCell`] so it can live in a `static`.
//! Every call enters a critical section, borrows the kernel and runs one
//! kernel operation. Blocking calls retry their step after every switch
//! back into the caller until it completes.
//!
//! ```ignore
//! static RTOS: Rtos<CortexM4> = Rtos::new();
//!
//! RTOS.init(CortexM4::new(cp.SYST, 16_000_000));
//! RTOS.task_create("rx", rx_task, core::ptr::null_mut(), 3, stack)?;
//! RTOS.start(idle_stack)?;
//! ```

use core::task::Poll;

use crate::config::CFG_PRIO_IDLE;
use crate::core::cs_cell::CsCell;
use crate::critical::{critical_section, is_isr_context};
use crate::error::{fatal, OsError, OsResult};
use crate::kernel::Kernel;
use crate::port::{KernelHooks, Port};
use crate::sync::queue::QueueHandle;
use crate::task::{OsTaskFn, TaskHandle};
use crate::time::Wait;
use crate::types::{OsPrio, OsStkElement, OsTick, TaskState};

#[cfg(feature = "sem")]
use crate::sync::sem::SemaphoreHandle;

/// Kernel instance shared by tasks and interrupt handlers
pub struct Rtos<P: Port> {
    kernel: CsCell<Option<Kernel<P>>>,
}

/// Idle task: hands the CPU to any other idle-priority task, else spins
fn idle_task<P: Port + 'static>(arg: *mut ()) -> ! {
    let rtos = unsafe { &*(arg as *const Rtos<P>) };
    loop {
        rtos.with(|k| {
            if k.sched.lists.ready.list(CFG_PRIO_IDLE).len() > 1 {
                k.sched.task_yield();
            }
        });
        core::hint::spin_loop();
    }
}

impl<P: Port> Rtos<P> {
    pub const fn new() -> Self {
        Self {
            kernel: CsCell::new(None),
        }
    }

    /// Install a fresh kernel driving `port`
    ///
    /// # Returns
    /// * `Err(OsError::InvalidState)` - A started kernel is already installed
    pub fn init(&self, port: P) -> OsResult<()> {
        critical_section(|cs| {
            let slot = self.kernel.borrow_mut(cs);
            if slot.as_ref().is_some_and(|k| k.sched.is_running()) {
                return Err(OsError::InvalidState);
            }
            *slot = Some(Kernel::new(port));
            Ok(())
        })
    }

    pub fn is_initialized(&self) -> bool {
        critical_section(|cs| self.kernel.borrow_mut(cs).is_some())
    }

    /// Run `f` on the kernel inside a critical section.
    ///
    /// Using the kernel before [`Rtos::init`] halts.
    pub fn with<R>(&self, f: impl FnOnce(&mut Kernel<P>) -> R) -> R {
        critical_section(|cs| match self.kernel.borrow_mut(cs) {
            Some(kernel) => f(kernel),
            None => fatal(OsError::NotInitialized),
        })
    }

    /// Repeat a blocking step until it is ready.
    ///
    /// Each `Pending` leaves the caller blocked with a yield requested; the
    /// switch happens as the critical section ends, and the loop resumes
    /// once the caller is dispatched again.
    fn block_on<R>(
        &self,
        timeout: OsTick,
        mut step: impl FnMut(&mut Kernel<P>, &mut Wait) -> Poll<OsResult<R>>,
    ) -> OsResult<R> {
        debug_assert!(!is_isr_context());
        let mut wait = Wait::new(timeout);
        loop {
            if let Poll::Ready(result) = self.with(|k| step(k, &mut wait)) {
                return result;
            }
        }
    }

    // ============ Lifecycle ============

    /// Create the idle task and hand the CPU to the first task.
    ///
    /// On hardware this does not come back: the first switch fires as soon
    /// as the critical section ends.
    pub fn start(&'static self, idle_stack: &'static mut [OsStkElement]) -> OsResult<()>
    where
        P: 'static,
    {
        let arg = self as *const Self as *mut ();
        self.with(|k| {
            k.sched.port_mut().attach(self);
            k.start(idle_stack, idle_task::<P> as OsTaskFn, arg).map(|_| ())
        })
    }

    pub fn is_running(&self) -> bool {
        critical_section(|cs| {
            self.kernel
                .borrow_mut(cs)
                .as_ref()
                .is_some_and(|k| k.sched.is_running())
        })
    }

    pub fn scheduler_suspend(&self) {
        self.with(|k| k.sched.scheduler_suspend())
    }

    /// Returns true if resuming already requested a switch
    pub fn scheduler_resume(&self) -> bool {
        self.with(|k| k.sched.scheduler_resume())
    }

    // ============ Tasks ============

    pub fn task_create(
        &self,
        name: &'static str,
        entry: OsTaskFn,
        arg: *mut (),
        prio: OsPrio,
        stack: &'static mut [OsStkElement],
    ) -> OsResult<TaskHandle> {
        self.with(|k| k.sched.task_create(name, entry, arg, prio, stack))
    }

    pub fn current_task(&self) -> Option<TaskHandle> {
        self.with(|k| k.sched.current_task())
    }

    pub fn task_yield(&self) {
        self.with(|k| k.sched.task_yield())
    }

    pub fn task_delay(&self, ticks: OsTick) {
        self.with(|k| k.sched.task_delay(ticks))
    }

    #[cfg(feature = "task-delay-until")]
    pub fn task_delay_until(&self, prev_wake: &mut OsTick, increment: OsTick) -> bool {
        self.with(|k| k.sched.task_delay_until(prev_wake, increment))
    }

    pub fn task_priority_get(&self, task: Option<TaskHandle>) -> OsPrio {
        self.with(|k| k.sched.task_priority_get(task))
    }

    #[cfg(feature = "task-priority-set")]
    pub fn task_priority_set(&self, task: Option<TaskHandle>, prio: OsPrio) {
        self.with(|k| k.sched.task_priority_set(task, prio))
    }

    #[cfg(feature = "task-suspend")]
    pub fn task_suspend(&self, task: Option<TaskHandle>) -> OsResult<()> {
        self.with(|k| k.sched.task_suspend(task))
    }

    #[cfg(feature = "task-suspend")]
    pub fn task_resume(&self, task: TaskHandle) -> OsResult<()> {
        self.with(|k| k.sched.task_resume(task))
    }

    #[cfg(feature = "task-suspend")]
    pub fn task_resume_from_isr(&self, task: TaskHandle) -> OsResult<bool> {
        self.with(|k| k.sched.task_resume_from_isr(task))
    }

    pub fn task_state(&self, task: TaskHandle) -> TaskState {
        self.with(|k| k.sched.task_state(task))
    }

    pub fn stack_high_water_mark(&self, task: Option<TaskHandle>) -> usize {
        self.with(|k| k.sched.stack_high_water_mark(task))
    }

    pub fn tick_count(&self) -> OsTick {
        self.with(|k| k.sched.tick_count())
    }

    // ============ Queues ============

    pub fn queue_create(&self, capacity: usize, item_size: usize) -> OsResult<QueueHandle> {
        self.with(|k| k.queue_create(capacity, item_size))
    }

    /// Send to the back, blocking up to `timeout` ticks for room
    pub fn queue_send(&self, q: QueueHandle, item: &[u8], timeout: OsTick) -> OsResult<()> {
        self.block_on(timeout, |k, w| k.queue_send(q, item, w))
    }

    pub fn queue_send_to_front(&self, q: QueueHandle, item: &[u8], timeout: OsTick) -> OsResult<()> {
        self.block_on(timeout, |k, w| k.queue_send_to_front(q, item, w))
    }

    pub fn queue_overwrite(&self, q: QueueHandle, item: &[u8]) -> OsResult<()> {
        self.with(|k| k.queue_overwrite(q, item))
    }

    /// Receive the oldest item, blocking up to `timeout` ticks for one
    pub fn queue_receive(&self, q: QueueHandle, out: &mut [u8], timeout: OsTick) -> OsResult<()> {
        self.block_on(timeout, |k, w| k.queue_receive(q, &mut *out, w))
    }

    pub fn queue_peek(&self, q: QueueHandle, out: &mut [u8], timeout: OsTick) -> OsResult<()> {
        self.block_on(timeout, |k, w| k.queue_peek(q, &mut *out, w))
    }

    pub fn queue_send_from_isr(&self, q: QueueHandle, item: &[u8]) -> OsResult<bool> {
        self.with(|k| k.queue_send_from_isr(q, item))
    }

    pub fn queue_receive_from_isr(&self, q: QueueHandle, out: &mut [u8]) -> OsResult<bool> {
        self.with(|k| k.queue_receive_from_isr(q, out))
    }

    pub fn queue_messages_waiting(&self, q: QueueHandle) -> usize {
        self.with(|k| k.queue_messages_waiting(q))
    }

    pub fn queue_spaces_available(&self, q: QueueHandle) -> usize {
        self.with(|k| k.queue_spaces_available(q))
    }

    pub fn queue_reset(&self, q: QueueHandle) {
        self.with(|k| k.queue_reset(q))
    }

    // ============ Semaphores ============

    #[cfg(feature = "sem")]
    pub fn semaphore_create(&self, initially_signaled: bool) -> SemaphoreHandle {
        self.with(|k| k.semaphore_create(initially_signaled))
    }

    /// Take the semaphore, blocking up to `timeout` ticks
    #[cfg(feature = "sem")]
    pub fn semaphore_take(&self, sem: SemaphoreHandle, timeout: OsTick) -> OsResult<()> {
        self.block_on(timeout, |k, w| k.semaphore_take(sem, w))
    }

    #[cfg(feature = "sem")]
    pub fn semaphore_give(&self, sem: SemaphoreHandle) -> OsResult<()> {
        self.with(|k| k.semaphore_give(sem))
    }

    #[cfg(feature = "sem")]
    pub fn semaphore_give_from_isr(&self, sem: SemaphoreHandle) -> OsResult<bool> {
        self.with(|k| k.semaphore_give_from_isr(sem))
    }
}

impl<P: Port> Default for Rtos<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Port> KernelHooks for Rtos<P> {
    fn switch_context(&self, sp: *mut OsStkElement) -> *mut OsStkElement {
        self.with(|k| k.context_switch(sp))
    }

    fn tick(&self) {
        self.with(|k| {
            k.on_tick();
        })
    }
}
