//! Kernel state and startup
//!
//! [`Kernel`] bundles the scheduler with the queue pool. It is a plain
//! value driven through `&mut`: the port's exception handlers reach it
//! through [`Rtos`](crate::core::rtos::Rtos), host tests drive it directly
//! and play the part of the switch and tick interrupts themselves.

use crate::config::CFG_PRIO_IDLE;
use crate::error::{fatal, OsError, OsResult};
use crate::port::Port;
use crate::sched::Scheduler;
use crate::sync::queue::QueuePool;
use crate::task::{OsTaskFn, TaskHandle};
use crate::types::OsStkElement;

/// Scheduler plus the objects tasks block on
pub struct Kernel<P: Port> {
    pub sched: Scheduler<P>,
    pub queues: QueuePool,
}

impl<P: Port> Kernel<P> {
    pub fn new(port: P) -> Self {
        Self {
            sched: Scheduler::new(port),
            queues: QueuePool::new(),
        }
    }

    /// Create the idle task and start multitasking.
    ///
    /// The highest-priority ready task becomes current and the port arms
    /// the first switch into it.
    ///
    /// # Returns
    /// * `Ok(idle)` - Handle of the idle task
    /// * `Err(OsError::InvalidState)` - Already started
    ///
    /// Failing to create the idle task halts.
    pub fn start(
        &mut self,
        idle_stack: &'static mut [OsStkElement],
        idle_entry: OsTaskFn,
        idle_arg: *mut (),
    ) -> OsResult<TaskHandle> {
        if self.sched.running {
            return Err(OsError::InvalidState);
        }

        let idle = match self
            .sched
            .task_create("IDLE", idle_entry, idle_arg, CFG_PRIO_IDLE, idle_stack)
        {
            Ok(task) => task,
            Err(e) => fatal(e),
        };

        self.sched.reset_next_unblock_time();
        self.sched.running = true;
        self.sched.switch_context();

        crate::info!(
            "kernel started: {} tasks, first task {}",
            self.sched.task_count(),
            self.sched.current_or_fatal().index()
        );

        self.sched.port.start_first_task();
        Ok(idle)
    }

    /// Timer interrupt body. Requests a yield when the tick calls for one.
    ///
    /// Returns true if it did.
    pub fn on_tick(&mut self) -> bool {
        if !self.sched.running {
            return false;
        }
        let switch = self.sched.tick();
        if switch {
            self.sched.port.request_yield();
        }
        switch
    }

    /// Switch interrupt body: store the outgoing task's stack pointer,
    /// pick the next task and return where its context was saved.
    ///
    /// A null `sp` marks the first switch, which enters the task `start`
    /// already chose.
    pub fn context_switch(&mut self, sp: *mut OsStkElement) -> *mut OsStkElement {
        if !sp.is_null() {
            if let Some(cur) = self.sched.current {
                self.sched.tasks.get_mut(cur).stk_ptr = sp;
            }
            self.sched.switch_context();
        }

        match self.sched.current {
            Some(task) => self.sched.tasks.get(task).stk_ptr,
            None => core::ptr::null_mut(),
        }
    }
}
