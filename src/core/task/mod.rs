//! Task management module
//!
//! Task creation, priority control, suspend/resume and state queries.
//! Every operation here is a method on [`Scheduler`]; the caller holds a
//! critical section.

mod tcb;

pub use tcb::{TaskHandle, TaskTable, Tcb};
pub(crate) use tcb::event_key;

use crate::config::{CFG_MAX_PRIORITIES, CFG_STK_FILL, CFG_STK_SIZE_MIN};
use crate::error::{fatal, OsError, OsResult};
use crate::list::{ItemRef, ListId};
use crate::port::Port;
use crate::sched::Scheduler;
use crate::types::{OsPrio, OsStkElement, TaskState};

/// Task entry point function type
pub type OsTaskFn = fn(*mut ()) -> !;

impl<P: Port> Scheduler<P> {
    /// Create a new task
    ///
    /// The stack is filled with [`CFG_STK_FILL`], handed to the port for its
    /// initial frame, and the task joins the back of its priority's ready
    /// list. The first task created becomes the current task; before the
    /// scheduler starts, any later task of equal or higher priority takes
    /// its place.
    ///
    /// # Arguments
    /// * `name` - Task name for debugging
    /// * `entry` - Task entry point function
    /// * `arg` - Argument to pass to the entry point
    /// * `prio` - Task priority, `0..CFG_MAX_PRIORITIES`
    /// * `stack` - Stack memory, at least `CFG_STK_SIZE_MIN` words
    ///
    /// # Returns
    /// * `Ok(handle)` - Task created
    /// * `Err(OsError::InvalidArgument)` - Stack too small
    /// * `Err(OsError::NoFreeMem)` - Task arena exhausted
    ///
    /// A priority out of range is a configuration defect and halts.
    pub fn task_create(
        &mut self,
        name: &'static str,
        entry: OsTaskFn,
        arg: *mut (),
        prio: OsPrio,
        stack: &'static mut [OsStkElement],
    ) -> OsResult<TaskHandle> {
        if prio as usize >= CFG_MAX_PRIORITIES {
            fatal(OsError::InvalidArgument);
        }

        if stack.len() < CFG_STK_SIZE_MIN {
            return Err(OsError::InvalidArgument);
        }

        let task = self.tasks.alloc().ok_or(OsError::NoFreeMem)?;

        stack.fill(CFG_STK_FILL);
        let stk_base = stack.as_mut_ptr();
        let stk_size = stack.len();
        let stk_ptr = unsafe { self.port.init_stack(stk_base, stk_size, entry, arg) };

        let tcb = self.tasks.get_mut(task);
        tcb.name = name;
        tcb.prio = prio;
        tcb.stk_base = stk_base;
        tcb.stk_size = stk_size;
        tcb.stk_ptr = stk_ptr;
        tcb.entry = Some(entry);
        tcb.arg = arg;
        tcb.state_item.key = 0;
        tcb.event_item.key = event_key(prio);

        if prio > self.top_used_prio {
            self.top_used_prio = prio;
        }

        match self.current {
            None => self.current = Some(task),
            Some(_) if !self.running && self.outranks_current(prio, true) => {
                self.current = Some(task)
            }
            Some(_) => {}
        }

        let preempts = self.running && self.outranks_current(prio, false);
        self.add_to_ready(task);

        crate::debug!("task {} created at prio {}", task.index(), prio);

        if preempts {
            self.port.request_yield();
        }
        Ok(task)
    }

    /// Resolve `None` to the current task and reject foreign handles
    pub(crate) fn resolve(&self, task: Option<TaskHandle>) -> TaskHandle {
        match task {
            None => self.current_or_fatal(),
            Some(t) if self.tasks.is_valid(t) => t,
            Some(_) => fatal(OsError::InvalidArgument),
        }
    }

    /// Priority of `task`, or of the caller when `None`
    pub fn task_priority_get(&self, task: Option<TaskHandle>) -> OsPrio {
        self.tasks.prio(self.resolve(task))
    }

    /// Change the priority of `task`, or of the caller when `None`.
    ///
    /// Requests a yield when another task is raised above the running
    /// task, or when the running task lowers itself. A task raising its
    /// own priority keeps running without a yield.
    #[cfg(feature = "task-priority-set")]
    pub fn task_priority_set(&mut self, task: Option<TaskHandle>, new_prio: OsPrio) {
        if new_prio as usize >= CFG_MAX_PRIORITIES {
            fatal(OsError::InvalidArgument);
        }

        let task = self.resolve(task);
        let old_prio = self.tasks.prio(task);
        if old_prio == new_prio {
            return;
        }

        let is_current = self.current == Some(task);
        let yield_required = if new_prio > old_prio {
            !is_current && self.outranks_current(new_prio, false)
        } else {
            is_current
        };

        let in_ready = self.container_of(ItemRef::state(task)) == Some(ListId::Ready(old_prio));
        if in_ready {
            self.unlink(ItemRef::state(task));
        }

        let tcb = self.tasks.get_mut(task);
        tcb.prio = new_prio;
        tcb.event_item.key = event_key(new_prio);

        // Keep a wait list in priority order under the new key
        if let Some(list @ ListId::Event(_)) = self.container_of(ItemRef::event(task)) {
            self.lists.get_mut(list).remove(&mut self.tasks, ItemRef::event(task));
            self.lists.get_mut(list).insert(&mut self.tasks, ItemRef::event(task));
        }

        if in_ready {
            self.add_to_ready(task);
        }

        if yield_required && self.running {
            self.port.request_yield();
        }
    }

    /// True if `task` was explicitly suspended, as opposed to blocked
    /// without a deadline or readied from an ISR.
    #[cfg(feature = "task-suspend")]
    pub(crate) fn is_task_suspended(&self, task: TaskHandle) -> bool {
        self.container_of(ItemRef::state(task)) == Some(ListId::Suspended)
            && self.container_of(ItemRef::event(task)).is_none()
    }

    /// Suspend `task`, or the caller when `None`.
    ///
    /// The task leaves every list it is on, wait lists included, until
    /// resumed. Suspending the running task requests a yield.
    ///
    /// # Returns
    /// * `Err(OsError::InvalidState)` - Task already suspended
    #[cfg(feature = "task-suspend")]
    pub fn task_suspend(&mut self, task: Option<TaskHandle>) -> OsResult<()> {
        let task = self.resolve(task);
        if self.is_task_suspended(task) {
            return Err(OsError::InvalidState);
        }

        self.unlink(ItemRef::state(task));
        self.unlink(ItemRef::event(task));
        self.lists.suspended.insert_end(&mut self.tasks, ItemRef::state(task));

        crate::trace!("task {} suspended", task.index());

        if self.running {
            self.reset_next_unblock_time();
        }

        if self.current == Some(task) {
            if self.running {
                if self.suspended_depth > 0 {
                    fatal(OsError::InvalidState);
                }
                self.port.request_yield();
            } else if self.lists.suspended.len() == self.tasks.count() {
                // Nothing left to start with
                self.current = None;
            } else {
                self.switch_context();
            }
        }
        Ok(())
    }

    /// Make a suspended task ready again.
    ///
    /// Requests a yield when the task ranks at or above the running task.
    ///
    /// # Returns
    /// * `Err(OsError::InvalidState)` - Task is not suspended
    #[cfg(feature = "task-suspend")]
    pub fn task_resume(&mut self, task: TaskHandle) -> OsResult<()> {
        let task = self.resolve(Some(task));
        if self.current == Some(task) || !self.is_task_suspended(task) {
            return Err(OsError::InvalidState);
        }

        self.unlink(ItemRef::state(task));
        self.add_to_ready(task);

        crate::trace!("task {} resumed", task.index());

        if self.running && self.outranks_current(self.tasks.prio(task), true) {
            self.port.request_yield();
        }
        Ok(())
    }

    /// Resume from interrupt context.
    ///
    /// With the scheduler suspended the task is parked on the pending-ready
    /// list and moved on `scheduler_resume`.
    ///
    /// # Returns
    /// * `Ok(true)` - The ISR should request a context switch on exit
    /// * `Err(OsError::InvalidState)` - Task is not suspended
    #[cfg(feature = "task-suspend")]
    pub fn task_resume_from_isr(&mut self, task: TaskHandle) -> OsResult<bool> {
        let task = self.resolve(Some(task));
        if !self.is_task_suspended(task) {
            return Err(OsError::InvalidState);
        }

        if self.suspended_depth > 0 {
            self.lists
                .pending_ready
                .insert_end(&mut self.tasks, ItemRef::event(task));
            return Ok(false);
        }

        let yield_required = self.outranks_current(self.tasks.prio(task), true);
        if yield_required {
            self.yield_pending = true;
        }
        self.unlink(ItemRef::state(task));
        self.add_to_ready(task);
        Ok(yield_required)
    }

    /// State of `task` as seen from outside it
    pub fn task_state(&self, task: TaskHandle) -> TaskState {
        let task = self.resolve(Some(task));
        if self.current == Some(task) {
            return TaskState::Running;
        }

        let event = self.container_of(ItemRef::event(task));
        if event == Some(ListId::PendingReady) {
            return TaskState::Ready;
        }

        match self.container_of(ItemRef::state(task)) {
            Some(ListId::Delayed(_)) => TaskState::Blocked,
            Some(ListId::Suspended) if event.is_some() => TaskState::Blocked,
            Some(ListId::Suspended) => TaskState::Suspended,
            _ => TaskState::Ready,
        }
    }

    pub fn task_name(&self, task: TaskHandle) -> &'static str {
        self.tasks.get(self.resolve(Some(task))).name
    }

    /// Fewest free stack words observed since creation
    pub fn stack_high_water_mark(&self, task: Option<TaskHandle>) -> usize {
        self.tasks.get(self.resolve(task)).stk_free()
    }

    /// Extension pointer stored with the task
    pub fn task_ext(&self, task: Option<TaskHandle>) -> *mut () {
        self.tasks.get(self.resolve(task)).ext_ptr
    }

    pub fn set_task_ext(&mut self, task: Option<TaskHandle>, ext: *mut ()) {
        let task = self.resolve(task);
        self.tasks.get_mut(task).ext_ptr = ext;
    }

    /// Saved stack pointer of `task`, valid while it is switched out
    pub fn task_stack_pointer(&self, task: TaskHandle) -> *mut OsStkElement {
        self.tasks.get(self.resolve(Some(task))).stk_ptr
    }
}
