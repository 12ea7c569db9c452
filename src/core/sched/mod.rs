//! Scheduler module
//!
//! Owns every task list and the dispatch state. Tasks move between lists
//! by their embedded items:
//!
//! | state              | state item            | event item              |
//! |--------------------|-----------------------|-------------------------|
//! | ready / running    | ready list            | none                    |
//! | blocked, timed     | a delayed list        | optional wait list      |
//! | blocked, forever   | suspended list        | wait list               |
//! | suspended          | suspended list        | none                    |
//! | readied in ISR     | unchanged             | pending-ready list      |
//!
//! All methods assume the caller holds a critical section; the `&mut`
//! borrow of the scheduler is only reachable through one.

mod rdy_list;

pub use rdy_list::ReadyLists;

use crate::config::{CFG_INITIAL_TICK_COUNT, CFG_MAX_EVENT_LISTS};
use crate::error::{fatal, OsError};
use crate::list::{ItemRef, ItemStore, ListId, OrderedList};
use crate::port::{Dispatch, Port};
use crate::task::{TaskHandle, TaskTable};
use crate::types::{OsPrio, OsTick};

/// Every list a task item can live in
pub struct TaskLists {
    pub ready: ReadyLists,
    delayed: [OrderedList; 2],
    /// Physical slot of the delayed list for the current tick epoch
    active: u8,
    pub suspended: OrderedList,
    pub pending_ready: OrderedList,
    events: [OrderedList; CFG_MAX_EVENT_LISTS],
}

impl TaskLists {
    pub fn new() -> Self {
        Self {
            ready: ReadyLists::new(),
            delayed: [
                OrderedList::new(ListId::Delayed(0)),
                OrderedList::new(ListId::Delayed(1)),
            ],
            active: 0,
            suspended: OrderedList::new(ListId::Suspended),
            pending_ready: OrderedList::new(ListId::PendingReady),
            events: core::array::from_fn(|i| OrderedList::new(ListId::Event(i as u16))),
        }
    }

    pub fn get(&self, id: ListId) -> &OrderedList {
        match id {
            ListId::Ready(p) => self.ready.list(p),
            ListId::Delayed(i) => &self.delayed[i as usize],
            ListId::Suspended => &self.suspended,
            ListId::PendingReady => &self.pending_ready,
            ListId::Event(i) => &self.events[i as usize],
        }
    }

    pub fn get_mut(&mut self, id: ListId) -> &mut OrderedList {
        match id {
            ListId::Ready(p) => self.ready.list_mut(p),
            ListId::Delayed(i) => &mut self.delayed[i as usize],
            ListId::Suspended => &mut self.suspended,
            ListId::PendingReady => &mut self.pending_ready,
            ListId::Event(i) => &mut self.events[i as usize],
        }
    }

    /// Delayed list for wake ticks in the current epoch
    #[inline]
    pub fn delayed(&self) -> &OrderedList {
        &self.delayed[self.active as usize]
    }

    #[inline]
    pub fn delayed_mut(&mut self) -> &mut OrderedList {
        &mut self.delayed[self.active as usize]
    }

    /// Delayed list for wake ticks past the next wraparound
    #[inline]
    pub fn overflow_delayed_mut(&mut self) -> &mut OrderedList {
        &mut self.delayed[(self.active ^ 1) as usize]
    }

    /// Swap the roles of the two delayed lists
    pub(crate) fn swap_delayed(&mut self) {
        self.active ^= 1;
    }
}

impl Default for TaskLists {
    fn default() -> Self {
        Self::new()
    }
}

/// The scheduler: task arena, task lists and dispatch state
pub struct Scheduler<P: Port> {
    pub(crate) port: P,
    pub(crate) tasks: TaskTable,
    pub(crate) lists: TaskLists,

    // ============ Dispatch state ============
    pub(crate) current: Option<TaskHandle>,
    pub(crate) running: bool,
    pub(crate) top_used_prio: OsPrio,
    /// Scheduler suspend nesting
    pub(crate) suspended_depth: u32,
    /// A switch was wanted while it could not happen
    pub(crate) yield_pending: bool,
    /// Loader-hook refusals since start
    pub(crate) dispatch_misses: u32,

    // ============ Time state ============
    pub(crate) tick_count: OsTick,
    /// Ticks that arrived while the scheduler was suspended
    pub(crate) pended_ticks: OsTick,
    pub(crate) num_overflows: u32,
    /// Earliest wake tick in the active delayed list
    pub(crate) next_unblock_time: OsTick,
}

impl<P: Port> Scheduler<P> {
    /// Create a scheduler with empty lists
    pub fn new(port: P) -> Self {
        Self {
            port,
            tasks: TaskTable::new(),
            lists: TaskLists::new(),
            current: None,
            running: false,
            top_used_prio: 0,
            suspended_depth: 0,
            yield_pending: false,
            dispatch_misses: 0,
            tick_count: CFG_INITIAL_TICK_COUNT,
            pended_ticks: 0,
            num_overflows: 0,
            next_unblock_time: OsTick::MAX,
        }
    }

    // ============ Accessors ============

    #[inline]
    pub fn port(&self) -> &P {
        &self.port
    }

    #[inline]
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// The task dispatch last committed to
    #[inline]
    pub fn current_task(&self) -> Option<TaskHandle> {
        self.current
    }

    #[inline]
    pub fn task_count(&self) -> usize {
        self.tasks.count()
    }

    /// Highest priority any task was created with
    #[inline]
    pub fn top_used_priority(&self) -> OsPrio {
        self.top_used_prio
    }

    /// Current top-ready-priority hint
    #[inline]
    pub fn top_ready_priority(&self) -> OsPrio {
        self.lists.ready.top_ready()
    }

    /// Loader-hook refusals since the scheduler was created
    #[inline]
    pub fn dispatch_misses(&self) -> u32 {
        self.dispatch_misses
    }

    /// True while `scheduler_suspend` calls outnumber `scheduler_resume` calls
    #[inline]
    pub fn is_scheduler_suspended(&self) -> bool {
        self.suspended_depth > 0
    }

    /// A switch requested while the scheduler was suspended, not yet taken
    #[inline]
    pub fn is_yield_pending(&self) -> bool {
        self.yield_pending
    }

    #[inline]
    pub(crate) fn current_prio(&self) -> Option<OsPrio> {
        self.current.map(|t| self.tasks.prio(t))
    }

    /// True if `prio` beats the running task, or ties with it when `or_equal`
    #[inline]
    pub(crate) fn outranks_current(&self, prio: OsPrio, or_equal: bool) -> bool {
        match self.current_prio() {
            Some(cur) if or_equal => prio >= cur,
            Some(cur) => prio > cur,
            None => false,
        }
    }

    pub(crate) fn current_or_fatal(&self) -> TaskHandle {
        match self.current {
            Some(t) => t,
            None => fatal(OsError::InvalidState),
        }
    }

    // ============ List plumbing ============

    /// Unlink `item` from whichever list holds it; `None` if it was free.
    pub(crate) fn unlink(&mut self, item: ItemRef) -> Option<usize> {
        let id = self.tasks.item(item).container()?;
        Some(self.lists.get_mut(id).remove(&mut self.tasks, item))
    }

    /// List currently holding `item`
    pub(crate) fn container_of(&self, item: ItemRef) -> Option<ListId> {
        self.tasks.item(item).container()
    }

    /// Put `task` at the back of its priority's ready list
    pub(crate) fn add_to_ready(&mut self, task: TaskHandle) {
        self.lists.ready.insert(&mut self.tasks, task);
    }

    // ============ Dispatch ============

    /// Pick the task to run next, honoring scheduler suspension.
    ///
    /// Called by the port's switch handler. While the scheduler is
    /// suspended the switch is recorded and taken on resume.
    pub fn switch_context(&mut self) {
        if self.suspended_depth > 0 {
            self.yield_pending = true;
            return;
        }
        self.yield_pending = false;
        self.select_next();
    }

    /// Commit the highest-priority dispatchable task as the running task.
    ///
    /// Walks down from the top-ready hint. Inside a priority the cursor
    /// advances round-robin, and the loader hook may refuse each task once;
    /// when every task at a level refused, the walk continues one level
    /// lower. The hint is then left at the first level that refused, so
    /// those tasks are considered again on the next dispatch.
    fn select_next(&mut self) -> TaskHandle {
        let mut prio = self.lists.ready.top_ready();
        let mut first_miss: Option<OsPrio> = None;

        loop {
            while self.lists.ready.list(prio).is_empty() {
                if prio == 0 {
                    fatal(OsError::InvalidState);
                }
                prio -= 1;
            }

            let candidates = self.lists.ready.list(prio).len();
            for _ in 0..candidates {
                let Some(task) = self
                    .lists
                    .ready
                    .list_mut(prio)
                    .advance_cursor_and_get_owner(&self.tasks)
                else {
                    break;
                };

                match self.port.try_dispatch(task) {
                    Dispatch::Ready => {
                        self.current = Some(task);
                        self.lists.ready.set_top_ready(first_miss.unwrap_or(prio));
                        return task;
                    }
                    Dispatch::NotYetResident => {
                        self.dispatch_misses = self.dispatch_misses.wrapping_add(1);
                        first_miss.get_or_insert(prio);
                        crate::trace!("task {} not resident at prio {}", task.index(), prio);
                    }
                }
            }

            // Nothing at this level could run; the idle level must
            if prio == 0 {
                fatal(OsError::InvalidState);
            }
            prio -= 1;
        }
    }

    /// Voluntarily give up the CPU to an equal-priority task
    pub fn task_yield(&mut self) {
        self.port.request_yield();
    }

    /// Record a switch that has to wait for the next opportunity
    #[inline]
    pub(crate) fn missed_yield(&mut self) {
        self.yield_pending = true;
    }

    // ============ Scheduler suspension ============

    /// Stop task switching without masking interrupts. Nests.
    pub fn scheduler_suspend(&mut self) {
        self.suspended_depth += 1;
    }

    /// Undo one `scheduler_suspend`.
    ///
    /// The outermost resume moves ISR-readied tasks to their ready lists,
    /// replays ticks counted while suspended, and requests a yield if any
    /// of that warrants one. Returns true if it requested the yield.
    pub fn scheduler_resume(&mut self) -> bool {
        if self.suspended_depth == 0 {
            fatal(OsError::InvalidState);
        }
        self.suspended_depth -= 1;

        if self.suspended_depth > 0 || self.tasks.count() == 0 {
            return false;
        }

        let mut readied = false;
        while let Some(task) = self.lists.pending_ready.head_owner() {
            self.unlink(ItemRef::event(task));
            self.unlink(ItemRef::state(task));
            self.add_to_ready(task);
            readied = true;

            if self.outranks_current(self.tasks.prio(task), true) {
                self.yield_pending = true;
            }
        }

        // A readied task may have been the next to wake
        if readied {
            self.reset_next_unblock_time();
        }

        let mut pended = self.pended_ticks;
        while pended > 0 {
            if self.tick() {
                self.yield_pending = true;
            }
            pended -= 1;
        }
        self.pended_ticks = 0;

        if self.yield_pending && self.running {
            self.port.request_yield();
            return true;
        }
        false
    }

    // ============ Event lists ============

    /// Block the running task on `list` for up to `ticks`.
    ///
    /// The event item goes in by priority; the state item moves to a
    /// delayed list, or to the suspended list for an endless wait.
    pub(crate) fn place_on_event_list(&mut self, list: ListId, ticks: OsTick) {
        let task = self.current_or_fatal();
        self.lists.get_mut(list).insert(&mut self.tasks, ItemRef::event(task));
        self.add_current_to_delayed_list(ticks, true);
    }

    /// Wake the highest-priority waiter on `list`.
    ///
    /// While the scheduler is suspended the task is parked on the
    /// pending-ready list instead. Returns true if the woken task
    /// outranks the running one.
    pub(crate) fn remove_from_event_list(&mut self, list: ListId) -> bool {
        let Some(task) = self.lists.get(list).head_owner() else {
            return false;
        };
        self.lists.get_mut(list).remove(&mut self.tasks, ItemRef::event(task));

        if self.suspended_depth == 0 {
            self.unlink(ItemRef::state(task));
            self.add_to_ready(task);
        } else {
            self.lists
                .pending_ready
                .insert_end(&mut self.tasks, ItemRef::event(task));
        }

        let higher = self.outranks_current(self.tasks.prio(task), false);
        if higher {
            self.yield_pending = true;
        }
        higher
    }

    /// True if no task waits on `list`
    #[inline]
    pub(crate) fn event_list_is_empty(&self, list: ListId) -> bool {
        self.lists.get(list).is_empty()
    }
}
