//! Task Control Block and the task arena
//!
//! TCBs live in a fixed arena inside the scheduler and are addressed by
//! [`TaskHandle`]. Slots are handed out in order and never reused.

use crate::config::{CFG_MAX_PRIORITIES, CFG_MAX_TASKS, CFG_STK_FILL};
use crate::list::{ItemKey, ItemKind, ItemRef, ItemStore, ListItem};
use crate::types::{OsPrio, OsStkElement};

use super::OsTaskFn;

/// Stable handle to a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskHandle(u16);

impl TaskHandle {
    #[inline]
    pub(crate) const fn from_index(index: usize) -> Self {
        TaskHandle(index as u16)
    }

    /// Arena slot, also the task's id
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Event item key for a priority: higher priorities sort first
#[inline]
pub(crate) const fn event_key(prio: OsPrio) -> ItemKey {
    (CFG_MAX_PRIORITIES - prio as usize) as ItemKey
}

/// Task Control Block
pub struct Tcb {
    // ============ Stack ============
    /// Saved stack pointer while switched out
    pub stk_ptr: *mut OsStkElement,
    /// Lowest address of the stack
    pub stk_base: *mut OsStkElement,
    /// Stack size in words
    pub stk_size: usize,

    // ============ Identification ============
    pub name: &'static str,
    pub prio: OsPrio,

    // ============ List membership ============
    /// Ready, delayed or suspended list
    pub state_item: ListItem,
    /// Wait list or pending-ready list
    pub event_item: ListItem,

    // ============ Entry point ============
    pub entry: Option<OsTaskFn>,
    pub arg: *mut (),

    /// User-defined extension data
    pub ext_ptr: *mut (),
}

impl Tcb {
    /// Create an empty TCB
    pub const fn new() -> Self {
        Tcb {
            stk_ptr: core::ptr::null_mut(),
            stk_base: core::ptr::null_mut(),
            stk_size: 0,
            name: "",
            prio: 0,
            state_item: ListItem::new(),
            event_item: ListItem::new(),
            entry: None,
            arg: core::ptr::null_mut(),
            ext_ptr: core::ptr::null_mut(),
        }
    }

    /// Words at the bottom of the stack that still hold the fill pattern
    pub fn stk_free(&self) -> usize {
        if self.stk_base.is_null() {
            return 0;
        }
        let stack = unsafe { core::slice::from_raw_parts(self.stk_base, self.stk_size) };
        stack.iter().take_while(|&&w| w == CFG_STK_FILL).count()
    }
}

impl Default for Tcb {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed arena of TCBs
pub struct TaskTable {
    tcbs: [Tcb; CFG_MAX_TASKS],
    count: usize,
}

impl TaskTable {
    pub const fn new() -> Self {
        Self {
            tcbs: [const { Tcb::new() }; CFG_MAX_TASKS],
            count: 0,
        }
    }

    /// Number of tasks created so far
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Claim the next slot, or `None` when the arena is full
    pub fn alloc(&mut self) -> Option<TaskHandle> {
        if self.count >= CFG_MAX_TASKS {
            return None;
        }
        let handle = TaskHandle::from_index(self.count);
        self.count += 1;
        self.tcbs[handle.index()] = Tcb::new();
        Some(handle)
    }

    /// True if `handle` names a created task
    #[inline]
    pub fn is_valid(&self, handle: TaskHandle) -> bool {
        handle.index() < self.count
    }

    #[inline]
    pub fn get(&self, handle: TaskHandle) -> &Tcb {
        &self.tcbs[handle.index()]
    }

    #[inline]
    pub fn get_mut(&mut self, handle: TaskHandle) -> &mut Tcb {
        &mut self.tcbs[handle.index()]
    }

    #[inline]
    pub fn prio(&self, handle: TaskHandle) -> OsPrio {
        self.tcbs[handle.index()].prio
    }
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ItemStore for TaskTable {
    #[inline]
    fn item(&self, r: ItemRef) -> &ListItem {
        let tcb = &self.tcbs[r.owner.index()];
        match r.kind {
            ItemKind::State => &tcb.state_item,
            ItemKind::Event => &tcb.event_item,
        }
    }

    #[inline]
    fn item_mut(&mut self, r: ItemRef) -> &mut ListItem {
        let tcb = &mut self.tcbs[r.owner.index()];
        match r.kind {
            ItemKind::State => &mut tcb.state_item,
            ItemKind::Event => &mut tcb.event_item,
        }
    }
}
