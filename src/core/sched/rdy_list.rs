//! Per-priority ready lists
//!
//! One round-robin list per priority plus the top-ready-priority hint.
//! The hint is an upper bound: it is raised whenever a task becomes ready
//! and only lowered by dispatch, which walks down from it to the first
//! non-empty list.

use crate::config::CFG_MAX_PRIORITIES;
use crate::list::{ItemRef, ListId, OrderedList};
use crate::task::{TaskHandle, TaskTable};
use crate::types::OsPrio;

/// Ready lists indexed by priority
pub struct ReadyLists {
    lists: [OrderedList; CFG_MAX_PRIORITIES],
    top_ready: OsPrio,
}

impl ReadyLists {
    pub fn new() -> Self {
        Self {
            lists: core::array::from_fn(|p| OrderedList::new(ListId::Ready(p as OsPrio))),
            top_ready: 0,
        }
    }

    #[inline]
    pub fn list(&self, prio: OsPrio) -> &OrderedList {
        &self.lists[prio as usize]
    }

    #[inline]
    pub fn list_mut(&mut self, prio: OsPrio) -> &mut OrderedList {
        &mut self.lists[prio as usize]
    }

    /// Highest priority that may hold a ready task
    #[inline]
    pub fn top_ready(&self) -> OsPrio {
        self.top_ready
    }

    #[inline]
    pub(crate) fn set_top_ready(&mut self, prio: OsPrio) {
        self.top_ready = prio;
    }

    /// Append `task` to the ready list of its priority, behind the cursor
    pub fn insert(&mut self, tasks: &mut TaskTable, task: TaskHandle) {
        let prio = tasks.prio(task);
        if prio > self.top_ready {
            self.top_ready = prio;
        }
        self.lists[prio as usize].insert_end(tasks, ItemRef::state(task));
    }
}

impl Default for ReadyLists {
    fn default() -> Self {
        Self::new()
    }
}
