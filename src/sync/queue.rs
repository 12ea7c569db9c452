//! Bounded blocking queues
//!
//! A queue is a ring buffer of `capacity` items of `item_size` bytes carved
//! out of the kernel's queue storage, plus two wait lists owned by the
//! scheduler. Items are copied in and out by value.
//!
//! Task-side operations are single steps: they either finish with
//! `Poll::Ready`, or block the caller on a wait list, request a yield and
//! return `Poll::Pending`. The caller repeats the step with the same
//! [`Wait`] once it runs again; [`Rtos`](crate::core::rtos::Rtos) does that
//! loop for tasks.
//!
//! # Lock protocol
//!
//! While a task walks the wait lists it locks the queue. ISR-side sends
//! and receives on a locked queue still move data, but instead of waking a
//! waiter they bump `tx_lock`/`rx_lock`. Unlocking wakes one waiter per
//! counted event, then marks the queue unlocked again.

use core::task::Poll;

use crate::config::{CFG_MAX_QUEUES, CFG_QUEUE_STORAGE_SIZE};
use crate::error::{fatal, OsError, OsResult};
use crate::kernel::Kernel;
use crate::list::ListId;
use crate::port::Port;
use crate::time::Wait;
use crate::types::SendPosition;

/// Stable handle to a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct QueueHandle(u16);

impl QueueHandle {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Queue control block
#[derive(Debug, Clone, Copy)]
struct QueueCb {
    /// Start of the ring buffer in the shared storage
    offset: usize,
    capacity: usize,
    item_size: usize,
    /// Next slot to write
    write: usize,
    /// Next slot to read
    read: usize,
    messages_waiting: usize,
    waiting_to_send: ListId,
    waiting_to_receive: ListId,
    /// `None` while unlocked, else receives counted while locked
    rx_lock: Option<u8>,
    /// `None` while unlocked, else sends counted while locked
    tx_lock: Option<u8>,
}

impl QueueCb {
    const EMPTY: Self = Self {
        offset: 0,
        capacity: 0,
        item_size: 0,
        write: 0,
        read: 0,
        messages_waiting: 0,
        waiting_to_send: ListId::Event(0),
        waiting_to_receive: ListId::Event(0),
        rx_lock: None,
        tx_lock: None,
    };

    #[inline]
    fn is_full(&self) -> bool {
        self.messages_waiting >= self.capacity
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.messages_waiting == 0
    }
}

/// Count one more deferred event, capped at the number of tasks that
/// could possibly be woken.
#[inline]
fn bump_lock(lock: &mut Option<u8>, task_count: usize) {
    if let Some(n) = lock {
        if (*n as usize) < task_count {
            *n = n.saturating_add(1);
        }
    }
}

/// Queue control blocks and the storage behind their ring buffers
pub struct QueuePool {
    queues: [QueueCb; CFG_MAX_QUEUES],
    count: usize,
    storage: [u8; CFG_QUEUE_STORAGE_SIZE],
    used: usize,
}

impl QueuePool {
    pub const fn new() -> Self {
        Self {
            queues: [QueueCb::EMPTY; CFG_MAX_QUEUES],
            count: 0,
            storage: [0; CFG_QUEUE_STORAGE_SIZE],
            used: 0,
        }
    }

    /// Number of queues created so far
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Storage bytes still free for new queues
    #[inline]
    pub fn storage_free(&self) -> usize {
        CFG_QUEUE_STORAGE_SIZE - self.used
    }

    fn create(&mut self, capacity: usize, item_size: usize) -> OsResult<QueueHandle> {
        if capacity == 0 {
            return Err(OsError::InvalidArgument);
        }
        let bytes = capacity
            .checked_mul(item_size)
            .ok_or(OsError::InvalidArgument)?;

        if self.count >= CFG_MAX_QUEUES || bytes > self.storage_free() {
            return Err(OsError::NoFreeMem);
        }

        let index = self.count;
        self.queues[index] = QueueCb {
            offset: self.used,
            capacity,
            item_size,
            waiting_to_send: ListId::Event((index * 2) as u16),
            waiting_to_receive: ListId::Event((index * 2 + 1) as u16),
            ..QueueCb::EMPTY
        };
        self.used += bytes;
        self.count += 1;
        Ok(QueueHandle(index as u16))
    }

    #[inline]
    fn cb(&self, q: QueueHandle) -> &QueueCb {
        if q.index() >= self.count {
            fatal(OsError::InvalidArgument);
        }
        &self.queues[q.index()]
    }

    #[inline]
    fn cb_mut(&mut self, q: QueueHandle) -> &mut QueueCb {
        if q.index() >= self.count {
            fatal(OsError::InvalidArgument);
        }
        &mut self.queues[q.index()]
    }

    fn slot_range(cb: &QueueCb, slot: usize) -> core::ops::Range<usize> {
        let start = cb.offset + slot * cb.item_size;
        start..start + cb.item_size
    }

    /// Copy `item` into the ring buffer at `pos`; short items are zero-padded.
    fn copy_in(&mut self, q: QueueHandle, item: &[u8], pos: SendPosition) {
        let cb = self.cb_mut(q);
        let slot = match pos {
            SendPosition::Front => {
                cb.read = (cb.read + cb.capacity - 1) % cb.capacity;
                cb.read
            }
            SendPosition::Back | SendPosition::Overwrite => {
                let slot = cb.write;
                cb.write = (cb.write + 1) % cb.capacity;
                slot
            }
        };

        // Overwriting the only item of a capacity-1 queue keeps the count
        if pos != SendPosition::Overwrite || cb.messages_waiting == 0 {
            cb.messages_waiting += 1;
        }

        let range = Self::slot_range(cb, slot);
        let dst = &mut self.storage[range];
        dst[..item.len()].copy_from_slice(item);
        dst[item.len()..].fill(0);
    }

    /// Copy the oldest item into `out`, removing it when `remove` is set.
    fn copy_out(&mut self, q: QueueHandle, out: &mut [u8], remove: bool) {
        let cb = self.cb_mut(q);
        let slot = cb.read;
        if remove {
            cb.read = (cb.read + 1) % cb.capacity;
            cb.messages_waiting -= 1;
        }

        let range = Self::slot_range(cb, slot);
        out.copy_from_slice(&self.storage[range][..out.len()]);
    }
}

impl Default for QueuePool {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Port> Kernel<P> {
    /// Create a queue of `capacity` items, each `item_size` bytes.
    ///
    /// # Returns
    /// * `Err(OsError::InvalidArgument)` - Zero capacity
    /// * `Err(OsError::NoFreeMem)` - Queue arena or storage exhausted
    pub fn queue_create(&mut self, capacity: usize, item_size: usize) -> OsResult<QueueHandle> {
        let q = self.queues.create(capacity, item_size)?;
        crate::debug!("queue {} created: {} x {} bytes", q.index(), capacity, item_size);
        Ok(q)
    }

    // ============ Queries ============

    /// Items currently queued
    #[inline]
    pub fn queue_messages_waiting(&self, q: QueueHandle) -> usize {
        self.queues.cb(q).messages_waiting
    }

    /// Free slots
    #[inline]
    pub fn queue_spaces_available(&self, q: QueueHandle) -> usize {
        let cb = self.queues.cb(q);
        cb.capacity - cb.messages_waiting
    }

    #[inline]
    pub fn queue_capacity(&self, q: QueueHandle) -> usize {
        self.queues.cb(q).capacity
    }

    #[inline]
    pub fn queue_item_size(&self, q: QueueHandle) -> usize {
        self.queues.cb(q).item_size
    }

    /// Deferred (receive, send) event counts, `None` while unlocked
    #[inline]
    pub fn queue_lock_counts(&self, q: QueueHandle) -> (Option<u8>, Option<u8>) {
        let cb = self.queues.cb(q);
        (cb.rx_lock, cb.tx_lock)
    }

    // ============ Task side ============

    /// Send `item` to the back of the queue, waiting for room up to `wait`.
    ///
    /// # Returns
    /// * `Poll::Pending` - Caller blocked; repeat with the same `wait`
    /// * `Ready(Err(OsError::Full))` - No room and a zero wait
    /// * `Ready(Err(OsError::Timeout))` - Still no room when the wait ran out
    /// * `Ready(Err(OsError::InvalidSize))` - `item` longer than the item size
    pub fn queue_send(&mut self, q: QueueHandle, item: &[u8], wait: &mut Wait) -> Poll<OsResult<()>> {
        self.queue_send_generic(q, item, wait, SendPosition::Back)
    }

    /// Send `item` to the front of the queue, so it is received next
    pub fn queue_send_to_front(
        &mut self,
        q: QueueHandle,
        item: &[u8],
        wait: &mut Wait,
    ) -> Poll<OsResult<()>> {
        self.queue_send_generic(q, item, wait, SendPosition::Front)
    }

    /// Replace the item of a capacity-1 queue, or store it if empty.
    /// Never blocks.
    ///
    /// # Returns
    /// * `Err(OsError::InvalidArgument)` - Queue capacity is not 1
    pub fn queue_overwrite(&mut self, q: QueueHandle, item: &[u8]) -> OsResult<()> {
        match self.queue_send_generic(q, item, &mut Wait::none(), SendPosition::Overwrite) {
            Poll::Ready(result) => result,
            Poll::Pending => Err(OsError::Full),
        }
    }

    fn queue_send_generic(
        &mut self,
        q: QueueHandle,
        item: &[u8],
        wait: &mut Wait,
        pos: SendPosition,
    ) -> Poll<OsResult<()>> {
        let cb = *self.queues.cb(q);
        if item.len() > cb.item_size {
            return Poll::Ready(Err(OsError::InvalidSize));
        }
        if pos == SendPosition::Overwrite && cb.capacity != 1 {
            return Poll::Ready(Err(OsError::InvalidArgument));
        }

        loop {
            if !self.queues.cb(q).is_full() || pos == SendPosition::Overwrite {
                self.queues.copy_in(q, item, pos);

                if !self.sched.event_list_is_empty(cb.waiting_to_receive)
                    && self.sched.remove_from_event_list(cb.waiting_to_receive)
                {
                    self.sched.port.request_yield();
                }
                return Poll::Ready(Ok(()));
            }

            if wait.ticks == 0 {
                return Poll::Ready(Err(OsError::Full));
            }
            // A suspended scheduler cannot switch away from the caller
            if self.sched.is_scheduler_suspended() {
                fatal(OsError::InvalidState);
            }
            wait.arm(&self.sched);

            self.sched.scheduler_suspend();
            self.queue_lock(q);

            if wait.expired(&self.sched) {
                self.queue_unlock(q);
                self.sched.scheduler_resume();
                return Poll::Ready(Err(OsError::Timeout));
            }

            if self.queues.cb(q).is_full() {
                self.sched.place_on_event_list(cb.waiting_to_send, wait.ticks);
                self.queue_unlock(q);
                if !self.sched.scheduler_resume() {
                    self.sched.port.request_yield();
                }
                return Poll::Pending;
            }

            // Room appeared while locked; try again
            self.queue_unlock(q);
            self.sched.scheduler_resume();
        }
    }

    /// Receive the oldest item into `out`, waiting for one up to `wait`.
    ///
    /// `out` may be shorter than the item size; the rest of the item is
    /// dropped.
    ///
    /// # Returns
    /// * `Poll::Pending` - Caller blocked; repeat with the same `wait`
    /// * `Ready(Err(OsError::Empty))` - Nothing queued and a zero wait
    /// * `Ready(Err(OsError::Timeout))` - Still empty when the wait ran out
    /// * `Ready(Err(OsError::InvalidSize))` - `out` longer than the item size
    pub fn queue_receive(
        &mut self,
        q: QueueHandle,
        out: &mut [u8],
        wait: &mut Wait,
    ) -> Poll<OsResult<()>> {
        self.queue_receive_generic(q, out, wait, true)
    }

    /// Like [`Kernel::queue_receive`] but leaves the item queued
    pub fn queue_peek(&mut self, q: QueueHandle, out: &mut [u8], wait: &mut Wait) -> Poll<OsResult<()>> {
        self.queue_receive_generic(q, out, wait, false)
    }

    fn queue_receive_generic(
        &mut self,
        q: QueueHandle,
        out: &mut [u8],
        wait: &mut Wait,
        remove: bool,
    ) -> Poll<OsResult<()>> {
        let cb = *self.queues.cb(q);
        if out.len() > cb.item_size {
            return Poll::Ready(Err(OsError::InvalidSize));
        }

        loop {
            if !self.queues.cb(q).is_empty() {
                self.queues.copy_out(q, out, remove);

                // A removal makes room for a sender; a peek leaves the item
                // for the next receiver
                let wake = if remove {
                    cb.waiting_to_send
                } else {
                    cb.waiting_to_receive
                };
                if !self.sched.event_list_is_empty(wake) && self.sched.remove_from_event_list(wake) {
                    self.sched.port.request_yield();
                }
                return Poll::Ready(Ok(()));
            }

            if wait.ticks == 0 {
                return Poll::Ready(Err(OsError::Empty));
            }
            // A suspended scheduler cannot switch away from the caller
            if self.sched.is_scheduler_suspended() {
                fatal(OsError::InvalidState);
            }
            wait.arm(&self.sched);

            self.sched.scheduler_suspend();
            self.queue_lock(q);

            if !wait.expired(&self.sched) {
                if self.queues.cb(q).is_empty() {
                    self.sched.place_on_event_list(cb.waiting_to_receive, wait.ticks);
                    self.queue_unlock(q);
                    if !self.sched.scheduler_resume() {
                        self.sched.port.request_yield();
                    }
                    return Poll::Pending;
                }
                self.queue_unlock(q);
                self.sched.scheduler_resume();
            } else {
                self.queue_unlock(q);
                self.sched.scheduler_resume();
                if self.queues.cb(q).is_empty() {
                    return Poll::Ready(Err(OsError::Timeout));
                }
                // Data arrived just as the wait ran out; take it
            }
        }
    }

    // ============ ISR side ============

    /// Send from interrupt context. Never blocks.
    ///
    /// # Returns
    /// * `Ok(true)` - A woken task outranks the interrupted one; the ISR
    ///   should request a context switch on exit
    /// * `Err(OsError::Full)` - No room
    /// * `Err(OsError::InvalidSize)` - `item` longer than the item size
    pub fn queue_send_from_isr(&mut self, q: QueueHandle, item: &[u8]) -> OsResult<bool> {
        let cb = *self.queues.cb(q);
        if item.len() > cb.item_size {
            return Err(OsError::InvalidSize);
        }
        if cb.is_full() {
            return Err(OsError::Full);
        }

        self.queues.copy_in(q, item, SendPosition::Back);

        let mut woken = false;
        match cb.tx_lock {
            None => {
                if !self.sched.event_list_is_empty(cb.waiting_to_receive) {
                    woken = self.sched.remove_from_event_list(cb.waiting_to_receive);
                }
            }
            Some(_) => {
                let tasks = self.sched.task_count();
                bump_lock(&mut self.queues.cb_mut(q).tx_lock, tasks);
            }
        }
        Ok(woken)
    }

    /// Receive from interrupt context. Never blocks.
    ///
    /// # Returns
    /// * `Ok(true)` - A woken sender outranks the interrupted task
    /// * `Err(OsError::Empty)` - Nothing queued
    /// * `Err(OsError::InvalidSize)` - `out` longer than the item size
    pub fn queue_receive_from_isr(&mut self, q: QueueHandle, out: &mut [u8]) -> OsResult<bool> {
        let cb = *self.queues.cb(q);
        if out.len() > cb.item_size {
            return Err(OsError::InvalidSize);
        }
        if cb.is_empty() {
            return Err(OsError::Empty);
        }

        self.queues.copy_out(q, out, true);

        let mut woken = false;
        match cb.rx_lock {
            None => {
                if !self.sched.event_list_is_empty(cb.waiting_to_send) {
                    woken = self.sched.remove_from_event_list(cb.waiting_to_send);
                }
            }
            Some(_) => {
                let tasks = self.sched.task_count();
                bump_lock(&mut self.queues.cb_mut(q).rx_lock, tasks);
            }
        }
        Ok(woken)
    }

    // ============ Lock protocol ============

    /// Start counting ISR events instead of waking waiters
    pub fn queue_lock(&mut self, q: QueueHandle) {
        let cb = self.queues.cb_mut(q);
        cb.rx_lock.get_or_insert(0);
        cb.tx_lock.get_or_insert(0);
    }

    /// Wake one waiter per event counted while locked, then unlock.
    ///
    /// Wakes that outrank the running task are recorded as a missed yield,
    /// taken when the scheduler resumes.
    pub fn queue_unlock(&mut self, q: QueueHandle) {
        let cb = *self.queues.cb(q);

        let mut sends = cb.tx_lock.unwrap_or(0);
        while sends > 0 && !self.sched.event_list_is_empty(cb.waiting_to_receive) {
            if self.sched.remove_from_event_list(cb.waiting_to_receive) {
                self.sched.missed_yield();
            }
            sends -= 1;
        }
        self.queues.cb_mut(q).tx_lock = None;

        let mut receives = cb.rx_lock.unwrap_or(0);
        while receives > 0 && !self.sched.event_list_is_empty(cb.waiting_to_send) {
            if self.sched.remove_from_event_list(cb.waiting_to_send) {
                self.sched.missed_yield();
            }
            receives -= 1;
        }
        self.queues.cb_mut(q).rx_lock = None;
    }

    /// Drop every queued item.
    ///
    /// One blocked sender is woken, since there is room now. Blocked
    /// receivers keep waiting.
    pub fn queue_reset(&mut self, q: QueueHandle) {
        let cb = self.queues.cb_mut(q);
        cb.write = 0;
        cb.read = 0;
        cb.messages_waiting = 0;
        cb.rx_lock = None;
        cb.tx_lock = None;
        let senders = cb.waiting_to_send;

        if !self.sched.event_list_is_empty(senders) && self.sched.remove_from_event_list(senders) {
            self.sched.port.request_yield();
        }
    }

    /// Store an item without the send path, for objects created signaled
    pub(crate) fn queue_prime(&mut self, q: QueueHandle) {
        self.queues.copy_in(q, &[], SendPosition::Back);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(pool: &mut QueuePool, q: QueueHandle, v: u8, pos: SendPosition) {
        pool.copy_in(q, &[v, v.wrapping_add(1)], pos);
    }

    fn pop(pool: &mut QueuePool, q: QueueHandle) -> [u8; 2] {
        let mut out = [0u8; 2];
        pool.copy_out(q, &mut out, true);
        out
    }

    #[test]
    fn test_create_carves_storage() {
        let mut pool = QueuePool::new();
        let a = pool.create(4, 8).unwrap();
        let b = pool.create(2, 3).unwrap();

        assert_eq!(pool.count(), 2);
        assert_eq!(pool.storage_free(), CFG_QUEUE_STORAGE_SIZE - 38);
        assert_eq!(pool.cb(a).offset, 0);
        assert_eq!(pool.cb(b).offset, 32);
        assert_eq!(pool.cb(a).waiting_to_send, ListId::Event(0));
        assert_eq!(pool.cb(b).waiting_to_receive, ListId::Event(3));
    }

    #[test]
    fn test_create_rejects_bad_sizes() {
        let mut pool = QueuePool::new();
        assert_eq!(pool.create(0, 4), Err(OsError::InvalidArgument));
        assert_eq!(pool.create(usize::MAX, 2), Err(OsError::InvalidArgument));
        assert_eq!(pool.create(CFG_QUEUE_STORAGE_SIZE + 1, 1), Err(OsError::NoFreeMem));
    }

    #[test]
    fn test_pool_runs_out_of_slots() {
        let mut pool = QueuePool::new();
        for _ in 0..CFG_MAX_QUEUES {
            pool.create(1, 0).unwrap();
        }
        assert_eq!(pool.create(1, 0), Err(OsError::NoFreeMem));
    }

    #[test]
    fn test_ring_wraps_in_fifo_order() {
        let mut pool = QueuePool::new();
        let q = pool.create(3, 2).unwrap();

        push(&mut pool, q, 10, SendPosition::Back);
        push(&mut pool, q, 20, SendPosition::Back);
        assert_eq!(pop(&mut pool, q), [10, 11]);
        push(&mut pool, q, 30, SendPosition::Back);
        push(&mut pool, q, 40, SendPosition::Back);

        assert!(pool.cb(q).is_full());
        assert_eq!(pop(&mut pool, q), [20, 21]);
        assert_eq!(pop(&mut pool, q), [30, 31]);
        assert_eq!(pop(&mut pool, q), [40, 41]);
        assert!(pool.cb(q).is_empty());
    }

    #[test]
    fn test_send_to_front_is_received_first() {
        let mut pool = QueuePool::new();
        let q = pool.create(3, 2).unwrap();

        push(&mut pool, q, 1, SendPosition::Back);
        push(&mut pool, q, 2, SendPosition::Back);
        push(&mut pool, q, 9, SendPosition::Front);

        assert_eq!(pop(&mut pool, q), [9, 10]);
        assert_eq!(pop(&mut pool, q), [1, 2]);
        assert_eq!(pop(&mut pool, q), [2, 3]);
    }

    #[test]
    fn test_overwrite_keeps_one_item() {
        let mut pool = QueuePool::new();
        let q = pool.create(1, 2).unwrap();

        push(&mut pool, q, 1, SendPosition::Overwrite);
        push(&mut pool, q, 5, SendPosition::Overwrite);

        assert_eq!(pool.cb(q).messages_waiting, 1);
        assert_eq!(pop(&mut pool, q), [5, 6]);
    }

    #[test]
    fn test_short_items_are_zero_padded() {
        let mut pool = QueuePool::new();
        let q = pool.create(2, 4).unwrap();

        pool.copy_in(q, &[0xFF; 4], SendPosition::Back);
        let mut out = [0u8; 4];
        pool.copy_out(q, &mut out, true);

        pool.copy_in(q, &[7], SendPosition::Back);
        pool.copy_in(q, &[8], SendPosition::Back);
        pool.copy_out(q, &mut out, true);
        assert_eq!(out, [7, 0, 0, 0]);
        // Lands on the slot the 0xFF item used
        pool.copy_out(q, &mut out, true);
        assert_eq!(out, [8, 0, 0, 0]);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut pool = QueuePool::new();
        let q = pool.create(2, 2).unwrap();
        push(&mut pool, q, 3, SendPosition::Back);

        let mut out = [0u8; 2];
        pool.copy_out(q, &mut out, false);
        assert_eq!(out, [3, 4]);
        assert_eq!(pool.cb(q).messages_waiting, 1);
        assert_eq!(pop(&mut pool, q), [3, 4]);
    }

    #[test]
    fn test_lock_count_is_capped() {
        let mut lock = Some(0u8);
        for _ in 0..10 {
            bump_lock(&mut lock, 3);
        }
        assert_eq!(lock, Some(3));

        let mut unlocked = None;
        bump_lock(&mut unlocked, 3);
        assert_eq!(unlocked, None);
    }
}
