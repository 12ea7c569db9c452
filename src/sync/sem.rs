//! Binary semaphores
//!
//! A binary semaphore is a queue of capacity 1 with zero-sized items:
//! "given" means the queue holds its one item. Taking blocks like a
//! receive, giving is a send that never waits.

use core::task::Poll;

use crate::error::{fatal, OsError, OsResult};
use crate::kernel::Kernel;
use crate::port::Port;
use crate::sync::queue::QueueHandle;
use crate::time::Wait;

/// Handle to a binary semaphore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SemaphoreHandle(QueueHandle);

impl SemaphoreHandle {
    /// The queue behind the semaphore
    #[inline]
    pub const fn queue(self) -> QueueHandle {
        self.0
    }
}

impl<P: Port> Kernel<P> {
    /// Create a binary semaphore, given if `initially_signaled`.
    ///
    /// Running out of queue slots halts.
    pub fn semaphore_create(&mut self, initially_signaled: bool) -> SemaphoreHandle {
        let q = match self.queue_create(1, 0) {
            Ok(q) => q,
            Err(e) => fatal(e),
        };
        if initially_signaled {
            self.queue_prime(q);
        }
        SemaphoreHandle(q)
    }

    /// Take the semaphore, waiting up to `wait` for a give.
    ///
    /// # Returns
    /// * `Poll::Pending` - Caller blocked; repeat with the same `wait`
    /// * `Ready(Err(OsError::Empty))` - Not given and a zero wait
    /// * `Ready(Err(OsError::Timeout))` - Not given before the wait ran out
    pub fn semaphore_take(&mut self, sem: SemaphoreHandle, wait: &mut Wait) -> Poll<OsResult<()>> {
        self.queue_receive(sem.0, &mut [], wait)
    }

    /// Give the semaphore, waking the highest-priority taker.
    ///
    /// # Returns
    /// * `Err(OsError::Full)` - Already given
    pub fn semaphore_give(&mut self, sem: SemaphoreHandle) -> OsResult<()> {
        match self.queue_send(sem.0, &[], &mut Wait::none()) {
            Poll::Ready(result) => result,
            Poll::Pending => Err(OsError::Full),
        }
    }

    /// Give from interrupt context.
    ///
    /// # Returns
    /// * `Ok(true)` - The woken taker outranks the interrupted task
    /// * `Err(OsError::Full)` - Already given
    pub fn semaphore_give_from_isr(&mut self, sem: SemaphoreHandle) -> OsResult<bool> {
        self.queue_send_from_isr(sem.0, &[])
    }

    /// True while the semaphore is given
    #[inline]
    pub fn semaphore_is_given(&self, sem: SemaphoreHandle) -> bool {
        self.queue_messages_waiting(sem.0) == 1
    }
}
