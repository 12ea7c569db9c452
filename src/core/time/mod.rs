//! Time management module
//!
//! Tick processing, delays and wraparound-safe timeouts.
//!
//! Wake times are absolute tick values. A wake time that wraps past
//! `OsTick::MAX` goes on the overflow delayed list; when the tick counter
//! itself wraps, the two delayed lists swap roles and the overflow count
//! increments. Timeouts compare overflow counts so a wait that started
//! before a wraparound still expires at the right tick.

use portable_atomic::{AtomicU32, Ordering};

use crate::config::{CFG_TICK_RATE_HZ, CFG_TIME_SLICING};
use crate::error::{fatal, OsError, OsResult};
use crate::list::ItemRef;
use crate::port::Port;
use crate::sched::Scheduler;
use crate::types::{OsTick, WAIT_FOREVER};

/// Last tick count published by a running kernel, for log timestamps
static LOG_TICK: AtomicU32 = AtomicU32::new(0);

/// Tick count to stamp log lines with
#[inline]
pub fn log_tick() -> OsTick {
    LOG_TICK.load(Ordering::Relaxed)
}

/// Snapshot taken when a timed wait begins
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeOut {
    overflow_count: u32,
    time_on_entering: OsTick,
}

/// State of one blocking call across its retries
///
/// Created with the caller's timeout; the kernel arms it on the first
/// attempt that has to wait and counts the remaining ticks down on every
/// retry.
#[derive(Debug, Clone, Copy)]
pub struct Wait {
    pub(crate) timeout: TimeOut,
    pub(crate) ticks: OsTick,
    pub(crate) armed: bool,
}

impl Wait {
    pub const fn new(ticks: OsTick) -> Self {
        Self {
            timeout: TimeOut {
                overflow_count: 0,
                time_on_entering: 0,
            },
            ticks,
            armed: false,
        }
    }

    /// Never give up waiting
    pub const fn forever() -> Self {
        Self::new(WAIT_FOREVER)
    }

    /// Fail at once instead of waiting
    pub const fn none() -> Self {
        Self::new(0)
    }

    /// Ticks left before the wait times out
    #[inline]
    pub fn remaining(&self) -> OsTick {
        self.ticks
    }

    /// Take the timeout snapshot once, on the first attempt that blocks
    pub(crate) fn arm<P: Port>(&mut self, sched: &Scheduler<P>) {
        if !self.armed {
            sched.set_timeout_state(&mut self.timeout);
            self.armed = true;
        }
    }

    /// True once the wait has run out; otherwise re-arms with the rest
    pub(crate) fn expired<P: Port>(&mut self, sched: &Scheduler<P>) -> bool {
        sched.check_for_timeout(&mut self.timeout, &mut self.ticks)
    }
}

/// Convert milliseconds to ticks, rounding down
#[inline]
pub const fn ms_to_ticks(ms: u32) -> OsTick {
    ((ms as u64 * CFG_TICK_RATE_HZ as u64) / 1000) as OsTick
}

/// Convert hours, minutes, seconds and milliseconds to ticks
///
/// # Returns
/// * `Err(OsError::InvalidArgument)` - A field out of range, or the total
///   does not fit in a tick count
pub fn hmsm_to_ticks(hours: u16, minutes: u8, seconds: u8, milliseconds: u16) -> OsResult<OsTick> {
    if minutes > 59 || seconds > 59 || milliseconds > 999 {
        return Err(OsError::InvalidArgument);
    }

    let total_ms = hours as u64 * 3_600_000
        + minutes as u64 * 60_000
        + seconds as u64 * 1000
        + milliseconds as u64;

    OsTick::try_from(total_ms * CFG_TICK_RATE_HZ as u64 / 1000).map_err(|_| OsError::InvalidArgument)
}

impl<P: Port> Scheduler<P> {
    // ============ Tick ============

    /// Current tick count
    #[inline]
    pub fn tick_count(&self) -> OsTick {
        self.tick_count
    }

    /// Times the tick counter wrapped
    #[inline]
    pub fn overflow_count(&self) -> u32 {
        self.num_overflows
    }

    /// Ticks waiting to be replayed by `scheduler_resume`
    #[inline]
    pub fn pended_ticks(&self) -> OsTick {
        self.pended_ticks
    }

    /// Process one timer tick.
    ///
    /// Wakes every delayed task whose time has come, in wake order. While
    /// the scheduler is suspended the tick is only counted.
    ///
    /// # Returns
    /// `true` if a context switch should follow: a woken task ranks at or
    /// above the running one, the running task shares its priority with
    /// another ready task, or a yield is pending.
    pub fn tick(&mut self) -> bool {
        if self.suspended_depth > 0 {
            self.pended_ticks = self.pended_ticks.wrapping_add(1);
            return false;
        }

        let now = self.tick_count.wrapping_add(1);
        self.tick_count = now;
        LOG_TICK.store(now, Ordering::Relaxed);

        if now == 0 {
            self.switch_delayed_lists();
        }

        let mut switch_required = false;

        if now >= self.next_unblock_time {
            loop {
                let Some(wake) = self.lists.delayed().head_key(&self.tasks) else {
                    self.next_unblock_time = OsTick::MAX;
                    break;
                };

                if now < wake {
                    self.next_unblock_time = wake;
                    break;
                }

                let Some(task) = self.lists.delayed().head_owner() else {
                    break;
                };
                self.unlink(ItemRef::state(task));
                self.unlink(ItemRef::event(task));
                self.add_to_ready(task);

                if self.outranks_current(self.tasks.prio(task), true) {
                    switch_required = true;
                }
            }
        }

        if CFG_TIME_SLICING {
            if let Some(prio) = self.current_prio() {
                if self.lists.ready.list(prio).len() > 1 {
                    switch_required = true;
                }
            }
        }

        if self.yield_pending {
            switch_required = true;
        }

        switch_required
    }

    /// Advance the tick count by `ticks` without scanning the delayed
    /// lists, for a port that slept through several tick periods.
    ///
    /// # Returns
    /// * `Err(OsError::InvalidArgument)` - The jump would pass the next
    ///   wake time or wrap the counter
    pub fn step_tick(&mut self, ticks: OsTick) -> OsResult<()> {
        match self.tick_count.checked_add(ticks) {
            Some(target) if target <= self.next_unblock_time => {
                self.tick_count = target;
                LOG_TICK.store(target, Ordering::Relaxed);
                Ok(())
            }
            _ => Err(OsError::InvalidArgument),
        }
    }

    fn switch_delayed_lists(&mut self) {
        debug_assert!(self.lists.delayed().is_empty());
        self.lists.swap_delayed();
        self.num_overflows = self.num_overflows.wrapping_add(1);
        self.reset_next_unblock_time();
        crate::trace!("tick wrapped, overflow {}", self.num_overflows);
    }

    pub(crate) fn reset_next_unblock_time(&mut self) {
        self.next_unblock_time = self
            .lists
            .delayed()
            .head_key(&self.tasks)
            .unwrap_or(OsTick::MAX);
    }

    // ============ Delays ============

    /// Move the running task off its ready list until `ticks` pass.
    ///
    /// An endless wait parks the task on the suspended list when
    /// `can_block_indefinitely` is set and `task-suspend` is enabled.
    pub(crate) fn add_current_to_delayed_list(&mut self, ticks: OsTick, can_block_indefinitely: bool) {
        let task = self.current_or_fatal();
        let now = self.tick_count;

        self.unlink(ItemRef::state(task));

        if ticks == WAIT_FOREVER && can_block_indefinitely && cfg!(feature = "task-suspend") {
            self.lists.suspended.insert_end(&mut self.tasks, ItemRef::state(task));
            return;
        }

        let wake = now.wrapping_add(ticks);
        self.tasks.get_mut(task).state_item.key = wake;

        if wake < now {
            self.lists
                .overflow_delayed_mut()
                .insert(&mut self.tasks, ItemRef::state(task));
        } else {
            self.lists.delayed_mut().insert(&mut self.tasks, ItemRef::state(task));
            if wake < self.next_unblock_time {
                self.next_unblock_time = wake;
            }
        }
    }

    /// Block the caller for `ticks` ticks.
    ///
    /// `task_delay(0)` only requests a yield: the caller stays ready and
    /// gets one reschedule opportunity.
    pub fn task_delay(&mut self, ticks: OsTick) {
        let mut already_yielded = false;

        if ticks > 0 {
            if self.suspended_depth > 0 {
                fatal(OsError::InvalidState);
            }
            self.scheduler_suspend();
            self.add_current_to_delayed_list(ticks, false);
            already_yielded = self.scheduler_resume();
        }

        if !already_yielded {
            self.port.request_yield();
        }
    }

    /// Block the caller until `*prev_wake + increment`, for fixed-rate
    /// periodic tasks.
    ///
    /// `*prev_wake` is advanced by `increment` whether or not a delay was
    /// needed. Returns false if the wake time had already passed.
    #[cfg(feature = "task-delay-until")]
    pub fn task_delay_until(&mut self, prev_wake: &mut OsTick, increment: OsTick) -> bool {
        if increment == 0 {
            fatal(OsError::InvalidArgument);
        }
        if self.suspended_depth > 0 {
            fatal(OsError::InvalidState);
        }

        self.scheduler_suspend();

        let now = self.tick_count;
        let wake = prev_wake.wrapping_add(increment);

        let should_delay = if now < *prev_wake {
            // The counter wrapped since the last wake
            wake < *prev_wake && wake > now
        } else {
            wake < *prev_wake || wake > now
        };

        *prev_wake = wake;

        if should_delay {
            self.add_current_to_delayed_list(wake.wrapping_sub(now), false);
        }

        if !self.scheduler_resume() {
            self.port.request_yield();
        }
        should_delay
    }

    // ============ Timeouts ============

    /// Record the current tick and overflow count as a wait's start
    pub fn set_timeout_state(&self, timeout: &mut TimeOut) {
        timeout.overflow_count = self.num_overflows;
        timeout.time_on_entering = self.tick_count;
    }

    /// Check a timed wait begun at `timeout`.
    ///
    /// If time is left, `ticks_to_wait` is reduced by the elapsed ticks and
    /// `timeout` restarts from now. Returns true once the wait has expired.
    pub fn check_for_timeout(&self, timeout: &mut TimeOut, ticks_to_wait: &mut OsTick) -> bool {
        let now = self.tick_count;

        if *ticks_to_wait == WAIT_FOREVER && cfg!(feature = "task-suspend") {
            return false;
        }

        let elapsed = now.wrapping_sub(timeout.time_on_entering);

        if timeout.overflow_count != self.num_overflows && now >= timeout.time_on_entering {
            // Wrapped and passed the start tick again: a full period went by
            *ticks_to_wait = 0;
            true
        } else if elapsed < *ticks_to_wait {
            *ticks_to_wait -= elapsed;
            self.set_timeout_state(timeout);
            false
        } else {
            *ticks_to_wait = 0;
            true
        }
    }
}
