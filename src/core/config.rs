//! Compile-time configuration
//!
//! These constants size the kernel's fixed arenas and control its
//! scheduling behavior. Nothing is allocated at run time.

use crate::types::{OsPrio, OsStkElement, OsTick};

/// Number of priority levels. Valid priorities are `0..CFG_MAX_PRIORITIES`.
pub const CFG_MAX_PRIORITIES: usize = 8;

/// Task arena size, idle task included
pub const CFG_MAX_TASKS: usize = 16;

/// Queue arena size (every semaphore uses one queue slot)
pub const CFG_MAX_QUEUES: usize = 16;

/// Wait lists available to kernel objects, two per queue
pub const CFG_MAX_EVENT_LISTS: usize = CFG_MAX_QUEUES * 2;

/// Bytes shared by all queue ring buffers
pub const CFG_QUEUE_STORAGE_SIZE: usize = 1024;

/// System tick rate in Hz
pub const CFG_TICK_RATE_HZ: u32 = 1000;

/// Minimum task stack size in words
pub const CFG_STK_SIZE_MIN: usize = 32;

/// Idle task stack size in words
pub const CFG_IDLE_STK_SIZE: usize = 128;

/// Idle task priority
pub const CFG_PRIO_IDLE: OsPrio = 0;

/// Share the CPU between equal-priority ready tasks on every tick
pub const CFG_TIME_SLICING: bool = true;

/// Tick count at scheduler start
pub const CFG_INITIAL_TICK_COUNT: OsTick = 0;

/// Pattern written over a fresh stack, used to measure the high-water mark
pub const CFG_STK_FILL: OsStkElement = 0xA5A5_A5A5;
