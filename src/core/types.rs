//! Core type definitions
//!
//! Scalar aliases shared by every kernel module, plus the task state and
//! queue write position enums.

/// Task priority (0 = idle, higher numbers run first)
pub type OsPrio = u8;

/// Tick counter type
pub type OsTick = u32;

/// Stack element type
pub type OsStkElement = u32;

/// Wait without a deadline (with `task-suspend`), or the longest finite wait
pub const WAIT_FOREVER: OsTick = OsTick::MAX;

/// Don't wait at all
pub const NO_WAIT: OsTick = 0;

/// Task state as observed from outside the task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TaskState {
    /// The task is the current task
    Running = 0,
    /// Task is ready to run, or readied while the scheduler was suspended
    Ready = 1,
    /// Task is delayed, or waiting on a queue with or without a deadline
    Blocked = 2,
    /// Task was explicitly suspended
    Suspended = 3,
}

/// Where a send places its item in the ring buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPosition {
    /// Behind every queued item (FIFO)
    Back,
    /// In front of every queued item (LIFO)
    Front,
    /// Replace the only item of a capacity-1 queue
    Overwrite,
}
