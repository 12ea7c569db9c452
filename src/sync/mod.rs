//! Synchronization primitives
//!
//! Contains blocking queues and the binary semaphores built on them.

pub mod queue;

#[cfg(feature = "sem")]
pub mod sem;
