//! Kernel core
//!
//! Lists, task bookkeeping, the scheduler, time management and the
//! kernel value that ties them to a port.

pub mod config;
pub mod critical;
pub mod cs_cell;
pub mod error;
pub mod types;
pub mod list;
pub mod task;
pub mod sched;
pub mod time;
pub mod kernel;
pub mod rtos;
